//! Microsoft Graph mailbox adapter.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use secrecy::{ExposeSecret, SecretString};
use reqwest::Url;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::channels::normalize::{normalize_whitespace, strip_html};
use crate::error::MailboxError;
use crate::pipeline::types::{FetchedMessage, MailboxAdapter};

const SOURCE: &str = "ms_graph";
const GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";
const LOGIN_BASE_URL: &str = "https://login.microsoftonline.com";
const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";
const PAGE_SIZE: u32 = 50;
const WELL_KNOWN_FOLDERS: &[&str] = &[
    "archive",
    "deleteditems",
    "drafts",
    "inbox",
    "junkemail",
    "outbox",
    "sentitems",
];

/// How the adapter obtains a bearer token.
pub enum GraphAuth {
    /// Token issued out of band.
    AccessToken(SecretString),
    /// OAuth2 client-credentials flow.
    ClientCredentials {
        tenant: String,
        client_id: String,
        client_secret: SecretString,
    },
}

/// Mailbox adapter for Microsoft 365 / Outlook via Graph.
pub struct GraphMailbox {
    name: String,
    user: String,
    folders: Vec<String>,
    auth: GraphAuth,
    lookback_days: u32,
    client: reqwest::Client,
    graph_base: String,
    login_base: String,
}

impl GraphMailbox {
    pub fn new(
        name: impl Into<String>,
        user: impl Into<String>,
        folders: Vec<String>,
        auth: GraphAuth,
        lookback_days: u32,
    ) -> Self {
        Self {
            name: name.into(),
            user: user.into(),
            folders,
            auth,
            lookback_days,
            client: reqwest::Client::new(),
            graph_base: GRAPH_BASE_URL.to_string(),
            login_base: LOGIN_BASE_URL.to_string(),
        }
    }

    /// Point the adapter at different Graph/login hosts.
    pub fn with_endpoints(mut self, graph_base: &str, login_base: &str) -> Self {
        self.graph_base = graph_base.trim_end_matches('/').to_string();
        self.login_base = login_base.trim_end_matches('/').to_string();
        self
    }

    async fn access_token(&self) -> Result<SecretString, MailboxError> {
        match &self.auth {
            GraphAuth::AccessToken(token) => Ok(SecretString::from(token.expose_secret())),
            GraphAuth::ClientCredentials {
                tenant,
                client_id,
                client_secret,
            } => {
                let url = format!("{}/{tenant}/oauth2/v2.0/token", self.login_base);
                let form = [
                    ("client_id", client_id.as_str()),
                    ("client_secret", client_secret.expose_secret()),
                    ("scope", GRAPH_SCOPE),
                    ("grant_type", "client_credentials"),
                ];
                let resp = self
                    .client
                    .post(&url)
                    .form(&form)
                    .send()
                    .await
                    .map_err(|e| MailboxError::Http(e.to_string()))?;
                if !resp.status().is_success() {
                    return Err(MailboxError::AuthFailed {
                        name: self.name.clone(),
                        reason: format!("token endpoint returned {}", resp.status()),
                    });
                }
                let token: TokenResponse = resp
                    .json()
                    .await
                    .map_err(|e| MailboxError::Http(e.to_string()))?;
                Ok(SecretString::from(token.access_token))
            }
        }
    }

    /// `{graph_base}/users/{user}/{segments...}` with every segment encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, MailboxError> {
        let mut url = Url::parse(&self.graph_base)
            .map_err(|e| MailboxError::Http(format!("bad Graph base URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| MailboxError::Http(format!("{} cannot be a base URL", self.graph_base)))?
            .pop_if_empty()
            .extend(["users", self.user.as_str()])
            .extend(segments);
        Ok(url)
    }

    fn messages_url(&self, folder_id: &str, cutoff: DateTime<Utc>) -> Result<Url, MailboxError> {
        let mut url = self.endpoint(&["mailFolders", folder_id, "messages"])?;
        url.query_pairs_mut()
            .append_pair(
                "$filter",
                &format!(
                    "receivedDateTime ge {}",
                    cutoff.to_rfc3339_opts(SecondsFormat::Secs, true)
                ),
            )
            .append_pair("$orderby", "receivedDateTime desc")
            .append_pair("$top", &PAGE_SIZE.to_string())
            .append_pair(
                "$select",
                "subject,from,receivedDateTime,internetMessageId,body",
            );
        Ok(url)
    }

    fn folder_lookup_url(&self, display_name: &str) -> Result<Url, MailboxError> {
        let mut url = self.endpoint(&["mailFolders"])?;
        url.query_pairs_mut()
            .append_pair("$filter", &display_name_filter(display_name))
            .append_pair("$select", "id,displayName");
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        token: &SecretString,
        url: Url,
        folder: &str,
    ) -> Result<T, MailboxError> {
        let resp = self
            .client
            .get(url)
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .map_err(|e| MailboxError::Http(e.to_string()))?;
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(MailboxError::AuthFailed {
                name: self.name.clone(),
                reason: format!("Graph returned {status}"),
            });
        }
        if !status.is_success() {
            return Err(MailboxError::FolderUnavailable {
                name: self.name.clone(),
                folder: folder.to_string(),
                reason: format!("Graph returned {status}"),
            });
        }
        resp.json()
            .await
            .map_err(|e| MailboxError::Http(e.to_string()))
    }

    /// Folder id for `folder`: a well-known name as-is, anything else looked
    /// up by display name.
    async fn resolve_folder(
        &self,
        token: &SecretString,
        folder: &str,
    ) -> Result<String, MailboxError> {
        if let Some(name) = well_known_folder(folder) {
            return Ok(name.to_string());
        }
        let page: FolderPage = self
            .get_json(token, self.folder_lookup_url(folder)?, folder)
            .await?;
        page.value
            .into_iter()
            .next()
            .map(|f| f.id)
            .ok_or_else(|| MailboxError::FolderUnavailable {
                name: self.name.clone(),
                folder: folder.to_string(),
                reason: "no folder with that display name".into(),
            })
    }

    async fn fetch_folder(
        &self,
        token: &SecretString,
        folder: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<FetchedMessage>, MailboxError> {
        let folder_id = self.resolve_folder(token, folder).await?;
        let mut out = Vec::new();
        let mut next = Some(self.messages_url(&folder_id, cutoff)?);

        while let Some(url) = next.take() {
            let page: MessagePage = self.get_json(token, url, folder).await?;
            out.extend(page.value.into_iter().map(|m| m.into_fetched(&self.name)));
            next = page
                .next_link
                .map(|link| Url::parse(&link))
                .transpose()
                .map_err(|e| MailboxError::Http(format!("bad @odata.nextLink: {e}")))?;
        }
        Ok(out)
    }
}

#[async_trait]
impl MailboxAdapter for GraphMailbox {
    fn name(&self) -> &str {
        &self.name
    }

    fn source(&self) -> &'static str {
        SOURCE
    }

    async fn fetch_messages(&self) -> Result<Vec<FetchedMessage>, MailboxError> {
        let token = self.access_token().await?;
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(self.lookback_days));

        let mut messages = Vec::new();
        for folder in &self.folders {
            match self.fetch_folder(&token, folder, cutoff).await {
                Ok(batch) => {
                    debug!(mailbox = %self.name, folder = %folder, count = batch.len(), "Fetched folder");
                    messages.extend(batch);
                }
                Err(e @ MailboxError::AuthFailed { .. }) => return Err(e),
                Err(e) => warn!(error = %e, "Skipping folder"),
            }
        }

        info!(mailbox = %self.name, count = messages.len(), "Fetched Graph messages");
        Ok(messages)
    }
}

/// Graph well-known folder name for `folder`, if it is one. IMAP's `INBOX`
/// maps onto `inbox`.
pub fn well_known_folder(folder: &str) -> Option<&'static str> {
    WELL_KNOWN_FOLDERS
        .iter()
        .find(|name| name.eq_ignore_ascii_case(folder.trim()))
        .copied()
}

/// OData filter matching a folder by display name.
fn display_name_filter(display_name: &str) -> String {
    format!("displayName eq '{}'", display_name.replace('\'', "''"))
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct FolderPage {
    #[serde(default)]
    value: Vec<GraphFolder>,
}

#[derive(Debug, Deserialize)]
struct GraphFolder {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MessagePage {
    #[serde(default)]
    value: Vec<GraphMessage>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphMessage {
    subject: Option<String>,
    from: Option<GraphRecipient>,
    received_date_time: Option<DateTime<Utc>>,
    internet_message_id: Option<String>,
    body: Option<GraphBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphRecipient {
    email_address: GraphEmailAddress,
}

#[derive(Debug, Deserialize)]
struct GraphEmailAddress {
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphBody {
    content_type: String,
    content: String,
}

impl GraphMessage {
    fn into_fetched(self, mailbox: &str) -> FetchedMessage {
        let body = match self.body {
            Some(b) if b.content_type.eq_ignore_ascii_case("html") => strip_html(&b.content),
            Some(b) => normalize_whitespace(&b.content),
            None => String::new(),
        };
        FetchedMessage {
            body,
            subject: self.subject,
            sender: self.from.and_then(|f| f.email_address.address),
            received_at: self.received_date_time,
            message_id: self.internet_message_id,
            source: SOURCE.to_string(),
            mailbox: mailbox.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"{
        "@odata.context": "https://graph.microsoft.com/v1.0/$metadata#users('me')/messages",
        "value": [
            {
                "subject": "Paket kommt",
                "from": { "emailAddress": { "name": "DHL", "address": "noreply@dhl.de" } },
                "receivedDateTime": "2025-04-21T08:30:00Z",
                "internetMessageId": "<m1@dhl.de>",
                "body": { "contentType": "html", "content": "<p>Sendung <b>JJD000390018282329702</b></p>" }
            },
            {
                "subject": null,
                "body": { "contentType": "text", "content": "plain\n  text" }
            }
        ],
        "@odata.nextLink": "https://graph.microsoft.com/v1.0/next?page=2"
    }"#;

    #[test]
    fn parses_message_page() {
        let page: MessagePage = serde_json::from_str(PAGE).unwrap();
        assert_eq!(page.value.len(), 2);
        assert_eq!(
            page.next_link.as_deref(),
            Some("https://graph.microsoft.com/v1.0/next?page=2")
        );

        let mut msgs = page.value.into_iter().map(|m| m.into_fetched("work"));
        let first = msgs.next().unwrap();
        assert_eq!(first.body, "Sendung JJD000390018282329702");
        assert_eq!(first.sender.as_deref(), Some("noreply@dhl.de"));
        assert_eq!(first.message_id.as_deref(), Some("<m1@dhl.de>"));
        assert_eq!(first.source, "ms_graph");
        assert!(first.received_at.is_some());

        let second = msgs.next().unwrap();
        assert_eq!(second.body, "plain text");
        assert!(second.sender.is_none());
    }

    #[test]
    fn last_page_has_no_next_link() {
        let page: MessagePage = serde_json::from_str(r#"{"value": []}"#).unwrap();
        assert!(page.next_link.is_none());
    }

    fn mailbox(user: &str) -> GraphMailbox {
        GraphMailbox::new(
            "work",
            user,
            vec!["INBOX".into()],
            GraphAuth::AccessToken(SecretString::from("t".to_string())),
            7,
        )
    }

    fn query_value(url: &Url, key: &str) -> Option<String> {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    #[test]
    fn messages_url_filters_by_cutoff() {
        let cutoff = DateTime::parse_from_rfc3339("2025-04-14T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let url = mailbox("me@example.com").messages_url("inbox", cutoff).unwrap();
        assert_eq!(
            url.path(),
            "/v1.0/users/me@example.com/mailFolders/inbox/messages"
        );
        assert_eq!(
            query_value(&url, "$filter").as_deref(),
            Some("receivedDateTime ge 2025-04-14T00:00:00Z")
        );
        assert_eq!(query_value(&url, "$top").as_deref(), Some("50"));
    }

    #[test]
    fn path_segments_are_encoded() {
        let cutoff = Utc::now();
        let url = mailbox("team/parcels").messages_url("AAMk+id/x==", cutoff).unwrap();
        let segments: Vec<_> = url.path_segments().unwrap().collect();
        assert_eq!(
            segments,
            vec!["v1.0", "users", "team%2Fparcels", "mailFolders", "AAMk+id%2Fx==", "messages"]
        );
    }

    #[test]
    fn folder_lookup_filters_by_display_name() {
        let url = mailbox("me@example.com").folder_lookup_url("Bob's Parcels & more").unwrap();
        assert_eq!(url.path(), "/v1.0/users/me@example.com/mailFolders");
        assert_eq!(
            query_value(&url, "$filter").as_deref(),
            Some("displayName eq 'Bob''s Parcels & more'")
        );
    }

    #[test]
    fn well_known_folders() {
        assert_eq!(well_known_folder("INBOX"), Some("inbox"));
        assert_eq!(well_known_folder("SentItems"), Some("sentitems"));
        assert_eq!(well_known_folder("Parcels"), None);
    }

    #[test]
    fn parses_folder_lookup() {
        let page: FolderPage =
            serde_json::from_str(r#"{"value": [{"id": "AAMkAD1", "displayName": "Parcels"}]}"#)
                .unwrap();
        assert_eq!(page.value[0].id, "AAMkAD1");
        let empty: FolderPage = serde_json::from_str(r#"{"value": []}"#).unwrap();
        assert!(empty.value.is_empty());
    }

    #[tokio::test]
    async fn static_token_is_returned_as_is() {
        let mailbox = GraphMailbox::new(
            "work",
            "me@example.com",
            vec![],
            GraphAuth::AccessToken(SecretString::from("abc".to_string())),
            7,
        );
        let token = mailbox.access_token().await.unwrap();
        assert_eq!(token.expose_secret(), "abc");
    }
}
