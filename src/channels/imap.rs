//! IMAP mailbox adapter: raw IMAP over rustls (or plain TCP), read-only.
//!
//! Each folder is opened with `EXAMINE`, searched with `SINCE <cutoff>`, and
//! fetched newest first with `BODY.PEEK[]` so no `\Seen` flags change.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::channels::normalize::message_from_mime;
use crate::error::MailboxError;
use crate::pipeline::types::{FetchedMessage, MailboxAdapter};

const SOURCE: &str = "imap";
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for one IMAP mailbox.
#[derive(Debug)]
pub struct ImapSettings {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub ssl: bool,
    pub folders: Vec<String>,
    pub username: String,
    pub password: SecretString,
    pub lookback_days: u32,
}

/// Mailbox adapter for an IMAP server.
pub struct ImapMailbox {
    settings: Arc<ImapSettings>,
}

impl ImapMailbox {
    pub fn new(settings: ImapSettings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }
}

#[async_trait]
impl MailboxAdapter for ImapMailbox {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn source(&self) -> &'static str {
        SOURCE
    }

    async fn fetch_messages(&self) -> Result<Vec<FetchedMessage>, MailboxError> {
        let settings = self.settings.clone();
        tokio::task::spawn_blocking(move || fetch_since(&settings))
            .await
            .map_err(|e| MailboxError::TaskAborted {
                name: self.settings.name.clone(),
                reason: e.to_string(),
            })?
    }
}

// ── Protocol helpers (public for testing) ───────────────────────────

/// IMAP `SINCE` date, e.g. `08-Apr-2025`.
pub fn imap_date(date: NaiveDate) -> String {
    date.format("%d-%b-%Y").to_string()
}

/// Quote a string for an IMAP command.
pub fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Message sequence numbers from `* SEARCH` lines, newest first.
pub fn parse_search_response(lines: &[String]) -> Vec<u32> {
    let mut ids: Vec<u32> = lines
        .iter()
        .filter_map(|l| l.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace().filter_map(|n| n.parse().ok()))
        .collect();
    ids.sort_unstable();
    ids.dedup();
    ids.reverse();
    ids
}

/// Size of a trailing `{N}` literal marker on a response line.
pub fn literal_size(line: &str) -> Option<usize> {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    let inner = trimmed.strip_suffix('}')?;
    let open = inner.rfind('{')?;
    inner[open + 1..].parse().ok()
}

/// Whether `line` is the tagged completion for `tag` with status OK.
pub fn is_tagged_ok(line: &str, tag: &str) -> bool {
    line.strip_prefix(tag)
        .is_some_and(|rest| rest.trim_start().starts_with("OK"))
}

// ── Connection ──────────────────────────────────────────────────────

trait Transport: Read + Write + Send {}
impl<T: Read + Write + Send> Transport for T {}

/// Response to one tagged command.
struct Response {
    lines: Vec<String>,
    literals: Vec<Vec<u8>>,
    ok: bool,
}

struct ImapConnection {
    stream: BufReader<Box<dyn Transport>>,
    next_tag: u32,
}

impl ImapConnection {
    fn open(settings: &ImapSettings) -> Result<Self, MailboxError> {
        let connect_err = |reason: String| MailboxError::ConnectFailed {
            name: settings.name.clone(),
            reason,
        };

        let tcp = TcpStream::connect((settings.host.as_str(), settings.port))
            .map_err(|e| connect_err(e.to_string()))?;
        tcp.set_read_timeout(Some(READ_TIMEOUT))
            .map_err(|e| connect_err(e.to_string()))?;

        let transport: Box<dyn Transport> = if settings.ssl {
            let mut root_store = rustls::RootCertStore::empty();
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            let tls_config = Arc::new(
                rustls::ClientConfig::builder()
                    .with_root_certificates(root_store)
                    .with_no_client_auth(),
            );
            let server_name = rustls_pki_types::ServerName::try_from(settings.host.clone())
                .map_err(|e| connect_err(e.to_string()))?;
            let conn = rustls::ClientConnection::new(tls_config, server_name)
                .map_err(|e| connect_err(e.to_string()))?;
            Box::new(rustls::StreamOwned::new(conn, tcp))
        } else {
            Box::new(tcp)
        };

        let mut conn = Self {
            stream: BufReader::new(transport),
            next_tag: 1,
        };
        let greeting = conn.read_line(&settings.name)?;
        if !greeting.starts_with("* OK") && !greeting.starts_with("* PREAUTH") {
            return Err(connect_err(format!("unexpected greeting: {}", greeting.trim())));
        }
        Ok(conn)
    }

    fn read_line(&mut self, name: &str) -> Result<String, MailboxError> {
        let mut buf = Vec::new();
        let n = self
            .stream
            .read_until(b'\n', &mut buf)
            .map_err(|e| protocol(name, e.to_string()))?;
        if n == 0 {
            return Err(protocol(name, "connection closed".into()));
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Send a command and collect untagged lines and literals until the
    /// tagged completion.
    fn command(&mut self, name: &str, cmd: &str) -> Result<Response, MailboxError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        let stream = self.stream.get_mut();
        stream
            .write_all(format!("{tag} {cmd}\r\n").as_bytes())
            .and_then(|_| stream.flush())
            .map_err(|e| protocol(name, e.to_string()))?;

        let mut lines = Vec::new();
        let mut literals = Vec::new();
        loop {
            let line = self.read_line(name)?;
            if line.starts_with(&format!("{tag} ")) {
                let ok = is_tagged_ok(&line, &tag);
                lines.push(line);
                return Ok(Response {
                    lines,
                    literals,
                    ok,
                });
            }
            if let Some(size) = literal_size(&line) {
                let mut literal = vec![0u8; size];
                self.stream
                    .read_exact(&mut literal)
                    .map_err(|e| protocol(name, e.to_string()))?;
                literals.push(literal);
            }
            lines.push(line);
        }
    }
}

fn protocol(name: &str, reason: String) -> MailboxError {
    MailboxError::Protocol {
        name: name.to_string(),
        reason,
    }
}

/// Fetch every message received since the lookback cutoff (blocking; run in
/// `spawn_blocking`).
fn fetch_since(settings: &ImapSettings) -> Result<Vec<FetchedMessage>, MailboxError> {
    let name = settings.name.as_str();
    let mut conn = ImapConnection::open(settings)?;

    let login = conn.command(
        name,
        &format!(
            "LOGIN {} {}",
            quote(&settings.username),
            quote(settings.password.expose_secret())
        ),
    )?;
    if !login.ok {
        return Err(MailboxError::AuthFailed {
            name: name.to_string(),
            reason: login
                .lines
                .last()
                .map(|l| l.trim().to_string())
                .unwrap_or_default(),
        });
    }

    let cutoff = Utc::now().date_naive() - chrono::Duration::days(i64::from(settings.lookback_days));
    let mut messages = Vec::new();

    for folder in &settings.folders {
        let examine = conn.command(name, &format!("EXAMINE {}", quote(folder)))?;
        if !examine.ok {
            let err = MailboxError::FolderUnavailable {
                name: name.to_string(),
                folder: folder.clone(),
                reason: examine
                    .lines
                    .last()
                    .map(|l| l.trim().to_string())
                    .unwrap_or_default(),
            };
            warn!(error = %err, "Skipping folder");
            continue;
        }

        let search = conn.command(name, &format!("SEARCH SINCE {}", imap_date(cutoff)))?;
        if !search.ok {
            warn!(mailbox = %name, folder = %folder, "SEARCH failed, skipping folder");
            continue;
        }
        let ids = parse_search_response(&search.lines);
        debug!(mailbox = %name, folder = %folder, count = ids.len(), "Found messages");

        for id in ids {
            let fetch = conn.command(name, &format!("FETCH {id} BODY.PEEK[]"))?;
            if !fetch.ok {
                warn!(mailbox = %name, folder = %folder, id, "FETCH failed");
                continue;
            }
            for raw in &fetch.literals {
                match message_from_mime(raw, name, SOURCE) {
                    Some(msg) => messages.push(msg),
                    None => warn!(mailbox = %name, id, "Could not parse message"),
                }
            }
        }
    }

    if let Err(e) = conn.command(name, "LOGOUT") {
        debug!(mailbox = %name, error = %e, "LOGOUT failed");
    }

    info!(mailbox = %name, count = messages.len(), "Fetched IMAP messages");
    Ok(messages)
}
