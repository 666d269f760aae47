//! CalDAV `calendar-query` client.

use std::sync::LazyLock;
use std::time::Duration;

use chrono::NaiveDate;
use regex::Regex;
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::config::CalendarSource;
use crate::error::CalendarError;

static CALENDAR_DATA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<(?:[A-Za-z0-9_-]+:)?calendar-data[^>]*>(.*?)</(?:[A-Za-z0-9_-]+:)?calendar-data>")
        .unwrap_or_else(|e| panic!("calendar-data pattern: {e}"))
});

/// Basic-auth credentials for the CalDAV server.
pub struct CalDavCredentials {
    pub username: String,
    pub password: SecretString,
}

/// Issues `REPORT` requests against CalDAV collections.
pub struct CalDavClient {
    client: reqwest::Client,
    credentials: Option<CalDavCredentials>,
    timeout: Duration,
}

impl CalDavClient {
    pub fn new(credentials: Option<CalDavCredentials>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            credentials,
            timeout,
        }
    }

    /// Fetch the iCalendar payloads of every event overlapping
    /// `[start, end)` in one collection.
    pub async fn query(
        &self,
        source: &CalendarSource,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<String>, CalendarError> {
        let request_failed = |reason: String| CalendarError::RequestFailed {
            source_name: source.name.clone(),
            reason,
        };

        let method = Method::from_bytes(b"REPORT").map_err(|e| request_failed(e.to_string()))?;
        let mut req = self
            .client
            .request(method, &source.url)
            .timeout(self.timeout)
            .header("Depth", "1")
            .header("Content-Type", "application/xml; charset=utf-8")
            .body(calendar_query_body(start, end));
        if let Some(creds) = &self.credentials {
            req = req.basic_auth(&creds.username, Some(creds.password.expose_secret()));
        }

        let resp = req.send().await.map_err(|e| request_failed(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(CalendarError::BadStatus {
                source_name: source.name.clone(),
                status: status.as_u16(),
            });
        }
        let body = resp.text().await.map_err(|e| CalendarError::Malformed {
            source_name: source.name.clone(),
            reason: e.to_string(),
        })?;

        let payloads = extract_calendar_data(&body);
        debug!(source = %source.name, events = payloads.len(), "CalDAV query returned");
        Ok(payloads)
    }
}

/// UTC timestamp at the start of `date` in CalDAV time-range form.
pub fn caldav_timestamp(date: NaiveDate) -> String {
    date.format("%Y%m%dT000000Z").to_string()
}

/// Body of a `calendar-query` REPORT for VEVENTs overlapping `[start, end)`.
pub fn calendar_query_body(start: NaiveDate, end: NaiveDate) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<C:calendar-query xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav">
  <D:prop>
    <C:calendar-data/>
  </D:prop>
  <C:filter>
    <C:comp-filter name="VCALENDAR">
      <C:comp-filter name="VEVENT">
        <C:time-range start="{}" end="{}"/>
      </C:comp-filter>
    </C:comp-filter>
  </C:filter>
</C:calendar-query>"#,
        caldav_timestamp(start),
        caldav_timestamp(end)
    )
}

/// Pull every `calendar-data` element out of a multistatus response.
pub fn extract_calendar_data(xml: &str) -> Vec<String> {
    CALENDAR_DATA
        .captures_iter(xml)
        .filter_map(|c| c.get(1))
        .map(|m| unescape_xml(m.as_str().trim()))
        .filter(|s| !s.is_empty())
        .collect()
}

fn unescape_xml(text: &str) -> String {
    if let Some(inner) = text
        .strip_prefix("<![CDATA[")
        .and_then(|t| t.strip_suffix("]]>"))
    {
        return inner.to_string();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#13;", "\r")
        .replace("&#xD;", "\r")
        .replace("&amp;", "&")
}
