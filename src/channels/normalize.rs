//! Turning raw mail into plain, searchable text.

use chrono::{DateTime, Utc};
use mail_parser::MessageParser;

use crate::pipeline::types::FetchedMessage;

/// Strip HTML tags and decode the handful of entities that matter for
/// tracking numbers and addresses. `<style>`/`<script>` bodies are dropped.
pub fn strip_html(html: &str) -> String {
    let mut result = String::with_capacity(html.len());
    let mut in_tag = false;
    let mut skip_until: Option<&str> = None;
    let lower = html.to_ascii_lowercase();

    let mut idx = 0;
    while idx < html.len() {
        let rest = &lower[idx..];
        if let Some(end_tag) = skip_until {
            match rest.find(end_tag) {
                Some(pos) => {
                    idx += pos + end_tag.len();
                    skip_until = None;
                    continue;
                }
                None => break,
            }
        }
        if !in_tag && rest.starts_with("<style") {
            skip_until = Some("</style>");
            continue;
        }
        if !in_tag && rest.starts_with("<script") {
            skip_until = Some("</script>");
            continue;
        }

        let Some(ch) = html[idx..].chars().next() else {
            break;
        };
        match ch {
            '<' => {
                in_tag = true;
                result.push(' ');
            }
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
        idx += ch.len_utf8();
    }

    normalize_whitespace(&decode_entities(&result))
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Collapse every run of whitespace into a single space.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Sender address of a parsed message.
fn extract_sender(parsed: &mail_parser::Message) -> Option<String> {
    parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string())
}

/// Readable text of a parsed message: the plain-text body if any, else the
/// stripped HTML body.
fn extract_text(parsed: &mail_parser::Message) -> String {
    // HTML-only messages list the same part as both text and html body.
    let html_only = match (parsed.text_body.first(), parsed.html_body.first()) {
        (None, Some(_)) => true,
        (Some(text), Some(html)) => text == html,
        _ => false,
    };
    if html_only && let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    if let Some(text) = parsed.body_text(0) {
        return normalize_whitespace(text.as_ref());
    }
    String::new()
}

/// Parse an RFC 822 message into a [`FetchedMessage`].
pub fn message_from_mime(raw: &[u8], mailbox: &str, source: &str) -> Option<FetchedMessage> {
    let parsed = MessageParser::default().parse(raw)?;
    let received_at = parsed
        .date()
        .and_then(|d| DateTime::<Utc>::from_timestamp(d.to_timestamp(), 0));

    Some(FetchedMessage {
        body: extract_text(&parsed),
        subject: parsed.subject().map(|s| s.to_string()),
        sender: extract_sender(&parsed),
        received_at,
        message_id: parsed.message_id().map(|s| s.to_string()),
        source: source.to_string(),
        mailbox: mailbox.to_string(),
    })
}
