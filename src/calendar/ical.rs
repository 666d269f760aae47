//! Just enough iCalendar parsing to read VEVENT dates and summaries.

use chrono::NaiveDate;

/// A calendar event reduced to whole days.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEvent {
    pub uid: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub start: NaiveDate,
    /// Last day the event touches (inclusive).
    pub end: NaiveDate,
}

/// Join folded continuation lines (RFC 5545 §3.1).
pub fn unfold(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in text.lines() {
        let raw = raw.trim_end_matches('\r');
        if let Some(cont) = raw.strip_prefix(' ').or_else(|| raw.strip_prefix('\t'))
            && let Some(last) = lines.last_mut()
        {
            last.push_str(cont);
            continue;
        }
        lines.push(raw.to_string());
    }
    lines
}

fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// A `DTSTART`/`DTEND` value: the calendar date and whether it was a bare
/// DATE (all-day) or a DATE-TIME at midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DateValue {
    date: NaiveDate,
    starts_day: bool,
}

fn parse_date_value(value: &str) -> Option<DateValue> {
    let value = value.trim();
    let date = NaiveDate::parse_from_str(value.get(..8)?, "%Y%m%d").ok()?;
    let starts_day = match value.get(8..) {
        None | Some("") => true,
        Some(rest) => rest.trim_end_matches('Z') == "T000000",
    };
    Some(DateValue { date, starts_day })
}

#[derive(Default)]
struct EventBuilder {
    uid: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    start: Option<DateValue>,
    end: Option<DateValue>,
}

impl EventBuilder {
    fn build(self) -> Option<CalendarEvent> {
        let start = self.start?.date;
        let end = match self.end {
            // DTEND is exclusive; an end at the start of a day means the
            // previous day was the last one touched.
            Some(end) if end.starts_day && end.date > start => end.date.pred_opt()?,
            Some(end) if end.date >= start => end.date,
            _ => start,
        };
        Some(CalendarEvent {
            uid: self.uid,
            summary: self.summary,
            description: self.description,
            start,
            end,
        })
    }
}

/// Parse every VEVENT in an iCalendar payload. Events without a usable
/// DTSTART are dropped.
pub fn parse_events(ics: &str) -> Vec<CalendarEvent> {
    let mut events = Vec::new();
    let mut current: Option<EventBuilder> = None;

    for line in unfold(ics) {
        if line.eq_ignore_ascii_case("BEGIN:VEVENT") {
            current = Some(EventBuilder::default());
            continue;
        }
        if line.eq_ignore_ascii_case("END:VEVENT") {
            if let Some(event) = current.take().and_then(EventBuilder::build) {
                events.push(event);
            }
            continue;
        }
        let Some(builder) = current.as_mut() else {
            continue;
        };
        let Some((head, value)) = line.split_once(':') else {
            continue;
        };
        let name = head.split(';').next().unwrap_or(head).to_ascii_uppercase();
        match name.as_str() {
            "UID" => builder.uid = Some(value.trim().to_string()),
            "SUMMARY" => builder.summary = Some(unescape_text(value)),
            "DESCRIPTION" => builder.description = Some(unescape_text(value)),
            "DTSTART" => builder.start = parse_date_value(value),
            "DTEND" => builder.end = parse_date_value(value),
            _ => {}
        }
    }

    events
}
