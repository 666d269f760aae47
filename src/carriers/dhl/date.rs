//! DHL date strings (`"Tu, 22.04.2025"`).

use chrono::{Datelike, NaiveDate, Weekday};

/// Parse a DHL "estimated delivery" date.
///
/// The two-letter weekday prefix must agree with the date; any mismatch or
/// malformed input yields `None`.
pub fn parse_dhl_date(raw: &str) -> Option<NaiveDate> {
    let (weekday_part, date_part) = raw.split_once(',')?;
    let expected = match weekday_part.trim() {
        "Mo" => Weekday::Mon,
        "Tu" => Weekday::Tue,
        "We" => Weekday::Wed,
        "Th" => Weekday::Thu,
        "Fr" => Weekday::Fri,
        "Sa" => Weekday::Sat,
        "Su" => Weekday::Sun,
        _ => return None,
    };
    let date = NaiveDate::parse_from_str(date_part.trim(), "%d.%m.%Y").ok()?;
    (date.weekday() == expected).then_some(date)
}
