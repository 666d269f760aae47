//! Recipient-availability gate backed by CalDAV calendars.
//!
//! An absence is any event whose summary contains the configured keyword.
//! A parcel is rerouted only when such an event covers the delivery date:
//! nobody is home to receive it.

pub mod caldav;
pub mod ical;

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{debug, info};

use crate::config::{CalendarConfig, CalendarSource, secret_from_env};
use crate::error::{CalendarError, ConfigError};
use crate::pipeline::types::{AvailabilityGate, GateDecision};
use crate::shipment::{AbsenceWindow, AvailabilityVerdict};

pub use caldav::{CalDavClient, CalDavCredentials};
pub use ical::{CalendarEvent, parse_events};

/// [`AvailabilityGate`] that consults CalDAV collections.
pub struct CalDavGate {
    enabled: bool,
    sources: Vec<CalendarSource>,
    lookahead_days: u32,
    away_keyword: String,
    client: CalDavClient,
}

impl CalDavGate {
    /// A gate that never looks at a calendar and always proceeds.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            sources: Vec::new(),
            lookahead_days: 0,
            away_keyword: String::new(),
            client: CalDavClient::new(None, Duration::from_secs(1)),
        }
    }

    pub fn from_config(cfg: &CalendarConfig) -> Result<Self, ConfigError> {
        if !cfg.enabled {
            return Ok(Self::disabled());
        }
        if cfg.sources.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "calendar.sources".into(),
                message: "calendar is enabled but no sources are configured".into(),
            });
        }
        if cfg.away_keyword.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "calendar.away_keyword".into(),
                message: "must not be empty".into(),
            });
        }

        let credentials = match (&cfg.user_env, &cfg.pass_env) {
            (Some(user_env), Some(pass_env)) => Some(CalDavCredentials {
                username: std::env::var(user_env)
                    .ok()
                    .filter(|v| !v.trim().is_empty())
                    .ok_or_else(|| ConfigError::MissingEnvVar(user_env.clone()))?,
                password: secret_from_env(pass_env)?,
            }),
            (None, None) => None,
            _ => {
                return Err(ConfigError::InvalidValue {
                    key: "calendar.user_env".into(),
                    message: "user_env and pass_env must be set together".into(),
                });
            }
        };

        Ok(Self {
            enabled: true,
            sources: cfg.sources.clone(),
            lookahead_days: cfg.lookahead_days,
            away_keyword: cfg.away_keyword.trim().to_lowercase(),
            client: CalDavClient::new(credentials, Duration::from_secs(cfg.timeout_secs)),
        })
    }
}

/// Absence windows among `events`: those whose summary contains `keyword`
/// (case-insensitive).
pub fn absence_windows(
    events: Vec<CalendarEvent>,
    keyword: &str,
    source: &str,
) -> Vec<AbsenceWindow> {
    let keyword = keyword.to_lowercase();
    events
        .into_iter()
        .filter(|e| {
            e.summary
                .as_deref()
                .is_some_and(|s| s.to_lowercase().contains(&keyword))
        })
        .map(|e| AbsenceWindow {
            id: e.uid,
            summary: e.summary,
            start: e.start,
            end: e.end,
            notes: e.description,
            source: Some(source.to_string()),
        })
        .collect()
}

/// Parse an ISO `YYYY-MM-DD` delivery date.
pub fn parse_delivery_date(value: &str) -> Result<NaiveDate, CalendarError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|e| CalendarError::InvalidDate {
        value: value.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl AvailabilityGate for CalDavGate {
    async fn should_reroute(
        &self,
        tracking_number: &str,
        delivery_date: &str,
    ) -> Result<GateDecision, CalendarError> {
        if !self.enabled {
            debug!(tracking_number, "Calendar disabled, proceeding");
            return Ok(GateDecision::unconditional());
        }

        let date = parse_delivery_date(delivery_date)?;
        let end = date + chrono::Duration::days(i64::from(self.lookahead_days.max(1)));

        let mut windows = Vec::new();
        let mut sources_checked = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let payloads = self.client.query(source, date, end).await?;
            for ics in payloads {
                windows.extend(absence_windows(
                    parse_events(&ics),
                    &self.away_keyword,
                    &source.name,
                ));
            }
            sources_checked.push(source.name.clone());
        }

        let verdict = AvailabilityVerdict::from_windows(date, windows, sources_checked);
        info!(
            tracking_number,
            delivery_date = %date,
            is_away = verdict.is_away,
            absences = verdict.overlapping_absences.len(),
            "Checked recipient availability"
        );
        Ok(GateDecision {
            proceed: verdict.is_away,
            verdict: Some(verdict),
        })
    }
}
