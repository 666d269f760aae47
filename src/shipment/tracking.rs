//! Tracking snapshot: the result of one carrier query, plus the per-field
//! lookup type the carrier scripts fold into its protocol block.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// HTTP-style code recorded when the tracking page was read.
pub const STATUS_CODE_REACHED: u16 = 200;

/// HTTP-style code recorded when no parseable page could be reached.
pub const STATUS_CODE_UNREACHABLE: u16 = 503;

// ── Field lookups ───────────────────────────────────────────────────

/// A field that could not be read from the carrier page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMiss {
    /// Snapshot field name (e.g. `delivery_date`).
    pub field: &'static str,
    /// What went wrong.
    pub reason: String,
}

impl FieldMiss {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for FieldMiss {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// Value-or-absent-with-reason for a single page field.
pub type FieldLookup<T> = Result<T, FieldMiss>;

/// Everything a carrier script managed (or failed) to read off a reachable page.
#[derive(Debug, Clone)]
pub struct TrackingFields {
    pub status_text: FieldLookup<String>,
    pub delivery_date: FieldLookup<NaiveDate>,
    pub delivered: FieldLookup<bool>,
    pub delivery_options: FieldLookup<BTreeSet<String>>,
    pub history: FieldLookup<Vec<String>>,
    pub custom_dropoff_input_present: FieldLookup<bool>,
}

// ── Protocol block ──────────────────────────────────────────────────

/// Overall outcome of a tracking query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolStatus {
    Success,
    Error,
}

/// Structured record of per-field success/failure during a tracking query.
///
/// `status` is `error` only when no minimally-parseable page was reached.
/// Individual field misses are listed in `errors` without flipping it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolBlock {
    pub timestamp: DateTime<Utc>,
    pub status: ProtocolStatus,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ProtocolBlock {
    pub fn success() -> Self {
        Self {
            timestamp: Utc::now(),
            status: ProtocolStatus::Success,
            errors: Vec::new(),
        }
    }

    pub fn unreachable(reason: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            status: ProtocolStatus::Error,
            errors: vec![reason.into()],
        }
    }

    /// Append a field miss, keeping the overall status as-is.
    pub fn record_miss(&mut self, miss: &FieldMiss) {
        self.errors.push(miss.to_string());
    }
}

// ── Snapshot ────────────────────────────────────────────────────────

/// Shipment status as reported by the carrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingStatus {
    #[default]
    Unknown,
    InTransit,
    Delivered,
    Error,
}

impl std::fmt::Display for TrackingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::InTransit => "in_transit",
            Self::Delivered => "delivered",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Result of one carrier query.
///
/// Invariants: `delivered` implies `status == Delivered`, and `delivery_date`
/// is only ever set for delivered shipments. The carrier's announced date for
/// a shipment still underway lives in `expected_delivery_date`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingSnapshot {
    pub status: TrackingStatus,
    pub delivered: bool,
    pub delivery_date: Option<NaiveDate>,
    pub expected_delivery_date: Option<NaiveDate>,
    /// Raw status text as shown by the carrier.
    pub delivery_status: Option<String>,
    pub delivery_options: BTreeSet<String>,
    pub shipment_history: Vec<String>,
    pub custom_dropoff_input_present: bool,
    pub protocol: ProtocolBlock,
    pub last_checked: DateTime<Utc>,
    pub status_code: Option<u16>,
}

impl TrackingSnapshot {
    /// Snapshot for a page that could not be reached at all.
    pub fn unreachable(reason: impl Into<String>) -> Self {
        Self {
            status: TrackingStatus::Error,
            delivered: false,
            delivery_date: None,
            expected_delivery_date: None,
            delivery_status: None,
            delivery_options: BTreeSet::new(),
            shipment_history: Vec::new(),
            custom_dropoff_input_present: false,
            protocol: ProtocolBlock::unreachable(reason),
            last_checked: Utc::now(),
            status_code: Some(STATUS_CODE_UNREACHABLE),
        }
    }

    /// Fold per-field lookups from a reachable page into a snapshot.
    ///
    /// Misses leave the field at its default and land in the protocol block.
    pub fn assemble(fields: TrackingFields) -> Self {
        let mut protocol = ProtocolBlock::success();

        let delivery_status = take(fields.status_text, &mut protocol);
        let date = take(fields.delivery_date, &mut protocol);
        let delivered = take(fields.delivered, &mut protocol).unwrap_or(false);
        let delivery_options = take(fields.delivery_options, &mut protocol).unwrap_or_default();
        let shipment_history = take(fields.history, &mut protocol).unwrap_or_default();
        let custom_dropoff_input_present =
            take(fields.custom_dropoff_input_present, &mut protocol).unwrap_or(false);

        let status = if delivered {
            TrackingStatus::Delivered
        } else if delivery_status.is_some()
            || date.is_some()
            || !delivery_options.is_empty()
            || !shipment_history.is_empty()
        {
            TrackingStatus::InTransit
        } else {
            TrackingStatus::Unknown
        };

        let (delivery_date, expected_delivery_date) = if delivered {
            (date, None)
        } else {
            (None, date)
        };

        Self {
            status,
            delivered,
            delivery_date,
            expected_delivery_date,
            delivery_status,
            delivery_options,
            shipment_history,
            custom_dropoff_input_present,
            protocol,
            last_checked: Utc::now(),
            status_code: Some(STATUS_CODE_REACHED),
        }
    }

    /// Re-establish the delivered/date invariants on a snapshot of unknown
    /// provenance. Dates on undelivered shipments are dropped, not moved.
    pub fn normalized(mut self) -> Self {
        if self.delivered || self.status == TrackingStatus::Delivered {
            self.delivered = true;
            self.status = TrackingStatus::Delivered;
            self.expected_delivery_date = None;
        } else {
            self.delivery_date = None;
        }
        self
    }

    /// Whether the snapshot satisfies the delivered/date invariants.
    pub fn holds_invariants(&self) -> bool {
        let delivered_ok = !self.delivered || self.status == TrackingStatus::Delivered;
        let date_ok = self.delivery_date.is_none() || self.status == TrackingStatus::Delivered;
        delivered_ok && date_ok
    }

    /// The date the recipient should be available on: the carrier's estimate
    /// for a shipment still underway.
    pub fn target_date(&self) -> Option<NaiveDate> {
        if self.delivered {
            None
        } else {
            self.expected_delivery_date
        }
    }
}

fn take<T>(lookup: FieldLookup<T>, protocol: &mut ProtocolBlock) -> Option<T> {
    match lookup {
        Ok(value) => Some(value),
        Err(miss) => {
            protocol.record_miss(&miss);
            None
        }
    }
}
