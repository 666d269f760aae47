//! Shipment lifecycle record and its per-stage parts.
//!
//! One `ShipmentLifecycle` is created per tracking code per run. Each stage of
//! the workflow fills in exactly one of its optional parts.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::carriers::CarrierRegistry;
use crate::shipment::tracking::TrackingSnapshot;

/// Maximum number of characters kept from a notification body.
pub const NOTIFICATION_BODY_CAP: usize = 4096;

// ── Carrier identity ────────────────────────────────────────────────

/// Which carrier a tracking code belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarrierIdentity {
    pub name: String,
    pub tracking_number: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl CarrierIdentity {
    pub fn new(name: impl Into<String>, tracking_number: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tracking_number: tracking_number.into(),
            extra: BTreeMap::new(),
        }
    }

    /// Whether a handler is registered for this carrier.
    pub fn is_supported(&self, registry: &CarrierRegistry) -> bool {
        registry.contains(&self.name)
    }
}

// ── Notification ────────────────────────────────────────────────────

/// The message a tracking code was found in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationContext {
    pub subject: Option<String>,
    pub sender: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    pub message_id: Option<String>,
    /// Adapter the message came from (`imap`, `ms_graph`).
    pub source: Option<String>,
    pub body: String,
    pub body_truncated: bool,
}

impl NotificationContext {
    /// Capture a body, truncating it to [`NOTIFICATION_BODY_CAP`] characters.
    pub fn with_body(body: &str) -> Self {
        let (body, body_truncated) = cap_chars(body, NOTIFICATION_BODY_CAP);
        Self {
            body,
            body_truncated,
            ..Default::default()
        }
    }
}

fn cap_chars(text: &str, cap: usize) -> (String, bool) {
    match text.char_indices().nth(cap) {
        Some((byte_idx, _)) => (text[..byte_idx].to_string(), true),
        None => (text.to_string(), false),
    }
}

// ── Availability ────────────────────────────────────────────────────

/// A calendar entry marking the recipient as away.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbsenceWindow {
    pub id: Option<String>,
    pub summary: Option<String>,
    /// First day of the absence.
    pub start: NaiveDate,
    /// Last day of the absence (inclusive).
    pub end: NaiveDate,
    pub notes: Option<String>,
    pub source: Option<String>,
}

impl AbsenceWindow {
    /// Whether `date` falls in `[start, end]`.
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// Outcome of a recipient-availability check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityVerdict {
    pub delivery_date: NaiveDate,
    pub is_away: bool,
    pub overlapping_absences: Vec<AbsenceWindow>,
    pub sources_checked: Vec<String>,
}

impl AvailabilityVerdict {
    /// Build a verdict from candidate windows, keeping only those that cover
    /// the delivery date.
    pub fn from_windows(
        delivery_date: NaiveDate,
        windows: impl IntoIterator<Item = AbsenceWindow>,
        sources_checked: Vec<String>,
    ) -> Self {
        let overlapping_absences: Vec<_> = windows
            .into_iter()
            .filter(|w| w.covers(delivery_date))
            .collect();
        Self {
            delivery_date,
            is_away: !overlapping_absences.is_empty(),
            overlapping_absences,
            sources_checked,
        }
    }
}

// ── Intervention ────────────────────────────────────────────────────

/// Result of a redirection attempt.
///
/// `attempted == false` implies `success == false` and `error == None`; the
/// constructors are the only way this crate builds one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionOutcome {
    pub attempted: bool,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub status_code: Option<u16>,
    pub detail: Option<String>,
}

impl InterventionOutcome {
    pub fn not_attempted(detail: impl Into<String>) -> Self {
        Self {
            attempted: false,
            success: false,
            error: None,
            timestamp: None,
            attempts: 0,
            status_code: None,
            detail: Some(detail.into()),
        }
    }

    /// Outcome of a single redirection attempt.
    pub fn attempted(success: bool, detail: Option<String>) -> Self {
        Self {
            attempted: true,
            success,
            error: (!success).then(|| "carrier reported failure".to_string()),
            timestamp: Some(Utc::now()),
            attempts: 1,
            status_code: Some(if success { 200 } else { 500 }),
            detail,
        }
    }

    pub fn holds_invariants(&self) -> bool {
        self.attempted || (!self.success && self.error.is_none())
    }
}

// ── Workflow status ─────────────────────────────────────────────────

/// Lifecycle of a per-shipment record within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn can_transition_to(&self, target: WorkflowStatus) -> bool {
        use WorkflowStatus::*;

        matches!(
            (self, target),
            (Pending, InProgress) | (Pending, Failed) |
            (InProgress, Completed) | (InProgress, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

// ── Lifecycle ───────────────────────────────────────────────────────

/// Aggregate record for one shipment in one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentLifecycle {
    pub run_id: Uuid,
    pub provider: CarrierIdentity,
    pub notification: Option<NotificationContext>,
    pub tracking: Option<TrackingSnapshot>,
    pub recipient_availability: Option<AvailabilityVerdict>,
    pub intervention: Option<InterventionOutcome>,
    #[serde(default)]
    pub meta: BTreeMap<String, serde_json::Value>,
    pub workflow_status: WorkflowStatus,
    /// HTTP-style code for the final status.
    pub workflow_code: Option<u16>,
    pub updated_at: DateTime<Utc>,
}

impl ShipmentLifecycle {
    pub fn new(run_id: Uuid, provider: CarrierIdentity) -> Self {
        Self {
            run_id,
            provider,
            notification: None,
            tracking: None,
            recipient_availability: None,
            intervention: None,
            meta: BTreeMap::new(),
            workflow_status: WorkflowStatus::Pending,
            workflow_code: None,
            updated_at: Utc::now(),
        }
    }

    pub fn tracking_number(&self) -> &str {
        &self.provider.tracking_number
    }

    /// Move to `status` if the transition is allowed. Returns whether it moved.
    pub fn transition(&mut self, status: WorkflowStatus) -> bool {
        if !self.workflow_status.can_transition_to(status) {
            return false;
        }
        self.workflow_status = status;
        self.workflow_code = match status {
            WorkflowStatus::Completed => Some(200),
            WorkflowStatus::Failed => Some(500),
            _ => None,
        };
        self.touch();
        true
    }

    pub fn set_notification(&mut self, notification: NotificationContext) {
        self.notification = Some(notification);
        self.touch();
    }

    pub fn set_tracking(&mut self, snapshot: TrackingSnapshot) {
        self.tracking = Some(snapshot);
        self.touch();
    }

    pub fn set_availability(&mut self, verdict: AvailabilityVerdict) {
        self.recipient_availability = Some(verdict);
        self.touch();
    }

    pub fn set_intervention(&mut self, outcome: InterventionOutcome) {
        self.intervention = Some(outcome);
        self.touch();
    }

    pub fn set_meta(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.meta.insert(key.into(), value.into());
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn window(start: &str, end: &str) -> AbsenceWindow {
        AbsenceWindow {
            id: Some("evt-1".into()),
            summary: Some("Away".into()),
            start: date(start),
            end: date(end),
            notes: None,
            source: Some("home".into()),
        }
    }

    // ── Notification tests ──────────────────────────────────────────

    #[test]
    fn short_body_is_kept_whole() {
        let n = NotificationContext::with_body("Your parcel JJD000390018282329702");
        assert_eq!(n.body, "Your parcel JJD000390018282329702");
        assert!(!n.body_truncated);
    }

    #[test]
    fn long_body_is_truncated_on_char_boundary() {
        let body = "ü".repeat(NOTIFICATION_BODY_CAP + 10);
        let n = NotificationContext::with_body(&body);
        assert!(n.body_truncated);
        assert_eq!(n.body.chars().count(), NOTIFICATION_BODY_CAP);
    }

    #[test]
    fn body_at_cap_is_not_truncated() {
        let body = "a".repeat(NOTIFICATION_BODY_CAP);
        let n = NotificationContext::with_body(&body);
        assert!(!n.body_truncated);
        assert_eq!(n.body.len(), NOTIFICATION_BODY_CAP);
    }

    // ── Availability tests ──────────────────────────────────────────

    #[test]
    fn window_overlap_is_inclusive() {
        let w = window("2025-04-18", "2025-04-20");
        assert!(w.covers(date("2025-04-18")));
        assert!(w.covers(date("2025-04-20")));
        assert!(!w.covers(date("2025-04-21")));
        assert!(!w.covers(date("2025-04-17")));
    }

    #[test]
    fn verdict_keeps_only_overlapping_windows() {
        let verdict = AvailabilityVerdict::from_windows(
            date("2025-04-18"),
            vec![window("2025-04-17", "2025-04-19"), window("2025-05-01", "2025-05-03")],
            vec!["home".into()],
        );
        assert!(verdict.is_away);
        assert_eq!(verdict.overlapping_absences.len(), 1);
        assert_eq!(verdict.sources_checked, vec!["home".to_string()]);
    }

    #[test]
    fn verdict_without_windows_is_present() {
        let verdict = AvailabilityVerdict::from_windows(date("2025-04-22"), vec![], vec![]);
        assert!(!verdict.is_away);
    }

    // ── Intervention tests ──────────────────────────────────────────

    #[test]
    fn not_attempted_has_no_success_or_error() {
        let o = InterventionOutcome::not_attempted("no options");
        assert!(!o.success);
        assert!(o.error.is_none());
        assert_eq!(o.attempts, 0);
        assert!(o.holds_invariants());
    }

    #[test]
    fn attempted_outcome_codes() {
        let ok = InterventionOutcome::attempted(true, None);
        assert_eq!(ok.status_code, Some(200));
        assert!(ok.error.is_none());
        assert_eq!(ok.attempts, 1);

        let failed = InterventionOutcome::attempted(false, Some("highlight_only".into()));
        assert_eq!(failed.status_code, Some(500));
        assert!(failed.error.is_some());
        assert!(failed.holds_invariants());
    }

    // ── Lifecycle tests ─────────────────────────────────────────────

    #[test]
    fn workflow_transitions() {
        use WorkflowStatus::*;
        assert!(Pending.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
        assert!(InProgress.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Completed));
        assert!(Completed.is_terminal());
        assert!(!InProgress.is_terminal());
    }

    #[test]
    fn lifecycle_records_codes_on_finalize() {
        let mut rec = ShipmentLifecycle::new(
            Uuid::new_v4(),
            CarrierIdentity::new("DHL", "JJD000390018282329702"),
        );
        assert_eq!(rec.workflow_status, WorkflowStatus::Pending);
        assert!(rec.transition(WorkflowStatus::InProgress));
        assert!(rec.transition(WorkflowStatus::Completed));
        assert_eq!(rec.workflow_code, Some(200));
        assert!(!rec.transition(WorkflowStatus::Failed));
        assert_eq!(rec.workflow_status, WorkflowStatus::Completed);
    }

    #[test]
    fn lifecycle_serializes_nulls_for_unset_stages() {
        let rec = ShipmentLifecycle::new(Uuid::new_v4(), CarrierIdentity::new("DHL", "X1"));
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["workflow_status"], "pending");
        assert_eq!(json["provider"]["name"], "DHL");
        assert!(json["tracking"].is_null());
        assert!(json["intervention"].is_null());
        assert!(json["provider"].get("extra").is_none());
    }
}
