//! Shared types for the shipment workflow.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CalendarError, MailboxError};
use crate::shipment::{AvailabilityVerdict, ShipmentLifecycle};

// ── Inbound messages ────────────────────────────────────────────────

/// A message body plus where it came from.
///
/// Mailbox adapters convert their native format into this struct.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchedMessage {
    /// Normalized plain-text body.
    pub body: String,
    pub subject: Option<String>,
    pub sender: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    pub message_id: Option<String>,
    /// Adapter kind: "imap" or "ms_graph".
    pub source: String,
    /// Configured mailbox name.
    pub mailbox: String,
}

impl FetchedMessage {
    /// A bare body with no provenance.
    pub fn from_body(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }
}

/// A tracking code and the carrier whose pattern produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackingCode {
    pub code: String,
    pub carrier: String,
}

// ── Adapters ────────────────────────────────────────────────────────

/// A configured mailbox the workflow reads notifications from.
#[async_trait]
pub trait MailboxAdapter: Send + Sync {
    /// Configured mailbox name.
    fn name(&self) -> &str;

    /// Adapter kind tag ("imap", "ms_graph").
    fn source(&self) -> &'static str;

    /// Fetch messages within the lookback window, newest first.
    async fn fetch_messages(&self) -> Result<Vec<FetchedMessage>, MailboxError>;
}

/// Gate answer: whether to proceed, plus the verdict it was based on.
#[derive(Debug, Clone, PartialEq)]
pub struct GateDecision {
    pub proceed: bool,
    /// Absent when no calendar was consulted.
    pub verdict: Option<AvailabilityVerdict>,
}

impl GateDecision {
    /// Proceed without having looked at any calendar.
    pub fn unconditional() -> Self {
        Self {
            proceed: true,
            verdict: None,
        }
    }
}

/// Recipient-availability predicate.
#[async_trait]
pub trait AvailabilityGate: Send + Sync {
    /// Decide whether to redirect `tracking_number`, delivered on the ISO date
    /// `delivery_date`. Any error means "do not reroute".
    async fn should_reroute(
        &self,
        tracking_number: &str,
        delivery_date: &str,
    ) -> Result<GateDecision, CalendarError>;
}

// ── Per-code state machine ──────────────────────────────────────────

/// Stage a tracking code has reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeState {
    Extracted,
    Identified,
    Tracked,
    Gated,
    Acted,
    Completed,
    Skipped,
}

impl std::fmt::Display for CodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Extracted => "extracted",
            Self::Identified => "identified",
            Self::Tracked => "tracked",
            Self::Gated => "gated",
            Self::Acted => "acted",
            Self::Completed => "completed",
            Self::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

/// Why a code left the pipeline early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No handler registered for the carrier.
    UnsupportedCarrier,
    AlreadyDelivered,
    /// Carrier gave no usable estimated delivery date.
    NoDeliveryDate,
    GateDeclined,
    GateFailed,
    GateTimedOut,
    NoRerouteOptions,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnsupportedCarrier => "unsupported_carrier",
            Self::AlreadyDelivered => "already_delivered",
            Self::NoDeliveryDate => "no_delivery_date",
            Self::GateDeclined => "gate_declined",
            Self::GateFailed => "gate_failed",
            Self::GateTimedOut => "gate_timed_out",
            Self::NoRerouteOptions => "no_reroute_options",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How processing of one code ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ShipmentOutcome {
    Completed,
    /// `at` is the stage whose check stopped the code.
    Skipped { at: CodeState, reason: SkipReason },
    /// A fault inside the pipeline itself; `at` is the last stage reached.
    Failed { at: CodeState, reason: String },
}

/// The lifecycle record for one code plus how it ended.
#[derive(Debug, Clone)]
pub struct ProcessedShipment {
    pub lifecycle: ShipmentLifecycle,
    pub outcome: ShipmentOutcome,
}

impl ProcessedShipment {
    /// Final state in the per-code state machine.
    pub fn state(&self) -> CodeState {
        match self.outcome {
            ShipmentOutcome::Completed => CodeState::Completed,
            ShipmentOutcome::Skipped { .. } => CodeState::Skipped,
            ShipmentOutcome::Failed { at, .. } => at,
        }
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self.outcome {
            ShipmentOutcome::Skipped { reason, .. } => Some(reason),
            _ => None,
        }
    }

    /// Whether a redirection was attempted.
    pub fn acted(&self) -> bool {
        self.lifecycle
            .intervention
            .as_ref()
            .is_some_and(|i| i.attempted)
    }
}

// ── Run report ──────────────────────────────────────────────────────

/// Everything produced by one run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub shipments: Vec<ProcessedShipment>,
    /// Mailboxes whose fetch failed outright.
    pub mailbox_failures: usize,
    pub messages_scanned: usize,
}

/// End-of-run counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub processed: usize,
    pub skipped: usize,
    pub acted: usize,
    pub failed: usize,
}

impl RunReport {
    pub fn summary(&self) -> RunSummary {
        let mut s = RunSummary {
            processed: self.shipments.len(),
            ..Default::default()
        };
        for shipment in &self.shipments {
            match shipment.outcome {
                ShipmentOutcome::Skipped { .. } => s.skipped += 1,
                ShipmentOutcome::Failed { .. } => s.failed += 1,
                ShipmentOutcome::Completed => {}
            }
            if shipment.acted() {
                s.acted += 1;
            }
        }
        s
    }
}
