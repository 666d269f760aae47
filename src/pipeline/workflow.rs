//! Workflow orchestrator: mailboxes → codes → carrier → gate → redirection.
//!
//! Each code walks `EXTRACTED → IDENTIFIED → TRACKED → GATED → ACTED →
//! COMPLETED`, or stops early as skipped. Everything runs sequentially on the
//! caller's task. A panic while processing one code finalizes that record as
//! failed; the rest of the batch continues.

use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::carriers::{CarrierRegistry, RerouteRequest, TrackingQuery};
use crate::config::RunSettings;
use crate::error::ConfigError;
use crate::logging::debug_log_model;
use crate::pipeline::extractor::TrackingExtractor;
use crate::pipeline::types::{
    AvailabilityGate, CodeState, FetchedMessage, MailboxAdapter, ProcessedShipment, RunReport,
    ShipmentOutcome, SkipReason, TrackingCode,
};
use crate::shipment::{
    CarrierIdentity, InterventionOutcome, NotificationContext, ShipmentLifecycle, WorkflowStatus,
};

/// Why a code stopped before `ACTED`.
#[derive(Debug, Clone, Copy)]
struct Halt {
    at: CodeState,
    reason: SkipReason,
}

impl Halt {
    fn new(at: CodeState, reason: SkipReason) -> Self {
        Self { at, reason }
    }
}

/// One run of the shipment workflow.
pub struct Workflow {
    run_id: Uuid,
    settings: RunSettings,
    extractor: TrackingExtractor,
    registry: Arc<CarrierRegistry>,
    gate: Arc<dyn AvailabilityGate>,
}

impl Workflow {
    pub fn new(
        settings: RunSettings,
        registry: Arc<CarrierRegistry>,
        gate: Arc<dyn AvailabilityGate>,
    ) -> Result<Self, ConfigError> {
        let extractor = TrackingExtractor::new(&settings.tracking_patterns)?;
        Ok(Self {
            run_id: Uuid::new_v4(),
            settings,
            extractor,
            registry,
            gate,
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Fetch every mailbox, then process the collected messages.
    ///
    /// A mailbox that fails contributes zero messages.
    pub async fn run(&self, mailboxes: &[Arc<dyn MailboxAdapter>]) -> RunReport {
        info!(run_id = %self.run_id, mailboxes = mailboxes.len(), "Starting run");

        let mut messages = Vec::new();
        let mut mailbox_failures = 0;
        for mailbox in mailboxes {
            match mailbox.fetch_messages().await {
                Ok(batch) => {
                    info!(
                        mailbox = %mailbox.name(),
                        source = mailbox.source(),
                        count = batch.len(),
                        "Fetched messages"
                    );
                    messages.extend(batch);
                }
                Err(e) => {
                    warn!(mailbox = %mailbox.name(), error = %e, "Mailbox fetch failed, continuing");
                    mailbox_failures += 1;
                }
            }
        }

        let mut report = self.process_messages(messages).await;
        report.mailbox_failures = mailbox_failures;

        let summary = report.summary();
        info!(
            run_id = %self.run_id,
            messages = report.messages_scanned,
            processed = summary.processed,
            skipped = summary.skipped,
            acted = summary.acted,
            failed = summary.failed,
            mailbox_failures,
            "Run finished"
        );
        report
    }

    /// Extract codes from every message and process each code once.
    pub async fn process_messages(&self, messages: Vec<FetchedMessage>) -> RunReport {
        let messages_scanned = messages.len();
        let mut seen: HashSet<String> = HashSet::new();
        let mut shipments = Vec::new();

        for message in &messages {
            for (code, carrier) in self.extractor.extract(&message.body) {
                if !seen.insert(code.clone()) {
                    debug!(tracking_number = %code, "Already processed in this run");
                    continue;
                }
                shipments.push(self.process_code(TrackingCode { code, carrier }, message).await);
            }
        }

        RunReport {
            shipments,
            mailbox_failures: 0,
            messages_scanned,
        }
    }

    /// Run one code through every stage and finalize its record.
    pub async fn process_code(
        &self,
        code: TrackingCode,
        message: &FetchedMessage,
    ) -> ProcessedShipment {
        let span = info_span!(
            "shipment",
            run_id = %self.run_id,
            tracking_number = %code.code,
            carrier = %code.carrier,
        );
        self.process_code_inner(code, message).instrument(span).await
    }

    async fn process_code_inner(
        &self,
        code: TrackingCode,
        message: &FetchedMessage,
    ) -> ProcessedShipment {
        let mut lifecycle = ShipmentLifecycle::new(
            self.run_id,
            CarrierIdentity::new(&code.carrier, &code.code),
        );
        lifecycle.set_notification(notification_from(message));
        lifecycle.transition(WorkflowStatus::InProgress);
        debug_log_model(&lifecycle, "extracted");

        let mut state = CodeState::Extracted;
        let result = AssertUnwindSafe(self.advance(&code, &mut lifecycle, &mut state))
            .catch_unwind()
            .await;

        let outcome = match result {
            Ok(Ok(())) => {
                lifecycle.transition(WorkflowStatus::Completed);
                info!("Shipment completed");
                ShipmentOutcome::Completed
            }
            Ok(Err(halt)) => {
                lifecycle.set_meta("skip_reason", halt.reason.as_str());
                lifecycle.set_meta("halted_at", halt.at.to_string());
                lifecycle.transition(WorkflowStatus::Completed);
                info!(at = %halt.at, reason = %halt.reason, "Shipment skipped");
                ShipmentOutcome::Skipped {
                    at: halt.at,
                    reason: halt.reason,
                }
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!(at = %state, error = %reason, "Unexpected fault while processing shipment");
                lifecycle.set_meta("error", reason.clone());
                lifecycle.transition(WorkflowStatus::Failed);
                ShipmentOutcome::Failed { at: state, reason }
            }
        };

        debug_log_model(&lifecycle, "final");
        ProcessedShipment { lifecycle, outcome }
    }

    async fn advance(
        &self,
        code: &TrackingCode,
        lifecycle: &mut ShipmentLifecycle,
        state: &mut CodeState,
    ) -> Result<(), Halt> {
        // EXTRACTED → IDENTIFIED
        let Some(handler) = self.registry.resolve(&code.carrier) else {
            info!("No handler registered for carrier");
            return Err(Halt::new(CodeState::Identified, SkipReason::UnsupportedCarrier));
        };
        let Some(carrier) = self.settings.carrier(&code.carrier) else {
            warn!("Carrier has a handler but no settings");
            return Err(Halt::new(CodeState::Identified, SkipReason::UnsupportedCarrier));
        };
        *state = CodeState::Identified;
        debug!(handler = handler.name(), "Carrier identified");

        // IDENTIFIED → TRACKED
        let query = TrackingQuery {
            tracking_number: code.code.clone(),
            zip_code: carrier.zip_code.clone(),
            timeout: carrier.timeout,
            headless: carrier.headless,
        };
        let snapshot = handler.check_reroute_availability(&query).await.normalized();
        if !snapshot.protocol.errors.is_empty() {
            warn!(
                status = %snapshot.status,
                errors = ?snapshot.protocol.errors,
                "Tracking page reported problems"
            );
        }
        let delivered = snapshot.delivered;
        let target_date = snapshot.target_date();
        let has_options = !snapshot.delivery_options.is_empty();
        lifecycle.set_tracking(snapshot);
        *state = CodeState::Tracked;
        debug_log_model(lifecycle, "tracked");

        if delivered {
            return Err(Halt::new(CodeState::Tracked, SkipReason::AlreadyDelivered));
        }
        let Some(date) = target_date else {
            return Err(Halt::new(CodeState::Tracked, SkipReason::NoDeliveryDate));
        };

        // TRACKED → GATED
        let iso_date = date.to_string();
        let gate_call =
            AssertUnwindSafe(self.gate.should_reroute(&code.code, &iso_date)).catch_unwind();
        let decision = match tokio::time::timeout(self.settings.gate_timeout, gate_call).await {
            Ok(Ok(Ok(decision))) => decision,
            Ok(Ok(Err(e))) => {
                warn!(error = %e, "Availability check failed, not rerouting");
                return Err(Halt::new(CodeState::Gated, SkipReason::GateFailed));
            }
            Ok(Err(panic)) => {
                warn!(
                    error = %panic_message(panic.as_ref()),
                    "Availability check panicked, not rerouting"
                );
                return Err(Halt::new(CodeState::Gated, SkipReason::GateFailed));
            }
            Err(_) => {
                warn!(
                    timeout = ?self.settings.gate_timeout,
                    "Availability check timed out, not rerouting"
                );
                return Err(Halt::new(CodeState::Gated, SkipReason::GateTimedOut));
            }
        };
        if let Some(verdict) = decision.verdict {
            lifecycle.set_availability(verdict);
        }
        if !decision.proceed {
            return Err(Halt::new(CodeState::Gated, SkipReason::GateDeclined));
        }
        *state = CodeState::Gated;
        debug_log_model(lifecycle, "gated");

        // GATED → ACTED
        if !has_options {
            lifecycle.set_intervention(InterventionOutcome::not_attempted(
                "carrier offers no redirection options",
            ));
            return Err(Halt::new(CodeState::Acted, SkipReason::NoRerouteOptions));
        }
        let request = RerouteRequest {
            tracking_number: code.code.clone(),
            zip_code: carrier.zip_code.clone(),
            custom_location: carrier.custom_location.clone(),
            highlight_only: carrier.highlight_only,
            headless: carrier.headless,
            timeout: carrier.timeout,
        };
        let success = handler.reroute_shipment(&request).await;
        let detail = carrier
            .highlight_only
            .then(|| "highlight_only: confirmation not submitted".to_string());
        lifecycle.set_intervention(InterventionOutcome::attempted(success, detail));
        *state = CodeState::Acted;
        debug_log_model(lifecycle, "acted");

        if success {
            info!(highlight_only = carrier.highlight_only, "Redirection sequence finished");
        } else {
            warn!("Carrier redirection failed");
        }
        Ok(())
    }
}

fn notification_from(message: &FetchedMessage) -> NotificationContext {
    NotificationContext {
        subject: message.subject.clone(),
        sender: message.sender.clone(),
        received_at: message.received_at,
        message_id: message.message_id.clone(),
        source: (!message.source.is_empty()).then(|| message.source.clone()),
        ..NotificationContext::with_body(&message.body)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
