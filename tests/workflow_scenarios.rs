//! End-to-end workflow scenarios with in-memory mailboxes, carriers and gates.
//!
//! No browser, mailbox server or calendar is contacted; every collaborator is
//! a fake that records what the workflow asked of it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use parcel_rerouter::carriers::{CarrierHandler, CarrierRegistry, RerouteRequest, TrackingQuery};
use parcel_rerouter::config::{AppConfig, CliOverrides, RunSettings};
use parcel_rerouter::error::{CalendarError, MailboxError};
use parcel_rerouter::pipeline::{
    AvailabilityGate, CodeState, FetchedMessage, GateDecision, MailboxAdapter, ShipmentOutcome,
    SkipReason, Workflow,
};
use parcel_rerouter::shipment::{
    AvailabilityVerdict, TrackingFields, TrackingSnapshot, WorkflowStatus,
};

const CODE_A: &str = "JJD000390018282329702";
const CODE_B: &str = "JJD000390018282329703";

const CONFIG: &str = r#"
lookback_days: 7
gate_timeout_secs: 1
tracking_patterns:
  DHL:
    - '\b(JJD\d{18})\b'
  UPS:
    - '\b(1Z[0-9A-Z]{16})\b'
carriers:
  base:
    zip_code: "10115"
    custom_location: "Garage"
    highlight_only: false
    timeout_secs: 5
"#;

// ── Fakes ───────────────────────────────────────────────────────────

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn in_transit(delivery: &str, options: &[&str]) -> TrackingSnapshot {
    TrackingSnapshot::assemble(TrackingFields {
        status_text: Ok("The shipment is on its way".into()),
        delivery_date: Ok(date(delivery)),
        delivered: Ok(false),
        delivery_options: Ok(options.iter().map(|s| s.to_string()).collect()),
        history: Ok(vec!["Shipment picked up".into()]),
        custom_dropoff_input_present: Ok(false),
    })
}

fn delivered() -> TrackingSnapshot {
    TrackingSnapshot::assemble(TrackingFields {
        status_text: Ok("The shipment has been delivered".into()),
        delivery_date: Ok(date("2025-04-17")),
        delivered: Ok(true),
        delivery_options: Ok(Default::default()),
        history: Ok(vec![]),
        custom_dropoff_input_present: Ok(false),
    })
}

/// Carrier that serves a fixed snapshot and records every call.
struct FakeCarrier {
    name: String,
    snapshot: TrackingSnapshot,
    reroute_result: bool,
    tracked: Mutex<Vec<TrackingQuery>>,
    rerouted: Mutex<Vec<RerouteRequest>>,
}

impl FakeCarrier {
    fn new(name: &str, snapshot: TrackingSnapshot) -> Arc<Self> {
        Self::with_result(name, snapshot, true)
    }

    fn with_result(name: &str, snapshot: TrackingSnapshot, reroute_result: bool) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            snapshot,
            reroute_result,
            tracked: Mutex::new(Vec::new()),
            rerouted: Mutex::new(Vec::new()),
        })
    }

    fn track_calls(&self) -> usize {
        self.tracked.lock().unwrap().len()
    }

    fn reroute_requests(&self) -> Vec<RerouteRequest> {
        self.rerouted.lock().unwrap().clone()
    }
}

#[async_trait]
impl CarrierHandler for FakeCarrier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check_reroute_availability(&self, query: &TrackingQuery) -> TrackingSnapshot {
        self.tracked.lock().unwrap().push(query.clone());
        self.snapshot.clone()
    }

    async fn reroute_shipment(&self, request: &RerouteRequest) -> bool {
        self.rerouted.lock().unwrap().push(request.clone());
        self.reroute_result
    }
}

/// Carrier whose tracking call panics for one specific code.
struct PanickyCarrier {
    poison: String,
    inner: Arc<FakeCarrier>,
}

#[async_trait]
impl CarrierHandler for PanickyCarrier {
    fn name(&self) -> &str {
        "DHL"
    }

    async fn check_reroute_availability(&self, query: &TrackingQuery) -> TrackingSnapshot {
        if query.tracking_number == self.poison {
            panic!("page script exploded");
        }
        self.inner.check_reroute_availability(query).await
    }

    async fn reroute_shipment(&self, request: &RerouteRequest) -> bool {
        self.inner.reroute_shipment(request).await
    }
}

enum GateMode {
    Away,
    Home,
    Fail,
    Hang,
    Panic,
}

struct FakeGate {
    mode: GateMode,
    calls: Mutex<Vec<(String, String)>>,
}

impl FakeGate {
    fn new(mode: GateMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AvailabilityGate for FakeGate {
    async fn should_reroute(
        &self,
        tracking_number: &str,
        delivery_date: &str,
    ) -> Result<GateDecision, CalendarError> {
        self.calls
            .lock()
            .unwrap()
            .push((tracking_number.to_string(), delivery_date.to_string()));
        let day = date(delivery_date);
        match self.mode {
            GateMode::Away => Ok(GateDecision {
                proceed: true,
                verdict: Some(AvailabilityVerdict {
                    delivery_date: day,
                    is_away: true,
                    overlapping_absences: vec![],
                    sources_checked: vec!["family".into()],
                }),
            }),
            GateMode::Home => Ok(GateDecision {
                proceed: false,
                verdict: Some(AvailabilityVerdict::from_windows(
                    day,
                    vec![],
                    vec!["family".into()],
                )),
            }),
            GateMode::Fail => Err(CalendarError::BadStatus {
                source_name: "family".into(),
                status: 500,
            }),
            GateMode::Hang => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(GateDecision::unconditional())
            }
            GateMode::Panic => panic!("calendar parser blew up"),
        }
    }
}

struct FakeMailbox {
    name: &'static str,
    messages: Option<Vec<FetchedMessage>>,
    fetches: AtomicUsize,
}

impl FakeMailbox {
    fn with(name: &'static str, bodies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            name,
            messages: Some(
                bodies
                    .iter()
                    .map(|b| FetchedMessage {
                        body: b.to_string(),
                        subject: Some("Your parcel".into()),
                        source: "imap".into(),
                        mailbox: name.into(),
                        ..Default::default()
                    })
                    .collect(),
            ),
            fetches: AtomicUsize::new(0),
        })
    }

    fn broken(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            messages: None,
            fetches: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl MailboxAdapter for FakeMailbox {
    fn name(&self) -> &str {
        self.name
    }

    fn source(&self) -> &'static str {
        "imap"
    }

    async fn fetch_messages(&self) -> Result<Vec<FetchedMessage>, MailboxError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.messages
            .clone()
            .ok_or_else(|| MailboxError::ConnectFailed {
                name: self.name.to_string(),
                reason: "connection refused".into(),
            })
    }
}

// ── Harness ─────────────────────────────────────────────────────────

fn settings(cli: CliOverrides) -> RunSettings {
    let cfg = AppConfig::from_yaml(CONFIG).unwrap();
    RunSettings::resolve(&cfg, &cli, &["DHL".to_string()]).unwrap()
}

fn workflow(
    carrier: Arc<dyn CarrierHandler>,
    gate: Arc<dyn AvailabilityGate>,
    cli: CliOverrides,
) -> Workflow {
    let registry = Arc::new(CarrierRegistry::new().with(carrier));
    Workflow::new(settings(cli), registry, gate).unwrap()
}

fn body(code: &str) -> String {
    format!("Hello! Your DHL parcel {code} is on its way.")
}

// ── Scenarios ───────────────────────────────────────────────────────

#[tokio::test]
async fn redirects_when_recipient_is_away() {
    let carrier = FakeCarrier::new("DHL", in_transit("2025-04-22", &["PREFERRED_LOCATION"]));
    let gate = FakeGate::new(GateMode::Away);
    let wf = workflow(carrier.clone(), gate.clone(), CliOverrides::default());

    let mailboxes: Vec<Arc<dyn MailboxAdapter>> =
        vec![FakeMailbox::with("home", &[body(CODE_A).as_str()])];
    let report = wf.run(&mailboxes).await;

    assert_eq!(report.shipments.len(), 1);
    let shipment = &report.shipments[0];
    assert_eq!(shipment.outcome, ShipmentOutcome::Completed);
    assert_eq!(shipment.state(), CodeState::Completed);

    let lc = &shipment.lifecycle;
    assert_eq!(lc.tracking_number(), CODE_A);
    assert_eq!(lc.provider.name, "DHL");
    assert_eq!(lc.workflow_status, WorkflowStatus::Completed);
    assert_eq!(lc.workflow_code, Some(200));
    assert_eq!(lc.run_id, wf.run_id());
    assert!(lc.recipient_availability.as_ref().unwrap().is_away);

    let intervention = lc.intervention.as_ref().unwrap();
    assert!(intervention.attempted);
    assert!(intervention.success);
    assert!(intervention.detail.is_none());

    assert_eq!(
        gate.calls(),
        vec![(CODE_A.to_string(), "2025-04-22".to_string())]
    );
    let requests = carrier.reroute_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].zip_code, "10115");
    assert_eq!(requests[0].custom_location, "Garage");
    assert!(!requests[0].highlight_only);
}

#[tokio::test]
async fn delivered_shipment_skips_before_gate() {
    let carrier = FakeCarrier::new("DHL", delivered());
    let gate = FakeGate::new(GateMode::Away);
    let wf = workflow(carrier.clone(), gate.clone(), CliOverrides::default());

    let report = wf.process_messages(vec![FetchedMessage::from_body(body(CODE_A))]).await;

    let shipment = &report.shipments[0];
    assert_eq!(
        shipment.outcome,
        ShipmentOutcome::Skipped {
            at: CodeState::Tracked,
            reason: SkipReason::AlreadyDelivered
        }
    );
    assert!(gate.calls().is_empty());
    assert!(carrier.reroute_requests().is_empty());

    let lc = &shipment.lifecycle;
    let tracking = lc.tracking.as_ref().unwrap();
    assert!(tracking.delivered);
    assert!(tracking.holds_invariants());
    assert_eq!(lc.workflow_status, WorkflowStatus::Completed);
    assert_eq!(lc.meta["skip_reason"], "already_delivered");
}

#[tokio::test]
async fn recipient_at_home_is_not_rerouted() {
    let carrier = FakeCarrier::new("DHL", in_transit("2025-04-18", &["PREFERRED_LOCATION"]));
    let gate = FakeGate::new(GateMode::Home);
    let wf = workflow(carrier.clone(), gate.clone(), CliOverrides::default());

    let report = wf.process_messages(vec![FetchedMessage::from_body(body(CODE_A))]).await;

    let shipment = &report.shipments[0];
    assert_eq!(shipment.skip_reason(), Some(SkipReason::GateDeclined));
    assert!(shipment.lifecycle.intervention.is_none());
    assert!(!shipment.lifecycle.recipient_availability.as_ref().unwrap().is_away);
    assert_eq!(gate.calls()[0].1, "2025-04-18");
    assert!(carrier.reroute_requests().is_empty());
}

#[tokio::test]
async fn unregistered_carrier_is_skipped_without_handler_call() {
    let carrier = FakeCarrier::new("DHL", in_transit("2025-04-22", &["PREFERRED_LOCATION"]));
    let gate = FakeGate::new(GateMode::Away);
    let wf = workflow(carrier.clone(), gate.clone(), CliOverrides::default());

    let report = wf
        .process_messages(vec![FetchedMessage::from_body("UPS 1Z999AA10123456784 shipped")])
        .await;

    assert_eq!(report.shipments.len(), 1);
    let shipment = &report.shipments[0];
    assert_eq!(
        shipment.outcome,
        ShipmentOutcome::Skipped {
            at: CodeState::Identified,
            reason: SkipReason::UnsupportedCarrier
        }
    );
    assert_eq!(shipment.lifecycle.provider.name, "UPS");
    assert!(shipment.lifecycle.tracking.is_none());
    assert_eq!(carrier.track_calls(), 0);
    assert!(gate.calls().is_empty());
}

#[tokio::test]
async fn dry_run_marks_outcome_as_highlight_only() {
    let carrier = FakeCarrier::new("DHL", in_transit("2025-04-22", &["PREFERRED_LOCATION"]));
    let gate = FakeGate::new(GateMode::Away);
    let cli = CliOverrides {
        dry_run: Some(true),
        ..Default::default()
    };
    let wf = workflow(carrier.clone(), gate, cli);

    let report = wf.process_messages(vec![FetchedMessage::from_body(body(CODE_A))]).await;

    let requests = carrier.reroute_requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].highlight_only);

    let intervention = report.shipments[0].lifecycle.intervention.as_ref().unwrap();
    assert!(intervention.attempted);
    assert!(intervention.success);
    assert!(intervention.detail.as_deref().unwrap().contains("highlight_only"));
}

// ── Properties ──────────────────────────────────────────────────────

#[tokio::test]
async fn duplicate_codes_are_processed_once() {
    let carrier = FakeCarrier::new("DHL", in_transit("2025-04-22", &["PREFERRED_LOCATION"]));
    let gate = FakeGate::new(GateMode::Away);
    let wf = workflow(carrier.clone(), gate, CliOverrides::default());

    let first = format!("{} and again {}", body(CODE_A), CODE_A);
    let second = format!("{} plus {}", body(CODE_A), CODE_B);
    let mailboxes: Vec<Arc<dyn MailboxAdapter>> = vec![
        FakeMailbox::with("home", &[first.as_str()]),
        FakeMailbox::with("work", &[second.as_str()]),
    ];
    let report = wf.run(&mailboxes).await;

    assert_eq!(report.messages_scanned, 2);
    let codes: Vec<&str> = report
        .shipments
        .iter()
        .map(|s| s.lifecycle.tracking_number())
        .collect();
    assert_eq!(codes, vec![CODE_A, CODE_B]);
    assert_eq!(carrier.track_calls(), 2);
}

#[tokio::test]
async fn gate_error_means_no_reroute() {
    let carrier = FakeCarrier::new("DHL", in_transit("2025-04-22", &["PREFERRED_LOCATION"]));
    let wf = workflow(carrier.clone(), FakeGate::new(GateMode::Fail), CliOverrides::default());

    let report = wf.process_messages(vec![FetchedMessage::from_body(body(CODE_A))]).await;

    let shipment = &report.shipments[0];
    assert_eq!(shipment.skip_reason(), Some(SkipReason::GateFailed));
    assert!(shipment.lifecycle.intervention.is_none());
    assert!(shipment.lifecycle.recipient_availability.is_none());
    assert!(carrier.reroute_requests().is_empty());
}

#[tokio::test]
async fn panicking_gate_is_a_skip() {
    let carrier = FakeCarrier::new("DHL", in_transit("2025-04-22", &["PREFERRED_LOCATION"]));
    let wf = workflow(carrier.clone(), FakeGate::new(GateMode::Panic), CliOverrides::default());

    let report = wf.process_messages(vec![FetchedMessage::from_body(body(CODE_A))]).await;

    let shipment = &report.shipments[0];
    assert_eq!(
        shipment.outcome,
        ShipmentOutcome::Skipped {
            at: CodeState::Gated,
            reason: SkipReason::GateFailed,
        }
    );
    assert_eq!(shipment.lifecycle.workflow_status, WorkflowStatus::Completed);
    assert!(shipment.lifecycle.intervention.is_none());
    assert!(carrier.reroute_requests().is_empty());
}

#[tokio::test]
async fn hung_gate_times_out() {
    let carrier = FakeCarrier::new("DHL", in_transit("2025-04-22", &["PREFERRED_LOCATION"]));
    let wf = workflow(carrier.clone(), FakeGate::new(GateMode::Hang), CliOverrides::default());

    let report = tokio::time::timeout(
        Duration::from_secs(10),
        wf.process_messages(vec![FetchedMessage::from_body(body(CODE_A))]),
    )
    .await
    .expect("workflow should not wait on the gate forever");

    assert_eq!(report.shipments[0].skip_reason(), Some(SkipReason::GateTimedOut));
    assert!(carrier.reroute_requests().is_empty());
}

#[tokio::test]
async fn missing_options_records_unattempted_intervention() {
    let carrier = FakeCarrier::new("DHL", in_transit("2025-04-22", &[]));
    let wf = workflow(carrier.clone(), FakeGate::new(GateMode::Away), CliOverrides::default());

    let report = wf.process_messages(vec![FetchedMessage::from_body(body(CODE_A))]).await;

    let shipment = &report.shipments[0];
    assert_eq!(shipment.skip_reason(), Some(SkipReason::NoRerouteOptions));
    let intervention = shipment.lifecycle.intervention.as_ref().unwrap();
    assert!(!intervention.attempted);
    assert!(!intervention.success);
    assert!(intervention.error.is_none());
    assert!(carrier.reroute_requests().is_empty());
}

#[tokio::test]
async fn failed_redirection_still_completes() {
    let carrier =
        FakeCarrier::with_result("DHL", in_transit("2025-04-22", &["PREFERRED_LOCATION"]), false);
    let wf = workflow(carrier, FakeGate::new(GateMode::Away), CliOverrides::default());

    let report = wf.process_messages(vec![FetchedMessage::from_body(body(CODE_A))]).await;

    let shipment = &report.shipments[0];
    assert_eq!(shipment.outcome, ShipmentOutcome::Completed);
    assert_eq!(shipment.lifecycle.workflow_code, Some(200));
    let intervention = shipment.lifecycle.intervention.as_ref().unwrap();
    assert!(intervention.attempted);
    assert!(!intervention.success);
    assert!(intervention.error.is_some());
    assert_eq!(report.summary().acted, 1);
}

#[tokio::test]
async fn panic_fails_one_record_and_batch_continues() {
    let inner = FakeCarrier::new("DHL", in_transit("2025-04-22", &["PREFERRED_LOCATION"]));
    let carrier = Arc::new(PanickyCarrier {
        poison: CODE_A.to_string(),
        inner: inner.clone(),
    });
    let wf = workflow(carrier, FakeGate::new(GateMode::Away), CliOverrides::default());

    let report = wf
        .process_messages(vec![FetchedMessage::from_body(format!("{CODE_A} {CODE_B}"))])
        .await;

    assert_eq!(report.shipments.len(), 2);
    let failed = &report.shipments[0];
    assert!(matches!(
        failed.outcome,
        ShipmentOutcome::Failed { at: CodeState::Identified, ref reason } if reason.contains("exploded")
    ));
    assert_eq!(failed.lifecycle.workflow_status, WorkflowStatus::Failed);
    assert_eq!(failed.lifecycle.workflow_code, Some(500));

    let ok = &report.shipments[1];
    assert_eq!(ok.lifecycle.tracking_number(), CODE_B);
    assert_eq!(ok.outcome, ShipmentOutcome::Completed);

    let summary = report.summary();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.acted, 1);
}

#[tokio::test]
async fn failing_mailbox_does_not_stop_run() {
    let carrier = FakeCarrier::new("DHL", in_transit("2025-04-22", &["PREFERRED_LOCATION"]));
    let wf = workflow(carrier, FakeGate::new(GateMode::Away), CliOverrides::default());

    let broken = FakeMailbox::broken("work");
    let mailboxes: Vec<Arc<dyn MailboxAdapter>> =
        vec![broken.clone(), FakeMailbox::with("home", &[body(CODE_A).as_str()])];
    let report = wf.run(&mailboxes).await;

    assert_eq!(broken.fetches.load(Ordering::SeqCst), 1);
    assert_eq!(report.mailbox_failures, 1);
    assert_eq!(report.shipments.len(), 1);
}

#[tokio::test]
async fn cli_values_reach_the_carrier() {
    let carrier = FakeCarrier::new("DHL", in_transit("2025-04-22", &["PREFERRED_LOCATION"]));
    let cli = CliOverrides {
        zip_code: Some("80331".into()),
        custom_location: Some("Behind the bins".into()),
        headless: Some(true),
        timeout_secs: Some(9),
        ..Default::default()
    };
    let wf = workflow(carrier.clone(), FakeGate::new(GateMode::Away), cli);

    wf.process_messages(vec![FetchedMessage::from_body(body(CODE_A))]).await;

    let query = carrier.tracked.lock().unwrap()[0].clone();
    assert_eq!(query.zip_code, "80331");
    assert!(query.headless);
    assert_eq!(query.timeout, Duration::from_secs(9));
    assert_eq!(carrier.reroute_requests()[0].custom_location, "Behind the bins");
}

#[tokio::test]
async fn lifecycle_serializes_to_one_json_line() {
    let carrier = FakeCarrier::new("DHL", in_transit("2025-04-22", &["PREFERRED_LOCATION"]));
    let wf = workflow(carrier, FakeGate::new(GateMode::Away), CliOverrides::default());

    let report = wf.process_messages(vec![FetchedMessage::from_body(body(CODE_A))]).await;
    let line = serde_json::to_string(&report.shipments[0].lifecycle).unwrap();

    assert!(!line.contains('\n'));
    let value: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(value["workflow_status"], "completed");
    assert_eq!(value["provider"]["tracking_number"], CODE_A);
    assert_eq!(value["tracking"]["expected_delivery_date"], "2025-04-22");
    assert!(value["tracking"]["delivery_date"].is_null());
}
