//! Shipment workflow pipeline.
//!
//! Messages from every mailbox flow through:
//! 1. `TrackingExtractor::extract()`: regex scan for tracking codes
//! 2. `CarrierRegistry::resolve()`: pick the carrier handler
//! 3. `CarrierHandler::check_reroute_availability()`: read the tracking page
//! 4. `AvailabilityGate::should_reroute()`: consult the calendar
//! 5. `CarrierHandler::reroute_shipment()`: redirect to the drop-off spot
//!
//! Each code yields one `ShipmentLifecycle` record.

pub mod extractor;
pub mod types;
pub mod workflow;

pub use extractor::TrackingExtractor;
pub use types::{
    AvailabilityGate, CodeState, FetchedMessage, GateDecision, MailboxAdapter, ProcessedShipment,
    RunReport, RunSummary, ShipmentOutcome, SkipReason, TrackingCode,
};
pub use workflow::Workflow;
