//! Per-shipment records produced by a run.

pub mod model;
pub mod tracking;

pub use model::{
    AbsenceWindow, AvailabilityVerdict, CarrierIdentity, InterventionOutcome,
    NotificationContext, ShipmentLifecycle, WorkflowStatus, NOTIFICATION_BODY_CAP,
};
pub use tracking::{
    FieldLookup, FieldMiss, ProtocolBlock, ProtocolStatus, TrackingFields, TrackingSnapshot,
    TrackingStatus,
};
