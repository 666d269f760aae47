//! Carrier abstraction: the handler trait, the registry, and concrete carriers.

pub mod dhl;
pub mod handler;
pub mod registry;

pub use dhl::DhlCarrier;
pub use handler::{CarrierHandler, RerouteRequest, TrackingQuery};
pub use registry::CarrierRegistry;
