//! Carrier handler trait: the per-carrier tracking and redirection surface.

use std::time::Duration;

use async_trait::async_trait;

use crate::shipment::TrackingSnapshot;

/// Inputs for a tracking query.
#[derive(Debug, Clone)]
pub struct TrackingQuery {
    pub tracking_number: String,
    pub zip_code: String,
    /// Upper bound on waiting for any single page element.
    pub timeout: Duration,
    pub headless: bool,
}

/// Inputs for a redirection attempt.
#[derive(Debug, Clone)]
pub struct RerouteRequest {
    pub tracking_number: String,
    pub zip_code: String,
    /// Free-text drop-off location entered on the carrier form.
    pub custom_location: String,
    /// Perform every step but the final confirming click.
    pub highlight_only: bool,
    pub headless: bool,
    pub timeout: Duration,
}

/// A carrier that can report tracking state and redirect a shipment.
///
/// Neither method returns an error: expected failures are folded into the
/// snapshot's protocol block or a `false` redirection result. Implementations
/// release any automation session on every exit path.
#[async_trait]
pub trait CarrierHandler: Send + Sync {
    /// Registry key (e.g. "DHL").
    fn name(&self) -> &str;

    /// Read the carrier's tracking page.
    async fn check_reroute_availability(&self, query: &TrackingQuery) -> TrackingSnapshot;

    /// Redirect the shipment to `request.custom_location`. Returns `true` when
    /// the sequence ran to completion (including highlight-only runs).
    async fn reroute_shipment(&self, request: &RerouteRequest) -> bool;
}
