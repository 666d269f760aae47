//! DHL (dhl.de) carrier handler driven through a browser session.

pub mod date;
pub mod selectors;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::browser::{BrowserSession, Locator, ScopedSession, SessionLauncher, SessionOptions};
use crate::carriers::handler::{CarrierHandler, RerouteRequest, TrackingQuery};
use crate::error::BrowserError;
use crate::shipment::{FieldLookup, FieldMiss, TrackingFields, TrackingSnapshot};

pub use date::parse_dhl_date;

const SCROLL_INTO_VIEW: &str = "arguments[0].scrollIntoView(true)";
const SCROLL_ABOVE: &str = "const rect = arguments[0].getBoundingClientRect(); \
     window.scrollBy({ top: rect.top - 100, left: 0, behavior: 'smooth' });";
const BLINK_TIMES: usize = 5;
const BLINK_STYLE: &str = "10px solid purple";
const INPUT_OUTLINE: &str = "arguments[0].style.border='3px solid blue'";

/// Delays between page steps, so the page can settle and a watching human can
/// follow along.
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    pub step: Duration,
    pub blink_interval: Duration,
    /// How long a highlighted confirm button stays on screen.
    pub highlight_hold: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            step: Duration::from_secs(1),
            blink_interval: Duration::from_millis(300),
            highlight_hold: Duration::from_secs(5),
        }
    }
}

impl Pacing {
    pub fn none() -> Self {
        Self {
            step: Duration::ZERO,
            blink_interval: Duration::ZERO,
            highlight_hold: Duration::ZERO,
        }
    }
}

/// DHL tracking and redirection.
pub struct DhlCarrier {
    launcher: Arc<dyn SessionLauncher>,
    pacing: Pacing,
}

impl DhlCarrier {
    pub const NAME: &'static str = "DHL";

    pub fn new(launcher: Arc<dyn SessionLauncher>) -> Self {
        Self {
            launcher,
            pacing: Pacing::default(),
        }
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    async fn pause(&self, d: Duration) {
        if !d.is_zero() {
            tokio::time::sleep(d).await;
        }
    }

    // ── Tracking ────────────────────────────────────────────────────

    async fn read_page(
        &self,
        session: &mut dyn BrowserSession,
        query: &TrackingQuery,
    ) -> TrackingSnapshot {
        let url = selectors::tracking_url(&query.tracking_number, &query.zip_code);
        if let Err(e) = session.goto(&url).await {
            return TrackingSnapshot::unreachable(format!("navigation: {e}"));
        }
        if let Err(e) = session
            .wait_for(&selectors::shipment_container(), query.timeout)
            .await
        {
            return TrackingSnapshot::unreachable(format!("shipment_container: {e}"));
        }

        let status_text = self.read_status(session, &query.tracking_number).await;
        let delivery_date = self.read_date(session).await;
        let delivered = session
            .texts(&selectors::delivered_texts())
            .await
            .map(|texts| texts.iter().any(|t| selectors::is_delivered_text(t)))
            .map_err(|e| FieldMiss::new("delivered", e.to_string()));
        let delivery_options = self.read_options(session, query.timeout).await;
        let history: FieldLookup<Vec<String>> = session
            .texts(&selectors::history_entries())
            .await
            .map(|entries| entries.into_iter().filter(|t| !t.is_empty()).collect())
            .map_err(|e| FieldMiss::new("shipment_history", e.to_string()));
        let custom_dropoff_input_present = session
            .exists(&selectors::custom_dropoff_input())
            .await
            .map_err(|e| FieldMiss::new("custom_dropoff_input_present", e.to_string()));

        TrackingSnapshot::assemble(TrackingFields {
            status_text,
            delivery_date,
            delivered,
            delivery_options,
            history,
            custom_dropoff_input_present,
        })
    }

    async fn read_status(
        &self,
        session: &mut dyn BrowserSession,
        tracking_number: &str,
    ) -> FieldLookup<String> {
        match session.text(&selectors::delivery_status(tracking_number)).await {
            Ok(text) if !text.is_empty() => Ok(text),
            Ok(_) => Err(FieldMiss::new("delivery_status", "empty status text")),
            Err(e) => Err(FieldMiss::new("delivery_status", e.to_string())),
        }
    }

    async fn read_date(&self, session: &mut dyn BrowserSession) -> FieldLookup<chrono::NaiveDate> {
        let raw = session
            .text(&selectors::delivery_date())
            .await
            .map_err(|e| FieldMiss::new("delivery_date", e.to_string()))?;
        match parse_dhl_date(&raw) {
            Some(date) => {
                debug!(raw = %raw, date = %date, "Parsed DHL date");
                Ok(date)
            }
            None => {
                warn!(raw = %raw, "Could not parse DHL date");
                Err(FieldMiss::new(
                    "delivery_date",
                    format!("could not parse '{raw}'"),
                ))
            }
        }
    }

    async fn read_options(
        &self,
        session: &mut dyn BrowserSession,
        timeout: Duration,
    ) -> FieldLookup<BTreeSet<String>> {
        let miss = |e: BrowserError| FieldMiss::new("delivery_options", e.to_string());

        self.expand_options(session, timeout).await.map_err(miss)?;
        let names = session
            .attributes(&selectors::delivery_options(), "data-name")
            .await
            .map_err(miss)?;

        Ok(names
            .into_iter()
            .flatten()
            .filter(|name| selectors::ALLOWED_DELIVERY_OPTION_KEYS.contains(&name.as_str()))
            .collect())
    }

    async fn expand_options(
        &self,
        session: &mut dyn BrowserSession,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        let toggle = selectors::delivery_toggle();
        session.wait_for(&toggle, timeout).await?;
        session.execute(SCROLL_INTO_VIEW, &toggle).await?;
        self.pause(self.pacing.step).await;
        session.click(&toggle).await?;
        self.pause(self.pacing.step).await;
        Ok(())
    }

    // ── Redirection ─────────────────────────────────────────────────

    async fn run_reroute(
        &self,
        session: &mut dyn BrowserSession,
        request: &RerouteRequest,
    ) -> Result<(), BrowserError> {
        let tn = request.tracking_number.as_str();
        info!(tracking_number = %tn, "Loading DHL page");
        session
            .goto(&selectors::tracking_url(tn, &request.zip_code))
            .await?;
        session
            .wait_for(&selectors::shipment_container(), request.timeout)
            .await?;

        info!(tracking_number = %tn, "Expanding delivery options");
        self.expand_options(session, request.timeout).await?;

        info!(tracking_number = %tn, "Selecting drop-off location option");
        let option = selectors::preferred_location_option();
        session.wait_for(&option, request.timeout).await?;
        session.execute(SCROLL_INTO_VIEW, &option).await?;
        session.click(&option).await?;
        self.pause(self.pacing.step).await;

        session
            .wait_for(&selectors::dropoff_form(), request.timeout)
            .await?;

        info!(tracking_number = %tn, location = %request.custom_location, "Entering drop-off text");
        let input = selectors::custom_dropoff_input();
        session.wait_for(&input, request.timeout).await?;
        session.execute(SCROLL_ABOVE, &input).await?;
        session.execute(INPUT_OUTLINE, &input).await?;
        session.fill(&input, &request.custom_location).await?;
        self.pause(self.pacing.step).await;

        let checkbox = selectors::consent_checkbox();
        session.execute(SCROLL_INTO_VIEW, &checkbox).await?;
        session.click(&checkbox).await?;

        let confirm = selectors::confirm_button();
        session.wait_for(&confirm, request.timeout).await?;
        session.execute(SCROLL_ABOVE, &confirm).await?;
        self.blink(session, &confirm).await?;

        if request.highlight_only {
            info!(tracking_number = %tn, "Highlighted confirm button, not clicked");
            self.pause(self.pacing.highlight_hold).await;
        } else {
            session.click(&confirm).await?;
            info!(tracking_number = %tn, "Clicked confirm button");
        }
        Ok(())
    }

    /// Toggle a thick border on and off a few times.
    async fn blink(
        &self,
        session: &mut dyn BrowserSession,
        target: &Locator,
    ) -> Result<(), BrowserError> {
        let original = session
            .execute("return arguments[0].style.border", target)
            .await?;
        let original = serde_json::to_string(original.as_str().unwrap_or(""))
            .map_err(|e| BrowserError::Script(e.to_string()))?;
        let on = format!("arguments[0].style.border='{BLINK_STYLE}'");
        let off = format!("arguments[0].style.border={original}");

        for _ in 0..BLINK_TIMES {
            session.execute(&on, target).await?;
            self.pause(self.pacing.blink_interval).await;
            session.execute(&off, target).await?;
            self.pause(self.pacing.blink_interval).await;
        }
        Ok(())
    }
}

#[async_trait]
impl CarrierHandler for DhlCarrier {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn check_reroute_availability(&self, query: &TrackingQuery) -> TrackingSnapshot {
        let options = SessionOptions::new(query.headless);
        let mut scoped = match ScopedSession::acquire(&self.launcher, &options).await {
            Ok(s) => s,
            Err(e) => {
                warn!(tracking_number = %query.tracking_number, error = %e, "Browser launch failed");
                return TrackingSnapshot::unreachable(format!("session_launch: {e}"));
            }
        };

        let snapshot = match scoped.session() {
            Ok(session) => self.read_page(session, query).await,
            Err(e) => TrackingSnapshot::unreachable(e.to_string()),
        };
        scoped.release().await;

        debug!(
            tracking_number = %query.tracking_number,
            status = %snapshot.status,
            misses = snapshot.protocol.errors.len(),
            "Finished checking reroute availability"
        );
        snapshot
    }

    async fn reroute_shipment(&self, request: &RerouteRequest) -> bool {
        info!(
            tracking_number = %request.tracking_number,
            highlight_only = request.highlight_only,
            "Rerouting shipment"
        );
        let options = SessionOptions::new(request.headless);
        let mut scoped = match ScopedSession::acquire(&self.launcher, &options).await {
            Ok(s) => s,
            Err(e) => {
                warn!(tracking_number = %request.tracking_number, error = %e, "Browser launch failed");
                return false;
            }
        };

        let result = match scoped.session() {
            Ok(session) => self.run_reroute(session, request).await,
            Err(e) => Err(e),
        };
        scoped.release().await;

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(tracking_number = %request.tracking_number, error = %e, "Reroute failed");
                false
            }
        }
    }
}
