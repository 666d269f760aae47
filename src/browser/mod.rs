//! Browser automation contracts.
//!
//! Carrier handlers drive a page through [`BrowserSession`] and obtain
//! sessions from a [`SessionLauncher`]. Every session is held in a
//! [`ScopedSession`] so it is released on all exit paths.

pub mod webdriver;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::BrowserError;

pub use webdriver::FantocciniLauncher;

// ── Locators ────────────────────────────────────────────────────────

/// How to find an element on the page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    Css(String),
    XPath(String),
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    pub fn xpath(expr: impl Into<String>) -> Self {
        Self::XPath(expr.into())
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Css(s) => write!(f, "css:{s}"),
            Self::XPath(s) => write!(f, "xpath:{s}"),
        }
    }
}

// ── Session contracts ───────────────────────────────────────────────

/// Options for launching a browser session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub headless: bool,
    pub lang: String,
    pub incognito: bool,
}

impl SessionOptions {
    pub fn new(headless: bool) -> Self {
        Self {
            headless,
            lang: "en".to_string(),
            incognito: true,
        }
    }
}

/// One live browser session.
///
/// Element operations take a [`Locator`] and act on the first match.
#[async_trait]
pub trait BrowserSession: Send {
    async fn goto(&mut self, url: &str) -> Result<(), BrowserError>;

    /// Wait until an element matching `locator` is present, up to `timeout`.
    async fn wait_for(&mut self, locator: &Locator, timeout: Duration) -> Result<(), BrowserError>;

    /// Visible text of the first match, trimmed.
    async fn text(&mut self, locator: &Locator) -> Result<String, BrowserError>;

    /// Visible text of every match, in document order.
    async fn texts(&mut self, locator: &Locator) -> Result<Vec<String>, BrowserError>;

    /// Attribute value of every match, in document order.
    async fn attributes(
        &mut self,
        locator: &Locator,
        name: &str,
    ) -> Result<Vec<Option<String>>, BrowserError>;

    async fn exists(&mut self, locator: &Locator) -> Result<bool, BrowserError>;

    async fn click(&mut self, locator: &Locator) -> Result<(), BrowserError>;

    /// Clear the first match and type `text` into it.
    async fn fill(&mut self, locator: &Locator, text: &str) -> Result<(), BrowserError>;

    /// Run `script` with the first match bound to `arguments[0]`.
    async fn execute(
        &mut self,
        script: &str,
        target: &Locator,
    ) -> Result<serde_json::Value, BrowserError>;

    /// End the session.
    async fn close(self: Box<Self>) -> Result<(), BrowserError>;

    /// End the session without awaiting, for unwinding paths.
    fn abort(self: Box<Self>);
}

/// Opens browser sessions.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn launch(&self, options: &SessionOptions) -> Result<Box<dyn BrowserSession>, BrowserError>;
}

// ── Scoped session ──────────────────────────────────────────────────

/// A session that is closed when the guard goes away.
///
/// Call [`release`](Self::release) on normal and error paths; if the guard
/// is dropped without it (panic, cancellation) the session is aborted.
pub struct ScopedSession {
    inner: Option<Box<dyn BrowserSession>>,
}

impl ScopedSession {
    pub async fn acquire(
        launcher: &Arc<dyn SessionLauncher>,
        options: &SessionOptions,
    ) -> Result<Self, BrowserError> {
        let inner = launcher.launch(options).await?;
        Ok(Self { inner: Some(inner) })
    }

    /// Borrow the live session.
    pub fn session(&mut self) -> Result<&mut (dyn BrowserSession + 'static), BrowserError> {
        self.inner
            .as_deref_mut()
            .ok_or_else(|| BrowserError::Command("session already released".into()))
    }

    /// Close the session, logging instead of failing on teardown errors.
    pub async fn release(mut self) {
        if let Some(session) = self.inner.take()
            && let Err(e) = session.close().await
        {
            tracing::warn!(error = %e, "Failed to close browser session");
        }
    }
}

impl Drop for ScopedSession {
    fn drop(&mut self) {
        if let Some(session) = self.inner.take() {
            tracing::debug!("Browser session dropped without release, aborting");
            session.abort();
        }
    }
}
