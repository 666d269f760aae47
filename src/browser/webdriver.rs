//! WebDriver-backed sessions via `fantoccini` (chromedriver or compatible).

use std::time::Duration;

use async_trait::async_trait;
use fantoccini::elements::Element;
use fantoccini::{Client, ClientBuilder};
use serde_json::json;

use crate::browser::{BrowserSession, Locator, SessionLauncher, SessionOptions};
use crate::error::BrowserError;

/// Default WebDriver endpoint (local chromedriver).
pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";

/// Launches Chrome sessions against a WebDriver endpoint.
pub struct FantocciniLauncher {
    webdriver_url: String,
}

impl FantocciniLauncher {
    pub fn new(webdriver_url: impl Into<String>) -> Self {
        Self {
            webdriver_url: webdriver_url.into(),
        }
    }
}

/// Chrome command-line arguments for a session.
pub fn chrome_args(options: &SessionOptions) -> Vec<String> {
    let mut args = Vec::new();
    if options.headless {
        args.push("--headless=new".to_string());
    }
    if !options.lang.is_empty() {
        args.push(format!("--lang={}", options.lang));
    }
    if options.incognito {
        args.push("--incognito".to_string());
    }
    args.push("--window-size=1200,800".to_string());
    args.push("--disable-blink-features=AutomationControlled".to_string());
    args
}

#[async_trait]
impl SessionLauncher for FantocciniLauncher {
    async fn launch(
        &self,
        options: &SessionOptions,
    ) -> Result<Box<dyn BrowserSession>, BrowserError> {
        let mut caps = serde_json::Map::new();
        caps.insert(
            "goog:chromeOptions".to_string(),
            json!({ "args": chrome_args(options) }),
        );

        tracing::info!(
            headless = options.headless,
            webdriver = %self.webdriver_url,
            "Launching browser session"
        );

        let client = ClientBuilder::native()
            .capabilities(caps)
            .connect(&self.webdriver_url)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        Ok(Box::new(WebDriverSession { client }))
    }
}

/// A live fantoccini client.
pub struct WebDriverSession {
    client: Client,
}

impl WebDriverSession {
    async fn first(&self, locator: &Locator) -> Result<Element, BrowserError> {
        self.client
            .find(wd_locator(locator))
            .await
            .map_err(|e| BrowserError::ElementNotFound {
                locator: locator.to_string(),
                reason: e.to_string(),
            })
    }

    async fn all(&self, locator: &Locator) -> Result<Vec<Element>, BrowserError> {
        self.client
            .find_all(wd_locator(locator))
            .await
            .map_err(command_error)
    }
}

fn wd_locator(locator: &Locator) -> fantoccini::Locator<'_> {
    match locator {
        Locator::Css(s) => fantoccini::Locator::Css(s),
        Locator::XPath(s) => fantoccini::Locator::XPath(s),
    }
}

fn command_error(e: fantoccini::error::CmdError) -> BrowserError {
    BrowserError::Command(e.to_string())
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    async fn goto(&mut self, url: &str) -> Result<(), BrowserError> {
        self.client
            .goto(url)
            .await
            .map_err(|e| BrowserError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            })
    }

    async fn wait_for(&mut self, locator: &Locator, timeout: Duration) -> Result<(), BrowserError> {
        self.client
            .wait()
            .at_most(timeout)
            .for_element(wd_locator(locator))
            .await
            .map(|_| ())
            .map_err(|_| BrowserError::Timeout {
                locator: locator.to_string(),
                timeout,
            })
    }

    async fn text(&mut self, locator: &Locator) -> Result<String, BrowserError> {
        let el = self.first(locator).await?;
        let text = el.text().await.map_err(command_error)?;
        Ok(text.trim().to_string())
    }

    async fn texts(&mut self, locator: &Locator) -> Result<Vec<String>, BrowserError> {
        let mut out = Vec::new();
        for el in self.all(locator).await? {
            out.push(el.text().await.map_err(command_error)?.trim().to_string());
        }
        Ok(out)
    }

    async fn attributes(
        &mut self,
        locator: &Locator,
        name: &str,
    ) -> Result<Vec<Option<String>>, BrowserError> {
        let mut out = Vec::new();
        for el in self.all(locator).await? {
            out.push(el.attr(name).await.map_err(command_error)?);
        }
        Ok(out)
    }

    async fn exists(&mut self, locator: &Locator) -> Result<bool, BrowserError> {
        Ok(!self.all(locator).await?.is_empty())
    }

    async fn click(&mut self, locator: &Locator) -> Result<(), BrowserError> {
        self.first(locator).await?.click().await.map_err(command_error)
    }

    async fn fill(&mut self, locator: &Locator, text: &str) -> Result<(), BrowserError> {
        let el = self.first(locator).await?;
        el.clear().await.map_err(command_error)?;
        el.send_keys(text).await.map_err(command_error)
    }

    async fn execute(
        &mut self,
        script: &str,
        target: &Locator,
    ) -> Result<serde_json::Value, BrowserError> {
        let el = self.first(target).await?;
        let arg = serde_json::to_value(&el).map_err(|e| BrowserError::Script(e.to_string()))?;
        self.client
            .execute(script, vec![arg])
            .await
            .map_err(|e| BrowserError::Script(e.to_string()))
    }

    async fn close(self: Box<Self>) -> Result<(), BrowserError> {
        self.client.close().await.map_err(command_error)
    }

    fn abort(self: Box<Self>) {
        let client = self.client;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = client.close().await {
                        tracing::warn!(error = %e, "Failed to abort browser session");
                    }
                });
            }
            Err(_) => tracing::warn!("No runtime to abort browser session on; leaking it"),
        }
    }
}
