//! Configuration: the YAML file, CLI overrides, and the validated
//! [`RunSettings`] handed to the workflow.
//!
//! Carrier settings are layered `base` < per-carrier section < CLI. Secrets
//! never live in the file; it names the environment variables to read them
//! from.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::browser::webdriver::DEFAULT_WEBDRIVER_URL;
use crate::error::ConfigError;

const DEFAULT_TIMEOUT_SECS: u64 = 20;
const DEFAULT_GATE_TIMEOUT_SECS: u64 = 30;

// ── File format ─────────────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// How many days back to scan mailboxes.
    #[serde(default)]
    pub lookback_days: Option<u32>,
    /// Carrier name → tracking-code regexes.
    #[serde(default)]
    pub tracking_patterns: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub carriers: CarrierTable,
    #[serde(default)]
    pub mailboxes: Vec<MailboxConfig>,
    #[serde(default)]
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub webdriver: WebDriverConfig,
    /// Upper bound on a single availability-gate call.
    #[serde(default = "default_gate_timeout_secs")]
    pub gate_timeout_secs: u64,
}

fn default_gate_timeout_secs() -> u64 {
    DEFAULT_GATE_TIMEOUT_SECS
}

impl AppConfig {
    /// Load and parse a YAML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

/// `carriers:` section: a `base` block plus one block per carrier.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CarrierTable {
    #[serde(default)]
    pub base: CarrierSettings,
    #[serde(flatten)]
    pub overrides: BTreeMap<String, CarrierSettings>,
}

/// One layer of carrier settings. Unset fields fall through to the layer below.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CarrierSettings {
    pub zip_code: Option<String>,
    pub custom_location: Option<String>,
    pub highlight_only: Option<bool>,
    pub headless: Option<bool>,
    pub timeout_secs: Option<u64>,
    /// Free-form carrier-specific keys.
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl CarrierSettings {
    /// Layer `over` on top of `self`; every field set in `over` wins.
    pub fn merge(&self, over: &CarrierSettings) -> CarrierSettings {
        let mut extra = self.extra.clone();
        extra.extend(over.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        CarrierSettings {
            zip_code: over.zip_code.clone().or_else(|| self.zip_code.clone()),
            custom_location: over
                .custom_location
                .clone()
                .or_else(|| self.custom_location.clone()),
            highlight_only: over.highlight_only.or(self.highlight_only),
            headless: over.headless.or(self.headless),
            timeout_secs: over.timeout_secs.or(self.timeout_secs),
            extra,
        }
    }
}

/// One mailbox to scan.
#[derive(Debug, Clone, Deserialize)]
pub struct MailboxConfig {
    pub name: String,
    #[serde(default = "default_folders")]
    pub folders: Vec<String>,
    pub access: MailboxAccess,
}

fn default_folders() -> Vec<String> {
    vec!["INBOX".to_string()]
}

/// How to reach a mailbox.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MailboxAccess {
    Imap {
        host: String,
        #[serde(default = "default_imap_port")]
        port: u16,
        #[serde(default = "default_true")]
        ssl: bool,
        user_env: String,
        pass_env: String,
    },
    MsGraph {
        /// Mailbox user principal name (e.g. "me@example.com").
        user: String,
        #[serde(default)]
        method: GraphAuthMethod,
        tenant: Option<String>,
        client_id: Option<String>,
        client_secret_env: Option<String>,
        token_env: Option<String>,
    },
}

fn default_imap_port() -> u16 {
    993
}

fn default_true() -> bool {
    true
}

/// Microsoft Graph authentication flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphAuthMethod {
    /// Pre-issued bearer token read from `token_env`.
    #[default]
    AccessToken,
    /// OAuth2 client-credentials against the tenant token endpoint.
    ClientSecret,
    DeviceCode,
    Certificate,
}

impl std::fmt::Display for GraphAuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AccessToken => "access_token",
            Self::ClientSecret => "client_secret",
            Self::DeviceCode => "device_code",
            Self::Certificate => "certificate",
        };
        write!(f, "{s}")
    }
}

/// `calendar:` section.
#[derive(Debug, Clone, Deserialize)]
pub struct CalendarConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub sources: Vec<CalendarSource>,
    /// Days after the delivery date included in the calendar query.
    #[serde(default = "default_lookahead_days")]
    pub lookahead_days: u32,
    /// Summary substring (case-insensitive) that marks an absence.
    #[serde(default = "default_away_keyword")]
    pub away_keyword: String,
    pub user_env: Option<String>,
    pub pass_env: Option<String>,
    #[serde(default = "default_calendar_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sources: Vec::new(),
            lookahead_days: default_lookahead_days(),
            away_keyword: default_away_keyword(),
            user_env: None,
            pass_env: None,
            timeout_secs: default_calendar_timeout_secs(),
        }
    }
}

fn default_lookahead_days() -> u32 {
    1
}

fn default_away_keyword() -> String {
    "away".to_string()
}

fn default_calendar_timeout_secs() -> u64 {
    15
}

/// A CalDAV calendar collection.
#[derive(Debug, Clone, Deserialize)]
pub struct CalendarSource {
    pub name: String,
    pub url: String,
}

/// `webdriver:` section.
#[derive(Debug, Clone, Deserialize)]
pub struct WebDriverConfig {
    #[serde(default = "default_webdriver_url")]
    pub url: String,
}

impl Default for WebDriverConfig {
    fn default() -> Self {
        Self {
            url: default_webdriver_url(),
        }
    }
}

fn default_webdriver_url() -> String {
    DEFAULT_WEBDRIVER_URL.to_string()
}

// ── Secrets ─────────────────────────────────────────────────────────

/// Read a secret from the environment variable `var`.
pub fn secret_from_env(var: &str) -> Result<SecretString, ConfigError> {
    match std::env::var(var) {
        Ok(v) if !v.trim().is_empty() => Ok(SecretString::from(v)),
        _ => Err(ConfigError::MissingEnvVar(var.to_string())),
    }
}

// ── CLI layer ───────────────────────────────────────────────────────

/// Values given on the command line. Every set field beats the file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub lookback_days: Option<u32>,
    pub zip_code: Option<String>,
    pub custom_location: Option<String>,
    pub dry_run: Option<bool>,
    pub headless: Option<bool>,
    pub timeout_secs: Option<u64>,
}

impl CliOverrides {
    fn as_layer(&self) -> CarrierSettings {
        CarrierSettings {
            zip_code: self.zip_code.clone(),
            custom_location: self.custom_location.clone(),
            highlight_only: self.dry_run,
            headless: self.headless,
            timeout_secs: self.timeout_secs,
            extra: BTreeMap::new(),
        }
    }
}

// ── Validated settings ──────────────────────────────────────────────

/// Fully-merged settings for one carrier.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCarrier {
    pub zip_code: String,
    pub custom_location: String,
    /// Dry-run: do everything but the final confirming click.
    pub highlight_only: bool,
    pub headless: bool,
    pub timeout: Duration,
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ResolvedCarrier {
    fn from_layers(carrier: &str, merged: CarrierSettings) -> Result<Self, ConfigError> {
        let zip_code = required(merged.zip_code, carrier, "zip_code", "--zip")?;
        let custom_location =
            required(merged.custom_location, carrier, "custom_location", "--location")?;
        let timeout_secs = merged.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: format!("carriers.{carrier}.timeout_secs"),
                message: "must be greater than zero".into(),
            });
        }
        Ok(Self {
            zip_code,
            custom_location,
            highlight_only: merged.highlight_only.unwrap_or(true),
            headless: merged.headless.unwrap_or(false),
            timeout: Duration::from_secs(timeout_secs),
            extra: merged.extra,
        })
    }
}

fn required(
    value: Option<String>,
    carrier: &str,
    key: &str,
    flag: &str,
) -> Result<String, ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::MissingRequired {
            key: format!("carriers.{carrier}.{key}"),
            hint: format!("Set it under carriers.base or carriers.{carrier}, or pass {flag}."),
        }),
    }
}

/// The validated value object the workflow runs with.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub lookback_days: u32,
    pub tracking_patterns: BTreeMap<String, Vec<String>>,
    /// Uppercase carrier name → merged settings.
    carriers: HashMap<String, ResolvedCarrier>,
    pub gate_timeout: Duration,
}

impl RunSettings {
    /// Merge file and CLI layers and check everything required is present.
    ///
    /// Every carrier that has both tracking patterns and a registered handler
    /// must end up with a postal code and drop-off text. Pattern-only carriers
    /// get no settings; their codes are skipped during the run.
    pub fn resolve(
        config: &AppConfig,
        cli: &CliOverrides,
        registered: &[String],
    ) -> Result<Self, ConfigError> {
        let lookback_days = cli.lookback_days.or(config.lookback_days).ok_or_else(|| {
            ConfigError::MissingRequired {
                key: "lookback_days".into(),
                hint: "Set lookback_days in the config file or pass --lookback-days.".into(),
            }
        })?;
        if lookback_days == 0 {
            return Err(ConfigError::InvalidValue {
                key: "lookback_days".into(),
                message: "must be at least 1".into(),
            });
        }
        if config.tracking_patterns.is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "tracking_patterns".into(),
                hint: "Add at least one carrier with tracking-code regexes.".into(),
            });
        }

        let overrides: HashMap<String, &CarrierSettings> = config
            .carriers
            .overrides
            .iter()
            .map(|(name, s)| (name.to_uppercase(), s))
            .collect();
        let cli_layer = cli.as_layer();
        let registered: HashSet<String> = registered
            .iter()
            .map(|name| name.trim().to_uppercase())
            .collect();

        let mut carriers = HashMap::new();
        for carrier in config.tracking_patterns.keys() {
            let key = carrier.to_uppercase();
            if !registered.contains(&key) {
                debug!(carrier = %key, "No handler for carrier, its codes will be skipped");
                continue;
            }
            let mut merged = config.carriers.base.clone();
            if let Some(over) = overrides.get(&key) {
                merged = merged.merge(over);
            }
            merged = merged.merge(&cli_layer);
            carriers.insert(key.clone(), ResolvedCarrier::from_layers(&key, merged)?);
        }

        Ok(Self {
            lookback_days,
            tracking_patterns: config.tracking_patterns.clone(),
            carriers,
            gate_timeout: Duration::from_secs(config.gate_timeout_secs.max(1)),
        })
    }

    /// Merged settings for `carrier` (case-insensitive).
    pub fn carrier(&self, carrier: &str) -> Option<&ResolvedCarrier> {
        self.carriers.get(&carrier.to_uppercase())
    }
}
