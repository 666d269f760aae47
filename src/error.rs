//! Error types for the parcel rerouter.

use std::time::Duration;

/// Configuration-related errors. All of these are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Configuration file not found: {0}")]
    NotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mailbox adapter errors (connection, auth, folder selection, transport).
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Mailbox {name} connection failed: {reason}")]
    ConnectFailed { name: String, reason: String },

    #[error("Authentication failed for mailbox {name}: {reason}")]
    AuthFailed { name: String, reason: String },

    #[error("Folder {folder} unavailable in mailbox {name}: {reason}")]
    FolderUnavailable {
        name: String,
        folder: String,
        reason: String,
    },

    #[error("Protocol error in mailbox {name}: {reason}")]
    Protocol { name: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Fetch task for mailbox {name} aborted: {reason}")]
    TaskAborted { name: String, reason: String },
}

/// Browser automation errors. Handlers convert these into protocol-block
/// entries or failed outcomes; they never reach the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("Failed to launch browser session: {0}")]
    Launch(String),

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Element {locator} not found: {reason}")]
    ElementNotFound { locator: String, reason: String },

    #[error("Timed out after {timeout:?} waiting for {locator}")]
    Timeout { locator: String, timeout: Duration },

    #[error("Script execution failed: {0}")]
    Script(String),

    #[error("WebDriver command failed: {0}")]
    Command(String),
}

/// Calendar lookup errors. The orchestrator treats every one of these as
/// "do not reroute".
#[derive(Debug, thiserror::Error)]
pub enum CalendarError {
    #[error("Invalid delivery date '{value}': {reason}")]
    InvalidDate { value: String, reason: String },

    #[error("Calendar request to {source_name} failed: {reason}")]
    RequestFailed { source_name: String, reason: String },

    #[error("Calendar {source_name} returned status {status}")]
    BadStatus { source_name: String, status: u16 },

    #[error("Malformed calendar data from {source_name}: {reason}")]
    Malformed { source_name: String, reason: String },
}
