//! Error types for the smoke-test harness

use thiserror::Error;

/// Result type alias for harness operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading configuration or driving a page
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or malformed configuration. Reported before any browser work.
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Browser could not be launched or a page could not be opened
    #[error("Browser initialization failed: {0}")]
    InitializationError(String),

    /// Navigation to the URL under test failed
    #[error("Navigation to '{url}' failed: {reason}")]
    NavigationError { url: String, reason: String },

    /// Navigation did not settle within the configured timeout
    #[error("Navigation timed out after {0}ms")]
    Timeout(u64),

    /// A paused request could not be resumed
    #[error("Failed to resume intercepted request '{url}': {reason}")]
    InterceptionError { url: String, reason: String },

    /// A query asked for data the session never observed
    #[error("Missing data: {0}")]
    MissingData(String),

    /// A query was issued before `init` completed successfully
    #[error("Session for '{0}' is not ready")]
    NotReady(String),

    /// A query was issued after the page was closed
    #[error("Session for '{0}' is closed")]
    SessionClosed(String),

    /// DOM evaluation failed
    #[error("Script execution failed: {0}")]
    ScriptError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CDP-specific error
    #[cfg(feature = "cdp")]
    #[error("CDP error: {0}")]
    CdpError(String),
}

impl Error {
    /// Whether this error is fatal to one session only (the runner carries on
    /// with the remaining URLs).
    pub fn is_session_failure(&self) -> bool {
        !matches!(self, Error::ConfigError(_) | Error::InitializationError(_))
    }
}

#[cfg(feature = "cdp")]
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::CdpError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn navigation_errors_name_the_url() {
        let err = Error::NavigationError {
            url: "http://localhost:3002/x".into(),
            reason: "net::ERR_CONNECTION_REFUSED".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("http://localhost:3002/x"));
        assert!(msg.contains("ERR_CONNECTION_REFUSED"));
        assert!(err.is_session_failure());
    }

    #[test]
    fn config_errors_are_not_session_failures() {
        assert!(!Error::ConfigError("bad".into()).is_session_failure());
        assert!(Error::Timeout(5000).is_session_failure());
    }
}
