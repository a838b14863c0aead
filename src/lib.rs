//! RFox Smoke
//!
//! Declarative smoke tests driven through a real headless browser. Each URL
//! under test gets its own page session which records the response status,
//! redirects, console output, uncaught page errors and CSS coverage, and a
//! verification pass turns those facts into per-check outcomes.
//!
//! # Features
//!
//! - **CDP Backend** (`cdp` feature): Chrome DevTools Protocol via headless Chrome
//! - **Scripted Backend**: deterministic in-memory site for tests and dry runs
//! - **Declarative checks**: status, redirects, page errors, content, elements,
//!   cache headers, CSS coverage and paint budgets per URL
//!
//! # Example
//!
//! ```no_run
//! use rfsmoke::driver::scripted::{ScriptedBrowser, ScriptedRoute, ScriptedSite};
//! use rfsmoke::{config, HarnessConfig, Runner};
//!
//! # async fn run() -> rfsmoke::Result<()> {
//! let harness = HarnessConfig::default();
//! let suites = config::parse_suites(r#"[{"urls": {"/status/404": 404}}]"#)?;
//!
//! let site = ScriptedSite::new(harness.host.as_str()).route("/status/404", ScriptedRoute::status(404));
//! let browser = ScriptedBrowser::new(site);
//!
//! let summary = Runner::new(&harness, &browser).run(&suites).await;
//! assert_eq!(summary.failures(), 0);
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

pub mod error;
pub use error::{Error, Result};

pub mod check;
pub mod config;
pub mod coverage;
pub mod driver;
pub mod events;
pub mod intercept;
pub mod redirect;
pub mod runner;
pub mod session;
pub mod verify;
pub mod viewport;

// CDP backend over headless Chrome
#[cfg(feature = "cdp")]
pub mod cdp;

pub use check::{CheckSpec, ContentCheck, ElementAssertion, PerformanceBudget, RequestBody, RequestOptions, StatusCheck};
pub use config::{Suite, UrlTarget};
pub use coverage::{CoverageRange, CoverageReport};
pub use driver::{BrowserDriver, PageDriver};
pub use redirect::RedirectRecord;
pub use runner::{RunSummary, Runner, UrlReport};
pub use session::{PageTestSession, SessionState};
pub use verify::{CheckOutcome, Outcome};
pub use viewport::ViewportProfile;

/// HTTP header map. Ordered so logs and request logs are deterministic.
pub type Headers = BTreeMap<String, String>;

/// Configuration for a smoke-test run
///
/// Built once by the entry point and passed by reference to the runner and
/// every session; nothing else reads process state. Defaults:
/// - `host` is a local development server
/// - `config_path` is `smoke.json` relative to the working directory
///
/// # Examples
///
/// ```
/// let cfg = rfsmoke::HarnessConfig::default();
/// assert_eq!(cfg.host, "http://localhost:3002");
/// ```
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Origin prefixed to every configured path
    pub host: String,
    /// Suite configuration file
    pub config_path: PathBuf,
    /// Navigation timeout in milliseconds
    pub navigation_timeout_ms: u64,
    /// Maximum number of pages open at once
    pub concurrency: usize,
    /// Run the browser without a window
    pub headless: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:3002".to_string(),
            config_path: PathBuf::from("smoke.json"),
            navigation_timeout_ms: 10_000,
            concurrency: num_cpus::get().max(1),
            headless: true,
        }
    }
}

impl HarnessConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    /// Full URL for a configured path
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.host, path)
    }
}
