//! Browser automation capability consumed by page sessions
//!
//! The session never talks to a browser directly. Backends implement
//! `BrowserDriver` and `PageDriver`: the CDP backend (`cdp` feature) drives a
//! real Chrome, `scripted::ScriptedBrowser` replays an in-memory site.

use crate::coverage::CoverageReport;
use crate::viewport::ViewportProfile;
use crate::{Headers, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub mod scripted;

/// Lifecycle point `goto` waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitUntil {
    /// The `load` event: every sub-resource has settled
    Load,
    /// `DOMContentLoaded`
    DomContentLoaded,
}

/// Final response of a navigation (after redirects were followed)
#[derive(Debug, Clone, PartialEq)]
pub struct NavigationResponse {
    pub url: String,
    pub status: u16,
    /// Lower-cased header names
    pub headers: Headers,
}

/// Any response observed on the page, including redirect hops
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEvent {
    /// URL of the request that produced this response
    pub request_url: String,
    pub status: u16,
    /// Lower-cased header names
    pub headers: Headers,
}

/// Uncaught error thrown in the page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageError {
    pub message: String,
}

impl PageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Severity of a console message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsoleLevel {
    Log,
    Info,
    Warning,
    Error,
    Debug,
    Other,
}

impl From<&str> for ConsoleLevel {
    fn from(s: &str) -> Self {
        match s {
            "log" => ConsoleLevel::Log,
            "info" => ConsoleLevel::Info,
            "warn" | "warning" => ConsoleLevel::Warning,
            "error" => ConsoleLevel::Error,
            "debug" => ConsoleLevel::Debug,
            _ => ConsoleLevel::Other,
        }
    }
}

/// Console message emitted by the page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleMessage {
    pub level: ConsoleLevel,
    pub text: String,
}

impl ConsoleMessage {
    pub fn new(level: ConsoleLevel, text: impl Into<String>) -> Self {
        Self { level, text: text.into() }
    }
}

/// A paused network request
#[derive(Debug, Clone, PartialEq)]
pub struct InterceptedRequest {
    pub url: String,
    pub method: String,
    pub headers: Headers,
    pub post_data: Option<String>,
}

/// Fields to replace when resuming a paused request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOverrides {
    pub method: Option<String>,
    pub post_data: Option<String>,
    /// Complete replacement header set
    pub headers: Option<Headers>,
}

impl RequestOverrides {
    /// Apply the overrides to a request, producing what is actually sent
    pub fn apply(&self, request: &InterceptedRequest) -> InterceptedRequest {
        InterceptedRequest {
            url: request.url.clone(),
            method: self.method.clone().unwrap_or_else(|| request.method.clone()),
            headers: self.headers.clone().unwrap_or_else(|| request.headers.clone()),
            post_data: self.post_data.clone().or_else(|| request.post_data.clone()),
        }
    }
}

/// Decision returned by a request handler. Every request is resumed.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestAction {
    Continue,
    ContinueWith(RequestOverrides),
}

/// Paint timing entries, in milliseconds since navigation start
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PaintTimings {
    pub first_paint: Option<f64>,
    pub first_contentful_paint: Option<f64>,
}

// Type aliases to simplify handler types
pub type OnPageErrorHandler = Arc<dyn Fn(&PageError) + Send + Sync>;
pub type OnConsoleHandler = Arc<dyn Fn(&ConsoleMessage) + Send + Sync>;
pub type OnResponseHandler = Arc<dyn Fn(&ResponseEvent) + Send + Sync>;
pub type OnRequestHandler = Arc<dyn Fn(&InterceptedRequest) -> RequestAction + Send + Sync>;

/// A launched browser that can open pages
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    type Page: PageDriver;

    async fn new_page(&self) -> Result<Self::Page>;

    /// Close the browser. Pages opened from it become unusable.
    async fn close(&self) -> Result<()>;
}

/// One browser page (tab)
///
/// Handlers registered with the `on_*` methods stay active for the lifetime of
/// the page and are invoked in event arrival order.
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn set_viewport(&self, viewport: &ViewportProfile) -> Result<()>;

    /// Headers added to every request issued by the page
    async fn set_extra_http_headers(&self, headers: &Headers) -> Result<()>;

    async fn start_css_coverage(&self) -> Result<()>;

    /// Stop CSS capture and return one report per stylesheet
    async fn stop_css_coverage(&self) -> Result<Vec<CoverageReport>>;

    async fn on_page_error(&self, handler: OnPageErrorHandler) -> Result<()>;

    async fn on_console(&self, handler: OnConsoleHandler) -> Result<()>;

    async fn on_response(&self, handler: OnResponseHandler) -> Result<()>;

    /// Pause every request and let `handler` decide how it is resumed.
    ///
    /// If a paused request cannot be resumed the in-flight `goto` must fail
    /// with `Error::InterceptionError`.
    async fn set_request_interception(&self, handler: OnRequestHandler) -> Result<()>;

    /// Navigate and wait for `wait_until`. Times out with `Error::Timeout`.
    async fn goto(&self, url: &str, wait_until: WaitUntil, timeout: Duration) -> Result<NavigationResponse>;

    /// Serialized HTML of the current document
    async fn content(&self) -> Result<String>;

    /// Number of elements matching `selector` with a non-empty bounding box
    async fn count_visible(&self, selector: &str) -> Result<usize>;

    /// Rendered text of the first element matching `selector`
    async fn inner_text(&self, selector: &str) -> Result<Option<String>>;

    async fn paint_timings(&self) -> Result<PaintTimings>;

    async fn close(&self) -> Result<()>;
}

/// Lower-case header names so lookups do not depend on server casing
pub fn normalize_headers<'a, I>(headers: I) -> Headers
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    headers
        .into_iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_only_set_fields() {
        let req = InterceptedRequest {
            url: "http://h/a".into(),
            method: "GET".into(),
            headers: normalize_headers([("Accept", "text/html")]),
            post_data: None,
        };
        let sent = RequestOverrides { method: Some("POST".into()), ..Default::default() }.apply(&req);
        assert_eq!(sent.method, "POST");
        assert_eq!(sent.headers.get("accept").map(String::as_str), Some("text/html"));
        assert!(sent.post_data.is_none());
    }

    #[test]
    fn console_levels_parse_cdp_and_js_names() {
        assert_eq!(ConsoleLevel::from("warning"), ConsoleLevel::Warning);
        assert_eq!(ConsoleLevel::from("warn"), ConsoleLevel::Warning);
        assert_eq!(ConsoleLevel::from("table"), ConsoleLevel::Other);
    }
}
