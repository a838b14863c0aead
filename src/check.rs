//! Declarative checks requested for one URL
//!
//! A `CheckSpec` only carries the checks that were asked for: an absent field
//! means the check is skipped, never that it runs with a default.

use crate::{viewport, Headers, Result};
use std::fmt;
use std::sync::Arc;

/// Status codes a response is treated as a redirect for
pub const REDIRECT_CODES: [u16; 5] = [301, 302, 303, 307, 308];

/// Paint budget used when `performance` is requested without a number
pub const DEFAULT_PAINT_BUDGET_MS: u64 = 2000;

pub fn is_redirect_code(code: u16) -> bool {
    REDIRECT_CODES.contains(&code)
}

/// What the status check expects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusCheck {
    /// The response (or, for redirect codes, the redirect) must carry this code
    ExactCode(u16),
    /// The tested URL must redirect to exactly this location
    RedirectTarget(String),
    /// 204: no page is loaded or evaluated
    NoContent,
}

impl StatusCheck {
    pub fn from_code(code: u16) -> Self {
        if code == 204 {
            StatusCheck::NoContent
        } else {
            StatusCheck::ExactCode(code)
        }
    }

    /// Whether the expected value is itself a redirect code
    pub fn expects_redirect_code(&self) -> bool {
        matches!(self, StatusCheck::ExactCode(code) if is_redirect_code(*code))
    }
}

impl fmt::Display for StatusCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusCheck::ExactCode(code) => write!(f, "{}", code),
            StatusCheck::RedirectTarget(to) => write!(f, "redirect to {}", to),
            StatusCheck::NoContent => f.write_str("204"),
        }
    }
}

/// Assertion on the elements matching one selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementAssertion {
    /// Exactly this many visible elements
    Count(usize),
    /// The first match's text contains this string
    Text(String),
}

type ContentPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Predicate over the page's serialized HTML
#[derive(Clone)]
pub struct ContentCheck {
    description: String,
    predicate: ContentPredicate,
}

impl ContentCheck {
    /// Passes when the HTML contains `needle`
    pub fn contains(needle: impl Into<String>) -> Self {
        let needle = needle.into();
        let description = format!("contains {:?}", needle);
        Self {
            description,
            predicate: Arc::new(move |html: &str| html.contains(&needle)),
        }
    }

    pub fn predicate<F>(description: impl Into<String>, f: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self { description: description.into(), predicate: Arc::new(f) }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn evaluate(&self, html: &str) -> bool {
        (self.predicate)(html)
    }
}

impl fmt::Debug for ContentCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentCheck").field("description", &self.description).finish()
    }
}

/// Paint-timing budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceBudget {
    /// `performance: true`
    Default,
    Threshold(u64),
}

impl PerformanceBudget {
    pub fn threshold_ms(&self) -> u64 {
        match self {
            PerformanceBudget::Default => DEFAULT_PAINT_BUDGET_MS,
            PerformanceBudget::Threshold(ms) => *ms,
        }
    }
}

/// The set of checks requested for one URL. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct CheckSpec {
    pub status: Option<StatusCheck>,
    /// Asset URL suffix to minimum usage percentage, in config order
    pub css_coverage: Option<Vec<(String, f64)>>,
    /// Maximum number of uncaught page errors
    pub page_errors: Option<usize>,
    pub cache_headers: Option<bool>,
    pub content: Option<ContentCheck>,
    /// Selector to assertion, in config order
    pub elements: Option<Vec<(String, ElementAssertion)>>,
    pub performance: Option<PerformanceBudget>,
}

impl CheckSpec {
    /// Shorthand used for bare integers in the config
    pub fn status(code: u16) -> Self {
        Self { status: Some(StatusCheck::from_code(code)), ..Default::default() }
    }

    pub fn redirects_to(target: impl Into<String>) -> Self {
        Self { status: Some(StatusCheck::RedirectTarget(target.into())), ..Default::default() }
    }

    pub fn with_css_coverage(mut self, suffix: impl Into<String>, threshold: f64) -> Self {
        self.css_coverage.get_or_insert_with(Vec::new).push((suffix.into(), threshold));
        self
    }

    pub fn with_page_errors(mut self, max: usize) -> Self {
        self.page_errors = Some(max);
        self
    }

    pub fn with_cache_headers(mut self) -> Self {
        self.cache_headers = Some(true);
        self
    }

    pub fn with_content(mut self, content: ContentCheck) -> Self {
        self.content = Some(content);
        self
    }

    pub fn with_element(mut self, selector: impl Into<String>, assertion: ElementAssertion) -> Self {
        self.elements.get_or_insert_with(Vec::new).push((selector.into(), assertion));
        self
    }

    pub fn with_performance(mut self, budget: PerformanceBudget) -> Self {
        self.performance = Some(budget);
        self
    }

    pub fn is_no_content(&self) -> bool {
        matches!(self.status, Some(StatusCheck::NoContent))
    }

    /// CSS capture is bracketed around navigation only for coverage checks
    pub fn wants_css_coverage(&self) -> bool {
        self.css_coverage.is_some()
    }

    /// Coverage and page-error checks need every resource to settle
    pub fn wants_full_load(&self) -> bool {
        self.css_coverage.is_some() || self.page_errors.is_some()
    }

    pub fn wants_cache_headers(&self) -> bool {
        self.cache_headers == Some(true)
    }

    /// Number of outcomes verification produces for these checks
    pub fn check_count(&self) -> usize {
        usize::from(self.status.is_some())
            + usize::from(self.page_errors.is_some())
            + usize::from(self.content.is_some())
            + self.elements.as_ref().map_or(0, Vec::len)
            + usize::from(self.wants_cache_headers())
            + self.css_coverage.as_ref().map_or(0, Vec::len)
            + usize::from(self.performance.is_some())
    }
}

/// Body sent with an overridden request
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Text(String),
    Json(serde_json::Value),
}

impl RequestBody {
    /// Strings are sent as-is, anything else is serialized as JSON
    pub fn to_post_data(&self) -> Result<String> {
        match self {
            RequestBody::Text(s) => Ok(s.clone()),
            RequestBody::Json(serde_json::Value::String(s)) => Ok(s.clone()),
            RequestBody::Json(v) => Ok(serde_json::to_string(v)?),
        }
    }
}

/// How the page request is issued
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOptions {
    pub headers: Option<Headers>,
    pub method: String,
    pub body: Option<RequestBody>,
    pub breakpoint: String,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            headers: None,
            method: "GET".to_string(),
            body: None,
            breakpoint: viewport::DEFAULT_BREAKPOINT.to_string(),
        }
    }
}

impl RequestOptions {
    /// Interception is only engaged for non-GET requests or when a body is set
    pub fn needs_interception(&self) -> bool {
        !self.method.eq_ignore_ascii_case("GET") || self.body.is_some()
    }
}
