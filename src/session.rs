//! Per-URL page session
//!
//! A `PageTestSession` owns one page for one URL. `init` opens the page, wires
//! every listener, navigates and records what happened. Afterwards the session
//! only answers queries, until `close` releases the page.
//!
//! # Example
//!
//! ```no_run
//! use rfsmoke::driver::scripted::{ScriptedBrowser, ScriptedRoute, ScriptedSite};
//! use rfsmoke::{CheckSpec, PageTestSession, RequestOptions};
//!
//! # async fn run() -> rfsmoke::Result<()> {
//! let site = ScriptedSite::new("http://localhost:3002")
//!     .route("/old", ScriptedRoute::redirect(301, "/new"))
//!     .route("/new", ScriptedRoute::html("<h1>new</h1>"));
//! let browser = ScriptedBrowser::new(site);
//!
//! let mut session = PageTestSession::new("http://localhost:3002/old", RequestOptions::default(), CheckSpec::status(301));
//! session.init(&browser).await?;
//! assert_eq!(session.status()?, 301);
//! assert_eq!(session.redirect()?.map(|r| r.to), Some("/new".to_string()));
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

use crate::check::{CheckSpec, RequestOptions, StatusCheck};
use crate::coverage::{CoverageRecorder, CoverageReport};
use crate::driver::{
    BrowserDriver, ConsoleMessage, InterceptedRequest, NavigationResponse, PageDriver, PageError, ResponseEvent,
    WaitUntil,
};
use crate::events::EventCollector;
use crate::intercept::RequestOverrideInterceptor;
use crate::redirect::{RedirectRecord, RedirectTracker};
use crate::viewport::{self, ViewportProfile};
use crate::{Error, Headers, Result};
use log::debug;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_NAVIGATION_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Initializing,
    /// Navigation (or the 204 short-circuit) completed
    Ready,
    /// `init` returned an error; the page may still need closing
    Failed,
    Closed,
}

/// Browser page under test for exactly one URL
pub struct PageTestSession<P: PageDriver> {
    url: String,
    options: RequestOptions,
    check: CheckSpec,
    viewport: ViewportProfile,
    navigation_timeout: Duration,
    state: SessionState,
    page: Option<P>,
    events: Arc<EventCollector>,
    redirects: Arc<RedirectTracker>,
    coverage: CoverageRecorder,
    response: Option<NavigationResponse>,
}

impl<P: PageDriver> PageTestSession<P> {
    pub fn new(url: impl Into<String>, options: RequestOptions, check: CheckSpec) -> Self {
        let viewport = viewport::resolve(Some(options.breakpoint.as_str()));
        Self {
            url: url.into(),
            options,
            check,
            viewport,
            navigation_timeout: DEFAULT_NAVIGATION_TIMEOUT,
            state: SessionState::Created,
            page: None,
            events: Arc::new(EventCollector::new()),
            redirects: Arc::new(RedirectTracker::new()),
            coverage: CoverageRecorder::new(),
            response: None,
        }
    }

    pub fn with_navigation_timeout(mut self, timeout: Duration) -> Self {
        self.navigation_timeout = timeout;
        self
    }

    /// Open a page in `browser` and load the URL.
    ///
    /// Errors are fatal to this session only. The page, if it was opened, is
    /// kept so that `close` can release it.
    pub async fn init<B>(&mut self, browser: &B) -> Result<()>
    where
        B: BrowserDriver<Page = P>,
    {
        if self.state != SessionState::Created {
            return Err(Error::InitializationError(format!(
                "session for '{}' was already initialized ({:?})",
                self.url, self.state
            )));
        }
        self.state = SessionState::Initializing;

        let page = match browser.new_page().await {
            Ok(page) => page,
            Err(e) => {
                self.state = SessionState::Failed;
                return Err(e);
            }
        };
        let result = self.prepare(&page).await;
        self.page = Some(page);

        match result {
            Ok(()) => {
                self.state = SessionState::Ready;
                debug!("session ready for {}", self.url);
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Failed;
                debug!("session for {} failed: {}", self.url, e);
                Err(e)
            }
        }
    }

    async fn prepare(&mut self, page: &P) -> Result<()> {
        if self.check.is_no_content() {
            debug!("204 check for {}: not loading the page", self.url);
            return Ok(());
        }

        page.set_viewport(&self.viewport).await?;

        if self.check.wants_css_coverage() {
            self.coverage.start(page).await?;
        }

        if let Some(headers) = &self.options.headers {
            page.set_extra_http_headers(headers).await?;
        }

        let listeners = Listeners {
            events: self.events.clone(),
            redirects: self.redirects.clone(),
            interceptor: RequestOverrideInterceptor::for_options(&self.options)?,
        };
        let wired = PageWiring::new(page).attach(listeners).await?;

        let wait_until = if self.check.wants_full_load() {
            WaitUntil::Load
        } else {
            WaitUntil::DomContentLoaded
        };
        debug!("navigating to {} ({} {:?})", self.url, self.options.method, wait_until);
        let response = wired.navigate(&self.url, wait_until, self.navigation_timeout).await?;
        self.response = Some(response);

        self.coverage.stop(page).await?;
        Ok(())
    }

    /// Release the page. Queries fail with `SessionClosed` afterwards.
    pub async fn close(&mut self) -> Result<()> {
        self.state = SessionState::Closed;
        match self.page.take() {
            Some(page) => page.close().await,
            None => Ok(()),
        }
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state {
            SessionState::Ready => Ok(()),
            SessionState::Closed => Err(Error::SessionClosed(self.url.clone())),
            _ => Err(Error::NotReady(self.url.clone())),
        }
    }

    /// Status of the tested URL.
    ///
    /// When the expected status is itself a redirect code this is the code the
    /// URL redirected with, not the status of the page the browser ended on.
    pub fn status(&self) -> Result<u16> {
        self.ensure_ready()?;
        if self.check.status.as_ref().is_some_and(StatusCheck::expects_redirect_code) {
            return self
                .redirects
                .lookup(&self.url)
                .map(|r| r.code)
                .ok_or_else(|| Error::MissingData(format!("no redirect observed for '{}'", self.url)));
        }
        self.response
            .as_ref()
            .map(|r| r.status)
            .ok_or_else(|| Error::MissingData(format!("no response recorded for '{}'", self.url)))
    }

    /// Redirect recorded for the tested URL, `None` when it did not redirect
    pub fn redirect(&self) -> Result<Option<RedirectRecord>> {
        self.ensure_ready()?;
        Ok(self.redirects.lookup(&self.url))
    }

    /// CSS usage percentage of the stylesheet whose URL ends with `suffix`,
    /// `None` when no stylesheet matches
    pub fn coverage_for(&self, suffix: &str) -> Result<Option<f64>> {
        self.ensure_ready()?;
        Ok(self.coverage.usage_for(suffix))
    }

    pub fn coverage_reports(&self) -> Result<&[CoverageReport]> {
        self.ensure_ready()?;
        Ok(self.coverage.reports())
    }

    /// Uncaught page errors so far, in arrival order
    pub fn page_errors(&self) -> Result<Vec<PageError>> {
        self.ensure_ready()?;
        Ok(self.events.page_errors())
    }

    /// Console messages so far, in arrival order
    pub fn console_messages(&self) -> Result<Vec<ConsoleMessage>> {
        self.ensure_ready()?;
        Ok(self.events.console_messages())
    }

    /// Headers of the navigation response, `None` for a 204 check
    pub fn headers(&self) -> Result<Option<&Headers>> {
        self.ensure_ready()?;
        Ok(self.response.as_ref().map(|r| &r.headers))
    }

    pub fn response(&self) -> Result<Option<&NavigationResponse>> {
        self.ensure_ready()?;
        Ok(self.response.as_ref())
    }

    /// Live page for ad-hoc DOM queries
    pub fn page(&self) -> Result<&P> {
        self.ensure_ready()?;
        self.page.as_ref().ok_or_else(|| Error::SessionClosed(self.url.clone()))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn check(&self) -> &CheckSpec {
        &self.check
    }

    pub fn options(&self) -> &RequestOptions {
        &self.options
    }

    pub fn viewport(&self) -> ViewportProfile {
        self.viewport
    }

    pub fn state(&self) -> SessionState {
        self.state
    }
}

struct Listeners {
    events: Arc<EventCollector>,
    redirects: Arc<RedirectTracker>,
    interceptor: Option<RequestOverrideInterceptor>,
}

/// A page whose listeners are not attached yet. Navigation is only reachable
/// through `attach`, so no event can fire before its handler exists.
struct PageWiring<'p, P: PageDriver> {
    page: &'p P,
}

struct WiredPage<'p, P: PageDriver> {
    page: &'p P,
}

impl<'p, P: PageDriver> PageWiring<'p, P> {
    fn new(page: &'p P) -> Self {
        Self { page }
    }

    async fn attach(self, listeners: Listeners) -> Result<WiredPage<'p, P>> {
        let Listeners { events, redirects, interceptor } = listeners;

        let sink = events.clone();
        self.page
            .on_page_error(Arc::new(move |e: &PageError| sink.push_page_error(e.clone())))
            .await?;
        self.page
            .on_console(Arc::new(move |m: &ConsoleMessage| events.push_console(m.clone())))
            .await?;

        if let Some(interceptor) = interceptor {
            self.page
                .set_request_interception(Arc::new(move |r: &InterceptedRequest| interceptor.handle(r)))
                .await?;
        }

        self.page
            .on_response(Arc::new(move |r: &ResponseEvent| redirects.observe(r)))
            .await?;

        Ok(WiredPage { page: self.page })
    }
}

impl<'p, P: PageDriver> WiredPage<'p, P> {
    async fn navigate(self, url: &str, wait_until: WaitUntil, timeout: Duration) -> Result<NavigationResponse> {
        self.page.goto(url, wait_until, timeout).await
    }
}
