//! Deterministic in-memory browser
//!
//! `ScriptedBrowser` serves pages from a `ScriptedSite` route table instead of
//! the network. It follows redirects, passes requests through the interception
//! handler, emits console and page-error events and hands out stylesheet
//! coverage, so sessions can be exercised without Chrome. Every page keeps a
//! `PageRecord` of what was called on it and which requests were sent.

use super::{
    BrowserDriver, ConsoleLevel, ConsoleMessage, InterceptedRequest, NavigationResponse, OnConsoleHandler,
    OnPageErrorHandler, OnRequestHandler, OnResponseHandler, PageDriver, PageError, PaintTimings, RequestAction,
    ResponseEvent, WaitUntil,
};
use crate::check::is_redirect_code;
use crate::coverage::CoverageReport;
use crate::viewport::ViewportProfile;
use crate::{Error, Headers, Result};
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

const MAX_REDIRECTS: usize = 20;
const BLANK_DOCUMENT: &str = "<html><head></head><body></body></html>";

/// Canned response and page behavior for one path
#[derive(Debug, Clone)]
pub struct ScriptedRoute {
    pub status: u16,
    /// Lower-cased header names
    pub headers: Headers,
    pub body: String,
    pub console: Vec<ConsoleMessage>,
    pub page_errors: Vec<String>,
    /// Coverage reported for this page while CSS capture is active
    pub stylesheets: Vec<CoverageReport>,
    /// Paths requested by the page after the document arrives
    pub subresources: Vec<String>,
    pub paints: PaintTimings,
    /// Navigation never settles
    pub hang: bool,
    /// Resuming an intercepted request for this path fails
    pub fail_resume: bool,
}

impl ScriptedRoute {
    /// Empty response with `status`
    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: String::new(),
            console: Vec::new(),
            page_errors: Vec::new(),
            stylesheets: Vec::new(),
            subresources: Vec::new(),
            paints: PaintTimings::default(),
            hang: false,
            fail_resume: false,
        }
    }

    /// 200 text/html document
    pub fn html(body: impl Into<String>) -> Self {
        let mut route = Self::status(200).with_header("Content-Type", "text/html; charset=utf-8");
        route.body = body.into();
        route
    }

    pub fn redirect(status: u16, location: impl Into<String>) -> Self {
        Self::status(status).with_header("Location", location)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_console(mut self, level: ConsoleLevel, text: impl Into<String>) -> Self {
        self.console.push(ConsoleMessage::new(level, text));
        self
    }

    pub fn with_page_error(mut self, message: impl Into<String>) -> Self {
        self.page_errors.push(message.into());
        self
    }

    pub fn with_stylesheet(mut self, report: CoverageReport) -> Self {
        self.stylesheets.push(report);
        self
    }

    pub fn with_subresource(mut self, path: impl Into<String>) -> Self {
        self.subresources.push(path.into());
        self
    }

    pub fn with_paints(mut self, first_paint: f64, first_contentful_paint: f64) -> Self {
        self.paints = PaintTimings {
            first_paint: Some(first_paint),
            first_contentful_paint: Some(first_contentful_paint),
        };
        self
    }

    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn failing_resume(mut self) -> Self {
        self.fail_resume = true;
        self
    }
}

/// Route table for one origin. Unknown paths answer 404.
#[derive(Debug, Clone)]
pub struct ScriptedSite {
    origin: String,
    routes: HashMap<String, ScriptedRoute>,
}

impl ScriptedSite {
    pub fn new(origin: impl Into<String>) -> Self {
        Self { origin: origin.into(), routes: HashMap::new() }
    }

    /// Register `route` for `path` (optionally with a `?query`)
    pub fn route(mut self, path: impl Into<String>, route: ScriptedRoute) -> Self {
        self.routes.insert(path.into(), route);
        self
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    fn lookup(&self, url: &Url) -> Option<&ScriptedRoute> {
        if let Some(query) = url.query() {
            if let Some(route) = self.routes.get(&format!("{}?{}", url.path(), query)) {
                return Some(route);
            }
        }
        self.routes.get(url.path())
    }
}

/// Snapshot of what happened to one scripted page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageRecord {
    /// Driver calls in order, e.g. `on_console` or `goto:Load`
    pub calls: Vec<String>,
    /// Requests as they left the page, after interception
    pub sent_requests: Vec<InterceptedRequest>,
    pub viewport: Option<ViewportProfile>,
    pub extra_headers: Headers,
    pub closed: bool,
}

#[derive(Default)]
struct PageState {
    record: PageRecord,
    coverage_active: bool,
    coverage: Vec<CoverageReport>,
    document: Option<String>,
    paints: PaintTimings,
    on_page_error: Option<OnPageErrorHandler>,
    on_console: Option<OnConsoleHandler>,
    on_response: Option<OnResponseHandler>,
    on_request: Option<OnRequestHandler>,
}

/// Browser serving a `ScriptedSite`
pub struct ScriptedBrowser {
    site: Arc<ScriptedSite>,
    pages: Mutex<Vec<Arc<Mutex<PageState>>>>,
    closed: AtomicBool,
}

impl ScriptedBrowser {
    pub fn new(site: ScriptedSite) -> Self {
        Self { site: Arc::new(site), pages: Mutex::new(Vec::new()), closed: AtomicBool::new(false) }
    }

    pub fn pages_opened(&self) -> usize {
        self.pages.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Record of the `index`-th page opened
    pub fn page_record(&self, index: usize) -> Option<PageRecord> {
        let pages = self.pages.lock().unwrap_or_else(|e| e.into_inner());
        pages.get(index).map(|p| p.lock().unwrap_or_else(|e| e.into_inner()).record.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserDriver for ScriptedBrowser {
    type Page = ScriptedPage;

    async fn new_page(&self) -> Result<ScriptedPage> {
        if self.is_closed() {
            return Err(Error::InitializationError("browser is closed".into()));
        }
        let state = Arc::new(Mutex::new(PageState::default()));
        self.pages.lock().unwrap_or_else(|e| e.into_inner()).push(state.clone());
        Ok(ScriptedPage { site: self.site.clone(), state })
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// One page of a `ScriptedBrowser`
pub struct ScriptedPage {
    site: Arc<ScriptedSite>,
    state: Arc<Mutex<PageState>>,
}

impl ScriptedPage {
    fn lock(&self) -> std::sync::MutexGuard<'_, PageState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn call(&self, name: impl Into<String>) -> Result<()> {
        let mut g = self.lock();
        if g.record.closed {
            return Err(Error::ScriptError("page is closed".into()));
        }
        g.record.calls.push(name.into());
        Ok(())
    }

    pub fn record(&self) -> PageRecord {
        self.lock().record.clone()
    }

    fn emit_response(&self, response: &ResponseEvent) {
        let handler = self.lock().on_response.clone();
        if let Some(h) = handler {
            h(response);
        }
    }

    /// Run `request` through interception and log what was sent
    fn send(&self, request: InterceptedRequest, route: Option<&ScriptedRoute>) -> Result<InterceptedRequest> {
        let handler = self.lock().on_request.clone();
        let sent = match &handler {
            Some(h) => match h(&request) {
                RequestAction::Continue => request,
                RequestAction::ContinueWith(overrides) => overrides.apply(&request),
            },
            None => request,
        };
        if handler.is_some() && route.is_some_and(|r| r.fail_resume) {
            return Err(Error::InterceptionError { url: sent.url, reason: "scripted resume failure".into() });
        }
        self.lock().record.sent_requests.push(sent.clone());
        Ok(sent)
    }

    fn request(&self, url: &Url, method: &str, post_data: Option<String>) -> InterceptedRequest {
        InterceptedRequest {
            url: url.to_string(),
            method: method.to_string(),
            headers: self.lock().record.extra_headers.clone(),
            post_data,
        }
    }

    fn respond(&self, url: &Url, route: Option<&ScriptedRoute>) -> (u16, Headers) {
        let (status, headers) = route.map(|r| (r.status, r.headers.clone())).unwrap_or((404, Headers::new()));
        self.emit_response(&ResponseEvent { request_url: url.to_string(), status, headers: headers.clone() });
        (status, headers)
    }

    fn run_page(&self, url: &Url, route: &ScriptedRoute) -> Result<()> {
        let (on_console, on_page_error) = {
            let g = self.lock();
            (g.on_console.clone(), g.on_page_error.clone())
        };
        for message in &route.console {
            if let Some(h) = &on_console {
                h(message);
            }
        }
        for message in &route.page_errors {
            if let Some(h) = &on_page_error {
                h(&PageError::new(message.clone()));
            }
        }

        for path in &route.subresources {
            let sub_url = join(url, path)?;
            let sub_route = self.site.lookup(&sub_url);
            self.send(self.request(&sub_url, "GET", None), sub_route)?;
            self.respond(&sub_url, sub_route);
        }

        let mut g = self.lock();
        if g.coverage_active {
            g.coverage.extend(route.stylesheets.iter().cloned());
        }
        g.paints = route.paints;
        Ok(())
    }

    fn document(&self) -> String {
        self.lock().document.clone().unwrap_or_else(|| BLANK_DOCUMENT.to_string())
    }
}

fn join(base: &Url, location: &str) -> Result<Url> {
    base.join(location).map_err(|e| Error::NavigationError {
        url: base.to_string(),
        reason: format!("invalid location '{}': {}", location, e),
    })
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| Error::ScriptError(format!("invalid selector '{}': {:?}", selector, e)))
}

fn is_hidden(el: &ElementRef<'_>) -> bool {
    let e = el.value();
    e.attr("hidden").is_some()
        || e
            .attr("style")
            .map(|s| s.replace(' ', "").to_ascii_lowercase().contains("display:none"))
            .unwrap_or(false)
}

fn count_visible_in(html: &str, selector: &str) -> Result<usize> {
    let selector = parse_selector(selector)?;
    let doc = Html::parse_document(html);
    let count = doc
        .select(&selector)
        .filter(|el| !is_hidden(el) && !el.ancestors().filter_map(ElementRef::wrap).any(|a| is_hidden(&a)))
        .count();
    Ok(count)
}

fn inner_text_in(html: &str, selector: &str) -> Result<Option<String>> {
    let selector = parse_selector(selector)?;
    let doc = Html::parse_document(html);
    let text = doc
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string());
    Ok(text)
}

#[async_trait]
impl PageDriver for ScriptedPage {
    async fn set_viewport(&self, viewport: &ViewportProfile) -> Result<()> {
        self.call("set_viewport")?;
        self.lock().record.viewport = Some(*viewport);
        Ok(())
    }

    async fn set_extra_http_headers(&self, headers: &Headers) -> Result<()> {
        self.call("set_extra_http_headers")?;
        self.lock().record.extra_headers = headers.clone();
        Ok(())
    }

    async fn start_css_coverage(&self) -> Result<()> {
        self.call("start_css_coverage")?;
        let mut g = self.lock();
        g.coverage_active = true;
        g.coverage.clear();
        Ok(())
    }

    async fn stop_css_coverage(&self) -> Result<Vec<CoverageReport>> {
        self.call("stop_css_coverage")?;
        let mut g = self.lock();
        if !g.coverage_active {
            return Err(Error::ScriptError("CSS coverage is not enabled".into()));
        }
        g.coverage_active = false;
        Ok(std::mem::take(&mut g.coverage))
    }

    async fn on_page_error(&self, handler: OnPageErrorHandler) -> Result<()> {
        self.call("on_page_error")?;
        self.lock().on_page_error = Some(handler);
        Ok(())
    }

    async fn on_console(&self, handler: OnConsoleHandler) -> Result<()> {
        self.call("on_console")?;
        self.lock().on_console = Some(handler);
        Ok(())
    }

    async fn on_response(&self, handler: OnResponseHandler) -> Result<()> {
        self.call("on_response")?;
        self.lock().on_response = Some(handler);
        Ok(())
    }

    async fn set_request_interception(&self, handler: OnRequestHandler) -> Result<()> {
        self.call("set_request_interception")?;
        self.lock().on_request = Some(handler);
        Ok(())
    }

    async fn goto(&self, url: &str, wait_until: WaitUntil, timeout: Duration) -> Result<NavigationResponse> {
        self.call(format!("goto:{:?}", wait_until))?;
        let mut current = Url::parse(url)
            .map_err(|e| Error::NavigationError { url: url.to_string(), reason: e.to_string() })?;
        let mut method = "GET".to_string();
        let mut post_data = None;

        for _ in 0..=MAX_REDIRECTS {
            let route = self.site.lookup(&current);
            let sent = self.send(self.request(&current, &method, post_data.take()), route)?;
            let (status, headers) = self.respond(&current, route);

            if is_redirect_code(status) {
                if let Some(location) = headers.get("location") {
                    // 307/308 replay the request, the others switch to GET
                    if matches!(status, 307 | 308) {
                        method = sent.method;
                        post_data = sent.post_data;
                    } else {
                        method = "GET".to_string();
                    }
                    current = join(&current, location)?;
                    continue;
                }
            }

            if let Some(route) = route {
                if route.hang {
                    return Err(Error::Timeout(timeout.as_millis() as u64));
                }
                self.run_page(&current, route)?;
                self.lock().document = Some(route.body.clone());
            } else {
                self.lock().document = Some(BLANK_DOCUMENT.to_string());
            }

            return Ok(NavigationResponse { url: current.to_string(), status, headers });
        }

        Err(Error::NavigationError { url: url.to_string(), reason: "too many redirects".into() })
    }

    async fn content(&self) -> Result<String> {
        self.call("content")?;
        Ok(self.document())
    }

    async fn count_visible(&self, selector: &str) -> Result<usize> {
        self.call("count_visible")?;
        count_visible_in(&self.document(), selector)
    }

    async fn inner_text(&self, selector: &str) -> Result<Option<String>> {
        self.call("inner_text")?;
        inner_text_in(&self.document(), selector)
    }

    async fn paint_timings(&self) -> Result<PaintTimings> {
        self.call("paint_timings")?;
        Ok(self.lock().paints)
    }

    async fn close(&self) -> Result<()> {
        self.call("close")?;
        self.lock().record.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visibility_respects_hidden_and_display_none() {
        let html = r#"<ul>
            <li class="item">a</li>
            <li class="item" hidden>b</li>
            <li class="item" style="display: none">c</li>
            <div style="display:none"><li class="item">d</li></div>
            <li class="item">e</li>
        </ul>"#;
        assert_eq!(count_visible_in(html, ".item").unwrap(), 2);
        assert_eq!(count_visible_in(html, ".missing").unwrap(), 0);
    }

    #[test]
    fn inner_text_of_first_match() {
        let html = "<h1> Hello <b>there</b> </h1><h1>second</h1>";
        assert_eq!(inner_text_in(html, "h1").unwrap().as_deref(), Some("Hello there"));
        assert_eq!(inner_text_in(html, "h2").unwrap(), None);
    }

    #[test]
    fn invalid_selectors_are_script_errors() {
        assert!(matches!(count_visible_in("<p></p>", "p[["), Err(Error::ScriptError(_))));
    }

    #[test]
    fn routes_match_query_before_path() {
        let site = ScriptedSite::new("http://h")
            .route("/a?x=1", ScriptedRoute::status(201))
            .route("/a", ScriptedRoute::status(200));
        let with_query = Url::parse("http://h/a?x=1").unwrap();
        let other_query = Url::parse("http://h/a?x=2").unwrap();
        assert_eq!(site.lookup(&with_query).map(|r| r.status), Some(201));
        assert_eq!(site.lookup(&other_query).map(|r| r.status), Some(200));
        assert!(site.lookup(&Url::parse("http://h/b").unwrap()).is_none());
    }

    #[tokio::test]
    async fn goto_follows_redirects_and_reports_each_hop() {
        let site = ScriptedSite::new("http://h")
            .route("/one", ScriptedRoute::redirect(302, "/two"))
            .route("/two", ScriptedRoute::redirect(301, "http://h/three"))
            .route("/three", ScriptedRoute::html("<p>done</p>"));
        let browser = ScriptedBrowser::new(site);
        let page = browser.new_page().await.unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        page.on_response(Arc::new(move |r: &ResponseEvent| sink.lock().unwrap().push((r.request_url.clone(), r.status))))
            .await
            .unwrap();
        let resp = page.goto("http://h/one", WaitUntil::DomContentLoaded, Duration::from_secs(1)).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.url, "http://h/three");
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("http://h/one".to_string(), 302), ("http://h/two".to_string(), 301), ("http://h/three".to_string(), 200)]
        );
    }

    #[tokio::test]
    async fn redirect_loops_fail_navigation() {
        let site = ScriptedSite::new("http://h").route("/loop", ScriptedRoute::redirect(302, "/loop"));
        let browser = ScriptedBrowser::new(site);
        let page = browser.new_page().await.unwrap();
        let err = page.goto("http://h/loop", WaitUntil::Load, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, Error::NavigationError { .. }));
    }

    #[tokio::test]
    async fn closed_browser_opens_no_pages() {
        let browser = ScriptedBrowser::new(ScriptedSite::new("http://h"));
        browser.close().await.unwrap();
        assert!(browser.new_page().await.is_err());
    }
}
