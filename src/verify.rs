//! Turning session facts into per-check outcomes
//!
//! Only checks present in the `CheckSpec` produce an outcome. A check whose
//! data is missing (no redirect, no coverage report, no paint entry) fails
//! with a message saying what was missing instead of passing silently.

use crate::check::{ElementAssertion, StatusCheck};
use crate::driver::PageDriver;
use crate::session::PageTestSession;
use crate::{Error, Headers};
use log::info;

/// Result of one check
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Passed,
    Failed(String),
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    /// Human-readable description of the check
    pub name: String,
    pub outcome: Outcome,
}

impl CheckOutcome {
    fn new(name: impl Into<String>, outcome: Outcome) -> Self {
        Self { name: name.into(), outcome }
    }

    fn from_result(name: impl Into<String>, result: std::result::Result<(), String>) -> Self {
        let outcome = match result {
            Ok(()) => Outcome::Passed,
            Err(reason) => Outcome::Failed(reason),
        };
        Self::new(name, outcome)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, Outcome::Failed(_))
    }
}

fn describe(e: Error) -> String {
    e.to_string()
}

/// Run every requested check against a ready session
pub async fn verify_session<P: PageDriver>(session: &PageTestSession<P>) -> Vec<CheckOutcome> {
    let check = session.check().clone();
    let mut outcomes = Vec::new();

    if let Some(status) = &check.status {
        outcomes.push(verify_status(session, status));
    }

    if let Some(max) = check.page_errors {
        let result = session.page_errors().map_err(describe).and_then(|errors| {
            if !errors.is_empty() {
                info!("errors in console for {}: {:?}", session.url(), errors);
            }
            if errors.len() <= max {
                Ok(())
            } else {
                let messages: Vec<_> = errors.iter().map(|e| e.message.as_str()).collect();
                Err(format!("{} page errors: {}", errors.len(), messages.join("; ")))
            }
        });
        outcomes.push(CheckOutcome::from_result(format!("should have no more than {} page errors", max), result));
    }

    if let Some(content) = &check.content {
        let result = match session.page() {
            Ok(page) => match page.content().await {
                Ok(html) if content.evaluate(&html) => Ok(()),
                Ok(_) => Err(format!("content check failed: {}", content.description())),
                Err(e) => Err(describe(e)),
            },
            Err(e) => Err(describe(e)),
        };
        outcomes.push(CheckOutcome::from_result("should validate content", result));
    }

    for (selector, assertion) in check.elements.iter().flatten() {
        outcomes.push(verify_element(session, selector, assertion).await);
    }

    if check.wants_cache_headers() {
        let result = match session.headers() {
            Ok(Some(headers)) => verify_cache_headers(headers, session.url()),
            Ok(None) => Err(format!("no response headers recorded for {}", session.url())),
            Err(e) => Err(describe(e)),
        };
        outcomes.push(CheckOutcome::from_result("should specify sensible cache headers", result));
    }

    for (suffix, threshold) in check.css_coverage.iter().flatten() {
        let result = match session.coverage_for(suffix) {
            Ok(Some(pct)) => {
                info!("CSS coverage for {}: {}%", suffix, pct);
                if pct >= *threshold {
                    Ok(())
                } else {
                    Err(format!("only {}% of the CSS in {} is used", pct, suffix))
                }
            }
            Ok(None) => Err(format!("No coverage report found for URL that includes: {}", suffix)),
            Err(e) => Err(describe(e)),
        };
        outcomes.push(CheckOutcome::from_result(
            format!("should be using at least {}% of the CSS in {}", threshold, suffix),
            result,
        ));
    }

    if let Some(budget) = check.performance {
        let threshold = budget.threshold_ms() as f64;
        let result = match session.page() {
            Ok(page) => match page.paint_timings().await {
                Ok(paints) => {
                    info!(
                        "paint timings for {}: first-paint {:?}ms, first-contentful-paint {:?}ms",
                        session.url(),
                        paints.first_paint,
                        paints.first_contentful_paint
                    );
                    within_budget("first-paint", paints.first_paint, threshold)
                        .and(within_budget("first-contentful-paint", paints.first_contentful_paint, threshold))
                }
                Err(e) => Err(describe(e)),
            },
            Err(e) => Err(describe(e)),
        };
        outcomes.push(CheckOutcome::from_result(
            format!("should meet performance baselines - firstContentfulPaint should be < {}ms", budget.threshold_ms()),
            result,
        ));
    }

    outcomes
}

fn verify_status<P: PageDriver>(session: &PageTestSession<P>, status: &StatusCheck) -> CheckOutcome {
    match status {
        StatusCheck::NoContent => {
            CheckOutcome::new("should return 204", Outcome::Skipped("204 status checks are not supported yet".into()))
        }
        StatusCheck::RedirectTarget(target) => {
            let result = match session.redirect() {
                Ok(Some(r)) if r.to == *target => Ok(()),
                Ok(Some(r)) => Err(format!("expected a redirect to {} but got {} to {}", target, r.code, r.to)),
                Ok(None) => Err(format!("no redirect observed for {}", session.url())),
                Err(e) => Err(describe(e)),
            };
            CheckOutcome::from_result(format!("should redirect to {}", target), result)
        }
        StatusCheck::ExactCode(expected) => {
            let result = match session.status() {
                Ok(actual) if actual == *expected => Ok(()),
                Ok(actual) => Err(format!("expected status {} but got {}", expected, actual)),
                Err(e) => Err(describe(e)),
            };
            CheckOutcome::from_result(format!("should return {}", expected), result)
        }
    }
}

async fn verify_element<P: PageDriver>(
    session: &PageTestSession<P>,
    selector: &str,
    assertion: &ElementAssertion,
) -> CheckOutcome {
    let page = match session.page() {
        Ok(page) => page,
        Err(e) => return CheckOutcome::new(format!("elements matching {}", selector), Outcome::Failed(describe(e))),
    };
    match assertion {
        ElementAssertion::Count(expected) => {
            let result = match page.count_visible(selector).await {
                Ok(count) if count == *expected => Ok(()),
                Ok(count) => Err(format!("found {} visible elements", count)),
                Err(e) => Err(describe(e)),
            };
            CheckOutcome::from_result(
                format!("should have {} visible elements matching selector {}", expected, selector),
                result,
            )
        }
        ElementAssertion::Text(expected) => {
            let result = match page.inner_text(selector).await {
                Ok(Some(text)) if text.contains(expected.as_str()) => Ok(()),
                Ok(Some(text)) => Err(format!("element text was {:?}", text)),
                Ok(None) => Err(format!("no element matches {}", selector)),
                Err(e) => Err(describe(e)),
            };
            CheckOutcome::from_result(
                format!("element with selector {} should contain text {}", selector, expected),
                result,
            )
        }
    }
}

fn within_budget(name: &str, value: Option<f64>, threshold: f64) -> std::result::Result<(), String> {
    match value {
        Some(ms) if ms < threshold => Ok(()),
        Some(ms) => Err(format!("{} took {}ms", name, ms)),
        None => Err(format!("no {} entry was recorded", name)),
    }
}

/// Check that a response's caching headers are present and self-consistent.
///
/// Requires a `Cache-Control` header whose `max-age`/`s-maxage` values are
/// integers, and rejects a positive lifetime combined with `no-store` or
/// `no-cache`, or a positive `s-maxage` combined with `private`.
pub fn verify_cache_headers(headers: &Headers, url: &str) -> std::result::Result<(), String> {
    let value = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("cache-control"))
        .map(|(_, v)| v.as_str())
        .ok_or_else(|| format!("{} does not set a Cache-Control header", url))?;

    let mut max_age = 0u64;
    let mut s_maxage = 0u64;
    let mut no_store = false;
    let mut no_cache = false;
    let mut private = false;

    for directive in value.split(',').map(str::trim).filter(|d| !d.is_empty()) {
        let (name, arg) = match directive.split_once('=') {
            Some((n, a)) => (n.trim().to_ascii_lowercase(), Some(a.trim().trim_matches('"'))),
            None => (directive.to_ascii_lowercase(), None),
        };
        let seconds = |arg: Option<&str>| {
            arg.and_then(|a| a.parse::<u64>().ok())
                .ok_or_else(|| format!("{}: {} in Cache-Control '{}' is not a number of seconds", url, name, value))
        };
        match name.as_str() {
            "max-age" => max_age = seconds(arg)?,
            "s-maxage" => s_maxage = seconds(arg)?,
            "no-store" => no_store = true,
            "no-cache" => no_cache = true,
            "private" => private = true,
            _ => {}
        }
    }

    if (max_age > 0 || s_maxage > 0) && (no_store || no_cache) {
        return Err(format!("{}: Cache-Control '{}' sets a lifetime but forbids caching", url, value));
    }
    if private && s_maxage > 0 {
        return Err(format!("{}: Cache-Control '{}' is private but sets s-maxage", url, value));
    }
    Ok(())
}
