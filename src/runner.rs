//! Running suites of URL targets against one browser
//!
//! Each target gets its own session. A failure while opening or loading one
//! URL is recorded on that URL's report and the run moves on; the page is
//! closed whatever happened.

use crate::config::{Suite, UrlTarget};
use crate::driver::BrowserDriver;
use crate::session::PageTestSession;
use crate::verify::{verify_session, CheckOutcome, Outcome};
use crate::HarnessConfig;
use futures::stream::{self, StreamExt};
use log::{error, info, warn};

/// What happened for one URL
#[derive(Debug, Clone, PartialEq)]
pub struct UrlReport {
    pub url: String,
    pub outcomes: Vec<CheckOutcome>,
    /// Set when the session could not be initialized; no checks ran
    pub error: Option<String>,
    /// Checks configured for the URL
    pub checks: usize,
}

impl UrlReport {
    /// Failed checks. A session that never became ready fails every
    /// configured check, and at least one.
    pub fn failures(&self) -> usize {
        if self.error.is_some() {
            return self.checks.max(1);
        }
        self.outcomes.iter().filter(|o| o.is_failure()).count()
    }

    pub fn passed(&self) -> bool {
        self.failures() == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub reports: Vec<UrlReport>,
}

impl RunSummary {
    pub fn failures(&self) -> usize {
        self.reports.iter().map(UrlReport::failures).sum()
    }

    pub fn passed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Passed))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Skipped(_)))
    }

    fn count(&self, f: impl Fn(&Outcome) -> bool) -> usize {
        self.reports
            .iter()
            .flat_map(|r| r.outcomes.iter())
            .filter(|o| f(&o.outcome))
            .count()
    }

    pub fn report_for(&self, url: &str) -> Option<&UrlReport> {
        self.reports.iter().find(|r| r.url == url)
    }
}

/// Drives sessions for every target with bounded concurrency
pub struct Runner<'a, B: BrowserDriver> {
    harness: &'a HarnessConfig,
    browser: &'a B,
}

impl<'a, B: BrowserDriver> Runner<'a, B> {
    pub fn new(harness: &'a HarnessConfig, browser: &'a B) -> Self {
        Self { harness, browser }
    }

    /// Run every target of every suite. Reports keep configuration order.
    pub async fn run(&self, suites: &[Suite]) -> RunSummary {
        let targets: Vec<&UrlTarget> = suites.iter().flat_map(|s| s.targets.iter()).collect();
        info!("running {} URL checks against {}", targets.len(), self.harness.host);

        let reports = stream::iter(targets.into_iter().map(|t| self.run_target(t)))
            .buffered(self.harness.concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        let summary = RunSummary { reports };
        info!(
            "{} passed, {} failed, {} skipped",
            summary.passed(),
            summary.failures(),
            summary.skipped()
        );
        summary
    }

    pub async fn run_target(&self, target: &UrlTarget) -> UrlReport {
        let url = target.url(self.harness);
        let mut session: PageTestSession<B::Page> =
            PageTestSession::new(url.clone(), target.options.clone(), target.check.clone())
                .with_navigation_timeout(self.harness.navigation_timeout());

        let checks = target.check.check_count();
        let report = match session.init(self.browser).await {
            Ok(()) => UrlReport { url: url.clone(), outcomes: verify_session(&session).await, error: None, checks },
            Err(e) => {
                if e.is_session_failure() {
                    error!("{}: {}", url, e);
                } else {
                    error!("{}: browser unavailable: {}", url, e);
                }
                UrlReport { url: url.clone(), outcomes: Vec::new(), error: Some(e.to_string()), checks }
            }
        };

        if let Err(e) = session.close().await {
            warn!("failed to close page for {}: {}", url, e);
        }

        for outcome in &report.outcomes {
            match &outcome.outcome {
                Outcome::Passed => info!("  ok   {} {}", url, outcome.name),
                Outcome::Failed(reason) => error!("  FAIL {} {}: {}", url, outcome.name, reason),
                Outcome::Skipped(reason) => info!("  skip {} {} ({})", url, outcome.name, reason),
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(outcomes: Vec<Outcome>, error: Option<&str>) -> UrlReport {
        UrlReport {
            url: "http://h/".into(),
            checks: outcomes.len().max(1),
            outcomes: outcomes
                .into_iter()
                .map(|outcome| CheckOutcome { name: "check".into(), outcome })
                .collect(),
            error: error.map(String::from),
        }
    }

    #[test]
    fn session_errors_count_as_failures() {
        assert_eq!(report(vec![], Some("timeout")).failures(), 1);
        let failed = UrlReport { checks: 4, ..report(vec![], Some("timeout")) };
        assert_eq!(failed.failures(), 4);
        assert!(report(vec![Outcome::Passed, Outcome::Skipped("later".into())], None).passed());
    }

    #[test]
    fn summary_totals() {
        let summary = RunSummary {
            reports: vec![
                report(vec![Outcome::Passed, Outcome::Failed("no".into())], None),
                report(vec![Outcome::Skipped("204".into())], None),
                report(vec![], Some("navigation failed")),
            ],
        };
        assert_eq!(summary.failures(), 2);
        assert_eq!(summary.passed(), 1);
        assert_eq!(summary.skipped(), 1);
    }
}
