//! Suite configuration loading
//!
//! A config file is a JSON array of suites:
//!
//! ```json
//! [{
//!   "headers": {"X-Feature": "on"},
//!   "urls": {
//!     "/": 200,
//!     "/old": {"status": "/new"},
//!     "/styles": {"cssCoverage": {"main.css": 40}, "pageErrors": 0},
//!     "/api": {"status": 201, "method": "POST", "body": {"key": "value"}}
//!   }
//! }]
//! ```
//!
//! A bare integer under a path is shorthand for `{"status": n}`. Suite-level
//! `headers`, `method`, `body` and `breakpoint` are defaults that URL-level
//! values override.

use crate::check::{
    CheckSpec, ContentCheck, ElementAssertion, PerformanceBudget, RequestBody, RequestOptions, StatusCheck,
};
use crate::{viewport, Error, HarnessConfig, Headers, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;

/// One URL with its request options and checks
#[derive(Debug, Clone)]
pub struct UrlTarget {
    /// Path as written in the config
    pub path: String,
    pub options: RequestOptions,
    pub check: CheckSpec,
}

impl UrlTarget {
    pub fn url(&self, harness: &HarnessConfig) -> String {
        harness.url_for(&self.path)
    }
}

/// A group of URLs sharing request defaults, in config order
#[derive(Debug, Clone, Default)]
pub struct Suite {
    pub targets: Vec<UrlTarget>,
}

#[derive(Deserialize)]
struct RawSuite {
    urls: Map<String, Value>,
    #[serde(default)]
    headers: Option<Headers>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    breakpoint: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawStatus {
    Code(u16),
    Target(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPerformance {
    Enabled(bool),
    Threshold(u64),
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawUrl {
    status: Option<RawStatus>,
    css_coverage: Option<Map<String, Value>>,
    page_errors: Option<usize>,
    cache_headers: Option<bool>,
    content: Option<String>,
    elements: Option<Map<String, Value>>,
    performance: Option<RawPerformance>,
    headers: Option<Headers>,
    method: Option<String>,
    body: Option<Value>,
    breakpoint: Option<String>,
}

/// Read and parse the suite file at `path`
pub fn load_suites(path: &Path) -> Result<Vec<Suite>> {
    if !path.exists() {
        return Err(Error::ConfigError(format!(
            "config file for smoke test does not exist at {}. Either create one or pass a path using --config",
            path.display()
        )));
    }
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::ConfigError(format!("failed to read {}: {}", path.display(), e)))?;
    parse_suites(&text).map_err(|e| match e {
        Error::ConfigError(msg) => Error::ConfigError(format!("{}: {}", path.display(), msg)),
        other => other,
    })
}

/// Parse suites from JSON text
pub fn parse_suites(json: &str) -> Result<Vec<Suite>> {
    let raw: Vec<RawSuite> =
        serde_json::from_str(json).map_err(|e| Error::ConfigError(format!("malformed suite config: {}", e)))?;
    raw.into_iter().map(build_suite).collect()
}

/// Suite-level request defaults
struct SuiteDefaults {
    headers: Option<Headers>,
    method: Option<String>,
    body: Option<Value>,
    breakpoint: Option<String>,
}

fn build_suite(raw: RawSuite) -> Result<Suite> {
    let RawSuite { urls, headers, method, body, breakpoint } = raw;
    let defaults = SuiteDefaults { headers, method, body, breakpoint };
    let mut targets = Vec::with_capacity(urls.len());
    for (path, value) in urls {
        let url = match value {
            Value::Number(_) => RawUrl {
                status: Some(RawStatus::Code(parse_code(&path, &value)?)),
                ..Default::default()
            },
            Value::Object(_) => serde_json::from_value(value)
                .map_err(|e| Error::ConfigError(format!("invalid checks for '{}': {}", path, e)))?,
            other => {
                return Err(Error::ConfigError(format!(
                    "'{}' must map to a status code or an object of checks, got {}",
                    path, other
                )))
            }
        };
        targets.push(build_target(path, url, &defaults)?);
    }
    Ok(Suite { targets })
}

fn parse_code(path: &str, value: &Value) -> Result<u16> {
    value
        .as_u64()
        .and_then(|n| u16::try_from(n).ok())
        .ok_or_else(|| Error::ConfigError(format!("'{}' has an invalid status code {}", path, value)))
}

fn build_target(path: String, url: RawUrl, suite: &SuiteDefaults) -> Result<UrlTarget> {
    let headers = match (&suite.headers, url.headers) {
        (None, None) => None,
        (defaults, overrides) => {
            let mut merged = defaults.clone().unwrap_or_default();
            merged.extend(overrides.unwrap_or_default());
            Some(merged)
        }
    };
    let body = url.body.or_else(|| suite.body.clone()).and_then(request_body);
    let options = RequestOptions {
        headers,
        method: url.method.or_else(|| suite.method.clone()).unwrap_or_else(|| "GET".to_string()),
        body,
        breakpoint: url
            .breakpoint
            .or_else(|| suite.breakpoint.clone())
            .unwrap_or_else(|| viewport::DEFAULT_BREAKPOINT.to_string()),
    };

    let check = CheckSpec {
        status: url.status.map(|s| match s {
            RawStatus::Code(code) => StatusCheck::from_code(code),
            RawStatus::Target(to) => StatusCheck::RedirectTarget(to),
        }),
        css_coverage: url.css_coverage.map(|m| coverage_thresholds(&path, m)).transpose()?,
        page_errors: url.page_errors,
        cache_headers: url.cache_headers,
        content: url.content.map(ContentCheck::contains),
        elements: url.elements.map(|m| element_assertions(&path, m)).transpose()?,
        performance: url.performance.and_then(|p| match p {
            RawPerformance::Enabled(true) => Some(PerformanceBudget::Default),
            RawPerformance::Enabled(false) => None,
            RawPerformance::Threshold(ms) => Some(PerformanceBudget::Threshold(ms)),
        }),
    };

    Ok(UrlTarget { path, options, check })
}

fn request_body(value: Value) -> Option<RequestBody> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(RequestBody::Text(s)),
        other => Some(RequestBody::Json(other)),
    }
}

fn coverage_thresholds(path: &str, map: Map<String, Value>) -> Result<Vec<(String, f64)>> {
    map.into_iter()
        .map(|(asset, v)| {
            v.as_f64().map(|t| (asset.clone(), t)).ok_or_else(|| {
                Error::ConfigError(format!("'{}': cssCoverage threshold for '{}' must be a number", path, asset))
            })
        })
        .collect()
}

fn element_assertions(path: &str, map: Map<String, Value>) -> Result<Vec<(String, ElementAssertion)>> {
    map.into_iter()
        .map(|(selector, v)| {
            let assertion = match &v {
                Value::String(s) => ElementAssertion::Text(s.clone()),
                Value::Number(n) => n
                    .as_u64()
                    .map(|n| ElementAssertion::Count(n as usize))
                    .ok_or_else(|| invalid_element(path, &selector))?,
                _ => return Err(invalid_element(path, &selector)),
            };
            Ok((selector, assertion))
        })
        .collect()
}

fn invalid_element(path: &str, selector: &str) -> Error {
    Error::ConfigError(format!(
        "'{}': element assertion for '{}' must be a count or a text",
        path, selector
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn single(json: &str) -> Vec<UrlTarget> {
        let mut suites = parse_suites(json).unwrap();
        assert_eq!(suites.len(), 1);
        suites.remove(0).targets
    }

    #[test]
    fn bare_integers_are_status_shorthand() {
        let targets = single(r#"[{"urls": {"/a": 200, "/b": 204, "/c": {"status": 404}}}]"#);
        assert_eq!(targets[0].check.status, Some(StatusCheck::ExactCode(200)));
        assert_eq!(targets[1].check.status, Some(StatusCheck::NoContent));
        assert_eq!(targets[2].check.status, Some(StatusCheck::ExactCode(404)));
        assert!(targets[0].check.page_errors.is_none());
        assert_eq!(targets[0].options, RequestOptions::default());
    }

    #[test]
    fn url_order_is_preserved() {
        let targets = single(r#"[{"urls": {"/z": 200, "/a": 200, "/m": 200}}]"#);
        let paths: Vec<_> = targets.iter().map(|t| t.path.as_str()).collect();
        assert_eq!(paths, vec!["/z", "/a", "/m"]);
    }

    #[test]
    fn string_status_is_a_redirect_target() {
        let targets = single(r#"[{"urls": {"/old": {"status": "/new"}}}]"#);
        assert_eq!(targets[0].check.status, Some(StatusCheck::RedirectTarget("/new".into())));
    }

    #[test]
    fn all_check_kinds_parse() {
        let targets = single(
            r#"[{"urls": {"/": {
                "cssCoverage": {"main.css": 40, "extra.css": 12.5},
                "pageErrors": 0,
                "cacheHeaders": true,
                "content": "<h1>",
                "elements": {".card": 3, "h1": "Welcome"},
                "performance": true,
                "breakpoint": "S"
            }}}]"#,
        );
        let check = &targets[0].check;
        assert_eq!(check.css_coverage, Some(vec![("main.css".into(), 40.0), ("extra.css".into(), 12.5)]));
        assert_eq!(check.page_errors, Some(0));
        assert!(check.wants_cache_headers());
        assert!(check.content.as_ref().unwrap().evaluate("<h1>x</h1>"));
        assert_eq!(
            check.elements,
            Some(vec![(".card".into(), ElementAssertion::Count(3)), ("h1".into(), ElementAssertion::Text("Welcome".into()))])
        );
        assert_eq!(check.performance, Some(PerformanceBudget::Default));
        assert_eq!(targets[0].options.breakpoint, "S");
    }

    #[test]
    fn performance_threshold_and_false() {
        let targets = single(r#"[{"urls": {"/a": {"performance": 1500}, "/b": {"performance": false}}}]"#);
        assert_eq!(targets[0].check.performance, Some(PerformanceBudget::Threshold(1500)));
        assert_eq!(targets[1].check.performance, None);
    }

    #[test]
    fn url_level_options_override_suite_defaults() {
        let targets = single(
            r#"[{
                "headers": {"X-A": "suite", "X-B": "suite"},
                "method": "POST",
                "body": {"from": "suite"},
                "urls": {
                    "/inherit": 200,
                    "/override": {"status": 201, "headers": {"X-B": "url"}, "method": "PUT", "body": "raw"}
                }
            }]"#,
        );
        let inherit = &targets[0].options;
        assert_eq!(inherit.method, "POST");
        assert_eq!(inherit.body, Some(RequestBody::Json(json!({"from": "suite"}))));
        assert_eq!(inherit.headers.as_ref().unwrap().get("X-B").map(String::as_str), Some("suite"));

        let over = &targets[1].options;
        assert_eq!(over.method, "PUT");
        assert_eq!(over.body, Some(RequestBody::Text("raw".into())));
        let h = over.headers.as_ref().unwrap();
        assert_eq!(h.get("X-A").map(String::as_str), Some("suite"));
        assert_eq!(h.get("X-B").map(String::as_str), Some("url"));
    }

    #[test]
    fn malformed_configs_are_config_errors() {
        for bad in [
            "{}",
            "not json",
            r#"[{"urls": {"/a": "200"}}]"#,
            r#"[{"urls": {"/a": 70000}}]"#,
            r#"[{"urls": {"/a": {"cssCoverage": {"a.css": "lots"}}}}]"#,
            r#"[{"urls": {"/a": {"elements": {"p": true}}}}]"#,
            r#"[{"urls": {"/a": {"pageErrors": -1}}}]"#,
        ] {
            assert!(matches!(parse_suites(bad), Err(Error::ConfigError(_))), "accepted {}", bad);
        }
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = load_suites(Path::new("/definitely/not/here/smoke.json")).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here/smoke.json"));
    }

    #[test]
    fn load_reads_and_prefixes_errors_with_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("smoke.json");
        std::fs::write(&good, r#"[{"urls": {"/": 200}}, {"urls": {"/x": 404}}]"#).unwrap();
        let suites = load_suites(&good).unwrap();
        assert_eq!(suites.len(), 2);
        assert_eq!(suites[1].targets[0].path, "/x");

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "[").unwrap();
        let err = load_suites(&bad).unwrap_err();
        assert!(matches!(&err, Error::ConfigError(msg) if msg.contains("bad.json")));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let targets = single(r#"[{"urls": {"/jank": {"elementShifts": {".content": {"maxCount": 0}}}}}]"#);
        assert!(targets[0].check.status.is_none());
    }
}
