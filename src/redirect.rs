//! Redirect tracking for every response seen by a page

use crate::check::is_redirect_code;
use crate::driver::ResponseEvent;
use std::collections::HashMap;
use std::sync::Mutex;

/// A response that redirected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectRecord {
    /// One of 301, 302, 303, 307, 308
    pub code: u16,
    /// `Location` header, empty when the server omitted it
    pub to: String,
}

/// Redirect records keyed by the URL of the request that produced them.
///
/// Fed from the page's response handler for the whole page lifetime, so
/// sub-resource redirects are recorded too. A later redirect for the same URL
/// replaces the earlier record.
#[derive(Debug, Default)]
pub struct RedirectTracker {
    records: Mutex<HashMap<String, RedirectRecord>>,
}

impl RedirectTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `response` if it carries a redirect status
    pub fn observe(&self, response: &ResponseEvent) {
        if !is_redirect_code(response.status) {
            return;
        }
        let record = RedirectRecord {
            code: response.status,
            to: response.headers.get("location").cloned().unwrap_or_default(),
        };
        let mut g = self.records.lock().unwrap_or_else(|e| e.into_inner());
        g.insert(response.request_url.clone(), record);
    }

    /// Record for exactly `url`, `None` when that URL never redirected
    pub fn lookup(&self, url: &str) -> Option<RedirectRecord> {
        let g = self.records.lock().unwrap_or_else(|e| e.into_inner());
        g.get(url).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::normalize_headers;

    fn response(url: &str, status: u16, location: Option<&str>) -> ResponseEvent {
        ResponseEvent {
            request_url: url.into(),
            status,
            headers: normalize_headers(location.map(|l| ("Location", l))),
        }
    }

    #[test]
    fn records_only_redirect_statuses() {
        let t = RedirectTracker::new();
        t.observe(&response("http://h/a", 200, None));
        t.observe(&response("http://h/b", 304, None));
        t.observe(&response("http://h/c", 404, None));
        assert!(t.is_empty());

        for code in [301, 302, 303, 307, 308] {
            t.observe(&response(&format!("http://h/{}", code), code, Some("/next")));
        }
        assert_eq!(t.len(), 5);
        assert_eq!(t.lookup("http://h/307"), Some(RedirectRecord { code: 307, to: "/next".into() }));
    }

    #[test]
    fn missing_location_is_an_empty_target_not_absence() {
        let t = RedirectTracker::new();
        t.observe(&response("http://h/a", 302, None));
        assert_eq!(t.lookup("http://h/a"), Some(RedirectRecord { code: 302, to: String::new() }));
        assert_eq!(t.lookup("http://h/other"), None);
    }

    #[test]
    fn lookup_is_exact() {
        let t = RedirectTracker::new();
        t.observe(&response("http://h/a?x=1", 301, Some("/b")));
        assert!(t.lookup("http://h/a").is_none());
        assert!(t.lookup("http://h/a?x=1").is_some());
    }
}
