//! Method/body override for the page request
//!
//! Only the first request a page issues (the document itself) is rewritten.
//! Everything after it is resumed untouched.

use crate::check::RequestOptions;
use crate::driver::{InterceptedRequest, RequestAction, RequestOverrides};
use crate::{Headers, Result};
use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};

const CONTENT_TYPE: &str = "Content-Type";
const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Debug)]
pub struct RequestOverrideInterceptor {
    method: String,
    post_data: Option<String>,
    headers: Headers,
    consumed: AtomicBool,
}

impl RequestOverrideInterceptor {
    /// Build an interceptor for `options`, or `None` when the page request is
    /// a plain GET and interception should not be engaged at all.
    pub fn for_options(options: &RequestOptions) -> Result<Option<Self>> {
        if !options.needs_interception() {
            return Ok(None);
        }
        let post_data = options.body.as_ref().map(|b| b.to_post_data()).transpose()?;
        Ok(Some(Self {
            method: options.method.clone(),
            post_data,
            headers: options.headers.clone().unwrap_or_default(),
            consumed: AtomicBool::new(false),
        }))
    }

    /// Decide how `request` is resumed. The first call is marked consumed
    /// whatever it returns.
    pub fn handle(&self, request: &InterceptedRequest) -> RequestAction {
        if self.consumed.swap(true, Ordering::SeqCst) {
            return RequestAction::Continue;
        }

        let mut overrides = RequestOverrides { method: Some(self.method.clone()), ..Default::default() };

        if let Some(body) = &self.post_data {
            let mut headers = merge_headers(&request.headers, &self.headers);
            let has_content_type = self.headers.keys().any(|k| k.eq_ignore_ascii_case(CONTENT_TYPE));
            if !has_content_type {
                headers.retain(|k, _| !k.eq_ignore_ascii_case(CONTENT_TYPE));
                headers.insert(CONTENT_TYPE.to_string(), JSON_CONTENT_TYPE.to_string());
            }
            overrides.post_data = Some(body.clone());
            overrides.headers = Some(headers);
        }

        debug!("overriding {} {} -> {}", request.method, request.url, self.method);
        RequestAction::ContinueWith(overrides)
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed.load(Ordering::SeqCst)
    }
}

/// Caller headers win over the request's own, compared case-insensitively
fn merge_headers(base: &Headers, overrides: &Headers) -> Headers {
    let mut merged: Headers = base
        .iter()
        .filter(|(k, _)| !overrides.keys().any(|o| o.eq_ignore_ascii_case(k)))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}
