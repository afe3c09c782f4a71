//! Rendering of decisions as HTTP headers and 429 responses.

use http::{
    HeaderMap, HeaderValue, Response, StatusCode,
    header::{CONTENT_TYPE, HeaderName, RETRY_AFTER},
};
use serde_json::json;

use crate::result::RateLimitResult;

/// `X-RateLimit-Limit`
pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";

/// `X-RateLimit-Remaining`
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";

/// `X-RateLimit-Reset`
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";

/// Error code of the 429 body.
pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";

impl RateLimitResult {
    /// The rate limit headers of this decision.
    ///
    /// Unlimited decisions render no limit headers. `Retry-After` is only present when denied.
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        if !self.is_unlimited() {
            headers.insert(HeaderName::from_static(X_RATELIMIT_LIMIT), HeaderValue::from(self.limit));
            headers.insert(HeaderName::from_static(X_RATELIMIT_REMAINING), HeaderValue::from(self.remaining));
            headers.insert(HeaderName::from_static(X_RATELIMIT_RESET), HeaderValue::from(self.reset_at));
        }

        if let Some(retry_after) = self.retry_after.filter(|_| !self.allowed) {
            headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
        }

        headers
    }

    /// The machine readable body of a 429 response.
    pub fn exceeded_body(&self) -> serde_json::Value {
        let retry_after = self.retry_after.unwrap_or(1);

        json!({
            "error": {
                "code": RATE_LIMIT_EXCEEDED,
                "message": format!("Too many requests, retry after {retry_after} seconds"),
                "retry_after": retry_after,
            },
            "success": false,
        })
    }

    /// A 429 response carrying the headers and body, or `None` when the request is allowed.
    pub fn into_response(self) -> Option<Response<String>> {
        if self.allowed {
            return None;
        }

        let mut headers = self.headers();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let mut response = Response::new(self.exceeded_body().to_string());
        *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
        *response.headers_mut() = headers;

        Some(response)
    }
}
