use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, LOCATION};
use http::{HeaderMap, Method, StatusCode};
use url::Url;

/// Request to forward to the target, built once per inbound call
#[derive(Debug, Clone)]
pub struct TargetRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl TargetRequest {
    pub fn new(method: Method, url: Url, headers: HeaderMap, body: Option<Bytes>) -> Self {
        // GET and HEAD never carry a body upstream
        let body = if method == Method::GET || method == Method::HEAD {
            None
        } else {
            body
        };

        Self {
            method,
            url,
            headers,
            body,
        }
    }

    /// Target hostname, empty if the URL has none
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or("")
    }

    /// Follow-up request for a redirect to `location`
    ///
    /// 303, and 301/302 answering a POST, switch to a bodiless GET. Credentials
    /// are dropped when the redirect leaves the original host.
    pub fn redirect(mut self, status: StatusCode, location: Url) -> Self {
        let switch_to_get = status == StatusCode::SEE_OTHER
            || (self.method == Method::POST
                && (status == StatusCode::MOVED_PERMANENTLY || status == StatusCode::FOUND));

        if switch_to_get {
            self.method = Method::GET;
            self.body = None;
            self.headers.remove(CONTENT_TYPE);
            self.headers.remove(CONTENT_LENGTH);
        }

        if location.host_str() != self.url.host_str() {
            self.headers.remove(AUTHORIZATION);
            self.headers.remove(COOKIE);
        }

        self.url = location;
        self
    }
}

/// Response from the target, owned by exactly one handler invocation
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl UpstreamResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    /// `Location` of a redirect response
    pub fn redirect_location(&self) -> Option<&str> {
        if !matches!(
            self.status,
            StatusCode::MOVED_PERMANENTLY
                | StatusCode::FOUND
                | StatusCode::SEE_OTHER
                | StatusCode::TEMPORARY_REDIRECT
                | StatusCode::PERMANENT_REDIRECT
        ) {
            return None;
        }

        self.headers.get(LOCATION).and_then(|v| v.to_str().ok())
    }
}
