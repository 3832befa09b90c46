use std::time::Duration;

use bytes::Bytes;
use http::Method;

use crate::Result;
use crate::headers::Headers;

/// One outbound request. Built with the consuming setters below and treated
/// as immutable once handed to a client; redirects and retries derive their
/// follow-up requests from it without mutating it.
#[derive(Clone, Debug)]
pub struct Request {
    method: Method,
    url: String,
    headers: Headers,
    body: Option<Bytes>,
    timeout: Option<Duration>,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Headers::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self::new(Method::POST, url).with_body(body)
    }

    /// Appends a header; the name goes on the wire exactly as written here.
    pub fn try_header(mut self, name: &str, value: &str) -> Result<Self> {
        self.headers.try_append(name, value)?;
        Ok(self)
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Per-request override of the client's `request_timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use http::Method;

    use super::Request;

    #[test]
    fn setters_accumulate() {
        let request = Request::new(Method::PUT, "http://example.com/item")
            .try_header("X-Trace", "abc")
            .expect("valid header")
            .with_body("payload")
            .with_timeout(std::time::Duration::from_secs(5));
        assert_eq!(request.method(), &Method::PUT);
        assert_eq!(request.headers().get("x-trace"), Some("abc"));
        assert_eq!(request.body().map(|b| b.as_ref()), Some(&b"payload"[..]));
        assert!(request.timeout().is_some());
    }

    #[test]
    fn header_case_survives_storage() {
        let request = Request::get("http://example.com")
            .try_header("X-Request-Nonce", "n1")
            .expect("valid header");
        let names: Vec<_> = request.headers().iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["X-Request-Nonce"]);
    }

    #[test]
    fn invalid_header_is_rejected() {
        assert!(Request::get("http://example.com").try_header("bad name", "x").is_err());
        assert!(Request::get("http://example.com").try_header("ok", "bad\nvalue").is_err());
    }
}
