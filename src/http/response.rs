use bytes::Bytes;
use http::{HeaderMap, StatusCode};

/// A fully-received response: decoded body bytes plus the redirect chain
/// traversed to produce it, in visit order.
#[derive(Clone, Debug)]
pub struct Response {
    status: StatusCode,
    reason: String,
    headers: HeaderMap,
    body: Bytes,
    redirect_chain: Vec<String>,
}

impl Response {
    pub(crate) fn new(status: StatusCode, reason: String, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            reason,
            headers,
            body,
            redirect_chain: Vec::new(),
        }
    }

    pub(crate) fn with_redirect_chain(mut self, redirect_chain: Vec<String>) -> Self {
        self.redirect_chain = redirect_chain;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Reason phrase from the status line; may be empty.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Case-insensitive single-header lookup. When the server sent the same
    /// name more than once, the last occurrence wins; all occurrences remain
    /// visible through [`Response::headers`].
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get_all(name)
            .iter()
            .next_back()
            .and_then(|value| value.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Every `Location` visited while following redirects, oldest first.
    pub fn redirect_chain(&self) -> &[String] {
        &self.redirect_chain
    }
}
