use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TimeoutPhase {
    Connect,
    Read,
    Request,
}

impl std::fmt::Display for TimeoutPhase {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Connect => "connect",
            Self::Read => "read",
            Self::Request => "request",
        };
        formatter.write_str(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    InvalidUrl,
    Resolve,
    Connect,
    Tls,
    Timeout,
    Protocol,
    Decode,
    BodyTooLarge,
    RedirectLimit,
    Cancelled,
    Reactor,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidUrl => "invalid_url",
            Self::Resolve => "resolve",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Timeout => "timeout",
            Self::Protocol => "protocol",
            Self::Decode => "decode",
            Self::BodyTooLarge => "body_too_large",
            Self::RedirectLimit => "redirect_limit",
            Self::Cancelled => "cancelled",
            Self::Reactor => "reactor",
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid url {url}: {message}")]
    InvalidUrl { url: String, message: String },
    #[error("failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to connect to {origin}: {source}")]
    Connect {
        origin: String,
        #[source]
        source: std::io::Error,
    },
    #[error("tls failure for {host}: {message}")]
    Tls { host: String, message: String },
    #[error("request timed out in {phase} phase after {timeout_ms}ms")]
    Timeout { phase: TimeoutPhase, timeout_ms: u128 },
    #[error("protocol violation: {message}")]
    Protocol { message: String },
    #[error("failed to decode content-encoding {encoding}: {message}")]
    Decode { encoding: String, message: String },
    #[error("response body too large ({actual_bytes} bytes > {limit_bytes} bytes)")]
    BodyTooLarge {
        limit_bytes: usize,
        actual_bytes: usize,
    },
    #[error("redirect limit exceeded ({max_redirects}) for {url}")]
    RedirectLimit { max_redirects: usize, url: String },
    #[error("request was cancelled")]
    Cancelled,
    #[error("failed to start reactor: {source}")]
    Reactor {
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidUrl { .. } => ErrorCode::InvalidUrl,
            Self::Resolve { .. } => ErrorCode::Resolve,
            Self::Connect { .. } => ErrorCode::Connect,
            Self::Tls { .. } => ErrorCode::Tls,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::Protocol { .. } => ErrorCode::Protocol,
            Self::Decode { .. } => ErrorCode::Decode,
            Self::BodyTooLarge { .. } => ErrorCode::BodyTooLarge,
            Self::RedirectLimit { .. } => ErrorCode::RedirectLimit,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::Reactor { .. } => ErrorCode::Reactor,
        }
    }

    /// Retry classification reads the variant tag, never the message text.
    pub(crate) const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub(crate) const fn is_connection_error(&self) -> bool {
        matches!(self, Self::Resolve { .. } | Self::Connect { .. })
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub(crate) fn timeout(phase: TimeoutPhase, limit: std::time::Duration) -> Self {
        Self::Timeout {
            phase,
            timeout_ms: limit.as_millis(),
        }
    }
}

/// Maps a transport-level I/O failure observed mid-exchange onto the error
/// taxonomy. Peer resets and broken pipes are connection-class (retriable
/// under `retry_on_connection_error`); a clean EOF inside a framed message is
/// a protocol violation and handled by the codec before reaching this point.
pub(crate) fn read_error(origin: &str, source: std::io::Error) -> Error {
    match source.kind() {
        std::io::ErrorKind::UnexpectedEof => Error::protocol("truncated response"),
        _ => Error::Connect {
            origin: origin.to_owned(),
            source,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorCode, TimeoutPhase};

    #[test]
    fn codes_are_stable() {
        let error = Error::Timeout {
            phase: TimeoutPhase::Read,
            timeout_ms: 30_000,
        };
        assert_eq!(error.code(), ErrorCode::Timeout);
        assert_eq!(error.code().as_str(), "timeout");
        assert!(error.is_timeout());
        assert!(!error.is_connection_error());
    }

    #[test]
    fn connection_classification_is_tag_based() {
        let refused = Error::Connect {
            origin: "example.com:80".to_owned(),
            source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert!(refused.is_connection_error());

        // A message mentioning "timeout" must not classify as one.
        let misleading = Error::Connect {
            origin: "example.com:80".to_owned(),
            source: std::io::Error::other("timeout while doing something else"),
        };
        assert!(!misleading.is_timeout());
        assert!(misleading.is_connection_error());
    }
}
