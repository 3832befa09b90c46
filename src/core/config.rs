use std::path::PathBuf;
use std::time::Duration;

use crate::error::Error;

pub(crate) const DEFAULT_USER_AGENT: &str = concat!("htx/", env!("CARGO_PKG_VERSION"));

/// Client-wide options. Copied into the client at construction; later
/// changes go through [`crate::Client::set_config`] and are not observed by
/// requests already in flight.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientConfig {
    /// Bounds TCP connect plus TLS handshake.
    pub connect_timeout: Duration,
    /// Inactivity bound between successive read progress events.
    pub read_timeout: Duration,
    /// Wall-clock cap over one attempt, redirects included.
    pub request_timeout: Option<Duration>,
    pub enable_compression: bool,
    pub verify_ssl: bool,
    pub ca_cert_file: Option<PathBuf>,
    pub ca_cert_path: Option<PathBuf>,
    pub follow_redirects: bool,
    pub max_redirects: usize,
    pub enable_connection_pool: bool,
    pub max_connections_per_host: usize,
    pub keepalive_timeout: Duration,
    pub enable_rate_limit: bool,
    pub rate_limit_requests: usize,
    pub rate_limit_window: Duration,
    pub enable_retry: bool,
    pub max_retries: usize,
    pub initial_retry_delay: Duration,
    pub retry_backoff_factor: f64,
    pub max_retry_delay: Duration,
    pub retry_on_timeout: bool,
    pub retry_on_connection_error: bool,
    pub retry_on_5xx: bool,
    /// `http://` proxy for outbound traffic; HTTPS targets tunnel via CONNECT.
    pub proxy_url: Option<String>,
    /// Cap on the decoded response body.
    pub max_body_bytes: usize,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            request_timeout: None,
            enable_compression: true,
            verify_ssl: true,
            ca_cert_file: None,
            ca_cert_path: None,
            follow_redirects: true,
            max_redirects: 10,
            enable_connection_pool: true,
            max_connections_per_host: 5,
            keepalive_timeout: Duration::from_secs(30),
            enable_rate_limit: false,
            rate_limit_requests: 100,
            rate_limit_window: Duration::from_secs(1),
            enable_retry: false,
            max_retries: 3,
            initial_retry_delay: Duration::from_millis(100),
            retry_backoff_factor: 2.0,
            max_retry_delay: Duration::from_secs(10),
            retry_on_timeout: true,
            retry_on_connection_error: true,
            retry_on_5xx: true,
            proxy_url: None,
            max_body_bytes: 8 * 1024 * 1024,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

impl ClientConfig {
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = Some(request_timeout);
        self
    }

    pub fn with_compression(mut self, enable_compression: bool) -> Self {
        self.enable_compression = enable_compression;
        self
    }

    pub fn with_redirects(mut self, follow_redirects: bool, max_redirects: usize) -> Self {
        self.follow_redirects = follow_redirects;
        self.max_redirects = max_redirects;
        self
    }

    pub fn with_connection_pool(mut self, max_per_host: usize, keepalive: Duration) -> Self {
        self.enable_connection_pool = true;
        self.max_connections_per_host = max_per_host.max(1);
        self.keepalive_timeout = keepalive;
        self
    }

    pub fn without_connection_pool(mut self) -> Self {
        self.enable_connection_pool = false;
        self
    }

    pub fn with_rate_limit(mut self, max_requests: usize, window: Duration) -> Self {
        self.enable_rate_limit = true;
        self.rate_limit_requests = max_requests.max(1);
        self.rate_limit_window = window.max(Duration::from_millis(1));
        self
    }

    pub fn with_retry(mut self, max_retries: usize) -> Self {
        self.enable_retry = true;
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_backoff(
        mut self,
        initial_delay: Duration,
        backoff_factor: f64,
        max_delay: Duration,
    ) -> Self {
        self.initial_retry_delay = initial_delay;
        self.retry_backoff_factor = backoff_factor;
        self.max_retry_delay = max_delay;
        self
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes.max(1);
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_proxy_url(mut self, proxy_url: impl Into<String>) -> Self {
        self.proxy_url = Some(proxy_url.into());
        self
    }

    /// Disables peer certificate verification. Insecure: the client will
    /// accept any certificate chain presented by the server.
    pub fn danger_disable_ssl_verify(mut self) -> Self {
        self.verify_ssl = false;
        self
    }

    /// Validates the parts of the configuration that cannot fail lazily.
    pub(crate) fn validate(&self) -> Result<(), Error> {
        if let Some(proxy_url) = &self.proxy_url {
            validate_proxy_url(proxy_url)?;
        }
        Ok(())
    }
}

pub(crate) fn validate_proxy_url(proxy_url: &str) -> Result<(), Error> {
    let invalid = |message: &str| Error::InvalidUrl {
        url: proxy_url.to_owned(),
        message: message.to_owned(),
    };
    let parsed = url::Url::parse(proxy_url).map_err(|error| invalid(&error.to_string()))?;
    match parsed.scheme() {
        "http" => {}
        "socks5" | "socks5h" => {
            return Err(invalid("socks5 proxies are not supported"));
        }
        _ => return Err(invalid("proxy scheme must be http")),
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(invalid("proxy url must include a host"));
    }
    if parsed.path() != "/" && !parsed.path().is_empty() {
        return Err(invalid("proxy url must not include a path"));
    }
    Ok(())
}
