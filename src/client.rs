use std::sync::{Arc, RwLock};

use bytes::Bytes;
use http::Method;

use crate::Result;
use crate::config::ClientConfig;
use crate::error::Error;
use crate::executor::Executor;
use crate::rate_limit::RateLimiter;
use crate::request::Request;
use crate::response::Response;
use crate::sse::{SseControl, SseEvent};
use crate::transport::pool::ConnectionPool;
use crate::transport::tls::build_tls_context;
use crate::url::Origin;

fn read_unpoisoned<T: Clone>(lock: &RwLock<T>) -> T {
    match lock.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

struct ClientShared {
    config: RwLock<ClientConfig>,
    tls: RwLock<Arc<rustls::ClientConfig>>,
    limiter: RwLock<Option<Arc<RateLimiter>>>,
    proxy: RwLock<Option<Origin>>,
    pool: Arc<ConnectionPool>,
}

/// The async client surface. Cheap to clone; clones share the connection
/// pool, TLS context, rate limiter and configuration.
#[derive(Clone)]
pub struct Client {
    shared: Arc<ClientShared>,
}

impl Client {
    pub fn new() -> Result<Self> {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let tls = build_tls_context(&config)?;
        let limiter = build_limiter(&config);
        let proxy = parse_proxy(&config)?;
        Ok(Self {
            shared: Arc::new(ClientShared {
                config: RwLock::new(config),
                tls: RwLock::new(tls),
                limiter: RwLock::new(limiter),
                proxy: RwLock::new(proxy),
                pool: ConnectionPool::new(),
            }),
        })
    }

    /// Replaces the configuration. Requests already in flight keep the
    /// snapshot they started with.
    pub fn set_config(&self, config: ClientConfig) -> Result<()> {
        config.validate()?;
        let tls = build_tls_context(&config)?;
        let limiter = build_limiter(&config);
        let proxy = parse_proxy(&config)?;

        *write_lock(&self.shared.tls) = tls;
        *write_lock(&self.shared.limiter) = limiter;
        *write_lock(&self.shared.proxy) = proxy;
        *write_lock(&self.shared.config) = config;
        Ok(())
    }

    pub fn config(&self) -> ClientConfig {
        read_unpoisoned(&self.shared.config)
    }

    /// Snapshots the client state into a per-call executor.
    pub(crate) fn executor(&self) -> Executor {
        Executor {
            config: read_unpoisoned(&self.shared.config),
            tls: read_unpoisoned(&self.shared.tls),
            limiter: read_unpoisoned(&self.shared.limiter),
            proxy: read_unpoisoned(&self.shared.proxy),
            pool: Arc::clone(&self.shared.pool),
        }
    }

    pub async fn execute(&self, request: Request) -> Result<Response> {
        self.executor().execute(&request).await
    }

    pub async fn get(&self, url: impl Into<String>) -> Result<Response> {
        self.execute(Request::new(Method::GET, url)).await
    }

    pub async fn post(&self, url: impl Into<String>, body: impl Into<Bytes>) -> Result<Response> {
        self.execute(Request::new(Method::POST, url).with_body(body)).await
    }

    pub async fn put(&self, url: impl Into<String>, body: impl Into<Bytes>) -> Result<Response> {
        self.execute(Request::new(Method::PUT, url).with_body(body)).await
    }

    pub async fn delete(&self, url: impl Into<String>) -> Result<Response> {
        self.execute(Request::new(Method::DELETE, url)).await
    }

    pub async fn head(&self, url: impl Into<String>) -> Result<Response> {
        self.execute(Request::new(Method::HEAD, url)).await
    }

    pub async fn patch(&self, url: impl Into<String>, body: impl Into<Bytes>) -> Result<Response> {
        self.execute(Request::new(Method::PATCH, url).with_body(body)).await
    }

    pub async fn options(&self, url: impl Into<String>) -> Result<Response> {
        self.execute(Request::new(Method::OPTIONS, url)).await
    }

    /// Executes `request` and dispatches each server-sent event to
    /// `callback` as it arrives. Returns when the stream ends, the callback
    /// asks to stop, or the transport fails.
    pub async fn stream_events(
        &self,
        request: Request,
        mut callback: impl FnMut(SseEvent) -> SseControl + Send,
    ) -> Result<()> {
        self.executor().stream_events(&request, &mut callback).await
    }
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn build_limiter(config: &ClientConfig) -> Option<Arc<RateLimiter>> {
    config.enable_rate_limit.then(|| {
        Arc::new(RateLimiter::new(
            config.rate_limit_requests,
            config.rate_limit_window,
        ))
    })
}

fn parse_proxy(config: &ClientConfig) -> Result<Option<Origin>> {
    let Some(proxy_url) = &config.proxy_url else {
        return Ok(None);
    };
    let parsed = url::Url::parse(proxy_url).map_err(|error| Error::InvalidUrl {
        url: proxy_url.clone(),
        message: error.to_string(),
    })?;
    let host = parsed
        .host_str()
        .ok_or_else(|| Error::InvalidUrl {
            url: proxy_url.clone(),
            message: "proxy url must include a host".to_owned(),
        })?
        .to_owned();
    Ok(Some(Origin {
        scheme: "http".to_owned(),
        host,
        port: parsed.port().unwrap_or(80),
    }))
}
