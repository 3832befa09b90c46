//! Blocking surface over the same executor as the async client. Each call
//! drives the client's single-threaded reactor to completion for exactly
//! one request.

use bytes::Bytes;
use http::Method;

use crate::Result;
use crate::config::ClientConfig;
use crate::error::Error;
use crate::request::Request;
use crate::response::Response;
use crate::sse::{SseControl, SseEvent};

pub struct Client {
    inner: crate::Client,
    runtime: tokio::runtime::Runtime,
}

impl Client {
    pub fn new() -> Result<Self> {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|source| Error::Reactor { source })?;
        Ok(Self {
            inner: crate::Client::with_config(config)?,
            runtime,
        })
    }

    /// The async twin sharing this client's pool and configuration, for use
    /// inside futures handed to [`Client::run`].
    pub fn async_client(&self) -> &crate::Client {
        &self.inner
    }

    /// Drives an arbitrary user future on this client's reactor.
    pub fn run<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    pub fn execute(&self, request: Request) -> Result<Response> {
        self.runtime.block_on(self.inner.execute(request))
    }

    pub fn get(&self, url: impl Into<String>) -> Result<Response> {
        self.execute(Request::new(Method::GET, url))
    }

    pub fn post(&self, url: impl Into<String>, body: impl Into<Bytes>) -> Result<Response> {
        self.execute(Request::new(Method::POST, url).with_body(body))
    }

    pub fn put(&self, url: impl Into<String>, body: impl Into<Bytes>) -> Result<Response> {
        self.execute(Request::new(Method::PUT, url).with_body(body))
    }

    pub fn delete(&self, url: impl Into<String>) -> Result<Response> {
        self.execute(Request::new(Method::DELETE, url))
    }

    pub fn head(&self, url: impl Into<String>) -> Result<Response> {
        self.execute(Request::new(Method::HEAD, url))
    }

    pub fn patch(&self, url: impl Into<String>, body: impl Into<Bytes>) -> Result<Response> {
        self.execute(Request::new(Method::PATCH, url).with_body(body))
    }

    pub fn options(&self, url: impl Into<String>) -> Result<Response> {
        self.execute(Request::new(Method::OPTIONS, url))
    }

    /// Blocking variant of [`crate::Client::stream_events`]; the callback is
    /// invoked on the calling thread as events arrive.
    pub fn stream_events(
        &self,
        request: Request,
        callback: impl FnMut(SseEvent) -> SseControl + Send,
    ) -> Result<()> {
        self.runtime.block_on(self.inner.stream_events(request, callback))
    }

    pub fn set_config(&self, config: ClientConfig) -> Result<()> {
        self.inner.set_config(config)
    }

    pub fn config(&self) -> ClientConfig {
        self.inner.config()
    }
}
