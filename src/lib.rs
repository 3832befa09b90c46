//! `htx` is an HTTP/1.1 client with blocking and async surfaces over one
//! shared transport: per-origin connection pooling, chunked and compressed
//! response decoding, deadline-bounded I/O, redirect traversal, jittered
//! retry, and a server-sent-events stream mode.
//!
//! # Quick Start
//!
//! ```no_run
//! # async fn demo() -> htx::Result<()> {
//! use std::time::Duration;
//! use htx::{Client, ClientConfig};
//!
//! let client = Client::with_config(
//!     ClientConfig::default()
//!         .with_request_timeout(Duration::from_secs(5))
//!         .with_retry(3),
//! )?;
//!
//! let response = client.get("https://api.example.com/items").await?;
//! println!("{} {}", response.status(), response.text_lossy());
//! # Ok(())
//! # }
//! ```
//!
//! The blocking surface mirrors the async one call for call:
//!
//! ```no_run
//! # fn demo() -> htx::Result<()> {
//! let client = htx::blocking::Client::new()?;
//! let response = client.get("http://example.com/")?;
//! # Ok(())
//! # }
//! ```

pub mod blocking;
mod client;
mod core;
mod executor;
mod http;
mod rate_limit;
mod transport;

pub(crate) use crate::core::config;
pub(crate) use crate::core::error;
pub(crate) use crate::core::retry;
pub(crate) use crate::core::url;
pub(crate) use crate::core::util;
pub(crate) use crate::http::codec;
pub(crate) use crate::http::content_encoding;
pub(crate) use crate::http::headers;
pub(crate) use crate::http::request;
pub(crate) use crate::http::response;
pub(crate) use crate::http::sse;
pub(crate) use crate::transport::tls;

pub use crate::client::Client;
pub use crate::config::ClientConfig;
pub use crate::error::{Error, ErrorCode, TimeoutPhase};
pub use crate::headers::Headers;
pub use crate::request::Request;
pub use crate::response::Response;
pub use crate::retry::RetryPolicy;
pub use crate::sse::{SseControl, SseEvent, SseParser, parse_sse_stream};
pub use crate::url::{Origin, UrlInfo};

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        Client, ClientConfig, Error, ErrorCode, Request, Response, Result, SseControl, SseEvent,
        blocking,
    };
    pub use http::{Method, StatusCode};
}
