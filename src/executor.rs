use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use crate::Result;
use crate::codec::{
    self, BodyFraming, ChunkedDecoder, MAX_HEADER_BLOCK_BYTES, ResponseHead, SerializeOptions,
};
use crate::config::ClientConfig;
use crate::content_encoding::{DecodeBodyError, decode_body};
use crate::error::{Error, TimeoutPhase};
use crate::headers::Headers;
use crate::rate_limit::RateLimiter;
use crate::request::Request;
use crate::response::Response;
use crate::retry::{RetryPolicy, RetryState};
use crate::sse::{SseControl, SseEvent, SseParser};
use crate::transport::connection::{ConnectTarget, Connection};
use crate::transport::pool::{Acquired, ConnectionPool, PoolLimits, PooledConnection};
use crate::url::{Origin, UrlInfo};
use crate::util::{
    is_redirect_status, redirect_method, resolve_location, same_origin,
    sanitize_headers_for_redirect,
};

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// One request-to-response engine working off an immutable snapshot of the
/// client state. Both the blocking and the async surface construct one of
/// these per call, so configuration changes never reach requests in flight.
pub(crate) struct Executor {
    pub(crate) config: ClientConfig,
    pub(crate) tls: Arc<rustls::ClientConfig>,
    pub(crate) pool: Arc<ConnectionPool>,
    pub(crate) limiter: Option<Arc<RateLimiter>>,
    pub(crate) proxy: Option<Origin>,
}

/// Deadline bookkeeping for one attempt: `read_timeout` is an inactivity
/// bound per read step, the optional wall-clock deadline caps everything.
struct AttemptTimers {
    read_timeout: Duration,
    deadline: Option<Instant>,
    total: Option<Duration>,
}

impl AttemptTimers {
    fn new(read_timeout: Duration, total: Option<Duration>) -> Self {
        Self {
            read_timeout,
            deadline: total.map(|total| Instant::now() + total),
            total,
        }
    }

    fn expired_error(&self) -> Error {
        Error::Timeout {
            phase: TimeoutPhase::Request,
            timeout_ms: self.total.map_or(0, |total| total.as_millis()),
        }
    }

    fn phase_limit(&self, phase_timeout: Duration, phase: TimeoutPhase) -> Result<(Duration, TimeoutPhase)> {
        let Some(deadline) = self.deadline else {
            return Ok((phase_timeout, phase));
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(self.expired_error());
        }
        if remaining < phase_timeout {
            Ok((remaining, TimeoutPhase::Request))
        } else {
            Ok((phase_timeout, phase))
        }
    }

    fn read_limit(&self) -> Result<(Duration, TimeoutPhase)> {
        self.phase_limit(self.read_timeout, TimeoutPhase::Read)
    }
}

impl Executor {
    pub(crate) async fn execute(&self, request: &Request) -> Result<Response> {
        let mut retry = RetryState::new(RetryPolicy::from_config(&self.config));
        loop {
            match self.execute_with_redirects(request).await {
                Ok(response) => {
                    if retry.should_retry(None, Some(response.status())) {
                        let delay = retry.next_delay();
                        warn!(
                            delay_ms = delay.as_millis() as u64,
                            status = response.status().as_u16(),
                            attempt = retry.attempt(),
                            "retrying request after server error status"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Ok(response);
                }
                Err(error) => {
                    if retry.should_retry(Some(&error), None) {
                        let delay = retry.next_delay();
                        warn!(
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            attempt = retry.attempt(),
                            "retrying request after failure"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(error);
                }
            }
        }
    }

    /// One attempt, redirect traversal included. Every hop gets its own
    /// connection checkout; the wall-clock deadline spans all hops.
    async fn execute_with_redirects(&self, request: &Request) -> Result<Response> {
        let timers = AttemptTimers::new(
            self.config.read_timeout,
            request.timeout().or(self.config.request_timeout),
        );
        let mut method = request.method().clone();
        let mut headers = request.headers().clone();
        let mut body = request.body().cloned();
        let mut url_info = UrlInfo::parse(request.url())?;
        let mut chain: Vec<String> = Vec::new();
        let mut hops = 0_usize;

        loop {
            let response = self
                .execute_hop(&method, &url_info, &headers, body.as_deref(), &timers)
                .await?;

            if !self.config.follow_redirects || !is_redirect_status(response.status()) {
                return Ok(response.with_redirect_chain(chain));
            }
            let location = match response.header("location") {
                Some(location) if !location.is_empty() => location.to_owned(),
                // No usable Location: hand back the 3xx as-is.
                _ => return Ok(response.with_redirect_chain(chain)),
            };
            if hops >= self.config.max_redirects {
                return Err(Error::RedirectLimit {
                    max_redirects: self.config.max_redirects,
                    url: url_info.absolute_url(),
                });
            }

            let next_info = UrlInfo::parse(&resolve_location(&url_info, &location))?;
            debug!(
                status = response.status().as_u16(),
                to = %next_info.absolute_url(),
                hop = hops + 1,
                "following redirect"
            );
            chain.push(location);
            method = redirect_method(&method);
            body = None;
            sanitize_headers_for_redirect(&mut headers, same_origin(&url_info, &next_info));
            url_info = next_info;
            hops += 1;
        }
    }

    /// Single request/response exchange on one connection.
    async fn execute_hop(
        &self,
        method: &http::Method,
        url_info: &UrlInfo,
        headers: &Headers,
        body: Option<&[u8]>,
        timers: &AttemptTimers,
    ) -> Result<Response> {
        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }

        let mut guard = self.checkout(url_info, timers).await?;

        let wire = codec::serialize_request(
            method,
            url_info,
            headers,
            body,
            &SerializeOptions {
                enable_compression: self.config.enable_compression,
                user_agent: &self.config.user_agent,
                absolute_form: self.proxy.is_some() && !url_info.is_secure,
            },
        );
        debug!(method = %method, url = %url_info.absolute_url(), "sending request");
        let (limit, phase) = timers.read_limit()?;
        guard.connection().write_all(&wire, limit, phase).await?;

        let (head, mut buffered) = read_head(guard.connection(), timers).await?;
        let framing = codec::body_framing(method, head.status, &head.headers)?;

        // The cap applies to the decoded body; an encoded stream is capped
        // at the decode step instead so the user-visible size is the bound.
        let raw_cap = if head.headers.contains_key(http::header::CONTENT_ENCODING) {
            None
        } else {
            Some(self.config.max_body_bytes)
        };
        let raw_body =
            read_body(guard.connection(), timers, framing, &mut buffered, raw_cap).await?;
        let decoded = decode_body(raw_body, &head.headers, self.config.max_body_bytes).map_err(
            |error| match error {
                DecodeBodyError::Decode { encoding, message } => Error::Decode { encoding, message },
                DecodeBodyError::TooLarge { actual_bytes } => Error::BodyTooLarge {
                    limit_bytes: self.config.max_body_bytes,
                    actual_bytes,
                },
            },
        )?;

        let reusable = framing != BodyFraming::UntilClose
            && buffered.is_empty()
            && codec::advertises_keep_alive(&head.headers)
            && guard.connection().is_healthy();
        guard.set_reusable(reusable);

        Ok(Response::new(head.status, head.reason, head.headers, decoded))
    }

    /// SSE mode: the exchange up to the response head is the ordinary one;
    /// the body is then fed line-wise to the event parser and the callback.
    /// Streaming connections never go back to the idle pool.
    pub(crate) async fn stream_events(
        &self,
        request: &Request,
        callback: &mut (dyn FnMut(SseEvent) -> SseControl + Send),
    ) -> Result<()> {
        let timers = AttemptTimers::new(
            self.config.read_timeout,
            request.timeout().or(self.config.request_timeout),
        );
        let mut method = request.method().clone();
        let mut headers = request.headers().clone();
        let mut body = request.body().cloned();
        let mut url_info = UrlInfo::parse(request.url())?;
        let mut hops = 0_usize;

        loop {
            if let Some(limiter) = &self.limiter {
                limiter.acquire().await;
            }
            let mut guard = self.checkout(&url_info, &timers).await?;

            let wire = codec::serialize_request(
                &method,
                &url_info,
                &headers,
                body.as_deref(),
                &SerializeOptions {
                    enable_compression: false,
                    user_agent: &self.config.user_agent,
                    absolute_form: self.proxy.is_some() && !url_info.is_secure,
                },
            );
            debug!(method = %method, url = %url_info.absolute_url(), "sending stream request");
            let (limit, phase) = timers.read_limit()?;
            guard.connection().write_all(&wire, limit, phase).await?;

            let (head, buffered) = read_head(guard.connection(), &timers).await?;

            if self.config.follow_redirects && is_redirect_status(head.status) {
                let location = head
                    .headers
                    .get(http::header::LOCATION)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or_default()
                    .to_owned();
                if !location.is_empty() {
                    if hops >= self.config.max_redirects {
                        return Err(Error::RedirectLimit {
                            max_redirects: self.config.max_redirects,
                            url: url_info.absolute_url(),
                        });
                    }
                    let next_info = UrlInfo::parse(&resolve_location(&url_info, &location))?;
                    method = redirect_method(&method);
                    body = None;
                    sanitize_headers_for_redirect(&mut headers, same_origin(&url_info, &next_info));
                    url_info = next_info;
                    hops += 1;
                    // The 3xx connection is dropped unread and retired.
                    continue;
                }
            }

            let framing = codec::body_framing(&method, head.status, &head.headers)?;
            return stream_body_events(guard, &timers, framing, buffered, callback).await;
        }
    }

    async fn checkout(&self, url_info: &UrlInfo, timers: &AttemptTimers) -> Result<PooledConnection> {
        let origin = url_info.origin();
        let (connect_limit, connect_phase) =
            timers.phase_limit(self.config.connect_timeout, TimeoutPhase::Connect)?;

        let target = ConnectTarget {
            origin: &origin,
            tls: url_info.is_secure.then(|| Arc::clone(&self.tls)),
            proxy: self.proxy.as_ref(),
            connect_timeout: connect_limit,
        };

        if !self.config.enable_connection_pool {
            let connection = self.dial(target, connect_phase, timers).await?;
            return Ok(PooledConnection::detached(connection));
        }

        let limits = PoolLimits {
            max_per_origin: self.config.max_connections_per_host.max(1),
            keepalive_timeout: self.config.keepalive_timeout,
        };
        match self.pool.acquire(&origin, limits, timers.deadline).await? {
            Acquired::Reused(guard) => Ok(guard),
            Acquired::MustConnect(reservation) => {
                // A failed dial drops the reservation, freeing the slot.
                let connection = self.dial(target, connect_phase, timers).await?;
                Ok(reservation.complete(connection))
            }
        }
    }

    async fn dial(
        &self,
        target: ConnectTarget<'_>,
        connect_phase: TimeoutPhase,
        timers: &AttemptTimers,
    ) -> Result<Connection> {
        match Connection::connect(target).await {
            Ok(connection) => Ok(connection),
            // The connect budget was clipped by the attempt deadline, so the
            // expiry belongs to the request phase.
            Err(Error::Timeout { .. }) if connect_phase == TimeoutPhase::Request => {
                Err(timers.expired_error())
            }
            Err(error) => Err(error),
        }
    }
}

async fn read_head(
    connection: &mut Connection,
    timers: &AttemptTimers,
) -> Result<(ResponseHead, BytesMut)> {
    let mut buffer = BytesMut::with_capacity(READ_CHUNK_BYTES);
    let mut chunk = [0_u8; READ_CHUNK_BYTES];
    loop {
        if let Some(end) = codec::find_header_end(&buffer) {
            let head_bytes = buffer.split_to(end);
            let head = codec::parse_response_head(&head_bytes)?;
            return Ok((head, buffer));
        }
        if buffer.len() > MAX_HEADER_BLOCK_BYTES {
            return Err(Error::protocol("response head exceeds 64 KiB"));
        }
        let (limit, phase) = timers.read_limit()?;
        let read = connection.read_some(&mut chunk, limit, phase).await?;
        if read == 0 {
            return Err(Error::protocol("connection closed before response head"));
        }
        buffer.extend_from_slice(&chunk[..read]);
    }
}

/// Reads the framed body to completion. `raw_cap` bounds accumulation for
/// unencoded bodies; encoded ones are bounded when inflated.
async fn read_body(
    connection: &mut Connection,
    timers: &AttemptTimers,
    framing: BodyFraming,
    buffered: &mut BytesMut,
    raw_cap: Option<usize>,
) -> Result<Bytes> {
    let check_cap = |length: usize| -> Result<()> {
        if let Some(cap) = raw_cap
            && length > cap
        {
            return Err(Error::BodyTooLarge {
                limit_bytes: cap,
                actual_bytes: length,
            });
        }
        Ok(())
    };

    let mut chunk = [0_u8; READ_CHUNK_BYTES];
    match framing {
        BodyFraming::None => Ok(Bytes::new()),
        BodyFraming::Length(length) => {
            check_cap(length)?;
            let mut body = BytesMut::with_capacity(length.min(READ_CHUNK_BYTES * 16));
            let take = length.min(buffered.len());
            body.extend_from_slice(&buffered.split_to(take));
            while body.len() < length {
                let (limit, phase) = timers.read_limit()?;
                let read = connection.read_some(&mut chunk, limit, phase).await?;
                if read == 0 {
                    return Err(Error::protocol("connection closed mid-body"));
                }
                let wanted = (length - body.len()).min(read);
                body.extend_from_slice(&chunk[..wanted]);
                if wanted < read {
                    buffered.extend_from_slice(&chunk[wanted..read]);
                }
            }
            Ok(body.freeze())
        }
        BodyFraming::Chunked => {
            let mut decoder = ChunkedDecoder::new();
            let mut body = Vec::new();
            loop {
                if decoder.feed(buffered, &mut body)? {
                    return Ok(Bytes::from(body));
                }
                check_cap(body.len())?;
                let (limit, phase) = timers.read_limit()?;
                let read = connection.read_some(&mut chunk, limit, phase).await?;
                if read == 0 {
                    return Err(Error::protocol("connection closed mid-chunk"));
                }
                buffered.extend_from_slice(&chunk[..read]);
            }
        }
        BodyFraming::UntilClose => {
            let mut body = BytesMut::new();
            body.extend_from_slice(buffered);
            buffered.clear();
            loop {
                check_cap(body.len())?;
                let (limit, phase) = timers.read_limit()?;
                let read = connection.read_some(&mut chunk, limit, phase).await?;
                if read == 0 {
                    check_cap(body.len())?;
                    return Ok(body.freeze());
                }
                body.extend_from_slice(&chunk[..read]);
            }
        }
    }
}

/// Drives the SSE read loop: framed bytes in, dispatched events out. The
/// guard travels into this function so every exit path, the callback's stop
/// included, releases the connection (closed, never pooled).
async fn stream_body_events(
    mut guard: PooledConnection,
    timers: &AttemptTimers,
    framing: BodyFraming,
    mut buffered: BytesMut,
    callback: &mut (dyn FnMut(SseEvent) -> SseControl + Send),
) -> Result<()> {
    let mut parser = SseParser::new();
    let mut events = Vec::new();
    let mut decoder = ChunkedDecoder::new();
    let mut remaining = match framing {
        BodyFraming::Length(length) => Some(length),
        BodyFraming::None => Some(0),
        _ => None,
    };

    let mut chunk = [0_u8; READ_CHUNK_BYTES];
    loop {
        // Drain whatever is buffered through the framing layer.
        let mut decoded = Vec::new();
        let framing_complete = match framing {
            BodyFraming::Chunked => decoder.feed(&mut buffered, &mut decoded)?,
            _ => {
                let budget = remaining.unwrap_or(usize::MAX).min(buffered.len());
                decoded.extend_from_slice(&buffered.split_to(budget));
                if let Some(remaining) = remaining.as_mut() {
                    *remaining -= budget;
                }
                remaining == Some(0)
            }
        };

        parser.feed(&decoded, &mut events);
        for event in events.drain(..) {
            if callback(event) == SseControl::Stop {
                debug!("event stream stopped by callback");
                guard.connection().close().await;
                return Ok(());
            }
        }

        if framing_complete {
            break;
        }

        let (limit, phase) = timers.read_limit()?;
        let read = guard.connection().read_some(&mut chunk, limit, phase).await?;
        if read == 0 {
            match framing {
                // Until-close streams end exactly here.
                BodyFraming::UntilClose => break,
                _ => return Err(Error::protocol("connection closed mid-stream")),
            }
        }
        buffered.extend_from_slice(&chunk[..read]);
    }

    parser.finish(&mut events);
    for event in events.drain(..) {
        if callback(event) == SseControl::Stop {
            break;
        }
    }
    Ok(())
}
