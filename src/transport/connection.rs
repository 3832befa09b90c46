use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::{debug, trace};

use crate::Result;
use crate::codec::{MAX_HEADER_BLOCK_BYTES, find_header_end, parse_response_head};
use crate::error::{Error, TimeoutPhase, read_error};
use crate::tls::server_name;
use crate::url::Origin;

/// One transport endpoint, plaintext or TLS.
pub(crate) enum TransportStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for TransportStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match &mut *self {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for TransportStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match &mut *self {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match &mut *self {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match &mut *self {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

pub(crate) struct ConnectTarget<'a> {
    pub(crate) origin: &'a Origin,
    /// TLS context when the origin is https.
    pub(crate) tls: Option<Arc<rustls::ClientConfig>>,
    /// Proxy to dial instead of the origin. HTTPS origins tunnel via CONNECT.
    pub(crate) proxy: Option<&'a Origin>,
    pub(crate) connect_timeout: Duration,
}

/// An owned transport connection: stream plus pool bookkeeping state.
/// Exclusive to its current holder; the pool hands it over whole.
pub(crate) struct Connection {
    stream: TransportStream,
    origin: Origin,
    last_used: Instant,
    healthy: bool,
}

impl Connection {
    /// Resolves, dials, optionally tunnels through a proxy and completes the
    /// TLS handshake. The whole setup shares one `connect_timeout` budget.
    pub(crate) async fn connect(target: ConnectTarget<'_>) -> Result<Self> {
        let limit = target.connect_timeout;
        match tokio::time::timeout(limit, Self::establish(&target)).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(TimeoutPhase::Connect, limit)),
        }
    }

    async fn establish(target: &ConnectTarget<'_>) -> Result<Self> {
        let origin = target.origin;
        let dial = target.proxy.unwrap_or(origin);

        let lookup = format!("{}:{}", dial.host, dial.port);
        let addresses: Vec<_> = tokio::net::lookup_host(lookup.as_str())
            .await
            .map_err(|source| Error::Resolve {
                host: dial.host.clone(),
                source,
            })?
            .collect();
        if addresses.is_empty() {
            return Err(Error::Resolve {
                host: dial.host.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses"),
            });
        }

        let mut last_error = None;
        let mut tcp = None;
        for address in addresses {
            match TcpStream::connect(address).await {
                Ok(stream) => {
                    tcp = Some(stream);
                    break;
                }
                Err(error) => last_error = Some(error),
            }
        }
        let tcp = match tcp {
            Some(tcp) => tcp,
            None => {
                return Err(Error::Connect {
                    origin: dial.to_string(),
                    source: last_error
                        .unwrap_or_else(|| std::io::Error::other("connect failed")),
                });
            }
        };
        let _ = tcp.set_nodelay(true);

        let mut stream = TransportStream::Plain(tcp);
        if target.proxy.is_some() && target.tls.is_some() {
            establish_tunnel(&mut stream, origin).await?;
        }

        let stream = match &target.tls {
            Some(tls) => {
                let connector = TlsConnector::from(Arc::clone(tls));
                let name = server_name(&origin.host)?;
                let TransportStream::Plain(tcp) = stream else {
                    unreachable!("tls wraps the freshly dialed plain stream");
                };
                let tls_stream =
                    connector
                        .connect(name, tcp)
                        .await
                        .map_err(|error| Error::Tls {
                            host: origin.host.clone(),
                            message: error.to_string(),
                        })?;
                TransportStream::Tls(Box::new(tls_stream))
            }
            None => stream,
        };

        debug!(origin = %origin, via_proxy = target.proxy.is_some(), "connection established");
        Ok(Self {
            stream,
            origin: origin.clone(),
            last_used: Instant::now(),
            healthy: true,
        })
    }

    pub(crate) fn origin(&self) -> &Origin {
        &self.origin
    }

    pub(crate) fn is_healthy(&self) -> bool {
        self.healthy
    }

    pub(crate) fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    pub(crate) fn is_idle_expired(&self, now: Instant, keepalive_timeout: Duration) -> bool {
        now.duration_since(self.last_used) > keepalive_timeout
    }

    /// Writes the whole buffer under the given inactivity limit. Any failure
    /// or deadline expiry marks the connection unusable for reuse.
    pub(crate) async fn write_all(
        &mut self,
        bytes: &[u8],
        limit: Duration,
        phase: TimeoutPhase,
    ) -> Result<()> {
        let stream = &mut self.stream;
        let write = async {
            stream.write_all(bytes).await?;
            stream.flush().await
        };
        match tokio::time::timeout(limit, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => {
                self.healthy = false;
                Err(read_error(&self.origin.to_string(), source))
            }
            Err(_) => {
                self.healthy = false;
                Err(Error::timeout(phase, limit))
            }
        }
    }

    /// One read under the given inactivity limit. Returns 0 on clean EOF;
    /// the caller decides whether EOF was expected at this framing point.
    pub(crate) async fn read_some(
        &mut self,
        buffer: &mut [u8],
        limit: Duration,
        phase: TimeoutPhase,
    ) -> Result<usize> {
        match tokio::time::timeout(limit, self.stream.read(buffer)).await {
            Ok(Ok(read)) => {
                trace!(origin = %self.origin, read, "read progress");
                if read == 0 {
                    self.healthy = false;
                }
                Ok(read)
            }
            Ok(Err(source)) => {
                self.healthy = false;
                Err(read_error(&self.origin.to_string(), source))
            }
            Err(_) => {
                self.healthy = false;
                Err(Error::timeout(phase, limit))
            }
        }
    }

    /// Idempotent; the underlying socket also closes when the value drops.
    pub(crate) async fn close(&mut self) {
        self.healthy = false;
        let _ = self.stream.shutdown().await;
    }
}

/// Issues a CONNECT to the proxy and waits for a 2xx before handing the
/// stream to the TLS layer.
async fn establish_tunnel(stream: &mut TransportStream, origin: &Origin) -> Result<()> {
    let connect = format!(
        "CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n\r\n",
        host = origin.host,
        port = origin.port,
    );
    stream
        .write_all(connect.as_bytes())
        .await
        .map_err(|source| Error::Connect {
            origin: origin.to_string(),
            source,
        })?;

    let mut buffer = BytesMut::with_capacity(1024);
    let mut chunk = [0_u8; 1024];
    let head_end = loop {
        if let Some(end) = find_header_end(&buffer) {
            break end;
        }
        if buffer.len() > MAX_HEADER_BLOCK_BYTES {
            return Err(Error::protocol("proxy CONNECT response head too large"));
        }
        let read = stream
            .read(&mut chunk)
            .await
            .map_err(|source| Error::Connect {
                origin: origin.to_string(),
                source,
            })?;
        if read == 0 {
            return Err(Error::protocol("proxy closed during CONNECT"));
        }
        buffer.extend_from_slice(&chunk[..read]);
    };

    let head = parse_response_head(&buffer[..head_end])?;
    if !head.status.is_success() {
        return Err(Error::Connect {
            origin: origin.to_string(),
            source: std::io::Error::other(format!("proxy CONNECT refused: {}", head.status)),
        });
    }
    Ok(())
}
