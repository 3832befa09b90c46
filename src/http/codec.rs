use bytes::BytesMut;
use http::header::{CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};

use crate::Result;
use crate::error::Error;
use crate::headers::Headers;
use crate::url::UrlInfo;

/// Cap on the status line plus header block; exceeding it is a protocol
/// violation rather than unbounded buffering.
pub(crate) const MAX_HEADER_BLOCK_BYTES: usize = 64 * 1024;

const ACCEPT_ENCODING_VALUE: &str = "gzip, deflate";

pub(crate) struct SerializeOptions<'a> {
    pub(crate) enable_compression: bool,
    pub(crate) user_agent: &'a str,
    /// Proxied plaintext requests use the absolute-form request target.
    pub(crate) absolute_form: bool,
}

/// Serializes one request: request line, user headers in insertion order
/// with their original name casing, then the standard headers the user did
/// not supply, then the body as-is.
pub(crate) fn serialize_request(
    method: &Method,
    target: &UrlInfo,
    headers: &Headers,
    body: Option<&[u8]>,
    options: &SerializeOptions<'_>,
) -> Vec<u8> {
    let mut wire = Vec::with_capacity(256 + body.map_or(0, <[u8]>::len));

    wire.extend_from_slice(method.as_str().as_bytes());
    wire.push(b' ');
    if options.absolute_form {
        wire.extend_from_slice(target.absolute_url().as_bytes());
    } else {
        wire.extend_from_slice(target.path_and_query.as_bytes());
    }
    wire.extend_from_slice(b" HTTP/1.1\r\n");

    for (name, value) in headers.iter() {
        wire.extend_from_slice(name.as_bytes());
        wire.extend_from_slice(b": ");
        wire.extend_from_slice(value.as_bytes());
        wire.extend_from_slice(b"\r\n");
    }

    let mut inject = |name: &str, value: &str| {
        if !headers.contains(name) {
            wire.extend_from_slice(name.as_bytes());
            wire.extend_from_slice(b": ");
            wire.extend_from_slice(value.as_bytes());
            wire.extend_from_slice(b"\r\n");
        }
    };

    inject("Host", &target.host_header());
    inject("User-Agent", options.user_agent);
    inject("Accept", "*/*");
    inject("Connection", "keep-alive");
    if options.enable_compression {
        inject("Accept-Encoding", ACCEPT_ENCODING_VALUE);
    }
    if let Some(body) = body {
        inject("Content-Length", &body.len().to_string());
    }

    wire.extend_from_slice(b"\r\n");
    if let Some(body) = body {
        wire.extend_from_slice(body);
    }
    wire
}

#[derive(Debug)]
pub(crate) struct ResponseHead {
    pub(crate) status: StatusCode,
    pub(crate) reason: String,
    pub(crate) headers: HeaderMap,
}

/// Returns the offset one past the CRLFCRLF header terminator, if present.
pub(crate) fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|position| position + 4)
}

pub(crate) fn parse_response_head(head: &[u8]) -> Result<ResponseHead> {
    let text = head.strip_suffix(b"\r\n\r\n").unwrap_or(head);
    let mut lines = text.split(|&byte| byte == b'\n').map(|line| {
        line.strip_suffix(b"\r").unwrap_or(line)
    });

    let status_line = lines.next().ok_or_else(|| Error::protocol("empty response head"))?;
    let status_line = std::str::from_utf8(status_line)
        .map_err(|_| Error::protocol("status line is not valid utf-8"))?;
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(Error::protocol(format!("malformed status line: {status_line}")));
    }
    let code = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| Error::protocol(format!("malformed status code in: {status_line}")))?;
    let status = StatusCode::from_u16(code)
        .map_err(|_| Error::protocol(format!("status code {code} out of range")))?;
    let reason = parts.next().unwrap_or_default().to_owned();

    let mut headers = HeaderMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let colon = line
            .iter()
            .position(|&byte| byte == b':')
            .ok_or_else(|| Error::protocol("header line missing colon"))?;
        let (name, rest) = line.split_at(colon);
        // Value keeps everything past the colon minus one optional space.
        let value = rest[1..].strip_prefix(b" ").unwrap_or(&rest[1..]);
        let name = HeaderName::from_bytes(name)
            .map_err(|_| Error::protocol("invalid header name"))?;
        let value = HeaderValue::from_bytes(value)
            .map_err(|_| Error::protocol("invalid header value"))?;
        headers.append(name, value);
    }

    Ok(ResponseHead {
        status,
        reason,
        headers,
    })
}

/// How the response body is delimited on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BodyFraming {
    /// No body follows the head (HEAD, 1xx, 204, 304).
    None,
    Length(usize),
    Chunked,
    /// Body runs until the server closes; the connection is not reusable.
    UntilClose,
}

pub(crate) fn body_framing(
    method: &Method,
    status: StatusCode,
    headers: &HeaderMap,
) -> Result<BodyFraming> {
    if *method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        return Ok(BodyFraming::None);
    }

    let chunked = headers.get_all(TRANSFER_ENCODING).iter().any(|value| {
        value
            .to_str()
            .is_ok_and(|value| value.to_ascii_lowercase().contains("chunked"))
    });
    if chunked {
        return Ok(BodyFraming::Chunked);
    }

    if let Some(value) = headers.get(CONTENT_LENGTH) {
        let length = value
            .to_str()
            .ok()
            .and_then(|value| value.trim().parse::<usize>().ok())
            .ok_or_else(|| Error::protocol("invalid content-length"))?;
        return Ok(BodyFraming::Length(length));
    }

    Ok(BodyFraming::UntilClose)
}

/// Keep-alive is the HTTP/1.1 default; a `Connection: close` (anywhere in
/// the token list) retires the connection after the body.
pub(crate) fn advertises_keep_alive(headers: &HeaderMap) -> bool {
    !headers.get_all(CONNECTION).iter().any(|value| {
        value.to_str().is_ok_and(|value| {
            value
                .split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("close"))
        })
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data,
    DataEnd,
    Trailer,
    Complete,
}

/// Incremental chunked-transfer decoder. Feed it whatever arrived from the
/// socket; it consumes what it can and leaves partial lines in the input.
#[derive(Debug)]
pub(crate) struct ChunkedDecoder {
    state: ChunkState,
    remaining: usize,
}

impl ChunkedDecoder {
    pub(crate) fn new() -> Self {
        Self {
            state: ChunkState::Size,
            remaining: 0,
        }
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.state == ChunkState::Complete
    }

    /// Decodes as much of `input` as possible into `output`. Returns true
    /// once the terminating chunk and trailer block have been consumed.
    pub(crate) fn feed(&mut self, input: &mut BytesMut, output: &mut Vec<u8>) -> Result<bool> {
        loop {
            match self.state {
                ChunkState::Size => {
                    let Some(line_end) = find_crlf(input) else {
                        if input.len() > MAX_HEADER_BLOCK_BYTES {
                            return Err(Error::protocol("chunk size line too long"));
                        }
                        return Ok(false);
                    };
                    let line = input.split_to(line_end + 2);
                    let line = &line[..line_end];
                    let size_text = std::str::from_utf8(line)
                        .map_err(|_| Error::protocol("chunk size is not valid utf-8"))?;
                    // Chunk extensions after ';' are ignored.
                    let size_text = size_text.split(';').next().unwrap_or_default().trim();
                    let size = usize::from_str_radix(size_text, 16).map_err(|_| {
                        Error::protocol(format!("invalid chunk size: {size_text}"))
                    })?;
                    if size == 0 {
                        self.state = ChunkState::Trailer;
                    } else {
                        self.remaining = size;
                        self.state = ChunkState::Data;
                    }
                }
                ChunkState::Data => {
                    if input.is_empty() {
                        return Ok(false);
                    }
                    let take = self.remaining.min(input.len());
                    output.extend_from_slice(&input.split_to(take));
                    self.remaining -= take;
                    if self.remaining == 0 {
                        self.state = ChunkState::DataEnd;
                    }
                }
                ChunkState::DataEnd => {
                    if input.len() < 2 {
                        return Ok(false);
                    }
                    let crlf = input.split_to(2);
                    if &crlf[..] != b"\r\n" {
                        return Err(Error::protocol("missing CRLF after chunk data"));
                    }
                    self.state = ChunkState::Size;
                }
                ChunkState::Trailer => {
                    let Some(line_end) = find_crlf(input) else {
                        if input.len() > MAX_HEADER_BLOCK_BYTES {
                            return Err(Error::protocol("chunk trailer block too long"));
                        }
                        return Ok(false);
                    };
                    let line = input.split_to(line_end + 2);
                    if line_end == 0 {
                        self.state = ChunkState::Complete;
                    } else {
                        // Trailer headers are read and discarded.
                        let _ = line;
                    }
                }
                ChunkState::Complete => return Ok(true),
            }
        }
    }
}

fn find_crlf(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|window| window == b"\r\n")
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use http::header::HeaderValue;
    use http::{HeaderMap, Method, StatusCode};

    use super::{
        BodyFraming, ChunkedDecoder, SerializeOptions, body_framing, find_header_end,
        parse_response_head, serialize_request,
    };
    use crate::headers::Headers;
    use crate::url::UrlInfo;

    fn options() -> SerializeOptions<'static> {
        SerializeOptions {
            enable_compression: true,
            user_agent: "htx-test",
            absolute_form: false,
        }
    }

    #[test]
    fn serializes_request_line_and_injected_headers() {
        let target = UrlInfo::parse("http://example.com/path?q=1").expect("parse");
        let wire = serialize_request(&Method::GET, &target, &Headers::new(), None, &options());
        let text = String::from_utf8(wire).expect("utf-8");
        assert!(text.starts_with("GET /path?q=1 HTTP/1.1\r\n"));
        assert!(text.contains("Host: example.com\r\n"));
        assert!(text.contains("User-Agent: htx-test\r\n"));
        assert!(text.contains("Accept: */*\r\n"));
        assert!(text.contains("Connection: keep-alive\r\n"));
        assert!(text.contains("Accept-Encoding: gzip, deflate\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn user_headers_suppress_injection_case_insensitively() {
        let target = UrlInfo::parse("http://example.com/").expect("parse");
        let mut headers = Headers::new();
        headers.try_append("user-agent", "custom/1").expect("append");
        headers.try_append("ACCEPT", "text/html").expect("append");
        let wire = serialize_request(&Method::GET, &target, &headers, None, &options());
        let text = String::from_utf8(wire).expect("utf-8");
        assert!(text.contains("user-agent: custom/1\r\n"));
        assert!(!text.contains("htx-test"));
        assert!(text.contains("ACCEPT: text/html\r\n"));
        assert!(!text.contains("Accept: */*"));
        assert!(text.contains("Accept-Encoding: gzip, deflate\r\n"));
    }

    #[test]
    fn user_header_case_is_preserved_on_the_wire() {
        let target = UrlInfo::parse("http://example.com/").expect("parse");
        let mut headers = Headers::new();
        headers.try_append("X-Trace-Id", "t-17").expect("append");
        let wire = serialize_request(&Method::GET, &target, &headers, None, &options());
        let text = String::from_utf8(wire).expect("utf-8");
        assert!(text.contains("X-Trace-Id: t-17\r\n"));
        assert!(!text.contains("x-trace-id"));
    }

    #[test]
    fn body_gets_content_length() {
        let target = UrlInfo::parse("http://example.com/items").expect("parse");
        let wire = serialize_request(
            &Method::POST,
            &target,
            &Headers::new(),
            Some(b"hello"),
            &options(),
        );
        let text = String::from_utf8(wire).expect("utf-8");
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(text.ends_with("\r\n\r\nhello"));
    }

    #[test]
    fn compression_disabled_skips_accept_encoding() {
        let target = UrlInfo::parse("http://example.com/").expect("parse");
        let opts = SerializeOptions {
            enable_compression: false,
            ..options()
        };
        let wire = serialize_request(&Method::GET, &target, &Headers::new(), None, &opts);
        assert!(!String::from_utf8(wire).expect("utf-8").contains("Accept-Encoding"));
    }

    #[test]
    fn absolute_form_for_proxied_requests() {
        let target = UrlInfo::parse("http://example.com:8080/x").expect("parse");
        let opts = SerializeOptions {
            absolute_form: true,
            ..options()
        };
        let wire = serialize_request(&Method::GET, &target, &Headers::new(), None, &opts);
        assert!(
            String::from_utf8(wire)
                .expect("utf-8")
                .starts_with("GET http://example.com:8080/x HTTP/1.1\r\n")
        );
    }

    #[test]
    fn parses_head_and_preserves_duplicate_headers() {
        let head = b"HTTP/1.1 200 OK\r\nSet-Thing: one\r\nset-thing: two\r\nX-Empty:\r\n\r\n";
        assert_eq!(find_header_end(head), Some(head.len()));
        let parsed = parse_response_head(head).expect("parse head");
        assert_eq!(parsed.status, StatusCode::OK);
        assert_eq!(parsed.reason, "OK");
        assert_eq!(parsed.headers.get_all("set-thing").iter().count(), 2);
        assert_eq!(parsed.headers.get("x-empty").map(HeaderValue::as_bytes), Some(&b""[..]));
    }

    #[test]
    fn value_loses_exactly_one_leading_space() {
        let head = b"HTTP/1.1 200 OK\r\nX-Padded:  two spaces\r\n\r\n";
        let parsed = parse_response_head(head).expect("parse head");
        assert_eq!(
            parsed.headers.get("x-padded").map(HeaderValue::as_bytes),
            Some(&b" two spaces"[..])
        );
    }

    #[test]
    fn rejects_malformed_status_lines() {
        assert!(parse_response_head(b"ICY 200 OK\r\n\r\n").is_err());
        assert!(parse_response_head(b"HTTP/1.1 banana\r\n\r\n").is_err());
        assert!(parse_response_head(b"HTTP/1.1 9999 Nope\r\n\r\n").is_err());
        assert!(parse_response_head(b"HTTP/1.1 200 OK\r\nno-colon-here\r\n\r\n").is_err());
    }

    #[test]
    fn reason_phrase_may_be_empty() {
        let parsed = parse_response_head(b"HTTP/1.1 204\r\n\r\n").expect("parse head");
        assert_eq!(parsed.status, StatusCode::NO_CONTENT);
        assert_eq!(parsed.reason, "");
    }

    #[test]
    fn framing_selection() {
        let mut headers = HeaderMap::new();
        assert_eq!(
            body_framing(&Method::GET, StatusCode::OK, &headers).expect("framing"),
            BodyFraming::UntilClose
        );

        headers.insert("content-length", HeaderValue::from_static("42"));
        assert_eq!(
            body_framing(&Method::GET, StatusCode::OK, &headers).expect("framing"),
            BodyFraming::Length(42)
        );

        headers.insert("transfer-encoding", HeaderValue::from_static("Chunked"));
        assert_eq!(
            body_framing(&Method::GET, StatusCode::OK, &headers).expect("framing"),
            BodyFraming::Chunked
        );

        assert_eq!(
            body_framing(&Method::HEAD, StatusCode::OK, &headers).expect("framing"),
            BodyFraming::None
        );
        assert_eq!(
            body_framing(&Method::GET, StatusCode::NO_CONTENT, &headers).expect("framing"),
            BodyFraming::None
        );
        assert_eq!(
            body_framing(&Method::GET, StatusCode::NOT_MODIFIED, &headers).expect("framing"),
            BodyFraming::None
        );
    }

    #[test]
    fn keep_alive_is_the_default_and_close_retires() {
        use super::advertises_keep_alive;
        let mut headers = HeaderMap::new();
        assert!(advertises_keep_alive(&headers));
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        assert!(advertises_keep_alive(&headers));
        headers.insert("connection", HeaderValue::from_static("Close"));
        assert!(!advertises_keep_alive(&headers));
        headers.insert("connection", HeaderValue::from_static("upgrade, close"));
        assert!(!advertises_keep_alive(&headers));
    }

    #[test]
    fn invalid_content_length_is_a_protocol_error() {
        let mut headers = HeaderMap::new();
        headers.insert("content-length", HeaderValue::from_static("abc"));
        assert!(body_framing(&Method::GET, StatusCode::OK, &headers).is_err());
    }

    #[test]
    fn decodes_chunked_body() {
        let mut input = BytesMut::from(&b"5\r\nHello\r\n6\r\n World\r\n0\r\n\r\n"[..]);
        let mut decoder = ChunkedDecoder::new();
        let mut output = Vec::new();
        let complete = decoder.feed(&mut input, &mut output).expect("decode");
        assert!(complete);
        assert_eq!(output, b"Hello World");
        assert!(input.is_empty());
    }

    #[test]
    fn decodes_chunked_body_byte_by_byte() {
        let wire = b"5\r\nHello\r\n6\r\n World\r\n0\r\n\r\n";
        let mut decoder = ChunkedDecoder::new();
        let mut pending = BytesMut::new();
        let mut output = Vec::new();
        let mut complete = false;
        for &byte in wire.iter() {
            pending.extend_from_slice(&[byte]);
            complete = decoder.feed(&mut pending, &mut output).expect("decode");
        }
        assert!(complete);
        assert_eq!(output, b"Hello World");
    }

    #[test]
    fn ignores_chunk_extensions_and_trailers() {
        let mut input = BytesMut::from(
            &b"5;ext=1\r\nHello\r\n0\r\nExpires: never\r\nX-Sum: 1\r\n\r\n"[..],
        );
        let mut decoder = ChunkedDecoder::new();
        let mut output = Vec::new();
        assert!(decoder.feed(&mut input, &mut output).expect("decode"));
        assert_eq!(output, b"Hello");
    }

    #[test]
    fn rejects_bad_chunk_framing() {
        let mut decoder = ChunkedDecoder::new();
        let mut output = Vec::new();
        let mut input = BytesMut::from(&b"zz\r\n"[..]);
        assert!(decoder.feed(&mut input, &mut output).is_err());

        let mut decoder = ChunkedDecoder::new();
        let mut input = BytesMut::from(&b"5\r\nHelloXX"[..]);
        assert!(decoder.feed(&mut input, &mut output).is_err());
    }
}
