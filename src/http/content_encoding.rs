use std::io::Read;

use bytes::Bytes;
use http::HeaderMap;
use http::header::CONTENT_ENCODING;

#[derive(Debug)]
pub(crate) enum DecodeBodyError {
    Decode { encoding: String, message: String },
    TooLarge { actual_bytes: usize },
}

/// Runs a decoder to completion while letting it produce at most one byte
/// past the cap, so an expansion bomb trips the size check before it can
/// balloon memory.
fn inflate_capped(
    decoder: impl Read,
    encoding: &str,
    max_bytes: usize,
) -> Result<Vec<u8>, DecodeBodyError> {
    let mut inflated = Vec::new();
    let produced = decoder
        .take((max_bytes as u64).saturating_add(1))
        .read_to_end(&mut inflated)
        .map_err(|error| DecodeBodyError::Decode {
            encoding: encoding.to_owned(),
            message: error.to_string(),
        })?;
    if produced > max_bytes {
        return Err(DecodeBodyError::TooLarge {
            actual_bytes: produced,
        });
    }
    Ok(inflated)
}

/// Inflates the framed body per `Content-Encoding`. The decoded output is
/// capped at `max_bytes`; the size check happens on the decoded stream so
/// the user-visible body size is the bound.
pub(crate) fn decode_body(
    body: Bytes,
    headers: &HeaderMap,
    max_bytes: usize,
) -> Result<Bytes, DecodeBodyError> {
    let max_bytes = max_bytes.max(1);
    let Some(content_encoding) = headers.get(CONTENT_ENCODING) else {
        return check_identity(body, max_bytes);
    };
    let encoding = content_encoding
        .to_str()
        .map_err(|error| DecodeBodyError::Decode {
            encoding: "content-encoding".to_owned(),
            message: error.to_string(),
        })?
        .trim()
        .to_ascii_lowercase();

    let decoded = match encoding.as_str() {
        "" | "identity" => return check_identity(body, max_bytes),
        "gzip" => inflate_capped(
            flate2::read::GzDecoder::new(body.as_ref()),
            &encoding,
            max_bytes,
        )?,
        "deflate" => inflate_capped(
            flate2::read::ZlibDecoder::new(body.as_ref()),
            &encoding,
            max_bytes,
        )?,
        other => {
            return Err(DecodeBodyError::Decode {
                encoding: other.to_owned(),
                message: "unsupported content-encoding".to_owned(),
            });
        }
    };

    Ok(Bytes::from(decoded))
}

fn check_identity(body: Bytes, max_bytes: usize) -> Result<Bytes, DecodeBodyError> {
    if body.len() > max_bytes {
        return Err(DecodeBodyError::TooLarge {
            actual_bytes: body.len(),
        });
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use bytes::Bytes;
    use flate2::Compression;
    use flate2::write::{GzEncoder, ZlibEncoder};
    use http::HeaderMap;
    use http::header::HeaderValue;

    use super::{DecodeBodyError, decode_body};

    fn headers_with(encoding: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("content-encoding", HeaderValue::from_static(encoding));
        headers
    }

    fn gzip(payload: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(payload).expect("gzip write");
        encoder.finish().expect("gzip finish")
    }

    fn deflate(payload: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(payload).expect("zlib write");
        encoder.finish().expect("zlib finish")
    }

    #[test]
    fn gzip_round_trips() {
        let payload = b"a body worth compressing, repeated: compressing compressing";
        let decoded = decode_body(Bytes::from(gzip(payload)), &headers_with("gzip"), 1024)
            .expect("decode gzip");
        assert_eq!(decoded.as_ref(), payload);
    }

    #[test]
    fn deflate_round_trips() {
        let payload = b"deflate payload bytes";
        let decoded = decode_body(Bytes::from(deflate(payload)), &headers_with("deflate"), 1024)
            .expect("decode deflate");
        assert_eq!(decoded.as_ref(), payload);
    }

    #[test]
    fn encoding_name_is_case_insensitive() {
        let payload = b"mixed case";
        let decoded = decode_body(Bytes::from(gzip(payload)), &headers_with("GZip"), 1024)
            .expect("decode gzip");
        assert_eq!(decoded.as_ref(), payload);
    }

    #[test]
    fn identity_and_absent_pass_through() {
        let body = Bytes::from_static(b"plain");
        let decoded = decode_body(body.clone(), &HeaderMap::new(), 1024).expect("identity");
        assert_eq!(decoded, body);
        let decoded = decode_body(body.clone(), &headers_with("identity"), 1024).expect("identity");
        assert_eq!(decoded, body);
    }

    #[test]
    fn unknown_encoding_is_rejected() {
        let result = decode_body(Bytes::from_static(b"x"), &headers_with("br"), 1024);
        assert!(matches!(result, Err(DecodeBodyError::Decode { .. })));
    }

    #[test]
    fn corrupt_stream_is_a_decode_error() {
        let result = decode_body(Bytes::from_static(b"not gzip"), &headers_with("gzip"), 1024);
        assert!(matches!(result, Err(DecodeBodyError::Decode { .. })));
    }

    #[test]
    fn decoded_size_is_the_bound() {
        // A small compressed input expanding past the cap must be rejected,
        // even though the wire bytes fit comfortably.
        let payload = vec![b'x'; 64 * 1024];
        let compressed = gzip(&payload);
        assert!(compressed.len() < 1024);
        let result = decode_body(Bytes::from(compressed), &headers_with("gzip"), 1024);
        assert!(matches!(result, Err(DecodeBodyError::TooLarge { .. })));
    }
}
