//! HTTP/1.1 wire form for cached entries.
//!
//! A cached entry is a complete serialized response: status line, header
//! block, CRLF, body. Entries are self-delimiting (the body is whatever
//! follows the header block), so `Content-Length` is never consulted when
//! reading one back; a stored `HEAD` response may carry a length with an
//! empty body.

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Response, StatusCode, Version};

use crate::error::{CacheError, Result};

/// Upper bound on header lines in a stored entry. Entries with more are
/// treated as malformed, which the transport downgrades to a cache miss.
const MAX_HEADERS: usize = 64;

/// Serializes a response head and body into wire form.
///
/// The status line is always written as `HTTP/1.1` so that entries
/// recorded from an HTTP/2 upstream replay cleanly.
pub(crate) fn serialize(
    status: StatusCode,
    headers: &HeaderMap,
    body: &[u8],
) -> Bytes {
    let mut out = Vec::with_capacity(128 + body.len());
    out.extend_from_slice(b"HTTP/1.1 ");
    out.extend_from_slice(status.as_str().as_bytes());
    if let Some(reason) = status.canonical_reason() {
        out.push(b' ');
        out.extend_from_slice(reason.as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    for (name, value) in headers {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    Bytes::from(out)
}

/// Parses a stored entry back into a response. The body is the remainder
/// of the buffer past the header block, verbatim.
pub(crate) fn parse(entry: &[u8]) -> Result<Response<Bytes>> {
    let mut header_buf = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Response::new(&mut header_buf);
    let body_start = match parsed.parse(entry)? {
        httparse::Status::Complete(offset) => offset,
        httparse::Status::Partial => return Err(CacheError::TruncatedEntry),
    };
    let code = parsed.code.ok_or(CacheError::TruncatedEntry)?;

    let mut headers = HeaderMap::with_capacity(parsed.headers.len());
    for header in parsed.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes())?;
        let value = HeaderValue::from_bytes(header.value)?;
        headers.append(name, value);
    }

    let mut response = Response::new(Bytes::copy_from_slice(&entry[body_start..]));
    *response.status_mut() = StatusCode::from_u16(code)?;
    *response.version_mut() = Version::HTTP_11;
    *response.headers_mut() = headers;
    Ok(response)
}
