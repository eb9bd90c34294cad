//! Response body types.
//!
//! A [`Body`] is either buffered bytes (cache hits, merged responses) or
//! a streaming reader handed through from the inner transport. Cache
//! population for streamed `GET` responses happens through
//! [`CachingReader`], which observes every byte the consumer reads and
//! fires a completion callback once the stream reaches end-of-file.

use std::fmt;
use std::io::{self, Cursor, Read};
use std::mem;

use bytes::Bytes;

/// A synchronous HTTP response body.
pub struct Body(Inner);

enum Inner {
    Buffered(Cursor<Bytes>),
    Streaming(Box<dyn Read + Send>),
}

impl Body {
    /// An empty body.
    #[must_use]
    pub fn empty() -> Self {
        Self::buffered(Bytes::new())
    }

    /// A body served from bytes already in memory.
    #[must_use]
    pub fn buffered(data: impl Into<Bytes>) -> Self {
        Body(Inner::Buffered(Cursor::new(data.into())))
    }

    /// A body streamed from `reader` as the caller consumes it.
    #[must_use]
    pub fn streaming(reader: impl Read + Send + 'static) -> Self {
        Body(Inner::Streaming(Box::new(reader)))
    }

    /// Reads the rest of the body into memory.
    pub fn into_bytes(self) -> io::Result<Bytes> {
        match self.0 {
            Inner::Buffered(cursor) => {
                let consumed = cursor.position() as usize;
                Ok(cursor.into_inner().slice(consumed..))
            }
            Inner::Streaming(mut reader) => {
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf)?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

impl Read for Body {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.0 {
            Inner::Buffered(cursor) => cursor.read(buf),
            Inner::Streaming(reader) => reader.read(buf),
        }
    }
}

impl From<Bytes> for Body {
    fn from(data: Bytes) -> Self {
        Self::buffered(data)
    }
}

impl From<Vec<u8>> for Body {
    fn from(data: Vec<u8>) -> Self {
        Self::buffered(data)
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Inner::Buffered(cursor) => f
                .debug_struct("Body::Buffered")
                .field("len", &cursor.get_ref().len())
                .finish(),
            Inner::Streaming(_) => {
                f.debug_struct("Body::Streaming").finish_non_exhaustive()
            }
        }
    }
}

/// Wraps a body and fires `on_eof` with a copy of everything the
/// consumer read, exactly once, when the underlying stream reports
/// end-of-file. Read errors and dropping the reader early never fire it.
pub(crate) struct CachingReader {
    inner: Body,
    captured: Vec<u8>,
    on_eof: Option<Box<dyn FnOnce(Vec<u8>) + Send>>,
}

impl CachingReader {
    pub(crate) fn new(
        inner: Body,
        on_eof: impl FnOnce(Vec<u8>) + Send + 'static,
    ) -> Self {
        CachingReader { inner, captured: Vec::new(), on_eof: Some(Box::new(on_eof)) }
    }
}

impl Read for CachingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.captured.extend_from_slice(&buf[..n]);
        if n == 0 && !buf.is_empty() {
            if let Some(on_eof) = self.on_eof.take() {
                on_eof(mem::take(&mut self.captured));
            }
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    fn capture() -> (Arc<Mutex<Option<Vec<u8>>>>, impl FnOnce(Vec<u8>) + Send) {
        let slot = Arc::new(Mutex::new(None));
        let writer = Arc::clone(&slot);
        (slot, move |data| {
            *writer.lock().unwrap() = Some(data);
        })
    }

    #[test]
    fn fires_once_with_the_full_content() {
        let (slot, on_eof) = capture();
        let mut reader =
            CachingReader::new(Body::buffered("hello world"), on_eof);
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello world");
        assert_eq!(slot.lock().unwrap().as_deref(), Some(b"hello world".as_ref()));

        // Reading past EOF again must not fire twice or panic.
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn does_not_fire_on_partial_read() {
        let (slot, on_eof) = capture();
        let mut reader = CachingReader::new(Body::buffered("hello"), on_eof);
        let mut buf = [0u8; 2];
        reader.read_exact(&mut buf).unwrap();
        drop(reader);
        assert!(slot.lock().unwrap().is_none());
    }

    #[test]
    fn does_not_fire_on_read_error() {
        struct FailingReader;
        impl Read for FailingReader {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::Other, "connection lost"))
            }
        }
        let (slot, on_eof) = capture();
        let mut reader =
            CachingReader::new(Body::streaming(FailingReader), on_eof);
        let mut out = Vec::new();
        assert!(reader.read_to_end(&mut out).is_err());
        drop(reader);
        assert!(slot.lock().unwrap().is_none());
    }

    #[test]
    fn empty_body_fires_immediately() {
        let (slot, on_eof) = capture();
        let mut reader = CachingReader::new(Body::empty(), on_eof);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(slot.lock().unwrap().as_deref(), Some(b"".as_ref()));
    }

    #[test]
    fn into_bytes_returns_the_unread_remainder() {
        let mut body = Body::buffered("abcdef");
        let mut buf = [0u8; 2];
        body.read_exact(&mut buf).unwrap();
        assert_eq!(body.into_bytes().unwrap().as_ref(), b"cdef");

        let body = Body::streaming(Cursor::new(b"stream".to_vec()));
        assert_eq!(body.into_bytes().unwrap().as_ref(), b"stream");
    }
}
