use std::io;

use thiserror::Error;

/// A `Result` typedef defaulting to the [`CacheError`] type
pub type Result<T, E = CacheError> = std::result::Result<T, E>;

/// Errors raised by cache storage and entry handling.
#[derive(Error, Debug)]
pub enum CacheError {
    /// A stored entry did not parse as an HTTP/1.1 response.
    #[error("malformed cache entry: {0}")]
    MalformedEntry(#[from] httparse::Error),
    /// A stored entry ended before the header block was complete.
    #[error("truncated cache entry")]
    TruncatedEntry,
    /// There was an error parsing the HTTP status code
    #[error(transparent)]
    InvalidStatusCode(#[from] http::status::InvalidStatusCode),
    /// There was an error parsing an HTTP header name
    #[error(transparent)]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),
    /// There was an error parsing an HTTP header value
    #[error(transparent)]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),
    /// A storage backend rejected its configuration.
    #[error("invalid cache configuration: {0}")]
    Configuration(&'static str),
    /// A storage backend failed at the I/O level.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Errors surfaced by a [`Transport`](crate::Transport) round trip.
///
/// The variant decides what happens to the cache entry for the request:
/// transient failures ([`is_transient`](TransportError::is_transient))
/// leave it in place, everything else invalidates it.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The request or connection deadline elapsed.
    #[error("transport timeout: {0}")]
    Timeout(String),
    /// The connection was reset or dropped mid-exchange.
    #[error("connection reset: {0}")]
    ConnectionReset(String),
    /// TLS negotiation or certificate verification failed.
    #[error("tls failure: {0}")]
    Tls(String),
    /// The peer violated the HTTP protocol.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The caller aborted the request.
    #[error("request aborted: {0}")]
    Aborted(String),
    /// An I/O failure outside the categories above, classified by its
    /// [`io::ErrorKind`].
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Whether the failure was a timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }

    /// Whether the failure is recoverable by retrying: timeouts and
    /// connection-level resets. Transient failures do not invalidate
    /// cache entries.
    pub fn is_transient(&self) -> bool {
        if self.is_timeout() {
            return true;
        }
        match self {
            Self::ConnectionReset(_) => true,
            Self::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
