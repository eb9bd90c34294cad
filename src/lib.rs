#![forbid(unsafe_code, future_incompatible)]
#![deny(
    missing_docs,
    missing_debug_implementations,
    missing_copy_implementations,
    nonstandard_style,
    unused_qualifications,
    unused_import_braces,
    unused_extern_crates,
    trivial_casts,
    trivial_numeric_casts
)]
#![cfg_attr(docsrs, feature(doc_cfg))]
//! An HTTP response caching transport with two-tier storage.
//!
//! [`CachingTransport`] wraps an inner [`Transport`] (the object that
//! actually talks to the network) and answers requests from a cache of
//! complete wire-format responses whenever HTTP caching rules allow it:
//!
//! - Fresh cached responses are replayed without touching the network.
//! - Stale cached responses are revalidated with `If-None-Match` /
//!   `If-Modified-Since`, and a `304 Not Modified` swaps the cached body
//!   back in under the origin's refreshed headers.
//! - Origin failures (5xx) can be bridged with a stale response when a
//!   `stale-if-error` directive permits it.
//! - `Vary` is honored by echoing the varied request headers into the
//!   stored entry and matching them on the way out.
//!
//! The cache behaves as a private cache: `public`/`private` and
//! `s-maxage` carry no weight.
//!
//! Storage goes through the [`CacheManager`] trait. The crate ships a
//! bounded in-memory [`TwoQueueManager`], an unbounded [`DashManager`],
//! and a [`TwoTierManager`] that layers the former over a larger backing
//! store, promoting on read and invalidating the fast tier on write.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use http_cache_transport::{
//!     Body, CachingTransport, DashManager, Transport, TransportError,
//!     TwoQueueManager, TwoTierManager,
//! };
//!
//! // The inner transport owns connections; stubbed out here.
//! struct Origin;
//!
//! impl Transport for Origin {
//!     fn round_trip(
//!         &self,
//!         req: http::Request<Body>,
//!     ) -> Result<http::Response<Body>, TransportError> {
//!         let _ = req;
//!         Ok(http::Response::new(Body::empty()))
//!     }
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let primary = Arc::new(TwoQueueManager::new(8 * 1024 * 1024));
//!     let secondary = Arc::new(DashManager::new());
//!     let cache = Arc::new(TwoTierManager::new(primary, secondary)?);
//!     let client = CachingTransport::new(Origin, cache);
//!
//!     let req = http::Request::get("https://example.com/feed")
//!         .body(Body::empty())?;
//!     let resp = client.round_trip(req)?;
//!     println!("status: {}", resp.status());
//!     Ok(())
//! }
//! ```

mod body;
mod error;
mod managers;
mod semantics;
mod wire;


use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use http::header::{
    HeaderValue, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED, RANGE,
    WARNING,
};
use http::{HeaderMap, Method, Request, Response, StatusCode};
use httpdate::fmt_http_date;

pub use crate::body::Body;
pub use crate::error::{CacheError, Result, TransportError};
pub use crate::managers::{
    CacheManager, DashManager, TwoQueueManager, TwoTierManager,
};
pub use crate::semantics::Freshness;

use crate::body::CachingReader;
use crate::semantics::CacheControl;

/// Header stamped on responses served from the cache (value `1`).
pub const X_CLIENT_CACHE: &str = "x-client-cache";

/// A synchronous HTTP round trip: the seam between the cache and the
/// client machinery that owns connections, TLS, and timeouts.
pub trait Transport: Send + Sync {
    /// Executes the request and returns the response, or a classified
    /// transport failure.
    fn round_trip(
        &self,
        req: Request<Body>,
    ) -> Result<Response<Body>, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn round_trip(
        &self,
        req: Request<Body>,
    ) -> Result<Response<Body>, TransportError> {
        (**self).round_trip(req)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn round_trip(
        &self,
        req: Request<Body>,
    ) -> Result<Response<Body>, TransportError> {
        (**self).round_trip(req)
    }
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn round_trip(
        &self,
        req: Request<Body>,
    ) -> Result<Response<Body>, TransportError> {
        (**self).round_trip(req)
    }
}

/// Derives the cache key for a request: the URL for `GET`, otherwise the
/// method, a space, and the URL.
pub fn cache_key<B>(req: &Request<B>) -> String {
    if req.method() == Method::GET {
        req.uri().to_string()
    } else {
        format!("{} {}", req.method(), req.uri())
    }
}

/// Whether a request may be answered from or recorded to the cache:
/// `GET` or `HEAD` with no `Range` header.
pub fn is_cacheable<B>(req: &Request<B>) -> bool {
    (req.method() == Method::GET || req.method() == Method::HEAD)
        && !req.headers().contains_key(RANGE)
}

/// A [`Transport`] that answers requests from cached responses where
/// possible, attaches validators to revalidate stale entries, and
/// records eligible responses as they are drained by the caller.
///
/// Implements [`Transport`] itself, so caching layers can be stacked
/// over any inner transport.
pub struct CachingTransport<T, M> {
    inner: T,
    cache: Arc<M>,
    mark_cached_responses: bool,
}

impl<T, M> CachingTransport<T, M>
where
    T: Transport,
    M: CacheManager + 'static,
{
    /// Wraps `inner` with the given cache. Served-from-cache responses
    /// are marked with [`X_CLIENT_CACHE`] unless disabled via
    /// [`mark_cached_responses`](Self::mark_cached_responses).
    pub fn new(inner: T, cache: Arc<M>) -> Self {
        CachingTransport { inner, cache, mark_cached_responses: true }
    }

    /// Sets whether responses served from the cache carry the
    /// [`X_CLIENT_CACHE`] header.
    #[must_use]
    pub fn mark_cached_responses(mut self, mark: bool) -> Self {
        self.mark_cached_responses = mark;
        self
    }

    fn execute(
        &self,
        mut req: Request<Body>,
    ) -> Result<Response<Body>, TransportError> {
        let key = cache_key(&req);
        let cacheable = is_cacheable(&req);

        let cached = if cacheable {
            self.load(&key, req.headers())
        } else {
            // A write through this key makes any cached copy suspect.
            self.invalidate(&key);
            None
        };

        let Some(mut cached) = cached else {
            return self.fetch_and_store(cacheable, &key, req);
        };

        let now = SystemTime::now();
        match semantics::freshness(cached.headers(), req.headers(), now) {
            Freshness::Fresh => return Ok(replay(cached)),
            Freshness::Stale => attach_validators(&mut req, cached.headers()),
            _ => {}
        }

        let method = req.method().clone();
        let req_headers = req.headers().clone();
        let resp = match self.inner.round_trip(req) {
            Ok(resp) => resp,
            Err(err) => {
                if !err.is_transient() {
                    self.invalidate(&key);
                }
                return Err(err);
            }
        };

        let status = resp.status();
        if status.is_server_error()
            && status != StatusCode::NOT_IMPLEMENTED
            && method == Method::GET
            && semantics::can_stale_on_error(
                cached.headers(),
                &req_headers,
                now,
            )
        {
            drain(resp);
            add_stale_warning(cached.headers_mut(), now);
            return Ok(replay(cached));
        }

        match status {
            StatusCode::NOT_MODIFIED => {
                merge_end_to_end(&mut cached, resp.headers());
                drain(resp);
                // Re-storing refreshes the entry's headers once the
                // caller drains the merged body.
                self.store(cacheable, &key, &method, &req_headers, replay(cached))
            }
            StatusCode::NOT_IMPLEMENTED => {
                self.invalidate(&key);
                Ok(resp)
            }
            // Recoverable origin states: keep the entry, proxy the
            // response.
            StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS => Ok(resp),
            _ => {
                self.invalidate(&key);
                self.store(cacheable, &key, &method, &req_headers, resp)
            }
        }
    }

    /// The no-cached-response path: honor `only-if-cached`, otherwise go
    /// to the network, then apply the storage policy.
    fn fetch_and_store(
        &self,
        cacheable: bool,
        key: &str,
        req: Request<Body>,
    ) -> Result<Response<Body>, TransportError> {
        let method = req.method().clone();
        let req_headers = req.headers().clone();
        let resp = if CacheControl::parse(&req_headers).has("only-if-cached") {
            gateway_timeout()
        } else {
            self.inner.round_trip(req)?
        };
        self.store(cacheable, key, &method, &req_headers, resp)
    }

    /// Applies the storage policy to a response on its way back to the
    /// caller: record it (deferred to body EOF for `GET`), or remove
    /// whatever the cache holds for this key.
    fn store(
        &self,
        cacheable: bool,
        key: &str,
        method: &Method,
        req_headers: &HeaderMap,
        resp: Response<Body>,
    ) -> Result<Response<Body>, TransportError> {
        let req_cc = CacheControl::parse(req_headers);
        let resp_cc = CacheControl::parse(resp.headers());
        if !cacheable || !semantics::can_store(&req_cc, &resp_cc) {
            self.invalidate(key);
            return Ok(resp);
        }

        let (mut parts, body) = resp.into_parts();
        semantics::write_vary_echo(&mut parts.headers, req_headers);

        if method == Method::GET {
            // Defer storage until the caller drains the body; an early
            // close never populates the cache.
            let cache = Arc::clone(&self.cache);
            let key = key.to_string();
            let status = parts.status;
            let headers = parts.headers.clone();
            let tee = CachingReader::new(body, move |captured| {
                let entry = wire::serialize(status, &headers, &captured);
                if let Err(err) = cache.put(&key, entry) {
                    log::warn!("failed to store cache entry for {key}: {err}");
                }
            });
            Ok(Response::from_parts(parts, Body::streaming(tee)))
        } else {
            let captured = body.into_bytes()?;
            let entry = wire::serialize(parts.status, &parts.headers, &captured);
            if let Err(err) = self.cache.put(key, entry) {
                log::warn!("failed to store cache entry for {key}: {err}");
            }
            Ok(Response::from_parts(parts, Body::buffered(captured)))
        }
    }

    /// Loads, parses, marks, and Vary-matches the cached response for
    /// `key`. Anything short of a usable match is a miss.
    fn load(
        &self,
        key: &str,
        req_headers: &HeaderMap,
    ) -> Option<Response<Bytes>> {
        let entry = match self.cache.get(key) {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(err) => {
                log::warn!("cache read failed for {key}: {err}");
                return None;
            }
        };
        // An unreadable entry is a miss, not an error; the next store
        // overwrites it.
        let mut cached = match wire::parse(&entry) {
            Ok(cached) => cached,
            Err(err) => {
                log::debug!(
                    "ignoring unparseable cache entry for {key}: {err}"
                );
                return None;
            }
        };
        if self.mark_cached_responses {
            cached
                .headers_mut()
                .insert(X_CLIENT_CACHE, HeaderValue::from_static("1"));
        }
        if !semantics::vary_matches(cached.headers(), req_headers) {
            return None;
        }
        Some(cached)
    }

    fn invalidate(&self, key: &str) {
        if let Err(err) = self.cache.delete(key) {
            log::warn!("cache invalidation failed for {key}: {err}");
        }
    }
}

impl<T, M> Transport for CachingTransport<T, M>
where
    T: Transport,
    M: CacheManager + 'static,
{
    fn round_trip(
        &self,
        req: Request<Body>,
    ) -> Result<Response<Body>, TransportError> {
        self.execute(req)
    }
}

impl<T, M> fmt::Debug for CachingTransport<T, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachingTransport")
            .field("mark_cached_responses", &self.mark_cached_responses)
            .finish_non_exhaustive()
    }
}

/// Rehydrates a parsed cache entry into a response the caller can read.
fn replay(resp: Response<Bytes>) -> Response<Body> {
    let (parts, body) = resp.into_parts();
    Response::from_parts(parts, Body::buffered(body))
}

/// The synthetic response for `only-if-cached` misses.
fn gateway_timeout() -> Response<Body> {
    let mut resp = Response::new(Body::empty());
    *resp.status_mut() = StatusCode::GATEWAY_TIMEOUT;
    resp
}

/// Gives the origin a chance to answer `304 Not Modified`, unless the
/// caller brought validators of its own.
fn attach_validators(req: &mut Request<Body>, cached_headers: &HeaderMap) {
    if let Some(etag) = cached_headers.get(ETAG) {
        if !req.headers().contains_key(IF_NONE_MATCH) {
            req.headers_mut().insert(IF_NONE_MATCH, etag.clone());
        }
    }
    if let Some(modified) = cached_headers.get(LAST_MODIFIED) {
        if !req.headers().contains_key(IF_MODIFIED_SINCE) {
            req.headers_mut().insert(IF_MODIFIED_SINCE, modified.clone());
        }
    }
}

/// Overwrites the cached response's end-to-end headers with the values
/// from a `304 Not Modified`, keeping multi-value headers intact.
fn merge_end_to_end(cached: &mut Response<Bytes>, net_headers: &HeaderMap) {
    for name in semantics::end_to_end_headers(net_headers) {
        cached.headers_mut().remove(&name);
        for value in net_headers.get_all(&name) {
            cached.headers_mut().append(name.clone(), value.clone());
        }
    }
}

fn add_stale_warning(headers: &mut HeaderMap, now: SystemTime) {
    let warning =
        format!("110 httpCache \"Response is stale\" {}", fmt_http_date(now));
    if let Ok(value) = HeaderValue::from_str(&warning) {
        headers.append(WARNING, value);
    }
}

/// Responses substituted away from the caller must have their bodies
/// consumed so the inner transport can reuse the connection.
fn drain(resp: Response<Body>) {
    let mut body = resp.into_body();
    let _ = io::copy(&mut body, &mut io::sink());
}
