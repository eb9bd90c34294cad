//! Request/response cache-control evaluation.
//!
//! Freshness here follows the rules of a private cache: `public`,
//! `private`, and `s-maxage` carry no weight, and the request is allowed
//! to tighten or loosen the response's lifetime (`max-age`, `min-fresh`,
//! `max-stale`).

use std::collections::{HashMap, HashSet};
use std::time::SystemTime;

use http::header::{
    HeaderName, HeaderValue, CACHE_CONTROL, CONNECTION, DATE, EXPIRES, VARY,
};
use http::HeaderMap;

/// Prefix of the synthetic headers that echo request values for `Vary`
/// matching.
pub const X_VARIED_PREFIX: &str = "x-varied-";

/// Headers that never travel past the current connection, regardless of
/// what the `Connection` header lists.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// How a cached response may be used to satisfy a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// The cached response can be returned without contacting the origin.
    Fresh,
    /// The cached response needs validating before it is returned.
    Stale,
    /// The cached response may only substitute for an origin failure.
    StaleIfError,
    /// The cached response may be returned while revalidating in the
    /// background.
    StaleWhileRevalidate,
    /// The cached response must not be used; go to the network.
    Transparent,
}

/// Parsed `Cache-Control` directives: case-sensitive keys mapped to
/// optional values.
#[derive(Debug, Default)]
pub(crate) struct CacheControl(HashMap<String, Option<String>>);

impl CacheControl {
    /// Parses every `Cache-Control` occurrence in `headers` into one
    /// directive map. Directive names and values are kept verbatim.
    pub(crate) fn parse(headers: &HeaderMap) -> Self {
        let mut directives = HashMap::new();
        for value in headers.get_all(CACHE_CONTROL) {
            let Ok(value) = value.to_str() else { continue };
            for part in value.split(',') {
                let part = part.trim();
                if part.is_empty() {
                    continue;
                }
                match part.split_once('=') {
                    Some((name, value)) => directives.insert(
                        name.trim().to_string(),
                        Some(value.trim().to_string()),
                    ),
                    None => directives.insert(part.to_string(), None),
                };
            }
        }
        CacheControl(directives)
    }

    pub(crate) fn has(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Returns `None` when the directive is absent, `Some(None)` when it
    /// is present without a value.
    pub(crate) fn directive(&self, name: &str) -> Option<Option<&str>> {
        self.0.get(name).map(|value| value.as_deref())
    }
}

/// Whether a response exchanged under these directives may be written to
/// the cache at all.
pub(crate) fn can_store(
    req_cc: &CacheControl,
    resp_cc: &CacheControl,
) -> bool {
    !req_cc.has("no-store") && !resp_cc.has("no-store")
}

/// Parses the response `Date` header.
pub(crate) fn date(resp_headers: &HeaderMap) -> Option<SystemTime> {
    let value = resp_headers.get(DATE)?.to_str().ok()?;
    httpdate::parse_http_date(value).ok()
}

/// Signed whole seconds from `earlier` to `later`; negative when the
/// clocks disagree.
fn secs_between(earlier: SystemTime, later: SystemTime) -> i64 {
    match later.duration_since(earlier) {
        Ok(elapsed) => elapsed.as_secs() as i64,
        Err(ahead) => -(ahead.duration().as_secs() as i64),
    }
}

fn parse_secs(value: Option<&str>) -> Option<i64> {
    value.and_then(|value| value.parse::<i64>().ok())
}

/// Computes whether the cached response may satisfy the request at `now`.
///
/// A missing or unparseable `Date` makes the response stale, as do
/// unparseable `max-age` and `Expires` values (the lifetime collapses to
/// zero). Unparseable `min-fresh` and `max-stale` values are ignored.
pub(crate) fn freshness(
    resp_headers: &HeaderMap,
    req_headers: &HeaderMap,
    now: SystemTime,
) -> Freshness {
    let resp_cc = CacheControl::parse(resp_headers);
    let req_cc = CacheControl::parse(req_headers);

    if req_cc.has("only-if-cached") {
        return Freshness::Fresh;
    }
    if req_cc.has("no-cache") {
        return Freshness::Transparent;
    }
    if resp_cc.has("immutable") {
        return Freshness::Fresh;
    }

    let Some(date) = date(resp_headers) else {
        return Freshness::Stale;
    };
    let mut current_age = secs_between(date, now);

    // max-age overrides Expires, even when Expires is more restrictive.
    let mut lifetime = match resp_cc.directive("max-age") {
        Some(value) => parse_secs(value).unwrap_or(0),
        None => resp_headers
            .get(EXPIRES)
            .and_then(|value| value.to_str().ok())
            .map(|value| match httpdate::parse_http_date(value) {
                Ok(expires) => secs_between(date, expires),
                Err(_) => 0,
            })
            .unwrap_or(0),
    };

    // The client caps how old a response it will accept.
    if let Some(value) = req_cc.directive("max-age") {
        lifetime = parse_secs(value).unwrap_or(0);
    }

    // The client wants the response to stay fresh for this much longer.
    if let Some(value) = req_cc.directive("min-fresh") {
        if let Some(secs) = parse_secs(value) {
            current_age += secs;
        }
    }

    if let Some(value) = req_cc.directive("max-stale") {
        match value {
            // Without a value the client accepts a stale response of any
            // age.
            None => return Freshness::Fresh,
            Some(_) => {
                if let Some(secs) = parse_secs(value) {
                    current_age -= secs;
                }
            }
        }
    }

    if lifetime > current_age {
        Freshness::Fresh
    } else {
        Freshness::Stale
    }
}

/// Whether a `stale-if-error` directive on either side permits serving
/// the cached response in place of an origin failure at `now`.
///
/// A valueless directive permits it unconditionally; a valued directive
/// permits it while the response's age stays strictly below the value.
/// Unparseable values disqualify.
pub(crate) fn can_stale_on_error(
    resp_headers: &HeaderMap,
    req_headers: &HeaderMap,
    now: SystemTime,
) -> bool {
    let mut lifetime: i64 = -1;
    for cc in
        [CacheControl::parse(resp_headers), CacheControl::parse(req_headers)]
    {
        if let Some(value) = cc.directive("stale-if-error") {
            match value {
                None => return true,
                Some(value) => match value.parse::<i64>() {
                    Ok(secs) => lifetime = secs,
                    Err(_) => return false,
                },
            }
        }
    }

    if lifetime >= 0 {
        if let Some(date) = date(resp_headers) {
            if lifetime > secs_between(date, now) {
                return true;
            }
        }
    }
    false
}

/// All comma-separated values of every occurrence of `name`, trimmed.
pub(crate) fn comma_values(
    headers: &HeaderMap,
    name: &HeaderName,
) -> Vec<String> {
    let mut values = Vec::new();
    for value in headers.get_all(name) {
        if let Ok(value) = value.to_str() {
            values.extend(value.split(',').map(|field| field.trim().to_string()));
        }
    }
    values
}

/// The names of the response headers that are end-to-end: not in the
/// hop-by-hop set and not listed in the response's `Connection` header.
pub(crate) fn end_to_end_headers(resp_headers: &HeaderMap) -> Vec<HeaderName> {
    let mut hop_by_hop: HashSet<String> =
        HOP_BY_HOP.iter().map(|name| (*name).to_string()).collect();
    for extra in comma_values(resp_headers, &CONNECTION) {
        if !extra.is_empty() {
            hop_by_hop.insert(extra.to_ascii_lowercase());
        }
    }
    resp_headers
        .keys()
        .filter(|name| !hop_by_hop.contains(name.as_str()))
        .cloned()
        .collect()
}

/// Whether the request is compatible with the cached response under the
/// cached response's `Vary` header: every varied request header must
/// equal the value echoed at store time. Absent headers compare equal to
/// absent echoes.
pub(crate) fn vary_matches(
    cached_headers: &HeaderMap,
    req_headers: &HeaderMap,
) -> bool {
    for name in comma_values(cached_headers, &VARY) {
        if name.is_empty() {
            continue;
        }
        let Ok(field) = HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        let Ok(echoed) = HeaderName::from_bytes(
            format!("{X_VARIED_PREFIX}{}", field.as_str()).as_bytes(),
        ) else {
            continue;
        };
        let requested =
            req_headers.get(&field).map(HeaderValue::as_bytes).unwrap_or(b"");
        let stored = cached_headers
            .get(&echoed)
            .map(HeaderValue::as_bytes)
            .unwrap_or(b"");
        if requested != stored {
            return false;
        }
    }
    true
}

/// Copies the request's value of every header named by the response's
/// `Vary` header into the response as `x-varied-<name>`. Headers the
/// request does not carry, or carries with an empty value, are not
/// echoed.
pub(crate) fn write_vary_echo(
    resp_headers: &mut HeaderMap,
    req_headers: &HeaderMap,
) {
    let varied = comma_values(resp_headers, &VARY);
    for name in varied {
        if name.is_empty() {
            continue;
        }
        let Ok(field) = HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        let Some(value) = req_headers.get(&field) else { continue };
        if value.is_empty() {
            continue;
        }
        if let Ok(echoed) = HeaderName::from_bytes(
            format!("{X_VARIED_PREFIX}{}", field.as_str()).as_bytes(),
        ) {
            resp_headers.insert(echoed, value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    fn http_date(at: SystemTime) -> String {
        httpdate::fmt_http_date(at)
    }

    #[test]
    fn parses_directives() {
        let map = CacheControl::parse(&headers(&[(
            "cache-control",
            "no-store, max-age=60, private=\"set-cookie\"",
        )]));
        assert!(map.has("no-store"));
        assert_eq!(map.directive("no-store"), Some(None));
        assert_eq!(map.directive("max-age"), Some(Some("60")));
        // Values are kept verbatim, quotes included.
        assert_eq!(map.directive("private"), Some(Some("\"set-cookie\"")));
        assert_eq!(map.directive("no-cache"), None);
    }

    #[test]
    fn parses_directives_across_occurrences() {
        let map = CacheControl::parse(&headers(&[
            ("cache-control", "no-cache"),
            ("cache-control", "max-age=10"),
        ]));
        assert!(map.has("no-cache"));
        assert_eq!(map.directive("max-age"), Some(Some("10")));
    }

    #[test]
    fn directive_names_are_case_sensitive() {
        let map =
            CacheControl::parse(&headers(&[("cache-control", "No-Store")]));
        assert!(!map.has("no-store"));
    }

    #[test]
    fn fresh_within_max_age() {
        let now = SystemTime::now();
        let resp = headers(&[
            ("date", &http_date(now)),
            ("cache-control", "max-age=60"),
        ]);
        assert_eq!(freshness(&resp, &HeaderMap::new(), now), Freshness::Fresh);
    }

    #[test]
    fn stale_past_max_age() {
        let now = SystemTime::now();
        let resp = headers(&[
            ("date", &http_date(now - Duration::from_secs(120))),
            ("cache-control", "max-age=60"),
        ]);
        assert_eq!(freshness(&resp, &HeaderMap::new(), now), Freshness::Stale);
    }

    #[test]
    fn missing_date_is_stale() {
        let resp = headers(&[("cache-control", "max-age=60")]);
        assert_eq!(
            freshness(&resp, &HeaderMap::new(), SystemTime::now()),
            Freshness::Stale
        );
    }

    #[test]
    fn unparseable_max_age_is_stale() {
        let now = SystemTime::now();
        let resp = headers(&[
            ("date", &http_date(now)),
            ("cache-control", "max-age=never"),
        ]);
        assert_eq!(freshness(&resp, &HeaderMap::new(), now), Freshness::Stale);
    }

    #[test]
    fn expires_is_the_fallback_lifetime() {
        let now = SystemTime::now();
        let resp = headers(&[
            ("date", &http_date(now)),
            ("expires", &http_date(now + Duration::from_secs(300))),
        ]);
        assert_eq!(freshness(&resp, &HeaderMap::new(), now), Freshness::Fresh);

        let resp = headers(&[
            ("date", &http_date(now)),
            ("expires", "not a date"),
        ]);
        assert_eq!(freshness(&resp, &HeaderMap::new(), now), Freshness::Stale);
    }

    #[test]
    fn immutable_is_always_fresh() {
        let resp = headers(&[("cache-control", "immutable")]);
        assert_eq!(
            freshness(&resp, &HeaderMap::new(), SystemTime::now()),
            Freshness::Fresh
        );
    }

    #[test]
    fn request_no_cache_is_transparent() {
        let now = SystemTime::now();
        let resp = headers(&[
            ("date", &http_date(now)),
            ("cache-control", "max-age=60"),
        ]);
        let req = headers(&[("cache-control", "no-cache")]);
        assert_eq!(freshness(&resp, &req, now), Freshness::Transparent);
    }

    #[test]
    fn request_only_if_cached_is_fresh() {
        let req = headers(&[("cache-control", "only-if-cached")]);
        assert_eq!(
            freshness(&HeaderMap::new(), &req, SystemTime::now()),
            Freshness::Fresh
        );
    }

    #[test]
    fn request_max_age_overrides_response_lifetime() {
        let now = SystemTime::now();
        let resp = headers(&[
            ("date", &http_date(now - Duration::from_secs(30))),
            ("cache-control", "max-age=3600"),
        ]);
        let req = headers(&[("cache-control", "max-age=10")]);
        assert_eq!(freshness(&resp, &req, now), Freshness::Stale);
    }

    #[test]
    fn min_fresh_ages_the_response() {
        let now = SystemTime::now();
        let resp = headers(&[
            ("date", &http_date(now - Duration::from_secs(30))),
            ("cache-control", "max-age=60"),
        ]);
        let req = headers(&[("cache-control", "min-fresh=40")]);
        assert_eq!(freshness(&resp, &req, now), Freshness::Stale);
    }

    #[test]
    fn max_stale_without_value_accepts_anything() {
        let now = SystemTime::now();
        let resp = headers(&[
            ("date", &http_date(now - Duration::from_secs(86400))),
            ("cache-control", "max-age=1"),
        ]);
        let req = headers(&[("cache-control", "max-stale")]);
        assert_eq!(freshness(&resp, &req, now), Freshness::Fresh);
    }

    #[test]
    fn max_stale_with_value_extends_the_window() {
        let now = SystemTime::now();
        let resp = headers(&[
            ("date", &http_date(now - Duration::from_secs(90))),
            ("cache-control", "max-age=60"),
        ]);
        let req = headers(&[("cache-control", "max-stale=60")]);
        assert_eq!(freshness(&resp, &req, now), Freshness::Fresh);

        let req = headers(&[("cache-control", "max-stale=10")]);
        assert_eq!(freshness(&resp, &req, now), Freshness::Stale);
    }

    #[test]
    fn stale_if_error_without_value_is_unbounded() {
        let resp = headers(&[("cache-control", "stale-if-error")]);
        assert!(can_stale_on_error(
            &resp,
            &HeaderMap::new(),
            SystemTime::now()
        ));
    }

    #[test]
    fn stale_if_error_respects_the_age_window() {
        let now = SystemTime::now();
        let resp = headers(&[
            ("date", &http_date(now - Duration::from_secs(120))),
            ("cache-control", "stale-if-error=3600"),
        ]);
        assert!(can_stale_on_error(&resp, &HeaderMap::new(), now));

        let resp = headers(&[
            ("date", &http_date(now - Duration::from_secs(7200))),
            ("cache-control", "stale-if-error=3600"),
        ]);
        assert!(!can_stale_on_error(&resp, &HeaderMap::new(), now));
    }

    #[test]
    fn stale_if_error_from_the_request_side() {
        let now = SystemTime::now();
        let resp = headers(&[(
            "date",
            &http_date(now - Duration::from_secs(120)),
        )]);
        let req = headers(&[("cache-control", "stale-if-error=3600")]);
        assert!(can_stale_on_error(&resp, &req, now));
    }

    #[test]
    fn unparseable_stale_if_error_disqualifies() {
        let now = SystemTime::now();
        let resp = headers(&[
            ("date", &http_date(now)),
            ("cache-control", "stale-if-error=soon"),
        ]);
        assert!(!can_stale_on_error(&resp, &HeaderMap::new(), now));
    }

    #[test]
    fn end_to_end_excludes_hop_by_hop() {
        let resp = headers(&[
            ("date", "Mon, 01 Jan 2024 00:00:00 GMT"),
            ("etag", "\"abc\""),
            ("transfer-encoding", "chunked"),
            ("connection", "close, x-internal"),
            ("x-internal", "1"),
        ]);
        let mut names: Vec<String> = end_to_end_headers(&resp)
            .iter()
            .map(|name| name.as_str().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["date", "etag"]);
    }

    #[test]
    fn vary_match_and_mismatch() {
        let cached = headers(&[
            ("vary", "accept, accept-encoding"),
            ("x-varied-accept", "application/json"),
            ("x-varied-accept-encoding", "gzip"),
        ]);
        let req = headers(&[
            ("accept", "application/json"),
            ("accept-encoding", "gzip"),
        ]);
        assert!(vary_matches(&cached, &req));

        let req = headers(&[
            ("accept", "text/html"),
            ("accept-encoding", "gzip"),
        ]);
        assert!(!vary_matches(&cached, &req));
    }

    #[test]
    fn vary_on_absent_header_matches_absent_echo() {
        let cached = headers(&[("vary", "accept")]);
        assert!(vary_matches(&cached, &HeaderMap::new()));
    }

    #[test]
    fn vary_echo_skips_missing_request_headers() {
        let mut resp = headers(&[("vary", "accept, authorization")]);
        let req = headers(&[("accept", "application/json")]);
        write_vary_echo(&mut resp, &req);
        assert_eq!(
            resp.get("x-varied-accept").unwrap(),
            "application/json"
        );
        assert!(resp.get("x-varied-authorization").is_none());
    }

    #[test]
    fn vary_echo_skips_empty_request_headers() {
        let mut resp = headers(&[("vary", "accept-encoding")]);
        let req = headers(&[("accept-encoding", "")]);
        write_vary_echo(&mut resp, &req);
        assert!(resp.get("x-varied-accept-encoding").is_none());
    }

    #[test]
    fn comma_values_spans_occurrences() {
        let map = headers(&[("vary", "accept"), ("vary", "accept-encoding, user-agent")]);
        assert_eq!(
            comma_values(&map, &VARY),
            vec!["accept", "accept-encoding", "user-agent"]
        );
    }
}
