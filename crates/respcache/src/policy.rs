use crate::context::ResponseCachingContext;
use crate::headers::{comma_separated, parse_http_date, vary_header_names, CacheControl};
use http::header::{AUTHORIZATION, CACHE_CONTROL, EXPIRES, PRAGMA, SET_COOKIE};
use http::{Method, StatusCode};
use std::time::Duration;
use tracing::debug;

/// Decides what may be served from, and written to, the cache.
pub trait ResponseCachingPolicy: Send + Sync + 'static {
    /// Whether the middleware should get involved with this request at all.
    fn is_request_cacheable(&self, ctx: &ResponseCachingContext) -> bool;

    /// Whether a stored response may be used for this request.
    fn allows_cache_lookup(&self, _ctx: &ResponseCachingContext) -> bool {
        true
    }

    /// Whether the response to this request may be stored.
    fn allows_cache_storage(&self, _ctx: &ResponseCachingContext) -> bool {
        true
    }

    fn is_response_cacheable(&self, ctx: &ResponseCachingContext) -> bool;

    /// Whether the matched entry is fresh enough given `ctx.cached_entry_age()`.
    fn is_cached_entry_fresh(&self, ctx: &ResponseCachingContext) -> bool;
}

/// Shared-cache rules from RFC 7234.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultResponseCachingPolicy;

impl ResponseCachingPolicy for DefaultResponseCachingPolicy {
    fn is_request_cacheable(&self, ctx: &ResponseCachingContext) -> bool {
        let request = ctx.request();
        if request.method != Method::GET && request.method != Method::HEAD {
            debug!(method = %request.method, "request method not cacheable");
            return false;
        }
        if request.headers.contains_key(AUTHORIZATION) {
            debug!("request with Authorization not cacheable");
            return false;
        }
        true
    }

    fn allows_cache_lookup(&self, ctx: &ResponseCachingContext) -> bool {
        let headers = &ctx.request().headers;
        if ctx.request_cache_control().no_cache {
            debug!("request Cache-Control no-cache, skipping lookup");
            return false;
        }
        if !headers.contains_key(CACHE_CONTROL)
            && comma_separated(headers, &PRAGMA)
                .iter()
                .any(|d| d.eq_ignore_ascii_case("no-cache"))
        {
            debug!("request Pragma no-cache, skipping lookup");
            return false;
        }
        true
    }

    fn allows_cache_storage(&self, ctx: &ResponseCachingContext) -> bool {
        if ctx.request_cache_control().no_store {
            debug!("request Cache-Control no-store, skipping storage");
            return false;
        }
        true
    }

    fn is_response_cacheable(&self, ctx: &ResponseCachingContext) -> bool {
        let cc = ctx.response_cache_control();
        let headers = ctx.response_headers();

        if cc.no_store {
            debug!("response Cache-Control no-store");
            return false;
        }
        if cc.no_cache {
            debug!("response Cache-Control no-cache");
            return false;
        }
        if headers.contains_key(SET_COOKIE) {
            debug!("response with Set-Cookie not cacheable");
            return false;
        }
        if vary_header_names(headers).iter().any(|v| v == "*") {
            debug!("response with Vary: * not cacheable");
            return false;
        }
        if cc.private {
            debug!("response Cache-Control private");
            return false;
        }
        if ctx.response_status() != Some(StatusCode::OK) {
            debug!(status = ?ctx.response_status(), "response status not cacheable");
            return false;
        }

        let now = ctx.response_time();
        let expired_by_expires = || ctx.response_expires().is_some_and(|e| now >= e);
        match ctx.response_date() {
            None => {
                if cc.s_maxage.is_none() && cc.max_age.is_none() && expired_by_expires() {
                    debug!("response already expired");
                    return false;
                }
            }
            Some(date) => {
                let age = now.duration_since(date).unwrap_or(Duration::ZERO);
                if let Some(shared) = cc.s_maxage {
                    if age >= shared {
                        debug!(
                            age = age.as_secs(),
                            s_maxage = shared.as_secs(),
                            "response s-maxage exceeded"
                        );
                        return false;
                    }
                } else if let Some(max_age) = cc.max_age {
                    if age >= max_age {
                        debug!(
                            age = age.as_secs(),
                            max_age = max_age.as_secs(),
                            "response max-age exceeded"
                        );
                        return false;
                    }
                } else if expired_by_expires() {
                    debug!("response Expires exceeded");
                    return false;
                }
            }
        }

        true
    }

    fn is_cached_entry_fresh(&self, ctx: &ResponseCachingContext) -> bool {
        let (Some(mut age), Some(cached)) = (ctx.cached_entry_age(), ctx.cached_response()) else {
            return false;
        };
        let cached_cc = CacheControl::from_headers(&cached.headers);
        let request_cc = ctx.request_cache_control();

        if let Some(min_fresh) = request_cc.min_fresh {
            age = age.saturating_add(min_fresh);
            debug!(min_fresh = min_fresh.as_secs(), "adding request min-fresh to entry age");
        }

        // s-maxage overrides max-age for shared caches and implies must-revalidate.
        if let Some(shared) = cached_cc.s_maxage {
            if age >= shared {
                debug!(
                    age = age.as_secs(),
                    s_maxage = shared.as_secs(),
                    "cached s-maxage exceeded"
                );
                return false;
            }
            return true;
        }

        let lowest_max_age = match (cached_cc.max_age, request_cc.max_age) {
            (Some(cached), Some(requested)) => Some(cached.min(requested)),
            (cached, requested) => cached.or(requested),
        };

        if let Some(max_age) = lowest_max_age {
            if age < max_age {
                return true;
            }
            if cached_cc.must_revalidate || cached_cc.proxy_revalidate {
                debug!(
                    age = age.as_secs(),
                    max_age = max_age.as_secs(),
                    "stale entry must revalidate"
                );
                return false;
            }
            if request_cc.max_stale {
                match request_cc.max_stale_limit {
                    None => {
                        debug!("request accepts stale entries without limit");
                        return true;
                    }
                    Some(limit) if age - max_age < limit => {
                        debug!(limit = limit.as_secs(), "request accepts stale entry within max-stale");
                        return true;
                    }
                    Some(_) => {}
                }
            }
            debug!(age = age.as_secs(), max_age = max_age.as_secs(), "cached max-age exceeded");
            return false;
        }

        if let Some(expires) = parse_http_date(&cached.headers, &EXPIRES) {
            if ctx.response_time() >= expires {
                debug!("cached Expires exceeded");
                return false;
            }
        }

        true
    }
}
