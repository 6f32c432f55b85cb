use crate::entry::{CachedResponse, CachedVaryByRules};
use crate::headers::{parse_http_date, CacheControl};
use http::header::{DATE, EXPIRES};
use http::{HeaderMap, HeaderValue, Method, Request, StatusCode, Uri};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// The parts of the inbound request the cache looks at.
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

impl RequestSnapshot {
    pub fn from_request<B>(req: &Request<B>) -> Self {
        Self {
            method: req.method().clone(),
            uri: req.uri().clone(),
            headers: req.headers().clone(),
        }
    }
}

/// Per-request caching state. Created when a request enters the middleware and
/// dropped when its response body finishes; never shared between requests.
#[derive(Debug)]
pub struct ResponseCachingContext {
    request: RequestSnapshot,
    request_cache_control: CacheControl,
    pub(crate) base_key: String,
    pub(crate) storage_vary_key: Option<String>,
    pub(crate) response_time: SystemTime,
    pub(crate) cached_entry_age: Option<Duration>,
    pub(crate) cached_response: Option<Arc<CachedResponse>>,
    pub(crate) cached_vary_by_rules: Option<Arc<CachedVaryByRules>>,
    response_status: Option<StatusCode>,
    response_headers: HeaderMap,
    response_cache_control: CacheControl,
    response_date: Option<SystemTime>,
    response_expires: Option<SystemTime>,
    pub(crate) response_started: bool,
    pub(crate) should_cache_response: bool,
    pub(crate) cached_response_valid_for: Option<Duration>,
    /// Snapshot taken at header finalization, persisted once the body completes.
    pub(crate) pending_response: Option<CachedResponse>,
}

impl ResponseCachingContext {
    pub fn new(request: RequestSnapshot, now: SystemTime) -> Self {
        let request_cache_control = CacheControl::from_headers(&request.headers);
        Self {
            request,
            request_cache_control,
            base_key: String::new(),
            storage_vary_key: None,
            response_time: now,
            cached_entry_age: None,
            cached_response: None,
            cached_vary_by_rules: None,
            response_status: None,
            response_headers: HeaderMap::new(),
            response_cache_control: CacheControl::default(),
            response_date: None,
            response_expires: None,
            response_started: false,
            should_cache_response: false,
            cached_response_valid_for: None,
            pending_response: None,
        }
    }

    pub fn request(&self) -> &RequestSnapshot {
        &self.request
    }

    pub fn request_cache_control(&self) -> &CacheControl {
        &self.request_cache_control
    }

    pub fn base_key(&self) -> &str {
        &self.base_key
    }

    pub fn storage_vary_key(&self) -> Option<&str> {
        self.storage_vary_key.as_deref()
    }

    /// When the cache looked at the entry or the response started, whichever
    /// happened last.
    pub fn response_time(&self) -> SystemTime {
        self.response_time
    }

    pub fn cached_entry_age(&self) -> Option<Duration> {
        self.cached_entry_age
    }

    pub fn cached_response(&self) -> Option<&CachedResponse> {
        self.cached_response.as_deref()
    }

    pub fn cached_vary_by_rules(&self) -> Option<&CachedVaryByRules> {
        self.cached_vary_by_rules.as_deref()
    }

    pub fn response_status(&self) -> Option<StatusCode> {
        self.response_status
    }

    pub fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    pub fn response_cache_control(&self) -> &CacheControl {
        &self.response_cache_control
    }

    pub fn response_date(&self) -> Option<SystemTime> {
        self.response_date
    }

    pub fn response_expires(&self) -> Option<SystemTime> {
        self.response_expires
    }

    pub fn should_cache_response(&self) -> bool {
        self.should_cache_response
    }

    pub fn cached_response_valid_for(&self) -> Option<Duration> {
        self.cached_response_valid_for
    }

    /// Record the matched entry and its age, clamped at zero when the entry
    /// claims to be from the future.
    pub(crate) fn set_cached_response(&mut self, cached: Arc<CachedResponse>, now: SystemTime) {
        self.response_time = now;
        self.cached_entry_age = Some(now.duration_since(cached.created).unwrap_or(Duration::ZERO));
        self.cached_response = Some(cached);
    }

    pub(crate) fn set_response(&mut self, status: StatusCode, headers: HeaderMap, now: SystemTime) {
        self.response_time = now;
        self.response_status = Some(status);
        self.response_cache_control = CacheControl::from_headers(&headers);
        self.response_date = parse_http_date(&headers, &DATE);
        self.response_expires = parse_http_date(&headers, &EXPIRES);
        self.response_headers = headers;
    }

    /// The response `Date`, defaulting to the response time and writing the
    /// header when the handler left it out. Returns the value when it was added.
    pub(crate) fn ensure_response_date(&mut self) -> Option<HeaderValue> {
        if self.response_date.is_some() {
            return None;
        }
        let date = self.response_time;
        self.response_date = Some(date);
        let value = HeaderValue::from_str(&httpdate::fmt_http_date(date)).ok()?;
        self.response_headers.insert(DATE, value.clone());
        Some(value)
    }
}
