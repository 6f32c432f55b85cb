//! The caching middleware itself.
//!
//! Each request walks the same path: policy check, store lookup (following
//! vary rules), then either a response built from the store or a call to the
//! inner service with its body captured for storage.

use crate::body::ResponseBody;
use crate::capture::{CaptureBody, Finalizer, ResponseCapture};
use crate::conditional::content_is_not_modified;
use crate::context::{RequestSnapshot, ResponseCachingContext};
use crate::entry::{CacheEntry, CachedResponse, CachedResponseBody, CachedVaryByRules};
use crate::error::BuildError;
use crate::headers::{content_length, is_chunked, vary_header_names};
use crate::keys::{DefaultKeyProvider, ResponseCacheKeyProvider};
use crate::options::ResponseCachingOptions;
use crate::policy::{DefaultResponseCachingPolicy, ResponseCachingPolicy};
use crate::store::ResponseCacheStore;
use crate::vary::{normalize_names, VaryByQueryKeys};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use http::header::{
    AGE, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_LOCATION, DATE, ETAG, EXPIRES, VARY,
};
use http::{HeaderValue, Method, Request, Response, StatusCode};
use http_body::Body;
use metrics::counter;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime};
use tower::{Layer, Service};
use tracing::debug;

const LOOKUPS_TOTAL: &str = "respcache_lookups_total";
const STORES_TOTAL: &str = "respcache_stores_total";

/// Headers copied from the stored entry onto a `304 Not Modified`.
const NOT_MODIFIED_HEADERS: [http::HeaderName; 6] =
    [CACHE_CONTROL, CONTENT_LOCATION, DATE, ETAG, EXPIRES, VARY];

struct Shared {
    store: Arc<dyn ResponseCacheStore>,
    policy: Arc<dyn ResponseCachingPolicy>,
    keys: Arc<dyn ResponseCacheKeyProvider>,
    options: ResponseCachingOptions,
}

/// [`Layer`] that adds shared response caching to a service.
#[derive(Clone)]
pub struct ResponseCachingLayer {
    shared: Arc<Shared>,
}

impl ResponseCachingLayer {
    /// Layer over `store` with the default policy and key provider.
    pub fn new<S>(store: S, options: ResponseCachingOptions) -> Result<Self, BuildError>
    where
        S: ResponseCacheStore,
    {
        let keys = DefaultKeyProvider::new(options.case_sensitive_paths);
        Self::builder()
            .store(store)
            .policy(DefaultResponseCachingPolicy)
            .key_provider(keys)
            .options(options)
            .build()
    }

    /// Builder with no collaborators set. Every one of them must be supplied.
    pub fn builder() -> ResponseCachingLayerBuilder {
        ResponseCachingLayerBuilder::default()
    }
}

impl<S> Layer<S> for ResponseCachingLayer {
    type Service = ResponseCaching<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ResponseCaching {
            inner,
            shared: Arc::clone(&self.shared),
        }
    }
}

#[derive(Default)]
pub struct ResponseCachingLayerBuilder {
    store: Option<Arc<dyn ResponseCacheStore>>,
    policy: Option<Arc<dyn ResponseCachingPolicy>>,
    keys: Option<Arc<dyn ResponseCacheKeyProvider>>,
    options: ResponseCachingOptions,
}

impl ResponseCachingLayerBuilder {
    pub fn store<S: ResponseCacheStore>(mut self, store: S) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    pub fn policy<P: ResponseCachingPolicy>(mut self, policy: P) -> Self {
        self.policy = Some(Arc::new(policy));
        self
    }

    pub fn key_provider<K: ResponseCacheKeyProvider>(mut self, keys: K) -> Self {
        self.keys = Some(Arc::new(keys));
        self
    }

    pub fn options(mut self, options: ResponseCachingOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Result<ResponseCachingLayer, BuildError> {
        let store = self.store.ok_or(BuildError::MissingStore)?;
        let policy = self.policy.ok_or(BuildError::MissingPolicy)?;
        let keys = self.keys.ok_or(BuildError::MissingKeyProvider)?;
        self.options.validate()?;
        Ok(ResponseCachingLayer {
            shared: Arc::new(Shared {
                store,
                policy,
                keys,
                options: self.options,
            }),
        })
    }
}

/// Service produced by [`ResponseCachingLayer`].
#[derive(Clone)]
pub struct ResponseCaching<S> {
    inner: S,
    shared: Arc<Shared>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for ResponseCaching<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Body<Data = Bytes> + Send + 'static,
{
    type Response = Response<ResponseBody<ResBody>>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        // The clone may not be ready; keep it and send the request to the ready one.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let shared = Arc::clone(&self.shared);
        shared.invoke(inner, req).boxed()
    }
}

impl Shared {
    async fn invoke<S, ReqBody, ResBody>(
        self: Arc<Self>,
        mut inner: S,
        req: Request<ReqBody>,
    ) -> Result<Response<ResponseBody<ResBody>>, S::Error>
    where
        S: Service<Request<ReqBody>, Response = Response<ResBody>>,
        ResBody: Body<Data = Bytes> + Send + 'static,
    {
        let mut ctx =
            ResponseCachingContext::new(RequestSnapshot::from_request(&req), SystemTime::now());

        if !self.policy.is_request_cacheable(&ctx) {
            counter!(LOOKUPS_TOTAL, "outcome" => "bypass").increment(1);
            let response = inner.call(req).await?;
            return Ok(response.map(ResponseBody::passthrough));
        }

        ctx.base_key = self.keys.create_base_key(&ctx);

        if self.policy.allows_cache_lookup(&ctx) {
            if let Some(response) = self.try_serve_from_cache(&mut ctx).await {
                return Ok(response);
            }
        }

        if !self.policy.allows_cache_storage(&ctx) {
            let response = inner.call(req).await?;
            return Ok(response.map(ResponseBody::passthrough));
        }

        // An error from the inner service drops the capture with it.
        let capture = ResponseCapture::new(self.options.maximum_body_size);
        let response = inner.call(req).await?;
        Ok(self.start_response(ctx, capture, response).await)
    }

    async fn try_serve_from_cache<B>(
        &self,
        ctx: &mut ResponseCachingContext,
    ) -> Option<Response<ResponseBody<B>>> {
        match self.store.get(&ctx.base_key).await {
            Some(CacheEntry::VaryByRules(rules)) => {
                ctx.cached_vary_by_rules = Some(rules);
                if let Some(vary_key) = self.keys.create_lookup_vary_by_key(ctx) {
                    if let Some(CacheEntry::Response(cached)) = self.store.get(&vary_key).await {
                        if let Some(response) = self.try_serve_cached_response(ctx, cached).await {
                            return Some(response);
                        }
                    }
                }
            }
            Some(CacheEntry::Response(cached)) => {
                if let Some(response) = self.try_serve_cached_response(ctx, cached).await {
                    return Some(response);
                }
            }
            Some(CacheEntry::Body(_)) | None => {}
        }

        if ctx.request_cache_control().only_if_cached {
            debug!(key = ?ctx.base_key, "only-if-cached request missed, gateway timeout");
            counter!(LOOKUPS_TOTAL, "outcome" => "gateway_timeout").increment(1);
            let mut response = Response::new(ResponseBody::empty());
            *response.status_mut() = StatusCode::GATEWAY_TIMEOUT;
            return Some(response);
        }

        debug!(key = ?ctx.base_key, "cache miss");
        counter!(LOOKUPS_TOTAL, "outcome" => "miss").increment(1);
        None
    }

    async fn try_serve_cached_response<B>(
        &self,
        ctx: &mut ResponseCachingContext,
        cached: Arc<CachedResponse>,
    ) -> Option<Response<ResponseBody<B>>> {
        ctx.set_cached_response(Arc::clone(&cached), SystemTime::now());
        if !self.policy.is_cached_entry_fresh(ctx) {
            debug!(key = ?ctx.base_key, "cached entry is stale");
            return None;
        }
        let age = ctx.cached_entry_age().unwrap_or(Duration::ZERO);

        if content_is_not_modified(&cached.headers, &ctx.request().headers) {
            let mut response = Response::new(ResponseBody::empty());
            *response.status_mut() = StatusCode::NOT_MODIFIED;
            let headers = response.headers_mut();
            for name in NOT_MODIFIED_HEADERS {
                for value in cached.headers.get_all(&name) {
                    headers.append(name.clone(), value.clone());
                }
            }
            debug!(key = ?ctx.base_key, "served 304 from cache");
            counter!(LOOKUPS_TOTAL, "outcome" => "not_modified").increment(1);
            return Some(response);
        }

        let body = match &cached.body {
            Some(body) => body.clone(),
            None => match self.store.get(&cached.body_key_prefix).await {
                Some(CacheEntry::Body(stored)) => stored.body.clone(),
                _ => {
                    debug!(
                        body_key = %cached.body_key_prefix,
                        "separately stored body is missing, treating as miss"
                    );
                    return None;
                }
            },
        };

        let mut headers = cached.headers.clone();
        headers.insert(AGE, HeaderValue::from(age.as_secs()));
        if !headers.contains_key(CONTENT_LENGTH) && !is_chunked(&headers) {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        }

        let body = if ctx.request().method == Method::HEAD {
            ResponseBody::empty()
        } else {
            ResponseBody::cached(body)
        };
        let mut response = Response::new(body);
        *response.status_mut() = cached.status;
        *response.headers_mut() = headers;

        debug!(key = ?ctx.base_key, age = age.as_secs(), "served from cache");
        counter!(LOOKUPS_TOTAL, "outcome" => "hit").increment(1);
        Some(response)
    }

    async fn start_response<B>(
        self: Arc<Self>,
        mut ctx: ResponseCachingContext,
        mut capture: ResponseCapture,
        response: Response<B>,
    ) -> Response<ResponseBody<B>>
    where
        B: Body<Data = Bytes> + Send + 'static,
    {
        let (mut parts, body) = response.into_parts();
        self.finalize_headers(&mut ctx, &mut parts).await;

        if !ctx.should_cache_response {
            capture.disable_buffering();
            return Response::from_parts(parts, ResponseBody::passthrough(body));
        }

        let shared = Arc::clone(&self);
        let finalizer = Finalizer::new(move |capture| shared.finalize_body(ctx, capture).boxed());
        let body = CaptureBody::new(body, capture, finalizer);
        Response::from_parts(parts, ResponseBody::capturing(body))
    }

    /// Decide whether the response is stored and snapshot its metadata. Runs at
    /// most once per request.
    async fn finalize_headers(
        &self,
        ctx: &mut ResponseCachingContext,
        parts: &mut http::response::Parts,
    ) {
        if ctx.response_started {
            return;
        }
        ctx.response_started = true;

        ctx.set_response(parts.status, parts.headers.clone(), SystemTime::now());
        if !self.policy.is_response_cacheable(ctx) {
            debug!(key = ?ctx.base_key, status = %parts.status, "response not cacheable");
            return;
        }
        ctx.should_cache_response = true;

        let cc = ctx.response_cache_control();
        let response_time = ctx.response_time();
        let valid_for = cc
            .s_maxage
            .or(cc.max_age)
            .or_else(|| {
                ctx.response_expires()
                    .map(|expires| expires.duration_since(response_time).unwrap_or(Duration::ZERO))
            })
            .unwrap_or(self.options.default_expiration);
        ctx.cached_response_valid_for = Some(valid_for);

        let vary_headers = vary_header_names(&parts.headers);
        let vary_query = parts
            .extensions
            .get::<VaryByQueryKeys>()
            .map(|keys| keys.0.as_slice())
            .unwrap_or_default();
        if !vary_headers.is_empty() || !vary_query.is_empty() {
            let headers = normalize_names(&vary_headers);
            let query_keys = normalize_names(vary_query);
            let rules = match ctx.cached_vary_by_rules.as_ref() {
                Some(existing) if existing.headers == headers && existing.query_keys == query_keys => {
                    Arc::clone(existing)
                }
                _ => {
                    let rules = Arc::new(CachedVaryByRules {
                        vary_by_key_prefix: new_key_prefix(),
                        headers,
                        query_keys,
                    });
                    debug!(key = ?ctx.base_key, prefix = %rules.vary_by_key_prefix, "new vary rules");
                    rules
                }
            };
            ctx.cached_vary_by_rules = Some(Arc::clone(&rules));
            self.store
                .set(&ctx.base_key, CacheEntry::VaryByRules(rules), valid_for)
                .await;
            ctx.storage_vary_key = self.keys.create_storage_vary_key(ctx);
        }

        if let Some(date) = ctx.ensure_response_date() {
            parts.headers.insert(DATE, date);
        }

        let mut headers = ctx.response_headers().clone();
        headers.remove(AGE);
        ctx.pending_response = Some(CachedResponse {
            created: ctx.response_date().unwrap_or(response_time),
            status: parts.status,
            headers,
            body_key_prefix: new_key_prefix(),
            body: None,
        });
    }

    /// Persist the captured response once its body has been fully sent.
    async fn finalize_body(self: Arc<Self>, mut ctx: ResponseCachingContext, capture: ResponseCapture) {
        if !ctx.should_cache_response || !capture.buffering_enabled() {
            debug!(key = ?ctx.base_key, "response body not captured, skipping storage");
            return;
        }
        let Some(mut response) = ctx.pending_response.take() else {
            return;
        };

        let captured = capture.len();
        if let Some(declared) = content_length(&response.headers) {
            if declared != captured as u64 {
                debug!(
                    key = ?ctx.base_key,
                    declared,
                    captured,
                    "content length mismatch, skipping storage"
                );
                return;
            }
        }

        let valid_for = ctx
            .cached_response_valid_for
            .unwrap_or(self.options.default_expiration);
        let key = ctx.storage_vary_key.take().unwrap_or(ctx.base_key);
        let body = capture.into_bytes();

        if captured >= self.options.body_split_threshold {
            let body_key = response.body_key_prefix.clone();
            self.store
                .set(&body_key, CachedResponseBody { body }.into(), valid_for)
                .await;
            self.store.set(&key, response.into(), valid_for).await;
            counter!(STORES_TOTAL, "layout" => "split").increment(1);
        } else {
            response.body = Some(body);
            self.store.set(&key, response.into(), valid_for).await;
            counter!(STORES_TOTAL, "layout" => "inline").increment(1);
        }
        debug!(
            key = ?key,
            bytes = captured,
            valid_for_secs = valid_for.as_secs(),
            "response stored"
        );
    }
}

fn new_key_prefix() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
