use async_trait::async_trait;
use bytes::Bytes;
use http::header::{AGE, CACHE_CONTROL, CONTENT_LENGTH, DATE, ETAG, EXPIRES, HOST, VARY};
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use respcache::{
    BuildError, CacheEntry, CachedResponse, MemoryResponseCache, ResponseCacheStore,
    ResponseCachingLayer, ResponseCachingOptions, VaryByQueryKeys,
};
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tower::{service_fn, Layer, ServiceExt};

type TestBody = Full<Bytes>;

fn get(path: &str) -> Request<TestBody> {
    Request::get(path)
        .header(HOST, "example.com")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

fn get_with(path: &str, name: &str, value: &str) -> Request<TestBody> {
    let mut req = get(path);
    req.headers_mut().insert(
        http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
        value.parse().unwrap(),
    );
    req
}

fn ok(cache_control: &str, body: impl Into<Bytes>) -> Response<TestBody> {
    Response::builder()
        .header(CACHE_CONTROL, cache_control)
        .body(Full::new(body.into()))
        .unwrap()
}

fn base_key(path: &str) -> String {
    format!("GET\x1eHTTP\x1eEXAMPLE.COM{path}")
}

fn caching(
    store: &Arc<MemoryResponseCache>,
    options: ResponseCachingOptions,
) -> ResponseCachingLayer {
    ResponseCachingLayer::new(Arc::clone(store), options).unwrap()
}

async fn text<B>(response: Response<B>) -> String
where
    B: http_body::Body,
    B::Error: std::fmt::Debug,
{
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn uncacheable_request_passes_through_untouched() {
    let store = Arc::new(MemoryResponseCache::new(1024));
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let svc = caching(&store, ResponseCachingOptions::default()).layer(service_fn(
        move |_req: Request<TestBody>| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, Infallible>(ok("max-age=60", "created")) }
        },
    ));

    for _ in 0..2 {
        let req = Request::builder()
            .method(Method::POST)
            .uri("/items")
            .header(HOST, "example.com")
            .body(Full::new(Bytes::from_static(b"{}")))
            .unwrap();
        let response = svc.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().len(), 1);
        assert!(response.headers().get(DATE).is_none());
        assert_eq!(text(response).await, "created");
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(store.is_empty());
}

#[tokio::test]
async fn fresh_response_is_served_from_cache() {
    let store = Arc::new(MemoryResponseCache::new(1024));
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let svc = caching(&store, ResponseCachingOptions::default()).layer(service_fn(
        move |_req: Request<TestBody>| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, Infallible>(ok("max-age=60", "hello")) }
        },
    ));

    let first = svc.clone().oneshot(get("/a")).await.unwrap();
    assert!(first.headers().get(AGE).is_none());
    assert!(first.headers().get(DATE).is_some());
    assert_eq!(text(first).await, "hello");

    match store.get(&base_key("/a")).await {
        Some(CacheEntry::Response(cached)) => {
            assert_eq!(cached.status, StatusCode::OK);
            assert_eq!(cached.body.as_deref(), Some(&b"hello"[..]));
        }
        other => panic!("expected stored response, got {other:?}"),
    }

    let second = svc.clone().oneshot(get("/a")).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    let age: u64 = second.headers()[AGE].to_str().unwrap().parse().unwrap();
    assert!(age <= 1);
    assert_eq!(second.headers()[CONTENT_LENGTH], "5");
    assert_eq!(second.headers()[CACHE_CONTROL], "max-age=60");
    assert_eq!(text(second).await, "hello");

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn variants_follow_vary_header() {
    let store = Arc::new(MemoryResponseCache::new(1024));
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let svc = caching(&store, ResponseCachingOptions::default()).layer(service_fn(
        move |req: Request<TestBody>| {
            counter.fetch_add(1, Ordering::SeqCst);
            let lang = req
                .headers()
                .get("accept-language")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("none")
                .to_owned();
            async move {
                let mut response = ok("max-age=60", format!("lang={lang}"));
                response
                    .headers_mut()
                    .insert(VARY, "Accept-Language".parse().unwrap());
                Ok::<_, Infallible>(response)
            }
        },
    ));

    let en = || get_with("/greeting", "accept-language", "en");
    let fr = || get_with("/greeting", "accept-language", "fr");

    assert_eq!(text(svc.clone().oneshot(en()).await.unwrap()).await, "lang=en");
    assert_eq!(text(svc.clone().oneshot(fr()).await.unwrap()).await, "lang=fr");
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let en_again = svc.clone().oneshot(en()).await.unwrap();
    assert!(en_again.headers().get(AGE).is_some());
    assert_eq!(text(en_again).await, "lang=en");
    assert_eq!(text(svc.clone().oneshot(fr()).await.unwrap()).await, "lang=fr");
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let Some(CacheEntry::VaryByRules(rules)) = store.get(&base_key("/greeting")).await else {
        panic!("expected vary rules under the base key");
    };
    assert_eq!(rules.headers, vec!["ACCEPT-LANGUAGE".to_string()]);
    assert!(rules.query_keys.is_empty());
}

#[tokio::test]
async fn variants_follow_declared_query_keys() {
    let store = Arc::new(MemoryResponseCache::new(1024));
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let svc = caching(&store, ResponseCachingOptions::default()).layer(service_fn(
        move |req: Request<TestBody>| {
            counter.fetch_add(1, Ordering::SeqCst);
            let query = req.uri().query().unwrap_or_default().to_owned();
            async move {
                let mut response = ok("max-age=60", query);
                response
                    .extensions_mut()
                    .insert(VaryByQueryKeys::new(["page"]));
                Ok::<_, Infallible>(response)
            }
        },
    ));

    assert_eq!(text(svc.clone().oneshot(get("/list?page=1")).await.unwrap()).await, "page=1");
    assert_eq!(text(svc.clone().oneshot(get("/list?page=2")).await.unwrap()).await, "page=2");
    let shared = svc.clone().oneshot(get("/list?utm=x&page=1")).await.unwrap();
    assert_eq!(text(shared).await, "page=1");

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn body_split_at_threshold() {
    let store = Arc::new(MemoryResponseCache::new(1024));
    let options = ResponseCachingOptions::default().body_split_threshold(8);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let svc = caching(&store, options).layer(service_fn(move |req: Request<TestBody>| {
        counter.fetch_add(1, Ordering::SeqCst);
        let body = if req.uri().path() == "/inline" { "1234567" } else { "12345678" };
        async move { Ok::<_, Infallible>(ok("max-age=60", body)) }
    }));

    text(svc.clone().oneshot(get("/inline")).await.unwrap()).await;
    text(svc.clone().oneshot(get("/split")).await.unwrap()).await;

    let Some(CacheEntry::Response(inline)) = store.get(&base_key("/inline")).await else {
        panic!("expected inline response");
    };
    assert_eq!(inline.body.as_deref(), Some(&b"1234567"[..]));
    assert!(store.get(&inline.body_key_prefix).await.is_none());

    let Some(CacheEntry::Response(split)) = store.get(&base_key("/split")).await else {
        panic!("expected split response");
    };
    assert!(split.body.is_none());
    match store.get(&split.body_key_prefix).await {
        Some(CacheEntry::Body(body)) => assert_eq!(&body.body[..], b"12345678"),
        other => panic!("expected separate body, got {other:?}"),
    }

    let served = svc.clone().oneshot(get("/split")).await.unwrap();
    assert_eq!(served.headers()[CONTENT_LENGTH], "8");
    assert_eq!(text(served).await, "12345678");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn stale_entry_is_replaced() {
    let store = Arc::new(MemoryResponseCache::new(1024));
    let created = SystemTime::now() - Duration::from_secs(120);
    let mut headers = http::HeaderMap::new();
    headers.insert(CACHE_CONTROL, "max-age=60".parse().unwrap());
    headers.insert(DATE, httpdate::fmt_http_date(created).parse().unwrap());
    let stale = CachedResponse {
        created,
        status: StatusCode::OK,
        headers,
        body_key_prefix: "old".into(),
        body: Some(Bytes::from_static(b"old")),
    };
    store
        .set(&base_key("/news"), stale.into(), Duration::from_secs(300))
        .await;

    let svc = caching(&store, ResponseCachingOptions::default()).layer(service_fn(
        |_req: Request<TestBody>| async { Ok::<_, Infallible>(ok("max-age=60", "new")) },
    ));

    let response = svc.clone().oneshot(get("/news")).await.unwrap();
    assert!(response.headers().get(AGE).is_none());
    assert_eq!(text(response).await, "new");

    let Some(CacheEntry::Response(stored)) = store.get(&base_key("/news")).await else {
        panic!("expected stored response");
    };
    assert_eq!(stored.body.as_deref(), Some(&b"new"[..]));
}

#[tokio::test]
async fn matching_etag_gets_not_modified() {
    let store = Arc::new(MemoryResponseCache::new(1024));
    let svc = caching(&store, ResponseCachingOptions::default()).layer(service_fn(
        |_req: Request<TestBody>| async {
            let mut response = ok("max-age=60", "versioned");
            response.headers_mut().insert(ETAG, "\"v1\"".parse().unwrap());
            Ok::<_, Infallible>(response)
        },
    ));

    text(svc.clone().oneshot(get("/doc")).await.unwrap()).await;

    let response = svc
        .clone()
        .oneshot(get_with("/doc", "if-none-match", "\"v1\""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(response.headers()[ETAG], "\"v1\"");
    assert_eq!(response.headers()[CACHE_CONTROL], "max-age=60");
    assert!(response.headers().get(DATE).is_some());
    assert_eq!(text(response).await, "");

    let response = svc
        .clone()
        .oneshot(get_with("/doc", "if-none-match", "\"v0\""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(text(response).await, "versioned");
}

#[tokio::test]
async fn only_if_cached_miss_is_gateway_timeout() {
    let store = Arc::new(MemoryResponseCache::new(1024));
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let svc = caching(&store, ResponseCachingOptions::default()).layer(service_fn(
        move |_req: Request<TestBody>| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, Infallible>(ok("max-age=60", "unused")) }
        },
    ));

    let response = svc
        .oneshot(get_with("/offline", "cache-control", "only-if-cached"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(text(response).await, "");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn truncated_body_is_not_stored() {
    let store = Arc::new(MemoryResponseCache::new(1024));
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let svc = caching(&store, ResponseCachingOptions::default()).layer(service_fn(
        move |_req: Request<TestBody>| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                let mut response = ok("max-age=60", "short");
                response.headers_mut().insert(CONTENT_LENGTH, "10".parse().unwrap());
                Ok::<_, Infallible>(response)
            }
        },
    ));

    for _ in 0..2 {
        assert_eq!(text(svc.clone().oneshot(get("/cut")).await.unwrap()).await, "short");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(store.get(&base_key("/cut")).await.is_none());
}

#[tokio::test]
async fn oversized_body_is_not_stored() {
    let store = Arc::new(MemoryResponseCache::new(1024));
    let options = ResponseCachingOptions::default().maximum_body_size(4);
    let svc = caching(&store, options).layer(service_fn(|_req: Request<TestBody>| async {
        Ok::<_, Infallible>(ok("max-age=60", "too large"))
    }));

    assert_eq!(text(svc.oneshot(get("/big")).await.unwrap()).await, "too large");
    assert!(store.get(&base_key("/big")).await.is_none());
}

#[tokio::test]
async fn missing_separate_body_is_a_miss() {
    let store = Arc::new(MemoryResponseCache::new(1024));
    let mut headers = http::HeaderMap::new();
    headers.insert(CACHE_CONTROL, "max-age=60".parse().unwrap());
    let dangling = CachedResponse {
        created: SystemTime::now(),
        status: StatusCode::OK,
        headers,
        body_key_prefix: "evicted-body".into(),
        body: None,
    };
    store
        .set(&base_key("/dangling"), dangling.into(), Duration::from_secs(60))
        .await;

    let svc = caching(&store, ResponseCachingOptions::default()).layer(service_fn(
        |_req: Request<TestBody>| async { Ok::<_, Infallible>(ok("max-age=60", "rebuilt")) },
    ));

    let response = svc.oneshot(get("/dangling")).await.unwrap();
    assert!(response.headers().get(AGE).is_none());
    assert_eq!(text(response).await, "rebuilt");
}

#[tokio::test]
async fn request_no_store_skips_storage() {
    let store = Arc::new(MemoryResponseCache::new(1024));
    let svc = caching(&store, ResponseCachingOptions::default()).layer(service_fn(
        |_req: Request<TestBody>| async { Ok::<_, Infallible>(ok("max-age=60", "private")) },
    ));

    let response = svc
        .oneshot(get_with("/p", "cache-control", "no-store"))
        .await
        .unwrap();
    assert_eq!(text(response).await, "private");
    assert!(store.is_empty());
}

#[tokio::test]
async fn uncacheable_response_is_not_stored() {
    let store = Arc::new(MemoryResponseCache::new(1024));
    let svc = caching(&store, ResponseCachingOptions::default()).layer(service_fn(
        |_req: Request<TestBody>| async { Ok::<_, Infallible>(ok("no-store", "secret")) },
    ));

    let response = svc.oneshot(get("/secret")).await.unwrap();
    assert!(response.headers().get(DATE).is_none());
    assert_eq!(text(response).await, "secret");
    assert!(store.is_empty());
}

#[tokio::test]
async fn head_is_served_without_body() {
    let store = Arc::new(MemoryResponseCache::new(1024));
    let svc = caching(&store, ResponseCachingOptions::default()).layer(service_fn(
        |_req: Request<TestBody>| async { Ok::<_, Infallible>(ok("max-age=60", "")) },
    ));
    let head = || {
        Request::head("/probe")
            .header(HOST, "example.com")
            .body(Full::new(Bytes::new()))
            .unwrap()
    };

    text(svc.clone().oneshot(head()).await.unwrap()).await;
    let response = svc.clone().oneshot(head()).await.unwrap();
    assert!(response.headers().get(AGE).is_some());
    assert_eq!(text(response).await, "");
}

#[tokio::test]
async fn handler_error_propagates() {
    let store = Arc::new(MemoryResponseCache::new(1024));
    let svc = caching(&store, ResponseCachingOptions::default()).layer(service_fn(
        |_req: Request<TestBody>| async {
            Err::<Response<TestBody>, _>(std::io::Error::other("downstream failed"))
        },
    ));

    let Err(err) = svc.oneshot(get("/fail")).await else {
        panic!("expected the downstream error");
    };
    assert_eq!(err.to_string(), "downstream failed");
    assert!(store.is_empty());
}

#[test]
fn builder_requires_every_collaborator() {
    assert!(matches!(
        ResponseCachingLayer::builder().build(),
        Err(BuildError::MissingStore)
    ));
    assert!(matches!(
        ResponseCachingLayer::builder()
            .store(MemoryResponseCache::new(8))
            .build(),
        Err(BuildError::MissingPolicy)
    ));
    assert!(matches!(
        ResponseCachingLayer::builder()
            .store(MemoryResponseCache::new(8))
            .policy(respcache::DefaultResponseCachingPolicy)
            .build(),
        Err(BuildError::MissingKeyProvider)
    ));
    assert!(matches!(
        ResponseCachingLayer::new(
            MemoryResponseCache::new(8),
            ResponseCachingOptions::default().body_split_threshold(0)
        ),
        Err(BuildError::InvalidOption { .. })
    ));
}

/// Store that remembers the lifetime every entry was written with.
struct RecordingStore {
    inner: MemoryResponseCache,
    lifetimes: Mutex<Vec<(String, Duration)>>,
}

impl RecordingStore {
    fn new() -> Self {
        Self {
            inner: MemoryResponseCache::new(1024),
            lifetimes: Mutex::new(Vec::new()),
        }
    }

    fn lifetime_of(&self, key: &str) -> Option<Duration> {
        self.lifetimes
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, valid_for)| *valid_for)
    }
}

#[async_trait]
impl ResponseCacheStore for RecordingStore {
    async fn get(&self, key: &str) -> Option<CacheEntry> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, entry: CacheEntry, valid_for: Duration) {
        self.lifetimes.lock().unwrap().push((key.to_owned(), valid_for));
        self.inner.set(key, entry, valid_for).await;
    }
}

async fn stored_lifetime(headers: Vec<(http::HeaderName, String)>) -> Duration {
    let store = Arc::new(RecordingStore::new());
    let options = ResponseCachingOptions::default().default_expiration(Duration::from_secs(10));
    let layer = ResponseCachingLayer::new(Arc::clone(&store), options).unwrap();
    let svc = layer.layer(service_fn(move |_req: Request<TestBody>| {
        let mut builder = Response::builder();
        for (name, value) in &headers {
            builder = builder.header(name, value.as_str());
        }
        let response = builder.body(Full::new(Bytes::from_static(b"body"))).unwrap();
        async { Ok::<_, Infallible>(response) }
    }));

    let response = svc.oneshot(get("/a")).await.unwrap();
    text(response).await;
    store
        .lifetime_of(&base_key("/a"))
        .expect("response should have been stored")
}

#[tokio::test]
async fn max_age_sets_stored_lifetime() {
    let lifetime = stored_lifetime(vec![(CACHE_CONTROL, "max-age=60".into())]).await;
    assert_eq!(lifetime, Duration::from_secs(60));
}

#[tokio::test]
async fn shared_max_age_takes_precedence_for_lifetime() {
    let lifetime = stored_lifetime(vec![(CACHE_CONTROL, "max-age=60, s-maxage=300".into())]).await;
    assert_eq!(lifetime, Duration::from_secs(300));
}

#[tokio::test]
async fn expires_sets_lifetime_relative_to_response_time() {
    let expires = httpdate::fmt_http_date(SystemTime::now() + Duration::from_secs(100));
    let lifetime = stored_lifetime(vec![
        (CACHE_CONTROL, "public".into()),
        (EXPIRES, expires),
    ])
    .await;
    assert!(
        (Duration::from_secs(98)..=Duration::from_secs(100)).contains(&lifetime),
        "lifetime {lifetime:?}"
    );
}

#[tokio::test]
async fn default_expiration_applies_without_freshness_headers() {
    let lifetime = stored_lifetime(vec![(CACHE_CONTROL, "public".into())]).await;
    assert_eq!(lifetime, Duration::from_secs(10));
}

