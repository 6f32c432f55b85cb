use axum::http::header::{AGE, CACHE_CONTROL, CONTENT_LENGTH};
use axum::http::{StatusCode, Uri};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use respcache::{MemoryResponseCache, ResponseCachingLayer, ResponseCachingOptions};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn wait_until_stored(store: &MemoryResponseCache) {
    for _ in 0..100 {
        if !store.is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("nothing was stored");
}

#[tokio::test]
async fn content_length_response_is_cached_behind_hyper() {
    let store = Arc::new(MemoryResponseCache::new(1024));
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let caching =
        ResponseCachingLayer::new(Arc::clone(&store), ResponseCachingOptions::default()).unwrap();
    let app = Router::new()
        .route(
            "/a",
            get(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    ([(CACHE_CONTROL, "max-age=60")], "hello")
                }
            }),
        )
        .layer(caching);

    let addr = serve(app).await;
    let client = Client::builder(TokioExecutor::new()).build_http::<Empty<Bytes>>();
    let uri: Uri = format!("http://{addr}/a").parse().unwrap();

    let first = client.get(uri.clone()).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers()[CONTENT_LENGTH], "5");
    assert!(first.headers().get(AGE).is_none());
    let body = first.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"hello");

    wait_until_stored(&store).await;

    let second = client.get(uri).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert!(second.headers().get(AGE).is_some());
    let body = second.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"hello");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
