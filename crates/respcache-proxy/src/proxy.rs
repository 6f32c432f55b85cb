use axum::body::Body;
use axum::extract::State;
use axum::http::header::{CONNECTION, TRANSFER_ENCODING};
use axum::http::{Request, Response, StatusCode};
use hyper_util::client::legacy::Client;
use respcache::MemoryResponseCache;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub type HttpClient = Client<hyper_util::client::legacy::connect::HttpConnector, Body>;

/// Shared application state passed to all handlers.
pub struct AppState {
    pub store: Arc<MemoryResponseCache>,
    pub client: HttpClient,
    pub upstream_url: String,
    pub upstream_timeout: Duration,
}

/// Forwards the request upstream. Caching happens in the layer around this handler.
pub async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
) -> Response<Body> {
    let start = Instant::now();
    let (parts, body) = req.into_parts();

    let upstream_uri = format!(
        "{}{}",
        state.upstream_url.trim_end_matches('/'),
        parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/")
    );

    let mut builder = Request::builder().method(&parts.method).uri(&upstream_uri);
    for (key, value) in parts.headers.iter() {
        if key == CONNECTION {
            continue;
        }
        builder = builder.header(key, value);
    }
    let upstream_req = match builder.body(body) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(error = %e, "failed to build upstream request");
            return bad_gateway();
        }
    };

    let upstream_resp =
        match tokio::time::timeout(state.upstream_timeout, state.client.request(upstream_req)).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                tracing::error!(error = %e, upstream = %upstream_uri, "upstream request failed");
                metrics::counter!("respcache_upstream_errors_total", "reason" => "request")
                    .increment(1);
                return bad_gateway();
            }
            Err(_) => {
                tracing::error!(upstream = %upstream_uri, "upstream request timed out");
                metrics::counter!("respcache_upstream_errors_total", "reason" => "timeout")
                    .increment(1);
                return gateway_timeout();
            }
        };

    tracing::debug!(
        method = %parts.method,
        uri = %parts.uri,
        status = upstream_resp.status().as_u16(),
        latency_us = start.elapsed().as_micros(),
        "upstream responded"
    );

    let (mut parts, body) = upstream_resp.into_parts();
    // Hop-by-hop; the server re-frames the body itself.
    parts.headers.remove(TRANSFER_ENCODING);
    parts.headers.remove(CONNECTION);
    Response::from_parts(parts, Body::new(body))
}

fn bad_gateway() -> Response<Body> {
    status_response(StatusCode::BAD_GATEWAY, "Bad Gateway")
}

fn gateway_timeout() -> Response<Body> {
    status_response(StatusCode::GATEWAY_TIMEOUT, "Gateway Timeout")
}

fn status_response(status: StatusCode, text: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(text));
    *response.status_mut() = status;
    response
}
