use crate::{
    AppState,
    cache::CachedResponse,
    routes::{FALLBACK_HEADER, FALLBACK_HEADER_VALUE},
    upstream::{UpstreamError, UpstreamResponse},
};
use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

impl IntoResponse for UpstreamError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}

/// Forward any request to the upstream, falling back to the last cached
/// response for the same path when the upstream cannot be reached.
pub async fn proxy_handler(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let path = parts.uri.path().to_owned();

    let outbound = match state
        .forwarder
        .build_request(&parts.method, &parts.uri, &parts.headers, body)
    {
        Ok(outbound) => outbound,
        Err(err) => {
            error!("Failed to build upstream request for {path}: {err}");
            return err.into_response();
        }
    };

    let upstream_err = match state.forwarder.send(outbound).await {
        Ok(upstream) => {
            debug!("Upstream responded with {} for {path}", upstream.status);
            let response = live_response(&upstream);
            if state.settings.cache_settings.write_enabled
                && !state
                    .cache
                    .write(&path, &upstream.body, &upstream.headers)
                    .await
            {
                warn!("Cache entry for {path} was not fully stored, serving live response only");
            }
            return response;
        }
        Err(err) => err,
    };

    warn!("Failed to make request to upstream server for {path}: {upstream_err}");
    match state.cache.read(&path).await {
        Ok(cached) => {
            info!("Returning cached response for {path}");
            fallback_response(cached)
        }
        Err(cache_err) => {
            debug!("No usable cache entry: {cache_err}");
            upstream_err.into_response()
        }
    }
}

/// Headers that describe the upstream connection rather than the content and
/// are never replayed to the client.
fn is_replayed_header(name: &HeaderName) -> bool {
    !matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
            | "content-length"
    )
}

fn copy_replayed_headers(from: &HeaderMap, to: &mut HeaderMap) {
    for (name, value) in from.iter() {
        if is_replayed_header(name) {
            to.append(name.clone(), value.clone());
        }
    }
}

// The upstream status is not carried over, the response keeps the default status.
fn live_response(upstream: &UpstreamResponse) -> Response {
    let mut response = Response::new(Body::from(upstream.body.clone()));
    copy_replayed_headers(&upstream.headers, response.headers_mut());
    response
}

fn fallback_response(cached: CachedResponse) -> Response {
    let mut response = Response::new(Body::from(cached.body));
    response
        .headers_mut()
        .insert(FALLBACK_HEADER, FALLBACK_HEADER_VALUE);
    if let Some(headers) = &cached.headers {
        copy_replayed_headers(headers, response.headers_mut());
    }
    response
}
