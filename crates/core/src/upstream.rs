use crate::http_client::HttpClient;
use axum::{
    body::Body,
    http::{HeaderMap, Method, StatusCode, Uri, header},
};
use bytes::Bytes;
use std::error::Error as StdError;
use tracing::debug;
use url::Url;

/// Errors from building or sending the upstream request.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// The outbound request could not be built from the inbound one.
    #[error("{0}")]
    RequestConstruction(String),

    /// The upstream could not be reached or did not deliver a full response.
    #[error("{0}")]
    Transport(String),
}

/// A fully buffered upstream response.
#[derive(Debug)]
pub struct UpstreamResponse {
    /// Status reported by the upstream.
    pub status: StatusCode,
    /// Headers reported by the upstream.
    pub headers: HeaderMap,
    /// Complete body.
    pub body: Bytes,
}

/// Build the upstream target for an inbound path and query.
///
/// The path and query are appended to the host as received, the query only
/// when non-empty. The result goes through URL parsing, which resolves dot
/// segments in the path and percent-encodes characters the URL standard does
/// not allow raw (such as `'` in a query). Already-encoded sequences are kept.
pub fn upstream_url(host: &Url, path: &str, query: Option<&str>) -> Result<Url, UpstreamError> {
    let mut target = host.as_str().trim_end_matches('/').to_owned();
    if !path.starts_with('/') {
        target.push('/');
    }
    target.push_str(path);
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        target.push('?');
        target.push_str(query);
    }
    Url::parse(&target).map_err(|err| UpstreamError::RequestConstruction(err.to_string()))
}

/// Whether requests with this method forward their body upstream.
pub fn method_carries_body(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD)
}

/// Whether an inbound header is copied onto the outbound request.
///
/// The client derives `host` from the target URL and the framing headers
/// from the attached body.
fn is_forwarded_header(name: &header::HeaderName) -> bool {
    !matches!(
        *name,
        header::HOST | header::CONTENT_LENGTH | header::TRANSFER_ENCODING
    )
}

/// Sends inbound requests on to a single upstream host.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: HttpClient,
    host: Url,
}

impl Forwarder {
    /// Create a forwarder targeting `host` through `client`.
    pub fn new(client: HttpClient, host: Url) -> Self {
        Self { client, host }
    }

    /// The upstream host requests are forwarded to.
    pub fn host(&self) -> &Url {
        &self.host
    }

    /// Build the outbound request for an inbound one.
    pub fn build_request(
        &self,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: Body,
    ) -> Result<reqwest::Request, UpstreamError> {
        let target = upstream_url(&self.host, uri.path(), uri.query())?;

        let mut outbound = HeaderMap::with_capacity(headers.len());
        for (name, value) in headers.iter() {
            if is_forwarded_header(name) {
                outbound.append(name.clone(), value.clone());
            }
        }

        let mut builder = self.client.request(method.clone(), target).headers(outbound);
        if method_carries_body(method) {
            builder = builder.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }
        builder
            .build()
            .map_err(|err| UpstreamError::RequestConstruction(error_chain(&err)))
    }

    /// Send a prepared request and buffer the whole response.
    pub async fn send(&self, request: reqwest::Request) -> Result<UpstreamResponse, UpstreamError> {
        debug!("[{}] {}", request.method(), request.url());
        let response = self
            .client
            .execute(request)
            .await
            .map_err(|err| UpstreamError::Transport(error_chain(&err)))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|err| UpstreamError::Transport(error_chain(&err)))?;

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}

/// Render an error together with all of its sources.
fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
