mod proxy;

pub use proxy::*;

use axum::http::{HeaderName, HeaderValue};

/// Marks responses that were served from the cache instead of the upstream.
pub const FALLBACK_HEADER: HeaderName = HeaderName::from_static("x-src");
pub const FALLBACK_HEADER_VALUE: HeaderValue = HeaderValue::from_static("from cached-proxy");
