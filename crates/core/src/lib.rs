//! Crate for Lastgood, a reverse proxy that serves the last good response when the upstream fails.

#[cfg(feature = "rustls-tls")]
#[cfg(feature = "native-tls")]
compile_error!("You can only enable one TLS backend");

pub extern crate url;

mod cache;
mod http_client;
mod routes;
mod upstream;

use anyhow::{Context, Result};
use axum::{Router, http::StatusCode};
use cache::CacheStore;
use core::{net::SocketAddr, time::Duration};
use http_client::build_http_client;
use std::{path::PathBuf, sync::Arc};
use tokio::{net::TcpListener, signal};
use tower_http::{
    catch_panic::CatchPanicLayer,
    timeout::TimeoutLayer,
    trace::{self, TraceLayer},
};
use tracing::{Level, info};
use upstream::Forwarder;
use url::Url;

/// # Example
/// ```rust,no_run
/// use std::{net::{SocketAddr, IpAddr, Ipv4Addr}, time::Duration};
/// use lastgood::{CacheSettings, Server, ServerSettings, UpstreamSettings, url::Url};
///
/// # #[tokio::main]
/// # async fn main() {
/// let server = Server::new(ServerSettings {
///     request_timeout: Duration::from_secs(60),
///     upstream_settings: UpstreamSettings::new(Url::parse("http://localhost:9000").unwrap()),
///     cache_settings: CacheSettings::default(),
/// })
/// .unwrap();
/// server.start(&SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8080)).await.unwrap();
/// # }
/// ```
#[derive(Debug)]
pub struct Server {
    router_inner: Router,
}

/// Settings to run the server with.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Maximum time an incoming request may take, including the upstream call and cache work.
    pub request_timeout: Duration,

    /// See [`UpstreamSettings`].
    pub upstream_settings: UpstreamSettings,

    /// See [`CacheSettings`].
    pub cache_settings: CacheSettings,
}

/// Configuration options for requests made to the upstream.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// Absolute URL of the upstream. Any path it carries prefixes every forwarded path.
    pub host: Url,

    /// Whether to allow invalid/expired/forged TLS certificates when making upstream requests.
    ///
    /// **Enabling this is dangerous and is usually not necessary.**
    pub allow_invalid_certs: bool,

    /// Maximum time an upstream request may take before it is abandoned and considered failed.
    pub request_timeout: Duration,

    /// The maximum amount of redirects to follow when making a request to an upstream server before abandoning the request.
    pub max_redirects: usize,

    /// The proxy to use for all outgoing requests.
    pub request_proxy: Option<Url>,
}

/// Configuration options for the on-disk response cache.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Directory holding the cache artifacts, created on startup if missing.
    pub directory: PathBuf,

    /// Whether successful upstream responses are written to the cache.
    ///
    /// When disabled the cache is read-only but still used for fallback.
    pub write_enabled: bool,
}

impl UpstreamSettings {
    /// Settings for `host` with every other option at its default.
    pub fn new(host: Url) -> Self {
        Self {
            host,
            allow_invalid_certs: false,
            request_timeout: Duration::from_secs(30),
            max_redirects: 10,
            request_proxy: None,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("data"),
            write_enabled: true,
        }
    }
}

#[derive(Debug)]
struct AppState {
    forwarder: Forwarder,
    cache: CacheStore,
    settings: ServerSettings,
}

impl Server {
    /// Create a new server with the provided settings.
    ///
    /// Fails if the cache directory cannot be created or the HTTP client cannot be built.
    pub fn new(settings: ServerSettings) -> Result<Self> {
        std::fs::create_dir_all(&settings.cache_settings.directory).with_context(|| {
            format!(
                "failed to create cache directory {}",
                settings.cache_settings.directory.display()
            )
        })?;
        let cache = CacheStore::new(&settings.cache_settings.directory);

        let client = build_http_client(&settings.upstream_settings)?;
        let forwarder = Forwarder::new(client, settings.upstream_settings.host.clone());
        info!(
            "Forwarding to {} with cache in {} (writes {})",
            forwarder.host(),
            cache.root().display(),
            if settings.cache_settings.write_enabled {
                "enabled"
            } else {
                "disabled"
            }
        );

        let router = Router::new()
            .fallback(routes::proxy_handler)
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                    .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
            )
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                settings.request_timeout,
            ))
            .layer(CatchPanicLayer::new())
            .with_state(Arc::new(AppState {
                forwarder,
                cache,
                settings,
            }));

        Ok(Self {
            router_inner: router,
        })
    }

    /// Start the server and expose it locally on the provided [`SocketAddr`].
    pub async fn start(self, address: &SocketAddr) -> Result<()> {
        let tcp_listener = TcpListener::bind(&address).await?;
        info!("Listening on http://{}", tcp_listener.local_addr()?);
        axum::serve(tcp_listener, self.router_inner)
            .with_graceful_shutdown(Self::shutdown_signal())
            .await?;
        Ok(())
    }

    // https://github.com/tokio-rs/axum/blob/15917c6dbcb4a48707a20e9cfd021992a279a662/examples/graceful-shutdown/src/main.rs#L55
    async fn shutdown_signal() {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings(directory: PathBuf) -> ServerSettings {
        ServerSettings {
            request_timeout: Duration::from_secs(10),
            upstream_settings: UpstreamSettings::new(Url::parse("http://localhost:9000").unwrap()),
            cache_settings: CacheSettings {
                directory,
                write_enabled: true,
            },
        }
    }

    #[test]
    fn test_new_creates_cache_directory() {
        let dir = TempDir::new().unwrap();
        let cache_dir = dir.path().join("nested").join("cache");
        Server::new(settings(cache_dir.clone())).unwrap();
        assert!(cache_dir.is_dir());
    }

    #[test]
    fn test_new_fails_when_cache_directory_cannot_be_created() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"").unwrap();
        assert!(Server::new(settings(blocker.join("cache"))).is_err());
    }
}
