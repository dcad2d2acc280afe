use crate::cache::{ArtifactPaths, CacheError, decode_headers, encode_headers};
use axum::http::HeaderMap;
use bytes::Bytes;
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};
use tokio::fs;
use tracing::{error, info, warn};

/// A response recovered from the cache.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    /// Body as received from the upstream.
    pub body: Bytes,
    /// Headers as received from the upstream, absent when the header artifact
    /// is missing or undecodable.
    pub headers: Option<HeaderMap>,
}

/// Reads and writes cache artifacts beneath a root directory.
///
/// There is no locking. Concurrent writers to one path race and the last
/// rename wins; a reader between the body and header writes can see a new body
/// next to stale headers.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    /// Create a store rooted at `root`. The directory is expected to exist.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Artifact locations for `request_path`.
    pub fn artifact_paths(&self, request_path: &str) -> ArtifactPaths {
        ArtifactPaths::new(&self.root, request_path)
    }

    /// Read the cached response for `request_path`.
    ///
    /// Fails only when the body artifact cannot be read. Header problems are
    /// logged and reported as `headers: None`.
    pub async fn read(&self, request_path: &str) -> Result<CachedResponse, CacheError> {
        let paths = self.artifact_paths(request_path);

        let body = match fs::read(&paths.body).await {
            Ok(body) => Bytes::from(body),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(CacheError::Miss(request_path.to_owned()));
            }
            Err(source) => {
                return Err(CacheError::Io {
                    path: paths.body,
                    source,
                });
            }
        };

        let headers = match fs::read(&paths.headers).await {
            Ok(raw) => match decode_headers(&raw) {
                Ok(headers) => Some(headers),
                Err(err) => {
                    warn!("Ignoring cached headers for {request_path}: {err}");
                    None
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => {
                warn!(
                    "Failed to read cached headers {}: {err}",
                    paths.headers.display()
                );
                None
            }
        };

        Ok(CachedResponse { body, headers })
    }

    /// Persist `body` then `headers` as the snapshot for `request_path`.
    ///
    /// Each artifact is written independently. Failures are logged and do not
    /// undo the other artifact. Returns whether both artifacts were stored.
    pub async fn write(&self, request_path: &str, body: &[u8], headers: &HeaderMap) -> bool {
        let paths = self.artifact_paths(request_path);
        info!("Writing cache entry for {request_path}");

        let body_stored = match write_artifact(&paths.body, body).await {
            Ok(()) => true,
            Err(err) => {
                error!("Caching failure: {err}");
                false
            }
        };

        let headers_stored = match encode_headers(headers) {
            Ok(encoded) => match write_artifact(&paths.headers, &encoded).await {
                Ok(()) => true,
                Err(err) => {
                    error!("Caching failure: {err}");
                    false
                }
            },
            Err(err) => {
                error!("Failed to encode headers for {request_path}: {err}");
                false
            }
        };

        body_stored && headers_stored
    }
}

/// Write `contents` beside `path` and rename it into place, so the artifact
/// itself is never seen half written.
async fn write_artifact(path: &Path, contents: &[u8]) -> Result<(), CacheError> {
    static WRITE_SEQUENCE: AtomicU64 = AtomicU64::new(0);

    let mut staging = path.as_os_str().to_owned();
    staging.push(format!(
        ".{}-{}.tmp",
        std::process::id(),
        WRITE_SEQUENCE.fetch_add(1, Ordering::Relaxed)
    ));
    let staging = PathBuf::from(staging);

    if let Err(source) = fs::write(&staging, contents).await {
        return Err(CacheError::Io {
            path: staging,
            source,
        });
    }
    if let Err(source) = fs::rename(&staging, path).await {
        let _ = fs::remove_file(&staging).await;
        return Err(CacheError::Io {
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(())
}
