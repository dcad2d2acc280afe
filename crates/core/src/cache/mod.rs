//! Last-known-good response snapshots persisted on disk.

mod headers;
mod key;
mod store;

pub use headers::{decode_headers, encode_headers};
pub use key::ArtifactPaths;
pub use store::{CacheStore, CachedResponse};

/// Errors raised while reading or writing cache artifacts.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// No body artifact exists for the requested path.
    #[error("no cached response for {0}")]
    Miss(String),

    /// The header artifact is not a JSON object of string arrays.
    #[error("malformed cached headers: {0}")]
    MalformedHeader(#[source] serde_json::Error),

    /// Headers could not be serialized for storage.
    #[error("failed to encode headers: {0}")]
    Encode(#[source] serde_json::Error),

    /// The header artifact holds a name or value that is not a valid header.
    #[error("invalid cached header: {0}")]
    InvalidHeader(String),

    /// Filesystem failure on an artifact.
    #[error("cache io failure on {path}: {source}")]
    Io {
        /// Artifact that failed.
        path: std::path::PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}
