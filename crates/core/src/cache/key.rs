use std::path::{Path, PathBuf};

const SEPARATOR: char = '/';
const SUBSTITUTE: char = '-';
const ESCAPE: char = '%';
const ROOT_STEM: &str = "%2F";

const BODY_SUFFIX: &str = ".json";
const HEADER_SUFFIX: &str = ".header";

/// On-disk locations of the two artifacts that make up a cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    /// Raw response body.
    pub body: PathBuf,
    /// Serialized response headers.
    pub headers: PathBuf,
}

impl ArtifactPaths {
    /// Derive the artifact locations for `request_path` under `root`.
    ///
    /// The method is not part of the key, every method shares one slot per path.
    pub fn new(root: &Path, request_path: &str) -> Self {
        let stem = cache_stem(request_path);
        Self {
            body: root.join(format!("{stem}{BODY_SUFFIX}")),
            headers: root.join(format!("{stem}{HEADER_SUFFIX}")),
        }
    }
}

/// Flatten a request path into a single file name stem.
///
/// The substitute and escape characters are percent-escaped before separators
/// are replaced, which keeps distinct paths on distinct stems.
fn cache_stem(request_path: &str) -> String {
    let trimmed = request_path
        .strip_prefix(SEPARATOR)
        .unwrap_or(request_path);
    if trimmed.is_empty() {
        return ROOT_STEM.to_owned();
    }

    let mut stem = String::with_capacity(trimmed.len());
    for ch in trimmed.chars() {
        match ch {
            SEPARATOR => stem.push(SUBSTITUTE),
            SUBSTITUTE => stem.push_str("%2D"),
            ESCAPE => stem.push_str("%25"),
            other => stem.push(other),
        }
    }
    stem
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stem() {
        assert_eq!(cache_stem("/v1/items"), "v1-items");
        assert_eq!(cache_stem("/items"), "items");
        assert_eq!(cache_stem("/"), "%2F");

        // Only a single leading separator is stripped.
        assert_eq!(cache_stem("//a"), "-a");

        // Encoded characters pass through, only the escape is escaped.
        assert_eq!(cache_stem("/a%20b"), "a%2520b");
    }

    #[test]
    fn test_cache_stem_is_collision_free() {
        let paths = [
            "/v1/items",
            "/v1-items",
            "/v1%2Ditems",
            "/v1%252Ditems",
            "/",
            "/%2F",
            "//",
            "/-",
        ];
        let stems: std::collections::HashSet<_> = paths.iter().map(|p| cache_stem(p)).collect();
        assert_eq!(stems.len(), paths.len());
    }

    #[test]
    fn test_artifact_paths() {
        let paths = ArtifactPaths::new(Path::new("data"), "/v1/items");
        assert_eq!(paths.body, Path::new("data").join("v1-items.json"));
        assert_eq!(paths.headers, Path::new("data").join("v1-items.header"));
    }
}
