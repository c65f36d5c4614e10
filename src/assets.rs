//! Static asset server: serves the built dashboard from a fixed root
//!
//! Unmatched paths fall back to the entry document so the SPA's own
//! client-side router sees a 200, never a 404.

use crate::error::{GatewayError, Result};
use bytes::Bytes;
use http::header;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use std::path::{Path, PathBuf};

/// Serves files from the asset root, falling back to the entry document
#[derive(Debug)]
pub struct AssetServer {
    /// Canonicalized asset root; the traversal guard anchor
    root: PathBuf,
    /// Entry document relative to the root
    index: String,
}

impl AssetServer {
    /// Create an asset server over a readable directory
    pub fn new(root: impl AsRef<Path>, index: impl Into<String>) -> Result<Self> {
        let root = root.as_ref().canonicalize().map_err(|e| {
            GatewayError::Config(format!(
                "asset root {} is not readable: {}",
                root.as_ref().display(),
                e
            ))
        })?;
        Ok(Self {
            root,
            index: index.into(),
        })
    }

    /// Resolve a request path to an existing regular file under the root.
    ///
    /// Returns `None` for missing files and for any path that resolves
    /// outside the root (traversal guard); the router treats both as a
    /// miss and falls back to the entry document.
    pub fn resolve(&self, path: &str) -> Option<PathBuf> {
        let trimmed = path.trim_start_matches('/');
        let candidate = if trimmed.is_empty() {
            self.root.join(&self.index)
        } else {
            self.root.join(trimmed)
        };
        let resolved = candidate.canonicalize().ok()?;
        if !resolved.starts_with(&self.root) {
            tracing::warn!(path = path, "Path traversal attempt blocked");
            return None;
        }
        resolved.is_file().then_some(resolved)
    }

    /// Serve a resolved file with content type and cache headers
    pub async fn serve(&self, path: &Path) -> Result<Response<Full<Bytes>>> {
        let body = tokio::fs::read(path).await?;
        let mime = mime_guess::from_path(path).first_or_octet_stream();

        // The entry document is always revalidated; bundle assets cache briefly
        let cache = if path.file_name().and_then(|n| n.to_str()) == Some(self.index.as_str()) {
            "no-cache"
        } else {
            "public, max-age=3600"
        };

        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, mime.as_ref())
            .header(header::CACHE_CONTROL, cache)
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| GatewayError::Config(e.to_string()))
    }

    /// Serve the entry document (SPA fallback), always 200
    pub async fn serve_index(&self) -> Result<Response<Full<Bytes>>> {
        let path = self.root.join(&self.index);
        let body = tokio::fs::read(&path).await?;
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
            .header(header::CACHE_CONTROL, "no-cache")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| GatewayError::Config(e.to_string()))
    }
}
