//! Layered web content: local dev dir, configured override, embedded bundle.
//!
//! Lookups try each layer in order and return the first hit. Not-found is
//! distinct from an I/O failure so the HTTP layer can answer 404 vs 500.

use rust_embed::RustEmbed;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// The default web UI, compiled into the binary.
#[derive(RustEmbed)]
#[folder = "www"]
struct BundledWww;

#[derive(Debug, Error)]
pub enum WebFsError {
    #[error("not found")]
    NotFound,
    #[error("invalid path")]
    InvalidPath,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub struct LayeredFs {
    dirs: Vec<PathBuf>,
}

impl LayeredFs {
    /// Layer order: `local_dir` (development override next to the process),
    /// then `override_dir` (`SEE_WEB_ROOT`), then the embedded bundle.
    pub fn new(local_dir: Option<PathBuf>, override_dir: Option<PathBuf>) -> Self {
        let mut dirs = Vec::new();
        if let Some(dir) = local_dir {
            dirs.push(dir);
        }
        if let Some(dir) = override_dir {
            dirs.push(dir);
        }
        LayeredFs { dirs }
    }

    /// Reads `path` from the first layer that has it, along with the content
    /// type guessed from the extension.
    pub async fn open(&self, path: &str) -> Result<(Vec<u8>, String), WebFsError> {
        let rel = sanitize(path)?;
        for dir in &self.dirs {
            match tokio::fs::read(dir.join(&rel)).await {
                Ok(bytes) => return Ok((bytes, guess_content_type(&rel))),
                Err(e) if skippable(&e) => {}
                Err(e) => return Err(WebFsError::Io(e)),
            }
        }
        match BundledWww::get(&rel) {
            Some(file) => Ok((file.data.into_owned(), guess_content_type(&rel))),
            None => Err(WebFsError::NotFound),
        }
    }
}

/// Missing layers and paths that run through a non-directory just mean "try
/// the next layer".
fn skippable(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        e.kind(),
        ErrorKind::NotFound | ErrorKind::NotADirectory | ErrorKind::IsADirectory
    )
}

/// Normalizes a request path into a relative lookup key, refusing anything
/// that could escape the content roots.
fn sanitize(path: &str) -> Result<String, WebFsError> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Err(WebFsError::NotFound);
    }
    let rel = Path::new(trimmed);
    let clean = rel
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !clean || trimmed.contains('\\') {
        return Err(WebFsError::InvalidPath);
    }
    Ok(trimmed.to_owned())
}

fn guess_content_type(rel: &str) -> String {
    mime_guess::from_path(rel).first_or_octet_stream().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embedded_bundle_is_the_last_layer() {
        let fs = LayeredFs::new(None, None);
        let (bytes, content_type) = fs.open("index.html").await.expect("bundled index");
        assert!(!bytes.is_empty());
        assert_eq!(content_type, "text/html");
    }

    #[tokio::test]
    async fn earlier_layers_shadow_the_bundle() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("index.html"), "<p>local</p>").expect("write");

        let fs = LayeredFs::new(Some(dir.path().to_owned()), None);
        let (bytes, _) = fs.open("index.html").await.expect("local index");
        assert_eq!(bytes, b"<p>local</p>");
    }

    #[tokio::test]
    async fn missing_files_are_not_found() {
        let fs = LayeredFs::new(Some(PathBuf::from("/nonexistent-layer")), None);
        assert!(matches!(
            fs.open("nothing-has-this-name.bin").await,
            Err(WebFsError::NotFound)
        ));
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        let fs = LayeredFs::new(None, None);
        assert!(matches!(
            fs.open("../../../etc/passwd").await,
            Err(WebFsError::InvalidPath)
        ));
    }
}
