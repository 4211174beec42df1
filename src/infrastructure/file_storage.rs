use crate::domain::ports::{DocumentStorage, StoredObject};
use crate::error::{FieldOpsError, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Stores uploaded documents as plain files below a root directory.
///
/// Keys are relative, `/`-separated paths. Only `[A-Za-z0-9._-]` is allowed in
/// a segment, and `.` / `..` segments are refused, so a key can never escape
/// the root.
#[derive(Debug, Clone)]
pub struct LocalDocumentStorage {
    root: PathBuf,
}

impl LocalDocumentStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |path, segment| path.join(segment)))
    }
}

pub fn validate_key(key: &str) -> Result<()> {
    let invalid = |reason: &str| FieldOpsError::ValidationError(format!("Invalid storage key {key:?}: {reason}"));

    if key.is_empty() {
        return Err(invalid("empty"));
    }
    if key.starts_with('/') {
        return Err(invalid("absolute"));
    }
    for segment in key.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(invalid("bad segment"));
        }
        if !segment.chars().all(is_key_char) {
            return Err(invalid("bad character"));
        }
    }
    Ok(())
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

fn sanitize_segment(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if is_key_char(c) { c } else { '_' })
        .collect();
    cleaned.trim_start_matches('.').to_string()
}

/// Builds a collision-free key `<category>/<uuid>-<file name>`.
pub fn storage_key(category: &str, file_name: &str) -> String {
    let category = match sanitize_segment(category) {
        c if c.is_empty() => "documents".to_string(),
        c => c,
    };
    // keep only the final path component of whatever the client sent
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or_default();
    let name = match sanitize_segment(base) {
        n if n.is_empty() => "upload".to_string(),
        n => n,
    };
    format!("{category}/{}-{name}", Uuid::new_v4())
}

/// Media type guessed from the key's extension.
pub fn content_type_for(key: &str) -> &'static str {
    let extension = key.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "tif" | "tiff" => "image/tiff",
        "pdf" => "application/pdf",
        "csv" => "text/csv",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl DocumentStorage for LocalDocumentStorage {
    async fn put(&self, key: &str, bytes: &[u8], content_type: Option<&str>) -> Result<StoredObject> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        debug!(key, size = bytes.len(), "document stored");

        Ok(StoredObject {
            key: key.to_string(),
            size: bytes.len() as u64,
            content_type: content_type.map(str::to_string),
        })
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
