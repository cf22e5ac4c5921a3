//! Resolves tool file references to documents stored under the sample root.

use crate::error::{DocumentError, DocumentResult};
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// File extension -> MIME type accepted by the analyzer.
const CONTENT_TYPES: &[(&str, &str)] = &[
    ("pdf", "application/pdf"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("bmp", "image/bmp"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
    ("heif", "image/heif"),
    ("heic", "image/heic"),
    (
        "docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ),
    (
        "xlsx",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    ),
    (
        "pptx",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    ),
    ("html", "text/html"),
    ("htm", "text/html"),
    ("txt", "text/plain"),
];

pub fn content_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    CONTENT_TYPES
        .iter()
        .find(|(known, _)| *known == ext)
        .map(|(_, mime)| *mime)
}

#[derive(Debug, Clone)]
pub struct ResolvedDocument {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub file_name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct DocumentSource {
    root: PathBuf,
}

impl DocumentSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Loads a document by relative path. `file_name` wins over the legacy `invoice_id` alias.
    pub async fn resolve(
        &self,
        file_name: Option<&str>,
        invoice_id: Option<&str>,
        content_type: Option<&str>,
    ) -> DocumentResult<ResolvedDocument> {
        let reference = [file_name, invoice_id]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
            .ok_or(DocumentError::MissingReference)?;

        let relative = self.relative_path(reference)?;
        let path = self.locate(reference, &relative).await?;

        let content_type = match content_type.map(str::trim).filter(|s| !s.is_empty()) {
            Some(explicit) => explicit.to_string(),
            None => content_type_for(&path)
                .ok_or_else(|| DocumentError::UnsupportedType {
                    file_name: reference.to_string(),
                })?
                .to_string(),
        };

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| DocumentError::Io {
                reference: reference.to_string(),
                source,
            })?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(reference)
            .to_string();

        debug!(
            reference,
            path = %path.display(),
            content_type = %content_type,
            bytes = bytes.len(),
            "Resolved document"
        );

        Ok(ResolvedDocument {
            bytes,
            content_type,
            file_name,
            path,
        })
    }

    /// Validates the reference lexically, before anything touches the disk.
    fn relative_path(&self, reference: &str) -> DocumentResult<PathBuf> {
        let not_found = |reason: &str| DocumentError::NotFound {
            reference: reference.to_string(),
            reason: reason.to_string(),
        };

        let mut parts = Vec::new();
        for component in Path::new(reference).components() {
            match component {
                Component::Normal(part) => parts.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(not_found(
                        "path must not be absolute or traverse outside the data directory",
                    ));
                }
            }
        }

        // "data/invoice.pdf" and "invoice.pdf" name the same file.
        let root_name = self
            .root
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_lowercase);
        let starts_with_root = match (root_name, parts.first()) {
            (Some(root_name), Some(first)) => {
                first.to_str().map(str::to_lowercase).as_deref() == Some(root_name.as_str())
            }
            _ => false,
        };
        if starts_with_root {
            parts.remove(0);
        }

        if parts.is_empty() {
            return Err(not_found("path must name a file inside the data directory"));
        }
        Ok(parts.iter().collect())
    }

    async fn locate(&self, reference: &str, relative: &Path) -> DocumentResult<PathBuf> {
        let not_found = |reason: String| DocumentError::NotFound {
            reference: reference.to_string(),
            reason,
        };
        let io_error = |source: io::Error| DocumentError::Io {
            reference: reference.to_string(),
            source,
        };

        let root = tokio::fs::canonicalize(&self.root).await.map_err(|e| {
            not_found(format!(
                "data directory {} is unavailable ({})",
                self.root.display(),
                e
            ))
        })?;

        let target = match tokio::fs::canonicalize(root.join(relative)).await {
            Ok(path) => path,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(not_found(format!(
                    "add it to {} and try again",
                    self.root.display()
                )))
            }
            Err(e) => return Err(io_error(e)),
        };

        // Symlinks may still point outside the root.
        if !target.starts_with(&root) {
            return Err(not_found(
                "path resolves outside the data directory".to_string(),
            ));
        }

        let metadata = tokio::fs::metadata(&target).await.map_err(io_error)?;
        if !metadata.is_file() {
            return Err(not_found("path is not a file".to_string()));
        }
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_root() -> (TempDir, DocumentSource) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("data");
        std::fs::create_dir_all(root.join("nested")).unwrap();
        std::fs::write(root.join("invoice_sample.jpg"), b"\xFF\xD8\xFFjpeg").unwrap();
        std::fs::write(root.join("nested").join("march.pdf"), b"%PDF-1.7").unwrap();
        std::fs::write(root.join("notes.xyz"), b"??").unwrap();
        (dir, DocumentSource::new(root))
    }

    #[test]
    fn content_type_is_derived_from_extension() {
        assert_eq!(content_type_for(Path::new("a.PDF")), Some("application/pdf"));
        assert_eq!(content_type_for(Path::new("b.jpeg")), Some("image/jpeg"));
        assert_eq!(content_type_for(Path::new("c.tif")), Some("image/tiff"));
        assert_eq!(content_type_for(Path::new("d")), None);
        assert_eq!(content_type_for(Path::new("e.xyz")), None);
    }

    #[tokio::test]
    async fn resolves_file_and_detects_content_type() {
        let (_dir, source) = sample_root();
        let doc = source
            .resolve(Some("invoice_sample.jpg"), None, None)
            .await
            .unwrap();
        assert_eq!(doc.content_type, "image/jpeg");
        assert_eq!(doc.file_name, "invoice_sample.jpg");
        assert_eq!(doc.bytes, b"\xFF\xD8\xFFjpeg");
    }

    #[tokio::test]
    async fn file_name_wins_over_invoice_id() {
        let (_dir, source) = sample_root();
        let doc = source
            .resolve(Some("nested/march.pdf"), Some("invoice_sample.jpg"), None)
            .await
            .unwrap();
        assert_eq!(doc.file_name, "march.pdf");
        assert_eq!(doc.content_type, "application/pdf");
    }

    #[tokio::test]
    async fn invoice_id_is_used_when_file_name_is_blank() {
        let (_dir, source) = sample_root();
        let doc = source
            .resolve(Some("  "), Some("invoice_sample.jpg"), None)
            .await
            .unwrap();
        assert_eq!(doc.file_name, "invoice_sample.jpg");
    }

    #[tokio::test]
    async fn leading_data_segment_is_stripped() {
        let (_dir, source) = sample_root();
        let doc = source
            .resolve(Some("data/nested/march.pdf"), None, None)
            .await
            .unwrap();
        assert_eq!(doc.file_name, "march.pdf");

        let err = source.resolve(Some("data"), None, None).await.unwrap_err();
        assert!(matches!(err, DocumentError::NotFound { .. }));
    }

    #[tokio::test]
    async fn traversal_is_rejected_as_not_found() {
        let (_dir, source) = sample_root();
        for reference in ["../../etc/passwd", "nested/../../secret.pdf", "/etc/passwd"] {
            let err = source.resolve(Some(reference), None, None).await.unwrap_err();
            assert!(
                matches!(err, DocumentError::NotFound { .. }),
                "{reference} should be rejected, got {err:?}"
            );
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_escaping_root_is_rejected() {
        let (dir, source) = sample_root();
        let outside = dir.path().join("outside.pdf");
        std::fs::write(&outside, b"%PDF").unwrap();
        std::os::unix::fs::symlink(&outside, source.root().join("link.pdf")).unwrap();

        let err = source.resolve(Some("link.pdf"), None, None).await.unwrap_err();
        assert!(matches!(err, DocumentError::NotFound { .. }));
    }

    #[tokio::test]
    async fn missing_file_and_directory_are_not_found() {
        let (_dir, source) = sample_root();
        let err = source.resolve(Some("absent.pdf"), None, None).await.unwrap_err();
        assert!(matches!(err, DocumentError::NotFound { .. }));

        let err = source.resolve(Some("nested"), None, None).await.unwrap_err();
        assert!(matches!(err, DocumentError::NotFound { .. }));
    }

    #[tokio::test]
    async fn unknown_extension_needs_an_override() {
        let (_dir, source) = sample_root();
        let err = source.resolve(Some("notes.xyz"), None, None).await.unwrap_err();
        assert!(matches!(err, DocumentError::UnsupportedType { .. }));

        let doc = source
            .resolve(Some("notes.xyz"), None, Some("application/octet-stream"))
            .await
            .unwrap();
        assert_eq!(doc.content_type, "application/octet-stream");
    }

    #[tokio::test]
    async fn missing_reference_is_reported() {
        let (_dir, source) = sample_root();
        let err = source.resolve(None, Some(""), None).await.unwrap_err();
        assert!(matches!(err, DocumentError::MissingReference));
    }
}
