//! Booklet persistence.
//!
//! [`ArtifactStore`] is the two-method persistence contract consumed by the
//! pipeline coordinators. The filesystem implementation writes each booklet
//! atomically (temp file + rename) under a fixed output root.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use errscribe_shared::ResearchBooklet;

use crate::render::render_markdown;

/// Persistence failure with a stable code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct StoreError {
    pub code: String,
    pub message: String,
}

impl StoreError {
    pub fn save(message: impl Into<String>) -> Self {
        Self {
            code: "SAVE_ERROR".into(),
            message: message.into(),
        }
    }

    pub fn list(message: impl Into<String>) -> Self {
        Self {
            code: "LIST_ERROR".into(),
            message: message.into(),
        }
    }
}

/// Two-method persistence contract for booklets.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist `booklet` under `suggested_rel_path` relative to the store
    /// root, returning the resolved absolute path.
    async fn save(
        &self,
        booklet: &ResearchBooklet,
        suggested_rel_path: &str,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, StoreError>;

    /// List stored booklet file names. Empty when the storage root is absent.
    async fn list(&self) -> Result<Vec<String>, StoreError>;
}

/// Filesystem store rooted at a single output directory.
#[derive(Debug, Clone)]
pub struct FsBookletStore {
    root: PathBuf,
}

impl FsBookletStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ArtifactStore for FsBookletStore {
    async fn save(
        &self,
        booklet: &ResearchBooklet,
        suggested_rel_path: &str,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, StoreError> {
        if cancel.is_cancelled() {
            return Err(StoreError::save("save cancelled"));
        }

        let target = self.root.join(suggested_rel_path);
        let parent = target.parent().unwrap_or(&self.root);
        std::fs::create_dir_all(parent)
            .map_err(|e| StoreError::save(format!("cannot create {}: {e}", parent.display())))?;

        let content = render_markdown(booklet);

        // Write to a temp file first, then rename into place.
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| StoreError::save(format!("invalid path: {suggested_rel_path}")))?;
        let temp = parent.join(format!(".{file_name}.tmp"));

        std::fs::write(&temp, &content)
            .map_err(|e| StoreError::save(format!("cannot write {}: {e}", temp.display())))?;
        std::fs::rename(&temp, &target)
            .map_err(|e| StoreError::save(format!("cannot rename to {}: {e}", target.display())))?;

        let digest = {
            let mut hasher = Sha256::new();
            hasher.update(content.as_bytes());
            format!("{:x}", hasher.finalize())
        };

        let absolute = std::path::absolute(&target)
            .map_err(|e| StoreError::save(format!("cannot resolve {}: {e}", target.display())))?;

        info!(
            booklet_id = %booklet.id,
            path = %absolute.display(),
            bytes = content.len(),
            sha256 = %digest,
            "booklet persisted"
        );

        Ok(absolute)
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        if !self.root.exists() {
            debug!(root = %self.root.display(), "storage root absent, empty listing");
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(&self.root)
            .map_err(|e| StoreError::list(format!("cannot read {}: {e}", self.root.display())))?;

        let mut names = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| StoreError::list(format!("directory entry: {e}")))?;
            if entry.path().is_file() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }

        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use errscribe_shared::{BatchId, BookletId, ErrorBatch};
    use std::collections::BTreeMap;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("errscribe-store-test-{}", uuid::Uuid::now_v7()))
    }

    fn sample_booklet() -> ResearchBooklet {
        ResearchBooklet {
            id: BookletId::new(),
            title: "test booklet".into(),
            created_at: Utc::now(),
            original_errors: ErrorBatch {
                id: BatchId::new(),
                errors: vec![],
                summary: "no diagnostics found".into(),
                error_count: 0,
                warning_count: 0,
                distinct_codes: vec![],
            },
            findings: vec![],
            sections: vec![],
            metadata: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn save_then_list_shows_file_exactly_once() {
        let root = temp_root();
        let store = FsBookletStore::new(&root);
        let booklet = sample_booklet();
        let name = format!("booklet-{}.md", booklet.id);
        let cancel = CancellationToken::new();

        let path = store.save(&booklet, &name, &cancel).await.unwrap();
        assert!(path.is_absolute());
        assert!(path.exists());

        let listed = store.list().await.unwrap();
        assert_eq!(listed.iter().filter(|n| **n == name).count(), 1);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn list_is_empty_for_missing_root() {
        let store = FsBookletStore::new(temp_root());
        let listed = store.list().await.unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn save_leaves_no_temp_files() {
        let root = temp_root();
        let store = FsBookletStore::new(&root);
        let booklet = sample_booklet();
        let cancel = CancellationToken::new();

        store
            .save(&booklet, "booklet.md", &cancel)
            .await
            .unwrap();

        for entry in std::fs::read_dir(&root).unwrap() {
            let name = entry.unwrap().file_name().to_string_lossy().to_string();
            assert!(!name.starts_with('.'), "temp file left behind: {name}");
        }

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn save_honors_cancelled_token() {
        let root = temp_root();
        let store = FsBookletStore::new(&root);
        let booklet = sample_booklet();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = store
            .save(&booklet, "booklet.md", &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.code, "SAVE_ERROR");
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn saved_content_is_rendered_markdown() {
        let root = temp_root();
        let store = FsBookletStore::new(&root);
        let booklet = sample_booklet();
        let cancel = CancellationToken::new();

        let path = store.save(&booklet, "b.md", &cancel).await.unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.starts_with("# test booklet"));
        assert!(content.contains("Generated: "));

        let _ = std::fs::remove_dir_all(&root);
    }
}
