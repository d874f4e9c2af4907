//! Filesystem-backed cache keyed by (task id, filename).
//!
//! Layout: `{root}/{task_id}/{filename}`. A file is servable only when it
//! exists and the fetch engine's in-progress marker (`{filename}{suffix}`) does
//! not.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::utils::fs::{ensure_dir_all_with_op, is_file, path_exists, remove_dir_all_if_exists};
use crate::utils::url::is_safe_component;
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
    marker_suffix: String,
}

impl CacheStore {
    /// Create a store rooted at `root`. Relative roots are made absolute so the
    /// fetch engine, which may run with another working directory, writes to the
    /// same place.
    pub fn new(root: impl AsRef<Path>, marker_suffix: impl Into<String>) -> Result<Self> {
        let root = root.as_ref();
        let root = std::path::absolute(root)
            .map_err(|e| Error::io_path("resolving cache root", root, e))?;
        Ok(Self {
            root,
            marker_suffix: marker_suffix.into(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every file of `task_id`.
    pub fn task_dir(&self, task_id: &str) -> Result<PathBuf> {
        check_component("task id", task_id)?;
        Ok(self.root.join(task_id))
    }

    pub fn file_path(&self, task_id: &str, filename: &str) -> Result<PathBuf> {
        check_component("filename", filename)?;
        Ok(self.task_dir(task_id)?.join(filename))
    }

    fn marker_path(&self, file: &Path) -> PathBuf {
        let mut name = file.as_os_str().to_owned();
        name.push(&self.marker_suffix);
        PathBuf::from(name)
    }

    pub async fn ensure_task_dir(&self, task_id: &str) -> Result<PathBuf> {
        let dir = self.task_dir(task_id)?;
        ensure_dir_all_with_op("creating task cache directory", &dir).await?;
        Ok(dir)
    }

    /// Complete means a regular file with no in-progress marker beside it.
    pub async fn is_complete(&self, task_id: &str, filename: &str) -> Result<bool> {
        let path = self.file_path(task_id, filename)?;
        Ok(is_file(&path).await && !path_exists(&self.marker_path(&path)).await)
    }

    /// Path of `filename` if it is complete, `None` otherwise.
    pub async fn complete_path(&self, task_id: &str, filename: &str) -> Result<Option<PathBuf>> {
        if self.is_complete(task_id, filename).await? {
            Ok(Some(self.file_path(task_id, filename)?))
        } else {
            Ok(None)
        }
    }

    /// Recursively remove the task directory and confirm it is gone.
    pub async fn remove_task_dir(&self, task_id: &str) -> Result<()> {
        let dir = self.task_dir(task_id)?;
        remove_dir_all_if_exists("removing task cache directory", &dir)
            .await
            .map_err(|e| Error::Cleanup {
                path: dir.clone(),
                reason: e.to_string(),
            })?;

        if path_exists(&dir).await {
            return Err(Error::Cleanup {
                path: dir,
                reason: "directory still present after removal".to_string(),
            });
        }

        debug!(task_id, "Removed task cache directory");
        Ok(())
    }
}

fn check_component(what: &str, value: &str) -> Result<()> {
    if is_safe_component(value) {
        Ok(())
    } else {
        Err(Error::validation(format!("Invalid {what} '{value}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(tmp: &tempfile::TempDir) -> CacheStore {
        CacheStore::new(tmp.path(), ".aria2").unwrap()
    }

    #[tokio::test]
    async fn test_missing_file_is_incomplete() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = store(&tmp);
        assert!(!cache.is_complete("task", "00001.ts").await.unwrap());
        assert!(cache.complete_path("task", "00001.ts").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_marker_means_incomplete() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = store(&tmp);
        let dir = cache.ensure_task_dir("task").await.unwrap();
        tokio::fs::write(dir.join("00001.ts"), b"partial").await.unwrap();
        tokio::fs::write(dir.join("00001.ts.aria2"), b"").await.unwrap();

        assert!(!cache.is_complete("task", "00001.ts").await.unwrap());

        tokio::fs::remove_file(dir.join("00001.ts.aria2")).await.unwrap();
        assert!(cache.is_complete("task", "00001.ts").await.unwrap());
        assert_eq!(
            cache.complete_path("task", "00001.ts").await.unwrap(),
            Some(dir.join("00001.ts"))
        );
    }

    #[tokio::test]
    async fn test_remove_task_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = store(&tmp);
        let dir = cache.ensure_task_dir("task").await.unwrap();
        tokio::fs::write(dir.join("00001.ts"), b"x").await.unwrap();

        cache.remove_task_dir("task").await.unwrap();
        assert!(!dir.exists());

        // Removing again is fine.
        cache.remove_task_dir("task").await.unwrap();
    }

    #[test]
    fn test_rejects_traversal() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = store(&tmp);
        assert!(matches!(
            cache.file_path("task", "../../etc/passwd"),
            Err(Error::Validation(_))
        ));
        assert!(cache.task_dir("..").is_err());
        assert!(cache.task_dir("a/b").is_err());
    }

    #[test]
    fn test_root_is_absolute() {
        let cache = CacheStore::new("relative-cache", ".aria2").unwrap();
        assert!(cache.root().is_absolute());
    }
}
