//! Local file storage primitives.
//!
//! [`LocalStorage`] resolves relative keys such as `uploads/report.pdf`
//! against a root directory and exposes the small set of operations the
//! receiver and catalog need: existence checks, whole-file reads and writes,
//! idempotent deletes and streaming appends.

use std::path::{Component, Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};

/// File storage rooted at a directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Create a storage handle rooted at `root`.
    ///
    /// The directory is not touched until [`ensure_root`](Self::ensure_root)
    /// or the first write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the root directory if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub async fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await.map_err(|e| {
            Error::StorageUnavailable(format!(
                "failed to create storage root {}: {e}",
                self.root.display()
            ))
        })
    }

    /// Root directory of this storage.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative key to an absolute path under the root.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] for absolute keys or keys that climb
    /// out of the root.
    pub fn resolve(&self, key: &str) -> Result<PathBuf> {
        sanitize_path(&self.root, Path::new(key))
            .ok_or_else(|| Error::InvalidPath(key.to_string()))
    }

    /// Whether a file exists for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the check itself fails.
    pub async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.resolve(key)?;
        Ok(fs::try_exists(&path).await?)
    }

    /// Read the whole file stored at `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the file cannot be read.
    pub async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(key)?;
        Ok(fs::read(&path).await?)
    }

    /// Write `data` to `key`, replacing any existing file.
    ///
    /// The data goes to a temporary file first and is renamed into place, so
    /// readers never observe a partial write.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the file cannot be written.
    pub async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.resolve(key)?;
        create_parent(&path).await?;

        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &path).await?;
        Ok(())
    }

    /// Delete the file at `key`.
    ///
    /// Returns whether a file was removed. Missing files are not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or removal fails.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "Deleted stored file");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Append `data` to the file at `key`, creating it and its parent
    /// directory when missing. Existing content is never truncated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageUnavailable`] if the file cannot be opened, or
    /// an I/O error if the write fails.
    pub async fn append(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.resolve(key)?;
        create_parent(&path).await?;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| {
                Error::StorageUnavailable(format!("could not open {}: {e}", path.display()))
            })?;

        file.write_all(data).await?;
        file.sync_data().await?;
        Ok(())
    }

    /// Length in bytes of the file at `key`, `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or metadata cannot be read.
    pub async fn len(&self, key: &str) -> Result<Option<u64>> {
        let path = self.resolve(key)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Shrink the file at `key` to `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageUnavailable`] if the file cannot be opened.
    pub async fn truncate(&self, key: &str, len: u64) -> Result<()> {
        let path = self.resolve(key)?;
        let file = fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .await
            .map_err(|e| {
                Error::StorageUnavailable(format!("could not open {}: {e}", path.display()))
            })?;
        file.set_len(len).await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Open the file at `key` for streaming reads.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the file cannot be opened.
    pub async fn open(&self, key: &str) -> Result<fs::File> {
        let path = self.resolve(key)?;
        Ok(fs::File::open(&path).await?)
    }
}

async fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(|e| {
            Error::StorageUnavailable(format!(
                "failed to create directory {}: {e}",
                parent.display()
            ))
        })?;
    }
    Ok(())
}

/// Join `relative` onto `base`, refusing anything that could escape it.
#[must_use]
pub fn sanitize_path(base: &Path, relative: &Path) -> Option<PathBuf> {
    if relative.as_os_str().is_empty() {
        return None;
    }

    for component in relative.components() {
        if !matches!(component, Component::Normal(_) | Component::CurDir) {
            return None;
        }
    }

    let full_path = base.join(relative);

    if full_path.starts_with(base) {
        Some(full_path)
    } else {
        None
    }
}

/// Format a file size for display.
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_path() {
        let base = Path::new("/srv/data");

        assert_eq!(
            sanitize_path(base, Path::new("uploads/a.txt")),
            Some(PathBuf::from("/srv/data/uploads/a.txt"))
        );
        assert_eq!(sanitize_path(base, Path::new("../etc/passwd")), None);
        assert_eq!(sanitize_path(base, Path::new("/etc/passwd")), None);
        assert_eq!(sanitize_path(base, Path::new("")), None);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024 / 2), "1.5 GB");
    }

    #[tokio::test]
    async fn test_append_creates_and_extends() {
        let dir = TempDir::new().expect("create temp dir");
        let storage = LocalStorage::new(dir.path());

        storage.append("uploads/f.bin", b"abc").await.unwrap();
        storage.append("uploads/f.bin", b"def").await.unwrap();

        assert_eq!(storage.get("uploads/f.bin").await.unwrap(), b"abcdef");
        assert_eq!(storage.len("uploads/f.bin").await.unwrap(), Some(6));
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = TempDir::new().expect("create temp dir");
        let storage = LocalStorage::new(dir.path());

        storage.put("a/b.json", b"{}").await.unwrap();
        assert!(storage.exists("a/b.json").await.unwrap());
        assert_eq!(storage.get("a/b.json").await.unwrap(), b"{}");

        assert!(storage.delete("a/b.json").await.unwrap());
        assert!(!storage.delete("a/b.json").await.unwrap());
        assert!(!storage.exists("a/b.json").await.unwrap());
        assert_eq!(storage.len("a/b.json").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_truncate() {
        let dir = TempDir::new().expect("create temp dir");
        let storage = LocalStorage::new(dir.path());

        storage.append("f", b"0123456789").await.unwrap();
        storage.truncate("f", 4).await.unwrap();

        assert_eq!(storage.get("f").await.unwrap(), b"0123");
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = TempDir::new().expect("create temp dir");
        let storage = LocalStorage::new(dir.path());

        assert!(matches!(
            storage.append("../outside", b"x").await,
            Err(Error::InvalidPath(_))
        ));
    }
}
