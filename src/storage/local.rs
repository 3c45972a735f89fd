//! Object store backed by a directory tree.

use super::ObjectStore;
use crate::error::{LiewaveError, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a logical path under the root, refusing anything that could leave it.
    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let relative = Path::new(path);
        let mut resolved = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        (resolved != self.root).then_some(resolved)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn get_object(&self, path: &str) -> Result<Vec<u8>> {
        let not_found = || LiewaveError::NotFound {
            path: path.to_string(),
        };
        let file = self.resolve(path).ok_or_else(not_found)?;
        match tokio::fs::read(&file).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(not_found()),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => Err(LiewaveError::AuthFailure {
                message: format!("Permission denied reading {}", file.display()),
            }),
            // Reading a directory lands here on Linux
            Err(e) if e.kind() == ErrorKind::IsADirectory => Err(not_found()),
            Err(e) => Err(LiewaveError::TransientIo {
                message: format!("Failed to read {}: {}", file.display(), e),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_with(files: &[(&str, &str)]) -> (TempDir, LocalObjectStore) {
        let dir = TempDir::new().unwrap();
        for (path, contents) in files {
            let full = dir.path().join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(full, contents).unwrap();
        }
        let store = LocalObjectStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn reads_nested_objects() {
        let (_dir, store) = store_with(&[("users/42/clip1.aac", "aac")]);
        assert_eq!(store.get_object("users/42/clip1.aac").await.unwrap(), b"aac");
        assert_eq!(store.get_object("./users/42/clip1.aac").await.unwrap(), b"aac");
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let (_dir, store) = store_with(&[]);
        let err = store.get_object("users/1/none.aac").await.unwrap_err();
        assert!(matches!(err, LiewaveError::NotFound { .. }));
    }

    #[tokio::test]
    async fn traversal_is_refused() {
        let (dir, store) = store_with(&[("inside.aac", "x")]);
        let outside = dir.path().parent().unwrap().join("outside-liewave.aac");
        std::fs::write(&outside, b"secret").unwrap();

        for path in ["../outside-liewave.aac", "users/../../outside-liewave.aac", "/etc/passwd"] {
            let err = store.get_object(path).await.unwrap_err();
            assert!(matches!(err, LiewaveError::NotFound { .. }), "{path}: {err:?}");
        }
        std::fs::remove_file(outside).unwrap();
    }

    #[tokio::test]
    async fn root_itself_is_not_an_object() {
        let (_dir, store) = store_with(&[]);
        assert!(store.get_object(".").await.is_err());
        assert!(store.get_object("").await.is_err());
    }
}
