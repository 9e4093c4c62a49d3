//! In-memory filesystem.
//!
//! Directories are implicit: a path is a directory if some file lives under it.

use std::collections::BTreeMap;
use std::io::{Error, ErrorKind, Result};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use super::FileSystem;

/// A filesystem that keeps every file in a shared map.
///
/// Clones share the same underlying storage.
#[derive(Clone, Default)]
pub struct InMemoryFileSystem {
    files: Arc<RwLock<BTreeMap<PathBuf, String>>>,
}

impl InMemoryFileSystem {
    /// Create a new empty filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file (builder pattern).
    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.files
            .write()
            .unwrap()
            .insert(PathBuf::from(path), content.to_string());
        self
    }
}

impl FileSystem for InMemoryFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        self.files
            .read()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| Error::new(ErrorKind::NotFound, format!("File not found: {:?}", path)))
    }

    fn write_file(&self, path: &Path, content: &str) -> Result<()> {
        self.files
            .write()
            .unwrap()
            .insert(path.to_path_buf(), content.to_string());
        Ok(())
    }

    fn create_new(&self, path: &Path, content: &str) -> Result<()> {
        let mut files = self.files.write().unwrap();
        if files.contains_key(path) {
            return Err(Error::new(
                ErrorKind::AlreadyExists,
                format!("File exists: {:?}", path),
            ));
        }
        files.insert(path.to_path_buf(), content.to_string());
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        let is_file = self.files.read().unwrap().contains_key(path);
        is_file || self.is_dir(path)
    }

    fn create_dir_all(&self, _path: &Path) -> Result<()> {
        Ok(())
    }
}

impl InMemoryFileSystem {
    fn is_dir(&self, path: &Path) -> bool {
        self.files
            .read()
            .unwrap()
            .keys()
            .any(|p| p != path && p.starts_with(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_new_rejects_existing() {
        let fs = InMemoryFileSystem::new().with_file("a/b.json", "{}");
        let err = fs.create_new(Path::new("a/b.json"), "x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(fs.read_to_string(Path::new("a/b.json")).unwrap(), "{}");
    }

    #[test]
    fn test_implicit_directories() {
        let fs = InMemoryFileSystem::new()
            .with_file("root/x.json", "1")
            .with_file("root/sub/y.json", "2");
        assert!(fs.is_dir(Path::new("root")));
        assert!(fs.is_dir(Path::new("root/sub")));
        assert!(!fs.is_dir(Path::new("root/x.json")));
        assert!(fs.exists(Path::new("root/sub")));
        assert!(!fs.exists(Path::new("elsewhere")));
    }
}
