//! Native filesystem implementation backed by `std::fs`.

use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{Result, Write};
use std::path::{Path, PathBuf};

use super::FileSystem;

/// The real filesystem. Writes replace files atomically, so a reader never
/// observes a half-written artifact.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealFileSystem;

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Sibling scratch path used for atomic replacement.
fn scratch_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(path.file_name().unwrap_or_default());
    name.push(".partial");
    path.with_file_name(name)
}

impl FileSystem for RealFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path)
    }

    fn write_file(&self, path: &Path, content: &str) -> Result<()> {
        ensure_parent(path)?;
        let scratch = scratch_path(path);
        fs::write(&scratch, content)?;
        fs::rename(&scratch, path).inspect_err(|_| {
            let _ = fs::remove_file(&scratch);
        })
    }

    fn create_new(&self, path: &Path, content: &str) -> Result<()> {
        ensure_parent(path)?;
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        file.write_all(content.as_bytes())
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)
    }

    fn read_binary(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    #[test]
    fn test_write_replaces_and_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifacts/a.json");
        let fs = RealFileSystem;

        fs.write_file(&path, "one").unwrap();
        fs.write_file(&path, "two").unwrap();
        assert_eq!(fs.read_to_string(&path).unwrap(), "two");
        // No scratch file left behind
        assert!(!fs.exists(&dir.path().join("artifacts/.a.json.partial")));
    }

    #[test]
    fn test_create_new_refuses_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.json");
        let fs = RealFileSystem;

        fs.create_new(&path, "first").unwrap();
        let err = fs.create_new(&path, "second").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(fs.read_to_string(&path).unwrap(), "first");
    }
}
