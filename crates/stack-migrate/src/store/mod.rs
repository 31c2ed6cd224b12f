//! On-disk representation of exported modules.
//!
//! Small modules are a single JSON document keyed by uid. Large modules
//! (assets, entries) go through the [`chunked`] store, which splits the
//! item set into size-bounded chunk files plus a meta index.

pub mod chunked;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

pub use chunked::{ChunkLimits, ChunkedJsonReader, ChunkedJsonWriter};

/// Creates `path` (and parents) if it does not exist yet.
///
/// # Errors
///
/// Returns [`Error::Structural`]; a module cannot run without its directory.
pub fn create_folder_if_not_exist(path: &Path) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(path).map_err(|e| {
        Error::Structural(format!(
            "cannot create directory '{}': {}",
            path.display(),
            e
        ))
    })
}

/// Reads a JSON document, returning `None` when the file does not exist.
pub fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Writes a JSON document, replacing any previous content atomically.
pub fn write_json_file<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_folder_if_not_exist(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Recursively copies `from` into `to`.
pub fn copy_dir_all(from: &Path, to: &Path) -> Result<()> {
    create_folder_if_not_exist(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_read_missing_json_is_none() {
        let dir = TempDir::new().unwrap();
        let value: Option<serde_json::Value> = read_json_file(&dir.path().join("nope.json")).unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn test_write_then_read_json_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b/env.json");
        write_json_file(&path, &json!({"uid": "blt1"})).unwrap();

        let value: serde_json::Value = read_json_file(&path).unwrap().unwrap();
        assert_eq!(value["uid"], "blt1");
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_copy_dir_all() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        write_json_file(&src.path().join("x/one.json"), &json!(1)).unwrap();

        copy_dir_all(src.path(), &dst.path().join("copy")).unwrap();

        assert!(dst.path().join("copy/x/one.json").exists());
    }
}
