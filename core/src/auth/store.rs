//! Credential persistence
//!
//! One JSON file per record under a configured directory. Writes go through
//! a temp file and an atomic rename; a read-write lock serializes mutation.
//! There are no transaction semantics beyond single-record atomicity.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::warn;

use super::Auth;
use crate::error::{Error, Result};

/// Durable `file_name -> Auth` mapping
pub struct AuthStore {
  inner: RwLock<Inner>,
}

struct Inner {
  base_dir: PathBuf,
  records: HashMap<String, Auth>,
}

impl AuthStore {
  /// Open a store over `base_dir`, creating it when missing and loading all
  /// valid records. Malformed files are skipped with a warning.
  pub fn open(base_dir: impl Into<PathBuf>) -> Result<Self> {
    let base_dir = base_dir.into();
    std::fs::create_dir_all(&base_dir)
      .map_err(|e| Error::Internal(format!("failed to create auth dir: {e}")))?;

    let records = scan(&base_dir)?;
    Ok(Self {
      inner: RwLock::new(Inner { base_dir, records }),
    })
  }

  /// All loaded records
  pub fn list(&self) -> Vec<Auth> {
    self
      .inner
      .read()
      .expect("auth store lock poisoned")
      .records
      .values()
      .cloned()
      .collect()
  }

  /// Record by id
  pub fn get(&self, id: &str) -> Option<Auth> {
    self
      .inner
      .read()
      .expect("auth store lock poisoned")
      .records
      .get(id)
      .cloned()
  }

  /// Persist a record: temp file + atomic rename, then update the index.
  pub fn save(&self, auth: &Auth) -> Result<()> {
    let mut inner = self.inner.write().expect("auth store lock poisoned");

    let path = inner.base_dir.join(&auth.file_name);
    let tmp = inner.base_dir.join(format!(".{}.tmp", auth.file_name));

    let content = serde_json::to_vec_pretty(auth)
      .map_err(|e| Error::Internal(format!("failed to serialize auth record: {e}")))?;
    std::fs::write(&tmp, content)
      .map_err(|e| Error::Internal(format!("failed to write auth record: {e}")))?;
    std::fs::rename(&tmp, &path)
      .map_err(|e| Error::Internal(format!("failed to replace auth record: {e}")))?;

    inner.records.insert(auth.id.clone(), auth.clone());
    Ok(())
  }

  /// Delete a record from disk and the index.
  pub fn delete(&self, id: &str) -> Result<()> {
    let mut inner = self.inner.write().expect("auth store lock poisoned");

    let Some(auth) = inner.records.remove(id) else {
      return Err(Error::NotFound(format!("auth record: {id}")));
    };

    let path = inner.base_dir.join(&auth.file_name);
    if path.exists() {
      std::fs::remove_file(&path)
        .map_err(|e| Error::Internal(format!("failed to delete auth record: {e}")))?;
    }
    Ok(())
  }

  /// Point the store at a new directory and rescan.
  pub fn set_base_dir(&self, base_dir: impl Into<PathBuf>) -> Result<()> {
    let base_dir = base_dir.into();
    std::fs::create_dir_all(&base_dir)
      .map_err(|e| Error::Internal(format!("failed to create auth dir: {e}")))?;
    let records = scan(&base_dir)?;

    let mut inner = self.inner.write().expect("auth store lock poisoned");
    inner.base_dir = base_dir;
    inner.records = records;
    Ok(())
  }

  /// Current base directory
  pub fn base_dir(&self) -> PathBuf {
    self
      .inner
      .read()
      .expect("auth store lock poisoned")
      .base_dir
      .clone()
  }
}

fn scan(base_dir: &Path) -> Result<HashMap<String, Auth>> {
  let mut records = HashMap::new();

  let entries = std::fs::read_dir(base_dir)
    .map_err(|e| Error::Internal(format!("failed to read auth dir: {e}")))?;

  for entry in entries.flatten() {
    let path = entry.path();
    if path.extension().map(|e| e == "json") != Some(true) {
      continue;
    }
    let content = match std::fs::read_to_string(&path) {
      Ok(content) => content,
      Err(err) => {
        warn!(path = %path.display(), error = %err, "skipping unreadable auth file");
        continue;
      }
    };
    match serde_json::from_str::<Auth>(&content) {
      Ok(auth) => {
        records.insert(auth.id.clone(), auth);
      }
      Err(err) => {
        warn!(path = %path.display(), error = %err, "skipping malformed auth file");
      }
    }
  }

  Ok(records)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::auth::AuthStatus;

  #[test]
  fn test_save_load_delete() {
    let dir = tempfile::tempdir().unwrap();
    let store = AuthStore::open(dir.path()).unwrap();

    let mut auth = Auth::new("qwen", "qwen-12345");
    auth.set_token("tok", None, 3600);
    store.save(&auth).unwrap();

    assert!(dir.path().join("qwen-qwen-12345.json").exists());

    // A fresh store sees the persisted record
    let reopened = AuthStore::open(dir.path()).unwrap();
    let loaded = reopened.get(&auth.id).unwrap();
    assert_eq!(loaded.provider, "qwen");
    assert_eq!(loaded.status, AuthStatus::Active);

    reopened.delete(&auth.id).unwrap();
    assert!(!dir.path().join("qwen-qwen-12345.json").exists());
    assert!(reopened.get(&auth.id).is_none());
  }

  #[test]
  fn test_malformed_file_skipped() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();

    let store = AuthStore::open(dir.path()).unwrap();
    assert!(store.list().is_empty());
  }

  #[test]
  fn test_delete_missing_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = AuthStore::open(dir.path()).unwrap();
    assert!(matches!(store.delete("nope"), Err(Error::NotFound(_))));
  }
}
