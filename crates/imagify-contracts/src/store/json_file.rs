use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fd_lock::RwLock as FileLock;
use tempfile::NamedTempFile;

use super::{AccountStore, StoreError, StoreState};
use crate::accounts::Account;
use crate::artifacts::GeneratedArtifact;

/// Single-file JSON document store.
///
/// Writers hold an exclusive advisory lock on a `<file>.lock` sidecar for the
/// whole read-modify-write, so handles in other threads or processes queue up
/// behind each other. The document itself is only ever replaced by renaming a
/// fully written temp file over it, so readers see either the old or the new
/// document and never a partial one.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = sidecar_lock_path(&path);
        Self { path, lock_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read<T>(&self, op: impl FnOnce(&StoreState) -> T) -> Result<T, StoreError> {
        let state = read_state(&self.path)?;
        Ok(op(&state))
    }

    fn update<T>(
        &self,
        op: impl FnOnce(&mut StoreState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        create_parent(&self.path)?;
        let mut lock = FileLock::new(open_lock_file(&self.lock_path)?);
        let _guard = lock.write()?;

        let mut state = read_state(&self.path)?;
        let before = state.clone();
        let out = op(&mut state)?;
        if state != before {
            write_state(&self.path, &state)?;
        }
        Ok(out)
    }
}

impl AccountStore for JsonFileStore {
    fn find_or_create_account(
        &self,
        owner_id: &str,
        starting_balance: i64,
    ) -> Result<Account, StoreError> {
        self.update(|state| Ok(state.find_or_create_account(owner_id, starting_balance)))
    }

    fn account(&self, owner_id: &str) -> Result<Option<Account>, StoreError> {
        self.read(|state| state.accounts.get(owner_id).cloned())
    }

    fn decrement_balance(&self, owner_id: &str, amount: i64) -> Result<i64, StoreError> {
        self.update(|state| state.adjust_balance(owner_id, -amount))
    }

    fn add_credits(&self, owner_id: &str, amount: i64) -> Result<i64, StoreError> {
        self.update(|state| state.adjust_balance(owner_id, amount))
    }

    fn set_balance(&self, owner_id: &str, balance: i64) -> Result<i64, StoreError> {
        self.update(|state| state.set_balance(owner_id, balance))
    }

    fn insert_artifact(&self, artifact: GeneratedArtifact) -> Result<(), StoreError> {
        self.update(|state| {
            state.artifacts.push(artifact);
            Ok(())
        })
    }

    fn list_artifacts(
        &self,
        owner_id: &str,
        limit: usize,
    ) -> Result<Vec<GeneratedArtifact>, StoreError> {
        self.read(|state| state.list_artifacts(owner_id, limit))
    }

    fn delete_artifact(&self, owner_id: &str, artifact_id: &str) -> Result<bool, StoreError> {
        self.update(|state| Ok(state.delete_artifact(owner_id, artifact_id)))
    }
}

/// A missing file is an empty store. Once the file exists it must parse;
/// an empty or truncated document is reported, never treated as empty.
fn read_state(path: &Path) -> Result<StoreState, StoreError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(StoreState::default()),
        Err(err) => return Err(err.into()),
    };
    Ok(serde_json::from_str(&raw)?)
}

fn write_state(path: &Path, state: &StoreState) -> Result<(), StoreError> {
    let mut temp = NamedTempFile::new_in(parent_dir(path))?;
    temp.write_all(serde_json::to_string_pretty(state)?.as_bytes())?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|err| StoreError::Io(err.error))?;
    Ok(())
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

fn create_parent(path: &Path) -> Result<(), StoreError> {
    std::fs::create_dir_all(parent_dir(path))?;
    Ok(())
}

fn sidecar_lock_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".lock");
    PathBuf::from(name)
}

fn open_lock_file(path: &Path) -> Result<File, StoreError> {
    Ok(OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)?)
}
