use std::sync::{Mutex, MutexGuard};

use super::{AccountStore, StoreError, StoreState};
use crate::accounts::Account;
use crate::artifacts::GeneratedArtifact;

/// Process-local store. Each operation holds the lock for its whole
/// read-modify-write, which makes balance updates atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl AccountStore for MemoryStore {
    fn find_or_create_account(
        &self,
        owner_id: &str,
        starting_balance: i64,
    ) -> Result<Account, StoreError> {
        Ok(self.lock()?.find_or_create_account(owner_id, starting_balance))
    }

    fn account(&self, owner_id: &str) -> Result<Option<Account>, StoreError> {
        Ok(self.lock()?.accounts.get(owner_id).cloned())
    }

    fn decrement_balance(&self, owner_id: &str, amount: i64) -> Result<i64, StoreError> {
        self.lock()?.adjust_balance(owner_id, -amount)
    }

    fn add_credits(&self, owner_id: &str, amount: i64) -> Result<i64, StoreError> {
        self.lock()?.adjust_balance(owner_id, amount)
    }

    fn set_balance(&self, owner_id: &str, balance: i64) -> Result<i64, StoreError> {
        self.lock()?.set_balance(owner_id, balance)
    }

    fn insert_artifact(&self, artifact: GeneratedArtifact) -> Result<(), StoreError> {
        self.lock()?.artifacts.push(artifact);
        Ok(())
    }

    fn list_artifacts(
        &self,
        owner_id: &str,
        limit: usize,
    ) -> Result<Vec<GeneratedArtifact>, StoreError> {
        Ok(self.lock()?.list_artifacts(owner_id, limit))
    }

    fn delete_artifact(&self, owner_id: &str, artifact_id: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.delete_artifact(owner_id, artifact_id))
    }
}
