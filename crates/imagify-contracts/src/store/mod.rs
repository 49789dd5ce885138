//! Persistence for accounts and generated artifacts.
//!
//! The generation core only needs the narrow [`AccountStore`] surface; the
//! two implementations here share their bookkeeping through [`StoreState`].

mod json_file;
mod memory;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::accounts::Account;
use crate::artifacts::GeneratedArtifact;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;

/// Upper bound on artifacts returned by a history listing.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("account '{0}' not found")]
    AccountNotFound(String),
    #[error("store lock poisoned")]
    Poisoned,
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("store payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub trait AccountStore: Send + Sync {
    fn find_or_create_account(
        &self,
        owner_id: &str,
        starting_balance: i64,
    ) -> Result<Account, StoreError>;

    fn account(&self, owner_id: &str) -> Result<Option<Account>, StoreError>;

    /// Atomically subtracts `amount`; no floor is applied. Returns the new balance.
    fn decrement_balance(&self, owner_id: &str, amount: i64) -> Result<i64, StoreError>;

    fn add_credits(&self, owner_id: &str, amount: i64) -> Result<i64, StoreError>;

    fn set_balance(&self, owner_id: &str, balance: i64) -> Result<i64, StoreError>;

    fn insert_artifact(&self, artifact: GeneratedArtifact) -> Result<(), StoreError>;

    /// Owner's artifacts, newest first.
    fn list_artifacts(
        &self,
        owner_id: &str,
        limit: usize,
    ) -> Result<Vec<GeneratedArtifact>, StoreError>;

    /// Deletes only when the artifact belongs to `owner_id`.
    fn delete_artifact(&self, owner_id: &str, artifact_id: &str) -> Result<bool, StoreError>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreState {
    #[serde(default)]
    pub accounts: BTreeMap<String, Account>,
    #[serde(default)]
    pub artifacts: Vec<GeneratedArtifact>,
}

impl StoreState {
    fn find_or_create_account(&mut self, owner_id: &str, starting_balance: i64) -> Account {
        self.accounts
            .entry(owner_id.to_string())
            .or_insert_with(|| Account::new(owner_id, starting_balance))
            .clone()
    }

    fn adjust_balance(&mut self, owner_id: &str, delta: i64) -> Result<i64, StoreError> {
        let account = self
            .accounts
            .get_mut(owner_id)
            .ok_or_else(|| StoreError::AccountNotFound(owner_id.to_string()))?;
        account.credit_balance = account.credit_balance.saturating_add(delta);
        Ok(account.credit_balance)
    }

    fn set_balance(&mut self, owner_id: &str, balance: i64) -> Result<i64, StoreError> {
        let account = self
            .accounts
            .get_mut(owner_id)
            .ok_or_else(|| StoreError::AccountNotFound(owner_id.to_string()))?;
        account.credit_balance = balance;
        Ok(balance)
    }

    fn list_artifacts(&self, owner_id: &str, limit: usize) -> Vec<GeneratedArtifact> {
        // Reverse insertion order first so equal timestamps stay newest-first.
        let mut rows: Vec<GeneratedArtifact> = self
            .artifacts
            .iter()
            .rev()
            .filter(|artifact| artifact.owner_id == owner_id)
            .cloned()
            .collect();
        rows.sort_by(|left, right| right.created_at.cmp(&left.created_at));
        rows.truncate(limit);
        rows
    }

    fn delete_artifact(&mut self, owner_id: &str, artifact_id: &str) -> bool {
        let before = self.artifacts.len();
        self.artifacts
            .retain(|artifact| !(artifact.id == artifact_id && artifact.owner_id == owner_id));
        self.artifacts.len() != before
    }
}
