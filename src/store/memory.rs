//! In-memory entity store used as the test double.
//!
//! Mirrors the upsert semantics of the Postgres store and additionally keeps
//! an insertion-order journal of activity ids so tests can assert commit
//! ordering across flushes.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::entities::{Activity, Contract, Owner, Token, Transfer};
use super::{EntityStore, StoreError};

#[derive(Default)]
struct Inner {
    owners: HashMap<String, Owner>,
    tokens: HashMap<String, Token>,
    contracts: HashMap<String, Contract>,
    transfers: HashMap<String, Transfer>,
    activities: HashMap<String, Activity>,
    /// Activity ids in first-insertion order.
    activity_log: Vec<String>,
}

#[derive(Default)]
pub struct MemStore {
    inner: Mutex<Inner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self, id: &str) -> Option<Token> {
        self.inner.lock().unwrap().tokens.get(id).cloned()
    }

    pub fn owner(&self, id: &str) -> Option<Owner> {
        self.inner.lock().unwrap().owners.get(id).cloned()
    }

    pub fn token_count(&self) -> usize {
        self.inner.lock().unwrap().tokens.len()
    }

    pub fn transfer_count(&self) -> usize {
        self.inner.lock().unwrap().transfers.len()
    }

    pub fn activity_count(&self) -> usize {
        self.inner.lock().unwrap().activities.len()
    }

    pub fn activity(&self, id: &str) -> Option<Activity> {
        self.inner.lock().unwrap().activities.get(id).cloned()
    }

    /// Activity ids in the order they were first committed.
    pub fn activity_log(&self) -> Vec<String> {
        self.inner.lock().unwrap().activity_log.clone()
    }

    pub fn activities_of_type(&self, type_name: &str) -> Vec<Activity> {
        self.inner
            .lock()
            .unwrap()
            .activities
            .values()
            .filter(|a| a.activity_type.as_str() == type_name)
            .cloned()
            .collect()
    }

    pub fn insert_token(&self, token: Token) {
        self.inner.lock().unwrap().tokens.insert(token.id.clone(), token);
    }
}

#[async_trait]
impl EntityStore for MemStore {
    async fn owners_by_ids(&self, ids: &[String]) -> Result<Vec<Owner>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| inner.owners.get(id).cloned())
            .collect())
    }

    async fn tokens_by_ids(&self, ids: &[String]) -> Result<Vec<Token>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| inner.tokens.get(id).cloned())
            .collect())
    }

    async fn contract(&self, id: &str) -> Result<Option<Contract>, StoreError> {
        Ok(self.inner.lock().unwrap().contracts.get(id).cloned())
    }

    async fn has_activity(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.inner.lock().unwrap().activities.contains_key(id))
    }

    async fn all_tokens(&self) -> Result<Vec<Token>, StoreError> {
        let mut tokens: Vec<Token> = self.inner.lock().unwrap().tokens.values().cloned().collect();
        tokens.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(tokens)
    }

    async fn tokens_missing_metadata(&self) -> Result<Vec<Token>, StoreError> {
        let mut tokens: Vec<Token> = self
            .inner
            .lock()
            .unwrap()
            .tokens
            .values()
            .filter(|t| t.uri.is_none() || t.image_uri.is_none())
            .cloned()
            .collect();
        tokens.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(tokens)
    }

    async fn save_owners(&self, owners: &[Owner]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        for owner in owners {
            inner.owners.insert(owner.id.clone(), owner.clone());
        }
        Ok(())
    }

    async fn save_tokens(&self, tokens: &[Token]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        for token in tokens {
            inner.tokens.insert(token.id.clone(), token.clone());
        }
        Ok(())
    }

    async fn save_contracts(&self, contracts: &[Contract]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        for contract in contracts {
            // Contract rows are insert-once, like the Postgres DO NOTHING.
            inner
                .contracts
                .entry(contract.id.clone())
                .or_insert_with(|| contract.clone());
        }
        Ok(())
    }

    async fn save_transfers(&self, transfers: &[Transfer]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        for transfer in transfers {
            inner
                .transfers
                .entry(transfer.id.clone())
                .or_insert_with(|| transfer.clone());
        }
        Ok(())
    }

    async fn save_activities(&self, activities: &[Activity]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        for activity in activities {
            if !inner.activities.contains_key(&activity.id) {
                inner.activity_log.push(activity.id.clone());
            }
            inner
                .activities
                .entry(activity.id.clone())
                .or_insert_with(|| activity.clone());
        }
        Ok(())
    }
}
