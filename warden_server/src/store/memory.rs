//! In-memory store
//!
//! Backs tests and embedded deployments that do not need durability. All
//! relations have set semantics, so duplicate inserts are naturally
//! idempotent.

use super::{AccountStore, FreeAccountQuery, LedgerStore, Store, StoreError};
use crate::account::{Account, AccountCard, AccountId, AccountKey, MachineIdents};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use warden_common::SiteId;

/// Attempts at finding a free disabled username before giving up
const DISABLE_ATTEMPTS: u32 = 100;

pub struct MemoryStore {
    accounts: DashMap<AccountId, Account>,
    usage: DashMap<AccountId, BTreeSet<String>>,
    tainted: DashSet<String>,
    banned: DashSet<(String, SiteId)>,
    next_id: AtomicI64,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
            usage: DashMap::new(),
            tainted: DashSet::new(),
            banned: DashSet::new(),
            next_id: AtomicI64::new(1),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Register a fresh trial account
    pub fn create_account(&self, username: &str, email: &str, created_at: DateTime<Utc>) -> Account {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let account = Account::new(id, username, email, created_at);
        self.accounts.insert(id, stored(&account));
        account
    }

    /// Store a prepared account as-is, replacing any row with the same id
    pub fn put_account(&self, account: &Account) {
        self.next_id.fetch_max(account.id + 1, Ordering::SeqCst);
        self.accounts.insert(account.id, stored(account));
    }

    /// Make every operation fail as if the backing store were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn tainted_count(&self) -> usize {
        self.tainted.len()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        Ok(())
    }

    fn find(&self, key: &AccountKey) -> Option<Account> {
        match key {
            AccountKey::Id(id) => self.accounts.get(id).map(|entry| entry.value().clone()),
            AccountKey::Username(name) => self
                .accounts
                .iter()
                .find(|entry| entry.username() == name)
                .map(|entry| entry.value().clone()),
            AccountKey::Email(email) => self
                .accounts
                .iter()
                .find(|entry| entry.email() == email)
                .map(|entry| entry.value().clone()),
        }
    }

    fn idents_of(&self, account_id: AccountId) -> Vec<String> {
        self.usage
            .get(&account_id)
            .map(|idents| idents.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn username_taken(&self, username: &str, except: AccountId) -> bool {
        self.accounts
            .iter()
            .any(|entry| entry.id != except && entry.username() == username)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy kept in the map: no idents, nothing dirty
fn stored(account: &Account) -> Account {
    let mut copy = account.clone();
    copy.idents = MachineIdents::NotLoaded;
    copy.clear_dirty();
    copy
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn load_account(
        &self,
        key: &AccountKey,
        load_idents: bool,
    ) -> Result<Option<Account>, StoreError> {
        self.check()?;
        Ok(self.find(key).map(|mut account| {
            if load_idents {
                account.idents = MachineIdents::from_unsorted(self.idents_of(account.id));
            }
            account
        }))
    }

    async fn save_account(&self, account: &mut Account) -> Result<(), StoreError> {
        self.check()?;
        if account.is_dirty() {
            self.accounts.insert(account.id, stored(account));
            account.clear_dirty();
        }
        Ok(())
    }

    async fn load_idents(&self, account_id: AccountId) -> Result<Vec<String>, StoreError> {
        self.check()?;
        Ok(self.idents_of(account_id))
    }

    async fn disable_account(&self, account: &mut Account) -> Result<(), StoreError> {
        self.check()?;
        if account.is_disabled() {
            return Ok(());
        }
        for attempt in 0..DISABLE_ATTEMPTS {
            account.disable(attempt);
            if !self.username_taken(account.username(), account.id) {
                return self.save_account(account).await;
            }
        }
        Err(StoreError::Conflict(format!(
            "no free disabled username for account {}",
            account.id
        )))
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn insert_usage(&self, account_id: AccountId, ident: &str) -> Result<(), StoreError> {
        self.check()?;
        self.usage
            .entry(account_id)
            .or_default()
            .insert(ident.to_string());
        Ok(())
    }

    async fn is_tainted(&self, ident: &str) -> Result<bool, StoreError> {
        self.check()?;
        Ok(self.tainted.contains(ident))
    }

    async fn insert_tainted(&self, ident: &str) -> Result<(), StoreError> {
        self.check()?;
        self.tainted.insert(ident.to_string());
        Ok(())
    }

    async fn delete_tainted(&self, ident: &str) -> Result<(), StoreError> {
        self.check()?;
        self.tainted.remove(ident);
        Ok(())
    }

    async fn select_tainted(&self, idents: &[String]) -> Result<Vec<String>, StoreError> {
        self.check()?;
        Ok(idents
            .iter()
            .filter(|ident| self.tainted.contains(ident.as_str()))
            .cloned()
            .collect())
    }

    async fn is_banned_ident(&self, ident: &str, site: SiteId) -> Result<bool, StoreError> {
        self.check()?;
        Ok(self.banned.contains(&(ident.to_string(), site)))
    }

    async fn insert_banned(&self, ident: &str, site: SiteId) -> Result<(), StoreError> {
        self.check()?;
        self.banned.insert((ident.to_string(), site));
        Ok(())
    }

    async fn delete_banned(&self, ident: &str, site: SiteId) -> Result<(), StoreError> {
        self.check()?;
        self.banned.remove(&(ident.to_string(), site));
        Ok(())
    }

    async fn select_banned(
        &self,
        idents: &[String],
        site: SiteId,
    ) -> Result<Vec<String>, StoreError> {
        self.check()?;
        Ok(idents
            .iter()
            .filter(|ident| self.banned.contains(&((*ident).clone(), site)))
            .cloned()
            .collect())
    }

    async fn accounts_using(&self, ident: &str) -> Result<Vec<AccountCard>, StoreError> {
        self.check()?;
        let mut cards: Vec<AccountCard> = self
            .usage
            .iter()
            .filter(|entry| entry.value().contains(ident))
            .filter_map(|entry| self.accounts.get(entry.key()).map(|acct| acct.card()))
            .collect();
        cards.sort_by_key(|card| card.id);
        Ok(cards)
    }

    async fn usage_count(&self, ident: &str) -> Result<u64, StoreError> {
        self.check()?;
        Ok(self
            .usage
            .iter()
            .filter(|entry| entry.value().contains(ident))
            .count() as u64)
    }

    // Same predicates as `db::queries::count_recent_free_accounts`
    async fn count_free_accounts(&self, query: FreeAccountQuery<'_>) -> Result<u64, StoreError> {
        self.check()?;
        let count = self
            .usage
            .iter()
            .filter(|entry| entry.value().contains(query.ident))
            .filter_map(|entry| self.accounts.get(entry.key()).map(|acct| acct.value().clone()))
            .filter(|acct| !acct.is_disabled())
            .filter(|acct| !acct.has_bought_coins())
            .filter(|acct| acct.created_at > query.created_after)
            .filter(|acct| {
                !query.trial_only
                    || acct.raw_billing_status() == warden_common::BillingStatus::Trial
            })
            .count();
        Ok(count as u64)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }
}
