//! Machine ident ledger
//!
//! Wraps the durable tainted / banned / used-by relations with the rules
//! every caller relies on: blank idents are never recorded or checked,
//! bulk filters never query with an empty list, and inserts are
//! idempotent.

use crate::account::{is_blank, Account, AccountCard, AccountId};
use crate::store::{LedgerStore, StoreError};
use std::sync::Arc;
use warden_common::SiteId;

pub struct IdentLedger<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> Clone for IdentLedger<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: LedgerStore + ?Sized> IdentLedger<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Note that `account` has used `ident`.
    ///
    /// Keeps the account's loaded ident set in sync. Returns false when the
    /// ident is blank or already known for the account.
    pub async fn record_usage(&self, account: &mut Account, ident: &str) -> Result<bool, StoreError> {
        if is_blank(ident) {
            return Ok(false);
        }
        if account.idents.is_loaded() && !account.idents.insert(ident) {
            return Ok(false);
        }
        self.store.insert_usage(account.id, ident).await?;
        Ok(true)
    }

    /// Record usage by id alone, without an in-memory account
    pub async fn record_usage_by_id(&self, account_id: AccountId, ident: &str) -> Result<(), StoreError> {
        if is_blank(ident) {
            return Ok(());
        }
        self.store.insert_usage(account_id, ident).await
    }

    pub async fn is_tainted(&self, ident: &str) -> Result<bool, StoreError> {
        if is_blank(ident) {
            return Ok(false);
        }
        self.store.is_tainted(ident).await
    }

    pub async fn taint(&self, ident: &str) -> Result<(), StoreError> {
        if is_blank(ident) {
            return Ok(());
        }
        self.store.insert_tainted(ident).await
    }

    pub async fn untaint(&self, ident: &str) -> Result<(), StoreError> {
        if is_blank(ident) {
            return Ok(());
        }
        self.store.delete_tainted(ident).await
    }

    pub async fn is_banned_for_site(&self, ident: &str, site: SiteId) -> Result<bool, StoreError> {
        if is_blank(ident) {
            return Ok(false);
        }
        self.store.is_banned_ident(ident, site).await
    }

    pub async fn ban_for_site(&self, ident: &str, site: SiteId) -> Result<(), StoreError> {
        if is_blank(ident) {
            return Ok(());
        }
        self.store.insert_banned(ident, site).await
    }

    pub async fn unban_for_site(&self, ident: &str, site: SiteId) -> Result<(), StoreError> {
        if is_blank(ident) {
            return Ok(());
        }
        self.store.delete_banned(ident, site).await
    }

    /// The subset of `idents` that is tainted
    pub async fn filter_tainted(&self, idents: &[String]) -> Result<Vec<String>, StoreError> {
        let idents = non_blank(idents);
        if idents.is_empty() {
            return Ok(Vec::new());
        }
        self.store.select_tainted(&idents).await
    }

    /// The subset of `idents` that is banned on `site`
    pub async fn filter_banned(&self, idents: &[String], site: SiteId) -> Result<Vec<String>, StoreError> {
        let idents = non_blank(idents);
        if idents.is_empty() {
            return Ok(Vec::new());
        }
        self.store.select_banned(&idents, site).await
    }

    /// Taint every ident currently on record for the account.
    ///
    /// This is a snapshot: idents the account reports later are not
    /// tainted by it. Returns how many idents were newly tainted.
    pub async fn propagate_taint_on_ban(&self, idents: &[String]) -> Result<usize, StoreError> {
        let already = self.filter_tainted(idents).await?;
        let mut tainted = 0;
        for ident in non_blank(idents) {
            if !already.contains(&ident) {
                self.store.insert_tainted(&ident).await?;
                tainted += 1;
            }
        }
        Ok(tainted)
    }

    /// Remove the taint from every given ident
    pub async fn untaint_all(&self, idents: &[String]) -> Result<usize, StoreError> {
        let idents = non_blank(idents);
        for ident in &idents {
            self.store.delete_tainted(ident).await?;
        }
        Ok(idents.len())
    }

    pub async fn users_of(&self, ident: &str) -> Result<Vec<AccountCard>, StoreError> {
        if is_blank(ident) {
            return Ok(Vec::new());
        }
        self.store.accounts_using(ident).await
    }

    /// Accounts that have reported any of `idents`, each listed once
    pub async fn users_of_idents(&self, idents: &[String]) -> Result<Vec<AccountCard>, StoreError> {
        let mut users: Vec<AccountCard> = Vec::new();
        for ident in non_blank(idents) {
            for card in self.store.accounts_using(&ident).await? {
                if !users.iter().any(|known| known.id == card.id) {
                    users.push(card);
                }
            }
        }
        users.sort_by_key(|card| card.id);
        Ok(users)
    }

    pub async fn usage_count(&self, ident: &str) -> Result<u64, StoreError> {
        if is_blank(ident) {
            return Ok(0);
        }
        self.store.usage_count(ident).await
    }
}

fn non_blank(idents: &[String]) -> Vec<String> {
    let mut idents: Vec<String> = idents
        .iter()
        .filter(|ident| !is_blank(ident))
        .cloned()
        .collect();
    idents.sort();
    idents.dedup();
    idents
}
