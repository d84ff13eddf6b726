//! Storage seams consumed by the decision engine
//!
//! The engine never talks to a database directly. It receives a [`Store`]
//! that combines account access with the machine ident ledger, so the
//! quota count can join the two.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::account::{Account, AccountCard, AccountId, AccountKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use warden_common::SiteId;

/// Store failures. These are never turned into an access decision.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Malformed row: {0}")]
    MalformedRow(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl StoreError {
    pub fn malformed<E: std::fmt::Display>(err: E) -> Self {
        Self::MalformedRow(err.to_string())
    }
}

/// Filters for the recent free account count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeAccountQuery<'a> {
    pub ident: &'a str,
    /// Only accounts created strictly after this instant count
    pub created_after: DateTime<Utc>,
    /// Only accounts still in trial billing status count
    pub trial_only: bool,
}

/// Account rows
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Look an account up, optionally resolving its machine idents
    async fn load_account(
        &self,
        key: &AccountKey,
        load_idents: bool,
    ) -> Result<Option<Account>, StoreError>;

    /// Persist the account's dirty fields and clear them
    async fn save_account(&self, account: &mut Account) -> Result<(), StoreError>;

    /// Every non-blank ident the account has reported, sorted ascending
    async fn load_idents(&self, account_id: AccountId) -> Result<Vec<String>, StoreError>;

    /// Rewrite the account's username and email so it can no longer be used
    async fn disable_account(&self, account: &mut Account) -> Result<(), StoreError>;
}

/// Durable tainted / banned / used-by relations
///
/// Inserts are idempotent: inserting an existing row is success.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn insert_usage(&self, account_id: AccountId, ident: &str) -> Result<(), StoreError>;

    async fn is_tainted(&self, ident: &str) -> Result<bool, StoreError>;

    async fn insert_tainted(&self, ident: &str) -> Result<(), StoreError>;

    async fn delete_tainted(&self, ident: &str) -> Result<(), StoreError>;

    /// Subset of `idents` that are tainted. `idents` is never empty.
    async fn select_tainted(&self, idents: &[String]) -> Result<Vec<String>, StoreError>;

    async fn is_banned_ident(&self, ident: &str, site: SiteId) -> Result<bool, StoreError>;

    async fn insert_banned(&self, ident: &str, site: SiteId) -> Result<(), StoreError>;

    async fn delete_banned(&self, ident: &str, site: SiteId) -> Result<(), StoreError>;

    /// Subset of `idents` banned on `site`. `idents` is never empty.
    async fn select_banned(
        &self,
        idents: &[String],
        site: SiteId,
    ) -> Result<Vec<String>, StoreError>;

    /// Accounts that have ever reported `ident`
    async fn accounts_using(&self, ident: &str) -> Result<Vec<AccountCard>, StoreError>;

    /// Number of accounts that have ever reported `ident`
    async fn usage_count(&self, ident: &str) -> Result<u64, StoreError>;

    /// Non-disabled accounts using the ident that never bought paid
    /// currency and were created after the cutoff
    async fn count_free_accounts(&self, query: FreeAccountQuery<'_>) -> Result<u64, StoreError>;
}

/// Everything the engine needs from persistence
#[async_trait]
pub trait Store: AccountStore + LedgerStore {
    /// Cheap liveness probe
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
