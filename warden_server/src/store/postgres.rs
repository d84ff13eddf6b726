//! Postgres-backed store

use super::{AccountStore, FreeAccountQuery, LedgerStore, Store, StoreError};
use crate::account::{Account, AccountCard, AccountField, AccountId, AccountKey, MachineIdents};
use crate::db::queries;
use async_trait::async_trait;
use sqlx::PgPool;
use warden_common::SiteId;

const DISABLE_ATTEMPTS: u32 = 100;

/// Store over the shared relational database
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl AccountStore for PgStore {
    async fn load_account(
        &self,
        key: &AccountKey,
        load_idents: bool,
    ) -> Result<Option<Account>, StoreError> {
        let row = match key {
            AccountKey::Id(id) => queries::find_account_by_id(&self.pool, *id).await?,
            AccountKey::Username(name) => {
                queries::find_account_by_username(&self.pool, name).await?
            }
            AccountKey::Email(email) => queries::find_account_by_email(&self.pool, email).await?,
        };

        let Some(row) = row else {
            return Ok(None);
        };
        let mut account = row.into_account()?;
        if load_idents {
            account.idents = MachineIdents::from_unsorted(self.load_idents(account.id).await?);
        }
        Ok(Some(account))
    }

    async fn save_account(&self, account: &mut Account) -> Result<(), StoreError> {
        let fields: Vec<AccountField> = account.dirty_fields().collect();
        if fields.is_empty() {
            return Ok(());
        }
        queries::update_account_fields(&self.pool, account, &fields).await?;
        account.clear_dirty();
        Ok(())
    }

    async fn load_idents(&self, account_id: AccountId) -> Result<Vec<String>, StoreError> {
        let mut idents = queries::find_idents_of_account(&self.pool, account_id).await?;
        // sort here so binary searches agree with Rust string ordering
        idents.sort();
        Ok(idents)
    }

    async fn disable_account(&self, account: &mut Account) -> Result<(), StoreError> {
        if account.is_disabled() {
            return Ok(());
        }
        for attempt in 0..DISABLE_ATTEMPTS {
            account.disable(attempt);
            let renamed = queries::rename_disabled_account(
                &self.pool,
                account.id,
                account.username(),
                account.email(),
            )
            .await?;
            if renamed {
                account.clear_dirty();
                return Ok(());
            }
        }
        Err(StoreError::Conflict(format!(
            "no free disabled username for account {}",
            account.id
        )))
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn insert_usage(&self, account_id: AccountId, ident: &str) -> Result<(), StoreError> {
        Ok(queries::insert_user_ident(&self.pool, account_id, ident).await?)
    }

    async fn is_tainted(&self, ident: &str) -> Result<bool, StoreError> {
        Ok(queries::is_tainted_ident(&self.pool, ident).await?)
    }

    async fn insert_tainted(&self, ident: &str) -> Result<(), StoreError> {
        Ok(queries::insert_tainted_ident(&self.pool, ident).await?)
    }

    async fn delete_tainted(&self, ident: &str) -> Result<(), StoreError> {
        Ok(queries::delete_tainted_ident(&self.pool, ident).await?)
    }

    async fn select_tainted(&self, idents: &[String]) -> Result<Vec<String>, StoreError> {
        Ok(queries::filter_tainted_idents(&self.pool, idents).await?)
    }

    async fn is_banned_ident(&self, ident: &str, site: SiteId) -> Result<bool, StoreError> {
        Ok(queries::is_banned_ident(&self.pool, ident, site).await?)
    }

    async fn insert_banned(&self, ident: &str, site: SiteId) -> Result<(), StoreError> {
        Ok(queries::insert_banned_ident(&self.pool, ident, site).await?)
    }

    async fn delete_banned(&self, ident: &str, site: SiteId) -> Result<(), StoreError> {
        Ok(queries::delete_banned_ident(&self.pool, ident, site).await?)
    }

    async fn select_banned(
        &self,
        idents: &[String],
        site: SiteId,
    ) -> Result<Vec<String>, StoreError> {
        Ok(queries::filter_banned_idents(&self.pool, idents, site).await?)
    }

    async fn accounts_using(&self, ident: &str) -> Result<Vec<AccountCard>, StoreError> {
        Ok(queries::find_accounts_using_ident(&self.pool, ident).await?)
    }

    async fn usage_count(&self, ident: &str) -> Result<u64, StoreError> {
        let count = queries::count_ident_usage(&self.pool, ident).await?;
        Ok(count.max(0) as u64)
    }

    async fn count_free_accounts(&self, query: FreeAccountQuery<'_>) -> Result<u64, StoreError> {
        let count = queries::count_recent_free_accounts(
            &self.pool,
            query.ident,
            query.created_after,
            query.trial_only,
        )
        .await?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
