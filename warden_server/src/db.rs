//! Database connection and models

use crate::account::{Account, AccountCard, AccountField, AccountId};
use crate::store::StoreError;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, QueryBuilder};
use warden_common::{AccountFlags, BillingStatus, SiteId, Token};

/// Initialize the database connection pool
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Account row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AccountRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub flags: i32,
    pub tokens: Vec<u8>,
    pub billing_status: i16,
    pub created_at: DateTime<Utc>,
}

impl AccountRow {
    /// Convert to the engine's model, rejecting rows with impossible values
    pub fn into_account(self) -> Result<Account, StoreError> {
        let billing_status =
            BillingStatus::try_from(self.billing_status).map_err(StoreError::malformed)?;
        let tokens = self
            .tokens
            .into_iter()
            .map(Token::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::malformed)?;

        Ok(Account::from_stored(
            self.id,
            self.username,
            self.email,
            AccountFlags::from_bits(self.flags as u32),
            tokens,
            billing_status,
            self.created_at,
        ))
    }
}

/// Database queries
pub mod queries {
    use super::*;

    const ACCOUNT_COLUMNS: &str =
        "id, username, email, flags, tokens, billing_status, created_at";

    /// Find an account by ID
    pub async fn find_account_by_id(
        pool: &PgPool,
        id: AccountId,
    ) -> Result<Option<AccountRow>, sqlx::Error> {
        sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {} FROM accounts WHERE id = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Find an account by username
    pub async fn find_account_by_username(
        pool: &PgPool,
        username: &str,
    ) -> Result<Option<AccountRow>, sqlx::Error> {
        sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {} FROM accounts WHERE username = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(username)
        .fetch_optional(pool)
        .await
    }

    /// Find an account by email
    pub async fn find_account_by_email(
        pool: &PgPool,
        email: &str,
    ) -> Result<Option<AccountRow>, sqlx::Error> {
        sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {} FROM accounts WHERE email = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(email)
        .fetch_optional(pool)
        .await
    }

    /// Write only the columns that changed
    pub async fn update_account_fields(
        pool: &PgPool,
        account: &Account,
        fields: &[AccountField],
    ) -> Result<u64, sqlx::Error> {
        if fields.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE accounts SET ");
        let mut set = builder.separated(", ");
        for field in fields {
            match field {
                AccountField::Username => {
                    set.push("username = ").push_bind_unseparated(account.username().to_string());
                }
                AccountField::Email => {
                    set.push("email = ").push_bind_unseparated(account.email().to_string());
                }
                AccountField::Flags => {
                    set.push("flags = ").push_bind_unseparated(account.flags().bits() as i32);
                }
                AccountField::Tokens => {
                    let codes: Vec<u8> = account.tokens().iter().map(|t| t.code()).collect();
                    set.push("tokens = ").push_bind_unseparated(codes);
                }
                AccountField::BillingStatus => {
                    set.push("billing_status = ")
                        .push_bind_unseparated(account.raw_billing_status().code());
                }
            }
        }
        set.push("updated_at = NOW()");
        builder.push(" WHERE id = ").push_bind(account.id);

        let result = builder.build().execute(pool).await?;
        Ok(result.rows_affected())
    }

    /// All non-blank idents an account has reported
    pub async fn find_idents_of_account(
        pool: &PgPool,
        account_id: AccountId,
    ) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT mach_ident FROM user_idents WHERE account_id = $1 AND btrim(mach_ident) <> ''",
        )
        .bind(account_id)
        .fetch_all(pool)
        .await
    }

    /// Add the account -> ident mapping
    pub async fn insert_user_ident(
        pool: &PgPool,
        account_id: AccountId,
        ident: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO user_idents (account_id, mach_ident) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(account_id)
        .bind(ident)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn is_tainted_ident(pool: &PgPool, ident: &str) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM tainted_idents WHERE mach_ident = $1)")
            .bind(ident)
            .fetch_one(pool)
            .await
    }

    pub async fn insert_tainted_ident(pool: &PgPool, ident: &str) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO tainted_idents (mach_ident) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(ident)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn delete_tainted_ident(pool: &PgPool, ident: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM tainted_idents WHERE mach_ident = $1")
            .bind(ident)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn filter_tainted_idents(
        pool: &PgPool,
        idents: &[String],
    ) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar("SELECT mach_ident FROM tainted_idents WHERE mach_ident = ANY($1)")
            .bind(idents)
            .fetch_all(pool)
            .await
    }

    pub async fn is_banned_ident(
        pool: &PgPool,
        ident: &str,
        site: SiteId,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM banned_idents WHERE mach_ident = $1 AND site_id = $2)",
        )
        .bind(ident)
        .bind(site)
        .fetch_one(pool)
        .await
    }

    pub async fn insert_banned_ident(
        pool: &PgPool,
        ident: &str,
        site: SiteId,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO banned_idents (mach_ident, site_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(ident)
        .bind(site)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn delete_banned_ident(
        pool: &PgPool,
        ident: &str,
        site: SiteId,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM banned_idents WHERE mach_ident = $1 AND site_id = $2")
            .bind(ident)
            .bind(site)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn filter_banned_idents(
        pool: &PgPool,
        idents: &[String],
        site: SiteId,
    ) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT mach_ident FROM banned_idents WHERE site_id = $1 AND mach_ident = ANY($2)",
        )
        .bind(site)
        .bind(idents)
        .fetch_all(pool)
        .await
    }

    /// Every account that has ever reported the ident
    pub async fn find_accounts_using_ident(
        pool: &PgPool,
        ident: &str,
    ) -> Result<Vec<AccountCard>, sqlx::Error> {
        sqlx::query_as::<_, AccountCard>(
            r#"
            SELECT a.id, a.username, a.flags
            FROM accounts a
            INNER JOIN user_idents ui ON ui.account_id = a.id
            WHERE ui.mach_ident = $1
            ORDER BY a.id
            "#,
        )
        .bind(ident)
        .fetch_all(pool)
        .await
    }

    pub async fn count_ident_usage(pool: &PgPool, ident: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM user_idents WHERE mach_ident = $1")
            .bind(ident)
            .fetch_one(pool)
            .await
    }

    /// Count recent free accounts created from a machine.
    ///
    /// Keep the predicates in step with `MemoryStore::count_free_accounts`:
    /// not disabled (`=` in the username), never bought coins, created
    /// strictly after the cutoff, and still in trial when `trial_only`.
    pub async fn count_recent_free_accounts(
        pool: &PgPool,
        ident: &str,
        created_after: DateTime<Utc>,
        trial_only: bool,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM accounts a
            INNER JOIN user_idents ui ON ui.account_id = a.id
            WHERE ui.mach_ident = $1
              AND a.username NOT LIKE '%=%'
              AND (a.flags & $2) = 0
              AND a.created_at > $3
              AND ($4 = FALSE OR a.billing_status = $5)
            "#,
        )
        .bind(ident)
        .bind(AccountFlags::HAS_BOUGHT_COINS.bits() as i32)
        .bind(created_after)
        .bind(trial_only)
        .bind(BillingStatus::Trial.code())
        .fetch_one(pool)
        .await
    }

    /// Try to take a disabled username. Returns false on a name collision.
    pub async fn rename_disabled_account(
        pool: &PgPool,
        account_id: AccountId,
        username: &str,
        email: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE accounts SET username = $1, email = $2, updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(username)
        .bind(email)
        .bind(account_id)
        .execute(pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(false),
            Err(e) => Err(e),
        }
    }
}
