//! Free account quota
//!
//! Bounds how many non-paying accounts one machine may create within a
//! trailing window. The count is approximate: it is not atomic with the
//! account creation that follows it.

use crate::store::{FreeAccountQuery, LedgerStore, StoreError};
use chrono::{DateTime, Duration, Utc};
use warden_common::constants;
use warden_common::SiteId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeAccountQuota {
    /// Negative offset from now, in days, marking the start of the window
    pub cutoff_days: i64,
    /// Counts strictly above this are refused
    pub max_free: u32,
    /// The one site where only trial accounts count
    pub primary_site: SiteId,
}

impl Default for FreeAccountQuota {
    fn default() -> Self {
        Self {
            cutoff_days: constants::RECENT_ACCOUNT_CUTOFF_DAYS,
            max_free: constants::MAX_FREE_ACCOUNTS_PER_MACHINE,
            primary_site: constants::DEFAULT_PRIMARY_SITE_ID,
        }
    }
}

impl FreeAccountQuota {
    pub fn new(cutoff_days: i64, max_free: u32, primary_site: SiteId) -> Self {
        Self {
            cutoff_days,
            max_free,
            primary_site,
        }
    }

    /// Accounts created strictly after this instant are recent.
    ///
    /// Saturates at the earliest representable instant.
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        Duration::try_days(self.cutoff_days)
            .and_then(|offset| now.checked_add_signed(offset))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Whether accounts that converted to paying drop out of the count
    pub fn trial_only(&self, site: Option<SiteId>) -> bool {
        site == Some(self.primary_site)
    }

    pub fn exceeded_by(&self, count: u64) -> bool {
        count > u64::from(self.max_free)
    }

    /// Recent free accounts that have reported `ident`
    pub async fn count_recent_free_accounts<S: LedgerStore + ?Sized>(
        &self,
        store: &S,
        ident: &str,
        site: Option<SiteId>,
    ) -> Result<u64, StoreError> {
        if crate::account::is_blank(ident) {
            return Ok(0);
        }
        store
            .count_free_accounts(FreeAccountQuery {
                ident,
                created_after: self.window_start(Utc::now()),
                trial_only: self.trial_only(site),
            })
            .await
    }

    /// True when the machine already holds more free accounts than allowed
    pub async fn exceeds<S: LedgerStore + ?Sized>(
        &self,
        store: &S,
        ident: &str,
        site: Option<SiteId>,
    ) -> Result<bool, StoreError> {
        let count = self.count_recent_free_accounts(store, ident, site).await?;
        let exceeded = self.exceeded_by(count);
        if exceeded {
            tracing::debug!(
                "Ident {} holds {} recent free accounts (max {})",
                ident,
                count,
                self.max_free
            );
        }
        Ok(exceeded)
    }
}
