//! Access decisions
//!
//! [`AccessEngine`] composes the token model, the ident ledger and the free
//! account quota into the ordered rules that decide whether a login or an
//! account creation may go ahead. Rules are evaluated in order and the
//! first match wins. Store failures are returned as errors and never
//! turned into a decision.

use super::ledger::IdentLedger;
use super::quota::FreeAccountQuota;
use crate::account::{Account, AccountCard, AccountKey};
use crate::store::{Store, StoreError};
use std::sync::Arc;
use warden_common::{AccessResult, SiteId, SiteTable};

pub struct AccessEngine<S: ?Sized> {
    store: Arc<S>,
    ledger: IdentLedger<S>,
    quota: FreeAccountQuota,
    sites: Arc<SiteTable>,
}

impl<S: ?Sized> Clone for AccessEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            ledger: self.ledger.clone(),
            quota: self.quota,
            sites: Arc::clone(&self.sites),
        }
    }
}

impl<S: Store + ?Sized> AccessEngine<S> {
    pub fn new(store: Arc<S>, sites: Arc<SiteTable>, quota: FreeAccountQuota) -> Self {
        Self {
            ledger: IdentLedger::new(Arc::clone(&store)),
            store,
            quota,
            sites,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn ledger(&self) -> &IdentLedger<S> {
        &self.ledger
    }

    pub fn sites(&self) -> &SiteTable {
        &self.sites
    }

    pub fn quota(&self) -> &FreeAccountQuota {
        &self.quota
    }

    /// Load an account with its machine idents resolved
    pub async fn load_account(&self, key: &AccountKey) -> Result<Option<Account>, StoreError> {
        self.store.load_account(key, true).await
    }

    /// Decide whether an existing account may play on `site` from `ident`.
    ///
    /// Records the ident against the account as a side effect. The account
    /// must have been loaded with its idents; if not, access is granted.
    pub async fn validate_user(
        &self,
        site: SiteId,
        account: &mut Account,
        ident: &str,
        new_player: bool,
    ) -> Result<AccessResult, StoreError> {
        if !account.idents.is_loaded() {
            tracing::warn!(
                "Machine idents not loaded for account {}, granting access",
                account.id
            );
            return Ok(AccessResult::Granted);
        }

        self.ledger.record_usage(account, ident).await?;

        if account.is_banned(&self.sites, site) {
            self.ledger.taint(ident).await?;
            tracing::info!(
                "Banned account {} seen on site {}, tainted ident {}",
                account.id,
                site,
                ident
            );
            return Ok(AccessResult::AccountBanned);
        }

        if self.ledger.is_banned_for_site(ident, site).await? {
            tracing::info!("Account {} refused on site {}: ident {} is banned", account.id, site, ident);
            return Ok(AccessResult::AccountBanned);
        }

        if new_player && self.ledger.is_tainted(ident).await? {
            tracing::info!("New account {} refused: ident {} is tainted", account.id, ident);
            return Ok(AccessResult::NewAccountTainted);
        }

        if account.is_deadbeat(&self.sites, site) {
            return Ok(AccessResult::Deadbeat);
        }

        if new_player
            && !account.is_subscriber(&self.sites, self.quota.primary_site)
            && !account.has_bought_coins()
            && self.quota.exceeds(self.store.as_ref(), ident, Some(site)).await?
        {
            tracing::info!(
                "New account {} refused on site {}: too many free accounts on ident {}",
                account.id,
                site,
                ident
            );
            return Ok(AccessResult::NoNewFreeAccount);
        }

        Ok(AccessResult::Granted)
    }

    /// Decide whether `ident` may register a new account.
    ///
    /// With no site, only the global taint and the site-agnostic quota
    /// apply.
    pub async fn check_can_create(
        &self,
        ident: &str,
        site: Option<SiteId>,
    ) -> Result<AccessResult, StoreError> {
        if self.ledger.is_tainted(ident).await? {
            return Ok(AccessResult::NewAccountTainted);
        }
        if let Some(site) = site {
            if self.ledger.is_banned_for_site(ident, site).await? {
                return Ok(AccessResult::NewAccountTainted);
            }
        }

        if self.quota.exceeds(self.store.as_ref(), ident, site).await? {
            return Ok(AccessResult::NoNewFreeAccount);
        }

        Ok(AccessResult::Granted)
    }

    /// Ident-only checks for callers that have no account loaded
    pub async fn validate_ident(
        &self,
        site: SiteId,
        ident: &str,
        new_player: bool,
    ) -> Result<AccessResult, StoreError> {
        if self.ledger.is_banned_for_site(ident, site).await? {
            return Ok(AccessResult::NewAccountTainted);
        }
        if new_player && self.ledger.is_tainted(ident).await? {
            return Ok(AccessResult::NewAccountTainted);
        }
        if new_player && self.quota.exceeds(self.store.as_ref(), ident, Some(site)).await? {
            return Ok(AccessResult::NoNewFreeAccount);
        }
        Ok(AccessResult::Granted)
    }

    /// Ban the account on `site` and taint every ident it has reported.
    ///
    /// Returns false when the account does not exist or the site does not
    /// support banning.
    pub async fn ban(&self, site: SiteId, key: &AccountKey) -> Result<bool, StoreError> {
        let Some(mut account) = self.store.load_account(key, true).await? else {
            return Ok(false);
        };
        if !account.set_banned(&self.sites, site, true) {
            return Ok(false);
        }
        self.store.save_account(&mut account).await?;

        let idents = account.idents.as_slice().unwrap_or_default();
        let tainted = self.ledger.propagate_taint_on_ban(idents).await?;
        tracing::info!(
            "Banned account {} on site {} ({} idents newly tainted)",
            account.id,
            site,
            tainted
        );
        Ok(true)
    }

    /// Lift the account's ban on `site`, optionally untainting its idents.
    ///
    /// Untainting does not check whether another banned account shares an
    /// ident.
    pub async fn unban(
        &self,
        site: SiteId,
        key: &AccountKey,
        untaint: bool,
    ) -> Result<bool, StoreError> {
        let Some(mut account) = self.store.load_account(key, untaint).await? else {
            return Ok(false);
        };
        if !account.set_banned(&self.sites, site, false) {
            return Ok(false);
        }
        self.store.save_account(&mut account).await?;

        if untaint {
            let idents = account.idents.as_slice().unwrap_or_default();
            let untainted = self.ledger.untaint_all(idents).await?;
            tracing::info!(
                "Unbanned account {} on site {} ({} idents untainted)",
                account.id,
                site,
                untainted
            );
        } else {
            tracing::info!("Unbanned account {} on site {}", account.id, site);
        }
        Ok(true)
    }

    /// Set or clear the account's payment default hold on `site`
    pub async fn set_deadbeat(
        &self,
        site: SiteId,
        key: &AccountKey,
        deadbeat: bool,
    ) -> Result<bool, StoreError> {
        let Some(mut account) = self.store.load_account(key, false).await? else {
            return Ok(false);
        };
        if !account.set_deadbeat(&self.sites, site, deadbeat) {
            tracing::warn!("Site {} has no deadbeat token", site);
            return Ok(false);
        }
        self.store.save_account(&mut account).await?;
        tracing::info!(
            "Set deadbeat={} for account {} on site {}",
            deadbeat,
            account.id,
            site
        );
        Ok(true)
    }

    /// Rename the account out of the way so it can no longer log in.
    ///
    /// Returns the new username, or `None` when the account does not exist.
    pub async fn disable_account(&self, key: &AccountKey) -> Result<Option<String>, StoreError> {
        let Some(mut account) = self.store.load_account(key, false).await? else {
            return Ok(None);
        };
        self.store.disable_account(&mut account).await?;
        tracing::info!("Disabled account {} as {}", account.id, account.username());
        Ok(Some(account.username().to_string()))
    }

    /// Taint every ident the account has reported, without banning it.
    ///
    /// Returns false when the account does not exist.
    pub async fn taint_account(&self, key: &AccountKey) -> Result<bool, StoreError> {
        let Some(account) = self.store.load_account(key, true).await? else {
            return Ok(false);
        };
        let idents = account.idents.as_slice().unwrap_or_default();
        let tainted = self.ledger.propagate_taint_on_ban(idents).await?;
        tracing::info!(
            "Tainted idents of account {} ({} newly tainted)",
            account.id,
            tainted
        );
        Ok(true)
    }

    pub async fn taint(&self, ident: &str) -> Result<(), StoreError> {
        self.ledger.taint(ident).await
    }

    pub async fn untaint(&self, ident: &str) -> Result<(), StoreError> {
        self.ledger.untaint(ident).await
    }

    pub async fn ban_ident(&self, ident: &str, site: SiteId) -> Result<(), StoreError> {
        self.ledger.ban_for_site(ident, site).await
    }

    pub async fn unban_ident(&self, ident: &str, site: SiteId) -> Result<(), StoreError> {
        self.ledger.unban_for_site(ident, site).await
    }

    pub async fn filter_tainted(&self, idents: &[String]) -> Result<Vec<String>, StoreError> {
        self.ledger.filter_tainted(idents).await
    }

    pub async fn filter_banned(
        &self,
        idents: &[String],
        site: SiteId,
    ) -> Result<Vec<String>, StoreError> {
        self.ledger.filter_banned(idents, site).await
    }

    pub async fn users_of_ident(&self, ident: &str) -> Result<Vec<AccountCard>, StoreError> {
        self.ledger.users_of(ident).await
    }

    pub async fn users_of_idents(&self, idents: &[String]) -> Result<Vec<AccountCard>, StoreError> {
        self.ledger.users_of_idents(idents).await
    }

    pub async fn ident_usage_count(&self, ident: &str) -> Result<u64, StoreError> {
        self.ledger.usage_count(ident).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::MachineIdents;
    use crate::store::{AccountStore, LedgerStore, MemoryStore};
    use chrono::{Duration, Utc};
    use warden_common::sites::{FLAGSHIP_SITE_ID, FRONTIER_SITE_ID, GARDENS_SITE_ID};
    use warden_common::{AccountFlags, BillingStatus, Token};

    fn engine() -> (Arc<MemoryStore>, AccessEngine<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let engine = AccessEngine::new(
            store.clone(),
            Arc::new(SiteTable::builtin().clone()),
            FreeAccountQuota::default(),
        );
        (store, engine)
    }

    async fn player(store: &MemoryStore, name: &str) -> Account {
        let acct = store.create_account(name, &format!("{}@example.com", name), Utc::now());
        store
            .load_account(&AccountKey::Id(acct.id), true)
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_new_player_scenario() {
        let (store, engine) = engine();
        let mut acct = player(&store, "newbie").await;

        let result = engine
            .validate_user(FLAGSHIP_SITE_ID, &mut acct, "dev123", true)
            .await
            .unwrap();
        assert_eq!(result, AccessResult::Granted);
        assert!(acct.idents.contains("dev123"));
        assert_eq!(
            engine.check_can_create("dev123", Some(FLAGSHIP_SITE_ID)).await.unwrap(),
            AccessResult::Granted
        );

        assert!(engine
            .ban(FLAGSHIP_SITE_ID, &AccountKey::Id(acct.id))
            .await
            .unwrap());
        assert_eq!(
            engine.check_can_create("dev123", Some(FLAGSHIP_SITE_ID)).await.unwrap(),
            AccessResult::NewAccountTainted
        );
    }

    #[tokio::test]
    async fn test_unloaded_idents_fail_open() {
        let (store, engine) = engine();
        let created = store.create_account("bare", "bare@example.com", Utc::now());
        let mut acct = store
            .load_account(&AccountKey::Id(created.id), false)
            .await
            .unwrap()
            .unwrap();
        engine.taint("dev1").await.unwrap();
        engine.ban_ident("dev1", FLAGSHIP_SITE_ID).await.unwrap();

        let result = engine
            .validate_user(FLAGSHIP_SITE_ID, &mut acct, "dev1", true)
            .await
            .unwrap();
        assert_eq!(result, AccessResult::Granted);
        assert_eq!(acct.idents, MachineIdents::NotLoaded);
        assert!(store.load_idents(acct.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_banned_account_taints_ident() {
        let (store, engine) = engine();
        let mut acct = player(&store, "cheater").await;
        acct.set_banned(engine.sites(), FLAGSHIP_SITE_ID, true);
        store.save_account(&mut acct).await.unwrap();

        let result = engine
            .validate_user(FLAGSHIP_SITE_ID, &mut acct, "laptop", false)
            .await
            .unwrap();
        assert_eq!(result, AccessResult::AccountBanned);
        assert!(store.is_tainted("laptop").await.unwrap());

        // the ban is per site
        let result = engine
            .validate_user(FRONTIER_SITE_ID, &mut acct, "laptop", false)
            .await
            .unwrap();
        assert_eq!(result, AccessResult::Granted);
    }

    #[tokio::test]
    async fn test_banned_beats_deadbeat() {
        let (store, engine) = engine();
        let mut acct = player(&store, "both").await;
        acct.set_banned(engine.sites(), FLAGSHIP_SITE_ID, true);
        acct.set_deadbeat(engine.sites(), FLAGSHIP_SITE_ID, true);

        let result = engine
            .validate_user(FLAGSHIP_SITE_ID, &mut acct, "dev", false)
            .await
            .unwrap();
        assert_eq!(result, AccessResult::AccountBanned);
    }

    #[tokio::test]
    async fn test_banned_machine_blocks_good_account() {
        let (store, engine) = engine();
        let mut acct = player(&store, "innocent").await;
        engine.ban_ident("shared-pc", FLAGSHIP_SITE_ID).await.unwrap();

        let result = engine
            .validate_user(FLAGSHIP_SITE_ID, &mut acct, "shared-pc", false)
            .await
            .unwrap();
        assert_eq!(result, AccessResult::AccountBanned);
        // the account itself stays unbanned
        assert!(!acct.is_banned(engine.sites(), FLAGSHIP_SITE_ID));
    }

    #[tokio::test]
    async fn test_tainted_ident_only_blocks_new_players() {
        let (store, engine) = engine();
        engine.taint("dev").await.unwrap();

        let mut old = player(&store, "old").await;
        assert_eq!(
            engine.validate_user(FLAGSHIP_SITE_ID, &mut old, "dev", false).await.unwrap(),
            AccessResult::Granted
        );

        let mut fresh = player(&store, "fresh").await;
        assert_eq!(
            engine.validate_user(FLAGSHIP_SITE_ID, &mut fresh, "dev", true).await.unwrap(),
            AccessResult::NewAccountTainted
        );
    }

    #[tokio::test]
    async fn test_deadbeat() {
        let (store, engine) = engine();
        let acct = player(&store, "bounced").await;
        assert!(engine
            .set_deadbeat(FLAGSHIP_SITE_ID, &AccountKey::Id(acct.id), true)
            .await
            .unwrap());
        let mut acct = engine
            .load_account(&AccountKey::Id(acct.id))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            engine.validate_user(FLAGSHIP_SITE_ID, &mut acct, "dev", false).await.unwrap(),
            AccessResult::Deadbeat
        );
        assert_eq!(
            engine.validate_user(FRONTIER_SITE_ID, &mut acct, "dev", false).await.unwrap(),
            AccessResult::Granted
        );
    }

    #[tokio::test]
    async fn test_free_account_quota_on_validate() {
        let (store, engine) = engine();
        let mut first = player(&store, "first").await;
        assert_eq!(
            engine.validate_user(FLAGSHIP_SITE_ID, &mut first, "farm", true).await.unwrap(),
            AccessResult::Granted
        );
        let mut second = player(&store, "second").await;
        assert_eq!(
            engine.validate_user(FLAGSHIP_SITE_ID, &mut second, "farm", true).await.unwrap(),
            AccessResult::Granted
        );

        for name in ["third", "fourth"] {
            let acct = store.create_account(name, &format!("{}@example.com", name), Utc::now());
            store.insert_usage(acct.id, "farm").await.unwrap();
        }
        let mut fifth = player(&store, "fifth").await;
        assert_eq!(
            engine.validate_user(FLAGSHIP_SITE_ID, &mut fifth, "farm", true).await.unwrap(),
            AccessResult::NoNewFreeAccount
        );

        // paying accounts are exempt
        let mut payer = player(&store, "payer").await;
        payer.set_flag(AccountFlags::HAS_BOUGHT_COINS, true);
        assert_eq!(
            engine.validate_user(FLAGSHIP_SITE_ID, &mut payer, "farm", true).await.unwrap(),
            AccessResult::Granted
        );
        let mut insider = player(&store, "insider").await;
        insider.add_token(Token::INSIDER);
        assert_eq!(
            engine.validate_user(FLAGSHIP_SITE_ID, &mut insider, "farm", true).await.unwrap(),
            AccessResult::Granted
        );
    }

    #[tokio::test]
    async fn test_check_can_create_quota_boundary() {
        let (store, engine) = engine();
        for name in ["a", "b"] {
            let acct = store.create_account(name, &format!("{}@example.com", name), Utc::now());
            store.insert_usage(acct.id, "dev").await.unwrap();
        }
        assert_eq!(
            engine.check_can_create("dev", Some(FLAGSHIP_SITE_ID)).await.unwrap(),
            AccessResult::Granted
        );

        let third = store.create_account("c", "c@example.com", Utc::now());
        store.insert_usage(third.id, "dev").await.unwrap();
        assert_eq!(
            engine.check_can_create("dev", Some(FLAGSHIP_SITE_ID)).await.unwrap(),
            AccessResult::NoNewFreeAccount
        );
    }

    #[tokio::test]
    async fn test_primary_site_ignores_converted_accounts() {
        let (store, engine) = engine();
        for name in ["a", "b", "c"] {
            let mut acct =
                store.create_account(name, &format!("{}@example.com", name), Utc::now());
            store.insert_usage(acct.id, "dev").await.unwrap();
            if name == "a" {
                acct.set_billing_status(BillingStatus::ExSubscriber);
                store.save_account(&mut acct).await.unwrap();
            }
        }

        assert_eq!(
            engine.check_can_create("dev", Some(FLAGSHIP_SITE_ID)).await.unwrap(),
            AccessResult::Granted
        );
        assert_eq!(
            engine.check_can_create("dev", Some(FRONTIER_SITE_ID)).await.unwrap(),
            AccessResult::NoNewFreeAccount
        );
    }

    #[tokio::test]
    async fn test_check_can_create_banned_ident() {
        let (_store, engine) = engine();
        engine.ban_ident("dev", FRONTIER_SITE_ID).await.unwrap();

        assert_eq!(
            engine.check_can_create("dev", Some(FRONTIER_SITE_ID)).await.unwrap(),
            AccessResult::NewAccountTainted
        );
        assert_eq!(
            engine.check_can_create("dev", Some(FLAGSHIP_SITE_ID)).await.unwrap(),
            AccessResult::Granted
        );
        assert_eq!(
            engine.check_can_create("dev", None).await.unwrap(),
            AccessResult::Granted
        );
    }

    #[tokio::test]
    async fn test_ban_propagation_is_a_snapshot() {
        let (store, engine) = engine();
        let acct = store.create_account("farmer", "farmer@example.com", Utc::now());
        store.insert_usage(acct.id, "A").await.unwrap();
        store.insert_usage(acct.id, "B").await.unwrap();

        assert!(engine
            .ban(FLAGSHIP_SITE_ID, &AccountKey::Username("farmer".to_string()))
            .await
            .unwrap());
        assert!(store.is_tainted("A").await.unwrap());
        assert!(store.is_tainted("B").await.unwrap());

        // idents reported after the ban are not tainted by it
        store.insert_usage(acct.id, "C").await.unwrap();
        assert!(!store.is_tainted("C").await.unwrap());
    }

    #[tokio::test]
    async fn test_unban_with_and_without_untaint() {
        let (store, engine) = engine();
        let acct = store.create_account("x", "x@example.com", Utc::now());
        store.insert_usage(acct.id, "A").await.unwrap();
        let key = AccountKey::Id(acct.id);

        engine.ban(FLAGSHIP_SITE_ID, &key).await.unwrap();
        assert!(engine.unban(FLAGSHIP_SITE_ID, &key, false).await.unwrap());
        assert!(store.is_tainted("A").await.unwrap());
        let loaded = engine.load_account(&key).await.unwrap().unwrap();
        assert!(!loaded.is_banned(engine.sites(), FLAGSHIP_SITE_ID));

        engine.ban(FLAGSHIP_SITE_ID, &key).await.unwrap();
        assert!(engine.unban(FLAGSHIP_SITE_ID, &key, true).await.unwrap());
        assert!(!store.is_tainted("A").await.unwrap());
    }

    #[tokio::test]
    async fn test_ban_on_site_without_token_is_noop() {
        let (store, engine) = engine();
        let acct = store.create_account("g", "g@example.com", Utc::now());
        store.insert_usage(acct.id, "A").await.unwrap();
        let key = AccountKey::Id(acct.id);

        assert!(!engine.ban(GARDENS_SITE_ID, &key).await.unwrap());
        assert!(!engine.unban(GARDENS_SITE_ID, &key, true).await.unwrap());
        assert!(!engine.ban(9999, &key).await.unwrap());
        assert!(!store.is_tainted("A").await.unwrap());

        let loaded = engine.load_account(&key).await.unwrap().unwrap();
        assert!(!loaded.is_banned(engine.sites(), GARDENS_SITE_ID));
        assert!(loaded.tokens().is_empty());
    }

    #[tokio::test]
    async fn test_missing_account() {
        let (_store, engine) = engine();
        let key = AccountKey::Username("ghost".to_string());
        assert!(!engine.ban(FLAGSHIP_SITE_ID, &key).await.unwrap());
        assert!(!engine.unban(FLAGSHIP_SITE_ID, &key, true).await.unwrap());
        assert!(!engine.set_deadbeat(FLAGSHIP_SITE_ID, &key, true).await.unwrap());
        assert_eq!(engine.disable_account(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_store_failure_is_an_error() {
        let (store, engine) = engine();
        let mut acct = player(&store, "p").await;
        store.set_unavailable(true);

        assert!(matches!(
            engine.validate_user(FLAGSHIP_SITE_ID, &mut acct, "dev", true).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(engine.check_can_create("dev", Some(FLAGSHIP_SITE_ID)).await.is_err());
        assert!(engine.ban(FLAGSHIP_SITE_ID, &AccountKey::Id(acct.id)).await.is_err());
    }

    #[tokio::test]
    async fn test_disabled_accounts_leave_the_quota() {
        let (store, engine) = engine();
        let mut ids = Vec::new();
        for name in ["a", "b", "c"] {
            let acct = store.create_account(
                name,
                &format!("{}@example.com", name),
                Utc::now() - Duration::days(2),
            );
            store.insert_usage(acct.id, "dev").await.unwrap();
            ids.push(acct.id);
        }
        assert_eq!(
            engine.check_can_create("dev", None).await.unwrap(),
            AccessResult::NoNewFreeAccount
        );

        let renamed = engine.disable_account(&AccountKey::Id(ids[0])).await.unwrap();
        assert_eq!(renamed.as_deref(), Some("0=a"));
        assert_eq!(
            engine.check_can_create("dev", None).await.unwrap(),
            AccessResult::Granted
        );
    }

    #[tokio::test]
    async fn test_validate_ident() {
        let (store, engine) = engine();
        engine.taint("t").await.unwrap();
        engine.ban_ident("b", FLAGSHIP_SITE_ID).await.unwrap();

        assert_eq!(
            engine.validate_ident(FLAGSHIP_SITE_ID, "b", false).await.unwrap(),
            AccessResult::NewAccountTainted
        );
        assert_eq!(
            engine.validate_ident(FLAGSHIP_SITE_ID, "b", true).await.unwrap(),
            AccessResult::NewAccountTainted
        );
        assert_eq!(
            engine.validate_ident(FRONTIER_SITE_ID, "b", false).await.unwrap(),
            AccessResult::Granted
        );
        assert_eq!(
            engine.validate_ident(FLAGSHIP_SITE_ID, "t", true).await.unwrap(),
            AccessResult::NewAccountTainted
        );
        assert_eq!(
            engine.validate_ident(FLAGSHIP_SITE_ID, "t", false).await.unwrap(),
            AccessResult::Granted
        );

        for name in ["a", "b", "c"] {
            let acct = store.create_account(name, &format!("{}@example.com", name), Utc::now());
            store.insert_usage(acct.id, "busy").await.unwrap();
        }
        assert_eq!(
            engine.validate_ident(FLAGSHIP_SITE_ID, "busy", true).await.unwrap(),
            AccessResult::NoNewFreeAccount
        );
        assert_eq!(
            engine.validate_ident(FLAGSHIP_SITE_ID, "busy", false).await.unwrap(),
            AccessResult::Granted
        );
    }

    #[tokio::test]
    async fn test_ident_lookups() {
        let (store, engine) = engine();
        let acct = store.create_account("u", "u@example.com", Utc::now());
        store.insert_usage(acct.id, "dev").await.unwrap();
        engine.taint("dev").await.unwrap();

        let idents = vec!["dev".to_string(), "other".to_string()];
        assert_eq!(engine.filter_tainted(&idents).await.unwrap(), vec!["dev"]);
        assert!(engine.filter_banned(&idents, FLAGSHIP_SITE_ID).await.unwrap().is_empty());
        assert_eq!(engine.ident_usage_count("dev").await.unwrap(), 1);
        assert_eq!(engine.users_of_ident("dev").await.unwrap()[0].username, "u");

        engine.untaint("dev").await.unwrap();
        engine.unban_ident("dev", FLAGSHIP_SITE_ID).await.unwrap();
        assert!(engine.filter_tainted(&idents).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_taint_account_leaves_ban_alone() {
        let (store, engine) = engine();
        let acct = store.create_account("shady", "shady@example.com", Utc::now());
        store.insert_usage(acct.id, "x").await.unwrap();
        store.insert_usage(acct.id, "y").await.unwrap();

        assert!(engine.taint_account(&AccountKey::Id(acct.id)).await.unwrap());
        assert_eq!(store.tainted_count(), 2);

        let mut loaded = player(&store, "other").await;
        assert_eq!(
            engine.validate_user(FLAGSHIP_SITE_ID, &mut loaded, "x", true).await.unwrap(),
            AccessResult::NewAccountTainted
        );

        let shady = store
            .load_account(&AccountKey::Id(acct.id), false)
            .await
            .unwrap()
            .unwrap();
        assert!(!shady.is_banned(engine.sites(), FLAGSHIP_SITE_ID));

        let missing = AccountKey::Username("nobody".to_string());
        assert!(!engine.taint_account(&missing).await.unwrap());
    }

    #[tokio::test]
    async fn test_users_of_idents() {
        let (store, engine) = engine();
        let a = store.create_account("a", "a@example.com", Utc::now());
        let b = store.create_account("b", "b@example.com", Utc::now());
        store.insert_usage(a.id, "one").await.unwrap();
        store.insert_usage(a.id, "two").await.unwrap();
        store.insert_usage(b.id, "two").await.unwrap();

        let idents = vec!["one".to_string(), "two".to_string()];
        let users = engine.users_of_idents(&idents).await.unwrap();
        let names: Vec<_> = users.iter().map(|card| card.username.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);

        store.set_unavailable(true);
        assert!(engine.users_of_idents(&[]).await.unwrap().is_empty());
    }
}
