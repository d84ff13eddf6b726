//! Account model: status flags, token ring and machine idents

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use warden_common::{
    constants::{DISABLED_MARKER, MAX_USERNAME_LEN},
    AccountFlags, BillingStatus, SiteId, SiteTable, Token,
};

pub type AccountId = i64;

/// How callers look an account up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountKey {
    Id(AccountId),
    Username(String),
    Email(String),
}

/// Columns that can change after registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AccountField {
    Username,
    Email,
    Flags,
    Tokens,
    BillingStatus,
}

/// The machine identifiers an account has reported
///
/// `NotLoaded` is distinct from an empty set: it means nobody asked the
/// store, and the decision engine refuses to judge on it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MachineIdents {
    #[default]
    NotLoaded,
    /// Sorted ascending, no blanks, no duplicates
    Loaded(Vec<String>),
}

impl MachineIdents {
    pub fn from_unsorted(idents: impl IntoIterator<Item = String>) -> Self {
        let mut idents: Vec<String> = idents
            .into_iter()
            .filter(|ident| !is_blank(ident))
            .collect();
        idents.sort();
        idents.dedup();
        MachineIdents::Loaded(idents)
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, MachineIdents::Loaded(_))
    }

    pub fn as_slice(&self) -> Option<&[String]> {
        match self {
            MachineIdents::NotLoaded => None,
            MachineIdents::Loaded(idents) => Some(idents),
        }
    }

    pub fn contains(&self, ident: &str) -> bool {
        match self {
            MachineIdents::NotLoaded => false,
            MachineIdents::Loaded(idents) => {
                idents.binary_search_by(|probe| probe.as_str().cmp(ident)).is_ok()
            }
        }
    }

    /// Insert keeping sort order. Returns true if the ident was new.
    ///
    /// Does nothing for blank idents or an unloaded set.
    pub fn insert(&mut self, ident: &str) -> bool {
        if is_blank(ident) {
            return false;
        }
        match self {
            MachineIdents::NotLoaded => false,
            MachineIdents::Loaded(idents) => {
                match idents.binary_search_by(|probe| probe.as_str().cmp(ident)) {
                    Ok(_) => false,
                    Err(pos) => {
                        idents.insert(pos, ident.to_string());
                        true
                    }
                }
            }
        }
    }
}

/// Blank idents carry no information and are never recorded or checked
pub fn is_blank(ident: &str) -> bool {
    ident.trim().is_empty()
}

/// A user account as seen by the decision engine
#[derive(Debug, Clone)]
pub struct Account {
    pub id: AccountId,
    username: String,
    email: String,
    flags: AccountFlags,
    tokens: Vec<Token>,
    billing_status: BillingStatus,
    pub created_at: DateTime<Utc>,
    pub idents: MachineIdents,
    dirty: BTreeSet<AccountField>,
}

impl Account {
    pub fn new(id: AccountId, username: &str, email: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            username: username.to_string(),
            email: email.to_string(),
            flags: AccountFlags::empty(),
            tokens: Vec::new(),
            billing_status: BillingStatus::Trial,
            created_at,
            idents: MachineIdents::NotLoaded,
            dirty: BTreeSet::new(),
        }
    }

    /// Rebuild an account from stored columns, with nothing marked dirty
    pub fn from_stored(
        id: AccountId,
        username: String,
        email: String,
        flags: AccountFlags,
        tokens: Vec<Token>,
        billing_status: BillingStatus,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            username,
            email,
            flags,
            tokens,
            billing_status,
            created_at,
            idents: MachineIdents::NotLoaded,
            dirty: BTreeSet::new(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn flags(&self) -> AccountFlags {
        self.flags
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn is_flag_set(&self, flag: AccountFlags) -> bool {
        self.flags.contains(flag)
    }

    pub fn set_flag(&mut self, flag: AccountFlags, on: bool) {
        let before = self.flags;
        self.flags.set(flag, on);
        if self.flags != before {
            self.dirty.insert(AccountField::Flags);
        }
    }

    pub fn is_validated(&self) -> bool {
        self.is_flag_set(AccountFlags::VALIDATED)
    }

    pub fn has_bought_coins(&self) -> bool {
        self.is_flag_set(AccountFlags::HAS_BOUGHT_COINS)
    }

    pub fn has_bought_time(&self) -> bool {
        self.is_flag_set(AccountFlags::HAS_BOUGHT_TIME)
    }

    pub fn holds_token(&self, token: Token) -> bool {
        self.tokens.contains(&token)
    }

    pub fn holds_any_token(&self, tokens: &[Token]) -> bool {
        tokens.iter().any(|token| self.holds_token(*token))
    }

    /// Add a token to the ring; already-held tokens are left alone
    pub fn add_token(&mut self, token: Token) {
        if !self.holds_token(token) {
            self.tokens.push(token);
            self.dirty.insert(AccountField::Tokens);
        }
    }

    /// Remove a token from the ring; absent tokens are left alone
    pub fn remove_token(&mut self, token: Token) {
        if self.holds_token(token) {
            self.tokens.retain(|held| *held != token);
            self.dirty.insert(AccountField::Tokens);
        }
    }

    pub fn is_maintainer(&self) -> bool {
        self.holds_token(Token::MAINTAINER)
    }

    pub fn is_admin(&self) -> bool {
        self.holds_token(Token::ADMIN) || self.is_maintainer()
    }

    /// Insiders are let in for free
    pub fn is_insider(&self) -> bool {
        self.holds_token(Token::INSIDER) || self.is_admin()
    }

    pub fn is_support(&self) -> bool {
        self.holds_token(Token::SUPPORT)
    }

    pub fn is_support_plus(&self) -> bool {
        self.is_support() || self.is_admin()
    }

    pub fn is_big_spender(&self) -> bool {
        self.holds_token(Token::BIG_SPENDER)
    }

    /// The stored billing status, without any per-site override
    pub fn raw_billing_status(&self) -> BillingStatus {
        self.billing_status
    }

    /// Billing status as seen from `site`
    pub fn billing_status(&self, sites: &SiteTable, site: SiteId) -> BillingStatus {
        match sites.subscriber_flag(site) {
            Some(flag) if self.is_flag_set(flag) => BillingStatus::Subscriber,
            _ => self.billing_status,
        }
    }

    /// Returns true if the status changed
    pub fn set_billing_status(&mut self, status: BillingStatus) -> bool {
        if self.billing_status == status {
            return false;
        }
        self.billing_status = status;
        self.dirty.insert(AccountField::BillingStatus);
        true
    }

    pub fn is_subscriber(&self, sites: &SiteTable, site: SiteId) -> bool {
        self.billing_status(sites, site) == BillingStatus::Subscriber || self.is_insider()
    }

    /// False for sites that do not support banning
    pub fn is_banned(&self, sites: &SiteTable, site: SiteId) -> bool {
        sites
            .ban_token(site)
            .is_some_and(|token| self.holds_token(token))
    }

    /// Set or clear the site's ban token.
    ///
    /// Returns false, changing nothing, when the site has no ban token.
    pub fn set_banned(&mut self, sites: &SiteTable, site: SiteId, banned: bool) -> bool {
        let Some(token) = sites.ban_token(site) else {
            tracing::warn!("Requested to update banned for site {} without a ban token", site);
            return false;
        };
        if banned {
            self.add_token(token);
        } else {
            self.remove_token(token);
        }
        true
    }

    /// True if the account bounced a payment on `site`
    pub fn is_deadbeat(&self, sites: &SiteTable, site: SiteId) -> bool {
        match sites.deadbeat_token(site) {
            Some(token) => self.holds_token(token),
            None => {
                if !sites.contains(site) {
                    tracing::warn!("Requested deadbeat token for unknown site {}", site);
                }
                false
            }
        }
    }

    /// Returns false, changing nothing, when the site has no deadbeat token
    pub fn set_deadbeat(&mut self, sites: &SiteTable, site: SiteId, deadbeat: bool) -> bool {
        let Some(token) = sites.deadbeat_token(site) else {
            return false;
        };
        if deadbeat {
            self.add_token(token);
        } else {
            self.remove_token(token);
        }
        true
    }

    pub fn is_disabled(&self) -> bool {
        self.username.contains(DISABLED_MARKER)
    }

    /// Rewrite identifying fields so the account can no longer be used.
    ///
    /// `attempt` prefixes the username so retries can dodge name collisions.
    pub fn disable(&mut self, attempt: u32) {
        let original = match self.username.split_once(DISABLED_MARKER) {
            Some((_, rest)) if self.is_disabled() => rest.to_string(),
            _ => self.username.clone(),
        };
        self.username = format!("{}{}{}", attempt, DISABLED_MARKER, original)
            .chars()
            .take(MAX_USERNAME_LEN)
            .collect();
        self.email = self.email.replace('@', "#");
        self.dirty.insert(AccountField::Username);
        self.dirty.insert(AccountField::Email);
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn dirty_fields(&self) -> impl Iterator<Item = AccountField> + '_ {
        self.dirty.iter().copied()
    }

    pub fn clear_dirty(&mut self) {
        self.dirty.clear();
    }

    pub fn card(&self) -> AccountCard {
        AccountCard {
            id: self.id,
            username: self.username.clone(),
            flags: self.flags.bits(),
        }
    }
}

/// Minimal view of an account for moderation listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct AccountCard {
    pub id: AccountId,
    pub username: String,
    #[sqlx(try_from = "i32")]
    pub flags: u32,
}
