//! Warden Common - Shared access-control vocabulary
//!
//! This crate contains the types shared by the decision engine and the
//! servers that call it: access results, account tokens and flags, billing
//! states and the compiled-in site table.

pub mod sites;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use sites::{SiteEntry, SiteId, SiteTable, SiteTableError};

/// Errors decoding stored values
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Unknown billing status: {0}")]
    UnknownBillingStatus(i16),

    #[error("Token code 0 is reserved")]
    ZeroToken,
}

/// Outcome of an access decision
///
/// Terminal and stateless. Anything other than [`AccessResult::Granted`] is
/// meant to be translated by the caller into a user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessResult {
    /// Not banned, not tainted, within quota
    Granted,

    /// A new account is being created from a tainted machine
    NewAccountTainted,

    /// The account, or the machine on this site, is banned
    AccountBanned,

    /// The machine has used up its recent free accounts
    NoNewFreeAccount,

    /// The account bounced a payment on this site
    Deadbeat,
}

impl AccessResult {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessResult::Granted => "GRANTED",
            AccessResult::NewAccountTainted => "NEW_ACCOUNT_TAINTED",
            AccessResult::AccountBanned => "ACCOUNT_BANNED",
            AccessResult::NoNewFreeAccount => "NO_NEW_FREE_ACCOUNT",
            AccessResult::Deadbeat => "DEADBEAT",
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self, AccessResult::Granted)
    }

    /// Suggested text for callers that surface the decision to a user
    pub fn message(&self) -> &'static str {
        match self {
            AccessResult::Granted => "Access granted",
            AccessResult::NewAccountTainted => {
                "This machine cannot create new accounts right now"
            }
            AccessResult::AccountBanned => "This account is banned",
            AccessResult::NoNewFreeAccount => {
                "This machine has already created the maximum number of free accounts"
            }
            AccessResult::Deadbeat => "This account has an outstanding payment problem",
        }
    }
}

impl fmt::Display for AccessResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A byte-coded capability, ban or deadbeat marker held by an account
///
/// Code 0 is never a token; lookups that have nothing to return use `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Token(u8);

impl Token {
    pub const ADMIN: Token = Token(1);
    pub const MAINTAINER: Token = Token(2);
    pub const INSIDER: Token = Token(3);
    pub const TESTER: Token = Token(4);
    pub const FLAGSHIP_BANNED: Token = Token(5);
    pub const SUPPORT: Token = Token(6);
    pub const BIG_SPENDER: Token = Token(7);
    pub const FLAGSHIP_DEADBEAT: Token = Token(8);
    pub const FRONTIER_BANNED: Token = Token(9);
    pub const FRONTIER_DEADBEAT: Token = Token(10);
    pub const SOCIAL_BANNED: Token = Token(11);
    pub const SOCIAL_DEADBEAT: Token = Token(12);
    pub const ARCADE_BANNED: Token = Token(13);
    pub const ARCADE_DEADBEAT: Token = Token(14);
    pub const ADVENTURE_BANNED: Token = Token(15);
    pub const ADVENTURE_DEADBEAT: Token = Token(16);
    pub const TRIVIA_BANNED: Token = Token(17);
    pub const TRIVIA_DEADBEAT: Token = Token(18);
    pub const JR_SUPPORT: Token = Token(19);

    /// Tokens that grant capabilities rather than mark a site state
    pub const CAPABILITIES: [Token; 7] = [
        Token::ADMIN,
        Token::MAINTAINER,
        Token::INSIDER,
        Token::TESTER,
        Token::SUPPORT,
        Token::BIG_SPENDER,
        Token::JR_SUPPORT,
    ];

    /// Wrap a raw code, rejecting the reserved 0
    pub fn new(code: u8) -> Option<Self> {
        (code != 0).then_some(Token(code))
    }

    pub fn code(&self) -> u8 {
        self.0
    }

    pub fn is_capability(&self) -> bool {
        Self::CAPABILITIES.contains(self)
    }
}

impl TryFrom<u8> for Token {
    type Error = DecodeError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Token::new(code).ok_or(DecodeError::ZeroToken)
    }
}

impl From<Token> for u8 {
    fn from(token: Token) -> u8 {
        token.0
    }
}

/// Per-account status bits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountFlags(u32);

impl AccountFlags {
    pub const VALIDATED: AccountFlags = AccountFlags(1 << 0);
    pub const AFFILIATE_SPAM: AccountFlags = AccountFlags(1 << 1);
    /// Has purchased paid currency at least once
    pub const HAS_BOUGHT_COINS: AccountFlags = AccountFlags(1 << 2);
    pub const KEY_REDEEMED: AccountFlags = AccountFlags(1 << 3);
    pub const HAS_BOUGHT_TIME: AccountFlags = AccountFlags(1 << 4);
    pub const ACTIVE_FLAGSHIP_PLAYER: AccountFlags = AccountFlags(1 << 5);
    pub const ACTIVE_FRONTIER_PLAYER: AccountFlags = AccountFlags(1 << 6);
    pub const ACTIVE_GARDENS_PLAYER: AccountFlags = AccountFlags(1 << 7);
    pub const FAMILY_SUBSCRIBER: AccountFlags = AccountFlags(1 << 8);
    pub const CONVERTED_TO_STEAM: AccountFlags = AccountFlags(1 << 9);

    pub const fn empty() -> Self {
        AccountFlags(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        AccountFlags(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// True if every bit of `other` is set
    pub const fn contains(&self, other: AccountFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn set(&mut self, other: AccountFlags, on: bool) {
        if on {
            self.0 |= other.0;
        } else {
            self.0 &= !other.0;
        }
    }
}

impl std::ops::BitOr for AccountFlags {
    type Output = AccountFlags;

    fn bitor(self, rhs: AccountFlags) -> AccountFlags {
        AccountFlags(self.0 | rhs.0)
    }
}

/// Billing state of an account, stored as a single small integer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum BillingStatus {
    #[default]
    Trial = 0,
    Subscriber = 1,
    BillingFailure = 2,
    ExSubscriber = 3,
    Banned = 4,
}

impl BillingStatus {
    pub fn code(&self) -> i16 {
        *self as i16
    }
}

impl TryFrom<i16> for BillingStatus {
    type Error = DecodeError;

    fn try_from(code: i16) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(BillingStatus::Trial),
            1 => Ok(BillingStatus::Subscriber),
            2 => Ok(BillingStatus::BillingFailure),
            3 => Ok(BillingStatus::ExSubscriber),
            4 => Ok(BillingStatus::Banned),
            other => Err(DecodeError::UnknownBillingStatus(other)),
        }
    }
}

/// Engine defaults
pub mod constants {
    use crate::SiteId;

    /// The primary paid site; its quota count only includes trial accounts
    pub const DEFAULT_PRIMARY_SITE_ID: SiteId = 2;

    /// Days to look back when counting recent free accounts (negative)
    pub const RECENT_ACCOUNT_CUTOFF_DAYS: i64 = -3 * 30;

    /// Free accounts a machine may hold before new ones are refused
    pub const MAX_FREE_ACCOUNTS_PER_MACHINE: u32 = 2;

    /// Disabled accounts carry this in their username
    pub const DISABLED_MARKER: char = '=';

    /// Usernames are truncated to this length when disabled
    pub const MAX_USERNAME_LEN: usize = 24;

    /// Login attempts allowed per throttle period
    pub const DEFAULT_LOGIN_MAX_ATTEMPTS: u32 = 5;

    /// How often the whole login throttle table is cleared
    pub const DEFAULT_LOGIN_THROTTLE_PERIOD_SECONDS: u64 = 300;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_result_wire_names() {
        let json = serde_json::to_string(&AccessResult::NoNewFreeAccount).unwrap();
        assert_eq!(json, "\"NO_NEW_FREE_ACCOUNT\"");
        assert_eq!(AccessResult::NoNewFreeAccount.as_str(), "NO_NEW_FREE_ACCOUNT");

        let decoded: AccessResult = serde_json::from_str("\"ACCOUNT_BANNED\"").unwrap();
        assert_eq!(decoded, AccessResult::AccountBanned);
        assert!(!decoded.is_granted());
        assert!(AccessResult::Granted.is_granted());
    }

    #[test]
    fn test_token_zero_is_reserved() {
        assert_eq!(Token::new(0), None);
        assert_eq!(Token::new(5), Some(Token::FLAGSHIP_BANNED));
        assert_eq!(Token::try_from(0u8), Err(DecodeError::ZeroToken));
        assert!(serde_json::from_str::<Token>("0").is_err());
    }

    #[test]
    fn test_capability_tokens() {
        assert!(Token::ADMIN.is_capability());
        assert!(Token::JR_SUPPORT.is_capability());
        assert!(!Token::FLAGSHIP_BANNED.is_capability());
        assert!(!Token::TRIVIA_DEADBEAT.is_capability());
    }

    #[test]
    fn test_account_flags() {
        let mut flags = AccountFlags::VALIDATED | AccountFlags::HAS_BOUGHT_COINS;
        assert!(flags.contains(AccountFlags::HAS_BOUGHT_COINS));
        assert!(!flags.contains(AccountFlags::FAMILY_SUBSCRIBER));

        flags.set(AccountFlags::HAS_BOUGHT_COINS, false);
        assert_eq!(flags, AccountFlags::VALIDATED);
        assert_eq!(flags.bits(), 1);
    }

    #[test]
    fn test_billing_status_codes() {
        assert_eq!(BillingStatus::try_from(1), Ok(BillingStatus::Subscriber));
        assert_eq!(BillingStatus::ExSubscriber.code(), 3);
        assert_eq!(
            BillingStatus::try_from(9),
            Err(DecodeError::UnknownBillingStatus(9))
        );
    }
}
