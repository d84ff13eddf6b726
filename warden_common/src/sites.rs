//! Compiled-in site table
//!
//! Maps a site to the tokens that mean "banned here" and "payment default
//! here". Sites without an entry, or entries without a token, have no
//! ban/deadbeat semantics at all.

use crate::{AccountFlags, Token};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use thiserror::Error;

pub type SiteId = i32;

pub const FLAGSHIP_SITE_ID: SiteId = 2;
pub const GARDENS_SITE_ID: SiteId = 6;
pub const REFERRAL_SITE_ID: SiteId = 7;
pub const FRONTIER_SITE_ID: SiteId = 8;
pub const SOCIAL_SITE_ID: SiteId = 9;
pub const FAMILY_SITE_ID: SiteId = 10;
pub const APPS_SITE_ID: SiteId = 11;
pub const EVERYTHING_SITE_ID: SiteId = 12;
pub const BITEME_SITE_ID: SiteId = 13;
pub const DOWNTOWN_SITE_ID: SiteId = 14;
pub const FACEBOOK_SITE_ID: SiteId = 15;
pub const PARTNER_SITE_ID: SiteId = 40;
pub const ADVENTURE_SITE_ID: SiteId = 204;
pub const TRIVIA_SITE_ID: SiteId = 1000;

/// One row of the site table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteEntry {
    pub id: SiteId,
    pub name: &'static str,
    pub ban_token: Option<Token>,
    pub deadbeat_token: Option<Token>,
    /// Holding this flag counts as a subscription on this site
    pub subscriber_flag: Option<AccountFlags>,
}

impl SiteEntry {
    pub const fn new(id: SiteId, name: &'static str) -> Self {
        Self {
            id,
            name,
            ban_token: None,
            deadbeat_token: None,
            subscriber_flag: None,
        }
    }

    pub fn with_tokens(mut self, ban: Token, deadbeat: Token) -> Self {
        self.ban_token = Some(ban);
        self.deadbeat_token = Some(deadbeat);
        self
    }

    pub fn with_subscriber_flag(mut self, flag: AccountFlags) -> Self {
        self.subscriber_flag = Some(flag);
        self
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SiteTableError {
    #[error("Site {0} is listed more than once")]
    DuplicateSite(SiteId),

    #[error("Site {site} uses capability token {token} as a ban or deadbeat marker")]
    CapabilityToken { site: SiteId, token: u8 },

    #[error("Site {site} uses token {token} for both ban and deadbeat")]
    SameBanAndDeadbeat { site: SiteId, token: u8 },

    #[error("Token {0} is a ban token on one site and a deadbeat token on another")]
    CrossedToken(u8),
}

static BUILTIN_SITES: Lazy<SiteTable> = Lazy::new(|| SiteTable {
    entries: [
        SiteEntry::new(FLAGSHIP_SITE_ID, "flagship")
            .with_tokens(Token::FLAGSHIP_BANNED, Token::FLAGSHIP_DEADBEAT),
        SiteEntry::new(GARDENS_SITE_ID, "gardens"),
        SiteEntry::new(REFERRAL_SITE_ID, "referral"),
        SiteEntry::new(FRONTIER_SITE_ID, "frontier")
            .with_tokens(Token::FRONTIER_BANNED, Token::FRONTIER_DEADBEAT),
        SiteEntry::new(SOCIAL_SITE_ID, "social")
            .with_tokens(Token::SOCIAL_BANNED, Token::SOCIAL_DEADBEAT),
        // the family site shares the flagship's ban ring
        SiteEntry::new(FAMILY_SITE_ID, "family")
            .with_tokens(Token::FLAGSHIP_BANNED, Token::FLAGSHIP_DEADBEAT)
            .with_subscriber_flag(AccountFlags::FAMILY_SUBSCRIBER),
        SiteEntry::new(APPS_SITE_ID, "apps"),
        SiteEntry::new(EVERYTHING_SITE_ID, "everything")
            .with_tokens(Token::ARCADE_BANNED, Token::ARCADE_DEADBEAT),
        SiteEntry::new(BITEME_SITE_ID, "biteme")
            .with_tokens(Token::ARCADE_BANNED, Token::ARCADE_DEADBEAT),
        SiteEntry::new(DOWNTOWN_SITE_ID, "downtown")
            .with_tokens(Token::ARCADE_BANNED, Token::ARCADE_DEADBEAT),
        SiteEntry::new(FACEBOOK_SITE_ID, "facebook")
            .with_tokens(Token::ARCADE_BANNED, Token::ARCADE_DEADBEAT),
        SiteEntry::new(PARTNER_SITE_ID, "partner"),
        SiteEntry::new(ADVENTURE_SITE_ID, "adventure")
            .with_tokens(Token::ADVENTURE_BANNED, Token::ADVENTURE_DEADBEAT),
        SiteEntry::new(TRIVIA_SITE_ID, "trivia")
            .with_tokens(Token::TRIVIA_BANNED, Token::TRIVIA_DEADBEAT),
    ]
    .into_iter()
    .map(|entry| (entry.id, entry))
    .collect(),
});

/// Static mapping from site to its ban and deadbeat tokens
#[derive(Debug, Clone, Default)]
pub struct SiteTable {
    entries: HashMap<SiteId, SiteEntry>,
}

impl SiteTable {
    /// Build and validate a table
    pub fn new<I>(entries: I) -> Result<Self, SiteTableError>
    where
        I: IntoIterator<Item = SiteEntry>,
    {
        let mut map = HashMap::new();
        for entry in entries {
            let id = entry.id;
            if map.insert(id, entry).is_some() {
                return Err(SiteTableError::DuplicateSite(id));
            }
        }
        let table = Self { entries: map };
        table.validate()?;
        Ok(table)
    }

    /// The table compiled into the binary
    ///
    /// Call [`SiteTable::validate`] on it once at startup.
    pub fn builtin() -> &'static SiteTable {
        &BUILTIN_SITES
    }

    /// Check that ban and deadbeat tokens are real site markers and never
    /// cross over between the two roles
    pub fn validate(&self) -> Result<(), SiteTableError> {
        let mut ban_tokens = Vec::new();
        let mut deadbeat_tokens = Vec::new();

        for entry in self.entries.values() {
            for token in entry.ban_token.iter().chain(entry.deadbeat_token.iter()) {
                if token.is_capability() {
                    return Err(SiteTableError::CapabilityToken {
                        site: entry.id,
                        token: token.code(),
                    });
                }
            }
            if let (Some(ban), Some(deadbeat)) = (entry.ban_token, entry.deadbeat_token) {
                if ban == deadbeat {
                    return Err(SiteTableError::SameBanAndDeadbeat {
                        site: entry.id,
                        token: ban.code(),
                    });
                }
            }
            ban_tokens.extend(entry.ban_token);
            deadbeat_tokens.extend(entry.deadbeat_token);
        }

        if let Some(token) = ban_tokens.iter().find(|t| deadbeat_tokens.contains(t)) {
            return Err(SiteTableError::CrossedToken(token.code()));
        }
        Ok(())
    }

    pub fn get(&self, site: SiteId) -> Option<&SiteEntry> {
        self.entries.get(&site)
    }

    pub fn contains(&self, site: SiteId) -> bool {
        self.entries.contains_key(&site)
    }

    /// The "banned on this site" token, if the site supports banning
    pub fn ban_token(&self, site: SiteId) -> Option<Token> {
        self.get(site).and_then(|entry| entry.ban_token)
    }

    /// The "payment default on this site" token, if the site has one
    pub fn deadbeat_token(&self, site: SiteId) -> Option<Token> {
        self.get(site).and_then(|entry| entry.deadbeat_token)
    }

    pub fn subscriber_flag(&self, site: SiteId) -> Option<AccountFlags> {
        self.get(site).and_then(|entry| entry.subscriber_flag)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
