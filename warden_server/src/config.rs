//! Server configuration loaded from environment variables

use crate::abuse::{FreeAccountQuota, ThrottleConfig};
use std::env;
use std::str::FromStr;
use warden_common::{constants, SiteId};

/// Oldest free account window accepted, about a century back
const MIN_FREE_ACCOUNT_CUTOFF_DAYS: i64 = -36_500;

#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind to
    pub host: String,

    /// Port for the internal HTTP API
    pub port: u16,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Pool size for the database
    pub database_max_connections: u32,

    /// Bearer token for the moderation routes. Admin routes refuse every
    /// request when unset.
    pub admin_token: Option<String>,

    /// The paid site whose quota count only includes trial accounts
    pub primary_site_id: SiteId,

    /// Negative day offset marking the start of the free account window
    pub free_account_cutoff_days: i64,

    /// Free accounts a machine may hold before new ones are refused
    pub max_free_accounts_per_machine: u32,

    /// Login attempts allowed per throttle period
    pub login_max_attempts: u32,

    /// Seconds between global throttle resets
    pub login_throttle_period_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self {
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&lookup, "PORT", 8080)?,
            database_url: lookup("DATABASE_URL")
                .filter(|url| !url.trim().is_empty())
                .ok_or(ConfigError::MissingEnv("DATABASE_URL"))?,
            database_max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
            admin_token: lookup("ADMIN_TOKEN").filter(|token| !token.trim().is_empty()),
            primary_site_id: parse_or(
                &lookup,
                "PRIMARY_SITE_ID",
                constants::DEFAULT_PRIMARY_SITE_ID,
            )?,
            free_account_cutoff_days: parse_or(
                &lookup,
                "FREE_ACCOUNT_CUTOFF_DAYS",
                constants::RECENT_ACCOUNT_CUTOFF_DAYS,
            )?,
            max_free_accounts_per_machine: parse_or(
                &lookup,
                "MAX_FREE_ACCOUNTS_PER_MACHINE",
                constants::MAX_FREE_ACCOUNTS_PER_MACHINE,
            )?,
            login_max_attempts: parse_or(
                &lookup,
                "LOGIN_MAX_ATTEMPTS",
                constants::DEFAULT_LOGIN_MAX_ATTEMPTS,
            )?,
            login_throttle_period_secs: parse_or(
                &lookup,
                "LOGIN_THROTTLE_PERIOD_SECS",
                constants::DEFAULT_LOGIN_THROTTLE_PERIOD_SECONDS,
            )?,
        };

        if !(MIN_FREE_ACCOUNT_CUTOFF_DAYS..=-1).contains(&config.free_account_cutoff_days) {
            return Err(ConfigError::Invalid {
                name: "FREE_ACCOUNT_CUTOFF_DAYS",
                reason: "must be between -36500 and -1",
            });
        }
        if config.login_throttle_period_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "LOGIN_THROTTLE_PERIOD_SECS",
                reason: "must be greater than zero",
            });
        }

        if config.admin_token.is_none() {
            tracing::warn!("ADMIN_TOKEN is not set, admin routes are disabled");
        }

        Ok(config)
    }

    pub fn quota(&self) -> FreeAccountQuota {
        FreeAccountQuota::new(
            self.free_account_cutoff_days,
            self.max_free_accounts_per_machine,
            self.primary_site_id,
        )
    }

    pub fn throttle(&self) -> ThrottleConfig {
        ThrottleConfig::new(self.login_max_attempts, self.login_throttle_period_secs)
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Unparsable(name)),
        None => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Could not parse environment variable: {0}")]
    Unparsable(&'static str),

    #[error("Invalid {name}: {reason}")]
    Invalid {
        name: &'static str,
        reason: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/warden")]).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.database_max_connections, 10);
        assert_eq!(config.admin_token, None);
        assert_eq!(config.quota(), FreeAccountQuota::default());
        assert_eq!(config.throttle(), ThrottleConfig::default());
    }

    #[test]
    fn test_database_url_required() {
        assert!(matches!(load(&[]), Err(ConfigError::MissingEnv("DATABASE_URL"))));
        assert!(matches!(
            load(&[("DATABASE_URL", "  ")]),
            Err(ConfigError::MissingEnv("DATABASE_URL"))
        ));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("DATABASE_URL", "postgres://db/warden"),
            ("PORT", "9000"),
            ("ADMIN_TOKEN", "s3cret"),
            ("PRIMARY_SITE_ID", "8"),
            ("FREE_ACCOUNT_CUTOFF_DAYS", "-30"),
            ("MAX_FREE_ACCOUNTS_PER_MACHINE", "4"),
            ("LOGIN_MAX_ATTEMPTS", "3"),
            ("LOGIN_THROTTLE_PERIOD_SECS", "60"),
        ])
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.admin_token.as_deref(), Some("s3cret"));
        assert_eq!(config.quota(), FreeAccountQuota::new(-30, 4, 8));
        assert_eq!(config.throttle(), ThrottleConfig::new(3, 60));
    }

    #[test]
    fn test_rejects_bad_values() {
        let url = ("DATABASE_URL", "postgres://db/warden");
        assert!(matches!(
            load(&[url, ("PORT", "http")]),
            Err(ConfigError::Unparsable("PORT"))
        ));
        assert!(matches!(
            load(&[url, ("FREE_ACCOUNT_CUTOFF_DAYS", "90")]),
            Err(ConfigError::Invalid { name: "FREE_ACCOUNT_CUTOFF_DAYS", .. })
        ));
        assert!(matches!(
            load(&[url, ("FREE_ACCOUNT_CUTOFF_DAYS", "-100000000")]),
            Err(ConfigError::Invalid { name: "FREE_ACCOUNT_CUTOFF_DAYS", .. })
        ));
        assert!(matches!(
            load(&[url, ("FREE_ACCOUNT_CUTOFF_DAYS", "0")]),
            Err(ConfigError::Invalid { name: "FREE_ACCOUNT_CUTOFF_DAYS", .. })
        ));
        let oldest = load(&[url, ("FREE_ACCOUNT_CUTOFF_DAYS", "-36500")]).unwrap();
        assert_eq!(oldest.free_account_cutoff_days, -36_500);
        assert!(matches!(
            load(&[url, ("LOGIN_THROTTLE_PERIOD_SECS", "0")]),
            Err(ConfigError::Invalid { name: "LOGIN_THROTTLE_PERIOD_SECS", .. })
        ));
    }
}
