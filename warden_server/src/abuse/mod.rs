//! Abuse prevention module
//!
//! Provides protection against:
//! - Account farming (machine ident taint, free account quota)
//! - Banned and deadbeat accounts (per-site tokens)
//! - Password guessing (login throttle)

pub mod access;
pub mod ledger;
pub mod quota;
pub mod throttle;

pub use access::AccessEngine;
pub use ledger::IdentLedger;
pub use quota::FreeAccountQuota;
pub use throttle::{spawn_reset_task, LoginThrottle, ThrottleConfig};
