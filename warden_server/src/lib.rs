//! Warden - access control and anti-abuse decisions for multi-site accounts
//!
//! The [`abuse::AccessEngine`] decides whether an account may log in or a
//! machine may register, backed by a [`store::Store`]. The HTTP surface in
//! [`routes`] is a thin wrapper for login and game servers.

pub mod abuse;
pub mod account;
pub mod config;
pub mod db;
pub mod routes;
pub mod store;
