//! # FitDesk Common Library
//!
//! Shared code for FitDesk admin tooling:
//! - Database initialization and row models for accounts and the username index
//! - Configuration loading (root folder resolution, TOML bootstrap)
//! - Common error type
//! - Time and id helpers (run ids, account ids)

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod time;
pub mod ids;

pub use error::{Error, Result};
