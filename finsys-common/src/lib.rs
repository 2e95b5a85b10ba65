//! # finsys Common Library
//!
//! Shared code for the finsys fraud pipeline crates:
//! - Error type shared by every crate
//! - Bootstrap TOML configuration
//! - Relational store initialization and schema migrations
//! - Transaction record models

pub mod config;
pub mod db;
pub mod error;
pub mod time;

pub use error::{Error, Result};
