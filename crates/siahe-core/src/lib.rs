//! Core session lifecycle for the siahe bot.
//!
//! This crate is intentionally framework-agnostic. The Telegram connection lives
//! behind the `Transport`/`Connector` ports implemented in the adapter crate.

pub mod backup;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod middleware;
pub mod session;
pub mod transport;
pub mod update;

#[cfg(test)]
mod testkit;

pub use errors::{Error, Result};
