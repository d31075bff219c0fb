//! Core domain + application logic for the alert bot.
//!
//! This crate is framework-agnostic. Telegram, the alert API and the SQLite
//! store live behind ports (traits) implemented in adapter crates.

pub mod alerts;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod messaging;
pub mod monitor;
pub mod news;
pub mod subscriptions;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::{Error, Result};
