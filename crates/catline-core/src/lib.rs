//! Core of the catline relay: a line-oriented TCP listener that lets external
//! processes inject text into chat channels, authenticated per "section".
//!
//! This crate is intentionally framework-agnostic. The chat platform lives
//! behind the `RelaySink` port implemented in adapter crates.

pub mod admin;
pub mod blacklist;
pub mod config;
pub mod domain;
pub mod errors;
pub mod handler;
pub mod listener;
pub mod logging;
pub mod protocol;
pub mod sections;
pub mod sink;

pub use errors::{Error, Result};
