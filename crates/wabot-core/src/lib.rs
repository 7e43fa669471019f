//! Core of the WhatsApp archive bot: configuration, logging and the two-tier
//! message archive (memory cache in front of a disk store).
//!
//! The chat transport lives elsewhere; this crate only keeps copies of deleted
//! messages and reports on them.

pub mod archive;
pub mod config;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod report;

pub use errors::{Error, Result};
