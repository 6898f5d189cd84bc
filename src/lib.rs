//!
//! src/lib.rs
//!
//! Catalog aggregation over the Spotify Web API and a single-slot
//! preview playback session with durable play history
//!

pub mod config;
pub mod errors;
pub mod logging;

pub mod types;
pub mod fetch;
pub mod catalog;

pub mod storage;
pub mod history;
pub mod audio;
pub mod session;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use crate::errors::DeckError;
