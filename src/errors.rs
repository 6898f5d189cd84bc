//!
//! src/errors.rs
//!
//! Defines enums and methods of error conversion
//! for every failure the aggregator and playback session surface
//!
//!

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeckError {
    #[error("config error: {0}")]
    Config(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("partial fetch for {artist}: {stage}")]
    PartialFetch { artist: String, stage: String },
    #[error("no preview available: {0}")]
    NoPreview(String),
    #[error("upstream auth failed: {0}")]
    UpstreamAuth(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error)
}

impl From<reqwest::Error> for DeckError {
    fn from(e: reqwest::Error) -> Self { DeckError::Http(e.to_string()) }
}

impl From<serde_json::Error> for DeckError {
    fn from(e: serde_json::Error) -> Self { DeckError::Parse(e.to_string()) }
}

impl From<sqlx::Error> for DeckError {
    fn from(e: sqlx::Error) -> Self { DeckError::Storage(e.to_string()) }
}
