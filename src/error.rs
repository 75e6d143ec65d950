//! Error types shared across pipeline stages

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures surfaced by a channel platform client.
///
/// The scraper decides what to do from the variant alone: `Inaccessible`
/// ends the scrape for one channel, the other two are retried.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Channel is private, unknown or otherwise cannot be opened.
    #[error("channel '{channel}' is inaccessible: {reason}")]
    Inaccessible { channel: String, reason: String },

    /// Flood control with a mandated wait before the next request.
    #[error("flood wait of {}s requested", .0.as_secs())]
    FloodWait(Duration),

    /// Network or protocol hiccup worth retrying.
    #[error("transient channel error: {0}")]
    Transient(String),
}

impl From<reqwest::Error> for ChannelError {
    fn from(err: reqwest::Error) -> Self {
        ChannelError::Transient(err.to_string())
    }
}

/// Failures reading or writing intermediate record files.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File was readable but its content does not match the record shape.
    #[error("failed to parse '{path}': {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("csv error in '{path}': {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}
