#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Batch geocoding engine for the US Census Bureau Geocoder.
//!
//! Resolves large batches of addresses to coordinates (forward) and
//! coordinates to state/county/tract/block (reverse):
//!
//! 1. **Request adapter** ([`census`]): one HTTP call, one
//!    [`AttemptResult`]. No retries, no sleeping, no logging.
//! 2. **Retry policy** ([`retry`]): walks the timeout ladder. Only
//!    timeouts are retried; no-match, decode, and transport failures are
//!    terminal.
//! 3. **Dispatcher** ([`dispatcher`]): runs adapter + policy for every
//!    input with bounded concurrency and collects exactly one outcome per
//!    input.
//! 4. **Facade** ([`facade`]): loads the result store, skips inputs that
//!    were already processed, dispatches the rest, merges, and persists.
//!
//! Individual inputs never fail a run. They end up as
//! [`GeocodeOutcome::Failed`](usgeocoder_models::GeocodeOutcome::Failed)
//! records instead.

pub mod census;
pub mod config;
pub mod dispatcher;
pub mod facade;
pub mod progress;
pub mod retry;

#[cfg(test)]
mod testing;

use std::time::Duration;

use thiserror::Error;
use usgeocoder_models::{Direction, GeocodeInput, MatchPayload};
use usgeocoder_store::StoreError;

pub use facade::{Geocoder, RunSummary};

/// What a single HTTP attempt produced.
///
/// Transient: lives only within one input's retry sequence and is never
/// persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptResult {
    /// The service matched the input.
    Success(MatchPayload),
    /// A well-formed response with no match.
    NoMatch,
    /// The response body was not the expected JSON.
    DecodeError(String),
    /// The request exceeded its timeout.
    Timeout,
    /// Any other connection or protocol failure.
    TransportError(String),
}

/// Resolves one input with one request.
///
/// [`census::CensusClient`] is the production implementation; anything
/// else (a local index, a scripted fake) can be dispatched the same way.
#[async_trait::async_trait]
pub trait Resolver: Send + Sync {
    /// Issues a single attempt for `input`, giving up after `timeout`.
    async fn resolve(&self, input: &GeocodeInput, timeout: Duration) -> AttemptResult;
}

/// Errors that abort a geocoding run.
#[derive(Debug, Error)]
pub enum GeocodeError {
    /// The HTTP client could not be constructed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The configuration is unusable.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },

    /// A configuration file could not be read.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path that caused the error.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration file is not valid TOML for [`GeocoderConfig`](usgeocoder_models::GeocoderConfig).
    #[error("Invalid configuration in {path}: {source}")]
    ConfigParse {
        /// Path to the configuration file.
        path: String,
        /// Underlying TOML error.
        source: toml::de::Error,
    },

    /// An input does not belong to the requested direction.
    #[error("Cannot {direction} geocode {input}")]
    DirectionMismatch {
        /// The requested direction.
        direction: Direction,
        /// The offending input.
        input: GeocodeInput,
    },

    /// The result store could not be loaded, merged, or saved.
    #[error(transparent)]
    Store(#[from] StoreError),
}
