#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared types for the batch geocoder.
//!
//! This crate contains only data types, configuration structs, and simple
//! conversions. It has no heavyweight dependencies (no HTTP, no I/O).
//!
//! The central types are [`GeocodeInput`] (what we ask the geocoding
//! service about) and [`GeocodeOutcome`] (what we learned). Inputs have
//! structural equality and a total order so they can be used as set and
//! map keys for deduplication.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Which way a batch is geocoded.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    /// Address text to coordinates.
    Forward,
    /// Coordinates to administrative geographies.
    Reverse,
}

/// A longitude/latitude pair (WGS84).
///
/// Equality, ordering, and hashing are defined on the bit patterns of the
/// two values after folding `-0.0` into `0.0`, so coordinates behave as
/// ordinary set keys.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Coordinate {
    /// Longitude (x).
    pub longitude: f64,
    /// Latitude (y).
    pub latitude: f64,
}

impl Coordinate {
    /// Creates a coordinate from a longitude and a latitude.
    #[must_use]
    pub const fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }

    /// Whether both components are finite numbers.
    #[must_use]
    pub const fn is_finite(&self) -> bool {
        self.longitude.is_finite() && self.latitude.is_finite()
    }

    fn key(&self) -> (f64, f64) {
        (fold_zero(self.longitude), fold_zero(self.latitude))
    }
}

fn fold_zero(value: f64) -> f64 {
    if value == 0.0 { 0.0 } else { value }
}

impl PartialEq for Coordinate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Coordinate {}

impl PartialOrd for Coordinate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Coordinate {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a_lng, a_lat) = self.key();
        let (b_lng, b_lat) = other.key();
        a_lng.total_cmp(&b_lng).then_with(|| a_lat.total_cmp(&b_lat))
    }
}

impl Hash for Coordinate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let (lng, lat) = self.key();
        lng.to_bits().hash(state);
        lat.to_bits().hash(state);
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.longitude, self.latitude)
    }
}

/// A single unit of geocoding work.
///
/// The variant determines the [`Direction`] the input belongs to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GeocodeInput {
    /// One-line address text for forward geocoding.
    Address(String),
    /// A point for reverse geocoding.
    Coordinate(Coordinate),
}

impl GeocodeInput {
    /// The direction this input is geocoded in.
    #[must_use]
    pub const fn direction(&self) -> Direction {
        match self {
            Self::Address(_) => Direction::Forward,
            Self::Coordinate(_) => Direction::Reverse,
        }
    }
}

impl fmt::Display for GeocodeInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address(address) => f.write_str(address),
            Self::Coordinate(coordinate) => fmt::Display::fmt(coordinate, f),
        }
    }
}

impl From<Coordinate> for GeocodeInput {
    fn from(value: Coordinate) -> Self {
        Self::Coordinate(value)
    }
}

/// Administrative geographies containing a point.
///
/// Each field holds the display name of the first entry of the matching
/// category in the service response, or `None` when the category was not
/// returned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geographies {
    /// State name (e.g., `"New Hampshire"`).
    pub state: Option<String>,
    /// County name (e.g., `"Rockingham"`).
    pub county: Option<String>,
    /// Census block name (e.g., `"1013"`).
    pub census_block: Option<String>,
    /// Census tract name (e.g., `"665.02"`).
    pub census_tract: Option<String>,
}

/// The direction-specific data of a successful lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchPayload {
    /// Forward: the first address match's coordinates.
    Location(Coordinate),
    /// Reverse: the geographies containing the point.
    Geographies(Geographies),
}

/// The authoritative result for one input.
///
/// Always carries the originating input so that stores can key on it.
#[derive(Debug, Clone, PartialEq)]
pub enum GeocodeOutcome {
    /// The service resolved the input.
    Located {
        /// The input that was resolved.
        input: GeocodeInput,
        /// Date of the attempt.
        date: NaiveDate,
        /// What the service returned.
        payload: MatchPayload,
    },
    /// The input could not be resolved. All derived fields are absent.
    Failed {
        /// The input that failed.
        input: GeocodeInput,
        /// Date of the attempt.
        date: NaiveDate,
    },
}

impl GeocodeOutcome {
    /// The input this outcome belongs to.
    #[must_use]
    pub const fn input(&self) -> &GeocodeInput {
        match self {
            Self::Located { input, .. } | Self::Failed { input, .. } => input,
        }
    }

    /// The date the outcome was produced.
    #[must_use]
    pub const fn date(&self) -> NaiveDate {
        match self {
            Self::Located { date, .. } | Self::Failed { date, .. } => *date,
        }
    }

    /// Whether this is a [`GeocodeOutcome::Located`] outcome.
    #[must_use]
    pub const fn is_located(&self) -> bool {
        matches!(self, Self::Located { .. })
    }

    /// The located coordinates of a forward match.
    #[must_use]
    pub const fn location(&self) -> Option<Coordinate> {
        match self {
            Self::Located {
                payload: MatchPayload::Location(coordinate),
                ..
            } => Some(*coordinate),
            _ => None,
        }
    }

    /// The geographies of a reverse match.
    #[must_use]
    pub const fn geographies(&self) -> Option<&Geographies> {
        match self {
            Self::Located {
                payload: MatchPayload::Geographies(geographies),
                ..
            } => Some(geographies),
            _ => None,
        }
    }
}

/// Why an input ended up failed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    /// The service answered with no match.
    NoMatch,
    /// The response body was not the expected JSON.
    Decode,
    /// Every rung of the timeout ladder timed out.
    Timeout,
    /// Connection or protocol failure.
    Transport,
}

/// Which collection a purge applies to.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PurgeScope {
    /// Only located entries.
    Located,
    /// Only failed entries.
    Failed,
    /// Both collections.
    All,
}

impl PurgeScope {
    /// Whether the scope covers the located collection.
    #[must_use]
    pub const fn includes_located(self) -> bool {
        matches!(self, Self::Located | Self::All)
    }

    /// Whether the scope covers the failed collection.
    #[must_use]
    pub const fn includes_failed(self) -> bool {
        matches!(self, Self::Failed | Self::All)
    }
}

/// Configuration for the geocoding engine.
///
/// Every field has a default, so a TOML file only needs to list the
/// values it overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocoderConfig {
    /// Service root (e.g., `"https://geocoding.geo.census.gov/geocoder"`).
    pub base_url: String,
    /// Benchmark identifier sent with every request.
    pub benchmark: String,
    /// Vintage identifier sent with reverse requests.
    pub vintage: String,
    /// Per-attempt timeouts in milliseconds, consumed in order.
    pub timeouts_ms: Vec<u64>,
    /// Pause after every attempt, in milliseconds.
    pub inter_attempt_delay_ms: u64,
    /// Requested number of concurrent workers.
    pub concurrency: usize,
    /// Ceiling on concurrent workers. Requests above it are capped.
    pub concurrency_limit: usize,
    /// Directory holding the persisted located/failed tables.
    pub store_dir: PathBuf,
}

/// Default service root.
pub const DEFAULT_BASE_URL: &str = "https://geocoding.geo.census.gov/geocoder";
/// Default benchmark identifier.
pub const DEFAULT_BENCHMARK: &str = "Public_AR_Current";
/// Default vintage identifier.
pub const DEFAULT_VINTAGE: &str = "Current_Current";
/// Default timeout ladder in milliseconds.
pub const DEFAULT_TIMEOUTS_MS: [u64; 4] = [500, 1_000, 2_000, 5_000];
/// Default delay after every attempt in milliseconds.
pub const DEFAULT_INTER_ATTEMPT_DELAY_MS: u64 = 100;
/// Default concurrency ceiling.
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 100;

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            benchmark: DEFAULT_BENCHMARK.to_string(),
            vintage: DEFAULT_VINTAGE.to_string(),
            timeouts_ms: DEFAULT_TIMEOUTS_MS.to_vec(),
            inter_attempt_delay_ms: DEFAULT_INTER_ATTEMPT_DELAY_MS,
            concurrency: DEFAULT_CONCURRENCY_LIMIT,
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            store_dir: PathBuf::from("geocoder"),
        }
    }
}

impl GeocoderConfig {
    /// The timeout ladder as durations.
    #[must_use]
    pub fn timeout_ladder(&self) -> Vec<Duration> {
        self.timeouts_ms
            .iter()
            .copied()
            .map(Duration::from_millis)
            .collect()
    }

    /// The pause observed after every attempt.
    #[must_use]
    pub const fn inter_attempt_delay(&self) -> Duration {
        Duration::from_millis(self.inter_attempt_delay_ms)
    }
}
