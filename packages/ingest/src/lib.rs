#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Turns tabular input into the flat lists the geocoder consumes.
//!
//! - [`address`] reads address strings from a CSV that has either an
//!   `Address` column or `Street Address`, `City`, `State`, `ZIP` columns.
//! - [`coordinates`] reads longitude/latitude pairs from a CSV that has
//!   either `Longitude` and `Latitude` columns or a single `Coordinates`
//!   column.
//!
//! Both return unique values in first-seen order and fail with
//! [`IngestError::Empty`] when nothing usable is found.

pub mod address;
pub mod coordinates;

/// Errors from reading input tables.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// I/O error opening the input.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path that caused the error.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// CSV parsing error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The table lacks the columns needed to build inputs.
    #[error("The table must have the following columns: {expected}")]
    MissingColumns {
        /// Human-readable description of the accepted column sets.
        expected: &'static str,
    },

    /// No usable values were found.
    #[error("No {what} were found in the table. Check the column names and try again.")]
    Empty {
        /// What was being read (e.g., `"addresses"`).
        what: &'static str,
    },
}

/// Finds the index of a header by exact name.
fn column(headers: &csv::StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h.trim() == name)
}

fn open(path: &std::path::Path) -> Result<std::fs::File, IngestError> {
    std::fs::File::open(path).map_err(|e| IngestError::Io {
        path: path.display().to_string(),
        source: e,
    })
}
