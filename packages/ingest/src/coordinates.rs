//! Coordinate extraction from CSV tables and command-line values.

use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

use usgeocoder_models::Coordinate;

use crate::{IngestError, column, open};

const EXPECTED: &str = "['Longitude', 'Latitude'] or 'Coordinates'";

/// Parses a `"lon,lat"` or `"(lon, lat)"` pair.
///
/// Returns `None` unless both halves are finite numbers.
#[must_use]
pub fn parse_coordinate(s: &str) -> Option<Coordinate> {
    let s = s.trim();
    let s = s
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
        .unwrap_or(s);

    let (lng, lat) = s.split_once(',')?;
    let coordinate = Coordinate::new(lng.trim().parse().ok()?, lat.trim().parse().ok()?);
    coordinate.is_finite().then_some(coordinate)
}

enum Layout {
    Pair { longitude: usize, latitude: usize },
    Combined(usize),
}

/// Reads unique coordinates from a CSV file.
///
/// # Errors
///
/// Returns [`IngestError`] if the file cannot be read, lacks the required
/// columns, or yields no coordinates.
pub fn coordinates_from_path(path: &Path) -> Result<Vec<Coordinate>, IngestError> {
    coordinates_from_reader(open(path)?)
}

/// Reads unique coordinates from CSV data.
///
/// Rows with blank or unparsable values are skipped.
///
/// # Errors
///
/// Returns [`IngestError`] if the data cannot be parsed, lacks the
/// required columns, or yields no coordinates.
pub fn coordinates_from_reader(reader: impl Read) -> Result<Vec<Coordinate>, IngestError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers = reader.headers()?.clone();

    let layout = if let (Some(longitude), Some(latitude)) = (
        column(&headers, "Longitude"),
        column(&headers, "Latitude"),
    ) {
        Layout::Pair {
            longitude,
            latitude,
        }
    } else if let Some(idx) = column(&headers, "Coordinates") {
        Layout::Combined(idx)
    } else {
        return Err(IngestError::MissingColumns { expected: EXPECTED });
    };

    let mut seen = BTreeSet::new();
    let mut coordinates = Vec::new();
    let mut skipped = 0u64;

    for result in reader.records() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                log::trace!("skipping malformed row: {e}");
                skipped += 1;
                continue;
            }
        };
        let field = |idx: usize| record.get(idx).unwrap_or("");

        let parsed = match layout {
            Layout::Pair {
                longitude,
                latitude,
            } => parse_coordinate(&format!("{},{}", field(longitude), field(latitude))),
            Layout::Combined(idx) => parse_coordinate(field(idx)),
        };

        let Some(coordinate) = parsed else {
            skipped += 1;
            continue;
        };
        if seen.insert(coordinate) {
            coordinates.push(coordinate);
        }
    }

    if skipped > 0 {
        log::debug!("Skipped {skipped} rows without usable coordinates");
    }

    if coordinates.is_empty() {
        return Err(IngestError::Empty {
            what: "coordinates",
        });
    }

    Ok(coordinates)
}
