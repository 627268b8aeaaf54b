//! Address extraction from CSV tables.
//!
//! A table either carries ready-made one-line addresses in an `Address`
//! column, or the parts in `Street Address`, `City`, `State`, and `ZIP`
//! columns, which are joined with [`build_one_line_address`].

use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

use crate::{IngestError, column, open};

const EXPECTED: &str = "['Street Address', 'City', 'State', 'ZIP'] or 'Address'";

/// Builds a one-line address string from components for the Census
/// geocoder.
///
/// Missing parts become empty strings, only the first five characters of
/// the ZIP are kept, and the result is trimmed.
#[must_use]
pub fn build_one_line_address(street: &str, city: &str, state: &str, zip: &str) -> String {
    let zip5: String = zip.trim().chars().take(5).collect();
    format!(
        "{}, {}, {} {zip5}",
        street.trim(),
        city.trim(),
        state.trim()
    )
    .trim()
    .to_string()
}

enum Layout {
    Single(usize),
    Parts {
        street: usize,
        city: usize,
        state: usize,
        zip: usize,
    },
}

/// Reads unique, non-empty addresses from a CSV file.
///
/// # Errors
///
/// Returns [`IngestError`] if the file cannot be read, lacks the required
/// columns, or yields no addresses.
pub fn addresses_from_path(path: &Path) -> Result<Vec<String>, IngestError> {
    addresses_from_reader(open(path)?)
}

/// Reads unique, non-empty addresses from CSV data.
///
/// The `Address` column wins when both layouts are present.
///
/// # Errors
///
/// Returns [`IngestError`] if the data cannot be parsed, lacks the
/// required columns, or yields no addresses.
pub fn addresses_from_reader(reader: impl Read) -> Result<Vec<String>, IngestError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers = reader.headers()?.clone();

    let layout = if let Some(idx) = column(&headers, "Address") {
        Layout::Single(idx)
    } else if let (Some(street), Some(city), Some(state), Some(zip)) = (
        column(&headers, "Street Address"),
        column(&headers, "City"),
        column(&headers, "State"),
        column(&headers, "ZIP"),
    ) {
        Layout::Parts {
            street,
            city,
            state,
            zip,
        }
    } else {
        return Err(IngestError::MissingColumns { expected: EXPECTED });
    };

    let mut seen = BTreeSet::new();
    let mut addresses = Vec::new();

    for result in reader.records() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                log::trace!("skipping malformed row: {e}");
                continue;
            }
        };
        let field = |idx: usize| record.get(idx).unwrap_or("");

        let address = match layout {
            Layout::Single(idx) => field(idx).trim().to_string(),
            Layout::Parts {
                street,
                city,
                state,
                zip,
            } => {
                let parts = [field(street), field(city), field(state), field(zip)];
                if parts.iter().all(|p| p.trim().is_empty()) {
                    continue;
                }
                build_one_line_address(parts[0], parts[1], parts[2], parts[3])
            }
        };

        if address.is_empty() {
            continue;
        }
        if seen.insert(address.clone()) {
            addresses.push(address);
        }
    }

    if addresses.is_empty() {
        return Err(IngestError::Empty { what: "addresses" });
    }

    log::debug!("Read {} unique addresses", addresses.len());
    Ok(addresses)
}
