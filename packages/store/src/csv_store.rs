//! Directory of CSV tables backing a [`ResultStore`].
//!
//! Four files live under the store directory:
//!
//! - `located_addresses.csv` / `failed_addresses.csv`:
//!   `Address,Date,Longitude,Latitude`
//! - `located_coordinates.csv` / `failed_coordinates.csv`:
//!   `Longitude,Latitude,Date,State,County,Census Block,Census Tract`
//!
//! Dates are written as `YYYY-MM-DD` and absent fields as empty cells.
//! Missing files load as empty tables. A save first writes all four tables
//! to sibling `.tmp` files and only then renames them over the originals.
//! Each rename is atomic; the set of four is not, so a crash in the middle
//! of the rename step can leave some tables one save behind.

use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use usgeocoder_models::{
    Coordinate, Direction, GeocodeInput, GeocodeOutcome, Geographies, MatchPayload,
};

use crate::{Persistence, ResultStore, StoreError};

const FORWARD_HEADERS: [&str; 4] = ["Address", "Date", "Longitude", "Latitude"];
const REVERSE_HEADERS: [&str; 7] = [
    "Longitude",
    "Latitude",
    "Date",
    "State",
    "County",
    "Census Block",
    "Census Tract",
];

#[derive(Debug, Serialize, Deserialize)]
struct ForwardRow {
    #[serde(rename = "Address")]
    address: String,
    #[serde(rename = "Date")]
    date: NaiveDate,
    #[serde(rename = "Longitude")]
    longitude: Option<f64>,
    #[serde(rename = "Latitude")]
    latitude: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ReverseRow {
    #[serde(rename = "Longitude")]
    longitude: f64,
    #[serde(rename = "Latitude")]
    latitude: f64,
    #[serde(rename = "Date")]
    date: NaiveDate,
    #[serde(rename = "State")]
    state: Option<String>,
    #[serde(rename = "County")]
    county: Option<String>,
    #[serde(rename = "Census Block")]
    census_block: Option<String>,
    #[serde(rename = "Census Tract")]
    census_tract: Option<String>,
}

/// Which of the four tables a file holds.
#[derive(Debug, Clone, Copy)]
struct Table {
    direction: Direction,
    located: bool,
}

impl Table {
    const ALL: [Self; 4] = [
        Self {
            direction: Direction::Forward,
            located: true,
        },
        Self {
            direction: Direction::Forward,
            located: false,
        },
        Self {
            direction: Direction::Reverse,
            located: true,
        },
        Self {
            direction: Direction::Reverse,
            located: false,
        },
    ];

    const fn file_name(self) -> &'static str {
        match (self.direction, self.located) {
            (Direction::Forward, true) => "located_addresses.csv",
            (Direction::Forward, false) => "failed_addresses.csv",
            (Direction::Reverse, true) => "located_coordinates.csv",
            (Direction::Reverse, false) => "failed_coordinates.csv",
        }
    }
}

/// Persists a [`ResultStore`] as four CSV files in one directory.
#[derive(Debug, Clone)]
pub struct CsvPersistence {
    dir: PathBuf,
}

impl CsvPersistence {
    /// Creates a persistence layer rooted at `dir`. The directory is
    /// created on the first save.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, table: Table) -> PathBuf {
        self.dir.join(table.file_name())
    }

    fn read_table(&self, table: Table) -> Result<Vec<GeocodeOutcome>, StoreError> {
        let path = self.path(table);
        if !path.exists() {
            log::debug!("{} does not exist, starting empty", path.display());
            return Ok(Vec::new());
        }

        let display = path.display().to_string();
        let mut reader = csv::ReaderBuilder::new()
            .from_path(&path)
            .map_err(|e| StoreError::Csv {
                path: display.clone(),
                source: e,
            })?;

        let mut outcomes = Vec::new();
        match table.direction {
            Direction::Forward => {
                for (i, result) in reader.deserialize::<ForwardRow>().enumerate() {
                    let row = result.map_err(|e| StoreError::Csv {
                        path: display.clone(),
                        source: e,
                    })?;
                    outcomes.push(forward_outcome(row, table.located).map_err(|message| {
                        StoreError::Corrupt {
                            path: display.clone(),
                            row: i as u64 + 1,
                            message,
                        }
                    })?);
                }
            }
            Direction::Reverse => {
                for (i, result) in reader.deserialize::<ReverseRow>().enumerate() {
                    let row = result.map_err(|e| StoreError::Csv {
                        path: display.clone(),
                        source: e,
                    })?;
                    outcomes.push(reverse_outcome(row, table.located).map_err(|message| {
                        StoreError::Corrupt {
                            path: display.clone(),
                            row: i as u64 + 1,
                            message,
                        }
                    })?);
                }
            }
        }

        log::debug!("Loaded {} rows from {display}", outcomes.len());
        Ok(outcomes)
    }

    /// Writes `table` to its sibling `.csv.tmp` file and returns that path.
    fn stage_table<'a>(
        &self,
        table: Table,
        outcomes: impl Iterator<Item = &'a GeocodeOutcome>,
    ) -> Result<PathBuf, StoreError> {
        let path = self.path(table);
        let tmp = path.with_extension("csv.tmp");
        let display = tmp.display().to_string();
        let csv_err = |e| StoreError::Csv {
            path: display.clone(),
            source: e,
        };

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&tmp)
            .map_err(csv_err)?;

        match table.direction {
            Direction::Forward => {
                writer.write_record(FORWARD_HEADERS).map_err(csv_err)?;
                for outcome in outcomes {
                    writer.serialize(forward_row(outcome)).map_err(csv_err)?;
                }
            }
            Direction::Reverse => {
                writer.write_record(REVERSE_HEADERS).map_err(csv_err)?;
                for outcome in outcomes {
                    writer.serialize(reverse_row(outcome)).map_err(csv_err)?;
                }
            }
        }

        writer.flush().map_err(|e| StoreError::Io {
            path: display.clone(),
            source: e,
        })?;
        drop(writer);

        Ok(tmp)
    }
}

impl Persistence for CsvPersistence {
    fn load(&self) -> Result<ResultStore, StoreError> {
        let mut store = ResultStore::new();

        // Located tables first so a stray failed row for a located input is
        // dropped by the merge rules.
        for table in Table::ALL {
            let outcomes = self.read_table(table)?;
            let stats = store.merge(table.direction, outcomes)?;
            if stats.ignored > 0 {
                log::warn!(
                    "{}: ignored {} failed rows for inputs that are already located",
                    table.file_name(),
                    stats.ignored
                );
            }
        }

        log::info!(
            "Loaded store from {}: forward {} located / {} failed, reverse {} located / {} failed",
            self.dir.display(),
            store.located_count(Direction::Forward),
            store.failed_count(Direction::Forward),
            store.located_count(Direction::Reverse),
            store.failed_count(Direction::Reverse),
        );

        Ok(store)
    }

    fn save(&self, store: &ResultStore) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| StoreError::Io {
            path: self.dir.display().to_string(),
            source: e,
        })?;

        // Every table is staged before any is replaced, so a failed write
        // leaves the previous snapshot intact.
        let mut staged = Vec::with_capacity(Table::ALL.len());
        for table in Table::ALL {
            let result = if table.located {
                self.stage_table(table, store.located(table.direction))
            } else {
                self.stage_table(table, store.failed(table.direction))
            };
            match result {
                Ok(tmp) => staged.push((tmp, self.path(table))),
                Err(e) => {
                    for (tmp, _) in &staged {
                        let _ = std::fs::remove_file(tmp);
                    }
                    return Err(e);
                }
            }
        }

        for (tmp, path) in staged {
            std::fs::rename(&tmp, &path).map_err(|e| StoreError::Io {
                path: path.display().to_string(),
                source: e,
            })?;
        }

        log::debug!("Saved store to {}", self.dir.display());
        Ok(())
    }
}

fn forward_outcome(row: ForwardRow, located: bool) -> Result<GeocodeOutcome, String> {
    let input = GeocodeInput::Address(row.address);
    if !located {
        return Ok(GeocodeOutcome::Failed {
            input,
            date: row.date,
        });
    }

    let (Some(longitude), Some(latitude)) = (row.longitude, row.latitude) else {
        return Err("located address is missing coordinates".to_string());
    };

    Ok(GeocodeOutcome::Located {
        input,
        date: row.date,
        payload: MatchPayload::Location(Coordinate::new(longitude, latitude)),
    })
}

fn reverse_outcome(row: ReverseRow, located: bool) -> Result<GeocodeOutcome, String> {
    let coordinate = Coordinate::new(row.longitude, row.latitude);
    if !coordinate.is_finite() {
        return Err(format!("coordinate {coordinate} is not finite"));
    }

    let input = GeocodeInput::Coordinate(coordinate);
    if !located {
        return Ok(GeocodeOutcome::Failed {
            input,
            date: row.date,
        });
    }

    Ok(GeocodeOutcome::Located {
        input,
        date: row.date,
        payload: MatchPayload::Geographies(Geographies {
            state: row.state,
            county: row.county,
            census_block: row.census_block,
            census_tract: row.census_tract,
        }),
    })
}

fn forward_row(outcome: &GeocodeOutcome) -> ForwardRow {
    let address = match outcome.input() {
        GeocodeInput::Address(address) => address.clone(),
        GeocodeInput::Coordinate(coordinate) => coordinate.to_string(),
    };
    let location = outcome.location();
    ForwardRow {
        address,
        date: outcome.date(),
        longitude: location.map(|c| c.longitude),
        latitude: location.map(|c| c.latitude),
    }
}

fn reverse_row(outcome: &GeocodeOutcome) -> ReverseRow {
    let coordinate = match outcome.input() {
        GeocodeInput::Coordinate(coordinate) => *coordinate,
        GeocodeInput::Address(_) => Coordinate::new(f64::NAN, f64::NAN),
    };
    let geographies = outcome.geographies().cloned().unwrap_or_default();
    ReverseRow {
        longitude: coordinate.longitude,
        latitude: coordinate.latitude,
        date: outcome.date(),
        state: geographies.state,
        county: geographies.county,
        census_block: geographies.census_block,
        census_tract: geographies.census_tract,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("usgeocoder_store_test_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    #[test]
    fn missing_directory_loads_empty() {
        let dir = scratch("missing");
        let store = CsvPersistence::new(&dir).load().unwrap();
        assert_eq!(store, ResultStore::new());
    }

    #[test]
    fn saves_and_reloads_all_tables() {
        let dir = scratch("round_trip");
        let persistence = CsvPersistence::new(&dir);

        let mut store = ResultStore::new();
        store
            .merge(
                Direction::Forward,
                [
                    GeocodeOutcome::Located {
                        input: GeocodeInput::Address("156 Front St, Exeter, NH 03833".to_string()),
                        date: day(),
                        payload: MatchPayload::Location(Coordinate::new(
                            -70.947_218_453_287_6,
                            42.981_029_380_462_5,
                        )),
                    },
                    GeocodeOutcome::Failed {
                        input: GeocodeInput::Address("nowhere".to_string()),
                        date: day(),
                    },
                ],
            )
            .unwrap();
        store
            .merge(
                Direction::Reverse,
                [
                    GeocodeOutcome::Located {
                        input: GeocodeInput::Coordinate(Coordinate::new(-70.95, 42.98)),
                        date: day(),
                        payload: MatchPayload::Geographies(Geographies {
                            state: Some("New Hampshire".to_string()),
                            county: Some("Rockingham".to_string()),
                            census_block: Some("1013".to_string()),
                            census_tract: None,
                        }),
                    },
                    GeocodeOutcome::Failed {
                        input: GeocodeInput::Coordinate(Coordinate::new(0.0, 0.0)),
                        date: day(),
                    },
                ],
            )
            .unwrap();

        persistence.save(&store).unwrap();
        let reloaded = persistence.load().unwrap();
        assert_eq!(reloaded, store);

        let header = std::fs::read_to_string(dir.join("failed_coordinates.csv")).unwrap();
        assert!(header.starts_with(
            "Longitude,Latitude,Date,State,County,Census Block,Census Tract\n"
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn empty_store_writes_headers() {
        let dir = scratch("headers");
        CsvPersistence::new(&dir).save(&ResultStore::new()).unwrap();

        let contents = std::fs::read_to_string(dir.join("located_addresses.csv")).unwrap();
        assert_eq!(contents, "Address,Date,Longitude,Latitude\n");
        assert!(!dir.join("located_addresses.csv.tmp").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn failed_save_keeps_previous_snapshot() {
        let dir = scratch("partial_save");
        let persistence = CsvPersistence::new(&dir);
        persistence.save(&ResultStore::new()).unwrap();

        // The last table cannot be staged, so nothing may be replaced.
        std::fs::create_dir_all(dir.join("failed_coordinates.csv.tmp")).unwrap();

        let mut store = ResultStore::new();
        store
            .merge(
                Direction::Forward,
                [GeocodeOutcome::Failed {
                    input: GeocodeInput::Address("nowhere".to_string()),
                    date: day(),
                }],
            )
            .unwrap();
        assert!(persistence.save(&store).is_err());

        let failed = std::fs::read_to_string(dir.join("failed_addresses.csv")).unwrap();
        assert_eq!(failed, "Address,Date,Longitude,Latitude\n");
        assert!(!dir.join("failed_addresses.csv.tmp").exists());
        assert_eq!(persistence.load().unwrap(), ResultStore::new());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn located_row_without_coordinates_is_corrupt() {
        let dir = scratch("corrupt");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("located_addresses.csv"),
            "Address,Date,Longitude,Latitude\nsomewhere,2024-05-01,,\n",
        )
        .unwrap();

        let err = CsvPersistence::new(&dir).load().unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { row: 1, .. }));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn unparsable_date_is_a_csv_error() {
        let dir = scratch("bad_date");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("failed_addresses.csv"),
            "Address,Date,Longitude,Latitude\nsomewhere,yesterday,,\n",
        )
        .unwrap();

        let err = CsvPersistence::new(&dir).load().unwrap_err();
        assert!(matches!(err, StoreError::Csv { .. }));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn stray_failed_row_for_located_input_is_dropped() {
        let dir = scratch("stray");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("located_addresses.csv"),
            "Address,Date,Longitude,Latitude\na,2024-05-01,-70.95,42.98\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("failed_addresses.csv"),
            "Address,Date,Longitude,Latitude\na,2024-04-01,,\n",
        )
        .unwrap();

        let store = CsvPersistence::new(&dir).load().unwrap();
        assert_eq!(store.located_count(Direction::Forward), 1);
        assert_eq!(store.failed_count(Direction::Forward), 0);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
