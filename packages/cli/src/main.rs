#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! `usgeocoder`: batch forward and reverse geocoding against the US Census
//! Bureau Geocoder.
//!
//! Results accumulate in CSV tables under the store directory, so re-running
//! a command only sends inputs that have never been seen before.

mod commands;

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use usgeocoder_models::{Direction, PurgeScope};

#[derive(Parser)]
#[command(
    name = "usgeocoder",
    about = "Batch geocoding with the US Census Bureau Geocoder",
    version
)]
struct Cli {
    /// TOML configuration file (defaults to `$USGEOCODER_CONFIG`, then
    /// built-in defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory holding the located/failed tables
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,
    /// Number of concurrent requests (capped at the configured limit)
    #[arg(long, global = true)]
    concurrency: Option<usize>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Geocode addresses to coordinates
    Forward {
        /// CSV with an `Address` column or `Street Address, City, State, ZIP`
        #[arg(long, required_unless_present = "address", conflicts_with = "address")]
        input: Option<PathBuf>,
        /// One-line address (repeatable)
        #[arg(long, num_args = 1..)]
        address: Vec<String>,
    },
    /// Geocode coordinates to state, county, tract, and block
    Reverse {
        /// CSV with `Longitude, Latitude` columns or a `Coordinates` column
        #[arg(long, required_unless_present = "coordinate", conflicts_with = "coordinate")]
        input: Option<PathBuf>,
        /// Coordinate as `LON,LAT` (repeatable)
        #[arg(long, num_args = 1.., allow_hyphen_values = true)]
        coordinate: Vec<String>,
    },
    /// Delete stored results so they are attempted again on the next run
    Purge {
        /// `forward` or `reverse`
        #[arg(long)]
        direction: Direction,
        /// `located`, `failed`, or `all`
        #[arg(long, default_value = "failed")]
        scope: PurgeScope,
        /// Remove entries dated on or before this day (YYYY-MM-DD)
        #[arg(long, conflicts_with = "older_than_days")]
        before: Option<NaiveDate>,
        /// Remove entries at least this many days old
        #[arg(long)]
        older_than_days: Option<u64>,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Show located/failed counts per direction
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = usgeocoder_cli_utils::init_logger();
    let cli = Cli::parse();

    let mut config = usgeocoder_geocoder::config::load(cli.config.as_deref())?;
    if let Some(dir) = cli.store_dir {
        config.store_dir = dir;
    }
    if let Some(concurrency) = cli.concurrency {
        config.concurrency = concurrency;
    }
    log::debug!("Using store directory {}", config.store_dir.display());

    match cli.command {
        Commands::Forward { input, address } => {
            let addresses = match input {
                Some(path) => usgeocoder_ingest::address::addresses_from_path(&path)?,
                None => address,
            };
            commands::forward(&config, &multi, addresses).await?;
        }
        Commands::Reverse { input, coordinate } => {
            let coordinates = match input {
                Some(path) => usgeocoder_ingest::coordinates::coordinates_from_path(&path)?,
                None => commands::parse_coordinates(&coordinate)?,
            };
            commands::reverse(&config, &multi, coordinates).await?;
        }
        Commands::Purge {
            direction,
            scope,
            before,
            older_than_days,
            yes,
        } => {
            let cutoff = commands::purge_cutoff(before, older_than_days, commands::today())?;
            commands::purge(&config, direction, scope, cutoff, yes)?;
        }
        Commands::Status => commands::status(&config)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory as _;

    use super::*;

    #[test]
    fn command_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_purge_arguments() {
        let cli = Cli::try_parse_from([
            "usgeocoder",
            "--store-dir",
            "/tmp/geo",
            "purge",
            "--direction",
            "forward",
            "--scope",
            "all",
            "--before",
            "2024-05-01",
            "--yes",
        ])
        .unwrap();

        assert_eq!(cli.store_dir, Some(PathBuf::from("/tmp/geo")));
        let Commands::Purge {
            direction,
            scope,
            before,
            older_than_days,
            yes,
        } = cli.command
        else {
            panic!("expected purge");
        };
        assert_eq!(direction, Direction::Forward);
        assert_eq!(scope, PurgeScope::All);
        assert_eq!(before, NaiveDate::from_ymd_opt(2024, 5, 1));
        assert_eq!(older_than_days, None);
        assert!(yes);
    }

    #[test]
    fn purge_scope_defaults_to_failed() {
        let cli = Cli::try_parse_from(["usgeocoder", "purge", "--direction", "reverse"]).unwrap();
        let Commands::Purge {
            direction, scope, ..
        } = cli.command
        else {
            panic!("expected purge");
        };
        assert_eq!(direction, Direction::Reverse);
        assert_eq!(scope, PurgeScope::Failed);
    }

    #[test]
    fn rejects_unknown_direction() {
        assert!(Cli::try_parse_from(["usgeocoder", "purge", "--direction", "sideways"]).is_err());
    }

    #[test]
    fn rejects_both_cutoffs() {
        assert!(
            Cli::try_parse_from([
                "usgeocoder",
                "purge",
                "--direction",
                "forward",
                "--before",
                "2024-05-01",
                "--older-than-days",
                "30",
            ])
            .is_err()
        );
    }

    #[test]
    fn forward_and_reverse_take_repeated_values() {
        let cli = Cli::try_parse_from([
            "usgeocoder",
            "--concurrency",
            "8",
            "forward",
            "--address",
            "156 Front St, Exeter, NH 03833",
            "1 Main St, Concord, NH 03301",
        ])
        .unwrap();
        assert_eq!(cli.concurrency, Some(8));
        let Commands::Forward { input, address } = cli.command else {
            panic!("expected forward");
        };
        assert!(input.is_none());
        assert_eq!(address.len(), 2);

        let cli = Cli::try_parse_from(["usgeocoder", "reverse", "--coordinate", "-70.95,42.98"])
            .unwrap();
        let Commands::Reverse { coordinate, .. } = cli.command else {
            panic!("expected reverse");
        };
        assert_eq!(coordinate, vec!["-70.95,42.98".to_string()]);
    }

    #[test]
    fn forward_requires_some_input() {
        assert!(Cli::try_parse_from(["usgeocoder", "forward"]).is_err());
    }
}
