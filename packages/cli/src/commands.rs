//! Subcommand handlers.

use chrono::{Days, NaiveDate};
use usgeocoder_cli_utils::{IndicatifProgress, MultiProgress};
use usgeocoder_geocoder::{Geocoder, RunSummary};
use usgeocoder_models::{Coordinate, Direction, GeocoderConfig, PurgeScope};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// Parses `LON,LAT` arguments, failing on the first bad one.
pub fn parse_coordinates(values: &[String]) -> CliResult<Vec<Coordinate>> {
    let mut coordinates = Vec::with_capacity(values.len());
    for v in values {
        let coordinate = usgeocoder_ingest::coordinates::parse_coordinate(v)
            .ok_or_else(|| format!("Invalid coordinate {v:?}; expected LON,LAT"))?;
        coordinates.push(coordinate);
    }
    Ok(coordinates)
}

/// Resolves the purge cutoff. With neither flag, everything is due.
pub fn purge_cutoff(
    before: Option<NaiveDate>,
    older_than_days: Option<u64>,
    today: NaiveDate,
) -> CliResult<NaiveDate> {
    match (before, older_than_days) {
        (Some(date), _) => Ok(date),
        (None, Some(days)) => Ok(today
            .checked_sub_days(Days::new(days))
            .ok_or_else(|| format!("--older-than-days {days} is out of range"))?),
        (None, None) => Ok(NaiveDate::MAX),
    }
}

pub async fn forward(
    config: &GeocoderConfig,
    multi: &MultiProgress,
    addresses: Vec<String>,
) -> CliResult<()> {
    let progress = IndicatifProgress::batch_bar(multi, "Geocoding addresses");
    let mut geocoder = Geocoder::from_config(config)?.with_progress(progress.clone());

    let summary = geocoder.forward(&addresses).await?;
    progress.finish_and_clear();
    print_summary(&summary);
    Ok(())
}

pub async fn reverse(
    config: &GeocoderConfig,
    multi: &MultiProgress,
    coordinates: Vec<Coordinate>,
) -> CliResult<()> {
    let progress = IndicatifProgress::batch_bar(multi, "Geocoding coordinates");
    let mut geocoder = Geocoder::from_config(config)?.with_progress(progress.clone());

    let summary = geocoder.reverse(coordinates).await?;
    progress.finish_and_clear();
    print_summary(&summary);
    Ok(())
}

pub fn purge(
    config: &GeocoderConfig,
    direction: Direction,
    scope: PurgeScope,
    cutoff: NaiveDate,
    yes: bool,
) -> CliResult<()> {
    let mut geocoder = Geocoder::from_config(config)?;
    let plan = geocoder.purge_plan(direction, scope, cutoff);

    if plan.is_empty() {
        println!("Nothing to purge.");
        return Ok(());
    }

    let when = if cutoff == NaiveDate::MAX {
        "of any date".to_string()
    } else {
        format!("dated {cutoff} or earlier")
    };
    println!(
        "{direction}: {} located and {} failed entries {when} will be removed.",
        plan.located, plan.failed
    );

    if !usgeocoder_cli_utils::confirm("Continue?", yes)? {
        println!("Cancelled.");
        return Ok(());
    }

    let removed = geocoder.apply_purge(&plan)?;
    println!("Removed {removed} entries.");
    Ok(())
}

pub fn status(config: &GeocoderConfig) -> CliResult<()> {
    let geocoder = Geocoder::from_config(config)?;
    let store = geocoder.store();

    println!("Store: {}", config.store_dir.display());
    println!("{:<10} {:>10} {:>10}", "DIRECTION", "LOCATED", "FAILED");
    for direction in [Direction::Forward, Direction::Reverse] {
        println!(
            "{:<10} {:>10} {:>10}",
            direction.as_ref(),
            store.located_count(direction),
            store.failed_count(direction)
        );
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("{summary}");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn cutoff_prefers_explicit_date() {
        assert_eq!(
            purge_cutoff(Some(day(2024, 1, 1)), None, day(2024, 6, 1)).unwrap(),
            day(2024, 1, 1)
        );
    }

    #[test]
    fn cutoff_from_age() {
        assert_eq!(
            purge_cutoff(None, Some(30), day(2024, 3, 31)).unwrap(),
            day(2024, 3, 1)
        );
    }

    #[test]
    fn no_cutoff_means_everything() {
        assert_eq!(
            purge_cutoff(None, None, day(2024, 3, 31)).unwrap(),
            NaiveDate::MAX
        );
    }

    #[test]
    fn parses_coordinate_arguments() {
        let parsed =
            parse_coordinates(&["-70.95,42.98".to_string(), "(-71.1, 42.3)".to_string()]).unwrap();
        assert_eq!(
            parsed,
            vec![Coordinate::new(-70.95, 42.98), Coordinate::new(-71.1, 42.3)]
        );
        assert!(parse_coordinates(&["north".to_string()]).is_err());
    }
}
