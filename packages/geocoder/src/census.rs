//! US Census Bureau Geocoder client.
//!
//! Issues one request per call against the Census Bureau's free
//! geocoding service. No API key required.
//!
//! - Forward: `GET /locations/onelineaddress`
//! - Reverse: `GET /geographies/coordinates`
//!
//! Every call maps to exactly one [`AttemptResult`]; retrying, pacing, and
//! logging are left to the caller.
//!
//! See <https://geocoding.geo.census.gov/geocoder/Geocoding_Services_API.html>

use std::time::Duration;

use usgeocoder_models::{Coordinate, GeocodeInput, GeocoderConfig, Geographies, MatchPayload};

use crate::{AttemptResult, GeocodeError, Resolver};

/// Geography category holding states.
pub const STATES: &str = "States";
/// Geography category holding counties.
pub const COUNTIES: &str = "Counties";
/// Geography category holding census blocks for the current vintage.
pub const CENSUS_BLOCKS: &str = "2020 Census Blocks";
/// Geography category holding census tracts.
pub const CENSUS_TRACTS: &str = "Census Tracts";

/// Field of a geography entry holding its display name.
const DISPLAY_NAME: &str = "BASENAME";

/// A client for the Census Bureau forward and reverse endpoints.
#[derive(Debug, Clone)]
pub struct CensusClient {
    client: reqwest::Client,
    base_url: String,
    benchmark: String,
    vintage: String,
}

impl CensusClient {
    /// Creates a client from its parts.
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        benchmark: impl Into<String>,
        vintage: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            benchmark: benchmark.into(),
            vintage: vintage.into(),
        }
    }

    /// Creates a client with a fresh connection pool from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::Http`] if the HTTP client cannot be built.
    pub fn from_config(config: &GeocoderConfig) -> Result<Self, GeocodeError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("usgeocoder/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::new(
            client,
            &config.base_url,
            &config.benchmark,
            &config.vintage,
        ))
    }

    /// Geocodes a one-line address, returning the first match's
    /// coordinates.
    pub async fn geocode_address(&self, address: &str, timeout: Duration) -> AttemptResult {
        let url = format!("{}/locations/onelineaddress", self.base_url);
        let request = self.client.get(&url).query(&[
            ("benchmark", self.benchmark.as_str()),
            ("format", "json"),
            ("address", address),
        ]);

        match fetch_json(request, timeout).await {
            Ok(body) => parse_address_response(&body),
            Err(failure) => failure,
        }
    }

    /// Looks up the geographies containing `coordinate`.
    pub async fn geocode_coordinate(
        &self,
        coordinate: Coordinate,
        timeout: Duration,
    ) -> AttemptResult {
        let url = format!("{}/geographies/coordinates", self.base_url);
        let x = coordinate.longitude.to_string();
        let y = coordinate.latitude.to_string();
        let request = self.client.get(&url).query(&[
            ("benchmark", self.benchmark.as_str()),
            ("vintage", self.vintage.as_str()),
            ("format", "json"),
            ("x", x.as_str()),
            ("y", y.as_str()),
        ]);

        match fetch_json(request, timeout).await {
            Ok(body) => parse_coordinates_response(&body),
            Err(failure) => failure,
        }
    }
}

#[async_trait::async_trait]
impl Resolver for CensusClient {
    async fn resolve(&self, input: &GeocodeInput, timeout: Duration) -> AttemptResult {
        match input {
            GeocodeInput::Address(address) => self.geocode_address(address, timeout).await,
            GeocodeInput::Coordinate(coordinate) => {
                self.geocode_coordinate(*coordinate, timeout).await
            }
        }
    }
}

/// Sends `request` and decodes the body as JSON.
///
/// The error side is the terminal [`AttemptResult`] for the attempt.
async fn fetch_json(
    request: reqwest::RequestBuilder,
    timeout: Duration,
) -> Result<serde_json::Value, AttemptResult> {
    let resp = request
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| classify(&e))?;

    let status = resp.status();
    let body = resp.text().await.map_err(|e| classify(&e))?;

    if !status.is_success() {
        return Err(AttemptResult::TransportError(format!(
            "Census geocoder returned status {status}"
        )));
    }

    serde_json::from_str(&body).map_err(|e| AttemptResult::DecodeError(e.to_string()))
}

/// Maps a `reqwest` failure to an attempt outcome.
fn classify(error: &reqwest::Error) -> AttemptResult {
    if error.is_timeout() {
        AttemptResult::Timeout
    } else if error.is_decode() {
        AttemptResult::DecodeError(error.to_string())
    } else {
        AttemptResult::TransportError(error.to_string())
    }
}

/// Parses the JSON response from the one-line address endpoint.
///
/// An empty `addressMatches` array is a [`AttemptResult::NoMatch`]; a body
/// without one is a [`AttemptResult::DecodeError`].
#[must_use]
pub fn parse_address_response(body: &serde_json::Value) -> AttemptResult {
    let Some(matches) = body
        .pointer("/result/addressMatches")
        .and_then(serde_json::Value::as_array)
    else {
        return AttemptResult::DecodeError("Missing addressMatches array".to_string());
    };

    let Some(first) = matches.first() else {
        return AttemptResult::NoMatch;
    };

    let x = first.pointer("/coordinates/x").and_then(serde_json::Value::as_f64);
    let y = first.pointer("/coordinates/y").and_then(serde_json::Value::as_f64);

    match (x, y) {
        (Some(x), Some(y)) => AttemptResult::Success(MatchPayload::Location(Coordinate::new(x, y))),
        _ => AttemptResult::DecodeError("Missing x/y coordinates".to_string()),
    }
}

/// Parses the JSON response from the coordinates geography endpoint.
///
/// An empty `geographies` object is a [`AttemptResult::NoMatch`]. Otherwise
/// the display name of the first entry of each category is extracted;
/// categories that are absent stay `None`. A response that carries none
/// of the four categories is also treated as no match.
#[must_use]
pub fn parse_coordinates_response(body: &serde_json::Value) -> AttemptResult {
    let Some(geographies) = body
        .pointer("/result/geographies")
        .and_then(serde_json::Value::as_object)
    else {
        return AttemptResult::DecodeError("Missing geographies object".to_string());
    };

    if geographies.is_empty() {
        return AttemptResult::NoMatch;
    }

    // Block layers are named after their census year; prefer the current
    // one and fall back to whichever the vintage returned.
    let blocks = geographies.get(CENSUS_BLOCKS).or_else(|| {
        geographies
            .iter()
            .find(|(key, _)| key.ends_with("Census Blocks"))
            .map(|(_, value)| value)
    });

    let parsed = Geographies {
        state: first_display_name(geographies.get(STATES)),
        county: first_display_name(geographies.get(COUNTIES)),
        census_block: first_display_name(blocks),
        census_tract: first_display_name(geographies.get(CENSUS_TRACTS)),
    };

    if parsed == Geographies::default() {
        return AttemptResult::NoMatch;
    }

    AttemptResult::Success(MatchPayload::Geographies(parsed))
}

fn first_display_name(category: Option<&serde_json::Value>) -> Option<String> {
    category?
        .as_array()?
        .first()?
        .get(DISPLAY_NAME)?
        .as_str()
        .map(String::from)
}
