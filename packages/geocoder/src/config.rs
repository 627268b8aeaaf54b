//! Loading [`GeocoderConfig`] from TOML and the environment.
//!
//! Precedence, lowest first: built-in defaults, the TOML file, then
//! environment variables. Command-line flags are applied on top by the
//! caller.

use std::path::{Path, PathBuf};

use usgeocoder_models::GeocoderConfig;

use crate::GeocodeError;

/// Environment variable naming a TOML configuration file.
pub const CONFIG_ENV: &str = "USGEOCODER_CONFIG";
/// Environment variable overriding [`GeocoderConfig::store_dir`].
pub const STORE_DIR_ENV: &str = "USGEOCODER_STORE_DIR";
/// Environment variable overriding [`GeocoderConfig::base_url`].
pub const BASE_URL_ENV: &str = "USGEOCODER_BASE_URL";
/// Environment variable overriding [`GeocoderConfig::concurrency`].
pub const CONCURRENCY_ENV: &str = "USGEOCODER_CONCURRENCY";

/// Loads the configuration.
///
/// Reads `path` if given, else the file named by [`CONFIG_ENV`], else
/// starts from defaults. Environment overrides are applied last and the
/// result is validated.
///
/// # Errors
///
/// * [`GeocodeError::Io`] if the file cannot be read
/// * [`GeocodeError::ConfigParse`] if the file is not valid TOML
/// * [`GeocodeError::Config`] if the result fails [`validate`]
pub fn load(path: Option<&Path>) -> Result<GeocoderConfig, GeocodeError> {
    let path = path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

    let config = match path {
        Some(path) => {
            log::debug!("Loading configuration from {}", path.display());
            let text = std::fs::read_to_string(&path).map_err(|source| GeocodeError::Io {
                path: path.display().to_string(),
                source,
            })?;
            from_toml_str(&text).map_err(|source| GeocodeError::ConfigParse {
                path: path.display().to_string(),
                source,
            })?
        }
        None => GeocoderConfig::default(),
    };

    let config = apply_env_overrides(config, |key| std::env::var(key).ok())?;
    validate(&config)?;
    Ok(config)
}

/// Parses a TOML document. Missing keys keep their defaults.
///
/// # Errors
///
/// Returns the TOML error if `text` is malformed or a value has the wrong
/// type.
pub fn from_toml_str(text: &str) -> Result<GeocoderConfig, toml::de::Error> {
    toml::from_str(text)
}

/// Applies environment overrides, reading variables through `lookup`.
///
/// # Errors
///
/// Returns [`GeocodeError::Config`] if [`CONCURRENCY_ENV`] is not a
/// number.
pub fn apply_env_overrides(
    mut config: GeocoderConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<GeocoderConfig, GeocodeError> {
    if let Some(dir) = lookup(STORE_DIR_ENV).filter(|v| !v.is_empty()) {
        config.store_dir = PathBuf::from(dir);
    }
    if let Some(url) = lookup(BASE_URL_ENV).filter(|v| !v.is_empty()) {
        config.base_url = url;
    }
    if let Some(value) = lookup(CONCURRENCY_ENV).filter(|v| !v.is_empty()) {
        config.concurrency = value.trim().parse().map_err(|_| GeocodeError::Config {
            message: format!("{CONCURRENCY_ENV} must be a positive integer, got {value:?}"),
        })?;
    }
    Ok(config)
}

/// Rejects configurations the engine cannot run with.
///
/// # Errors
///
/// Returns [`GeocodeError::Config`] for an empty timeout ladder, a zero
/// timeout, or a zero concurrency setting.
pub fn validate(config: &GeocoderConfig) -> Result<(), GeocodeError> {
    let fail = |message: &str| {
        Err(GeocodeError::Config {
            message: message.to_string(),
        })
    };

    if config.timeouts_ms.is_empty() {
        return fail("timeouts_ms must list at least one timeout");
    }
    if config.timeouts_ms.contains(&0) {
        return fail("timeouts_ms must not contain zero");
    }
    if config.concurrency == 0 {
        return fail("concurrency must be at least 1");
    }
    if config.concurrency_limit == 0 {
        return fail("concurrency_limit must be at least 1");
    }
    if config.base_url.trim().is_empty() {
        return fail("base_url must not be empty");
    }
    Ok(())
}
