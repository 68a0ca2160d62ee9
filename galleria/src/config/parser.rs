//! INI parsing logic for converting `Ini` → `ConfigFile`.
//!
//! This module contains the `parse_ini()` function and its helpers.
//! It is the single place where INI key names are mapped to struct fields.

use ini::Ini;
use std::path::PathBuf;
use std::str::FromStr;

use super::file::ConfigFileError;
use super::settings::ConfigFile;

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found in the INI.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [storage] section
    if let Some(section) = ini.section(Some("storage")) {
        if let Some(v) = section.get("database") {
            let v = v.trim();
            if !v.is_empty() {
                config.storage.database = expand_tilde(v);
            }
        }
    }

    // [pipeline] section
    if let Some(section) = ini.section(Some("pipeline")) {
        if let Some(v) = section.get("workers") {
            let workers: usize = parse_value("pipeline", "workers", v, "must be a positive integer")?;
            if workers == 0 {
                return Err(invalid("pipeline", "workers", v, "must be at least 1"));
            }
            config.pipeline.workers = workers;
        }
        if let Some(v) = section.get("storage_retry_attempts") {
            config.pipeline.storage_retry_attempts = parse_value(
                "pipeline",
                "storage_retry_attempts",
                v,
                "must be a non-negative integer",
            )?;
        }
        if let Some(v) = section.get("storage_retry_delay_ms") {
            config.pipeline.storage_retry_delay_ms = parse_value(
                "pipeline",
                "storage_retry_delay_ms",
                v,
                "must be a non-negative integer (milliseconds)",
            )?;
        }
    }

    // [jobs] section
    if let Some(section) = ini.section(Some("jobs")) {
        if let Some(v) = section.get("stale_after_secs") {
            config.jobs.stale_after_secs = parse_value(
                "jobs",
                "stale_after_secs",
                v,
                "must be a positive integer (seconds)",
            )?;
        }
        if let Some(v) = section.get("sweep_interval_secs") {
            let secs: u64 = parse_value(
                "jobs",
                "sweep_interval_secs",
                v,
                "must be a positive integer (seconds)",
            )?;
            if secs == 0 {
                return Err(invalid("jobs", "sweep_interval_secs", v, "must be at least 1"));
            }
            config.jobs.sweep_interval_secs = secs;
        }
        if let Some(v) = section.get("stale_policy") {
            config.jobs.stale_policy =
                parse_value("jobs", "stale_policy", v, "must be 'fail' or 'pause'")?;
        }
        if let Some(v) = section.get("retention_days") {
            config.jobs.retention_days = parse_optional(
                "jobs",
                "retention_days",
                v,
                "must be a positive integer (days) or empty to keep jobs",
            )?;
        }
    }

    // [artifacts] section
    if let Some(section) = ini.section(Some("artifacts")) {
        if let Some(v) = section.get("ttl_days") {
            config.artifacts.ttl_days = parse_optional(
                "artifacts",
                "ttl_days",
                v,
                "must be a positive integer (days) or empty to never expire",
            )?;
        }
    }

    // [sources] section
    if let Some(section) = ini.section(Some("sources")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.sources.directory = expand_tilde(v);
            }
        }
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = section.get("file") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.file = expand_tilde(v);
            }
        }
    }

    Ok(config)
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_value<T: FromStr>(
    section: &str,
    key: &str,
    value: &str,
    reason: &str,
) -> Result<T, ConfigFileError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(section, key, value, reason))
}

/// Parses a value where an empty string means "not set".
fn parse_optional<T: FromStr>(
    section: &str,
    key: &str,
    value: &str,
    reason: &str,
) -> Result<Option<T>, ConfigFileError> {
    if value.trim().is_empty() {
        return Ok(None);
    }
    parse_value(section, key, value, reason).map(Some)
}

/// Expand a leading `~/` to the user's home directory.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}
