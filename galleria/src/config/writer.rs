//! INI serialization logic for converting `ConfigFile` → INI string.
//!
//! This module contains the `to_config_string()` function that produces
//! the commented INI representation written to `config.ini`.

use std::path::Path;

use super::settings::ConfigFile;

/// Convert a `ConfigFile` to a commented INI string for saving.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let retention_days = optional(config.jobs.retention_days);
    let ttl_days = optional(config.artifacts.ttl_days);

    format!(
        r#"[storage]
; SQLite database holding cache folders, jobs and artifacts
database = {}

[pipeline]
; Concurrent generation workers per job run
workers = {}
; Retries of an item when the database is unavailable, and the delay between them.
; Items still failing are left for a later resume and the job ends paused.
storage_retry_attempts = {}
storage_retry_delay_ms = {}

[jobs]
; A running job without progress for this long is considered abandoned
stale_after_secs = {}
; How often abandoned jobs are looked for
sweep_interval_secs = {}
; What an abandoned job becomes:
;   fail  - marked failed (progress kept, can be resumed)
;   pause - marked paused
stale_policy = {}
; Finished jobs older than this many days are deleted (empty = keep forever)
retention_days = {}

[artifacts]
; Generated artifacts expire after this many days (empty = never expire)
ttl_days = {}

[sources]
; Directory holding original images, looked up by image id
; (default: ~/.galleria/originals)
directory = {}

[logging]
; Log file path (default: ~/.galleria/logs/galleria.log)
file = {}
"#,
        path_to_string(&config.storage.database),
        config.pipeline.workers,
        config.pipeline.storage_retry_attempts,
        config.pipeline.storage_retry_delay_ms,
        config.jobs.stale_after_secs,
        config.jobs.sweep_interval_secs,
        config.jobs.stale_policy,
        retention_days,
        ttl_days,
        path_to_string(&config.sources.directory),
        path_to_string(&config.logging.file),
    )
}

fn optional(value: Option<u64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Write paths under the home directory with a `~/` prefix.
fn path_to_string(path: &Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if let Ok(stripped) = path.strip_prefix(&home) {
            return format!("~/{}", stripped.display());
        }
    }
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_section_is_written() {
        let content = to_config_string(&ConfigFile::default());
        for section in [
            "[storage]",
            "[pipeline]",
            "[jobs]",
            "[artifacts]",
            "[sources]",
            "[logging]",
        ] {
            assert!(content.contains(section), "missing {}", section);
        }
        assert!(content.contains("stale_policy = fail"));
        assert!(content.contains("retention_days = 30"));
    }

    #[test]
    fn test_home_paths_use_tilde() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(path_to_string(&home.join("x/y.db")), "~/x/y.db");
        }
        assert_eq!(path_to_string(Path::new("/var/db")), "/var/db");
    }
}
