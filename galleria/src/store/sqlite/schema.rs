//! Database schema.

use rusqlite::Connection;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cache_folders (
    id                  TEXT PRIMARY KEY,
    name                TEXT NOT NULL,
    path                TEXT NOT NULL,
    priority            INTEGER NOT NULL,
    max_size_bytes      INTEGER,
    current_size_bytes  INTEGER NOT NULL DEFAULT 0 CHECK (current_size_bytes >= 0),
    total_files         INTEGER NOT NULL DEFAULT 0 CHECK (total_files >= 0),
    is_active           INTEGER NOT NULL,
    created_at          INTEGER NOT NULL,
    updated_at          INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cache_folders_priority
    ON cache_folders(priority, id);

CREATE TABLE IF NOT EXISTS jobs (
    id                  TEXT PRIMARY KEY,
    job_type            TEXT NOT NULL,
    scope_json          TEXT NOT NULL,
    profile_json        TEXT NOT NULL,
    skip_existing       INTEGER NOT NULL,
    status              TEXT NOT NULL,
    total_images        INTEGER NOT NULL,
    completed_images    INTEGER NOT NULL DEFAULT 0,
    failed_images       INTEGER NOT NULL DEFAULT 0,
    skipped_images      INTEGER NOT NULL DEFAULT 0,
    total_size_bytes    INTEGER NOT NULL DEFAULT 0,
    last_progress_at    INTEGER,
    can_resume          INTEGER NOT NULL,
    created_at          INTEGER NOT NULL,
    started_at          INTEGER,
    completed_at        INTEGER,
    updated_at          INTEGER NOT NULL,
    error_message       TEXT
);

CREATE INDEX IF NOT EXISTS idx_jobs_status
    ON jobs(status, last_progress_at);

CREATE TABLE IF NOT EXISTS job_items (
    job_id              TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    image_id            TEXT NOT NULL,
    outcome             TEXT NOT NULL,
    size_bytes          INTEGER NOT NULL DEFAULT 0,
    reason              TEXT,
    recorded_at         INTEGER NOT NULL,
    PRIMARY KEY (job_id, image_id)
);

CREATE TABLE IF NOT EXISTS job_scope (
    job_id              TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    image_id            TEXT NOT NULL,
    PRIMARY KEY (job_id, image_id)
);

CREATE TABLE IF NOT EXISTS artifacts (
    id                  TEXT PRIMARY KEY,
    image_id            TEXT NOT NULL,
    collection_id       TEXT,
    profile_key         TEXT NOT NULL,
    folder_id           TEXT NOT NULL,
    path                TEXT NOT NULL,
    width               INTEGER NOT NULL,
    height              INTEGER NOT NULL,
    file_size_bytes     INTEGER NOT NULL,
    created_at          INTEGER NOT NULL,
    expires_at          INTEGER,
    is_valid            INTEGER NOT NULL,
    UNIQUE (image_id, profile_key)
);

CREATE INDEX IF NOT EXISTS idx_artifacts_folder
    ON artifacts(folder_id);

CREATE INDEX IF NOT EXISTS idx_artifacts_collection
    ON artifacts(collection_id);
";

/// Creates all tables and indexes that do not exist yet.
pub(super) fn apply(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)
}
