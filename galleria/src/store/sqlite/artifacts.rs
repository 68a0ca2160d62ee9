use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use super::{from_sql_time, from_sql_u64, parse_column, to_sql_time, to_sql_u64, SqliteStore};
use crate::artifacts::{ArtifactStore, CacheArtifact};
use crate::ids::{ArtifactId, CollectionId, FolderId, ImageId};
use crate::store::StoreResult;

const ARTIFACT_COLUMNS: &str = "id, image_id, collection_id, profile_key, folder_id, path, \
     width, height, file_size_bytes, created_at, expires_at, is_valid";

fn artifact_from_row(row: &Row<'_>) -> rusqlite::Result<CacheArtifact> {
    Ok(CacheArtifact {
        id: parse_column(row, 0)?,
        image_id: ImageId::from(row.get::<_, String>(1)?),
        collection_id: row.get::<_, Option<String>>(2)?.map(CollectionId::from),
        profile_key: row.get(3)?,
        folder_id: parse_column(row, 4)?,
        path: PathBuf::from(row.get::<_, String>(5)?),
        width: row.get(6)?,
        height: row.get(7)?,
        file_size_bytes: from_sql_u64(row.get(8)?),
        created_at: from_sql_time(row.get(9)?),
        expires_at: row.get::<_, Option<i64>>(10)?.map(from_sql_time),
        is_valid: row.get(11)?,
    })
}

fn query_artifacts(
    conn: &Connection,
    filter: &str,
    arg: &dyn rusqlite::ToSql,
) -> StoreResult<Vec<CacheArtifact>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM artifacts WHERE {} ORDER BY created_at, id",
        ARTIFACT_COLUMNS, filter
    ))?;
    let artifacts = stmt
        .query_map([arg], artifact_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(artifacts)
}

impl ArtifactStore for SqliteStore {
    fn upsert_artifact(&self, artifact: &CacheArtifact) -> StoreResult<Option<CacheArtifact>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let replaced = tx
            .query_row(
                &format!(
                    "SELECT {} FROM artifacts WHERE image_id = ?1 AND profile_key = ?2",
                    ARTIFACT_COLUMNS
                ),
                params![artifact.image_id.as_str(), artifact.profile_key],
                artifact_from_row,
            )
            .optional()?;
        if let Some(old) = &replaced {
            tx.execute(
                "DELETE FROM artifacts WHERE id = ?1",
                params![old.id.to_string()],
            )?;
        }

        tx.execute(
            &format!(
                "INSERT INTO artifacts ({}) VALUES \
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                ARTIFACT_COLUMNS
            ),
            params![
                artifact.id.to_string(),
                artifact.image_id.as_str(),
                artifact.collection_id.as_ref().map(|c| c.as_str()),
                artifact.profile_key,
                artifact.folder_id.to_string(),
                artifact.path.to_string_lossy().into_owned(),
                artifact.width,
                artifact.height,
                to_sql_u64(artifact.file_size_bytes)?,
                to_sql_time(artifact.created_at),
                artifact.expires_at.map(to_sql_time),
                artifact.is_valid,
            ],
        )?;
        tx.commit()?;
        Ok(replaced)
    }

    fn get_artifact(&self, id: &ArtifactId) -> StoreResult<Option<CacheArtifact>> {
        let conn = self.conn.lock();
        Ok(query_artifacts(&conn, "id = ?1", &id.to_string())?
            .into_iter()
            .next())
    }

    fn find_artifact(
        &self,
        image_id: &ImageId,
        profile_key: &str,
    ) -> StoreResult<Option<CacheArtifact>> {
        let conn = self.conn.lock();
        let artifact = conn
            .query_row(
                &format!(
                    "SELECT {} FROM artifacts WHERE image_id = ?1 AND profile_key = ?2",
                    ARTIFACT_COLUMNS
                ),
                params![image_id.as_str(), profile_key],
                artifact_from_row,
            )
            .optional()?;
        Ok(artifact)
    }

    fn artifacts_for_image(&self, image_id: &ImageId) -> StoreResult<Vec<CacheArtifact>> {
        let conn = self.conn.lock();
        query_artifacts(&conn, "image_id = ?1", &image_id.as_str())
    }

    fn artifacts_for_collection(
        &self,
        collection_id: &CollectionId,
    ) -> StoreResult<Vec<CacheArtifact>> {
        let conn = self.conn.lock();
        query_artifacts(&conn, "collection_id = ?1", &collection_id.as_str())
    }

    fn artifacts_in_folder(&self, folder_id: &FolderId) -> StoreResult<Vec<CacheArtifact>> {
        let conn = self.conn.lock();
        query_artifacts(&conn, "folder_id = ?1", &folder_id.to_string())
    }

    fn invalidate_artifacts_for_image(&self, image_id: &ImageId) -> StoreResult<usize> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE artifacts SET is_valid = 0 WHERE image_id = ?1 AND is_valid = 1",
            params![image_id.as_str()],
        )?;
        Ok(changed)
    }

    fn expired_artifacts(&self, now: DateTime<Utc>) -> StoreResult<Vec<CacheArtifact>> {
        let conn = self.conn.lock();
        query_artifacts(
            &conn,
            "is_valid = 0 OR (expires_at IS NOT NULL AND expires_at <= ?1)",
            &to_sql_time(now),
        )
    }

    fn delete_artifact(&self, id: &ArtifactId) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM artifacts WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(removed > 0)
    }

    fn folder_usage(&self, folder_id: &FolderId) -> StoreResult<(u64, u64)> {
        let conn = self.conn.lock();
        let (bytes, files): (i64, i64) = conn.query_row(
            "SELECT COALESCE(SUM(file_size_bytes), 0), COUNT(*) FROM artifacts \
             WHERE folder_id = ?1",
            params![folder_id.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((from_sql_u64(bytes), from_sql_u64(files)))
    }
}
