use std::path::PathBuf;

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::{from_sql_time, from_sql_u64, parse_column, to_sql_time, to_sql_u64, SqliteStore};
use crate::folders::{CacheFolder, CacheFolderStore, FolderUpdate};
use crate::ids::FolderId;
use crate::store::{StoreError, StoreResult};

const FOLDER_COLUMNS: &str = "id, name, path, priority, max_size_bytes, current_size_bytes, \
     total_files, is_active, created_at, updated_at";

fn folder_from_row(row: &Row<'_>) -> rusqlite::Result<CacheFolder> {
    Ok(CacheFolder {
        id: parse_column(row, 0)?,
        name: row.get(1)?,
        path: PathBuf::from(row.get::<_, String>(2)?),
        priority: row.get(3)?,
        max_size_bytes: row.get::<_, Option<i64>>(4)?.map(from_sql_u64),
        current_size_bytes: from_sql_u64(row.get(5)?),
        total_files: from_sql_u64(row.get(6)?),
        is_active: row.get(7)?,
        created_at: from_sql_time(row.get(8)?),
        updated_at: from_sql_time(row.get(9)?),
    })
}

fn max_size_param(max: Option<u64>) -> StoreResult<Option<i64>> {
    max.map(to_sql_u64).transpose()
}

impl SqliteStore {
    fn query_folders(&self, active_only: bool) -> StoreResult<Vec<CacheFolder>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM cache_folders {} ORDER BY priority, id",
            FOLDER_COLUMNS,
            if active_only { "WHERE is_active = 1" } else { "" }
        );
        let mut stmt = conn.prepare(&sql)?;
        let folders = stmt
            .query_map([], folder_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(folders)
    }
}

impl CacheFolderStore for SqliteStore {
    fn insert_folder(&self, folder: &CacheFolder) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO cache_folders (id, name, path, priority, max_size_bytes, \
             current_size_bytes, total_files, is_active, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                folder.id.to_string(),
                folder.name,
                folder.path.to_string_lossy().into_owned(),
                folder.priority,
                max_size_param(folder.max_size_bytes)?,
                to_sql_u64(folder.current_size_bytes)?,
                to_sql_u64(folder.total_files)?,
                folder.is_active,
                to_sql_time(folder.created_at),
                to_sql_time(folder.updated_at),
            ],
        )?;
        Ok(())
    }

    fn get_folder(&self, id: &FolderId) -> StoreResult<Option<CacheFolder>> {
        let conn = self.conn.lock();
        let folder = conn
            .query_row(
                &format!("SELECT {} FROM cache_folders WHERE id = ?1", FOLDER_COLUMNS),
                params![id.to_string()],
                folder_from_row,
            )
            .optional()?;
        Ok(folder)
    }

    fn list_folders(&self) -> StoreResult<Vec<CacheFolder>> {
        self.query_folders(false)
    }

    fn list_active_folders(&self) -> StoreResult<Vec<CacheFolder>> {
        self.query_folders(true)
    }

    fn update_folder(&self, id: &FolderId, update: &FolderUpdate) -> StoreResult<CacheFolder> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let mut folder = tx
            .query_row(
                &format!("SELECT {} FROM cache_folders WHERE id = ?1", FOLDER_COLUMNS),
                params![id.to_string()],
                folder_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("cache folder", id))?;
        folder.apply_update(update, Utc::now());

        // Size counters belong to the accountant and are not written here.
        tx.execute(
            "UPDATE cache_folders SET name = ?1, path = ?2, priority = ?3, \
             max_size_bytes = ?4, is_active = ?5, updated_at = ?6 WHERE id = ?7",
            params![
                folder.name,
                folder.path.to_string_lossy().into_owned(),
                folder.priority,
                max_size_param(folder.max_size_bytes)?,
                folder.is_active,
                to_sql_time(folder.updated_at),
                id.to_string(),
            ],
        )?;
        tx.commit()?;
        Ok(folder)
    }

    fn delete_folder(&self, id: &FolderId) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM cache_folders WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(removed > 0)
    }

    fn increment_size(&self, id: &FolderId, bytes: u64, files: u64) -> StoreResult<u64> {
        let conn = self.conn.lock();
        let size: Option<i64> = conn
            .query_row(
                "UPDATE cache_folders SET current_size_bytes = current_size_bytes + ?1, \
                 total_files = total_files + ?2, updated_at = ?3 \
                 WHERE id = ?4 RETURNING current_size_bytes",
                params![
                    to_sql_u64(bytes)?,
                    to_sql_u64(files)?,
                    to_sql_time(Utc::now()),
                    id.to_string()
                ],
                |row| row.get(0),
            )
            .optional()?;
        size.map(from_sql_u64)
            .ok_or_else(|| StoreError::not_found("cache folder", id))
    }

    fn decrement_size(&self, id: &FolderId, bytes: u64, files: u64) -> StoreResult<u64> {
        let conn = self.conn.lock();
        let size: Option<i64> = conn
            .query_row(
                "UPDATE cache_folders \
                 SET current_size_bytes = MAX(current_size_bytes - ?1, 0), \
                 total_files = MAX(total_files - ?2, 0), updated_at = ?3 \
                 WHERE id = ?4 RETURNING current_size_bytes",
                params![
                    to_sql_u64(bytes)?,
                    to_sql_u64(files)?,
                    to_sql_time(Utc::now()),
                    id.to_string()
                ],
                |row| row.get(0),
            )
            .optional()?;
        size.map(from_sql_u64)
            .ok_or_else(|| StoreError::not_found("cache folder", id))
    }

    fn set_size(&self, id: &FolderId, bytes: u64, files: u64) -> StoreResult<()> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE cache_folders SET current_size_bytes = ?1, total_files = ?2, \
             updated_at = ?3 WHERE id = ?4",
            params![
                to_sql_u64(bytes)?,
                to_sql_u64(files)?,
                to_sql_time(Utc::now()),
                id.to_string()
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::not_found("cache folder", id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::folders::NewCacheFolder;

    fn folder(name: &str, priority: i32) -> CacheFolder {
        CacheFolder::new(NewCacheFolder::new(name, format!("/tmp/{}", name), priority))
    }

    #[test]
    fn test_insert_and_get_folder() {
        let store = SqliteStore::open_in_memory().unwrap();
        let f = CacheFolder::new(NewCacheFolder::new("ssd", "/mnt/ssd", 2).with_max_size(1024));
        store.insert_folder(&f).unwrap();

        let loaded = store.get_folder(&f.id).unwrap().unwrap();
        assert_eq!(loaded.name, "ssd");
        assert_eq!(loaded.path, PathBuf::from("/mnt/ssd"));
        assert_eq!(loaded.max_size_bytes, Some(1024));
        assert!(loaded.is_active);
    }

    #[test]
    fn test_duplicate_insert_conflicts() {
        let store = SqliteStore::open_in_memory().unwrap();
        let f = folder("a", 1);
        store.insert_folder(&f).unwrap();
        assert!(matches!(
            store.insert_folder(&f),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn test_list_orders_by_priority() {
        let store = SqliteStore::open_in_memory().unwrap();
        for (name, priority) in [("b", 2), ("a", 1), ("c", 3)] {
            store.insert_folder(&folder(name, priority)).unwrap();
        }
        let names: Vec<String> = store
            .list_folders()
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_increment_and_clamped_decrement() {
        let store = SqliteStore::open_in_memory().unwrap();
        let f = folder("a", 1);
        store.insert_folder(&f).unwrap();

        assert_eq!(store.increment_size(&f.id, 300, 2).unwrap(), 300);
        assert_eq!(store.decrement_size(&f.id, 100, 1).unwrap(), 200);
        assert_eq!(store.decrement_size(&f.id, 1_000, 5).unwrap(), 0);

        let loaded = store.get_folder(&f.id).unwrap().unwrap();
        assert_eq!(loaded.total_files, 0);
    }

    #[test]
    fn test_counters_on_missing_folder() {
        let store = SqliteStore::open_in_memory().unwrap();
        let missing = FolderId::new();
        assert!(matches!(
            store.increment_size(&missing, 1, 1),
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            store.set_size(&missing, 1, 1),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_update_does_not_touch_counters() {
        let store = SqliteStore::open_in_memory().unwrap();
        let f = folder("a", 1);
        store.insert_folder(&f).unwrap();
        store.increment_size(&f.id, 64, 1).unwrap();

        let update = FolderUpdate {
            priority: Some(9),
            max_size_bytes: Some(Some(4096)),
            ..Default::default()
        };
        let updated = store.update_folder(&f.id, &update).unwrap();
        assert_eq!(updated.priority, 9);
        assert_eq!(updated.current_size_bytes, 64);

        let loaded = store.get_folder(&f.id).unwrap().unwrap();
        assert_eq!(loaded.max_size_bytes, Some(4096));
        assert_eq!(loaded.current_size_bytes, 64);
    }

    #[test]
    fn test_concurrent_updates_on_shared_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.db");
        let seed = SqliteStore::open(&path).unwrap();
        let f = folder("a", 1);
        seed.insert_folder(&f).unwrap();
        seed.increment_size(&f.id, 1_000, 0).unwrap();

        // Separate connections stand in for separate processes.
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let path = path.clone();
                let id = f.id;
                std::thread::spawn(move || {
                    let store = Arc::new(SqliteStore::open(&path).unwrap());
                    for _ in 0..25 {
                        if i % 2 == 0 {
                            store.increment_size(&id, 10, 1).unwrap();
                        } else {
                            store.decrement_size(&id, 10, 0).unwrap();
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let loaded = seed.get_folder(&f.id).unwrap().unwrap();
        assert_eq!(loaded.current_size_bytes, 1_000);
        assert_eq!(loaded.total_files, 50);
    }
}
