//! SQLite-backed item table.
//!
//! Uses `rusqlite` with the `bundled` feature so no system SQLite
//! library is required.  All async trait methods are thin wrappers
//! around synchronous rusqlite calls executed under a `Mutex`.
//!
//! Schema (one table per configured table name):
//!
//! ```text
//! partition_key TEXT, row_key TEXT, value TEXT, updated_at TEXT
//! PRIMARY KEY (partition_key, row_key)
//! ```

use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use super::store::{ItemRecord, TableBackend, TableFuture};

/// Item table backed by a single SQLite database file.
pub struct SqliteTableBackend {
    /// The database connection, guarded by a mutex for Send + Sync.
    conn: Mutex<Connection>,
    /// Validated SQL identifier of the item table.
    table: String,
}

/// Check that `name` is safe to splice into SQL as an identifier.
fn validate_table_name(name: &str) -> anyhow::Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        anyhow::bail!("Invalid table name for SQLite backend: {name:?}");
    }
    Ok(())
}

impl SqliteTableBackend {
    /// Open (or create) the database at `path` for the table `table`.
    ///
    /// Passing `":memory:"` creates an in-memory database (useful for tests).
    /// The table itself is created lazily by [`TableBackend::ensure_table`].
    pub fn new(path: &str, table: &str) -> anyhow::Result<Self> {
        validate_table_name(table)?;
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
            table: table.to_string(),
        };
        store.apply_pragmas()?;
        Ok(store)
    }

    /// Apply recommended SQLite pragmas for performance and safety.
    fn apply_pragmas(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        // journal_mode returns a row, so it cannot go through execute().
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.execute_batch(
            "
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        Ok(())
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ItemRecord> {
        Ok(ItemRecord {
            partition_key: row.get(0)?,
            row_key: row.get(1)?,
            value: row.get(2)?,
            updated_at: row.get(3)?,
        })
    }
}

impl TableBackend for SqliteTableBackend {
    fn ensure_table(&self) -> TableFuture<'_, ()> {
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS \"{table}\" (
                    partition_key  TEXT NOT NULL,
                    row_key        TEXT NOT NULL,
                    value          TEXT NOT NULL,
                    updated_at     TEXT NOT NULL,
                    PRIMARY KEY (partition_key, row_key)
                );",
                table = self.table
            ))?;
            Ok(())
        })
    }

    fn upsert(&self, record: ItemRecord) -> TableFuture<'_, ()> {
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO \"{}\" (partition_key, row_key, value, updated_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    self.table
                ),
                params![
                    record.partition_key,
                    record.row_key,
                    record.value,
                    record.updated_at
                ],
            )?;
            Ok(())
        })
    }

    fn get(&self, partition_key: &str, row_key: &str) -> TableFuture<'_, Option<ItemRecord>> {
        let partition_key = partition_key.to_string();
        let row_key = row_key.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let record = conn
                .query_row(
                    &format!(
                        "SELECT partition_key, row_key, value, updated_at FROM \"{}\"
                         WHERE partition_key = ?1 AND row_key = ?2",
                        self.table
                    ),
                    params![partition_key, row_key],
                    Self::row_to_record,
                )
                .optional()?;
            Ok(record)
        })
    }

    fn delete(&self, partition_key: &str, row_key: &str) -> TableFuture<'_, bool> {
        let partition_key = partition_key.to_string();
        let row_key = row_key.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let affected = conn.execute(
                &format!(
                    "DELETE FROM \"{}\" WHERE partition_key = ?1 AND row_key = ?2",
                    self.table
                ),
                params![partition_key, row_key],
            )?;
            Ok(affected > 0)
        })
    }

    fn list_partition(&self, partition_key: &str) -> TableFuture<'_, Vec<ItemRecord>> {
        let partition_key = partition_key.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let mut stmt = conn.prepare(&format!(
                "SELECT partition_key, row_key, value, updated_at FROM \"{}\"
                 WHERE partition_key = ?1 ORDER BY row_key",
                self.table
            ))?;
            let rows = stmt
                .query_map(params![partition_key], Self::row_to_record)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> SqliteTableBackend {
        SqliteTableBackend::new(":memory:", "items").expect("failed to create in-memory store")
    }

    fn record(row: &str, value: &str) -> ItemRecord {
        ItemRecord {
            partition_key: "items".to_string(),
            row_key: row.to_string(),
            value: value.to_string(),
            updated_at: "2026-02-23T00:00:00.000Z".to_string(),
        }
    }

    #[test]
    fn test_validate_table_name() {
        assert!(validate_table_name("items").is_ok());
        assert!(validate_table_name("_items_2").is_ok());
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("2items").is_err());
        assert!(validate_table_name("items; DROP TABLE x").is_err());
        assert!(validate_table_name("it\"ems").is_err());
    }

    #[test]
    fn test_new_rejects_bad_table_name() {
        assert!(SqliteTableBackend::new(":memory:", "bad-name").is_err());
    }

    #[tokio::test]
    async fn test_ensure_table_idempotent() {
        let store = test_store();
        store.ensure_table().await.unwrap();
        store.upsert(record("a", "v")).await.unwrap();
        store.ensure_table().await.expect("second ensure failed");
        assert!(store.get("items", "a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_upsert_before_ensure_fails() {
        let store = test_store();
        assert!(store.upsert(record("a", "v")).await.is_err());
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let store = test_store();
        store.ensure_table().await.unwrap();
        store.upsert(record("P001", "Laptop")).await.unwrap();

        let fetched = store.get("items", "P001").await.unwrap().unwrap();
        assert_eq!(fetched, record("P001", "Laptop"));
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let store = test_store();
        store.ensure_table().await.unwrap();
        assert!(store.get("items", "P999").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing_row() {
        let store = test_store();
        store.ensure_table().await.unwrap();
        store.upsert(record("A", "v1")).await.unwrap();
        store.upsert(record("A", "v2")).await.unwrap();

        assert_eq!(store.get("items", "A").await.unwrap().unwrap().value, "v2");
        assert_eq!(store.list_partition("items").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = test_store();
        store.ensure_table().await.unwrap();
        store.upsert(record("A", "v")).await.unwrap();

        assert!(store.delete("items", "A").await.unwrap());
        assert!(!store.delete("items", "A").await.unwrap());
        assert!(store.get("items", "A").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_partition_ordered_and_scoped() {
        let store = test_store();
        store.ensure_table().await.unwrap();
        for id in ["P003", "P001", "P002"] {
            store.upsert(record(id, "x")).await.unwrap();
        }
        let mut other = record("Z", "x");
        other.partition_key = "other".to_string();
        store.upsert(other).await.unwrap();

        let ids: Vec<_> = store
            .list_partition("items")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.row_key)
            .collect();
        assert_eq!(ids, vec!["P001", "P002", "P003"]);
    }

    #[tokio::test]
    async fn test_file_backed_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.db");
        let path = path.to_str().unwrap();

        {
            let store = SqliteTableBackend::new(path, "items").unwrap();
            store.ensure_table().await.unwrap();
            store.upsert(record("P001", "Laptop")).await.unwrap();
        }

        let reopened = SqliteTableBackend::new(path, "items").unwrap();
        reopened.ensure_table().await.unwrap();
        let row = reopened.get("items", "P001").await.unwrap().unwrap();
        assert_eq!(row.value, "Laptop");
    }
}
