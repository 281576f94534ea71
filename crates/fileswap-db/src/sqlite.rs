use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use fileswap_types::{Clock, SwapRecord, SwapRow, SwapUpdate};
use rusqlite::types::Type;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use tracing::info;

use crate::{StoreError, StoreResult, SwapStore, diagnose_update};

const READER_POOL_SIZE: usize = 2;

const SELECT_COLUMNS: &str = "swap_id, created_at, expires_at, \
     file1_url, file1_name, file1_size, file2_url, file2_name, file2_size";

/// Local relational store with a reader/writer split.
///
/// Timestamps are stored as fixed-width RFC 3339 UTC text so that string
/// comparison in SQL orders them correctly.
pub struct SqliteStore {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    reader_idx: AtomicUsize,
    clock: Arc<dyn Clock>,
}

impl SqliteStore {
    pub fn open(path: &Path, clock: Arc<dyn Clock>) -> StoreResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let writer = Connection::open(path)?;
        writer.pragma_update(None, "journal_mode", "WAL")?;

        run_migrations(&writer)?;

        let mut readers = Vec::with_capacity(READER_POOL_SIZE);
        for _ in 0..READER_POOL_SIZE {
            let conn = Connection::open_with_flags(
                path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY
                    | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            readers.push(Mutex::new(conn));
        }

        info!(
            "Swap DB opened at {} (1 writer + {} readers)",
            path.display(),
            READER_POOL_SIZE
        );
        Ok(Self {
            writer: Mutex::new(writer),
            readers,
            reader_idx: AtomicUsize::new(0),
            clock,
        })
    }

    fn with_conn<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T>,
    {
        let idx = self.reader_idx.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        let conn = self.readers[idx]
            .lock()
            .map_err(|e| StoreError::Backend(format!("Reader lock poisoned: {}", e)))?;
        f(&conn)
    }

    fn with_conn_mut<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T>,
    {
        let conn = self
            .writer
            .lock()
            .map_err(|e| StoreError::Backend(format!("Writer lock poisoned: {}", e)))?;
        f(&conn)
    }
}

#[async_trait]
impl SwapStore for SqliteStore {
    async fn put(&self, record: SwapRecord) -> StoreResult<()> {
        let now = timestamp(self.clock.now());
        let row = SwapRow::from(record);
        self.with_conn_mut(|conn| {
            // An expired row still holding the id does not count as a collision.
            conn.execute(
                "DELETE FROM swaps WHERE swap_id = ?1 AND expires_at < ?2",
                params![&row.swap_id, &now],
            )?;
            let inserted = conn.execute(
                "INSERT INTO swaps (swap_id, created_at, expires_at,
                                    file1_url, file1_name, file1_size,
                                    file2_url, file2_name, file2_size)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    &row.swap_id,
                    timestamp(row.created_at),
                    timestamp(row.expires_at),
                    &row.file1_url,
                    &row.file1_name,
                    row.file1_size.map(|s| s as i64),
                    &row.file2_url,
                    &row.file2_name,
                    row.file2_size.map(|s| s as i64),
                ],
            );
            match inserted {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    Err(StoreError::Conflict(row.swap_id.clone()))
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    async fn get(&self, id: &str) -> StoreResult<SwapRecord> {
        let now = self.clock.now();
        let record = self.with_conn(|conn| query_swap(conn, id))?;
        match record {
            Some(record) if record.is_expired_at(now) => Err(StoreError::Expired(id.to_string())),
            Some(record) => Ok(record),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn update(&self, id: &str, update: SwapUpdate) -> StoreResult<SwapRecord> {
        let now = self.clock.now();
        let sql = match &update {
            SwapUpdate::AttachFile1(_) => {
                "UPDATE swaps SET file1_url = ?2, file1_name = ?3, file1_size = ?4
                 WHERE swap_id = ?1 AND expires_at >= ?5 AND file1_url IS NULL"
            }
            SwapUpdate::AttachFile2(_) => {
                "UPDATE swaps SET file2_url = ?2, file2_name = ?3, file2_size = ?4
                 WHERE swap_id = ?1 AND expires_at >= ?5
                   AND file1_url IS NOT NULL AND file2_url IS NULL"
            }
        };
        let desc = update.descriptor();

        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                sql,
                params![
                    id,
                    &desc.locator,
                    &desc.display_name,
                    desc.size_bytes as i64,
                    timestamp(now),
                ],
            )?;
            let current = query_swap(conn, id)?;
            if changed == 0 {
                return Err(diagnose_update(id, current, &update, now));
            }
            current.ok_or_else(|| StoreError::NotFound(id.to_string()))
        })
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        self.with_conn_mut(|conn| {
            conn.execute("DELETE FROM swaps WHERE swap_id = ?1", [id])?;
            Ok(())
        })
    }

    async fn sweep_expired(&self) -> StoreResult<Vec<SwapRecord>> {
        let now = timestamp(self.clock.now());
        self.with_conn_mut(|conn| {
            let mut stmt = conn.prepare(&format!(
                "DELETE FROM swaps WHERE expires_at < ?1 RETURNING {}",
                SELECT_COLUMNS
            ))?;
            let removed = stmt
                .query_map([&now], map_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(removed)
        })
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn query_swap(conn: &Connection, id: &str) -> StoreResult<Option<SwapRecord>> {
    let record = conn
        .query_row(
            &format!("SELECT {} FROM swaps WHERE swap_id = ?1", SELECT_COLUMNS),
            [id],
            map_row,
        )
        .optional()?;
    Ok(record)
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<SwapRecord> {
    Ok(SwapRow {
        swap_id: row.get(0)?,
        created_at: parse_timestamp(row, 1)?,
        expires_at: parse_timestamp(row, 2)?,
        file1_url: row.get(3)?,
        file1_name: row.get(4)?,
        file1_size: row.get::<_, Option<i64>>(5)?.map(|s| s as u64),
        file2_url: row.get(6)?,
        file2_name: row.get(7)?,
        file2_size: row.get::<_, Option<i64>>(8)?.map(|s| s as u64),
    }
    .into())
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn run_migrations(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);",
    )?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Swap DB: running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE swaps (
                swap_id     TEXT PRIMARY KEY,
                file1_url   TEXT,
                file1_name  TEXT,
                file1_size  INTEGER,
                file2_url   TEXT,
                file2_name  TEXT,
                file2_size  INTEGER,
                created_at  TEXT NOT NULL,
                expires_at  TEXT NOT NULL
            );

            CREATE INDEX idx_swaps_expires_at ON swaps(expires_at);
            CREATE INDEX idx_swaps_created_at ON swaps(created_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    Ok(())
}
