//! SQLite-backed metadata store
//!
//! Uniqueness of `session_id`, the tier/expiry pairing, immutable columns and
//! the never-shorten rule are all enforced by the schema itself, so a second
//! writer that bypasses this module still cannot break them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, Transaction};
use sarc_core::{RetentionTier, StorageLocation};
use sarc_crypto::{ArchiveSalt, KdfParams};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{shortens_retention, MetadataError, MetadataResult, MetadataStore};
use crate::model::{Archive, ArchiveStatus};

const SCHEMA_VERSION: i64 = 1;

const COLUMNS: &str = "id, session_id, salt, kdf_mem_cost_kib, kdf_time_cost, kdf_parallelism, \
     retention_tier, status, created_at, expires_at, storage_location, plaintext_checksum, \
     size_bytes, archived_by, version, updated_at";

const SHORTENED_MARKER: &str = "retention shortened";

#[derive(Clone)]
pub struct SqliteMetadataStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteMetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteMetadataStore").finish_non_exhaustive()
    }
}

impl SqliteMetadataStore {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: &Path) -> MetadataResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    MetadataError::Backend(format!("creating {}: {e}", parent.display()))
                })?;
            }
        }
        let conn = Connection::open(path).map_err(|e| map_db_err(&e))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(|e| map_db_err(&e))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> MetadataResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| map_db_err(&e))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> MetadataResult<Self> {
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| map_db_err(&e))?;
        ensure_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> MetadataResult<T>
    where
        F: FnOnce(&mut Connection) -> MetadataResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| MetadataError::Backend(format!("metadata task failed: {e}")))?
    }
}

fn map_db_err(err: &rusqlite::Error) -> MetadataError {
    MetadataError::Backend(err.to_string())
}

fn is_constraint(err: &rusqlite::Error, needle: &str) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, Some(msg)) => {
            e.code == ErrorCode::ConstraintViolation && msg.contains(needle)
        }
        _ => false,
    }
}

fn ensure_schema(conn: &Connection) -> MetadataResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sarc_meta (
            schema_version  INTEGER NOT NULL
        );",
    )
    .map_err(|e| map_db_err(&e))?;

    let existing: Option<i64> = conn
        .query_row("SELECT schema_version FROM sarc_meta LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()
        .map_err(|e| map_db_err(&e))?;

    match existing {
        Some(SCHEMA_VERSION) => ensure_archive_schema(conn),
        Some(other) => Err(MetadataError::Backend(format!(
            "unsupported metadata schema version {other} (expected {SCHEMA_VERSION})"
        ))),
        None => {
            ensure_archive_schema(conn)?;
            conn.execute(
                "INSERT INTO sarc_meta (schema_version) VALUES (?1)",
                params![SCHEMA_VERSION],
            )
            .map_err(|e| map_db_err(&e))?;
            Ok(())
        }
    }
}

fn ensure_archive_schema(conn: &Connection) -> MetadataResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS session_archives (
            id                  TEXT    PRIMARY KEY NOT NULL,
            session_id          TEXT    NOT NULL UNIQUE,
            salt                BLOB    NOT NULL,
            kdf_mem_cost_kib    INTEGER NOT NULL,
            kdf_time_cost       INTEGER NOT NULL,
            kdf_parallelism     INTEGER NOT NULL,
            retention_tier      TEXT    NOT NULL
                CHECK (retention_tier IN ('standard', 'extended', 'permanent')),
            status              TEXT    NOT NULL
                CHECK (status IN ('creating', 'stored', 'deleting')),
            created_at          INTEGER NOT NULL,
            expires_at          INTEGER,
            storage_location    TEXT    NOT NULL,
            plaintext_checksum  TEXT    NOT NULL,
            size_bytes          INTEGER NOT NULL,
            archived_by         TEXT    NOT NULL,
            version             INTEGER NOT NULL,
            updated_at          INTEGER NOT NULL,
            CHECK ((retention_tier = 'permanent') = (expires_at IS NULL))
        );

        CREATE INDEX IF NOT EXISTS idx_session_archives_expiry
        ON session_archives (expires_at) WHERE expires_at IS NOT NULL;

        CREATE TRIGGER IF NOT EXISTS session_archives_immutable
        BEFORE UPDATE ON session_archives
        WHEN NEW.id IS NOT OLD.id
          OR NEW.session_id IS NOT OLD.session_id
          OR NEW.salt IS NOT OLD.salt
          OR NEW.kdf_mem_cost_kib IS NOT OLD.kdf_mem_cost_kib
          OR NEW.kdf_time_cost IS NOT OLD.kdf_time_cost
          OR NEW.kdf_parallelism IS NOT OLD.kdf_parallelism
          OR NEW.storage_location IS NOT OLD.storage_location
          OR NEW.created_at IS NOT OLD.created_at
        BEGIN
            SELECT RAISE(ABORT, 'immutable archive column');
        END;

        CREATE TRIGGER IF NOT EXISTS session_archives_no_shorten
        BEFORE UPDATE OF expires_at ON session_archives
        WHEN (OLD.expires_at IS NULL AND NEW.expires_at IS NOT NULL)
          OR NEW.expires_at < OLD.expires_at
        BEGIN
            SELECT RAISE(ABORT, 'retention shortened');
        END;",
    )
    .map_err(|e| map_db_err(&e))
}

/// Column values as read, before domain validation.
struct RawArchive {
    id: String,
    session_id: String,
    salt: Vec<u8>,
    kdf: (u32, u32, u32),
    retention_tier: String,
    status: String,
    created_at: i64,
    expires_at: Option<i64>,
    storage_location: String,
    plaintext_checksum: String,
    size_bytes: i64,
    archived_by: String,
    version: i64,
    updated_at: i64,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawArchive> {
    Ok(RawArchive {
        id: row.get(0)?,
        session_id: row.get(1)?,
        salt: row.get(2)?,
        kdf: (row.get(3)?, row.get(4)?, row.get(5)?),
        retention_tier: row.get(6)?,
        status: row.get(7)?,
        created_at: row.get(8)?,
        expires_at: row.get(9)?,
        storage_location: row.get(10)?,
        plaintext_checksum: row.get(11)?,
        size_bytes: row.get(12)?,
        archived_by: row.get(13)?,
        version: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

fn from_micros(micros: i64, column: &str) -> MetadataResult<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| MetadataError::Backend(format!("{column} out of range: {micros}")))
}

fn to_non_negative(value: i64, column: &str) -> MetadataResult<u64> {
    u64::try_from(value).map_err(|_| MetadataError::Backend(format!("negative {column}: {value}")))
}

fn to_i64(value: u64, column: &str) -> MetadataResult<i64> {
    i64::try_from(value).map_err(|_| MetadataError::Backend(format!("{column} too large: {value}")))
}

impl TryFrom<RawArchive> for Archive {
    type Error = MetadataError;

    fn try_from(raw: RawArchive) -> MetadataResult<Self> {
        let backend = |e: String| MetadataError::Backend(format!("archive {}: {e}", raw.id));
        Ok(Archive {
            salt: ArchiveSalt::from_vec(raw.salt).map_err(|e| backend(e.to_string()))?,
            kdf: KdfParams {
                mem_cost_kib: raw.kdf.0,
                time_cost: raw.kdf.1,
                parallelism: raw.kdf.2,
            },
            retention_tier: raw
                .retention_tier
                .parse::<RetentionTier>()
                .map_err(|e| backend(e.to_string()))?,
            status: raw.status.parse::<ArchiveStatus>().map_err(backend)?,
            created_at: from_micros(raw.created_at, "created_at")?,
            expires_at: raw
                .expires_at
                .map(|t| from_micros(t, "expires_at"))
                .transpose()?,
            storage_location: raw
                .storage_location
                .parse::<StorageLocation>()
                .map_err(|e| backend(e.to_string()))?,
            size_bytes: to_non_negative(raw.size_bytes, "size_bytes")?,
            version: to_non_negative(raw.version, "version")?,
            updated_at: from_micros(raw.updated_at, "updated_at")?,
            id: raw.id,
            session_id: raw.session_id,
            plaintext_checksum: raw.plaintext_checksum,
            archived_by: raw.archived_by,
        })
    }
}

fn select_one(conn: &Connection, column: &str, value: &str) -> MetadataResult<Option<Archive>> {
    let sql = format!("SELECT {COLUMNS} FROM session_archives WHERE {column} = ?1");
    conn.query_row(&sql, params![value], read_row)
        .optional()
        .map_err(|e| map_db_err(&e))?
        .map(Archive::try_from)
        .transpose()
}

fn select_many(conn: &Connection, sql: &str, bound: Option<i64>) -> MetadataResult<Vec<Archive>> {
    let mut stmt = conn.prepare(sql).map_err(|e| map_db_err(&e))?;
    let rows = match bound {
        Some(v) => stmt.query_map(params![v], read_row),
        None => stmt.query_map([], read_row),
    }
    .map_err(|e| map_db_err(&e))?
    .collect::<rusqlite::Result<Vec<_>>>()
    .map_err(|e| map_db_err(&e))?;
    rows.into_iter().map(Archive::try_from).collect()
}

fn update_in_tx(
    tx: &Transaction<'_>,
    archive: &Archive,
    expected_version: u64,
) -> MetadataResult<Archive> {
    let current = select_one(tx, "id", &archive.id)?
        .ok_or_else(|| MetadataError::NotFound(archive.id.clone()))?;

    if current.version != expected_version {
        return Err(MetadataError::VersionConflict {
            id: archive.id.clone(),
            expected: expected_version,
        });
    }
    if shortens_retention(
        current.retention_tier,
        current.expires_at,
        archive.retention_tier,
        archive.expires_at,
    ) {
        return Err(MetadataError::RetentionShortened(archive.id.clone()));
    }

    let changed = tx
        .execute(
            "UPDATE session_archives
             SET retention_tier = ?1, status = ?2, expires_at = ?3, updated_at = ?4,
                 version = version + 1
             WHERE id = ?5 AND version = ?6",
            params![
                archive.retention_tier.as_str(),
                archive.status.as_str(),
                archive.expires_at.map(|t| t.timestamp_micros()),
                archive.updated_at.timestamp_micros(),
                archive.id,
                to_i64(expected_version, "version")?,
            ],
        )
        .map_err(|e| {
            if is_constraint(&e, SHORTENED_MARKER) {
                MetadataError::RetentionShortened(archive.id.clone())
            } else {
                map_db_err(&e)
            }
        })?;
    if changed != 1 {
        return Err(MetadataError::VersionConflict {
            id: archive.id.clone(),
            expected: expected_version,
        });
    }

    select_one(tx, "id", &archive.id)?.ok_or_else(|| MetadataError::NotFound(archive.id.clone()))
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn insert(&self, archive: &Archive) -> MetadataResult<()> {
        let a = archive.clone();
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO session_archives ({COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
                ),
                params![
                    a.id,
                    a.session_id,
                    a.salt.as_bytes(),
                    a.kdf.mem_cost_kib,
                    a.kdf.time_cost,
                    a.kdf.parallelism,
                    a.retention_tier.as_str(),
                    a.status.as_str(),
                    a.created_at.timestamp_micros(),
                    a.expires_at.map(|t| t.timestamp_micros()),
                    a.storage_location.to_string(),
                    a.plaintext_checksum,
                    to_i64(a.size_bytes, "size_bytes")?,
                    a.archived_by,
                    to_i64(a.version, "version")?,
                    a.updated_at.timestamp_micros(),
                ],
            )
            .map_err(|e| {
                if is_constraint(&e, "session_archives.session_id") {
                    MetadataError::DuplicateSession(a.session_id.clone())
                } else {
                    map_db_err(&e)
                }
            })?;
            debug!(archive_id = %a.id, session_id = %a.session_id, "metadata row inserted");
            Ok(())
        })
        .await
    }

    async fn get(&self, id: &str) -> MetadataResult<Option<Archive>> {
        let id = id.to_string();
        self.with_conn(move |conn| select_one(conn, "id", &id)).await
    }

    async fn get_by_session(&self, session_id: &str) -> MetadataResult<Option<Archive>> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| select_one(conn, "session_id", &session_id))
            .await
    }

    async fn update(&self, archive: &Archive, expected_version: u64) -> MetadataResult<Archive> {
        let a = archive.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(|e| map_db_err(&e))?;
            let stored = update_in_tx(&tx, &a, expected_version)?;
            tx.commit().map_err(|e| map_db_err(&e))?;
            Ok(stored)
        })
        .await
    }

    async fn delete(&self, id: &str) -> MetadataResult<bool> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let n = conn
                .execute("DELETE FROM session_archives WHERE id = ?1", params![id])
                .map_err(|e| map_db_err(&e))?;
            Ok(n > 0)
        })
        .await
    }

    async fn list(&self) -> MetadataResult<Vec<Archive>> {
        self.with_conn(|conn| {
            select_many(
                conn,
                &format!("SELECT {COLUMNS} FROM session_archives ORDER BY created_at, id"),
                None,
            )
        })
        .await
    }

    async fn list_expiring(&self, before: DateTime<Utc>) -> MetadataResult<Vec<Archive>> {
        let cutoff = before.timestamp_micros();
        self.with_conn(move |conn| {
            select_many(
                conn,
                &format!(
                    "SELECT {COLUMNS} FROM session_archives
                     WHERE expires_at IS NOT NULL AND expires_at <= ?1
                     ORDER BY expires_at, id"
                ),
                Some(cutoff),
            )
        })
        .await
    }
}
