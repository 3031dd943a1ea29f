use super::{StoreError, Table};
use crate::fingerprint::Fingerprint;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, info};

/// how long a connection waits on a locked database before giving up
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Durable store in a single SQLite file.
///
/// Every connection of the pool runs in WAL mode, each write is a single row upsert so a
/// write transaction never spans more than one key.
pub struct SQLiteStore {
    pool: Pool<SqliteConnectionManager>,
    path: PathBuf,
    table: Table,
    sql_select: String,
    sql_insert: String,
    sql_delete: String,
    sql_count: String,
    sql_clear: String,
}

impl fmt::Debug for SQLiteStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SQLiteStore")
            .field("path", &self.path)
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

fn schema(table: &str) -> String {
    format!(
        "create table if not exists {table} (
    job text not null,
    fingerprint text not null,
    ts real not null default ((julianday('now') - 2440587.5) * 86400.0),
    value blob not null,
    primary key (job, fingerprint)
) without rowid;"
    )
}

impl SQLiteStore {
    pub fn open(path: &Path, table: Table) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let manager = SqliteConnectionManager::file(path).with_init(|connection| {
            connection.busy_timeout(BUSY_TIMEOUT)?;
            connection.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                row.get::<_, String>(0)
            })?;
            connection.pragma_update(None, "synchronous", "NORMAL")
        });

        let pool = Pool::builder()
            .max_size(num_cpus::get().max(2) as u32 + 1)
            .build(manager)?;

        let name = table.name();
        pool.get()?.execute_batch(&schema(name))?;

        info!(path = ?path, table = name, "Opened SQLite store");

        Ok(Self {
            pool,
            path: path.to_path_buf(),
            table,
            sql_select: format!("select value from {name} where job = ?1 and fingerprint = ?2"),
            sql_insert: format!(
                "insert or replace into {name} (job, fingerprint, value) values (?1, ?2, ?3)"
            ),
            sql_delete: format!("delete from {name} where job = ?1 and fingerprint = ?2"),
            sql_count: format!("select count(*) from {name}"),
            sql_clear: format!("delete from {name}"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connection(&self) -> Result<PooledConnection<SqliteConnectionManager>, StoreError> {
        Ok(self.pool.get()?)
    }

    pub fn get(&self, job: &str, key: &Fingerprint) -> Result<Option<Vec<u8>>, StoreError> {
        let connection = self.connection()?;
        let mut statement = connection.prepare_cached(&self.sql_select)?;

        Ok(statement
            .query_row(params![job, key.as_str()], |row| row.get(0))
            .optional()?)
    }

    pub fn put(&self, job: &str, key: &Fingerprint, payload: &[u8]) -> Result<(), StoreError> {
        let connection = self.connection()?;
        connection
            .prepare_cached(&self.sql_insert)?
            .execute(params![job, key.as_str(), payload])?;

        debug!(table = self.table.name(), job = job, key = key.short(), "Stored entry");

        Ok(())
    }

    pub fn remove(&self, job: &str, key: &Fingerprint) -> Result<bool, StoreError> {
        let connection = self.connection()?;
        let changed = connection
            .prepare_cached(&self.sql_delete)?
            .execute(params![job, key.as_str()])?;

        Ok(changed > 0)
    }

    pub fn contains(&self, job: &str, key: &Fingerprint) -> Result<bool, StoreError> {
        self.get(job, key).map(|entry| entry.is_some())
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        let connection = self.connection()?;
        let count: i64 = connection
            .prepare_cached(&self.sql_count)?
            .query_row([], |row| row.get(0))?;

        Ok(count.max(0) as usize)
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        self.len().map(|len| len == 0)
    }

    pub fn clear(&self) -> Result<usize, StoreError> {
        let connection = self.connection()?;
        let removed = connection.execute(&self.sql_clear, [])?;

        info!(table = self.table.name(), removed = removed, "Cleared SQLite store");

        Ok(removed)
    }
}
