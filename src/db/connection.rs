//! Store opening and connection management
//!
//! One SQLite file per managed project. Several processes (an API server and a
//! scheduler loop, say) may open the same file at once, so everything done on
//! open is idempotent: `CREATE ... IF NOT EXISTS`, a journal mode that is a
//! no-op when already set, and check-then-act migrations.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;
use tracing::{info, warn};

use super::filesystem::{platform_classifier, FilesystemClassifier, FsKind};
use super::migrations::{self, MigrationReport};
use super::schema::BASE_SCHEMA;
use crate::config::StoreConfig;
use crate::error::{is_busy, Result};

/// Pooled connection; returned to the pool on drop.
pub type DbConn = PooledConnection<SqliteConnectionManager>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    /// Write-ahead log: readers proceed while one writer commits.
    Wal,
    /// Rollback journal: all access serialised, safe on network mounts.
    Delete,
}

impl JournalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            JournalMode::Wal => "wal",
            JournalMode::Delete => "delete",
        }
    }

    /// Map SQLite's reported mode. The other rollback-journal variants
    /// (`truncate`, `persist`, `memory`, `off`) count as `Delete`.
    pub fn from_reported(mode: &str) -> Self {
        if mode.eq_ignore_ascii_case("wal") {
            JournalMode::Wal
        } else {
            JournalMode::Delete
        }
    }
}

impl fmt::Display for JournalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Location of the store for `project_dir`.
pub fn store_path(project_dir: &Path, config: &StoreConfig) -> PathBuf {
    project_dir.join(&config.database_file)
}

/// Handle to an opened, migrated project store.
#[derive(Clone)]
pub struct Store {
    pool: Pool<SqliteConnectionManager>,
    path: PathBuf,
    fs_kind: FsKind,
    journal_mode: JournalMode,
    migration: MigrationReport,
}

impl Store {
    /// Open the store under `project_dir` and bring its schema up to date.
    pub fn open<P: AsRef<Path>>(project_dir: P, config: &StoreConfig) -> Result<Self> {
        let classifier = platform_classifier();
        Self::open_with(project_dir.as_ref(), config, classifier.as_ref())
    }

    /// Like [`Store::open`] with an explicit filesystem classifier.
    pub fn open_with(
        project_dir: &Path,
        config: &StoreConfig,
        classifier: &dyn FilesystemClassifier,
    ) -> Result<Self> {
        std::fs::create_dir_all(project_dir)?;

        let fs_kind = classifier.classify(project_dir);
        let journal_mode = config.journal_mode.resolve(fs_kind);
        let path = store_path(project_dir, config);

        let busy_timeout = config.busy_timeout();
        let journal_mode = prepare_file(&path, journal_mode, busy_timeout)?;

        let manager = SqliteConnectionManager::file(&path).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.execute_batch("PRAGMA foreign_keys = ON;")
        });
        let pool = Pool::builder()
            .max_size(config.pool_size.max(1))
            .connection_timeout(busy_timeout.max(Duration::from_secs(1)))
            .build(manager)?;

        let mut conn = pool.get()?;
        let migration = migrations::run(&mut conn)?;
        drop(conn);

        let store = Self {
            pool,
            path,
            fs_kind,
            journal_mode,
            migration,
        };

        info!(
            "Store opened at {:?} ({} filesystem, journal_mode={}, schema v{})",
            store.path,
            fs_kind.as_str(),
            store.journal_mode()?,
            store.migration.schema_version
        );

        Ok(store)
    }

    /// Run the migration sequence. Safe to call repeatedly and concurrently.
    pub fn migrate(&self) -> Result<MigrationReport> {
        let mut conn = self.conn()?;
        migrations::run(&mut conn)
    }

    /// What the migrator did while this handle was being opened
    pub fn migration_report(&self) -> &MigrationReport {
        &self.migration
    }

    /// Get a pooled connection
    pub fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    /// Run `f` in an IMMEDIATE transaction: commit on `Ok`, roll back otherwise.
    ///
    /// The write lock is taken up front so a busy store fails here, within the
    /// lock-wait budget, instead of midway through `f`.
    pub fn with_tx<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Get the store file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Classification of the project directory at open time
    pub fn fs_kind(&self) -> FsKind {
        self.fs_kind
    }

    /// Journal mode the file was in once open finished
    pub fn durability(&self) -> JournalMode {
        self.journal_mode
    }

    /// Journal mode as SQLite reports it
    pub fn journal_mode(&self) -> Result<String> {
        let conn = self.conn()?;
        let mode: String = conn.pragma_query_value(None, "journal_mode", |row| row.get(0))?;
        Ok(mode.to_lowercase())
    }

    /// Lock-wait budget configured on pooled connections
    pub fn busy_timeout(&self) -> Result<Duration> {
        let conn = self.conn()?;
        let millis: i64 = conn.pragma_query_value(None, "busy_timeout", |row| row.get(0))?;
        Ok(Duration::from_millis(millis.max(0) as u64))
    }

    /// `PRAGMA user_version` as written by the migrator
    pub fn schema_version(&self) -> Result<u32> {
        let conn = self.conn()?;
        let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        Ok(version.max(0) as u32)
    }

    /// Check if the store is accessible (for health checks)
    pub fn health_check(&self) -> bool {
        let check = self.conn().and_then(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(Into::into)
        });
        match check {
            Ok(_) => true,
            Err(e) => {
                warn!("Store health check failed: {}", e);
                false
            }
        }
    }
}

/// Set the journal mode and create the base tables on a dedicated connection,
/// before any pooled connection has the file open. Returns the mode the file
/// is actually in.
///
/// Leaving WAL needs exclusive access, so the switch can run out of lock-wait
/// budget while another process holds the store open. That is not fatal: the
/// store keeps whatever mode it is in.
fn prepare_file(path: &Path, mode: JournalMode, busy_timeout: Duration) -> Result<JournalMode> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;

    let switched: rusqlite::Result<String> =
        conn.pragma_update_and_check(None, "journal_mode", mode.as_str(), |row| row.get(0));
    let reported: String = match switched {
        Ok(reported) => reported,
        Err(e) if is_busy(&e) => {
            warn!(
                "Could not switch {:?} to journal_mode={} while it is in use: {}",
                path, mode, e
            );
            conn.pragma_query_value(None, "journal_mode", |row| row.get(0))?
        }
        Err(e) => return Err(e.into()),
    };

    let actual = JournalMode::from_reported(&reported);
    if actual != mode {
        warn!(
            "Requested journal_mode={} for {:?} but SQLite kept {}",
            mode, path, reported
        );
    }

    conn.execute_batch(BASE_SCHEMA)?;
    Ok(actual)
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("fs_kind", &self.fs_kind)
            .field("journal_mode", &self.journal_mode)
            .field("schema_version", &self.migration.schema_version)
            .finish()
    }
}
