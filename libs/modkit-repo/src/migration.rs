//! Schema migrations with a per-source history table and a shared coordinator.
//!
//! Each [`MigrationSource`] records its applied migrations in its own table named
//! `modkit_repo_migrations__<name>__<hash8>`, where `<hash8>` is the first eight
//! hex digits of the `xxh3_64` hash of the source name. Two sources may therefore
//! use the same migration names without clashing.
//!
//! A [`MigrationCoordinator`] shared by every unit of work of a factory makes sure
//! only one migration run is active at a time. A second caller does not wait; it
//! gets [`MigrationOutcome::AlreadyRunning`].

use std::collections::HashSet;
use std::marker::PhantomData;

use sea_orm::{
    ConnectionTrait, DatabaseBackend, DbErr, ExecResult, FromQueryResult, Statement,
    TransactionTrait,
};
use sea_orm_migration::{MigrationTrait, MigratorTrait, SchemaManager};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use xxhash_rust::xxh3::xxh3_64;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("failed to create migration table for '{scope}': {source}")]
    CreateTable { scope: String, source: DbErr },

    #[error("failed to query migration history for '{scope}': {source}")]
    QueryHistory { scope: String, source: DbErr },

    #[error("migration '{migration}' failed for '{scope}': {source}")]
    MigrationFailed {
        scope: String,
        migration: String,
        source: DbErr,
    },

    #[error("failed to record migration '{migration}' for '{scope}': {source}")]
    RecordFailed {
        scope: String,
        migration: String,
        source: DbErr,
    },

    #[error("duplicate migration name '{name}' for '{scope}'")]
    DuplicateMigrationName { scope: String, name: String },
}

/// A named, ordered set of migrations.
pub trait MigrationSource: Send + Sync {
    /// Identifies the history table; keep it stable across releases.
    fn name(&self) -> &str;

    fn migrations(&self) -> Vec<Box<dyn MigrationTrait>>;
}

/// Adapts a `sea-orm-migration` migrator.
///
/// ```ignore
/// let source = MigratorSource::<crate::migrations::Migrator>::new("billing");
/// uow.update_database(&source).await?;
/// ```
pub struct MigratorSource<M> {
    name: String,
    _migrator: PhantomData<fn() -> M>,
}

impl<M> MigratorSource<M> {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _migrator: PhantomData,
        }
    }
}

impl<M: MigratorTrait> MigrationSource for MigratorSource<M> {
    fn name(&self) -> &str {
        &self.name
    }

    fn migrations(&self) -> Vec<Box<dyn MigrationTrait>> {
        M::migrations()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    Applied {
        /// Names applied by this run, in order.
        applied: Vec<String>,
        /// Migrations found already applied.
        skipped: usize,
    },
    /// Another run held the coordinator; nothing was done.
    AlreadyRunning,
}

/// Process-wide guard around migration runs.
///
/// Share one instance (behind an `Arc`) between everything that may migrate the
/// same database.
#[derive(Debug, Default)]
pub struct MigrationCoordinator {
    running: Mutex<()>,
}

impl MigrationCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    /// Apply the pending migrations of `source`, or return at once if a run is active.
    ///
    /// # Errors
    /// The first failure; migrations applied before it stay applied.
    pub async fn run<C>(
        &self,
        conn: &C,
        source: &dyn MigrationSource,
    ) -> Result<MigrationOutcome, MigrationError>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let Ok(_guard) = self.running.try_lock() else {
            info!(source = source.name(), "Migration already running, skipping");
            return Ok(MigrationOutcome::AlreadyRunning);
        };
        apply(conn, source.name(), source.migrations()).await
    }
}

#[derive(Debug, FromQueryResult)]
struct MigrationRecord {
    version: String,
}

/// Keep `[a-zA-Z0-9_]`, replace everything else with `_`.
fn sanitize_name(name: &str) -> String {
    let out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.is_empty() { "_".to_owned() } else { out }
}

/// `modkit_repo_migrations__<sanitized>__<hash8>`, capped at 63 bytes for Postgres.
pub(crate) fn history_table_name(name: &str) -> String {
    const PREFIX: &str = "modkit_repo_migrations__";
    const SEP: &str = "__";
    const HASH_LEN: usize = 8;
    const PG_IDENT_MAX: usize = 63;

    let mut sanitized = sanitize_name(name);
    let hash = format!("{:016x}", xxh3_64(name.as_bytes()));
    let max_len = PG_IDENT_MAX.saturating_sub(PREFIX.len() + SEP.len() + HASH_LEN);
    sanitized.truncate(max_len);

    format!("{PREFIX}{sanitized}{SEP}{}", &hash[..HASH_LEN])
}

fn quote(backend: DatabaseBackend, table: &str) -> String {
    match backend {
        DatabaseBackend::MySql => format!("`{table}`"),
        DatabaseBackend::Postgres | DatabaseBackend::Sqlite => format!("\"{table}\""),
    }
}

async fn ensure_history_table(
    conn: &impl ConnectionTrait,
    table: &str,
    scope: &str,
) -> Result<(), MigrationError> {
    let backend = conn.get_database_backend();
    let quoted = quote(backend, table);
    let columns = match backend {
        DatabaseBackend::Postgres => {
            "version VARCHAR(255) PRIMARY KEY, applied_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP"
        }
        DatabaseBackend::MySql => {
            "version VARCHAR(255) PRIMARY KEY, applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP"
        }
        DatabaseBackend::Sqlite => {
            "version TEXT PRIMARY KEY, applied_at TEXT NOT NULL DEFAULT (datetime('now'))"
        }
    };
    let sql = format!("CREATE TABLE IF NOT EXISTS {quoted} ({columns})");

    conn.execute(Statement::from_string(backend, sql))
        .await
        .map_err(|source| MigrationError::CreateTable {
            scope: scope.to_owned(),
            source,
        })?;
    Ok(())
}

async fn applied_versions(
    conn: &impl ConnectionTrait,
    table: &str,
    scope: &str,
) -> Result<HashSet<String>, MigrationError> {
    let backend = conn.get_database_backend();
    let sql = format!("SELECT version FROM {}", quote(backend, table));

    let records = MigrationRecord::find_by_statement(Statement::from_string(backend, sql))
        .all(conn)
        .await
        .map_err(|source| MigrationError::QueryHistory {
            scope: scope.to_owned(),
            source,
        })?;
    Ok(records.into_iter().map(|r| r.version).collect())
}

async fn record_version(
    conn: &impl ConnectionTrait,
    table: &str,
    scope: &str,
    migration: &str,
) -> Result<ExecResult, MigrationError> {
    let backend = conn.get_database_backend();
    let placeholder = if backend == DatabaseBackend::Postgres { "$1" } else { "?" };
    let sql = format!(
        "INSERT INTO {} (version) VALUES ({placeholder})",
        quote(backend, table)
    );

    conn.execute(Statement::from_sql_and_values(backend, &sql, [migration.into()]))
        .await
        .map_err(|source| MigrationError::RecordFailed {
            scope: scope.to_owned(),
            migration: migration.to_owned(),
            source,
        })
}

async fn history_exists(
    conn: &impl ConnectionTrait,
    table: &str,
    scope: &str,
) -> Result<bool, MigrationError> {
    let backend = conn.get_database_backend();
    let sql = match backend {
        DatabaseBackend::Postgres | DatabaseBackend::MySql => format!(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = '{table}'"
        ),
        DatabaseBackend::Sqlite => format!(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = '{table}'"
        ),
    };
    let row = conn
        .query_one(Statement::from_string(backend, sql))
        .await
        .map_err(|source| MigrationError::QueryHistory {
            scope: scope.to_owned(),
            source,
        })?;
    Ok(row
        .and_then(|r| r.try_get_by_index::<i64>(0).ok())
        .is_some_and(|n| n > 0))
}

/// Apply `migrations` in name order, each together with its history record in
/// one transaction.
async fn apply<C>(
    conn: &C,
    scope: &str,
    migrations: Vec<Box<dyn MigrationTrait>>,
) -> Result<MigrationOutcome, MigrationError>
where
    C: ConnectionTrait + TransactionTrait,
{
    if migrations.is_empty() {
        debug!(source = scope, "No migrations to run");
        return Ok(MigrationOutcome::Applied {
            applied: Vec::new(),
            skipped: 0,
        });
    }

    let mut seen = HashSet::new();
    for m in &migrations {
        if !seen.insert(m.name().to_owned()) {
            return Err(MigrationError::DuplicateMigrationName {
                scope: scope.to_owned(),
                name: m.name().to_owned(),
            });
        }
    }

    let table = history_table_name(scope);
    ensure_history_table(conn, &table, scope).await?;
    let done = applied_versions(conn, &table, scope).await?;

    let mut migrations = migrations;
    migrations.sort_by(|a, b| a.name().cmp(b.name()));

    let mut applied = Vec::new();
    let mut skipped = 0;
    for migration in migrations {
        let name = migration.name().to_owned();
        if done.contains(&name) {
            debug!(source = scope, migration = %name, "Migration already applied, skipping");
            skipped += 1;
            continue;
        }

        info!(source = scope, migration = %name, "Applying migration");
        let failed = |source: DbErr| MigrationError::MigrationFailed {
            scope: scope.to_owned(),
            migration: name.clone(),
            source,
        };

        let txn = conn.begin().await.map_err(failed)?;
        let res = async {
            migration
                .up(&SchemaManager::new(&txn))
                .await
                .map_err(failed)?;
            record_version(&txn, &table, scope, &name).await?;
            Ok::<_, MigrationError>(())
        }
        .await;

        match res {
            Ok(()) => txn.commit().await.map_err(failed)?,
            Err(err) => {
                if let Err(rb) = txn.rollback().await {
                    warn!(
                        source = scope,
                        migration = %name,
                        error = %rb,
                        "Rollback after failed migration failed"
                    );
                }
                return Err(err);
            }
        }
        applied.push(name);
    }

    info!(
        source = scope,
        applied = applied.len(),
        skipped,
        "Migration run complete"
    );
    Ok(MigrationOutcome::Applied { applied, skipped })
}

/// Names of the migrations of `source` that are not recorded as applied.
///
/// # Errors
/// Errors reading the history table.
pub async fn pending(
    conn: &impl ConnectionTrait,
    source: &dyn MigrationSource,
) -> Result<Vec<String>, MigrationError> {
    let scope = source.name();
    let mut names: Vec<String> = source
        .migrations()
        .iter()
        .map(|m| m.name().to_owned())
        .collect();
    names.sort();

    let table = history_table_name(scope);
    if names.is_empty() || !history_exists(conn, &table, scope).await? {
        return Ok(names);
    }
    let done = applied_versions(conn, &table, scope).await?;
    names.retain(|n| !done.contains(n));
    Ok(names)
}
