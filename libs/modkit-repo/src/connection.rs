//! Pooled connections wrapped into a `SeaORM` [`DatabaseConnection`].

use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection};
use tracing::info;

use crate::config::{PoolCfg, RepositoryConfig, redact_dsn};
use crate::error::{RepoError, RepoResult};

/// Supported engines.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Engine {
    Postgres,
    MySql,
    Sqlite,
}

impl Engine {
    /// Detect the engine from the DSN scheme.
    ///
    /// # Errors
    /// Returns [`RepoError::UnknownScheme`] for anything other than
    /// `postgres://`, `postgresql://`, `mysql://` or `sqlite:`.
    pub fn detect(dsn: &str) -> RepoResult<Self> {
        let s = dsn.trim_start();
        if s.starts_with("postgres://") || s.starts_with("postgresql://") {
            Ok(Self::Postgres)
        } else if s.starts_with("mysql://") {
            Ok(Self::MySql)
        } else if s.starts_with("sqlite:") {
            Ok(Self::Sqlite)
        } else {
            Err(RepoError::UnknownScheme(redact_dsn(dsn)))
        }
    }

    #[must_use]
    pub fn backend(self) -> DatabaseBackend {
        match self {
            Self::Postgres => DatabaseBackend::Postgres,
            Self::MySql => DatabaseBackend::MySql,
            Self::Sqlite => DatabaseBackend::Sqlite,
        }
    }

    fn from_backend(backend: DatabaseBackend) -> Self {
        match backend {
            DatabaseBackend::Postgres => Self::Postgres,
            DatabaseBackend::MySql => Self::MySql,
            DatabaseBackend::Sqlite => Self::Sqlite,
        }
    }
}

/// Applies [`PoolCfg`] to a sqlx pool builder.
pub trait ApplyPoolOpts {
    #[must_use]
    fn apply(self, opts: &PoolCfg) -> Self;
}

macro_rules! impl_apply_pool_opts {
    ($feature:literal, $ty:ty) => {
        #[cfg(feature = $feature)]
        impl ApplyPoolOpts for $ty {
            fn apply(mut self, opts: &PoolCfg) -> Self {
                if let Some(n) = opts.max_conns {
                    self = self.max_connections(n);
                }
                if let Some(n) = opts.min_conns {
                    self = self.min_connections(n);
                }
                if let Some(t) = opts.acquire_timeout {
                    self = self.acquire_timeout(t);
                }
                if let Some(t) = opts.idle_timeout {
                    self = self.idle_timeout(t);
                }
                if let Some(t) = opts.max_lifetime {
                    self = self.max_lifetime(t);
                }
                if opts.test_before_acquire {
                    self = self.test_before_acquire(true);
                }
                self
            }
        }
    };
}

impl_apply_pool_opts!("pg", sea_orm::sqlx::postgres::PgPoolOptions);
impl_apply_pool_opts!("mysql", sea_orm::sqlx::mysql::MySqlPoolOptions);
impl_apply_pool_opts!("sqlite", sea_orm::sqlx::sqlite::SqlitePoolOptions);

/// A connected database: engine, redacted DSN and the `SeaORM` connection.
#[derive(Clone, Debug)]
pub struct DbHandle {
    engine: Engine,
    dsn: String,
    conn: DatabaseConnection,
}

impl DbHandle {
    /// Open a pool for `cfg.dsn` with `cfg.pool` applied.
    ///
    /// # Errors
    /// Fails when the scheme is unknown, its driver feature is disabled, or the
    /// pool cannot be established.
    pub async fn connect(cfg: &RepositoryConfig) -> RepoResult<Self> {
        let engine = Engine::detect(&cfg.dsn)?;
        let dsn = cfg.dsn.as_str();
        let conn = match engine {
            #[cfg(feature = "pg")]
            Engine::Postgres => {
                let pool = sea_orm::sqlx::postgres::PgPoolOptions::new()
                    .apply(&cfg.pool)
                    .connect(dsn)
                    .await?;
                sea_orm::SqlxPostgresConnector::from_sqlx_postgres_pool(pool)
            }
            #[cfg(not(feature = "pg"))]
            Engine::Postgres => return Err(RepoError::FeatureDisabled("PostgreSQL feature not enabled")),
            #[cfg(feature = "mysql")]
            Engine::MySql => {
                let pool = sea_orm::sqlx::mysql::MySqlPoolOptions::new()
                    .apply(&cfg.pool)
                    .connect(dsn)
                    .await?;
                sea_orm::SqlxMySqlConnector::from_sqlx_mysql_pool(pool)
            }
            #[cfg(not(feature = "mysql"))]
            Engine::MySql => return Err(RepoError::FeatureDisabled("MySQL feature not enabled")),
            #[cfg(feature = "sqlite")]
            Engine::Sqlite => {
                let mut opts = sea_orm::sqlx::sqlite::SqlitePoolOptions::new().apply(&cfg.pool);
                if is_memory_dsn(dsn) {
                    // Every connection to :memory: is a separate database.
                    opts = opts.max_connections(1).min_connections(1).idle_timeout(None).max_lifetime(None);
                }
                let pool = opts.connect(dsn).await?;
                sea_orm::SqlxSqliteConnector::from_sqlx_sqlite_pool(pool)
            }
            #[cfg(not(feature = "sqlite"))]
            Engine::Sqlite => return Err(RepoError::FeatureDisabled("SQLite feature not enabled")),
        };

        let redacted = redact_dsn(dsn);
        info!(engine = ?engine, dsn = %redacted, "Database connection established");
        Ok(Self {
            engine,
            dsn: redacted,
            conn,
        })
    }

    /// Adopt an already configured `SeaORM` connection.
    #[must_use]
    pub fn from_connection(conn: DatabaseConnection) -> Self {
        let engine = Engine::from_backend(conn.get_database_backend());
        Self {
            engine,
            dsn: String::new(),
            conn,
        }
    }

    #[must_use]
    pub fn engine(&self) -> Engine {
        self.engine
    }

    /// Redacted DSN, empty when the handle was built from a connection.
    #[must_use]
    pub fn dsn(&self) -> &str {
        &self.dsn
    }

    #[must_use]
    pub fn conn(&self) -> &DatabaseConnection {
        &self.conn
    }
}

fn is_memory_dsn(dsn: &str) -> bool {
    dsn.contains(":memory:") || dsn.contains("mode=memory")
}
