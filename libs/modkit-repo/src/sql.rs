//! Raw SQL execution on a unit of work.
//!
//! Every statement goes through the unit of work's executor, so it joins the
//! open transaction. Parameters are positional; write placeholders the way the
//! backend expects them (`$1, $2` on Postgres, `?` elsewhere).

use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;
use sea_orm::{
    ConnectionTrait, DatabaseBackend, DbErr, EntityTrait, FromQueryResult, QueryResult,
    Statement, TryGetable, Value,
};
use tracing::{Instrument, debug, warn};

use crate::error::{RepoError, RepoResult};
use crate::unit_of_work::UnitOfWork;

/// Parameters and options of one raw statement.
///
/// ```ignore
/// let cfg = SqlConfig::new()
///     .param(tenant_id)
///     .tag("purge-expired")
///     .command_timeout(Duration::from_secs(5));
/// let removed = uow
///     .execute_non_query("DELETE FROM sessions WHERE tenant_id = $1", &cfg)
///     .await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct SqlConfig {
    params: Vec<Value>,
    tag: Option<String>,
    command_timeout: Option<Duration>,
}

impl SqlConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn param(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    #[must_use]
    pub fn params<V: Into<Value>>(mut self, values: impl IntoIterator<Item = V>) -> Self {
        self.params.extend(values.into_iter().map(Into::into));
        self
    }

    /// Prepended to the statement as an SQL comment.
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Overrides the unit of work's `command_timeout`.
    #[must_use]
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn get_params(&self) -> &[Value] {
        &self.params
    }

    pub(crate) fn statement(&self, backend: DatabaseBackend, sql: &str) -> Statement {
        let sql = match self.tag.as_deref() {
            Some(tag) => {
                let tag = tag.replace(['\r', '\n'], " ");
                format!("-- {tag}\n\n{sql}")
            }
            None => sql.to_owned(),
        };
        Statement::from_sql_and_values(backend, sql, self.params.clone())
    }

    fn span(&self) -> tracing::Span {
        tracing::debug_span!(
            "modkit_repo.sql",
            tag = self.tag.as_deref().unwrap_or_default()
        )
    }
}

/// `$1, $2, ...` on Postgres, `?, ?, ...` elsewhere.
pub(crate) fn placeholders(backend: DatabaseBackend, count: usize) -> String {
    (1..=count)
        .map(|i| match backend {
            DatabaseBackend::Postgres => format!("${i}"),
            DatabaseBackend::MySql | DatabaseBackend::Sqlite => "?".to_owned(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Routine names are interpolated into the statement, so only plain
/// (optionally schema-qualified) identifiers are accepted.
fn routine_name(name: &str) -> RepoResult<&str> {
    let valid = !name.is_empty()
        && name.split('.').all(|part| {
            part.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
    if valid {
        Ok(name)
    } else {
        Err(RepoError::InvalidParameter(format!(
            "'{name}' is not a valid routine name"
        )))
    }
}

impl UnitOfWork {
    fn command_timeout(&self, cfg: &SqlConfig) -> Duration {
        cfg.command_timeout.unwrap_or(self.config().command_timeout)
    }

    async fn timed<T, F>(&self, cfg: &SqlConfig, fut: F) -> RepoResult<T>
    where
        F: Future<Output = Result<T, DbErr>>,
    {
        let limit = self.command_timeout(cfg);
        match tokio::time::timeout(limit, fut.instrument(cfg.span())).await {
            Ok(res) => Ok(res?),
            Err(_) => {
                warn!(timeout = ?limit, tag = cfg.tag.as_deref(), "Command timed out");
                Err(RepoError::Timeout(limit))
            }
        }
    }

    /// Run a query and map each row with `map`.
    ///
    /// # Errors
    /// Database errors, mapping errors or [`RepoError::Timeout`].
    pub async fn execute_raw_sql<T, F>(
        &self,
        sql: &str,
        cfg: &SqlConfig,
        mut map: F,
    ) -> RepoResult<Vec<T>>
    where
        F: FnMut(&QueryResult) -> Result<T, DbErr>,
    {
        let rows = {
            let db = self.executor().await;
            let stmt = cfg.statement(db.get_database_backend(), sql);
            self.timed(cfg, db.query_all(stmt)).await?
        };
        Ok(rows.iter().map(&mut map).collect::<Result<_, _>>()?)
    }

    /// Run a query and decode rows into `T`.
    ///
    /// # Errors
    /// Database errors or [`RepoError::Timeout`].
    pub async fn execute_query_as<T: FromQueryResult>(
        &self,
        sql: &str,
        cfg: &SqlConfig,
    ) -> RepoResult<Vec<T>> {
        let db = self.executor().await;
        let stmt = cfg.statement(db.get_database_backend(), sql);
        self.timed(cfg, T::find_by_statement(stmt).all(&db)).await
    }

    /// Run a query that returns rows of entity `E`.
    ///
    /// # Errors
    /// Database errors or [`RepoError::Timeout`].
    pub async fn execute_query<E: EntityTrait>(
        &self,
        sql: &str,
        cfg: &SqlConfig,
    ) -> RepoResult<Vec<E::Model>> {
        let db = self.executor().await;
        let stmt = cfg.statement(db.get_database_backend(), sql);
        self.timed(cfg, E::find().from_raw_sql(stmt).all(&db)).await
    }

    /// Run a statement and return the rows it affected.
    ///
    /// # Errors
    /// Database errors or [`RepoError::Timeout`].
    pub async fn execute_non_query(&self, sql: &str, cfg: &SqlConfig) -> RepoResult<u64> {
        let db = self.executor().await;
        let stmt = cfg.statement(db.get_database_backend(), sql);
        let res = self.timed(cfg, db.execute(stmt)).await?;
        debug!(rows_affected = res.rows_affected(), "Executed statement");
        Ok(res.rows_affected())
    }

    /// First column of the first row as an integer; 0 when there is no row or it is NULL.
    ///
    /// # Errors
    /// Database errors, a non-integer column or [`RepoError::Timeout`].
    pub async fn execute_command(&self, sql: &str, cfg: &SqlConfig) -> RepoResult<i64> {
        let db = self.executor().await;
        let stmt = cfg.statement(db.get_database_backend(), sql);
        let row = self.timed(cfg, db.query_one(stmt)).await?;
        match row {
            Some(row) => Ok(row.try_get_by_index::<Option<i64>>(0)?.unwrap_or(0)),
            None => Ok(0),
        }
    }

    /// Call a scalar function: `SELECT name(p1, ...) AS result`.
    ///
    /// # Errors
    /// An invalid name, database errors or [`RepoError::Timeout`].
    pub async fn execute_function<T: TryGetable>(
        &self,
        name: &str,
        cfg: &SqlConfig,
    ) -> RepoResult<Option<T>> {
        let name = routine_name(name)?;
        let db = self.executor().await;
        let backend = db.get_database_backend();
        let sql = format!(
            "SELECT {name}({}) AS result",
            placeholders(backend, cfg.params.len())
        );
        let row = self.timed(cfg, db.query_one(cfg.statement(backend, &sql))).await?;
        match row {
            Some(row) => Ok(row.try_get::<Option<T>>("", "result")?),
            None => Ok(None),
        }
    }

    /// Call a stored procedure: `CALL name(p1, ...)`.
    ///
    /// # Errors
    /// [`RepoError::Unsupported`] on `SQLite`, an invalid name, database errors or
    /// [`RepoError::Timeout`].
    pub async fn execute_procedure(&self, name: &str, cfg: &SqlConfig) -> RepoResult<u64> {
        let name = routine_name(name)?;
        let db = self.executor().await;
        let backend = db.get_database_backend();
        if backend == DatabaseBackend::Sqlite {
            return Err(RepoError::Unsupported(
                "stored procedures are not available on SQLite".to_owned(),
            ));
        }
        let sql = format!("CALL {name}({})", placeholders(backend, cfg.params.len()));
        let res = self.timed(cfg, db.execute(cfg.statement(backend, &sql))).await?;
        debug!(procedure = name, rows_affected = res.rows_affected(), "Called procedure");
        Ok(res.rows_affected())
    }

    /// Run `op` in a transaction of its own, retrying transient failures.
    ///
    /// Up to `retry.max_attempts` attempts are made, sleeping `retry.backoff`
    /// times the attempt number between them. When a transaction is already open
    /// `op` runs once inside it, because a retry cannot replay the outer work.
    ///
    /// ```ignore
    /// let moved = uow.execute_transaction(|uow| Box::pin(async move {
    ///     uow.execute_non_query(DEBIT, &debit).await?;
    ///     uow.execute_non_query(CREDIT, &credit).await
    /// })).await?;
    /// ```
    ///
    /// # Errors
    /// The last error of `op`, or database errors opening or committing.
    pub async fn execute_transaction<T, F>(&self, op: F) -> RepoResult<T>
    where
        F: for<'a> Fn(&'a UnitOfWork) -> BoxFuture<'a, RepoResult<T>> + Send + Sync,
        T: Send,
    {
        if self.in_transaction().await {
            return op(self).await;
        }
        let retry = &self.config().retry;
        let max_attempts = retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let res = self.attempt(&op).await;
            match res {
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = retry.backoff * attempt;
                    warn!(attempt, max_attempts, delay = ?delay, error = %e, "Transient failure, retrying transaction");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn attempt<T, F>(&self, op: &F) -> RepoResult<T>
    where
        F: for<'a> Fn(&'a UnitOfWork) -> BoxFuture<'a, RepoResult<T>> + Send + Sync,
        T: Send,
    {
        self.begin_transaction().await?;
        match op(self).await {
            Ok(value) => {
                self.commit_transaction().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rb) = self.rollback_transaction().await {
                    warn!(error = %rb, "Rollback after failed attempt failed");
                }
                Err(e)
            }
        }
    }
}
