//! Connection view used for every statement a unit of work issues.

use sea_orm::{
    ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, DbErr, ExecResult,
    QueryResult, Statement,
};
use tokio::sync::MutexGuard;

/// Routes statements to the open transaction, or to the pool when there is none.
///
/// Holding an `Executor` holds the unit of work's transaction slot, so calls on a
/// single unit of work are serialized. Never keep one across another call into
/// the same unit of work.
pub struct Executor<'a> {
    conn: &'a DatabaseConnection,
    tx: MutexGuard<'a, Option<DatabaseTransaction>>,
}

impl<'a> Executor<'a> {
    pub(crate) fn new(
        conn: &'a DatabaseConnection,
        tx: MutexGuard<'a, Option<DatabaseTransaction>>,
    ) -> Self {
        Self { conn, tx }
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    /// The open transaction, for code that talks to SeaORM directly.
    #[must_use]
    pub fn transaction(&self) -> Option<&DatabaseTransaction> {
        self.tx.as_ref()
    }
}

#[async_trait::async_trait]
impl ConnectionTrait for Executor<'_> {
    fn get_database_backend(&self) -> DbBackend {
        self.conn.get_database_backend()
    }

    async fn execute(&self, stmt: Statement) -> Result<ExecResult, DbErr> {
        match self.tx.as_ref() {
            Some(tx) => tx.execute(stmt).await,
            None => self.conn.execute(stmt).await,
        }
    }

    async fn execute_unprepared(&self, sql: &str) -> Result<ExecResult, DbErr> {
        match self.tx.as_ref() {
            Some(tx) => tx.execute_unprepared(sql).await,
            None => self.conn.execute_unprepared(sql).await,
        }
    }

    async fn query_one(&self, stmt: Statement) -> Result<Option<QueryResult>, DbErr> {
        match self.tx.as_ref() {
            Some(tx) => tx.query_one(stmt).await,
            None => self.conn.query_one(stmt).await,
        }
    }

    async fn query_all(&self, stmt: Statement) -> Result<Vec<QueryResult>, DbErr> {
        match self.tx.as_ref() {
            Some(tx) => tx.query_all(stmt).await,
            None => self.conn.query_all(stmt).await,
        }
    }

    fn support_returning(&self) -> bool {
        self.conn.support_returning()
    }

    fn is_mock_connection(&self) -> bool {
        self.conn.is_mock_connection()
    }
}
