use std::fmt;
use std::time::Duration;

use sea_orm::DbErr;
use thiserror::Error;

use crate::migration::MigrationError;

/// Errors produced by repositories, sets and the unit of work.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error(transparent)]
    Db(#[from] DbErr),

    #[error("no '{entity}' row matched")]
    NotFound { entity: String },

    #[error("more than one '{entity}' row matched where exactly one was expected")]
    MultipleResults { entity: String },

    #[error("bulk update requires at least one column assignment")]
    EmptyUpdate,

    #[error("entity '{entity}' has no column '{column}'")]
    UnknownColumn { entity: String, column: String },

    #[error("invalid sort expression: {0}")]
    InvalidSort(String),

    #[error("command exceeded timeout of {0:?}")]
    Timeout(Duration),

    #[error("operation cancelled")]
    Cancelled,

    #[error("not supported by this backend: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("unknown DSN scheme: {0}")]
    UnknownScheme(String),

    #[error("feature not enabled: {0}")]
    FeatureDisabled(&'static str),

    #[error("environment variable error: {0}")]
    Env(#[from] std::env::VarError),

    #[cfg(any(feature = "pg", feature = "mysql", feature = "sqlite"))]
    #[error(transparent)]
    Sqlx(#[from] sea_orm::sqlx::Error),
}

impl RepoError {
    pub(crate) fn not_found(entity: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
        }
    }

    pub(crate) fn multiple(entity: impl Into<String>) -> Self {
        Self::MultipleResults {
            entity: entity.into(),
        }
    }

    /// Whether retrying the whole operation may succeed.
    ///
    /// Connection drops and pool acquisition timeouts are transient; constraint
    /// violations, missing rows and query errors are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Db(e) => matches!(e, DbErr::Conn(_) | DbErr::ConnectionAcquire(_)),
            #[cfg(any(feature = "pg", feature = "mysql", feature = "sqlite"))]
            Self::Sqlx(e) => matches!(
                e,
                sea_orm::sqlx::Error::Io(_)
                    | sea_orm::sqlx::Error::PoolTimedOut
                    | sea_orm::sqlx::Error::PoolClosed
            ),
            Self::Timeout(_) => true,
            _ => false,
        }
    }

    /// True when a staged update or delete found no row to act on.
    ///
    /// This is how an optimistic-concurrency conflict surfaces through `SeaORM`.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Db(DbErr::RecordNotUpdated | DbErr::RecordNotFound(_)))
    }
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Error returned from closures run by [`crate::UnitOfWork::transaction`].
///
/// Keeps the caller's domain error apart from database failures so that a
/// domain rejection is never confused with an infrastructure problem.
#[derive(Debug)]
pub enum TxError<E> {
    Domain(E),
    Infra(RepoError),
}

impl<E> TxError<E> {
    /// Collapse into the domain error type, mapping infrastructure failures.
    pub fn into_domain<F>(self, map_infra: F) -> E
    where
        F: FnOnce(RepoError) -> E,
    {
        match self {
            Self::Domain(e) => e,
            Self::Infra(e) => map_infra(e),
        }
    }

    #[must_use]
    pub fn is_domain(&self) -> bool {
        matches!(self, Self::Domain(_))
    }
}

impl<E> From<RepoError> for TxError<E> {
    fn from(e: RepoError) -> Self {
        Self::Infra(e)
    }
}

impl<E> From<DbErr> for TxError<E> {
    fn from(e: DbErr) -> Self {
        Self::Infra(RepoError::Db(e))
    }
}

impl<E: fmt::Display> fmt::Display for TxError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Domain(e) => write!(f, "{e}"),
            Self::Infra(e) => write!(f, "infrastructure error: {e}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for TxError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Domain(e) => Some(e),
            Self::Infra(e) => Some(e),
        }
    }
}
