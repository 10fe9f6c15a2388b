//! Isolation and access mode for transactions a unit of work opens.
//!
//! `TxConfig` is plain serde data, so a service can keep e.g.
//! `isolation: serializable` in its own config file and hand the parsed value
//! to [`crate::UnitOfWork::begin_transaction_with`].
//! Levels a backend cannot honour are left to the driver to upgrade; `SQLite`
//! treats every transaction as serializable.

use sea_orm::{AccessMode, IsolationLevel};
use serde::{Deserialize, Serialize};

/// Settings for one transaction. A field left `None` keeps whatever the
/// connection would use on its own.
///
/// ```ignore
/// let cfg = TxConfig::default()
///     .isolation(TxIsolationLevel::RepeatableRead)
///     .access(TxAccessMode::ReadOnly);
/// uow.begin_transaction_with(cfg).await?;
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TxConfig {
    pub isolation: Option<TxIsolationLevel>,
    pub access_mode: Option<TxAccessMode>,
}

impl TxConfig {
    #[must_use]
    pub fn isolation(self, level: TxIsolationLevel) -> Self {
        Self {
            isolation: Some(level),
            ..self
        }
    }

    #[must_use]
    pub fn access(self, mode: TxAccessMode) -> Self {
        Self {
            access_mode: Some(mode),
            ..self
        }
    }

    #[must_use]
    pub fn with_isolation(level: TxIsolationLevel) -> Self {
        Self::default().isolation(level)
    }

    #[must_use]
    pub fn read_only() -> Self {
        Self::default().access(TxAccessMode::ReadOnly)
    }

    #[must_use]
    pub fn serializable() -> Self {
        Self::with_isolation(TxIsolationLevel::Serializable)
    }

    pub(crate) fn sea_isolation(self) -> Option<IsolationLevel> {
        self.isolation.map(TxIsolationLevel::to_sea)
    }

    pub(crate) fn sea_access_mode(self) -> Option<AccessMode> {
        self.access_mode.map(TxAccessMode::to_sea)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxIsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl TxIsolationLevel {
    fn to_sea(self) -> IsolationLevel {
        match self {
            Self::ReadUncommitted => IsolationLevel::ReadUncommitted,
            Self::ReadCommitted => IsolationLevel::ReadCommitted,
            Self::RepeatableRead => IsolationLevel::RepeatableRead,
            Self::Serializable => IsolationLevel::Serializable,
        }
    }
}

/// `ReadOnly` makes writes inside the transaction fail on backends that enforce it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxAccessMode {
    ReadOnly,
    #[default]
    ReadWrite,
}

impl TxAccessMode {
    fn to_sea(self) -> AccessMode {
        match self {
            Self::ReadOnly => AccessMode::ReadOnly,
            Self::ReadWrite => AccessMode::ReadWrite,
        }
    }
}
