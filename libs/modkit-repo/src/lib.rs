#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! `ModKit` repository and unit-of-work layer over `SeaORM`.
//!
//! Entities are ordinary `SeaORM` entities. A [`UnitOfWork`] owns the transaction
//! slot and a list of staged changes; a [`Set`] gives typed access to one entity
//! through it, and [`Repository`] exposes that access through the narrow
//! [`ReadRepository`], [`PagedRepository`] and [`WriteRepository`] traits.
//!
//! # Features
//! - `sqlite` (default), `pg`, `mysql`: enable the matching `SQLx` driver
//!
//! # Example
//! ```rust,ignore
//! use modkit_repo::{QueryConfig, ReadRepository, RepositoryConfig, Sorting, UnitOfWorkFactory};
//!
//! let factory = UnitOfWorkFactory::connect(RepositoryConfig::new("sqlite::memory:")).await?;
//! let uow = factory.unit_of_work();
//!
//! let users = uow.repository::<user::Entity>();
//! let active = users
//!     .get_filtered(
//!         &user::Column::Active.eq(true),
//!         &QueryConfig::default().sort_by(Sorting::asc(user::Column::Name)),
//!     )
//!     .await?;
//!
//! uow.create_set::<user::Entity>().add(new_user);
//! uow.commit().await?;
//! ```

#![cfg_attr(
    not(any(feature = "pg", feature = "mysql", feature = "sqlite")),
    allow(unused_imports, unused_variables, dead_code, unreachable_code)
)]

pub use sea_orm::ConnectionTrait as DbConnTrait;

// Core modules
pub mod cancel;
pub mod config;
pub mod connection;
pub mod error;
pub mod executor;
pub mod factory;
pub mod migration;
pub mod paging;
pub mod query;
pub mod repository;
pub mod set;
pub mod sorting;
pub mod specification;
pub mod sql;
pub mod tx_config;
pub mod unit_of_work;
pub mod update;

// Internal modules
mod changes;

pub use cancel::Cancellable;
pub use config::{PoolCfg, RepositoryConfig, RetryCfg, ServiceLifetime, expand_env_vars, redact_dsn};
pub use connection::{DbHandle, Engine};
pub use error::{RepoError, RepoResult, TxError};
pub use executor::Executor;
pub use factory::{RepositoryOptions, UnitOfWorkFactory, UnitOfWorkScope};
pub use migration::{
    MigrationCoordinator, MigrationError, MigrationOutcome, MigrationSource, MigratorSource,
};
pub use paging::{Page, PageRequest};
pub use query::{QueryConfig, QueryFilters};
pub use repository::{PagedRepository, ReadRepository, Repository, WriteRepository};
pub use set::{KeyOf, Set};
pub use sorting::{SortDirection, Sorting};
pub use specification::{
    AndSpecification, ByKeySpecification, DirectSpecification, NotSpecification,
    OrSpecification, Specification, SpecificationExt, TrueSpecification,
};
pub use sql::SqlConfig;
pub use tx_config::{TxAccessMode, TxConfig, TxIsolationLevel};
pub use unit_of_work::{FromUnitOfWork, UnitOfWork};
pub use update::UpdateSet;

use sea_orm::{EntityName, EntityTrait};

/// Table name of `E`, used in log fields and error messages.
pub(crate) fn entity_name<E: EntityTrait>() -> String {
    E::default().table_name().to_owned()
}
