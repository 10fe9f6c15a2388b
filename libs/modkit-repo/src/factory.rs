//! Units of work handed out according to a [`ServiceLifetime`].

use std::sync::{Arc, OnceLock};

use sea_orm::EntityTrait;
use tracing::debug;

use crate::config::{RepositoryConfig, ServiceLifetime};
use crate::connection::DbHandle;
use crate::error::RepoResult;
use crate::migration::MigrationCoordinator;
use crate::query::QueryFilters;
use crate::specification::Specification;
use crate::unit_of_work::UnitOfWork;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RepositoryOptions {
    pub lifetime: ServiceLifetime,
}

/// Creates units of work over one database.
///
/// Every unit of work created here shares the factory's global query filters
/// and migration coordinator.
///
/// ```ignore
/// let factory = UnitOfWorkFactory::connect(RepositoryConfig::from_figment(&figment, "database")?).await?;
/// factory.register_filter::<user::Entity>(&user::Column::DeletedAt.is_null());
///
/// let scope = factory.scope();
/// let users = scope.unit_of_work().repository::<user::Entity>();
/// ```
#[derive(Debug)]
pub struct UnitOfWorkFactory {
    db: DbHandle,
    config: Arc<RepositoryConfig>,
    filters: Arc<QueryFilters>,
    coordinator: Arc<MigrationCoordinator>,
    singleton: OnceLock<Arc<UnitOfWork>>,
}

impl UnitOfWorkFactory {
    #[must_use]
    pub fn new(db: DbHandle, config: RepositoryConfig) -> Self {
        Self {
            db,
            config: Arc::new(config),
            filters: Arc::new(QueryFilters::default()),
            coordinator: Arc::new(MigrationCoordinator::new()),
            singleton: OnceLock::new(),
        }
    }

    /// Connect using `config` and build a factory around the pool.
    ///
    /// # Errors
    /// Connection errors, see [`DbHandle::connect`].
    pub async fn connect(config: RepositoryConfig) -> RepoResult<Self> {
        let db = DbHandle::connect(&config).await?;
        Ok(Self::new(db, config))
    }

    /// Use `coordinator` instead of a private one, e.g. to share it with another factory.
    #[must_use]
    pub fn with_coordinator(mut self, coordinator: Arc<MigrationCoordinator>) -> Self {
        self.coordinator = coordinator;
        self
    }

    #[must_use]
    pub fn options(&self) -> RepositoryOptions {
        RepositoryOptions {
            lifetime: self.config.lifetime,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    #[must_use]
    pub fn db(&self) -> &DbHandle {
        &self.db
    }

    #[must_use]
    pub fn query_filters(&self) -> &Arc<QueryFilters> {
        &self.filters
    }

    /// Register a filter applied to every query of `E` by every unit of work of this factory.
    pub fn register_filter<E: EntityTrait>(&self, spec: &dyn Specification<E>) {
        self.filters.register::<E>(spec);
        debug!(entity = %crate::entity_name::<E>(), "Registered global query filter");
    }

    fn create(&self) -> Arc<UnitOfWork> {
        Arc::new(UnitOfWork::from_parts(
            self.db.clone(),
            Arc::clone(&self.filters),
            Arc::clone(&self.coordinator),
            Arc::clone(&self.config),
        ))
    }

    fn shared(&self) -> Arc<UnitOfWork> {
        Arc::clone(self.singleton.get_or_init(|| self.create()))
    }

    /// The shared instance for singleton lifetime, a new one otherwise.
    #[must_use]
    pub fn unit_of_work(&self) -> Arc<UnitOfWork> {
        match self.config.lifetime {
            ServiceLifetime::Singleton => self.shared(),
            ServiceLifetime::Scoped | ServiceLifetime::Transient => self.create(),
        }
    }

    #[must_use]
    pub fn scope(&self) -> UnitOfWorkScope<'_> {
        UnitOfWorkScope {
            factory: self,
            scoped: OnceLock::new(),
        }
    }
}

/// A resolution scope, typically one per request.
#[derive(Debug)]
pub struct UnitOfWorkScope<'f> {
    factory: &'f UnitOfWorkFactory,
    scoped: OnceLock<Arc<UnitOfWork>>,
}

impl UnitOfWorkScope<'_> {
    /// One instance per scope for scoped lifetime; see [`UnitOfWorkFactory::unit_of_work`]
    /// for the others.
    #[must_use]
    pub fn unit_of_work(&self) -> Arc<UnitOfWork> {
        match self.factory.config.lifetime {
            ServiceLifetime::Scoped => {
                Arc::clone(self.scoped.get_or_init(|| self.factory.create()))
            }
            ServiceLifetime::Singleton => self.factory.shared(),
            ServiceLifetime::Transient => self.factory.create(),
        }
    }
}
