//! The transactional boundary: staged changes, transactions, migrations and
//! factories for sets and repositories.

use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use sea_orm::{
    ActiveModelBehavior, DatabaseConnection, DatabaseTransaction, EntityTrait, IntoActiveModel,
    TransactionTrait,
};
use tracing::{debug, info, warn};

use crate::changes::{ChangeKind, PendingChange, Staged};
use crate::config::RepositoryConfig;
use crate::connection::DbHandle;
use crate::error::{RepoError, RepoResult, TxError};
use crate::executor::Executor;
use crate::migration::{MigrationCoordinator, MigrationOutcome, MigrationSource};
use crate::query::QueryFilters;
use crate::repository::{ReadRepository, Repository, WriteRepository};
use crate::set::Set;
use crate::tx_config::TxConfig;

type Changes = Vec<Box<dyn PendingChange>>;

/// Repositories that can be built from a unit of work.
///
/// ```ignore
/// struct Accounts<'u>(Repository<'u, account::Entity>);
///
/// impl<'u> FromUnitOfWork<'u> for Accounts<'u> {
///     fn from_unit_of_work(uow: &'u UnitOfWork) -> Self {
///         Self(uow.repository())
///     }
/// }
///
/// let accounts: Accounts<'_> = uow.custom_repository();
/// ```
pub trait FromUnitOfWork<'u>: Sized {
    fn from_unit_of_work(uow: &'u UnitOfWork) -> Self;
}

struct CommitFailure {
    /// Position of the change that failed; `None` when the transaction itself failed.
    index: Option<usize>,
    error: RepoError,
}

impl CommitFailure {
    fn setup(e: sea_orm::DbErr) -> Self {
        Self {
            index: None,
            error: e.into(),
        }
    }
}

pub struct UnitOfWork {
    db: DbHandle,
    tx: tokio::sync::Mutex<Option<DatabaseTransaction>>,
    changes: Mutex<Changes>,
    filters: Arc<QueryFilters>,
    migrations: Arc<MigrationCoordinator>,
    config: Arc<RepositoryConfig>,
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("engine", &self.db.engine())
            .field("dsn", &self.db.dsn())
            .field("pending_changes", &self.changes.lock().len())
            .finish_non_exhaustive()
    }
}

impl UnitOfWork {
    /// A standalone unit of work with its own filters and migration coordinator.
    #[must_use]
    pub fn new(db: DbHandle) -> Self {
        let config = RepositoryConfig::new(db.dsn());
        Self::from_parts(
            db,
            Arc::new(QueryFilters::default()),
            Arc::new(MigrationCoordinator::default()),
            Arc::new(config),
        )
    }

    pub(crate) fn from_parts(
        db: DbHandle,
        filters: Arc<QueryFilters>,
        migrations: Arc<MigrationCoordinator>,
        config: Arc<RepositoryConfig>,
    ) -> Self {
        Self {
            db,
            tx: tokio::sync::Mutex::new(None),
            changes: Mutex::new(Vec::new()),
            filters,
            migrations,
            config,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: Arc<RepositoryConfig>) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn db(&self) -> &DbHandle {
        &self.db
    }

    #[must_use]
    pub fn conn(&self) -> &DatabaseConnection {
        self.db.conn()
    }

    #[must_use]
    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    #[must_use]
    pub fn query_filters(&self) -> &QueryFilters {
        &self.filters
    }

    #[must_use]
    pub fn migration_coordinator(&self) -> &Arc<MigrationCoordinator> {
        &self.migrations
    }

    /// Connection view that joins the open transaction.
    ///
    /// Waits while another call on this unit of work holds the executor.
    pub async fn executor(&self) -> Executor<'_> {
        Executor::new(self.db.conn(), self.tx.lock().await)
    }

    // ---- sets and repositories ----

    #[must_use]
    pub fn create_set<E>(&self) -> Set<'_, E>
    where
        E: EntityTrait,
        E::Model: IntoActiveModel<E::ActiveModel> + Sync,
        E::ActiveModel: ActiveModelBehavior + Send + Sync,
    {
        Set::new(self)
    }

    #[must_use]
    pub fn repository<E>(&self) -> Repository<'_, E>
    where
        E: EntityTrait,
        E::Model: IntoActiveModel<E::ActiveModel> + Sync,
        E::ActiveModel: ActiveModelBehavior + Send + Sync,
    {
        Repository::new(self.create_set())
    }

    #[must_use]
    pub fn read_repository<E>(&self) -> impl ReadRepository<E> + '_
    where
        E: EntityTrait,
        E::Model: IntoActiveModel<E::ActiveModel> + Sync,
        E::ActiveModel: ActiveModelBehavior + Send + Sync,
    {
        self.repository::<E>()
    }

    #[must_use]
    pub fn write_repository<E>(&self) -> impl WriteRepository<E> + '_
    where
        E: EntityTrait,
        E::Model: IntoActiveModel<E::ActiveModel> + Sync,
        E::ActiveModel: ActiveModelBehavior + Send + Sync,
    {
        self.repository::<E>()
    }

    #[must_use]
    pub fn custom_repository<'u, R: FromUnitOfWork<'u>>(&'u self) -> R {
        R::from_unit_of_work(self)
    }

    // ---- staged changes ----

    pub(crate) fn stage<E>(&self, kind: ChangeKind, model: E::ActiveModel)
    where
        E: EntityTrait,
        E::Model: IntoActiveModel<E::ActiveModel>,
        E::ActiveModel: ActiveModelBehavior + Send + Sync,
    {
        let change = Staged::<E>::new(kind, model);
        debug!(entity = %change.entity(), kind = %kind, "Staged change");
        self.changes.lock().push(Box::new(change));
    }

    #[must_use]
    pub fn pending_changes(&self) -> usize {
        self.changes.lock().len()
    }

    /// Forget every staged change.
    pub fn rollback_changes(&self) {
        let discarded = std::mem::take(&mut *self.changes.lock()).len();
        debug!(discarded, "Discarded staged changes");
    }

    /// Apply staged changes atomically and return the rows affected.
    ///
    /// Changes run inside the open transaction when there is one (under a
    /// savepoint), otherwise inside a transaction of their own. On failure every
    /// staged change is kept, so the caller can fix the cause and commit again or
    /// call [`UnitOfWork::rollback_changes`].
    ///
    /// # Errors
    /// The first database error raised by a change or by the transaction.
    pub async fn commit(&self) -> RepoResult<u64> {
        let changes = std::mem::take(&mut *self.changes.lock());
        if changes.is_empty() {
            return Ok(0);
        }
        match self.apply_changes(&changes).await {
            Ok(rows) => Ok(rows),
            Err(failure) => {
                self.restore(changes);
                Err(failure.error)
            }
        }
    }

    /// Like [`UnitOfWork::commit`], but an update or delete that finds its row
    /// changed or gone is dropped and the rest is committed again.
    ///
    /// At most `commit_retries` conflicting changes are dropped.
    ///
    /// # Errors
    /// Non-conflict errors, or a conflict once the retry budget is spent.
    pub async fn commit_and_refresh_changes(&self) -> RepoResult<u64> {
        let mut changes = std::mem::take(&mut *self.changes.lock());
        let mut retries = 0u32;
        loop {
            if changes.is_empty() {
                return Ok(0);
            }
            let failure = match self.apply_changes(&changes).await {
                Ok(rows) => return Ok(rows),
                Err(failure) => failure,
            };
            match failure.index {
                Some(index)
                    if failure.error.is_conflict() && retries < self.config.commit_retries =>
                {
                    let dropped = changes.remove(index);
                    warn!(
                        entity = %dropped.entity(),
                        kind = %dropped.kind(),
                        error = %failure.error,
                        "Dropping conflicting change and retrying commit"
                    );
                    retries += 1;
                }
                _ => {
                    self.restore(changes);
                    return Err(failure.error);
                }
            }
        }
    }

    async fn apply_changes(&self, changes: &[Box<dyn PendingChange>]) -> Result<u64, CommitFailure> {
        let slot = self.tx.lock().await;
        let tx = match slot.as_ref() {
            Some(ambient) => ambient.begin().await,
            None => self.db.conn().begin().await,
        }
        .map_err(CommitFailure::setup)?;

        let mut rows = 0;
        for (index, change) in changes.iter().enumerate() {
            match change.apply(&tx).await {
                Ok(n) => rows += n,
                Err(e) => {
                    if let Err(rb) = tx.rollback().await {
                        warn!(error = %rb, "Rollback after failed commit failed");
                    }
                    return Err(CommitFailure {
                        index: Some(index),
                        error: e.into(),
                    });
                }
            }
        }
        tx.commit().await.map_err(CommitFailure::setup)?;
        drop(slot);

        debug!(changes = changes.len(), rows_affected = rows, "Committed staged changes");
        Ok(rows)
    }

    fn restore(&self, mut changes: Changes) {
        let mut staged = self.changes.lock();
        changes.append(&mut staged);
        *staged = changes;
    }

    // ---- entity helpers ----

    /// See [`Set::reload`].
    ///
    /// # Errors
    /// Database errors.
    pub async fn reload<E>(&self, model: &E::Model) -> RepoResult<Option<E::Model>>
    where
        E: EntityTrait,
        E::Model: IntoActiveModel<E::ActiveModel> + Sync,
        E::ActiveModel: ActiveModelBehavior + Send + Sync,
    {
        self.create_set::<E>().reload(model).await
    }

    /// See [`Set::set_modified`].
    pub fn set_modified<E>(&self, model: E::Model)
    where
        E: EntityTrait,
        E::Model: IntoActiveModel<E::ActiveModel> + Sync,
        E::ActiveModel: ActiveModelBehavior + Send + Sync,
    {
        self.create_set::<E>().set_modified(model);
    }

    /// See [`Set::apply_current_values`].
    pub fn apply_current_values<E>(&self, original: &E::Model, current: &E::Model) -> bool
    where
        E: EntityTrait,
        E::Model: IntoActiveModel<E::ActiveModel> + Sync,
        E::ActiveModel: ActiveModelBehavior + Send + Sync,
    {
        self.create_set::<E>().apply_current_values(original, current)
    }

    /// See [`Set::attach`].
    #[must_use]
    pub fn attach<E>(&self, model: E::Model) -> E::ActiveModel
    where
        E: EntityTrait,
        E::Model: IntoActiveModel<E::ActiveModel> + Sync,
        E::ActiveModel: ActiveModelBehavior + Send + Sync,
    {
        self.create_set::<E>().attach(model)
    }

    // ---- transactions ----

    /// # Errors
    /// Database errors from closing a previous transaction or opening the new one.
    pub async fn begin_transaction(&self) -> RepoResult<()> {
        self.begin_transaction_with(TxConfig::default()).await
    }

    /// Open a transaction that every following call joins until it is committed
    /// or rolled back. An already open transaction is rolled back first.
    ///
    /// # Errors
    /// Database errors from closing a previous transaction or opening the new one.
    pub async fn begin_transaction_with(&self, cfg: TxConfig) -> RepoResult<()> {
        let mut slot = self.tx.lock().await;
        if let Some(previous) = slot.take() {
            warn!("Transaction already open; rolling it back before starting a new one");
            previous.rollback().await?;
        }
        let tx = self
            .db
            .conn()
            .begin_with_config(cfg.sea_isolation(), cfg.sea_access_mode())
            .await?;
        *slot = Some(tx);
        debug!(isolation = ?cfg.isolation, access_mode = ?cfg.access_mode, "Transaction started");
        Ok(())
    }

    /// Commit the open transaction; does nothing when none is open.
    ///
    /// # Errors
    /// Database errors from the commit.
    pub async fn commit_transaction(&self) -> RepoResult<()> {
        let tx = self.tx.lock().await.take();
        if let Some(tx) = tx {
            tx.commit().await?;
            debug!("Transaction committed");
        }
        Ok(())
    }

    /// Roll back the open transaction; does nothing when none is open.
    ///
    /// # Errors
    /// Database errors from the rollback.
    pub async fn rollback_transaction(&self) -> RepoResult<()> {
        let tx = self.tx.lock().await.take();
        if let Some(tx) = tx {
            tx.rollback().await?;
            debug!("Transaction rolled back");
        }
        Ok(())
    }

    pub async fn in_transaction(&self) -> bool {
        self.tx.lock().await.is_some()
    }

    /// Adopt a transaction opened elsewhere on the same database.
    ///
    /// Every following call joins `tx` until it is committed, rolled back or
    /// taken back. A transaction that was already open is handed back to the
    /// caller instead of being closed.
    pub async fn use_transaction(&self, tx: DatabaseTransaction) -> Option<DatabaseTransaction> {
        let previous = self.tx.lock().await.replace(tx);
        if previous.is_some() {
            warn!("Replacing an open transaction with an external one");
        }
        debug!("External transaction adopted");
        previous
    }

    /// Detach the open transaction without committing or rolling it back.
    pub async fn take_transaction(&self) -> Option<DatabaseTransaction> {
        self.tx.lock().await.take()
    }

    /// Run `f` inside a transaction: commit on `Ok`, roll back on `Err`.
    ///
    /// When a transaction is already open, `f` joins it and the outer owner
    /// decides the outcome.
    ///
    /// ```ignore
    /// let id = uow.transaction(|uow| Box::pin(async move {
    ///     let user = uow.create_set::<user::Entity>().insert(new_user).await?;
    ///     if user.name.is_empty() {
    ///         return Err(TxError::Domain(DomainError::EmptyName));
    ///     }
    ///     Ok(user.id)
    /// })).await?;
    /// ```
    ///
    /// # Errors
    /// The closure's error, or [`TxError::Infra`] if the transaction could not
    /// be opened or committed.
    pub async fn transaction<T, E, F>(&self, f: F) -> Result<T, TxError<E>>
    where
        F: for<'a> FnOnce(&'a UnitOfWork) -> BoxFuture<'a, Result<T, TxError<E>>> + Send,
        T: Send,
        E: Send,
    {
        if self.in_transaction().await {
            return f(self).await;
        }
        self.begin_transaction().await?;
        match f(self).await {
            Ok(value) => {
                self.commit_transaction().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rb) = self.rollback_transaction().await {
                    warn!(error = %rb, "Rollback after failed transaction closure failed");
                }
                Err(e)
            }
        }
    }

    // ---- migrations ----

    /// Names of the migrations in `source` that have not been applied yet.
    ///
    /// # Errors
    /// Errors reading the migration history.
    pub async fn pending_migrations(&self, source: &dyn MigrationSource) -> RepoResult<Vec<String>> {
        Ok(crate::migration::pending(self.db.conn(), source).await?)
    }

    /// Apply pending migrations unless another migration run holds the coordinator.
    ///
    /// # Errors
    /// The first failing migration.
    pub async fn update_database(&self, source: &dyn MigrationSource) -> RepoResult<MigrationOutcome> {
        let outcome = self.migrations.run(self.db.conn(), source).await?;
        if let MigrationOutcome::Applied { applied, .. } = &outcome {
            info!(source = source.name(), applied = applied.len(), "Database updated");
        }
        Ok(outcome)
    }
}
