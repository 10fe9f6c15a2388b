//! Narrow repository capabilities and the [`Repository`] facade over a [`Set`].

use async_trait::async_trait;
use sea_orm::{ActiveModelBehavior, EntityTrait, IntoActiveModel, Related};

use crate::error::RepoResult;
use crate::paging::{Page, PageRequest};
use crate::query::QueryConfig;
use crate::set::{KeyOf, Set};
use crate::specification::{ByKeySpecification, Specification};
use crate::update::UpdateSet;

/// Read access to entity `E`. A `None` spec matches every visible row.
#[async_trait]
pub trait ReadRepository<E: EntityTrait>: Send + Sync {
    async fn get(&self, key: KeyOf<E>, config: &QueryConfig<E>) -> RepoResult<Option<E::Model>>;

    async fn get_all(&self, config: &QueryConfig<E>) -> RepoResult<Vec<E::Model>>;

    async fn get_filtered(
        &self,
        spec: &dyn Specification<E>,
        config: &QueryConfig<E>,
    ) -> RepoResult<Vec<E::Model>>;

    async fn get_first(
        &self,
        spec: Option<&dyn Specification<E>>,
        config: &QueryConfig<E>,
    ) -> RepoResult<Option<E::Model>>;

    /// Fails with `MultipleResults` when more than one row matches.
    async fn get_single(
        &self,
        spec: Option<&dyn Specification<E>>,
        config: &QueryConfig<E>,
    ) -> RepoResult<Option<E::Model>>;

    async fn count(&self, spec: Option<&dyn Specification<E>>) -> RepoResult<u64>;

    async fn any(&self, spec: Option<&dyn Specification<E>>) -> RepoResult<bool>;

    async fn all(&self, spec: Option<&dyn Specification<E>>) -> RepoResult<bool>;
}

#[async_trait]
pub trait PagedRepository<E: EntityTrait>: Send + Sync {
    async fn get_paged(
        &self,
        spec: Option<&dyn Specification<E>>,
        page: PageRequest,
        config: &QueryConfig<E>,
    ) -> RepoResult<Vec<E::Model>>;

    async fn get_page(
        &self,
        spec: Option<&dyn Specification<E>>,
        page: PageRequest,
        config: &QueryConfig<E>,
    ) -> RepoResult<Page<E::Model>>;
}

/// Write access to entity `E`.
///
/// `add`, `update`, `modify`, `merge` and `remove` (and their range forms) are staged on the unit of
/// work and reach the database on commit. `delete_many` and `update_many` run
/// immediately.
#[async_trait]
pub trait WriteRepository<E: EntityTrait>: Send + Sync {
    fn add(&self, model: E::ActiveModel);

    fn add_range(&self, models: Vec<E::ActiveModel>);

    fn update(&self, model: E::ActiveModel);

    fn update_range(&self, models: Vec<E::ActiveModel>);

    /// Stage a full-row update.
    fn modify(&self, model: E::Model);

    /// Stage the differences between `persisted` and `current`; `false` when there are none.
    fn merge(&self, persisted: &E::Model, current: &E::Model) -> bool;

    fn remove(&self, model: E::Model);

    fn remove_range(&self, models: Vec<E::Model>);

    /// Start tracking a row loaded elsewhere; edit the returned model and pass it to `update`.
    fn track_item(&self, model: E::Model) -> E::ActiveModel;

    fn track_items(&self, models: Vec<E::Model>) -> Vec<E::ActiveModel>;

    async fn delete_many(&self, spec: &dyn Specification<E>) -> RepoResult<u64>;

    async fn update_many(&self, spec: &dyn Specification<E>, changes: UpdateSet<E>)
    -> RepoResult<u64>;
}

/// Read, paged and write access to `E` through one unit of work.
pub struct Repository<'u, E> {
    set: Set<'u, E>,
}

impl<E> Clone for Repository<'_, E> {
    fn clone(&self) -> Self {
        Self { set: self.set }
    }
}

impl<'u, E> Repository<'u, E>
where
    E: EntityTrait,
    E::Model: IntoActiveModel<E::ActiveModel> + Sync,
    E::ActiveModel: ActiveModelBehavior + Send + Sync,
{
    #[must_use]
    pub fn new(set: Set<'u, E>) -> Self {
        Self { set }
    }

    #[must_use]
    pub fn set(&self) -> Set<'u, E> {
        self.set
    }

    /// # Errors
    /// Database errors.
    pub async fn get_mapped<T, F>(
        &self,
        spec: Option<&dyn Specification<E>>,
        config: &QueryConfig<E>,
        map: F,
    ) -> RepoResult<Vec<T>>
    where
        F: Fn(E::Model) -> T + Send,
    {
        let rows = self.set.find_many(spec, config).await?;
        Ok(rows.into_iter().map(map).collect())
    }

    /// # Errors
    /// Database errors.
    pub async fn get_first_mapped<T, F>(
        &self,
        spec: Option<&dyn Specification<E>>,
        config: &QueryConfig<E>,
        map: F,
    ) -> RepoResult<Option<T>>
    where
        F: FnOnce(E::Model) -> T + Send,
    {
        Ok(self.set.first(spec, config).await?.map(map))
    }

    /// The row with `key` together with its related rows of `R`.
    ///
    /// # Errors
    /// Database errors, or a key whose arity does not match the primary key.
    pub async fn get_with_related<R>(
        &self,
        key: KeyOf<E>,
        config: &QueryConfig<E>,
    ) -> RepoResult<Option<(E::Model, Vec<R::Model>)>>
    where
        R: EntityTrait,
        E: Related<R>,
    {
        let spec = ByKeySpecification::<E>::new(key)?;
        let mut rows = self
            .set
            .find_with_related::<R>(Some(&spec), config)
            .await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        })
    }
}

#[async_trait]
impl<E> ReadRepository<E> for Repository<'_, E>
where
    E: EntityTrait,
    E::Model: IntoActiveModel<E::ActiveModel> + Sync,
    E::ActiveModel: ActiveModelBehavior + Send + Sync,
{
    async fn get(&self, key: KeyOf<E>, config: &QueryConfig<E>) -> RepoResult<Option<E::Model>> {
        self.set.find(key, config).await
    }

    async fn get_all(&self, config: &QueryConfig<E>) -> RepoResult<Vec<E::Model>> {
        self.set.find_many(None, config).await
    }

    async fn get_filtered(
        &self,
        spec: &dyn Specification<E>,
        config: &QueryConfig<E>,
    ) -> RepoResult<Vec<E::Model>> {
        self.set.find_many(Some(spec), config).await
    }

    async fn get_first(
        &self,
        spec: Option<&dyn Specification<E>>,
        config: &QueryConfig<E>,
    ) -> RepoResult<Option<E::Model>> {
        self.set.first(spec, config).await
    }

    async fn get_single(
        &self,
        spec: Option<&dyn Specification<E>>,
        config: &QueryConfig<E>,
    ) -> RepoResult<Option<E::Model>> {
        self.set.single(spec, config).await
    }

    async fn count(&self, spec: Option<&dyn Specification<E>>) -> RepoResult<u64> {
        self.set.count(spec).await
    }

    async fn any(&self, spec: Option<&dyn Specification<E>>) -> RepoResult<bool> {
        self.set.any(spec).await
    }

    async fn all(&self, spec: Option<&dyn Specification<E>>) -> RepoResult<bool> {
        match spec {
            Some(spec) => self.set.all(spec).await,
            None => Ok(true),
        }
    }
}

#[async_trait]
impl<E> PagedRepository<E> for Repository<'_, E>
where
    E: EntityTrait,
    E::Model: IntoActiveModel<E::ActiveModel> + Sync,
    E::ActiveModel: ActiveModelBehavior + Send + Sync,
{
    async fn get_paged(
        &self,
        spec: Option<&dyn Specification<E>>,
        page: PageRequest,
        config: &QueryConfig<E>,
    ) -> RepoResult<Vec<E::Model>> {
        Ok(self.set.page(spec, page, config).await?.items)
    }

    async fn get_page(
        &self,
        spec: Option<&dyn Specification<E>>,
        page: PageRequest,
        config: &QueryConfig<E>,
    ) -> RepoResult<Page<E::Model>> {
        self.set.page(spec, page, config).await
    }
}

#[async_trait]
impl<E> WriteRepository<E> for Repository<'_, E>
where
    E: EntityTrait,
    E::Model: IntoActiveModel<E::ActiveModel> + Sync,
    E::ActiveModel: ActiveModelBehavior + Send + Sync,
{
    fn add(&self, model: E::ActiveModel) {
        self.set.add(model);
    }

    fn add_range(&self, models: Vec<E::ActiveModel>) {
        self.set.add_range(models);
    }

    fn update(&self, model: E::ActiveModel) {
        self.set.update(model);
    }

    fn update_range(&self, models: Vec<E::ActiveModel>) {
        self.set.update_range(models);
    }

    fn modify(&self, model: E::Model) {
        self.set.set_modified(model);
    }

    fn merge(&self, persisted: &E::Model, current: &E::Model) -> bool {
        self.set.apply_current_values(persisted, current)
    }

    fn remove(&self, model: E::Model) {
        self.set.remove(model);
    }

    fn remove_range(&self, models: Vec<E::Model>) {
        self.set.remove_range(models);
    }

    fn track_item(&self, model: E::Model) -> E::ActiveModel {
        self.set.attach(model)
    }

    fn track_items(&self, models: Vec<E::Model>) -> Vec<E::ActiveModel> {
        self.set.attach_range(models)
    }

    async fn delete_many(&self, spec: &dyn Specification<E>) -> RepoResult<u64> {
        self.set.delete_many(spec).await
    }

    async fn update_many(
        &self,
        spec: &dyn Specification<E>,
        changes: UpdateSet<E>,
    ) -> RepoResult<u64> {
        self.set.update_many(spec, changes).await
    }
}
