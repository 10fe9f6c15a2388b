//! Per-entity access bound to a [`UnitOfWork`].

use std::marker::PhantomData;

use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, Condition, ConnectionTrait, EntityTrait, IdenStatic,
    IntoActiveModel, Iterable, ModelTrait, PaginatorTrait, PrimaryKeyToColumn, PrimaryKeyTrait,
    QueryFilter, QuerySelect, Related, Select, Statement, Value,
};
use tracing::{Instrument, debug};

use crate::changes::ChangeKind;
use crate::entity_name;
use crate::error::{RepoError, RepoResult};
use crate::paging::{Page, PageRequest};
use crate::query::{QueryConfig, QueryFilters, filtered_condition, shape, with_related};
use crate::specification::{ByKeySpecification, Specification};
use crate::unit_of_work::UnitOfWork;
use crate::update::UpdateSet;

pub type KeyOf<E> = <<E as EntityTrait>::PrimaryKey as PrimaryKeyTrait>::ValueType;

/// Queries, staged writes and bulk operations for entity `E`.
///
/// Reads go through the unit of work's executor and therefore see the open
/// transaction, if any. Writes made with `add`, `update`, `set_modified`,
/// `apply_current_values` and `remove`, along with their range forms, are staged until
/// [`UnitOfWork::commit`]; `insert`, `delete_many` and `update_many` run at once.
///
/// Global query filters apply to reads and to every related entity a read
/// pulls in. Bulk operations always apply them.
pub struct Set<'u, E> {
    uow: &'u UnitOfWork,
    ignore_filters: bool,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for Set<'_, E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for Set<'_, E> {}

impl<'u, E> Set<'u, E>
where
    E: EntityTrait,
    E::Model: IntoActiveModel<E::ActiveModel> + Sync,
    E::ActiveModel: ActiveModelBehavior + Send + Sync,
{
    pub(crate) fn new(uow: &'u UnitOfWork) -> Self {
        Self {
            uow,
            ignore_filters: false,
            _entity: PhantomData,
        }
    }

    #[must_use]
    pub fn unit_of_work(&self) -> &'u UnitOfWork {
        self.uow
    }

    /// A view of this set whose reads and relation loads skip global filters.
    #[must_use]
    pub fn ignore_query_filters(self) -> Self {
        Self {
            ignore_filters: true,
            ..self
        }
    }

    fn read_filters(&self) -> Option<&'u QueryFilters> {
        (!self.ignore_filters).then(|| self.uow.query_filters())
    }

    fn related_filter<R: EntityTrait>(&self) -> Option<Condition> {
        self.read_filters().and_then(QueryFilters::condition_for::<R>)
    }

    fn related_select<R>(&self, model: &E::Model) -> Select<R>
    where
        R: EntityTrait,
        E: Related<R>,
    {
        let query = model.find_related(R::default());
        match self.related_filter::<R>() {
            Some(cond) => query.filter(cond),
            None => query,
        }
    }

    /// The shaped select without executing it.
    #[must_use]
    pub fn query(
        &self,
        spec: Option<&dyn Specification<E>>,
        config: &QueryConfig<E>,
    ) -> Select<E> {
        shape(self.read_filters(), spec, config)
    }

    /// # Errors
    /// Database errors, or a key whose arity does not match the primary key.
    pub async fn find(&self, key: KeyOf<E>, config: &QueryConfig<E>) -> RepoResult<Option<E::Model>> {
        let spec = ByKeySpecification::<E>::new(key)?;
        let query = self.query(Some(&spec), config);
        let db = self.uow.executor().await;
        Ok(query.one(&db).instrument(config.span()).await?)
    }

    /// # Errors
    /// Database errors.
    pub async fn find_many(
        &self,
        spec: Option<&dyn Specification<E>>,
        config: &QueryConfig<E>,
    ) -> RepoResult<Vec<E::Model>> {
        let query = self.query(spec, config);
        let db = self.uow.executor().await;
        Ok(query.all(&db).instrument(config.span()).await?)
    }

    /// # Errors
    /// Database errors.
    pub async fn first(
        &self,
        spec: Option<&dyn Specification<E>>,
        config: &QueryConfig<E>,
    ) -> RepoResult<Option<E::Model>> {
        let query = self.query(spec, config);
        let db = self.uow.executor().await;
        Ok(query.one(&db).instrument(config.span()).await?)
    }

    /// At most one match.
    ///
    /// # Errors
    /// [`RepoError::MultipleResults`] when more than one row matches.
    pub async fn single(
        &self,
        spec: Option<&dyn Specification<E>>,
        config: &QueryConfig<E>,
    ) -> RepoResult<Option<E::Model>> {
        let query = self.query(spec, config).limit(2);
        let mut rows = {
            let db = self.uow.executor().await;
            query.all(&db).instrument(config.span()).await?
        };
        if rows.len() > 1 {
            return Err(RepoError::multiple(entity_name::<E>()));
        }
        Ok(rows.pop())
    }

    /// # Errors
    /// Database errors.
    pub async fn count(&self, spec: Option<&dyn Specification<E>>) -> RepoResult<u64> {
        let config = QueryConfig::default();
        let query = self.query(spec, &config);
        let db = self.uow.executor().await;
        Ok(query.count(&db).instrument(config.span()).await?)
    }

    /// # Errors
    /// Database errors.
    pub async fn any(&self, spec: Option<&dyn Specification<E>>) -> RepoResult<bool> {
        let config = QueryConfig::default();
        let query = self.query(spec, &config);
        let db = self.uow.executor().await;
        Ok(query.one(&db).instrument(config.span()).await?.is_some())
    }

    /// True when every visible row satisfies `spec`, including when there are no rows.
    ///
    /// Rows where `spec` evaluates to SQL `NULL` do not satisfy it.
    ///
    /// # Errors
    /// Database errors.
    pub async fn all(&self, spec: &dyn Specification<E>) -> RepoResult<bool> {
        let matching = self.count(Some(spec)).await?;
        let total = self.count(None).await?;
        Ok(matching == total)
    }

    /// # Errors
    /// Database errors.
    pub async fn page(
        &self,
        spec: Option<&dyn Specification<E>>,
        page: PageRequest,
        config: &QueryConfig<E>,
    ) -> RepoResult<Page<E::Model>> {
        let query = self.query(spec, config);
        let db = self.uow.executor().await;
        if !page.is_paged() {
            let items = query.all(&db).instrument(config.span()).await?;
            let total = items.len() as u64;
            return Ok(Page {
                items,
                page_index: 1,
                page_size: 0,
                total,
            });
        }
        let total = query.clone().count(&db).instrument(config.span()).await?;
        let items = query
            .offset(page.offset())
            .limit(page.page_size)
            .all(&db)
            .instrument(config.span())
            .await?;
        Ok(Page {
            items,
            page_index: page.effective_index(),
            page_size: page.page_size,
            total,
        })
    }

    /// Map rows of a hand-written statement onto `E`.
    ///
    /// # Errors
    /// Database errors, including column mismatches.
    pub async fn from_raw_sql(&self, sql: &str, values: Vec<Value>) -> RepoResult<Vec<E::Model>> {
        let db = self.uow.executor().await;
        let stmt = Statement::from_sql_and_values(db.get_database_backend(), sql, values);
        Ok(E::find().from_raw_sql(stmt).all(&db).await?)
    }

    /// Stage an insert.
    pub fn add(&self, model: E::ActiveModel) {
        self.uow.stage::<E>(ChangeKind::Insert, model);
    }

    pub fn add_range(&self, models: impl IntoIterator<Item = E::ActiveModel>) {
        for model in models {
            self.add(model);
        }
    }

    /// Insert now and return the stored row with generated keys.
    ///
    /// # Errors
    /// Database errors.
    pub async fn insert(&self, model: E::ActiveModel) -> RepoResult<E::Model> {
        let db = self.uow.executor().await;
        let stored = model.insert(&db).await?;
        debug!(entity = %entity_name::<E>(), "Inserted row");
        Ok(stored)
    }

    /// Treat `model` as persisted and unchanged; returns it ready for edits.
    #[must_use]
    #[allow(clippy::unused_self)]
    pub fn attach(&self, model: E::Model) -> E::ActiveModel {
        model.into_active_model()
    }

    #[must_use]
    pub fn attach_range(
        &self,
        models: impl IntoIterator<Item = E::Model>,
    ) -> Vec<E::ActiveModel> {
        models.into_iter().map(|m| self.attach(m)).collect()
    }

    /// Stage an update of the columns set on `model`.
    pub fn update(&self, model: E::ActiveModel) {
        self.uow.stage::<E>(ChangeKind::Update, model);
    }

    pub fn update_range(&self, models: impl IntoIterator<Item = E::ActiveModel>) {
        for model in models {
            self.update(model);
        }
    }

    /// Stage an update that rewrites every column of `model`.
    pub fn set_modified(&self, model: E::Model) {
        self.update(model.into_active_model().reset_all());
    }

    /// Stage an update of the columns where `current` differs from `original`.
    ///
    /// Primary-key columns are never rewritten. Returns `false` and stages
    /// nothing when the two rows are equal.
    pub fn apply_current_values(&self, original: &E::Model, current: &E::Model) -> bool {
        let keys: Vec<String> = E::PrimaryKey::iter()
            .map(|pk| pk.into_column().as_str().to_owned())
            .collect();
        let mut model = original.clone().into_active_model();
        let mut changed = false;
        for column in E::Column::iter() {
            if keys.iter().any(|k| k == column.as_str()) {
                continue;
            }
            let value = current.get(column);
            if original.get(column) != value {
                model.set(column, value);
                changed = true;
            }
        }
        if changed {
            self.update(model);
        }
        changed
    }

    /// Stage a delete.
    pub fn remove(&self, model: E::Model) {
        self.uow.stage::<E>(ChangeKind::Delete, model.into_active_model());
    }

    pub fn remove_range(&self, models: impl IntoIterator<Item = E::Model>) {
        for model in models {
            self.remove(model);
        }
    }

    /// Find the single row matching `spec` and stage its removal.
    ///
    /// # Errors
    /// [`RepoError::NotFound`] or [`RepoError::MultipleResults`] unless exactly one
    /// row matches.
    pub async fn delete(&self, spec: &dyn Specification<E>) -> RepoResult<()> {
        let found = self.single(Some(spec), &QueryConfig::default()).await?;
        let model = found.ok_or_else(|| RepoError::not_found(entity_name::<E>()))?;
        self.remove(model);
        Ok(())
    }

    /// Delete every visible row matching `spec` right away.
    ///
    /// # Errors
    /// Database errors.
    pub async fn delete_many(&self, spec: &dyn Specification<E>) -> RepoResult<u64> {
        let cond = filtered_condition(self.uow.query_filters(), spec);
        let db = self.uow.executor().await;
        let res = E::delete_many().filter(cond).exec(&db).await?;
        debug!(entity = %entity_name::<E>(), rows_affected = res.rows_affected, "Bulk delete");
        Ok(res.rows_affected)
    }

    /// Apply `changes` to every visible row matching `spec` right away.
    ///
    /// # Errors
    /// [`RepoError::EmptyUpdate`] when `changes` has no assignments, or database errors.
    pub async fn update_many(
        &self,
        spec: &dyn Specification<E>,
        changes: UpdateSet<E>,
    ) -> RepoResult<u64> {
        let update = changes.apply(E::update_many())?;
        let cond = filtered_condition(self.uow.query_filters(), spec);
        let db = self.uow.executor().await;
        let res = update.filter(cond).exec(&db).await?;
        debug!(entity = %entity_name::<E>(), rows_affected = res.rows_affected, "Bulk update");
        Ok(res.rows_affected)
    }

    /// Current database values for `model`, looked up by primary key.
    ///
    /// # Errors
    /// Database errors.
    pub async fn reload(&self, model: &E::Model) -> RepoResult<Option<E::Model>> {
        let spec = ByKeySpecification::<E>::of_model(model);
        let db = self.uow.executor().await;
        Ok(E::find().filter(spec.satisfied_by()).one(&db).await?)
    }

    /// Rows of `R` related to `model`.
    ///
    /// # Errors
    /// Database errors.
    pub async fn load_related<R>(&self, model: &E::Model) -> RepoResult<Vec<R::Model>>
    where
        R: EntityTrait,
        E: Related<R>,
    {
        let query = self.related_select::<R>(model);
        let db = self.uow.executor().await;
        Ok(query.all(&db).await?)
    }

    /// Rows of `R` related to `model` that also satisfy `spec`.
    ///
    /// # Errors
    /// Database errors.
    pub async fn load_related_filtered<R>(
        &self,
        model: &E::Model,
        spec: &dyn Specification<R>,
    ) -> RepoResult<Vec<R::Model>>
    where
        R: EntityTrait,
        E: Related<R>,
    {
        let query = self
            .related_select::<R>(model)
            .filter(spec.satisfied_by());
        let db = self.uow.executor().await;
        Ok(query.all(&db).await?)
    }

    /// The related row for a to-one relation.
    ///
    /// # Errors
    /// Database errors.
    pub async fn load_one_related<R>(&self, model: &E::Model) -> RepoResult<Option<R::Model>>
    where
        R: EntityTrait,
        E: Related<R>,
    {
        let query = self.related_select::<R>(model);
        let db = self.uow.executor().await;
        Ok(query.one(&db).await?)
    }

    /// Two-hop load: rows of `R` related to `model`, each with its rows of `S`.
    ///
    /// Global filters of both `R` and `S` apply; an `R` row whose `S` rows are
    /// all filtered out comes back with an empty list.
    ///
    /// # Errors
    /// Database errors.
    pub async fn load_cascade<R, S>(
        &self,
        model: &E::Model,
    ) -> RepoResult<Vec<(R::Model, Vec<S::Model>)>>
    where
        R: EntityTrait + Related<S>,
        S: EntityTrait,
        E: Related<R>,
    {
        let outer = self.related_select::<R>(model);
        let query = with_related::<R, S>(outer, self.related_filter::<S>());
        let db = self.uow.executor().await;
        Ok(query.all(&db).await?)
    }

    /// Rows matching `spec`, each with its related rows of `R`.
    ///
    /// `config.ignore_query_filters()` skips the global filters of both `E` and `R`.
    ///
    /// # Errors
    /// Database errors.
    pub async fn find_with_related<R>(
        &self,
        spec: Option<&dyn Specification<E>>,
        config: &QueryConfig<E>,
    ) -> RepoResult<Vec<(E::Model, Vec<R::Model>)>>
    where
        R: EntityTrait,
        E: Related<R>,
    {
        let related = if config.ignores_query_filters() {
            None
        } else {
            self.related_filter::<R>()
        };
        let query = with_related::<E, R>(self.query(spec, config), related);
        let db = self.uow.executor().await;
        Ok(query.all(&db).instrument(config.span()).await?)
    }
}
