//! Query shaping: sort order, tags, customization hooks and global filters.

use std::any::TypeId;
use std::fmt;

use dashmap::DashMap;
use sea_orm::{
    Condition, EntityTrait, JoinType, QueryFilter, QuerySelect, Related, Select, SelectTwoMany,
};

use crate::entity_name;
use crate::sorting::{Sorting, apply_sorting};
use crate::specification::Specification;

type Customization<E> = Box<dyn Fn(Select<E>) -> Select<E> + Send + Sync>;

/// Per-call options for read operations.
///
/// ```ignore
/// let cfg = QueryConfig::<user::Entity>::default()
///     .sort_by(Sorting::desc(user::Column::CreatedAt))
///     .tag("recent-users")
///     .after(|q| q.limit(50));
/// ```
pub struct QueryConfig<E: EntityTrait> {
    sortings: Vec<Sorting<E>>,
    tag: Option<String>,
    before: Vec<Customization<E>>,
    after: Vec<Customization<E>>,
    ignore_query_filters: bool,
}

impl<E: EntityTrait> Default for QueryConfig<E> {
    fn default() -> Self {
        Self {
            sortings: Vec::new(),
            tag: None,
            before: Vec::new(),
            after: Vec::new(),
            ignore_query_filters: false,
        }
    }
}

impl<E: EntityTrait> fmt::Debug for QueryConfig<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryConfig")
            .field("sortings", &self.sortings)
            .field("tag", &self.tag)
            .field("before", &self.before.len())
            .field("after", &self.after.len())
            .field("ignore_query_filters", &self.ignore_query_filters)
            .finish()
    }
}

impl<E: EntityTrait> QueryConfig<E> {
    #[must_use]
    pub fn sort_by(mut self, sorting: Sorting<E>) -> Self {
        self.sortings.push(sorting);
        self
    }

    #[must_use]
    pub fn sortings(mut self, sortings: impl IntoIterator<Item = Sorting<E>>) -> Self {
        self.sortings.extend(sortings);
        self
    }

    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Runs on the bare `find()` before filters are added.
    #[must_use]
    pub fn before<F>(mut self, f: F) -> Self
    where
        F: Fn(Select<E>) -> Select<E> + Send + Sync + 'static,
    {
        self.before.push(Box::new(f));
        self
    }

    /// Runs last, after filters and ordering.
    #[must_use]
    pub fn after<F>(mut self, f: F) -> Self
    where
        F: Fn(Select<E>) -> Select<E> + Send + Sync + 'static,
    {
        self.after.push(Box::new(f));
        self
    }

    #[must_use]
    pub fn ignore_query_filters(mut self) -> Self {
        self.ignore_query_filters = true;
        self
    }

    #[must_use]
    pub fn get_tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    #[must_use]
    pub fn get_sortings(&self) -> &[Sorting<E>] {
        &self.sortings
    }

    #[must_use]
    pub fn ignores_query_filters(&self) -> bool {
        self.ignore_query_filters
    }

    pub(crate) fn span(&self) -> tracing::Span {
        tracing::debug_span!(
            "modkit_repo.query",
            entity = %entity_name::<E>(),
            tag = self.tag.as_deref().unwrap_or_default()
        )
    }
}

/// Global filters applied to every query of an entity unless a query opts out.
#[derive(Default)]
pub struct QueryFilters {
    filters: DashMap<TypeId, Condition>,
}

impl fmt::Debug for QueryFilters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryFilters")
            .field("entities", &self.filters.len())
            .finish()
    }
}

impl QueryFilters {
    /// Replace the filter for `E`.
    pub fn register<E: EntityTrait>(&self, spec: &dyn Specification<E>) {
        self.filters.insert(TypeId::of::<E>(), spec.satisfied_by());
    }

    pub fn remove<E: EntityTrait>(&self) {
        self.filters.remove(&TypeId::of::<E>());
    }

    #[must_use]
    pub fn condition_for<E: EntityTrait>(&self) -> Option<Condition> {
        self.filters
            .get(&TypeId::of::<E>())
            .map(|c| c.value().clone())
    }
}

/// Build the select for `spec` under `config`.
///
/// Order: `before` hooks, global filter, `spec`, sortings, `after` hooks.
pub(crate) fn shape<E: EntityTrait>(
    filters: Option<&QueryFilters>,
    spec: Option<&dyn Specification<E>>,
    config: &QueryConfig<E>,
) -> Select<E> {
    let mut query = config
        .before
        .iter()
        .fold(E::find(), |q, f| f(q));
    if !config.ignore_query_filters
        && let Some(cond) = filters.and_then(QueryFilters::condition_for::<E>)
    {
        query = query.filter(cond);
    }
    if let Some(spec) = spec {
        query = query.filter(spec.satisfied_by());
    }
    let query = apply_sorting(query, &config.sortings);
    config.after.iter().fold(query, |q, f| f(q))
}

/// The global filter for `E`, combined with `spec`.
pub(crate) fn filtered_condition<E: EntityTrait>(
    filters: &QueryFilters,
    spec: &dyn Specification<E>,
) -> Condition {
    match filters.condition_for::<E>() {
        Some(global) => Condition::all().add(global).add(spec.satisfied_by()),
        None => spec.satisfied_by(),
    }
}

/// Left-join `R` onto `query` for an eager load.
///
/// `filter` goes into the join's `ON` clause so parents whose related rows
/// are all hidden still come back, with an empty list.
pub(crate) fn with_related<E, R>(
    query: Select<E>,
    filter: Option<Condition>,
) -> SelectTwoMany<E, R>
where
    E: EntityTrait + Related<R>,
    R: EntityTrait,
{
    let Some(cond) = filter else {
        return query.find_with_related(R::default());
    };
    let mut query = query;
    if let Some(via) = <E as Related<R>>::via() {
        query = query.join(JoinType::LeftJoin, via);
    }
    let rel = <E as Related<R>>::to().on_condition(move |_, _| cond.clone());
    query.join(JoinType::LeftJoin, rel).select_with(R::default())
}
