//! Reusable filter predicates.
//!
//! A [`Specification`] turns into a `SeaORM` [`Condition`]. Plain conditions and
//! expressions are specifications too, so `Column::Active.eq(true)` can be passed
//! anywhere a specification is expected.
//!
//! ```ignore
//! let active = DirectSpecification::new(user::Column::Active.eq(true));
//! let recent = DirectSpecification::new(user::Column::CreatedAt.gt(cutoff));
//! let spec = active.and(recent.not());
//! let users = uow.repository::<user::Entity>().get_filtered(&spec, &QueryConfig::default()).await?;
//! ```

use std::fmt;
use std::marker::PhantomData;

use sea_orm::sea_query::{IntoCondition, IntoValueTuple, SimpleExpr, ValueTuple};
use sea_orm::{
    ColumnTrait, Condition, EntityTrait, Iterable, ModelTrait, PrimaryKeyToColumn,
    PrimaryKeyTrait, Value,
};

use crate::error::{RepoError, RepoResult};

pub trait Specification<E: EntityTrait>: Send + Sync {
    fn satisfied_by(&self) -> Condition;
}

impl<E: EntityTrait> Specification<E> for Condition {
    fn satisfied_by(&self) -> Condition {
        self.clone()
    }
}

impl<E: EntityTrait> Specification<E> for SimpleExpr {
    fn satisfied_by(&self) -> Condition {
        self.clone().into_condition()
    }
}

impl<E: EntityTrait, S: Specification<E> + ?Sized> Specification<E> for Box<S> {
    fn satisfied_by(&self) -> Condition {
        (**self).satisfied_by()
    }
}

/// Wraps a fixed condition.
pub struct DirectSpecification<E> {
    condition: Condition,
    _entity: PhantomData<fn() -> E>,
}

impl<E: EntityTrait> DirectSpecification<E> {
    #[must_use]
    pub fn new(condition: impl IntoCondition) -> Self {
        Self {
            condition: condition.into_condition(),
            _entity: PhantomData,
        }
    }
}

impl<E> fmt::Debug for DirectSpecification<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectSpecification")
            .field("condition", &self.condition)
            .finish_non_exhaustive()
    }
}

impl<E: EntityTrait> Specification<E> for DirectSpecification<E> {
    fn satisfied_by(&self) -> Condition {
        self.condition.clone()
    }
}

/// Matches every row.
pub struct TrueSpecification<E>(PhantomData<fn() -> E>);

impl<E> Default for TrueSpecification<E> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<E: EntityTrait> Specification<E> for TrueSpecification<E> {
    fn satisfied_by(&self) -> Condition {
        Condition::all()
    }
}

pub struct AndSpecification<L, R> {
    left: L,
    right: R,
}

impl<E: EntityTrait, L: Specification<E>, R: Specification<E>> Specification<E>
    for AndSpecification<L, R>
{
    fn satisfied_by(&self) -> Condition {
        Condition::all()
            .add(self.left.satisfied_by())
            .add(self.right.satisfied_by())
    }
}

pub struct OrSpecification<L, R> {
    left: L,
    right: R,
}

impl<E: EntityTrait, L: Specification<E>, R: Specification<E>> Specification<E>
    for OrSpecification<L, R>
{
    fn satisfied_by(&self) -> Condition {
        Condition::any()
            .add(self.left.satisfied_by())
            .add(self.right.satisfied_by())
    }
}

pub struct NotSpecification<S> {
    inner: S,
}

impl<E: EntityTrait, S: Specification<E>> Specification<E> for NotSpecification<S> {
    fn satisfied_by(&self) -> Condition {
        self.inner.satisfied_by().not()
    }
}

/// Combinators available on every specification.
pub trait SpecificationExt<E: EntityTrait>: Specification<E> + Sized {
    #[must_use]
    fn and<R: Specification<E>>(self, right: R) -> AndSpecification<Self, R> {
        AndSpecification { left: self, right }
    }

    #[must_use]
    fn or<R: Specification<E>>(self, right: R) -> OrSpecification<Self, R> {
        OrSpecification { left: self, right }
    }

    #[must_use]
    fn not(self) -> NotSpecification<Self> {
        NotSpecification { inner: self }
    }
}

impl<E: EntityTrait, S: Specification<E>> SpecificationExt<E> for S {}

/// Primary-key equality; composite keys compare every column.
pub struct ByKeySpecification<E> {
    condition: Condition,
    _entity: PhantomData<fn() -> E>,
}

impl<E: EntityTrait> ByKeySpecification<E> {
    /// # Errors
    /// Returns [`RepoError::InvalidParameter`] when the number of key values does
    /// not match the number of primary-key columns.
    pub fn new(key: <E::PrimaryKey as PrimaryKeyTrait>::ValueType) -> RepoResult<Self> {
        let values: Vec<Value> = match key.into_value_tuple() {
            ValueTuple::One(v) => vec![v],
            ValueTuple::Two(a, b) => vec![a, b],
            ValueTuple::Three(a, b, c) => vec![a, b, c],
            ValueTuple::Many(vs) => vs,
        };
        let columns: Vec<E::Column> = E::PrimaryKey::iter()
            .map(|pk| pk.into_column())
            .collect();
        if columns.len() != values.len() {
            return Err(RepoError::InvalidParameter(format!(
                "expected {} key value(s), got {}",
                columns.len(),
                values.len()
            )));
        }
        let condition = columns
            .into_iter()
            .zip(values)
            .fold(Condition::all(), |cond, (col, v)| cond.add(col.eq(v)));
        Ok(Self {
            condition,
            _entity: PhantomData,
        })
    }

    /// Key predicate for an already loaded row.
    #[must_use]
    pub fn of_model(model: &E::Model) -> Self {
        let condition = E::PrimaryKey::iter().fold(Condition::all(), |cond, pk| {
            let col = pk.into_column();
            cond.add(col.eq(model.get(col)))
        });
        Self {
            condition,
            _entity: PhantomData,
        }
    }
}

impl<E: EntityTrait> Specification<E> for ByKeySpecification<E> {
    fn satisfied_by(&self) -> Condition {
        self.condition.clone()
    }
}
