//! Typed column assignments for bulk updates.

use std::fmt;

use sea_orm::sea_query::{Expr, SimpleExpr};
use sea_orm::{EntityTrait, UpdateMany, Value};

use crate::error::{RepoError, RepoResult};

/// Ordered `column = value` assignments applied by `update_many`.
///
/// ```ignore
/// let changes = UpdateSet::<user::Entity>::new()
///     .set(user::Column::Active, false)
///     .set_expr(user::Column::Version, Expr::col(user::Column::Version).add(1));
/// ```
pub struct UpdateSet<E: EntityTrait> {
    assignments: Vec<(E::Column, SimpleExpr)>,
}

impl<E: EntityTrait> Default for UpdateSet<E> {
    fn default() -> Self {
        Self {
            assignments: Vec::new(),
        }
    }
}

impl<E: EntityTrait> Clone for UpdateSet<E> {
    fn clone(&self) -> Self {
        Self {
            assignments: self.assignments.clone(),
        }
    }
}

impl<E: EntityTrait> fmt::Debug for UpdateSet<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.assignments.iter()).finish()
    }
}

impl<E: EntityTrait> UpdateSet<E> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn set<V: Into<Value>>(self, column: E::Column, value: V) -> Self {
        self.set_expr(column, Expr::value(value.into()))
    }

    #[must_use]
    pub fn set_expr(mut self, column: E::Column, expr: impl Into<SimpleExpr>) -> Self {
        self.assignments.push((column, expr.into()));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub(crate) fn apply(self, mut update: UpdateMany<E>) -> RepoResult<UpdateMany<E>> {
        if self.assignments.is_empty() {
            return Err(RepoError::EmptyUpdate);
        }
        for (column, expr) in self.assignments {
            update = update.col_expr(column, expr);
        }
        Ok(update)
    }
}
