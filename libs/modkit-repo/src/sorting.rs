use std::fmt;
use std::str::FromStr;

use sea_orm::{EntityTrait, Order, QueryOrder, Select};

use crate::entity_name;
use crate::error::{RepoError, RepoResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    fn order(self) -> Order {
        match self {
            Self::Ascending => Order::Asc,
            Self::Descending => Order::Desc,
        }
    }
}

impl FromStr for SortDirection {
    type Err = RepoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "asc" | "ascending" => Ok(Self::Ascending),
            "desc" | "descending" => Ok(Self::Descending),
            other => Err(RepoError::InvalidSort(format!("unknown direction '{other}'"))),
        }
    }
}

/// One ordering term over a column of `E`.
pub struct Sorting<E: EntityTrait> {
    pub column: E::Column,
    pub direction: SortDirection,
}

impl<E: EntityTrait> Clone for Sorting<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E: EntityTrait> Copy for Sorting<E> {}

impl<E: EntityTrait> fmt::Debug for Sorting<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sorting")
            .field("column", &self.column)
            .field("direction", &self.direction)
            .finish()
    }
}

impl<E: EntityTrait> Sorting<E> {
    #[must_use]
    pub fn asc(column: E::Column) -> Self {
        Self {
            column,
            direction: SortDirection::Ascending,
        }
    }

    #[must_use]
    pub fn desc(column: E::Column) -> Self {
        Self {
            column,
            direction: SortDirection::Descending,
        }
    }

    /// Parse `column[:direction]`, e.g. `created_at:desc`.
    ///
    /// # Errors
    /// [`RepoError::UnknownColumn`] when the entity has no such column, or
    /// [`RepoError::InvalidSort`] for an empty term or unknown direction.
    pub fn parse(term: &str) -> RepoResult<Self> {
        let (name, dir) = term.split_once(':').unwrap_or((term, ""));
        let name = name.trim();
        if name.is_empty() {
            return Err(RepoError::InvalidSort(format!("empty column in '{term}'")));
        }
        let column = E::Column::from_str(name).map_err(|_| RepoError::UnknownColumn {
            entity: entity_name::<E>(),
            column: name.to_owned(),
        })?;
        Ok(Self {
            column,
            direction: dir.parse()?,
        })
    }

    /// Parse a comma separated list of terms. Blank input yields no sorting.
    ///
    /// # Errors
    /// Fails on the first term [`Sorting::parse`] rejects.
    pub fn parse_list(terms: &str) -> RepoResult<Vec<Self>> {
        terms
            .split(',')
            .filter(|t| !t.trim().is_empty())
            .map(Self::parse)
            .collect()
    }
}

pub(crate) fn apply_sorting<E: EntityTrait>(mut query: Select<E>, sortings: &[Sorting<E>]) -> Select<E> {
    for s in sortings {
        query = query.order_by(s.column, s.direction.order());
    }
    query
}
