//! Changes staged on a unit of work until commit.

use std::fmt;
use std::marker::PhantomData;

use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, DatabaseTransaction, DbErr, EntityTrait,
    IntoActiveModel,
};

use crate::entity_name;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        })
    }
}

#[async_trait::async_trait]
pub trait PendingChange: Send + Sync {
    fn kind(&self) -> ChangeKind;

    fn entity(&self) -> String;

    /// Apply the change, returning the number of rows it touched.
    async fn apply(&self, db: &DatabaseTransaction) -> Result<u64, DbErr>;
}

pub struct Staged<E: EntityTrait> {
    kind: ChangeKind,
    model: E::ActiveModel,
    _entity: PhantomData<fn() -> E>,
}

impl<E: EntityTrait> Staged<E> {
    pub fn new(kind: ChangeKind, model: E::ActiveModel) -> Self {
        Self {
            kind,
            model,
            _entity: PhantomData,
        }
    }
}

#[async_trait::async_trait]
impl<E> PendingChange for Staged<E>
where
    E: EntityTrait,
    E::Model: IntoActiveModel<E::ActiveModel>,
    E::ActiveModel: ActiveModelBehavior + Send + Sync,
{
    fn kind(&self) -> ChangeKind {
        self.kind
    }

    fn entity(&self) -> String {
        entity_name::<E>()
    }

    async fn apply(&self, db: &DatabaseTransaction) -> Result<u64, DbErr> {
        let model = self.model.clone();
        match self.kind {
            ChangeKind::Insert => E::insert(model).exec_without_returning(db).await,
            ChangeKind::Update => {
                model.update(db).await?;
                Ok(1)
            }
            ChangeKind::Delete => {
                let res = model.delete(db).await?;
                if res.rows_affected == 0 {
                    return Err(DbErr::RecordNotFound(format!(
                        "{} row already deleted",
                        entity_name::<E>()
                    )));
                }
                Ok(res.rows_affected)
            }
        }
    }
}
