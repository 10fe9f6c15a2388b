#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use modkit_repo::{MigrationSource, RepositoryConfig, UnitOfWork, UnitOfWorkFactory};
use sea_orm::{ActiveValue::NotSet, ActiveValue::Set, DbErr, Schema};
use sea_orm_migration::{MigrationName, MigrationTrait, SchemaManager};

pub mod author {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "authors")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub name: String,
        pub active: bool,
        pub deleted: bool,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(has_many = "super::book::Entity")]
        Book,
    }

    impl Related<super::book::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Book.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod book {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "books")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub author_id: i32,
        pub title: String,
        pub subtitle: Option<String>,
        pub pages: i32,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(
            belongs_to = "super::author::Entity",
            from = "Column::AuthorId",
            to = "super::author::Column::Id"
        )]
        Author,
        #[sea_orm(has_many = "super::review::Entity")]
        Review,
    }

    impl Related<super::author::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Author.def()
        }
    }

    impl Related<super::review::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Review.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod review {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "reviews")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub book_id: i32,
        pub stars: i32,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(
            belongs_to = "super::book::Entity",
            from = "Column::BookId",
            to = "super::book::Column::Id"
        )]
        Book,
    }

    impl Related<super::book::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Book.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}
}

pub struct CreateLibrary;

impl MigrationName for CreateLibrary {
    fn name(&self) -> &str {
        "m001_create_library"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for CreateLibrary {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let schema = Schema::new(manager.get_database_backend());
        manager
            .create_table(schema.create_table_from_entity(author::Entity))
            .await?;
        manager
            .create_table(schema.create_table_from_entity(book::Entity))
            .await?;
        manager
            .create_table(schema.create_table_from_entity(review::Entity))
            .await
    }

    async fn down(&self, _manager: &SchemaManager) -> Result<(), DbErr> {
        Ok(())
    }
}

pub struct LibrarySource;

impl MigrationSource for LibrarySource {
    fn name(&self) -> &str {
        "library"
    }

    fn migrations(&self) -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(CreateLibrary)]
    }
}

pub fn memory_config() -> RepositoryConfig {
    RepositoryConfig::new("sqlite::memory:")
}

/// A factory over a fresh in-memory database with the library schema.
pub async fn factory_with(config: RepositoryConfig) -> UnitOfWorkFactory {
    let factory = UnitOfWorkFactory::connect(config)
        .await
        .expect("connect to in-memory sqlite");
    factory
        .unit_of_work()
        .update_database(&LibrarySource)
        .await
        .expect("create library schema");
    factory
}

pub async fn factory() -> UnitOfWorkFactory {
    factory_with(memory_config()).await
}

pub fn new_author(name: &str, active: bool) -> author::ActiveModel {
    author::ActiveModel {
        id: NotSet,
        name: Set(name.to_owned()),
        active: Set(active),
        deleted: Set(false),
    }
}

pub fn new_book(author_id: i32, title: &str, pages: i32) -> book::ActiveModel {
    book::ActiveModel {
        id: NotSet,
        author_id: Set(author_id),
        title: Set(title.to_owned()),
        subtitle: NotSet,
        pages: Set(pages),
    }
}

pub struct Library {
    pub authors: Vec<author::Model>,
    pub books: Vec<book::Model>,
}

/// Authors: Ada (active, 2 books), Brian (active, 1 book), Carla (inactive),
/// Dmitri (active, soft-deleted). Ada's first book has two reviews.
pub async fn seed(uow: &UnitOfWork) -> Library {
    let authors_set = uow.create_set::<author::Entity>();
    let mut authors = Vec::new();
    for (name, active, deleted) in [
        ("Ada", true, false),
        ("Brian", true, false),
        ("Carla", false, false),
        ("Dmitri", true, true),
    ] {
        let mut model = new_author(name, active);
        model.deleted = Set(deleted);
        authors.push(authors_set.insert(model).await.unwrap());
    }

    let books_set = uow.create_set::<book::Entity>();
    let mut books = Vec::new();
    for (author, title, pages) in [
        (authors[0].id, "Notes on the Engine", 120),
        (authors[0].id, "Sketch of the Analytical Engine", 80),
        (authors[1].id, "The C Programming Language", 272),
    ] {
        books.push(books_set.insert(new_book(author, title, pages)).await.unwrap());
    }

    let reviews = uow.create_set::<review::Entity>();
    for stars in [5, 4] {
        reviews
            .insert(review::ActiveModel {
                id: NotSet,
                book_id: Set(books[0].id),
                stars: Set(stars),
            })
            .await
            .unwrap();
    }

    Library { authors, books }
}
