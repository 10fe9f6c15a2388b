#![allow(clippy::unwrap_used, clippy::expect_used)]

#[cfg(feature = "sqlite")]
mod common;

#[cfg(feature = "sqlite")]
mod sqlite_read_tests {
    use super::common::{self, author, book, review};
    use anyhow::Result;
    use modkit_repo::{
        DirectSpecification, PageRequest, PagedRepository, QueryConfig, ReadRepository,
        RepoError, Sorting, SpecificationExt, TrueSpecification,
    };
    use sea_orm::{ActiveValue::Set, ColumnTrait, Condition, QuerySelect, Value};

    fn names(rows: &[author::Model]) -> Vec<&str> {
        rows.iter().map(|a| a.name.as_str()).collect()
    }

    #[tokio::test]
    async fn get_by_key_and_get_all_sorted() -> Result<()> {
        let factory = common::factory().await;
        let uow = factory.unit_of_work();
        let lib = common::seed(&uow).await;
        let repo = uow.repository::<author::Entity>();

        let ada = repo.get(lib.authors[0].id, &QueryConfig::default()).await?;
        assert_eq!(ada.map(|a| a.name), Some("Ada".to_owned()));
        assert!(repo.get(9999, &QueryConfig::default()).await?.is_none());

        let all = repo
            .get_all(&QueryConfig::default().sort_by(Sorting::desc(author::Column::Name)))
            .await?;
        assert_eq!(names(&all), ["Dmitri", "Carla", "Brian", "Ada"]);
        Ok(())
    }

    #[tokio::test]
    async fn filtered_first_and_single() -> Result<()> {
        let factory = common::factory().await;
        let uow = factory.unit_of_work();
        common::seed(&uow).await;
        let repo = uow.repository::<author::Entity>();
        let cfg = QueryConfig::default().sort_by(Sorting::asc(author::Column::Name));

        let active = DirectSpecification::<author::Entity>::new(author::Column::Active.eq(true));
        let rows = repo.get_filtered(&active, &cfg).await?;
        assert_eq!(names(&rows), ["Ada", "Brian", "Dmitri"]);

        let first = repo.get_first(Some(&active), &cfg).await?;
        assert_eq!(first.unwrap().name, "Ada");

        let inactive =
            DirectSpecification::<author::Entity>::new(author::Column::Active.eq(true)).not();
        let single = repo.get_single(Some(&inactive), &cfg).await?;
        assert_eq!(single.unwrap().name, "Carla");

        let err = repo.get_single(Some(&active), &cfg).await.unwrap_err();
        assert!(matches!(err, RepoError::MultipleResults { .. }), "{err}");

        let nobody = author::Column::Name.eq("Zed");
        assert!(repo.get_single(Some(&nobody), &cfg).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn count_any_all() -> Result<()> {
        let factory = common::factory().await;
        let uow = factory.unit_of_work();
        common::seed(&uow).await;
        let repo = uow.repository::<author::Entity>();

        assert_eq!(repo.count(None).await?, 4);
        assert_eq!(repo.count(Some(&author::Column::Active.eq(true))).await?, 3);
        assert!(repo.any(Some(&author::Column::Name.starts_with("B"))).await?);
        assert!(!repo.any(Some(&author::Column::Name.starts_with("Z"))).await?);

        assert!(repo.all(Some(&author::Column::Name.ne(""))).await?);
        assert!(!repo.all(Some(&author::Column::Active.eq(true))).await?);
        assert!(repo.all(Some(&TrueSpecification::default())).await?);
        assert!(repo.all(None).await?);
        Ok(())
    }

    #[tokio::test]
    async fn all_holds_for_empty_table() -> Result<()> {
        let factory = common::factory().await;
        let uow = factory.unit_of_work();
        let repo = uow.repository::<author::Entity>();
        assert!(repo.all(Some(&author::Column::Active.eq(true))).await?);
        assert!(!repo.any(None).await?);
        Ok(())
    }

    #[tokio::test]
    async fn all_counts_null_predicates_as_unsatisfied() -> Result<()> {
        let factory = common::factory().await;
        let uow = factory.unit_of_work();
        let lib = common::seed(&uow).await;
        uow.create_set::<book::Entity>()
            .insert(book::ActiveModel {
                subtitle: Set(Some("Draft".to_owned())),
                ..common::new_book(lib.authors[1].id, "Unix Notes", 90)
            })
            .await?;
        let repo = uow.repository::<book::Entity>();

        let drafts = book::Column::Subtitle.eq("Draft");
        assert!(repo.any(Some(&drafts)).await?);
        assert!(!repo.all(Some(&drafts)).await?);

        let draft_or_missing = Condition::any()
            .add(book::Column::Subtitle.eq("Draft"))
            .add(book::Column::Subtitle.is_null());
        assert!(repo.all(Some(&draft_or_missing)).await?);
        Ok(())
    }

    #[tokio::test]
    async fn all_of_negated_true_is_false_unless_empty() -> Result<()> {
        let factory = common::factory().await;
        let uow = factory.unit_of_work();
        let repo = uow.repository::<author::Entity>();
        let nothing = TrueSpecification::<author::Entity>::default().not();
        assert!(repo.all(Some(&nothing)).await?);

        common::seed(&uow).await;
        assert!(!repo.all(Some(&nothing)).await?);
        assert_eq!(repo.count(Some(&nothing)).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn paging_reports_totals() -> Result<()> {
        let factory = common::factory().await;
        let uow = factory.unit_of_work();
        common::seed(&uow).await;
        let repo = uow.repository::<author::Entity>();
        let cfg = QueryConfig::default().sort_by(Sorting::asc(author::Column::Id));

        let page = repo.get_page(None, PageRequest::new(2, 3), &cfg).await?;
        assert_eq!(page.total, 4);
        assert_eq!(page.page_index, 2);
        assert_eq!(page.total_pages(), 2);
        assert!(!page.has_next());
        assert_eq!(names(&page.items), ["Dmitri"]);

        let first = repo.get_paged(None, PageRequest::new(0, 2), &cfg).await?;
        assert_eq!(names(&first), ["Ada", "Brian"]);

        let everything = repo.get_page(None, PageRequest::unpaged(), &cfg).await?;
        assert_eq!(everything.items.len(), 4);
        assert_eq!(everything.total, 4);
        Ok(())
    }

    #[tokio::test]
    async fn global_filter_hides_rows_until_ignored() -> Result<()> {
        let factory = common::factory().await;
        factory.register_filter::<author::Entity>(&author::Column::Deleted.eq(false));
        let uow = factory.unit_of_work();
        common::seed(&uow).await;
        let repo = uow.repository::<author::Entity>();

        assert_eq!(repo.count(None).await?, 3);
        let visible = repo.get_all(&QueryConfig::default()).await?;
        assert!(visible.iter().all(|a| !a.deleted));

        let everything = repo
            .get_all(&QueryConfig::default().ignore_query_filters())
            .await?;
        assert_eq!(everything.len(), 4);

        let other = factory.unit_of_work();
        assert_eq!(other.repository::<author::Entity>().count(None).await?, 3);
        Ok(())
    }

    #[tokio::test]
    async fn hooks_shape_the_query() -> Result<()> {
        let factory = common::factory().await;
        let uow = factory.unit_of_work();
        common::seed(&uow).await;
        let repo = uow.repository::<author::Entity>();

        let cfg = QueryConfig::default()
            .sortings(Sorting::parse_list("active:desc, name:asc")?)
            .tag("top-two")
            .after(|q| q.limit(2));
        let rows = repo.get_all(&cfg).await?;
        assert_eq!(names(&rows), ["Ada", "Brian"]);
        Ok(())
    }

    #[tokio::test]
    async fn mapped_reads() -> Result<()> {
        let factory = common::factory().await;
        let uow = factory.unit_of_work();
        common::seed(&uow).await;
        let repo = uow.repository::<author::Entity>();
        let cfg = QueryConfig::default().sort_by(Sorting::asc(author::Column::Name));

        let upper = repo
            .get_mapped(None, &cfg, |a| a.name.to_uppercase())
            .await?;
        assert_eq!(upper, ["ADA", "BRIAN", "CARLA", "DMITRI"]);

        let len = repo
            .get_first_mapped(Some(&author::Column::Active.eq(false)), &cfg, |a| a.name.len())
            .await?;
        assert_eq!(len, Some(5));
        Ok(())
    }

    #[tokio::test]
    async fn raw_sql_maps_onto_entity() -> Result<()> {
        let factory = common::factory().await;
        let uow = factory.unit_of_work();
        common::seed(&uow).await;

        let rows = uow
            .create_set::<author::Entity>()
            .from_raw_sql(
                "SELECT * FROM authors WHERE name LIKE ? ORDER BY id",
                vec![Value::from("C%")],
            )
            .await?;
        assert_eq!(names(&rows), ["Carla"]);
        Ok(())
    }

    #[tokio::test]
    async fn related_rows_load_through_typed_relations() -> Result<()> {
        let factory = common::factory().await;
        let uow = factory.unit_of_work();
        let lib = common::seed(&uow).await;
        let ada = &lib.authors[0];
        let authors = uow.create_set::<author::Entity>();

        let books = authors.load_related::<book::Entity>(ada).await?;
        assert_eq!(books.len(), 2);

        let long = authors
            .load_related_filtered::<book::Entity>(ada, &book::Column::Pages.gt(100))
            .await?;
        assert_eq!(long.len(), 1);
        assert_eq!(long[0].title, "Notes on the Engine");

        let owner = uow
            .create_set::<book::Entity>()
            .load_one_related::<author::Entity>(&lib.books[2])
            .await?;
        assert_eq!(owner.map(|a| a.name), Some("Brian".to_owned()));

        let cascade = authors
            .load_cascade::<book::Entity, review::Entity>(ada)
            .await?;
        let reviews: usize = cascade.iter().map(|(_, r)| r.len()).sum();
        assert_eq!(cascade.len(), 2);
        assert_eq!(reviews, 2);

        let with_books = uow
            .repository::<author::Entity>()
            .get_with_related::<book::Entity>(lib.authors[1].id, &QueryConfig::default())
            .await?
            .unwrap();
        assert_eq!(with_books.0.name, "Brian");
        assert_eq!(with_books.1.len(), 1);

        let eager = authors
            .find_with_related::<book::Entity>(
                Some(&author::Column::Active.eq(false)),
                &QueryConfig::default(),
            )
            .await?;
        assert_eq!(eager.len(), 1);
        assert!(eager[0].1.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn global_filters_apply_to_related_rows() -> Result<()> {
        let factory = common::factory().await;
        factory.register_filter::<book::Entity>(&book::Column::Pages.gt(100));
        factory.register_filter::<review::Entity>(&review::Column::Stars.gte(5));
        factory.register_filter::<author::Entity>(&author::Column::Name.ne("Brian"));
        let uow = factory.unit_of_work();
        let lib = common::seed(&uow).await;
        let ada = &lib.authors[0];
        let authors = uow.create_set::<author::Entity>();

        let books = authors.load_related::<book::Entity>(ada).await?;
        assert_eq!(books.len(), 1);
        assert_eq!(books[0].title, "Notes on the Engine");

        let titled = authors
            .load_related_filtered::<book::Entity>(ada, &book::Column::Title.contains("Sketch"))
            .await?;
        assert!(titled.is_empty());

        let books_set = uow.create_set::<book::Entity>();
        let hidden_owner = books_set
            .load_one_related::<author::Entity>(&lib.books[2])
            .await?;
        assert!(hidden_owner.is_none());
        let owner = books_set
            .load_one_related::<author::Entity>(&lib.books[0])
            .await?;
        assert_eq!(owner.map(|a| a.name), Some("Ada".to_owned()));

        let cascade = authors
            .load_cascade::<book::Entity, review::Entity>(ada)
            .await?;
        assert_eq!(cascade.len(), 1);
        assert_eq!(cascade[0].1.len(), 1);
        assert_eq!(cascade[0].1[0].stars, 5);

        let cfg = QueryConfig::default().sort_by(Sorting::asc(author::Column::Id));
        let eager = authors.find_with_related::<book::Entity>(None, &cfg).await?;
        let per_author: Vec<(&str, usize)> = eager
            .iter()
            .map(|(a, b)| (a.name.as_str(), b.len()))
            .collect();
        assert_eq!(per_author, [("Ada", 1), ("Carla", 0), ("Dmitri", 0)]);

        let with_books = uow
            .repository::<author::Entity>()
            .get_with_related::<book::Entity>(ada.id, &QueryConfig::default())
            .await?
            .unwrap();
        assert_eq!(with_books.1.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn related_filters_can_be_skipped() -> Result<()> {
        let factory = common::factory().await;
        factory.register_filter::<book::Entity>(&book::Column::Pages.gt(100));
        let uow = factory.unit_of_work();
        let lib = common::seed(&uow).await;
        let ada = &lib.authors[0];
        let authors = uow.create_set::<author::Entity>();

        let books = authors
            .ignore_query_filters()
            .load_related::<book::Entity>(ada)
            .await?;
        assert_eq!(books.len(), 2);

        let cfg = QueryConfig::default().ignore_query_filters();
        let eager = authors.find_with_related::<book::Entity>(None, &cfg).await?;
        let total: usize = eager.iter().map(|(_, b)| b.len()).sum();
        assert_eq!(total, 3);

        let visible = uow.create_set::<book::Entity>().count(None).await?;
        let all_books = uow
            .create_set::<book::Entity>()
            .ignore_query_filters()
            .count(None)
            .await?;
        assert_eq!((visible, all_books), (2, 3));
        Ok(())
    }

    #[tokio::test]
    async fn read_repository_as_trait_object() -> Result<()> {
        let factory = common::factory().await;
        let uow = factory.unit_of_work();
        common::seed(&uow).await;

        let repo = uow.read_repository::<author::Entity>();
        let dyn_repo: &dyn ReadRepository<author::Entity> = &repo;
        assert_eq!(dyn_repo.count(None).await?, 4);
        Ok(())
    }
}
