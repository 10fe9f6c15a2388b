#![allow(clippy::unwrap_used, clippy::expect_used)]

#[cfg(feature = "sqlite")]
mod common;

#[cfg(feature = "sqlite")]
mod sqlite_migration_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::common;
    use modkit_repo::{
        MigrationError, MigrationOutcome, MigrationSource, MigratorSource, RepoError, SqlConfig,
        UnitOfWorkFactory,
    };
    use sea_orm::{ConnectionTrait, DbErr, Statement};
    use sea_orm_migration::{MigrationName, MigrationTrait, MigratorTrait, SchemaManager};
    use tokio::sync::Notify;
    use tracing_test::traced_test;

    struct CreateTable {
        name: &'static str,
        table: &'static str,
    }

    impl MigrationName for CreateTable {
        fn name(&self) -> &str {
            self.name
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for CreateTable {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            let sql = format!("CREATE TABLE {} (id INTEGER PRIMARY KEY)", self.table);
            manager
                .get_connection()
                .execute(Statement::from_string(manager.get_database_backend(), sql))
                .await?;
            Ok(())
        }

        async fn down(&self, _manager: &SchemaManager) -> Result<(), DbErr> {
            Ok(())
        }
    }

    struct Broken;

    impl MigrationName for Broken {
        fn name(&self) -> &str {
            "m002_broken"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Broken {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .get_connection()
                .execute_unprepared("CREATE TABLE half_done (id INTEGER PRIMARY KEY)")
                .await?;
            manager
                .get_connection()
                .execute_unprepared("THIS IS NOT SQL")
                .await?;
            Ok(())
        }

        async fn down(&self, _manager: &SchemaManager) -> Result<(), DbErr> {
            Ok(())
        }
    }

    /// Ends the surrounding transaction itself, then fails, so the runner's
    /// rollback has nothing to roll back.
    struct CommitsThenFails;

    impl MigrationName for CommitsThenFails {
        fn name(&self) -> &str {
            "m001_commits_then_fails"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for CommitsThenFails {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager.get_connection().execute_unprepared("COMMIT").await?;
            Err(DbErr::Custom("gave up after commit".to_owned()))
        }

        async fn down(&self, _manager: &SchemaManager) -> Result<(), DbErr> {
            Ok(())
        }
    }

    struct Source {
        name: &'static str,
        migrations: fn() -> Vec<Box<dyn MigrationTrait>>,
    }

    impl MigrationSource for Source {
        fn name(&self) -> &str {
            self.name
        }

        fn migrations(&self) -> Vec<Box<dyn MigrationTrait>> {
            (self.migrations)()
        }
    }

    fn catalog() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(CreateTable {
                name: "m002_shelves",
                table: "shelves",
            }),
            Box::new(CreateTable {
                name: "m001_rooms",
                table: "rooms",
            }),
        ]
    }

    async fn table_exists(factory: &UnitOfWorkFactory, table: &str) -> bool {
        factory
            .unit_of_work()
            .execute_command(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
                &SqlConfig::new().param(table),
            )
            .await
            .unwrap()
            > 0
    }

    #[tokio::test]
    async fn applies_in_name_order_then_skips() {
        let factory = common::factory().await;
        let uow = factory.unit_of_work();
        let source = Source {
            name: "catalog",
            migrations: catalog,
        };

        assert_eq!(
            uow.pending_migrations(&source).await.unwrap(),
            ["m001_rooms", "m002_shelves"]
        );

        let first = uow.update_database(&source).await.unwrap();
        assert_eq!(
            first,
            MigrationOutcome::Applied {
                applied: vec!["m001_rooms".to_owned(), "m002_shelves".to_owned()],
                skipped: 0,
            }
        );
        assert!(table_exists(&factory, "rooms").await);
        assert!(uow.pending_migrations(&source).await.unwrap().is_empty());

        let second = uow.update_database(&source).await.unwrap();
        assert_eq!(
            second,
            MigrationOutcome::Applied {
                applied: vec![],
                skipped: 2,
            }
        );
    }

    #[tokio::test]
    async fn sources_keep_separate_history() {
        let factory = common::factory().await;
        let uow = factory.unit_of_work();

        let rooms = || -> Vec<Box<dyn MigrationTrait>> {
            vec![Box::new(CreateTable {
                name: "m001_init",
                table: "rooms",
            })]
        };
        let shelves = || -> Vec<Box<dyn MigrationTrait>> {
            vec![Box::new(CreateTable {
                name: "m001_init",
                table: "shelves",
            })]
        };

        let a = Source {
            name: "rooms",
            migrations: rooms,
        };
        let b = Source {
            name: "shelves",
            migrations: shelves,
        };
        assert!(matches!(
            uow.update_database(&a).await.unwrap(),
            MigrationOutcome::Applied { ref applied, .. } if applied.len() == 1
        ));
        assert!(matches!(
            uow.update_database(&b).await.unwrap(),
            MigrationOutcome::Applied { ref applied, .. } if applied.len() == 1
        ));
        assert!(table_exists(&factory, "shelves").await);
    }

    #[tokio::test]
    async fn failed_migration_is_rolled_back_and_not_recorded() {
        let factory = common::factory().await;
        let uow = factory.unit_of_work();
        let source = Source {
            name: "broken",
            migrations: || -> Vec<Box<dyn MigrationTrait>> {
                vec![
                    Box::new(CreateTable {
                        name: "m001_ok",
                        table: "fine",
                    }),
                    Box::new(Broken),
                ]
            },
        };

        let err = uow.update_database(&source).await.unwrap_err();
        assert!(
            matches!(
                &err,
                RepoError::Migration(MigrationError::MigrationFailed { migration, .. })
                    if migration == "m002_broken"
            ),
            "{err}"
        );
        assert!(table_exists(&factory, "fine").await);
        assert!(!table_exists(&factory, "half_done").await);
        assert_eq!(
            uow.pending_migrations(&source).await.unwrap(),
            ["m002_broken"]
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn failed_rollback_is_logged_and_migration_error_returned() {
        let factory = common::factory().await;
        let source = Source {
            name: "self_committing",
            migrations: || -> Vec<Box<dyn MigrationTrait>> { vec![Box::new(CommitsThenFails)] },
        };

        let err = factory
            .unit_of_work()
            .update_database(&source)
            .await
            .unwrap_err();
        assert!(
            matches!(
                &err,
                RepoError::Migration(MigrationError::MigrationFailed { migration, .. })
                    if migration == "m001_commits_then_fails"
            ),
            "{err}"
        );
        assert!(logs_contain("Rollback after failed migration failed"));
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let factory = common::factory().await;
        let source = Source {
            name: "dupes",
            migrations: || -> Vec<Box<dyn MigrationTrait>> {
                vec![
                    Box::new(CreateTable {
                        name: "m001_same",
                        table: "one",
                    }),
                    Box::new(CreateTable {
                        name: "m001_same",
                        table: "two",
                    }),
                ]
            },
        };

        let err = factory
            .unit_of_work()
            .update_database(&source)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RepoError::Migration(MigrationError::DuplicateMigrationName { .. })
        ));
        assert!(!table_exists(&factory, "one").await);
    }

    struct Migrator;

    impl MigratorTrait for Migrator {
        fn migrations() -> Vec<Box<dyn MigrationTrait>> {
            vec![Box::new(CreateTable {
                name: "m001_lockers",
                table: "lockers",
            })]
        }
    }

    #[tokio::test]
    async fn migrator_trait_adapts_as_source() {
        let factory = common::factory().await;
        let source = MigratorSource::<Migrator>::new("lockers");
        assert_eq!(source.name(), "lockers");

        let outcome = factory
            .unit_of_work()
            .update_database(&source)
            .await
            .unwrap();
        assert!(matches!(outcome, MigrationOutcome::Applied { skipped: 0, .. }));
        assert!(table_exists(&factory, "lockers").await);
    }

    struct Gated {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    impl MigrationName for Gated {
        fn name(&self) -> &str {
            "m001_gated"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Gated {
        async fn up(&self, _manager: &SchemaManager) -> Result<(), DbErr> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(())
        }

        async fn down(&self, _manager: &SchemaManager) -> Result<(), DbErr> {
            Ok(())
        }
    }

    struct GatedSource {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    impl MigrationSource for GatedSource {
        fn name(&self) -> &str {
            "gated"
        }

        fn migrations(&self) -> Vec<Box<dyn MigrationTrait>> {
            vec![Box::new(Gated {
                entered: Arc::clone(&self.entered),
                release: Arc::clone(&self.release),
            })]
        }
    }

    #[tokio::test]
    async fn concurrent_run_reports_already_running() {
        let factory = Arc::new(common::factory().await);
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());

        let running = {
            let factory = Arc::clone(&factory);
            let source = GatedSource {
                entered: Arc::clone(&entered),
                release: Arc::clone(&release),
            };
            tokio::spawn(async move { factory.unit_of_work().update_database(&source).await })
        };

        tokio::time::timeout(Duration::from_secs(5), entered.notified())
            .await
            .expect("gated migration started");
        assert!(factory.unit_of_work().migration_coordinator().is_running());

        let other = Source {
            name: "catalog",
            migrations: catalog,
        };
        let outcome = factory.unit_of_work().update_database(&other).await.unwrap();
        assert_eq!(outcome, MigrationOutcome::AlreadyRunning);

        release.notify_one();
        let first = running.await.unwrap().unwrap();
        assert!(matches!(first, MigrationOutcome::Applied { ref applied, .. } if applied == &["m001_gated"]));
        assert!(!factory.unit_of_work().migration_coordinator().is_running());
    }
}
