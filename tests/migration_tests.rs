//! End-to-end migration tests over in-memory and DuckDB sources

use std::collections::{BTreeMap, BTreeSet};

use docstore_migrate::aggregation::{Pipeline, SortDirection, Stage};
use docstore_migrate::document::{Document, Filter};
use docstore_migrate::migrate::{
    MigrateError, MigrationConfig, MigrationDriver, MigrationPlan, Phase, RunStatus,
};
use docstore_migrate::source::MemorySource;
use docstore_migrate::store::{DocumentSink, MemoryStore, StoreError};
use serde_json::{Value, json};

fn authors_and_books() -> MemorySource {
    MemorySource::new()
        .with_table(
            "author",
            vec![
                json!({"author_id": 1, "name": "Le Guin"}),
                json!({"author_id": 2, "name": "Lem"}),
                json!({"author_id": 3, "name": "Jansson"}),
            ],
        )
        .with_table(
            "book",
            vec![
                json!({"book_id": 10, "author_id": 1, "title": "The Dispossessed"}),
                json!({"book_id": 11, "author_id": 2, "title": "Solaris"}),
                json!({"book_id": 12, "author_id": 2, "title": "The Cyberiad"}),
                json!({"book_id": 13, "author_id": 3, "title": "Moominsummer Madness"}),
                json!({"book_id": 14, "author_id": 2, "title": "Fiasco"}),
            ],
        )
}

fn load_only() -> MigrationConfig {
    MigrationConfig::new()
        .with_namespace("library")
        .with_phases(vec![Phase::Extracting, Phase::Loading])
}

/// Small rental database with one short film in stock and one short film without stock
fn rental_source() -> MemorySource {
    MemorySource::new()
        .with_table(
            "film",
            vec![
                json!({"film_id": 1, "title": "Alien Center", "length": 46}),
                json!({"film_id": 2, "title": "Bound Cheaper", "length": 98}),
                json!({"film_id": 3, "title": "Labyrinth League", "length": 46}),
                json!({"film_id": 4, "title": "Ridgemont Submarine", "length": 185}),
            ],
        )
        .with_table(
            "inventory",
            vec![
                json!({"inventory_id": 1, "film_id": 1, "store_id": 1}),
                json!({"inventory_id": 2, "film_id": 2, "store_id": 1}),
                json!({"inventory_id": 3, "film_id": 1, "store_id": 2}),
                json!({"inventory_id": 4, "film_id": 4, "store_id": 2}),
            ],
        )
        .with_table(
            "rental",
            vec![
                json!({"rental_id": 1, "inventory_id": 1, "customer_id": 1, "staff_id": 1}),
                json!({"rental_id": 2, "inventory_id": 2, "customer_id": 1, "staff_id": 1}),
                json!({"rental_id": 3, "inventory_id": 3, "customer_id": 2, "staff_id": 2}),
                json!({"rental_id": 4, "inventory_id": 4, "customer_id": 2, "staff_id": 2}),
                json!({"rental_id": 5, "inventory_id": 2, "customer_id": 2, "staff_id": 1}),
            ],
        )
        .with_table(
            "payment",
            vec![
                json!({"payment_id": 1, "rental_id": 1, "customer_id": 1, "amount": 2.99}),
                json!({"payment_id": 2, "rental_id": 2, "customer_id": 1, "amount": 4.99}),
                json!({"payment_id": 3, "rental_id": 3, "customer_id": 2, "amount": 0.99}),
                json!({"payment_id": 4, "rental_id": 4, "customer_id": 2, "amount": 5.99}),
                json!({"payment_id": 5, "rental_id": 5, "customer_id": 2, "amount": 1.99}),
            ],
        )
        .with_table(
            "staff",
            vec![
                json!({"staff_id": 1, "first_name": "Mike", "password": "8cb2237d0679ca88db6464eac60da96345513964"}),
                json!({"staff_id": 2, "first_name": "Jon", "password": "8cb2237d0679ca88db6464eac60da96345513964"}),
            ],
        )
        .with_table(
            "store",
            vec![
                json!({"store_id": 1, "manager_staff_id": 1, "address_id": 1}),
                json!({"store_id": 2, "manager_staff_id": 2, "address_id": 2}),
            ],
        )
        .with_table(
            "address",
            vec![
                json!({"address_id": 1, "address": "47 MySakila Drive", "city_id": 300}),
                json!({"address_id": 2, "address": "28 MySQL Boulevard", "city_id": 576}),
            ],
        )
}

fn keys(store: &MemoryStore, collection: &str, field: &str) -> BTreeSet<i64> {
    store
        .documents(collection)
        .unwrap()
        .iter()
        .filter_map(|d| d.get(field).and_then(Value::as_i64))
        .collect()
}

fn snapshot(store: &MemoryStore) -> BTreeMap<String, Vec<Document>> {
    store
        .collection_names()
        .unwrap()
        .into_iter()
        .map(|name| {
            let docs = store.documents(&name).unwrap();
            (name, docs)
        })
        .collect()
}

#[test]
fn test_loaded_counts_match_source() {
    let driver = MigrationDriver::new(load_only(), MigrationPlan::new()).unwrap();
    let mut source = authors_and_books();
    let mut store = MemoryStore::new();

    let report = driver.run(&mut source, &mut store);

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.tables_extracted, 2);
    assert_eq!(report.rows_extracted, 8);
    assert_eq!(report.documents_loaded, 8);
    assert_eq!(store.namespace(), Some("library"));
    assert_eq!(store.count("author").unwrap(), 3);
    assert_eq!(store.count("book").unwrap(), 5);
    assert!(source.is_closed());
}

#[test]
fn test_most_referenced_author() {
    let driver = MigrationDriver::new(load_only(), MigrationPlan::new()).unwrap();
    let mut store = MemoryStore::new();
    driver.run(&mut authors_and_books(), &mut store);

    let pipeline = Pipeline::new()
        .with_stage(Stage::group_count("author_id", "count"))
        .with_stage(Stage::sort_by("count", SortDirection::Descending))
        .with_stage(Stage::Limit(1));
    let top = store
        .aggregate("book", &pipeline)
        .unwrap()
        .collect_documents()
        .unwrap();

    assert_eq!(top.len(), 1);
    assert_eq!(top[0].get("_id"), Some(&json!(2)));
    assert_eq!(top[0].get("count"), Some(&json!(3)));
}

#[test]
fn test_rerun_yields_identical_state() {
    let config = MigrationConfig::new()
        .with_namespace("rental")
        .with_phases(vec![Phase::Extracting, Phase::Loading, Phase::Reading]);
    let plan = MigrationPlan::dvdrental(60).unwrap();
    let driver = MigrationDriver::new(config, plan).unwrap();
    let mut store = MemoryStore::new();

    let first = driver.run(&mut rental_source(), &mut store);
    assert!(first.is_success());
    let before = snapshot(&store);
    let views_before = store.view_names().unwrap();

    let second = driver.run(&mut rental_source(), &mut store);
    assert!(second.is_success());

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(snapshot(&store), before);
    assert_eq!(store.view_names().unwrap(), views_before);
    assert_eq!(views_before, vec!["customer_list".to_string()]);
    assert_eq!(store.namespace_names(), vec!["rental".to_string()]);
}

#[test]
fn test_reset_discards_earlier_changes() {
    let mut store = MemoryStore::new();
    let driver = MigrationDriver::new(load_only(), MigrationPlan::new()).unwrap();
    driver.run(&mut authors_and_books(), &mut store);
    let before = snapshot(&store);

    store
        .delete_many("book", &Filter::eq("author_id", 2))
        .unwrap();
    store
        .insert_one("author", json!({"author_id": 4}).as_object().cloned().unwrap())
        .unwrap();

    driver.run(&mut authors_and_books(), &mut store);
    assert_eq!(snapshot(&store), before);
}

#[test]
fn test_full_run_deletes_short_films_without_orphans() {
    let config = MigrationConfig::new().with_namespace("rental");
    let driver = MigrationDriver::new(config, MigrationPlan::dvdrental(60).unwrap()).unwrap();
    let mut source = rental_source();
    let mut store = MemoryStore::new();

    let report = driver.run(&mut source, &mut store);
    assert!(report.is_success(), "{:?}", report.fatal);
    assert_eq!(report.phases.last().map(|s| s.phase), Some(Phase::Done));

    let deleting = report.phase(Phase::Deleting).unwrap();
    assert_eq!(deleting.failed, 0, "{:?}", deleting.errors);
    // two short-film inventory items plus the sweep
    assert_eq!(deleting.succeeded, 3);

    assert_eq!(keys(&store, "film", "film_id"), BTreeSet::from([2, 4]));
    assert_eq!(keys(&store, "inventory", "inventory_id"), BTreeSet::from([2, 4]));
    assert_eq!(keys(&store, "rental", "rental_id"), BTreeSet::from([2, 4, 5]));
    assert_eq!(keys(&store, "payment", "payment_id"), BTreeSet::from([2, 4, 5]));

    let films = keys(&store, "film", "film_id");
    let inventory = keys(&store, "inventory", "inventory_id");
    let rentals = keys(&store, "rental", "rental_id");
    for item in store.documents("inventory").unwrap() {
        assert!(films.contains(&item["film_id"].as_i64().unwrap()));
    }
    for rental in store.documents("rental").unwrap() {
        assert!(inventory.contains(&rental["inventory_id"].as_i64().unwrap()));
    }
    for payment in store.documents("payment").unwrap() {
        assert!(rentals.contains(&payment["rental_id"].as_i64().unwrap()));
    }
    assert!(
        store
            .find("film", &Filter::lt("length", 60))
            .unwrap()
            .is_empty()
    );
}

#[test]
fn test_mutations_apply_to_loaded_data() {
    let config = MigrationConfig::new()
        .with_namespace("rental")
        .with_phases(vec![Phase::Extracting, Phase::Loading, Phase::Mutating]);
    let driver = MigrationDriver::new(config, MigrationPlan::dvdrental(60).unwrap()).unwrap();
    let mut store = MemoryStore::new();

    let report = driver.run(&mut rental_source(), &mut store);
    let mutating = report.phase(Phase::Mutating).unwrap();
    assert_eq!(mutating.failed, 0, "{:?}", mutating.errors);

    let staff = store.documents("staff").unwrap();
    assert_ne!(staff[0]["password"], staff[1]["password"]);
    for member in &staff {
        assert_ne!(member["password"], json!("8cb2237d0679ca88db6464eac60da96345513964"));
        assert!(member.contains_key("last_update"));
    }

    assert_eq!(store.find("store", &Filter::eq("store_id", 69)).unwrap().len(), 1);
    assert_eq!(store.find("address", &Filter::eq("address_id", 6969)).unwrap().len(), 1);
    assert_eq!(store.find("inventory", &Filter::eq("store_id", 69)).unwrap().len(), 4);
    assert!(store.count("rental").unwrap() == 5);
}

#[test]
fn test_view_created_twice_keeps_first_definition() {
    let mut store = MemoryStore::new();
    let driver = MigrationDriver::new(load_only(), MigrationPlan::new()).unwrap();
    driver.run(&mut authors_and_books(), &mut store);

    let by_lem = Pipeline::new().with_stage(Stage::Match(Filter::eq("author_id", 2)));
    let by_jansson = Pipeline::new().with_stage(Stage::Match(Filter::eq("author_id", 3)));

    store.create_view("selected_books", "book", by_lem).unwrap();
    let err = store
        .create_view("selected_books", "book", by_jansson)
        .unwrap_err();
    assert!(matches!(err, StoreError::ViewAlreadyExists(ref name) if name == "selected_books"));

    let docs = store
        .aggregate("selected_books", &Pipeline::new())
        .unwrap()
        .collect_documents()
        .unwrap();
    assert_eq!(docs.len(), 3);
    assert!(docs.iter().all(|d| d["author_id"] == json!(2)));
}

#[test]
fn test_duplicate_view_in_plan_is_reported_and_run_continues() {
    let lem = Pipeline::new().with_stage(Stage::Match(Filter::eq("author_id", 2)));
    let plan = MigrationPlan::new()
        .with_view("selected_books", "book", lem)
        .with_view("selected_books", "book", Pipeline::new())
        .with_read("count_books", "book", Pipeline::new().with_stage(Stage::Count("n".into())));
    let config = load_only().with_phases(vec![Phase::Extracting, Phase::Loading, Phase::Reading]);
    let driver = MigrationDriver::new(config, plan).unwrap();
    let mut store = MemoryStore::new();

    let report = driver.run(&mut authors_and_books(), &mut store);
    assert_eq!(report.status, RunStatus::CompletedWithErrors);

    let reading = report.phase(Phase::Reading).unwrap();
    assert_eq!(reading.succeeded, 2);
    assert_eq!(reading.failed, 1);
    assert!(reading.errors[0].contains("selected_books"));

    let docs = store
        .aggregate("selected_books", &Pipeline::new())
        .unwrap()
        .collect_documents()
        .unwrap();
    assert_eq!(docs.len(), 3);
}

#[test]
fn test_unreachable_source_fails_run_and_releases_connection() {
    let driver = MigrationDriver::new(MigrationConfig::new(), MigrationPlan::dvdrental(60).unwrap())
        .unwrap();
    let mut source = MemorySource::new().unavailable("connection refused");
    let mut store = MemoryStore::new();

    let report = driver.run(&mut source, &mut store);
    assert_eq!(report.status, RunStatus::Failed);
    assert!(matches!(
        report.fatal,
        Some(MigrateError::SourceUnavailable { .. })
    ));
    assert!(
        report.phases[1..report.phases.len() - 1]
            .iter()
            .all(|s| s.skipped)
    );
    assert_eq!(source.close_calls(), 1);
    assert_eq!(store.namespace(), None);
}

#[test]
fn test_failed_table_does_not_stop_migration() {
    let driver = MigrationDriver::new(load_only(), MigrationPlan::new()).unwrap();
    let mut source = authors_and_books().with_failing_table("broken", "unsupported column type");
    let mut store = MemoryStore::new();

    let report = driver.run(&mut source, &mut store);
    assert_eq!(report.status, RunStatus::CompletedWithErrors);
    assert_eq!(report.phase(Phase::Extracting).unwrap().failed, 1);
    assert_eq!(store.collection_names().unwrap(), vec!["author", "book"]);
}

#[cfg(feature = "duckdb-source")]
mod duckdb_source {
    use super::*;
    use docstore_migrate::source::duckdb::DuckDbSource;

    #[test]
    fn test_duckdb_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("library.duckdb");
        {
            let conn = duckdb::Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE author (author_id INTEGER PRIMARY KEY, name VARCHAR);
                 CREATE TABLE book (book_id INTEGER, author_id INTEGER, title VARCHAR, subtitle VARCHAR);
                 INSERT INTO author VALUES (1, 'Le Guin'), (2, 'Lem'), (3, 'Jansson');
                 INSERT INTO book VALUES
                    (10, 1, 'The Dispossessed', NULL),
                    (11, 2, 'Solaris', NULL),
                    (12, 2, 'The Cyberiad', 'Fables for the Cybernetic Age'),
                    (13, 3, 'Moominsummer Madness', NULL),
                    (14, 2, 'Fiasco', NULL);
                 CREATE VIEW lem_books AS SELECT * FROM book WHERE author_id = 2;",
            )
            .unwrap();
        }

        let mut source = DuckDbSource::open(&path).unwrap();
        let mut store = MemoryStore::new();
        let driver = MigrationDriver::new(load_only(), MigrationPlan::new()).unwrap();
        let report = driver.run(&mut source, &mut store);

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(store.collection_names().unwrap(), vec!["author", "book"]);
        assert_eq!(store.count("author").unwrap(), 3);
        assert_eq!(store.count("book").unwrap(), 5);

        let with_subtitle = store
            .find("book", &Filter::eq("book_id", 12))
            .unwrap();
        assert_eq!(with_subtitle[0]["subtitle"], json!("Fables for the Cybernetic Age"));
        let without = store.find("book", &Filter::eq("book_id", 10)).unwrap();
        assert!(!without[0].contains_key("subtitle"));
    }
}
