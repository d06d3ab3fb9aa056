//! Integration tests for row inserts, queries and result wrappers.
//!
//! These tests run against a temporary SQLite database through the `Any` driver.

use resilient_data::db::{AnyRow, DatabaseManager, QueryExecutor};
use resilient_data::error::DbError;
use resilient_data::impl_row_decode;
use resilient_data::models::{DatabaseSettings, Entity, Statement};
use resilient_data::retry::RetryPolicy;
use std::time::Duration;
use tempfile::NamedTempFile;

struct User {
    id: i64,
    name: &'static str,
    team: &'static str,
}

impl Entity for User {
    fn insert_statement(&self) -> Statement {
        Statement::new("INSERT INTO users (id, name, team) VALUES (?, ?, ?)")
            .bind(self.id)
            .bind(self.name)
            .bind(self.team)
    }
}

#[derive(Debug, PartialEq, sqlx::FromRow)]
struct UserRow {
    id: i64,
    name: String,
    team: String,
}

impl_row_decode!(UserRow);

fn user(id: i64, name: &'static str, team: &'static str) -> User {
    User { id, name, team }
}

/// Helper to create a connected manager with an empty `users` table.
async fn setup() -> (DatabaseManager, NamedTempFile) {
    let temp_file = NamedTempFile::new().expect("Failed to create temp file");
    let url = format!("sqlite:{}?mode=rwc", temp_file.path().display());

    let manager = DatabaseManager::new(
        "test",
        "Test database",
        DatabaseSettings::new(url),
        RetryPolicy::new(2, Duration::from_millis(10)),
    );
    manager.connection().connect().expect("Failed to connect");

    manager
        .row_operations()
        .unwrap()
        .query_rows(
            &Statement::new(
                "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, team TEXT NOT NULL)",
            ),
            true,
            false,
        )
        .await
        .expect("Failed to create table");

    (manager, temp_file)
}

async fn seed(ops: &QueryExecutor) {
    ops.add_rows(&[
        user(1, "alice", "red"),
        user(2, "bob", "blue"),
        user(3, "carol", "red"),
        user(4, "dave", "green"),
        user(5, "erin", "blue"),
    ])
    .await
    .expect("Failed to seed users");
}

async fn count_users(ops: &QueryExecutor) -> i64 {
    ops.query_row(&Statement::new("SELECT COUNT(*) FROM users"), false, true)
        .await
        .unwrap()
        .one::<i64>()
        .unwrap()
}

// =========================================================================
// Inserts
// =========================================================================

#[tokio::test]
async fn test_add_row_then_query_it_back() {
    let (manager, _temp) = setup().await;
    let ops = manager.row_operations().unwrap();

    ops.add_row(&user(1, "alice", "red")).await.unwrap();

    let name = ops
        .query_row(
            &Statement::new("SELECT name FROM users WHERE id = ?").bind(1_i64),
            false,
            true,
        )
        .await
        .unwrap()
        .one::<String>()
        .unwrap();
    assert_eq!(name, "alice");
}

#[tokio::test]
async fn test_add_rows_is_all_or_nothing() {
    let (manager, _temp) = setup().await;
    let ops = manager.row_operations().unwrap();

    ops.add_rows(&[user(1, "alice", "red"), user(2, "bob", "blue")])
        .await
        .unwrap();
    assert_eq!(count_users(ops).await, 2);

    // Second row collides with the first: nothing from this batch may land.
    let result = ops
        .add_rows(&[user(3, "carol", "red"), user(3, "carol", "red")])
        .await;
    assert!(matches!(result, Err(DbError::OperationFailed { .. })));
    assert_eq!(count_users(ops).await, 2);
}

#[tokio::test]
async fn test_uncommitted_write_is_rolled_back() {
    let (manager, _temp) = setup().await;
    let ops = manager.row_operations().unwrap();
    let insert = user(7, "gina", "red").insert_statement();

    ops.query_rows(&insert, false, false).await.unwrap();
    assert_eq!(count_users(ops).await, 0);

    ops.query_rows(&insert, true, false).await.unwrap();
    assert_eq!(count_users(ops).await, 1);
}

#[tokio::test]
async fn test_session_staging_and_drop() {
    let (manager, _temp) = setup().await;
    let ops = manager.row_operations().unwrap();
    let factory = ops.session_factory();

    {
        let mut session = factory.session().await.unwrap();
        session.add(user(1, "alice", "red").insert_statement());
        assert_eq!(session.pending(), 1);
        session.flush().await.unwrap();
        assert_eq!(session.pending(), 0);
        // Dropped without commit.
    }
    assert_eq!(count_users(ops).await, 0);

    let mut session = factory.session().await.unwrap();
    session.add_all([
        user(1, "alice", "red").insert_statement(),
        user(2, "bob", "blue").insert_statement(),
    ]);
    ops.commit_session(session).await.unwrap();
    assert_eq!(count_users(ops).await, 2);
}

#[tokio::test]
async fn test_invalid_statement_is_operation_failed() {
    let (manager, _temp) = setup().await;
    let ops = manager.row_operations().unwrap();

    let result = ops
        .query_rows(&Statement::new("SELECT * FROM missing_table"), false, false)
        .await;
    let err = result.unwrap_err();
    assert!(matches!(err, DbError::OperationFailed { .. }));
    assert!(!err.to_string().contains("missing_table"));
}

// =========================================================================
// Single-row accessors
// =========================================================================

#[tokio::test]
async fn test_one_requires_exactly_one_row() {
    let (manager, _temp) = setup().await;
    let ops = manager.row_operations().unwrap();
    seed(ops).await;

    let empty = ops
        .query_row(
            &Statement::new("SELECT name FROM users WHERE id = ?").bind(99_i64),
            false,
            true,
        )
        .await
        .unwrap();
    assert!(matches!(
        empty.one::<String>(),
        Err(DbError::EmptyOrAmbiguous { rows: 0 })
    ));

    let many = ops
        .query_row(
            &Statement::new("SELECT name FROM users WHERE team = ?").bind("red"),
            false,
            true,
        )
        .await
        .unwrap();
    let err = many.one::<String>().unwrap_err();
    assert!(matches!(err, DbError::EmptyOrAmbiguous { rows: 2 }));
    assert!(err.to_string().contains("empty or with multiple rows"));
}

#[tokio::test]
async fn test_first_returns_none_or_first_row() {
    let (manager, _temp) = setup().await;
    let ops = manager.row_operations().unwrap();

    let none = ops
        .query_row(&Statement::new("SELECT name FROM users"), false, true)
        .await
        .unwrap();
    assert_eq!(none.first::<String>().unwrap(), None);

    seed(ops).await;
    let first = ops
        .query_row(
            &Statement::new("SELECT name FROM users ORDER BY id"),
            false,
            true,
        )
        .await
        .unwrap();
    assert_eq!(first.first::<String>().unwrap().as_deref(), Some("alice"));
}

#[tokio::test]
async fn test_first_with_wrong_type_is_type_mismatch() {
    let (manager, _temp) = setup().await;
    let ops = manager.row_operations().unwrap();
    seed(ops).await;

    let result = ops
        .query_row(
            &Statement::new("SELECT name FROM users ORDER BY id"),
            false,
            true,
        )
        .await
        .unwrap();
    assert!(matches!(
        result.first::<i64>(),
        Err(DbError::TypeMismatch { .. })
    ));
}

// =========================================================================
// Views
// =========================================================================

#[tokio::test]
async fn test_record_view_decodes_tuples_and_structs() {
    let (manager, _temp) = setup().await;
    let ops = manager.row_operations().unwrap();
    seed(ops).await;
    let select = Statement::new("SELECT id, name, team FROM users WHERE id = ?").bind(2_i64);

    let tuple = ops
        .query_row(&select, false, false)
        .await
        .unwrap()
        .one::<(i64, String, String)>()
        .unwrap();
    assert_eq!(tuple, (2, "bob".to_string(), "blue".to_string()));

    let row = ops
        .query_row(&select, false, false)
        .await
        .unwrap()
        .one::<UserRow>()
        .unwrap();
    assert_eq!(
        row,
        UserRow {
            id: 2,
            name: "bob".to_string(),
            team: "blue".to_string(),
        }
    );

    // Mapped structs come back whole in the scalar view too.
    let scalar_row = ops
        .query_row(&select, false, true)
        .await
        .unwrap()
        .one::<UserRow>()
        .unwrap();
    assert_eq!(scalar_row.name, "bob");
}

#[tokio::test]
async fn test_view_shape_mismatch() {
    let (manager, _temp) = setup().await;
    let ops = manager.row_operations().unwrap();
    seed(ops).await;

    let mut records = ops
        .query_rows(&Statement::new("SELECT id FROM users"), false, false)
        .await
        .unwrap();
    assert!(matches!(
        records.all::<i64>(),
        Err(DbError::TypeMismatch { .. })
    ));

    let scalars = ops
        .query_row(&Statement::new("SELECT id, name FROM users"), false, true)
        .await
        .unwrap();
    assert!(matches!(
        scalars.first::<(i64, String)>(),
        Err(DbError::TypeMismatch { .. })
    ));
}

// =========================================================================
// Multi-row accessors
// =========================================================================

#[tokio::test]
async fn test_all_is_idempotent_across_queries() {
    let (manager, _temp) = setup().await;
    let ops = manager.row_operations().unwrap();
    seed(ops).await;
    let select = Statement::new("SELECT name FROM users");

    let mut first = ops
        .query_rows(&select, false, true)
        .await
        .unwrap()
        .all::<String>()
        .unwrap();
    let mut second = ops
        .query_rows(&select, false, true)
        .await
        .unwrap()
        .all::<String>()
        .unwrap();
    first.sort();
    second.sort();
    assert_eq!(first.len(), 5);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_fetch_consumes_in_pages() {
    let (manager, _temp) = setup().await;
    let ops = manager.row_operations().unwrap();
    seed(ops).await;

    let mut results = ops
        .query_rows(&Statement::new("SELECT id FROM users ORDER BY id"), false, true)
        .await
        .unwrap();
    assert_eq!(results.len(), 5);

    assert_eq!(results.fetch::<i64>(2).unwrap(), vec![1, 2]);
    assert_eq!(results.len(), 3);
    assert_eq!(results.fetch::<i64>(10).unwrap(), vec![3, 4, 5]);
    assert!(results.is_empty());
    assert!(results.fetch::<i64>(1).unwrap().is_empty());
    assert!(results.all::<i64>().unwrap().is_empty());
}

#[tokio::test]
async fn test_unique_drops_duplicates() {
    let (manager, _temp) = setup().await;
    let ops = manager.row_operations().unwrap();
    seed(ops).await;

    let results = ops
        .query_rows(&Statement::new("SELECT team FROM users ORDER BY id"), false, true)
        .await
        .unwrap();
    assert_eq!(results.len(), 5);

    let mut unique = results.unique();
    assert!(unique.is_scalar());
    assert_eq!(
        unique.all::<String>().unwrap(),
        vec!["red".to_string(), "blue".to_string(), "green".to_string()]
    );
}

#[tokio::test]
async fn test_unique_record_view_compares_whole_rows() {
    let (manager, _temp) = setup().await;
    let ops = manager.row_operations().unwrap();
    seed(ops).await;

    let mut unique = ops
        .query_rows(
            &Statement::new("SELECT team, id % 2 FROM users ORDER BY id"),
            false,
            false,
        )
        .await
        .unwrap()
        .unique();
    // (red,1) (blue,0) (red,1) (green,0) (blue,1)
    assert_eq!(unique.len(), 4);
    let rows = unique.all::<(String, i64)>().unwrap();
    assert_eq!(rows[0], ("red".to_string(), 1));
    assert_eq!(rows[3], ("blue".to_string(), 1));
}

#[tokio::test]
async fn test_unique_by_custom_strategy() {
    let (manager, _temp) = setup().await;
    let ops = manager.row_operations().unwrap();
    seed(ops).await;

    let mut unique = ops
        .query_rows(
            &Statement::new("SELECT id, name FROM users ORDER BY id"),
            false,
            false,
        )
        .await
        .unwrap()
        .unique_by(|row: &AnyRow| {
            use sqlx::Row;
            row.try_get::<i64, _>(0).map(|id| id % 2).ok()
        });
    assert!(!unique.is_scalar());
    let rows = unique.all::<(i64, String)>().unwrap();
    assert_eq!(rows, vec![(1, "alice".to_string()), (2, "bob".to_string())]);
}

#[tokio::test]
async fn test_json_document_bound_as_text() {
    let (manager, _temp) = setup().await;
    let ops = manager.row_operations().unwrap();
    ops.query_rows(
        &Statement::new("CREATE TABLE events (id INTEGER PRIMARY KEY, payload TEXT NOT NULL)"),
        true,
        false,
    )
    .await
    .unwrap();

    let payload = serde_json::json!({ "user": { "name": "alice" }, "tags": ["a", "b"] });
    ops.query_rows(
        &Statement::new("INSERT INTO events (id, payload) VALUES (?, json(?))")
            .bind(1_i64)
            .bind(payload.to_string()),
        true,
        false,
    )
    .await
    .unwrap();

    let name = ops
        .query_row(
            &Statement::new("SELECT json_extract(payload, '$.user.name') FROM events"),
            false,
            true,
        )
        .await
        .unwrap()
        .one::<String>()
        .unwrap();
    assert_eq!(name, "alice");
}
