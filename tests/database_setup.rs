use steritrack::config::DatabaseConfig;
use steritrack::Database;
use tempfile::TempDir;

/// A file-backed database is created, migrated and reopened with its data
/// intact.
#[tokio::test]
async fn file_database_is_created_and_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite:{}/steritrack.db", dir.path().display());
    let config = DatabaseConfig {
        url,
        max_connections: 2,
        auto_migrate: true,
    };

    let db = Database::connect(&config).await.unwrap();
    sqlx::query("INSERT INTO departments (name, is_active, created_at) VALUES ('Theatre', 1, ?1)")
        .bind(chrono::Utc::now())
        .execute(db.pool())
        .await
        .unwrap();
    db.close().await;

    let db = Database::connect(&config).await.unwrap();
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM departments")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(row.0, 1);
    db.close().await;
}

/// Migrations seed the role table with the five fixed roles.
#[tokio::test]
async fn migrations_seed_roles() {
    let db = Database::in_memory().await.unwrap();
    let rows: Vec<(String, i64)> = sqlx::query_as("SELECT code, level FROM roles ORDER BY level DESC")
        .fetch_all(db.pool())
        .await
        .unwrap();
    assert_eq!(
        rows,
        vec![
            ("ADMIN".into(), 100),
            ("SUPERVISOR".into(), 80),
            ("OPERATOR".into(), 50),
            ("NURSE".into(), 40),
            ("VIEWER".into(), 10),
        ]
    );
}
