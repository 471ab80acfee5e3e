//! Shared setup for integration tests: a throwaway SQLite database in a
//! temp directory with migrations applied.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use linkly::{config::AppConfig, db, AppState};
use sqlx::SqlitePool;
use tempfile::TempDir;

pub struct TestDb {
    pub pool: SqlitePool,
    pub database_url: String,
    // Dropped last so the database file outlives the pool.
    _dir: TempDir,
}

pub async fn test_db() -> TestDb {
    let dir = TempDir::new().unwrap();
    let database_url = format!("sqlite://{}", dir.path().join("linkly-test.db").display());
    let pool = db::connect(&database_url, 5).await.unwrap();
    TestDb {
        pool,
        database_url,
        _dir: dir,
    }
}

pub fn test_config(database_url: &str, extra: &[(&str, &str)]) -> AppConfig {
    let mut vars: HashMap<String, String> = HashMap::from([
        ("DATABASE_URL".to_owned(), database_url.to_owned()),
        ("BASE_URL".to_owned(), "https://sho.rt".to_owned()),
        ("STORE_TIMEOUT_MS".to_owned(), "1000".to_owned()),
    ]);
    for (k, v) in extra {
        vars.insert(k.to_string(), v.to_string());
    }
    AppConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

pub struct TestApp {
    pub state: Arc<AppState>,
    pub db: TestDb,
}

pub async fn test_app() -> TestApp {
    test_app_with(&[]).await
}

pub async fn test_app_with(extra: &[(&str, &str)]) -> TestApp {
    let db = test_db().await;
    let config = test_config(&db.database_url, extra);
    let state = Arc::new(AppState::new(config, db.pool.clone()));
    TestApp { state, db }
}

pub async fn click_rows(pool: &SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM clicks")
        .fetch_one(pool)
        .await
        .unwrap()
}
