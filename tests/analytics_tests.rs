//! Redirect resolution, click recording and aggregation tests
//!
//! Drives the engine the way the HTTP layer does: resolve codes, let the
//! background writer persist clicks, then query the aggregates.

mod common;

use chrono::{DateTime, Datelike, Duration, FixedOffset, TimeZone, Utc};
use linkly::aggregator::MonthWindow;
use linkly::clicks::{ClickLog, ClickRecorder, RecordError, RecorderConfig};
use linkly::models::ClickEvent;
use linkly::resolver::Resolution;

use common::{click_rows, test_app, test_db};

fn click(code: &str, at: DateTime<Utc>) -> ClickEvent {
    ClickEvent {
        link_code: code.to_owned(),
        occurred_at: at,
        ip_address: None,
    }
}

// =============================================================================
// Resolution
// =============================================================================

#[tokio::test]
async fn test_resolve_example_flow() {
    let app = test_app().await;
    let state = &app.state;
    let now = Utc::now();

    let link = state.store.create("https://example.com/a", "1").await.unwrap();
    assert_eq!(state.aggregator.totals_for_link(&link.short_code).await.unwrap(), 0);

    let resolved = state.resolver.resolve(&link.short_code, now).await.unwrap();
    assert_eq!(resolved, Resolution::Target("https://example.com/a".into()));

    state.recorder.flush().await.unwrap();
    assert_eq!(state.aggregator.totals_for_link(&link.short_code).await.unwrap(), 1);

    let missing = state.resolver.resolve("doesNotExist", now).await.unwrap();
    assert_eq!(missing, Resolution::NotFound);
}

#[tokio::test]
async fn test_resolve_unknown_code_records_nothing() {
    let app = test_app().await;
    let state = &app.state;

    for code in ["doesNotExist", "", "../../etc/passwd", "has space"] {
        let outcome = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            state.resolver.resolve(code, Utc::now()),
        )
        .await
        .expect("resolve must answer in bounded time")
        .unwrap();
        assert_eq!(outcome, Resolution::NotFound);
    }

    state.recorder.flush().await.unwrap();
    assert_eq!(click_rows(&app.db.pool).await, 0);
}

#[tokio::test]
async fn test_resolve_deleted_link_is_not_found() {
    let app = test_app().await;
    let state = &app.state;

    let link = state.store.create("https://example.com/a", "1").await.unwrap();
    state.store.delete(&link.short_code, "1").await.unwrap();

    let outcome = state.resolver.resolve(&link.short_code, Utc::now()).await.unwrap();
    assert_eq!(outcome, Resolution::NotFound);

    state.recorder.flush().await.unwrap();
    assert_eq!(click_rows(&app.db.pool).await, 0);
}

#[tokio::test]
async fn test_n_resolutions_land_in_current_month() {
    let app = test_app().await;
    let state = &app.state;
    let now = Utc::now();
    const N: i64 = 25;

    let link = state.store.create("https://example.com/a", "1").await.unwrap();
    for _ in 0..N {
        let outcome = state.resolver.resolve(&link.short_code, now).await.unwrap();
        assert!(matches!(outcome, Resolution::Target(_)));
    }
    state.recorder.flush().await.unwrap();

    assert_eq!(state.aggregator.totals_for_link(&link.short_code).await.unwrap(), N);

    let window = MonthWindow::trailing(now, 6);
    let series = state.aggregator.monthly_series("1", window).await.unwrap();
    assert_eq!(series.len(), 6);

    let (current, earlier) = series.split_last().unwrap();
    assert_eq!((current.year, current.month), (now.year(), now.month()));
    assert_eq!(current.count, N);
    assert!(earlier.iter().all(|m| m.count == 0));
}

#[tokio::test]
async fn test_resolve_survives_recorder_shutdown() {
    let app = test_app().await;
    let state = &app.state;

    let link = state.store.create("https://example.com/a", "1").await.unwrap();
    state.recorder.shutdown().await;

    let outcome = state.resolver.resolve(&link.short_code, Utc::now()).await.unwrap();
    assert_eq!(outcome, Resolution::Target("https://example.com/a".into()));
    assert_eq!(click_rows(&app.db.pool).await, 0);
}

#[tokio::test]
async fn test_resolve_records_client_ip() {
    let app = test_app().await;
    let state = &app.state;

    let link = state.store.create("https://example.com/a", "1").await.unwrap();
    state
        .resolver
        .resolve_from(&link.short_code, Utc::now(), Some("203.0.113.7".into()))
        .await
        .unwrap();
    state.recorder.flush().await.unwrap();

    let ip: Option<String> = sqlx::query_scalar("SELECT ip_address FROM clicks")
        .fetch_one(&app.db.pool)
        .await
        .unwrap();
    assert_eq!(ip.as_deref(), Some("203.0.113.7"));
}

// =============================================================================
// Recorder
// =============================================================================

#[tokio::test]
async fn test_recorder_shutdown_drains_queue() {
    let db = test_db().await;
    let link = linkly::store::LinkStore::new(db.pool.clone(), Default::default())
        .create("https://example.com/a", "1")
        .await
        .unwrap();

    let recorder = ClickRecorder::spawn(
        ClickLog::new(db.pool.clone()),
        RecorderConfig {
            capacity: 1000,
            batch_size: 7,
            ..RecorderConfig::default()
        },
    );

    let now = Utc::now();
    for _ in 0..300 {
        recorder.record(click(&link.short_code, now)).unwrap();
    }
    recorder.shutdown().await;

    assert_eq!(click_rows(&db.pool).await, 300);
    assert_eq!(
        recorder.record(click(&link.short_code, now)),
        Err(RecordError::Closed)
    );
    assert_eq!(recorder.flush().await, Err(RecordError::Closed));

    // A second shutdown is a no-op.
    recorder.shutdown().await;
}

#[tokio::test]
async fn test_click_log_append_is_visible_immediately() {
    let db = test_db().await;
    let link = linkly::store::LinkStore::new(db.pool.clone(), Default::default())
        .create("https://example.com/a", "1")
        .await
        .unwrap();

    let log = ClickLog::new(db.pool.clone());
    log.append(&click(&link.short_code, Utc::now())).await.unwrap();
    assert_eq!(click_rows(&db.pool).await, 1);
}

// =============================================================================
// Aggregation
// =============================================================================

#[tokio::test]
async fn test_monthly_series_buckets_in_utc() {
    let app = test_app().await;
    let state = &app.state;
    let link = state.store.create("https://example.com/a", "1").await.unwrap();
    let log = ClickLog::new(app.db.pool.clone());

    // 23:30 on 31 March in UTC-5 is already 1 April in UTC.
    let est = FixedOffset::west_opt(5 * 3600).unwrap();
    let late_march_local = est
        .with_ymd_and_hms(2026, 3, 31, 23, 30, 0)
        .unwrap()
        .with_timezone(&Utc);
    let mid_march = Utc.with_ymd_and_hms(2026, 3, 15, 12, 0, 0).unwrap();
    let last_instant_of_march = Utc.with_ymd_and_hms(2026, 3, 31, 23, 59, 59).unwrap();

    for at in [late_march_local, mid_march, last_instant_of_march] {
        log.append(&click(&link.short_code, at)).await.unwrap();
    }

    let window = MonthWindow::ending(2026, 4, 3);
    let series = state.aggregator.monthly_series("1", window).await.unwrap();
    let flat: Vec<(&str, i64)> = series.iter().map(|m| (m.label.as_str(), m.count)).collect();
    assert_eq!(flat, vec![("Feb/2026", 0), ("Mar/2026", 2), ("Apr/2026", 1)]);

    let per_link = state
        .aggregator
        .monthly_series_for_link(&link.short_code, window)
        .await
        .unwrap();
    assert_eq!(per_link, series);
}

#[tokio::test]
async fn test_monthly_series_ignores_clicks_outside_window() {
    let app = test_app().await;
    let state = &app.state;
    let link = state.store.create("https://example.com/a", "1").await.unwrap();
    let log = ClickLog::new(app.db.pool.clone());

    let before = Utc.with_ymd_and_hms(2025, 12, 31, 23, 59, 59).unwrap();
    let inside = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    let after = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
    for at in [before, inside, after] {
        log.append(&click(&link.short_code, at)).await.unwrap();
    }

    let series = state
        .aggregator
        .monthly_series("1", MonthWindow::ending(2026, 2, 2))
        .await
        .unwrap();
    let counts: Vec<i64> = series.iter().map(|m| m.count).collect();
    assert_eq!(counts, vec![1, 0]);
    assert_eq!(state.aggregator.totals_for_link(&link.short_code).await.unwrap(), 3);
}

#[tokio::test]
async fn test_totals_by_link_scoped_to_owner_and_active_links() {
    let app = test_app().await;
    let state = &app.state;
    let log = ClickLog::new(app.db.pool.clone());
    let now = Utc::now();

    let a = state.store.create("https://example.com/a", "1").await.unwrap();
    let b = state.store.create("https://example.com/b", "1").await.unwrap();
    let gone = state.store.create("https://example.com/gone", "1").await.unwrap();
    let theirs = state.store.create("https://example.com/x", "2").await.unwrap();

    for _ in 0..3 {
        log.append(&click(&a.short_code, now)).await.unwrap();
    }
    log.append(&click(&gone.short_code, now)).await.unwrap();
    log.append(&click(&theirs.short_code, now)).await.unwrap();
    state.store.delete(&gone.short_code, "1").await.unwrap();

    let totals = state.aggregator.totals_by_link("1").await.unwrap();
    assert_eq!(totals.len(), 2);
    assert_eq!(totals[&a.short_code], 3);
    assert_eq!(totals[&b.short_code], 0);
    assert!(!totals.contains_key(&theirs.short_code));

    // The deleted link's clicks are still in the log.
    assert_eq!(state.aggregator.totals_for_link(&gone.short_code).await.unwrap(), 1);
}

#[tokio::test]
async fn test_dashboard_summary() {
    let app = test_app().await;
    let state = &app.state;
    let log = ClickLog::new(app.db.pool.clone());
    let now = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();

    let popular = state
        .store
        .create_at("https://example.com/popular", "1", now - Duration::days(40))
        .await
        .unwrap();
    let quiet = state
        .store
        .create_at("https://example.com/quiet", "1", now - Duration::days(2))
        .await
        .unwrap();
    state
        .store
        .create_at("https://example.com/unclicked", "1", now - Duration::days(1))
        .await
        .unwrap();
    let theirs = state
        .store
        .create_at("https://example.com/theirs", "2", now)
        .await
        .unwrap();

    let last_month = Utc.with_ymd_and_hms(2026, 9, 10, 8, 0, 0).unwrap();
    let long_ago = Utc.with_ymd_and_hms(2025, 1, 10, 8, 0, 0).unwrap();
    for at in [now, now, last_month, long_ago] {
        log.append(&click(&popular.short_code, at)).await.unwrap();
    }
    log.append(&click(&quiet.short_code, now)).await.unwrap();
    log.append(&click(&theirs.short_code, now)).await.unwrap();

    let summary = state.aggregator.dashboard("1", now).await.unwrap();
    assert_eq!(summary.total_links, 3);
    assert_eq!(summary.links_last_7_days, 2);
    assert_eq!(summary.total_clicks, 5);
    assert_eq!(summary.clicks_in_window, 4);
    assert_eq!(
        summary.line_labels,
        vec!["May/2026", "Jun/2026", "Jul/2026", "Aug/2026", "Sep/2026", "Oct/2026"]
    );
    assert_eq!(summary.line_data, vec![0, 0, 0, 0, 1, 2 + 1]);
    assert_eq!(summary.pie_labels, vec![popular.short_code, quiet.short_code]);
    assert_eq!(summary.pie_data, vec![4, 1]);
}
