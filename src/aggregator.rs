use std::collections::HashMap;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use sqlx::SqlitePool;

use crate::{
    error::Result,
    models::{DashboardSummary, MonthlyCount},
};

/// Links shown in the dashboard's top-links chart.
pub const TOP_LINKS: usize = 10;

// ── Month windows ──────────────────────────────────────────────────────────

/// A contiguous run of UTC calendar months.
///
/// Every bucket boundary in this module is midnight UTC on the first of a
/// month, regardless of where the visitor or the server is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthWindow {
    start_year: i32,
    start_month: u32,
    months: u32,
}

impl MonthWindow {
    /// `months` months ending with (and including) the month containing `now`.
    pub fn trailing(now: DateTime<Utc>, months: u32) -> Self {
        Self::ending(now.year(), now.month(), months)
    }

    /// `months` months ending with `year`-`month`. Zero months is treated as one.
    pub fn ending(year: i32, month: u32, months: u32) -> Self {
        let months = months.max(1);
        let month = month.clamp(1, 12);
        let (start_year, start_month) = shift_month(year, month, 1 - months as i32);
        Self {
            start_year,
            start_month,
            months,
        }
    }

    /// Number of months covered, always at least one.
    pub fn months(&self) -> u32 {
        self.months
    }

    /// `(year, month)` pairs in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (i32, u32)> + '_ {
        (0..self.months as i32).map(|i| shift_month(self.start_year, self.start_month, i))
    }

    /// First instant inside the window.
    pub fn start(&self) -> DateTime<Utc> {
        month_start(self.start_year, self.start_month)
    }

    /// First instant after the window.
    pub fn end(&self) -> DateTime<Utc> {
        let (year, month) = shift_month(self.start_year, self.start_month, self.months as i32);
        month_start(year, month)
    }
}

fn shift_month(year: i32, month: u32, delta: i32) -> (i32, u32) {
    let index = year * 12 + (month as i32 - 1) + delta;
    (index.div_euclid(12), index.rem_euclid(12) as u32 + 1)
}

fn month_start(year: i32, month: u32) -> DateTime<Utc> {
    let date = NaiveDate::from_ymd_opt(year, month, 1).expect("month is always in 1..=12");
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

fn month_label(year: i32, month: u32) -> String {
    month_start(year, month).format("%b/%Y").to_string()
}

/// Lay `counts` (keyed `YYYY-MM`) over the window, zero-filling gaps.
fn fill_window(window: &MonthWindow, counts: &HashMap<String, i64>) -> Vec<MonthlyCount> {
    window
        .iter()
        .map(|(year, month)| MonthlyCount {
            label: month_label(year, month),
            year,
            month,
            count: counts
                .get(&format!("{year:04}-{month:02}"))
                .copied()
                .unwrap_or(0),
        })
        .collect()
}

// ── Aggregator ─────────────────────────────────────────────────────────────

/// Read-only projections over the click log. Nothing here is cached or
/// persisted; every call recomputes from `clicks`.
///
/// Only active links count towards an owner's figures; clicks on deleted
/// links stay in the log but drop out of owner-level views.
#[derive(Clone)]
pub struct Aggregator {
    pool: SqlitePool,
    dashboard_months: u32,
}

impl Aggregator {
    pub fn new(pool: SqlitePool, dashboard_months: u32) -> Self {
        Self {
            pool,
            dashboard_months: dashboard_months.max(1),
        }
    }

    /// Click total for every active link of `owner_id`, zero included.
    pub async fn totals_by_link(&self, owner_id: &str) -> Result<HashMap<String, i64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT l.short_code, COUNT(c.id)
             FROM links l
             LEFT JOIN clicks c ON c.link_code = l.short_code
             WHERE l.owner_id = ?1 AND l.is_active = 1
             GROUP BY l.short_code",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }

    /// All clicks ever recorded for `code`, deleted or not.
    pub async fn totals_for_link(&self, code: &str) -> Result<i64> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM clicks WHERE link_code = ?1")
            .bind(code)
            .fetch_one(&self.pool)
            .await?;
        Ok(total)
    }

    /// Monthly clicks across the owner's active links.
    pub async fn monthly_series(
        &self,
        owner_id: &str,
        window: MonthWindow,
    ) -> Result<Vec<MonthlyCount>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT strftime('%Y-%m', c.occurred_at) AS bucket, COUNT(*)
             FROM clicks c
             JOIN links l ON l.short_code = c.link_code
             WHERE l.owner_id = ?1 AND l.is_active = 1
               AND julianday(c.occurred_at) >= julianday(?2)
               AND julianday(c.occurred_at) <  julianday(?3)
             GROUP BY bucket",
        )
        .bind(owner_id)
        .bind(window.start())
        .bind(window.end())
        .fetch_all(&self.pool)
        .await?;

        Ok(fill_window(&window, &rows.into_iter().collect()))
    }

    /// Monthly clicks for a single link.
    pub async fn monthly_series_for_link(
        &self,
        code: &str,
        window: MonthWindow,
    ) -> Result<Vec<MonthlyCount>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT strftime('%Y-%m', occurred_at) AS bucket, COUNT(*)
             FROM clicks
             WHERE link_code = ?1
               AND julianday(occurred_at) >= julianday(?2)
               AND julianday(occurred_at) <  julianday(?3)
             GROUP BY bucket",
        )
        .bind(code)
        .bind(window.start())
        .bind(window.end())
        .fetch_all(&self.pool)
        .await?;

        Ok(fill_window(&window, &rows.into_iter().collect()))
    }

    /// Everything the dashboard charts need for `owner_id` as of `now`.
    pub async fn dashboard(&self, owner_id: &str, now: DateTime<Utc>) -> Result<DashboardSummary> {
        let (total_links, links_last_7_days): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*),
                    COALESCE(SUM(julianday(created_at) >= julianday(?2)), 0)
             FROM links
             WHERE owner_id = ?1 AND is_active = 1",
        )
        .bind(owner_id)
        .bind(now - Duration::days(7))
        .fetch_one(&self.pool)
        .await?;

        let totals = self.totals_by_link(owner_id).await?;
        let total_clicks = totals.values().sum();

        let window = MonthWindow::trailing(now, self.dashboard_months);
        let series = self.monthly_series(owner_id, window).await?;
        let clicks_in_window = series.iter().map(|m| m.count).sum();

        let (pie_labels, pie_data) = top_links(totals).into_iter().unzip();
        let (line_labels, line_data) = series.into_iter().map(|m| (m.label, m.count)).unzip();

        Ok(DashboardSummary {
            total_links,
            total_clicks,
            links_last_7_days,
            clicks_in_window,
            line_labels,
            line_data,
            pie_labels,
            pie_data,
        })
    }
}

/// Most-clicked links first, ties by code, links without clicks dropped.
fn top_links(totals: HashMap<String, i64>) -> Vec<(String, i64)> {
    let mut ranked: Vec<(String, i64)> = totals.into_iter().filter(|(_, n)| *n > 0).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(TOP_LINKS);
    ranked
}
