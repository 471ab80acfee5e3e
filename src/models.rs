use chrono::{DateTime, Utc};
use serde::Serialize;

/// A shortened link record from the `links` table.
///
/// Rows are never removed: deleting a link clears `is_active` and keeps the
/// code retired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Link {
    pub short_code: String,
    pub original_url: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl Link {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }

    /// Active and not past its expiry.
    pub fn is_resolvable(&self, now: DateTime<Utc>) -> bool {
        self.is_active && !self.is_expired(now)
    }
}

/// A single click event from the `clicks` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct ClickEvent {
    pub link_code: String,
    pub occurred_at: DateTime<Utc>,
    pub ip_address: Option<String>,
}

/// A link joined with its total click count, used on the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct LinkWithStats {
    #[serde(flatten)]
    pub link: Link,
    pub click_count: i64,
}

/// One bucket of a monthly series. Months are UTC calendar months.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlyCount {
    /// e.g. `Oct/2026`
    pub label: String,
    pub year: i32,
    pub month: u32,
    pub count: i64,
}

/// Chart-ready dashboard payload for one owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub total_links: i64,
    pub total_clicks: i64,
    pub links_last_7_days: i64,
    pub clicks_in_window: i64,
    pub line_labels: Vec<String>,
    pub line_data: Vec<i64>,
    pub pie_labels: Vec<String>,
    pub pie_data: Vec<i64>,
}
