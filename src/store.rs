use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;

use crate::{
    cache::LinkCache,
    codegen::CodeGenerator,
    error::{LinkError, Result},
    models::Link,
    retry::{with_retry, RetryConfig},
    validate::validate_url,
};

const LINK_COLUMNS: &str =
    "short_code, original_url, owner_id, created_at, updated_at, expires_at, is_active";

/// Whether `shorten` minted a new code or handed back an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortenOutcome {
    Created,
    Existing,
}

/// Durable code -> link mapping on top of SQLite, fronted by a `LinkCache`.
///
/// Codes are unique over every row ever written. Deletion is a tombstone
/// (`is_active = 0`), so a retired code keeps blocking reallocation.
#[derive(Clone)]
pub struct LinkStore {
    pool: SqlitePool,
    generator: CodeGenerator,
    cache: LinkCache,
    link_ttl: Option<Duration>,
    retry: RetryConfig,
}

impl LinkStore {
    pub fn new(pool: SqlitePool, generator: CodeGenerator) -> Self {
        Self {
            pool,
            generator,
            cache: LinkCache::new(),
            link_ttl: None,
            retry: RetryConfig::default(),
        }
    }

    /// New links expire `ttl` after creation. `None` keeps them forever.
    pub fn with_link_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.link_ttl = ttl;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn cache(&self) -> &LinkCache {
        &self.cache
    }

    pub fn retry_config(&self) -> RetryConfig {
        self.retry
    }

    // ── Warm-up ────────────────────────────────────────────────────────────

    /// Load every resolvable link into the cache. Returns how many were loaded.
    pub async fn warm_cache(&self, now: DateTime<Utc>) -> Result<usize> {
        let epoch = self.cache.epoch();
        let sql = format!("SELECT {LINK_COLUMNS} FROM links WHERE is_active = 1");
        let links: Vec<Link> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;

        let mut count = 0;
        for link in links.into_iter().filter(|l| l.is_resolvable(now)) {
            if self.cache.insert_if_unchanged(link, epoch) {
                count += 1;
            }
        }

        tracing::info!("Cache warmed with {} active link(s)", count);
        Ok(count)
    }

    // ── Create ─────────────────────────────────────────────────────────────

    pub async fn create(&self, original_url: &str, owner_id: &str) -> Result<Link> {
        self.create_at(original_url, owner_id, Utc::now()).await
    }

    /// Validate the URL, claim a fresh code and persist the link, all with
    /// `now` as the creation time.
    pub async fn create_at(
        &self,
        original_url: &str,
        owner_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Link> {
        let original_url = validate_url(original_url)?;
        let expires_at = self.link_ttl.map(|ttl| now + ttl);
        let epoch = self.cache.epoch();

        let link = self
            .generator
            .allocate(|short_code| {
                let candidate = Link {
                    short_code,
                    original_url: original_url.clone(),
                    owner_id: owner_id.to_owned(),
                    created_at: now,
                    updated_at: now,
                    expires_at,
                    is_active: true,
                };
                self.claim(candidate)
            })
            .await?;

        tracing::info!(
            "Created link '{}' -> {} for owner {}",
            link.short_code,
            link.original_url,
            link.owner_id
        );
        self.cache.insert_if_unchanged(link.clone(), epoch);
        Ok(link)
    }

    /// Like `create`, but reuses the owner's existing resolvable link for the
    /// exact same URL instead of minting another code.
    pub async fn shorten(
        &self,
        original_url: &str,
        owner_id: &str,
    ) -> Result<(Link, ShortenOutcome)> {
        let now = Utc::now();
        let url = validate_url(original_url)?;

        if let Some(existing) = self.find_existing(owner_id, &url, now).await? {
            tracing::debug!(
                "Reusing link '{}' for owner {}",
                existing.short_code,
                owner_id
            );
            return Ok((existing, ShortenOutcome::Existing));
        }

        let link = self.create_at(&url, owner_id, now).await?;
        Ok((link, ShortenOutcome::Created))
    }

    /// Atomic insert-if-absent. `None` means the code was already issued.
    async fn claim(&self, candidate: Link) -> Result<Option<Link>> {
        let inserted = with_retry("insert_link", self.retry, || {
            insert_if_absent(&self.pool, &candidate)
        })
        .await?;

        if inserted {
            return Ok(Some(candidate));
        }

        // A timed-out attempt may have committed before the retry ran; the row
        // is then ours and not a collision.
        let existing = with_retry("get_link", self.retry, || {
            fetch_link(&self.pool, &candidate.short_code)
        })
        .await?;
        match existing {
            Some(row)
                if row.owner_id == candidate.owner_id
                    && row.original_url == candidate.original_url
                    && row.created_at == candidate.created_at =>
            {
                Ok(Some(row))
            }
            _ => Ok(None),
        }
    }

    // ── Lookup ─────────────────────────────────────────────────────────────

    pub async fn get(&self, code: &str) -> Result<Link> {
        self.get_at(code, Utc::now()).await
    }

    /// Resolvable link for `code` at time `now`. Deleted, expired and unknown
    /// codes are all `NotFound`.
    pub async fn get_at(&self, code: &str, now: DateTime<Utc>) -> Result<Link> {
        if let Some(link) = self.cache.get(code) {
            if link.is_resolvable(now) {
                return Ok(link);
            }
            self.cache.remove(code);
            return Err(LinkError::NotFound);
        }

        // Taken before the read so a delete or edit racing with it can't
        // have its eviction undone by the backfill below.
        let epoch = self.cache.epoch();
        let found = with_retry("get_link", self.retry, || fetch_link(&self.pool, code)).await?;

        match found {
            Some(link) if link.is_resolvable(now) => {
                self.cache.insert_if_unchanged(link.clone(), epoch);
                Ok(link)
            }
            _ => Err(LinkError::NotFound),
        }
    }

    /// Historical accessor: the row for `code` whatever its state.
    pub async fn get_any(&self, code: &str) -> Result<Option<Link>> {
        with_retry("get_link", self.retry, || fetch_link(&self.pool, code)).await
    }

    /// The owner's active links, newest first. Expired links are included so
    /// the owner can still see them.
    pub async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Link>> {
        let sql = format!(
            "SELECT {LINK_COLUMNS} FROM links
             WHERE owner_id = ?1 AND is_active = 1
             ORDER BY julianday(created_at) DESC, short_code"
        );
        let links = sqlx::query_as(&sql)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(links)
    }

    async fn find_existing(
        &self,
        owner_id: &str,
        original_url: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Link>> {
        let sql = format!(
            "SELECT {LINK_COLUMNS} FROM links
             WHERE owner_id = ?1 AND original_url = ?2 AND is_active = 1
             ORDER BY julianday(created_at) DESC"
        );
        let candidates: Vec<Link> = sqlx::query_as(&sql)
            .bind(owner_id)
            .bind(original_url)
            .fetch_all(&self.pool)
            .await?;
        Ok(candidates.into_iter().find(|l| l.is_resolvable(now)))
    }

    // ── Mutations ──────────────────────────────────────────────────────────

    /// Point `code` at `new_url`. Only the owner may do this; the code itself
    /// never changes.
    pub async fn update(&self, code: &str, owner_id: &str, new_url: &str) -> Result<Link> {
        let mut link = self.fetch_owned(code, owner_id).await?;
        let new_url = validate_url(new_url)?;
        let now = Utc::now();

        let affected = with_retry("update_link", self.retry, || {
            set_original_url(&self.pool, code, owner_id, &new_url, now)
        })
        .await?;

        self.cache.remove(code);
        if affected == 0 {
            return Err(LinkError::NotFound);
        }

        tracing::info!("Link '{}' now points to {}", code, new_url);
        link.original_url = new_url;
        link.updated_at = now;
        Ok(link)
    }

    /// Soft-delete: the row stays, `is_active` drops to 0 and the code is
    /// retired for good.
    pub async fn delete(&self, code: &str, owner_id: &str) -> Result<()> {
        self.fetch_owned(code, owner_id).await?;
        let now = Utc::now();

        let affected =
            with_retry("delete_link", self.retry, || retire(&self.pool, code, owner_id, now))
                .await?;

        self.cache.remove(code);
        if affected == 0 {
            return Err(LinkError::NotFound);
        }

        tracing::info!("Link '{}' deleted by owner {}", code, owner_id);
        Ok(())
    }

    /// Active link for `code`, checked against `owner_id`.
    pub async fn fetch_owned(&self, code: &str, owner_id: &str) -> Result<Link> {
        let link = with_retry("get_link", self.retry, || fetch_link(&self.pool, code))
            .await?
            .filter(|l| l.is_active)
            .ok_or(LinkError::NotFound)?;

        if link.owner_id != owner_id {
            return Err(LinkError::Forbidden);
        }
        Ok(link)
    }
}

// ── Queries ────────────────────────────────────────────────────────────────

async fn fetch_link(pool: &SqlitePool, code: &str) -> Result<Option<Link>> {
    let sql = format!("SELECT {LINK_COLUMNS} FROM links WHERE short_code = ?1");
    let link = sqlx::query_as(&sql).bind(code).fetch_optional(pool).await?;
    Ok(link)
}

async fn insert_if_absent(pool: &SqlitePool, link: &Link) -> Result<bool> {
    let affected = sqlx::query(
        "INSERT INTO links
             (short_code, original_url, owner_id, created_at, updated_at, expires_at, is_active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(short_code) DO NOTHING",
    )
    .bind(&link.short_code)
    .bind(&link.original_url)
    .bind(&link.owner_id)
    .bind(link.created_at)
    .bind(link.updated_at)
    .bind(link.expires_at)
    .bind(link.is_active)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(affected == 1)
}

async fn set_original_url(
    pool: &SqlitePool,
    code: &str,
    owner_id: &str,
    new_url: &str,
    now: DateTime<Utc>,
) -> Result<u64> {
    let affected = sqlx::query(
        "UPDATE links SET original_url = ?1, updated_at = ?2
         WHERE short_code = ?3 AND owner_id = ?4 AND is_active = 1",
    )
    .bind(new_url)
    .bind(now)
    .bind(code)
    .bind(owner_id)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(affected)
}

async fn retire(pool: &SqlitePool, code: &str, owner_id: &str, now: DateTime<Utc>) -> Result<u64> {
    let affected = sqlx::query(
        "UPDATE links SET is_active = 0, updated_at = ?1
         WHERE short_code = ?2 AND owner_id = ?3 AND is_active = 1",
    )
    .bind(now)
    .bind(code)
    .bind(owner_id)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(affected)
}
