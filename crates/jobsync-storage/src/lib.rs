//! Document-store and cache-store collaborators for jobsync.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use jobsync_core::{JobRecord, StoredJob};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub use sqlx::Error as SqlxError;

pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("running migrations: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("reqId {0} already exists")]
    DuplicateReqId(String),
}

/// Result of a replace-or-insert keyed by `details.reqId`.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertedJob {
    pub job: StoredJob,
    pub created: bool,
}

/// Document store holding at most one canonical record per `reqId`.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Atomically replace the document whose `reqId` matches, or insert it.
    async fn upsert_by_req_id(&self, record: &JobRecord) -> Result<UpsertedJob, StoreError>;

    async fn insert_many(&self, records: &[JobRecord]) -> Result<Vec<StoredJob>, StoreError>;

    async fn find_all(&self) -> Result<Vec<StoredJob>, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;
}

/// Key/value cache for derived JSON copies. Failures surface as `false` /
/// `None`, never as errors.
#[async_trait]
pub trait JobCache: Send + Sync {
    async fn set_with_expiry(&self, key: &str, value: &JsonValue, ttl_secs: u64) -> bool;

    async fn get(&self, key: &str) -> Option<JsonValue>;
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

/// Run `connect` until it succeeds or the policy's retries are spent; the
/// last error is returned.
pub async fn connect_with_retry<T, E, F, Fut>(
    backend: &str,
    policy: BackoffPolicy,
    mut connect: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 0;
    loop {
        match connect().await {
            Ok(conn) => {
                info!(backend, attempts = attempt + 1, "connection established");
                return Ok(conn);
            }
            Err(err) if attempt < policy.max_retries => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(backend, attempt = attempt + 1, ?delay, error = %err, "connection failed; retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                error!(backend, attempts = attempt + 1, error = %err, "connection failed");
                return Err(err);
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, backoff: BackoffPolicy) -> Result<Self, StoreError> {
        let pool = connect_with_retry("postgres", backoff, || {
            PgPoolOptions::new().max_connections(5).connect(database_url)
        })
        .await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("postgres connection closed");
    }
}

fn stored_job_from_row(row: &PgRow) -> Result<StoredJob, StoreError> {
    let Json(record): Json<JobRecord> = row.try_get("document")?;
    Ok(StoredJob {
        id: row.try_get("id")?,
        record,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn upsert_by_req_id(&self, record: &JobRecord) -> Result<UpsertedJob, StoreError> {
        // xmax is 0 only for a tuple written by a fresh insert.
        let row = sqlx::query(
            r#"
            INSERT INTO jobs (id, req_id, document, created_at, updated_at)
            VALUES ($1, $2, $3, NOW(), NOW())
            ON CONFLICT (req_id) DO UPDATE
               SET document = EXCLUDED.document,
                   updated_at = NOW()
            RETURNING id, document, created_at, updated_at, (xmax = 0) AS inserted
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.req_id())
        .bind(Json(record))
        .fetch_one(&self.pool)
        .await?;

        Ok(UpsertedJob {
            job: stored_job_from_row(&row)?,
            created: row.try_get("inserted")?,
        })
    }

    async fn insert_many(&self, records: &[JobRecord]) -> Result<Vec<StoredJob>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut stored = Vec::with_capacity(records.len());
        for record in records {
            let row = sqlx::query(
                r#"
                INSERT INTO jobs (id, req_id, document, created_at, updated_at)
                VALUES ($1, $2, $3, NOW(), NOW())
                RETURNING id, document, created_at, updated_at
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(record.req_id())
            .bind(Json(record))
            .fetch_one(&mut *tx)
            .await?;
            stored.push(stored_job_from_row(&row)?);
        }
        tx.commit().await?;
        info!(inserted = stored.len(), "bulk insert committed");
        Ok(stored)
    }

    async fn find_all(&self) -> Result<Vec<StoredJob>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, document, created_at, updated_at
              FROM jobs
             ORDER BY created_at, id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(stored_job_from_row).collect()
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
            .fetch_one(&self.pool)
            .await?;
        Ok(total.max(0) as u64)
    }
}

/// In-process store with the same replace-or-insert contract, kept in
/// insertion order. The lock is held across the lookup and the write.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: Mutex<Vec<StoredJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn upsert_by_req_id(&self, record: &JobRecord) -> Result<UpsertedJob, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let now = Utc::now();
        if let Some(existing) = jobs.iter_mut().find(|j| j.record.req_id() == record.req_id()) {
            existing.record = record.clone();
            existing.updated_at = now;
            return Ok(UpsertedJob {
                job: existing.clone(),
                created: false,
            });
        }
        let job = StoredJob {
            id: Uuid::new_v4(),
            record: record.clone(),
            created_at: now,
            updated_at: now,
        };
        jobs.push(job.clone());
        Ok(UpsertedJob { job, created: true })
    }

    async fn insert_many(&self, records: &[JobRecord]) -> Result<Vec<StoredJob>, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let mut seen = jobs
            .iter()
            .map(|j| j.record.req_id().to_string())
            .collect::<std::collections::HashSet<_>>();
        for record in records {
            if !seen.insert(record.req_id().to_string()) {
                return Err(StoreError::DuplicateReqId(record.req_id().to_string()));
            }
        }
        let now = Utc::now();
        let stored = records
            .iter()
            .map(|record| StoredJob {
                id: Uuid::new_v4(),
                record: record.clone(),
                created_at: now,
                updated_at: now,
            })
            .collect::<Vec<_>>();
        jobs.extend(stored.iter().cloned());
        Ok(stored)
    }

    async fn find_all(&self) -> Result<Vec<StoredJob>, StoreError> {
        Ok(self.jobs.lock().await.clone())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.jobs.lock().await.len() as u64)
    }
}

/// Redis-backed cache. A disabled cache answers every call with the failure
/// sentinel.
pub struct RedisJobCache {
    connection: RwLock<Option<ConnectionManager>>,
}

impl RedisJobCache {
    pub async fn connect(redis_url: &str, backoff: BackoffPolicy) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let connection =
            connect_with_retry("redis", backoff, || ConnectionManager::new(client.clone())).await?;
        Ok(Self {
            connection: RwLock::new(Some(connection)),
        })
    }

    pub fn disabled() -> Self {
        Self {
            connection: RwLock::new(None),
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.read().await.is_some()
    }

    pub async fn close(&self) {
        if self.connection.write().await.take().is_some() {
            info!("redis connection closed");
        }
    }

    async fn handle(&self) -> Option<ConnectionManager> {
        self.connection.read().await.clone()
    }
}

#[async_trait]
impl JobCache for RedisJobCache {
    async fn set_with_expiry(&self, key: &str, value: &JsonValue, ttl_secs: u64) -> bool {
        let Some(mut conn) = self.handle().await else {
            return false;
        };
        let serialized = match serde_json::to_string(value) {
            Ok(s) => s,
            Err(e) => {
                error!(key, "cache serialization error: {e}");
                return false;
            }
        };
        match conn.set_ex::<_, _, ()>(key, serialized, ttl_secs).await {
            Ok(()) => {
                debug!(key, ttl_secs, "cache SET");
                true
            }
            Err(e) => {
                error!(key, "redis SETEX error: {e}");
                false
            }
        }
    }

    async fn get(&self, key: &str) -> Option<JsonValue> {
        let mut conn = self.handle().await?;
        match conn.get::<_, Option<String>>(key).await {
            Ok(Some(data)) => match serde_json::from_str(&data) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(key, "cache deserialization error: {e}");
                    None
                }
            },
            Ok(None) => {
                debug!(key, "cache MISS");
                None
            }
            Err(e) => {
                error!(key, "redis GET error: {e}");
                None
            }
        }
    }
}

/// In-process cache with per-entry expiry, evaluated lazily on read.
#[derive(Debug, Default)]
pub struct MemoryJobCache {
    entries: Mutex<HashMap<String, (JsonValue, Instant)>>,
}

impl MemoryJobCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|(_, expires_at)| *expires_at > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl JobCache for MemoryJobCache {
    async fn set_with_expiry(&self, key: &str, value: &JsonValue, ttl_secs: u64) -> bool {
        let Some(expires_at) = Instant::now().checked_add(Duration::from_secs(ttl_secs)) else {
            warn!(key, ttl_secs, "cache ttl out of range");
            return false;
        };
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (value.clone(), expires_at));
        true
    }

    async fn get(&self, key: &str) -> Option<JsonValue> {
        let mut entries = self.entries.lock().await;
        let (value, expires_at) = entries.get(key)?;
        if *expires_at > Instant::now() {
            return Some(value.clone());
        }
        entries.remove(key);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use jobsync_core::{
        Company, Coordinates, Dates, Details, Employment, EmploymentLevel, EmploymentType,
        Location, Meta, Salary,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(req_id: &str, title: &str) -> JobRecord {
        let at = Utc.with_ymd_and_hms(2026, 2, 24, 12, 0, 0).single().unwrap();
        JobRecord {
            title: title.to_string(),
            description: String::new(),
            company: Company { name: "Acme".into() },
            location: Location {
                full: String::new(),
                short: String::new(),
                city: String::new(),
                state: String::new(),
                country: "not found".into(),
                name: String::new(),
                street_address: String::new(),
                postal_code: String::new(),
                coordinates: Coordinates::default(),
            },
            salary: Salary { currency: "USD".into(), value: 0.0, min: 0.0, max: 0.0 },
            employment: Employment {
                employment_type: EmploymentType::FullTime,
                level: EmploymentLevel::Entry,
                brand: String::new(),
                internal: false,
                apply_url: String::new(),
                work_hours: String::new(),
            },
            details: Details {
                req_id: req_id.to_string(),
                slug: req_id.to_lowercase(),
                language: "en".into(),
                languages: vec![],
                categories: vec![],
                benefits: vec![],
                tags: vec![],
                source: "fedex-jobs".into(),
                status: "active".into(),
            },
            dates: Dates {
                created: at,
                updated: at,
                published: at,
                expires: None,
                posted_date: String::new(),
                posting_expiry_date: String::new(),
            },
            meta: Meta {
                region: String::new(),
                district: String::new(),
                location: String::new(),
                views: 0,
                applications: 0,
                featured: false,
                urgent: false,
                searchable: false,
                applyable: false,
                li_easy_applyable: false,
            },
        }
    }

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(350));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_retry_succeeds_after_transient_failures() {
        let attempts = AtomicUsize::new(0);
        let result: Result<&str, String> = connect_with_retry("test", BackoffPolicy::default(), || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(format!("refused #{n}"))
                } else {
                    Ok("connected")
                }
            }
        })
        .await;
        assert_eq!(result, Ok("connected"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_retry_gives_up_after_max_retries() {
        let attempts = AtomicUsize::new(0);
        let policy = BackoffPolicy {
            max_retries: 2,
            ..Default::default()
        };
        let result: Result<(), String> = connect_with_retry("test", policy, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err("refused".to_string()) }
        })
        .await;
        assert_eq!(result, Err("refused".to_string()));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn memory_upsert_creates_then_replaces() {
        let store = MemoryJobStore::new();
        let first = store.upsert_by_req_id(&record("R1", "Engineer")).await.unwrap();
        let second = store.upsert_by_req_id(&record("R1", "Senior Engineer")).await.unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.job.id, second.job.id);

        let all = store.find_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].record.title, "Senior Engineer");
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn memory_bulk_insert_rejects_duplicate_req_ids() {
        let store = MemoryJobStore::new();
        let stored = store
            .insert_many(&[record("A", "a"), record("B", "b")])
            .await
            .unwrap();
        assert_eq!(stored.len(), 2);
        assert_ne!(stored[0].id, stored[1].id);

        let err = store.insert_many(&[record("C", "c"), record("A", "again")]).await;
        assert!(matches!(err, Err(StoreError::DuplicateReqId(id)) if id == "A"));
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn memory_cache_round_trips_and_expires() {
        let cache = MemoryJobCache::new();
        let value = serde_json::json!({"title": "Engineer"});
        assert!(cache.set_with_expiry("job:1", &value, 60).await);
        assert!(cache.set_with_expiry("job:2", &value, 0).await);

        assert_eq!(cache.get("job:1").await, Some(value));
        assert_eq!(cache.get("job:2").await, None);
        assert_eq!(cache.get("job:3").await, None);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn memory_cache_rejects_unrepresentable_ttl() {
        let cache = MemoryJobCache::new();
        let value = serde_json::json!({"title": "Engineer"});
        assert!(!cache.set_with_expiry("job:1", &value, u64::MAX).await);
        assert_eq!(cache.get("job:1").await, None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn disabled_redis_cache_returns_sentinels() {
        let cache = RedisJobCache::disabled();
        assert!(!cache.is_connected().await);
        assert!(!cache.set_with_expiry("job:1", &serde_json::json!({}), 10).await);
        assert_eq!(cache.get("job:1").await, None);
        cache.close().await;
    }

    #[tokio::test]
    async fn redis_connect_rejects_malformed_url() {
        let result = RedisJobCache::connect("not a url", BackoffPolicy::default()).await;
        assert!(matches!(result, Err(StoreError::Redis(_))));
    }
}
