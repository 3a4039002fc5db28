//! PostgreSQL storage backend.
//!
//! Authoritative schema: every website row owns its metric history as an
//! array of a composite `metric` type.
//!
//! ```sql
//! CREATE TYPE metric AS (time_stamp TIMESTAMP(0) WITH TIME ZONE,
//!                        response_time INTEGER, return_code INTEGER,
//!                        regex_check BOOL);
//! CREATE TABLE websites (id SERIAL PRIMARY KEY, url VARCHAR,
//!                        regexp TEXT, metrics metric[]);
//! ```
//!
//! Appends go through a single `UPDATE ... array_append` statement guarded
//! by a `NOT EXISTS` check on the timestamp. The row lock taken by `UPDATE`
//! serializes concurrent appends to one website, and the guard makes
//! redelivered metrics a no-op - this is the deduplication ground truth.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgTypeInfo};
use tracing::{debug, info, instrument};

use crate::config::DatabaseConfig;
use crate::{Metric, MonitoredUrl};

use super::error::{StorageError, StorageResult};
use super::{AppendOutcome, MetricStore};

/// One element of the `metrics metric[]` column.
#[derive(Debug, Clone, sqlx::Type)]
#[sqlx(type_name = "metric", no_pg_array)]
struct MetricRecord {
    time_stamp: DateTime<Utc>,
    response_time: i32,
    return_code: i32,
    regex_check: bool,
}

impl sqlx::postgres::PgHasArrayType for MetricRecord {
    fn array_type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("_metric")
    }
}

impl From<MetricRecord> for Metric {
    fn from(record: MetricRecord) -> Self {
        Metric {
            timestamp: record.time_stamp,
            response_time: record.response_time,
            return_code: record.return_code,
            regex_check: record.regex_check,
        }
    }
}

/// Latest persisted state of one website, as shown by `url status`.
#[derive(Debug, Clone)]
pub struct UrlStatus {
    pub id: i64,
    pub url: String,
    pub checks: i64,
    pub latest: Option<Metric>,
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to the configured database. Does not touch the schema; use
    /// [`PgStore::init_schema`] (the CLI's `database init`) for that.
    #[instrument(skip_all, fields(host = %config.host, db = %config.name))]
    pub async fn connect(config: &DatabaseConfig) -> StorageResult<Self> {
        let mut options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.name)
            .username(&config.user);

        if let Some(password) = &config.password {
            options = options.password(password);
        }

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        info!("connected to PostgreSQL");

        Ok(Self { pool })
    }

    /// Lightweight connectivity check, run by the daemons at startup.
    pub async fn ping(&self) -> StorageResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Create the `metric` type and `websites` table. Safe to run against
    /// an already initialized database.
    pub async fn init_schema(&self) -> StorageResult<()> {
        debug!("initializing schema");

        sqlx::query(
            r#"
            DO $$ BEGIN
                CREATE TYPE metric AS (time_stamp TIMESTAMP(0) WITH TIME ZONE,
                                       response_time INTEGER, return_code INTEGER,
                                       regex_check BOOL);
            EXCEPTION WHEN duplicate_object THEN NULL;
            END $$;
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::SchemaFailed(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS websites (id SERIAL PRIMARY KEY, url VARCHAR,
                                                 regexp TEXT, metrics metric[]);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::SchemaFailed(e.to_string()))?;

        info!("schema initialized");
        Ok(())
    }

    /// Drop the table and the composite type.
    pub async fn reset_schema(&self) -> StorageResult<()> {
        sqlx::query("DROP TABLE IF EXISTS websites;")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::SchemaFailed(e.to_string()))?;
        sqlx::query("DROP TYPE IF EXISTS metric;")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::SchemaFailed(e.to_string()))?;

        info!("schema dropped");
        Ok(())
    }

    /// Add a URL to the watchlist. Returns the id of the new entry.
    pub async fn url_add(&self, url: &str, regexp: Option<&str>) -> StorageResult<i64> {
        let id: i32 = sqlx::query_scalar(
            "INSERT INTO websites (url, regexp, metrics) VALUES ($1, $2, '{}') RETURNING id;",
        )
        .bind(url)
        .bind(regexp)
        .fetch_one(&self.pool)
        .await?;

        Ok(id as i64)
    }

    /// Remove a URL from the watchlist. Returns how many entries matched.
    pub async fn url_remove(&self, url: &str) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM websites WHERE url = $1;")
            .bind(url)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Latest metric and check count per website, for `url status`.
    pub async fn url_status(&self) -> StorageResult<Vec<UrlStatus>> {
        let rows: Vec<(i32, String, i32, Option<MetricRecord>)> = sqlx::query_as(
            r#"
            SELECT id, url,
                   COALESCE(cardinality(metrics), 0) AS checks,
                   metrics[cardinality(metrics)] AS latest
              FROM websites
             ORDER BY id;
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, url, checks, latest)| UrlStatus {
                id: id as i64,
                url,
                checks: checks as i64,
                latest: latest.map(Metric::from),
            })
            .collect())
    }
}

#[async_trait]
impl MetricStore for PgStore {
    async fn fetch_registry(&self) -> StorageResult<Vec<MonitoredUrl>> {
        let rows: Vec<(i32, String, Option<String>)> =
            sqlx::query_as("SELECT id, url, regexp FROM websites ORDER BY id;")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(id, url, regexp)| MonitoredUrl {
                id: id as i64,
                url,
                regexp,
            })
            .collect())
    }

    #[instrument(skip(self, metric), fields(timestamp = %metric.timestamp))]
    async fn append_metric(&self, url_id: i64, metric: &Metric) -> StorageResult<AppendOutcome> {
        // Single statement: the row lock serializes concurrent appends to
        // one website, and the NOT EXISTS guard turns a redelivery into a
        // no-op instead of a second history entry.
        let result = sqlx::query(
            r#"
            UPDATE websites
               SET metrics = array_append(metrics, ROW($2, $3, $4, $5)::metric)
             WHERE id = $1
               AND NOT EXISTS (SELECT 1 FROM unnest(metrics) AS m
                                WHERE (m).time_stamp = $2);
            "#,
        )
        .bind(url_id as i32)
        .bind(metric.timestamp)
        .bind(metric.response_time)
        .bind(metric.return_code)
        .bind(metric.regex_check)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(AppendOutcome::Appended);
        }

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM websites WHERE id = $1);")
                .bind(url_id as i32)
                .fetch_one(&self.pool)
                .await?;

        if exists {
            Ok(AppendOutcome::Duplicate)
        } else {
            Ok(AppendOutcome::UnknownUrl)
        }
    }

    async fn latest_metric(&self, url_id: i64) -> StorageResult<Option<Metric>> {
        let latest: Option<Option<MetricRecord>> = sqlx::query_scalar(
            "SELECT metrics[cardinality(metrics)] FROM websites WHERE id = $1;",
        )
        .bind(url_id as i32)
        .fetch_optional(&self.pool)
        .await?;

        Ok(latest.flatten().map(Metric::from))
    }
}
