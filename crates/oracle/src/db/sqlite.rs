use async_trait::async_trait;
use log::{debug, error, info};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow},
    Row,
};
use std::{future::Future, path::Path, str::FromStr, time::Duration};
use time::OffsetDateTime;
use tokio::{
    fs::create_dir_all,
    sync::{mpsc, oneshot},
};
use uuid::Uuid;

use super::{DayWindow, Error, RateSample, RateStore};

type WriteOperation = std::pin::Pin<Box<dyn Future<Output = ()> + Send>>;

/// Funnels every write through one task so appends never interleave.
pub struct DatabaseWriter {
    write_tx: mpsc::UnboundedSender<WriteOperation>,
    _handle: tokio::task::JoinHandle<()>,
}

impl Default for DatabaseWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseWriter {
    pub fn new() -> Self {
        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<WriteOperation>();

        let handle = tokio::spawn(async move {
            while let Some(future) = write_rx.recv().await {
                future.await;
            }
        });

        Self {
            write_tx,
            _handle: handle,
        }
    }

    pub async fn execute<T, F, Fut>(&self, pool: SqlitePool, operation: F) -> Result<T, Error>
    where
        T: Send + 'static,
        F: FnOnce(SqlitePool) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel::<Result<T, Error>>();

        let write_op = Box::pin(async move {
            let result = operation(pool).await;
            let _ = result_tx.send(result);
        });

        self.write_tx
            .send(write_op)
            .map_err(|_| Error::Writer("channel closed".to_string()))?;

        result_rx
            .await
            .map_err(|_| Error::Writer("write result dropped".to_string()))?
    }
}

pub struct Database {
    pool: SqlitePool,
    writer: DatabaseWriter,
}

impl Database {
    pub async fn new(path: &str) -> Result<Self, Error> {
        let db_path = format!("{}/rates.sqlite", path);

        if let Some(parent) = Path::new(&db_path).parent() {
            create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path))?
            .create_if_missing(true)
            .pragma("journal_mode", "WAL")
            .pragma("synchronous", "NORMAL")
            .pragma("busy_timeout", "5000")
            .pragma("temp_store", "MEMORY");

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;

        let db = Self {
            pool,
            writer: DatabaseWriter::new(),
        };

        db.run_migrations().await?;
        info!("SQLite database initialized at: {}", db_path);

        Ok(db)
    }

    async fn run_migrations(&self) -> Result<(), Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Check database connectivity and integrity.
    pub async fn health_check(&self) -> Result<(), Error> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;

        let result: String = sqlx::query_scalar("PRAGMA quick_check;")
            .fetch_one(&self.pool)
            .await?;
        if result != "ok" {
            return Err(Error::Query(sqlx::Error::Protocol(format!(
                "integrity check failed: {}",
                result
            ))));
        }

        Ok(())
    }

    /// Flush the WAL into the main database file, used on shutdown.
    pub async fn checkpoint(&self) {
        match sqlx::query("PRAGMA wal_checkpoint(TRUNCATE);")
            .execute(&self.pool)
            .await
        {
            Ok(_) => info!("WAL checkpoint completed successfully"),
            Err(e) => error!("WAL checkpoint failed: {}", e),
        }
    }

    fn row_to_sample(row: &SqliteRow) -> Result<RateSample, Error> {
        let id: String = row.try_get("id")?;
        let value: f64 = row.try_get("value")?;
        let recorded_at: i64 = row.try_get("recorded_at")?;

        Ok(RateSample {
            id: Uuid::parse_str(&id)?,
            value,
            timestamp: OffsetDateTime::from_unix_timestamp(recorded_at)?,
        })
    }
}

#[async_trait]
impl RateStore for Database {
    async fn sample_for_day(&self, day: DayWindow) -> Result<Option<RateSample>, Error> {
        debug!("looking up sample in {}", day);
        let row = sqlx::query(
            "SELECT id, value, recorded_at FROM rate_samples
             WHERE recorded_at >= ? AND recorded_at < ? AND value > 0
             ORDER BY recorded_at DESC, rowid DESC
             LIMIT 1",
        )
        .bind(day.start.unix_timestamp())
        .bind(day.end.unix_timestamp())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_sample).transpose()
    }

    async fn latest_sample(&self) -> Result<Option<RateSample>, Error> {
        let row = sqlx::query(
            "SELECT id, value, recorded_at FROM rate_samples
             WHERE value > 0
             ORDER BY recorded_at DESC, rowid DESC
             LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_sample).transpose()
    }

    async fn save(&self, sample: RateSample) -> Result<(), Error> {
        if !sample.is_valid() {
            return Err(Error::InvalidSample(sample.value));
        }
        let pool = self.pool.clone();

        self.writer
            .execute(pool, move |pool| async move {
                sqlx::query("INSERT INTO rate_samples (id, value, recorded_at) VALUES (?, ?, ?)")
                    .bind(sample.id.to_string())
                    .bind(sample.value)
                    .bind(sample.timestamp.unix_timestamp())
                    .execute(&pool)
                    .await?;
                info!(
                    "stored rate {:.4} recorded at {} (UTC)",
                    sample.value,
                    sample.timestamp.to_offset(time::UtcOffset::UTC)
                );
                Ok(())
            })
            .await
    }
}
