mod sqlite;

pub use sqlite::*;

use async_trait::async_trait;
use time::{Duration, OffsetDateTime, Time, UtcOffset};
use uuid::Uuid;

/// One observed rate at a point in time. Stored samples are never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct RateSample {
    pub id: Uuid,
    pub value: f64,
    pub timestamp: OffsetDateTime,
}

impl RateSample {
    pub fn new(value: f64, timestamp: OffsetDateTime) -> Self {
        Self {
            id: Uuid::now_v7(),
            value,
            timestamp,
        }
    }

    /// Only finite, strictly positive values count as a rate.
    pub fn is_valid(&self) -> bool {
        self.value.is_finite() && self.value > 0.0
    }
}

/// Half-open calendar day `[start, end)` seen from a fixed UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
}

impl DayWindow {
    pub fn containing(instant: OffsetDateTime, offset: UtcOffset) -> Self {
        let local = instant.to_offset(offset);
        let start = local.replace_time(Time::MIDNIGHT);
        Self {
            start,
            end: start + Duration::days(1),
        }
    }

    pub fn contains(&self, instant: OffsetDateTime) -> bool {
        self.start <= instant && instant < self.end
    }
}

impl std::fmt::Display for DayWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Failed to query sqlite: {0}")]
    Query(#[from] sqlx::Error),
    #[error("Failed to run migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("Stored timestamp out of range: {0}")]
    Timestamp(#[from] time::error::ComponentRange),
    #[error("Stored id is not a uuid: {0}")]
    Id(#[from] uuid::Error),
    #[error("Refusing to store non-positive rate {0}")]
    InvalidSample(f64),
    #[error("Database writer unavailable: {0}")]
    Writer(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable, append-only history of rate samples.
///
/// Implementations own their consistency; callers treat every failure as
/// "no result".
#[async_trait]
pub trait RateStore: Send + Sync {
    /// Latest sample whose timestamp falls inside `day`.
    async fn sample_for_day(&self, day: DayWindow) -> Result<Option<RateSample>, Error>;
    /// Latest sample ever recorded.
    async fn latest_sample(&self) -> Result<Option<RateSample>, Error>;
    async fn save(&self, sample: RateSample) -> Result<(), Error>;
}
