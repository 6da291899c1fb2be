use log::{error, info, warn};
use std::sync::Arc;
use time::{OffsetDateTime, UtcOffset};
use tokio::sync::Mutex;

use crate::{AlertSink, DayWindow, RateCache, RateFetcher, RateSample, RateStore};

/// Which tier produced the value committed by a cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution {
    /// A sample already stored for today.
    Today(f64),
    /// A fresh value from the live source, now persisted.
    Fetched(f64),
    /// The most recent stored sample from any day.
    LatestKnown(f64),
    /// Nothing available; the cache holds the unknown sentinel.
    Unknown,
}

impl Resolution {
    pub fn value(&self) -> f64 {
        match *self {
            Resolution::Today(v) | Resolution::Fetched(v) | Resolution::LatestKnown(v) => v,
            Resolution::Unknown => 0.0,
        }
    }

    pub fn source(&self) -> &'static str {
        match self {
            Resolution::Today(_) => "today",
            Resolution::Fetched(_) => "fetched",
            Resolution::LatestKnown(_) => "latest_known",
            Resolution::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleOutcome {
    Resolved(Resolution),
    /// Another cycle was already running; nothing was touched.
    Skipped,
}

/// Decides the published rate: today's stored sample, else a live fetch,
/// else the last stored sample, else unknown.
pub struct RateUpdater {
    store: Arc<dyn RateStore>,
    fetcher: Arc<dyn RateFetcher>,
    alerts: Arc<dyn AlertSink>,
    cache: Arc<RateCache>,
    offset: UtcOffset,
    in_flight: Mutex<()>,
}

impl RateUpdater {
    pub fn new(
        store: Arc<dyn RateStore>,
        fetcher: Arc<dyn RateFetcher>,
        alerts: Arc<dyn AlertSink>,
        cache: Arc<RateCache>,
        offset: UtcOffset,
    ) -> Self {
        Self {
            store,
            fetcher,
            alerts,
            cache,
            offset,
            in_flight: Mutex::new(()),
        }
    }

    pub fn cache(&self) -> &Arc<RateCache> {
        &self.cache
    }

    pub async fn run_cycle(&self) -> CycleOutcome {
        self.run_cycle_at(OffsetDateTime::now_utc()).await
    }

    /// Runs one cycle treating `now` as the current instant.
    pub async fn run_cycle_at(&self, now: OffsetDateTime) -> CycleOutcome {
        let Ok(_guard) = self.in_flight.try_lock() else {
            warn!("rate update already in progress, skipping trigger");
            return CycleOutcome::Skipped;
        };

        let today = DayWindow::containing(now, self.offset);
        info!("starting rate update for day {}", today);

        let resolution = self.resolve(today, now).await;
        self.cache.set(resolution.value());
        info!(
            "published rate {:.4} (source: {})",
            resolution.value(),
            resolution.source()
        );

        CycleOutcome::Resolved(resolution)
    }

    async fn resolve(&self, today: DayWindow, now: OffsetDateTime) -> Resolution {
        match self.store.sample_for_day(today).await {
            Ok(Some(sample)) if sample.is_valid() => {
                info!("using stored rate for today: {:.4}", sample.value);
                return Resolution::Today(sample.value);
            }
            Ok(_) => info!("no stored rate for today, fetching live rate"),
            Err(e) => warn!("failed to read today's rate from store: {}", e),
        }

        let failure = match self.fetcher.fetch().await {
            Ok(fetched) if fetched.is_valid() => {
                let sample = RateSample::new(fetched.value, now);
                if let Err(e) = self.store.save(sample).await {
                    error!("failed to persist fetched rate {:.4}: {}", fetched.value, e);
                }
                return Resolution::Fetched(fetched.value);
            }
            Ok(fetched) => format!("source returned non-positive rate {}", fetched.value),
            Err(e) => e.to_string(),
        };

        warn!("live rate fetch failed: {}", failure);
        self.dispatch_alert(format!(
            "Alert: rate fetch failed ({}). Falling back to the last known rate; check the source page or the service configuration.",
            failure
        ));

        match self.store.latest_sample().await {
            Ok(Some(sample)) if sample.is_valid() => {
                info!("using last known rate: {:.4}", sample.value);
                Resolution::LatestKnown(sample.value)
            }
            Ok(_) => {
                warn!("no rate available from source or store, rate stays unknown");
                Resolution::Unknown
            }
            Err(e) => {
                error!("failed to read last known rate from store: {}", e);
                Resolution::Unknown
            }
        }
    }

    fn dispatch_alert(&self, message: String) {
        let alerts = self.alerts.clone();
        tokio::spawn(async move {
            if let Err(e) = alerts.notify(&message).await {
                error!("failed to send alert: {}", e);
            }
        });
    }
}
