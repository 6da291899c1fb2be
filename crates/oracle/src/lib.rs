pub mod alerts;
pub mod db;
pub mod fetcher;
pub mod rate;
pub mod routes;
pub mod scheduler;
mod startup;
mod utils;

pub use alerts::{AlertSink, DisabledAlerts, GatewayAlerts};
pub use db::{Database, DayWindow, RateSample, RateStore};
pub use fetcher::{ElementExtractor, HtmlRateFetcher, RateFetcher};
pub use rate::{CycleOutcome, RateCache, RateUpdater, Resolution};
pub use routes::*;
pub use startup::*;
pub use utils::*;
