mod cache;
mod updater;

pub use cache::RateCache;
pub use updater::{CycleOutcome, RateUpdater, Resolution};
