use std::sync::{PoisonError, RwLock};

/// In-memory holder of the currently published rate.
///
/// `0.0` means no rate has been established yet. Only the updater writes;
/// the critical section is the in-memory copy and nothing else.
#[derive(Debug, Default)]
pub struct RateCache {
    value: RwLock<f64>,
}

impl RateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> f64 {
        *self.value.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, value: f64) {
        *self.value.write().unwrap_or_else(PoisonError::into_inner) = value;
    }

    pub fn is_known(&self) -> bool {
        self.get() > 0.0
    }
}
