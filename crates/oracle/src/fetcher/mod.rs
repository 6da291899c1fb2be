mod html;

pub use html::{ElementExtractor, HtmlRateFetcher};

use async_trait::async_trait;

use crate::RateSample;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Failed to request rate source: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Rate source answered with status {0}")]
    Status(u16),
    #[error("Element `{0}` not found in rate source")]
    MissingField(String),
    #[error("Rate source did not contain a valid rate: {0}")]
    InvalidValue(String),
    #[error("Invalid element selector: {0}")]
    Selector(#[from] regex::Error),
}

/// One bounded attempt at reading the live rate.
#[async_trait]
pub trait RateFetcher: Send + Sync {
    async fn fetch(&self) -> Result<RateSample, Error>;
}
