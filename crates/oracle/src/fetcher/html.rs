use async_trait::async_trait;
use log::debug;
use regex::Regex;
use reqwest::Client;
use std::{sync::LazyLock, time::Duration};
use time::OffsetDateTime;

use super::{Error, RateFetcher};
use crate::RateSample;

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());

// Captures: 1 = closing slash, 2 = tag name, 3 = self-closing slash.
static ELEMENT_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<\s*(/)?\s*([A-Za-z][A-Za-z0-9:-]*)[^>]*?(/)?\s*>").unwrap()
});

// Thousands-grouped comma decimals first, then plain comma or dot decimals.
static DECIMAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{1,3}(?:\.\d{3})+,\d+|\d+,\d+|\d+\.\d+").unwrap());

/// Pulls the rate out of the element carrying a given `id` attribute.
#[derive(Debug, Clone)]
pub struct ElementExtractor {
    element_id: String,
    marker: Regex,
}

impl ElementExtractor {
    pub fn new(element_id: &str) -> Result<Self, Error> {
        let marker = Regex::new(&format!(
            r#"(?:^|\s)id\s*=\s*["']{}["']"#,
            regex::escape(element_id)
        ))?;
        Ok(Self {
            element_id: element_id.to_string(),
            marker,
        })
    }

    /// First well-formed decimal token inside the element's own content.
    pub fn extract(&self, html: &str) -> Result<f64, Error> {
        let content = self.element_content(html)?;
        let text = TAG.replace_all(content, " ");

        let token = DECIMAL
            .find(&text)
            .ok_or_else(|| Error::InvalidValue(format!("no decimal in #{}", self.element_id)))?;
        let normalized = normalize_decimal(token.as_str());
        let value: f64 = normalized
            .parse()
            .map_err(|_| Error::InvalidValue(token.as_str().to_string()))?;

        if !value.is_finite() || value <= 0.0 {
            return Err(Error::InvalidValue(token.as_str().to_string()));
        }
        Ok(value)
    }

    /// Markup between the element's opening tag and its matching close tag.
    /// An unclosed element runs to the end of the document.
    fn element_content<'a>(&self, html: &'a str) -> Result<&'a str, Error> {
        let missing = || Error::MissingField(self.element_id.clone());

        let marker = self.marker.find(html).ok_or_else(missing)?;
        let open_at = html[..marker.start()].rfind('<').ok_or_else(missing)?;
        let open = ELEMENT_TAG
            .captures(&html[open_at..])
            .filter(|tag| {
                tag.get(0)
                    .is_some_and(|m| m.start() == 0 && open_at + m.end() >= marker.end())
            })
            .ok_or_else(missing)?;

        let name = open.get(2).map_or("", |m| m.as_str());
        let start = open_at + open.get(0).map_or(0, |m| m.end());
        if open.get(3).is_some() {
            return Ok("");
        }

        let mut depth = 1usize;
        for tag in ELEMENT_TAG.captures_iter(&html[start..]) {
            if !tag.get(2).is_some_and(|m| m.as_str().eq_ignore_ascii_case(name)) {
                continue;
            }
            if tag.get(1).is_some() {
                depth -= 1;
                if depth == 0 {
                    let end = start + tag.get(0).map_or(0, |m| m.start());
                    return Ok(&html[start..end]);
                }
            } else if tag.get(3).is_none() {
                depth += 1;
            }
        }
        Ok(&html[start..])
    }
}

fn normalize_decimal(token: &str) -> String {
    if token.contains(',') {
        token.replace('.', "").replace(',', ".")
    } else {
        token.to_string()
    }
}

pub struct HtmlRateFetcher {
    client: Client,
    url: String,
    extractor: ElementExtractor,
}

impl HtmlRateFetcher {
    pub fn new(
        url: String,
        element_id: &str,
        timeout: Duration,
        accept_invalid_certs: bool,
    ) -> Result<Self, Error> {
        let client = Client::builder()
            .user_agent(concat!("rate-oracle/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()?;

        Ok(Self {
            client,
            url,
            extractor: ElementExtractor::new(element_id)?,
        })
    }
}

#[async_trait]
impl RateFetcher for HtmlRateFetcher {
    async fn fetch(&self) -> Result<RateSample, Error> {
        debug!("requesting: {}", self.url);
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(Error::Status(response.status().as_u16()));
        }

        let body = response.text().await?;
        let value = self.extractor.extract(&body)?;
        debug!("parsed rate {} from {}", value, self.url);

        Ok(RateSample::new(value, OffsetDateTime::now_utc()))
    }
}
