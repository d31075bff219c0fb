//! NBU official exchange rates (`statdirectory/exchange?json`).

use std::time::Duration;

use serde::Deserialize;

use alertbot_core::{errors::Error, formatting::escape_html, Result};

use crate::{http_client, status_error};

pub const DEFAULT_BASE_URL: &str = "https://bank.gov.ua/NBUStatService/v1/statdirectory/exchange";

/// One row of the NBU table: hryvnias per unit of `code`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ExchangeRate {
    #[serde(rename = "cc")]
    pub code: String,
    #[serde(rename = "txt")]
    pub name: String,
    pub rate: f64,
    #[serde(rename = "exchangedate")]
    pub date: String,
}

#[derive(Clone, Debug)]
pub struct CurrencyClient {
    http: reqwest::Client,
    base_url: String,
}

impl CurrencyClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Overrides the endpoint (tests).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Today's full rate table.
    pub async fn rates(&self) -> Result<Vec<ExchangeRate>> {
        let resp = self
            .http
            .get(&self.base_url)
            .query(&[("json", "")])
            .send()
            .await
            .map_err(|e| Error::External(format!("nbu request error: {e}")))?;

        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }

        resp.json()
            .await
            .map_err(|e| Error::External(format!("nbu json error: {e}")))
    }
}

/// Case-insensitive lookup by ISO code.
pub fn find_rate<'a>(rates: &'a [ExchangeRate], code: &str) -> Option<&'a ExchangeRate> {
    let code = code.trim();
    rates.iter().find(|r| r.code.eq_ignore_ascii_case(code))
}

pub fn render_rate(rate: &ExchangeRate) -> String {
    format!(
        "Курс {} ({}) до гривні на {}:\n<b>{:.4}</b> грн",
        escape_html(&rate.code),
        escape_html(&rate.name),
        escape_html(&rate.date),
        rate.rate
    )
}
