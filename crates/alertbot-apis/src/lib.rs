//! HTTP adapters for the external services the bot talks to.
//!
//! - [`ukraine_alarm`]: the alert source polled by the monitor.
//! - [`weather`]: OpenWeatherMap current conditions.
//! - [`currency`]: NBU official exchange rates.
//! - [`channel_feed`]: public channel previews for the TCC news digest.

use std::time::Duration;

use alertbot_core::{errors::Error, Result};

pub mod channel_feed;
pub mod currency;
pub mod ukraine_alarm;
pub mod weather;

pub use channel_feed::TelegramChannelFeed;
pub use currency::CurrencyClient;
pub use ukraine_alarm::UkraineAlarmClient;
pub use weather::WeatherClient;

/// Shared client builder; every adapter gets the same request deadline.
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::External(format!("http client build error: {e}")))
}

/// Turn a non-2xx response into [`Error::Http`], keeping a short body excerpt.
pub(crate) async fn status_error(resp: reqwest::Response) -> Error {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Error::Http {
        status,
        body: body.chars().take(200).collect(),
    }
}
