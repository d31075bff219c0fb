//! OpenWeatherMap current weather (`/data/2.5/weather`).

use std::time::Duration;

use serde::Deserialize;

use alertbot_core::{errors::Error, formatting::escape_html, Result};

use crate::{http_client, status_error};

pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org/data/2.5/weather";

#[derive(Clone, Debug, PartialEq)]
pub struct WeatherReport {
    pub city: String,
    /// Condition group (`Clear`, `Clouds`, `Rain`, ...).
    pub condition: String,
    pub description: String,
    pub temperature: f64,
    pub humidity: u8,
    pub wind_speed: f64,
}

#[derive(Deserialize)]
struct RawWeather {
    name: String,
    weather: Vec<RawCondition>,
    main: RawMain,
    #[serde(default)]
    wind: RawWind,
}

#[derive(Deserialize)]
struct RawCondition {
    main: String,
    description: String,
}

#[derive(Deserialize)]
struct RawMain {
    temp: f64,
    humidity: u8,
}

#[derive(Default, Deserialize)]
struct RawWind {
    #[serde(default)]
    speed: f64,
}

#[derive(Clone, Debug)]
pub struct WeatherClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl WeatherClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Overrides the endpoint (tests).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Current weather for `city` (`"Kyiv"`, `"Samar,UA"`). An unknown city is
    /// `Error::Http { status: 404, .. }`.
    pub async fn current(&self, city: &str) -> Result<WeatherReport> {
        let resp = self
            .http
            .get(&self.base_url)
            .query(&[
                ("q", city),
                ("appid", self.api_key.as_str()),
                ("units", "metric"),
                ("lang", "uk"),
            ])
            .send()
            .await
            .map_err(|e| Error::External(format!("weather request error: {e}")))?;

        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }

        let raw: RawWeather = resp
            .json()
            .await
            .map_err(|e| Error::External(format!("weather json error: {e}")))?;

        let condition = raw
            .weather
            .into_iter()
            .next()
            .ok_or_else(|| Error::External("weather response has no conditions".into()))?;

        Ok(WeatherReport {
            city: raw.name,
            condition: condition.main,
            description: condition.description,
            temperature: raw.main.temp,
            humidity: raw.main.humidity,
            wind_speed: raw.wind.speed,
        })
    }
}

fn condition_emoji(condition: &str) -> &'static str {
    match condition {
        "Clear" => "☀️",
        "Clouds" => "☁️",
        "Rain" | "Drizzle" => "🌧️",
        "Snow" => "❄️",
        "Thunderstorm" => "⛈️",
        "Mist" | "Fog" | "Haze" | "Smoke" | "Dust" => "🌫️",
        _ => "🌡️",
    }
}

pub fn render_weather(report: &WeatherReport) -> String {
    let mut description = report.description.clone();
    if let Some(first) = description.chars().next() {
        let upper: String = first.to_uppercase().collect();
        description.replace_range(..first.len_utf8(), &upper);
    }
    format!(
        "Погода в місті <b>{}</b> {}\nОпис: {}\nТемпература: {:.1}°C\nВологість: {}%\nВітер: {:.1} м/с",
        escape_html(&report.city),
        condition_emoji(&report.condition),
        escape_html(&description),
        report.temperature,
        report.humidity,
        report.wind_speed,
    )
}
