use std::{env, fs, path::Path, time::Duration};

use tracing::{info, warn};

use crate::{errors::Error, news::NewsChannel, Result};

pub const DEFAULT_AIR_RAID_API_URL: &str = "https://api.ukrainealarm.com/api/v3/alerts";
pub const DEFAULT_WEATHER_CITY: &str = "Samar,UA";
pub const DEFAULT_DATABASE_URL: &str = "sqlite:bot_database.db?mode=rwc";

/// Typed configuration for the bot.
///
/// Sources, highest priority first: process environment, `.env`, `config.json`.
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: String,
    pub admin_id: Option<i64>,

    // Weather (OpenWeatherMap)
    pub weather_api_key: Option<String>,
    pub weather_default_city: String,

    // Air-raid alerts (Ukraine Alarm)
    pub ukraine_alarm_token: Option<String>,
    pub air_raid_api_url: String,
    pub air_raid_check_interval: Duration,
    pub air_raid_max_retries: u32,

    // Notification fanout
    pub notification_delay: Duration,
    pub notification_concurrency: usize,
    pub send_timeout: Duration,

    // Outbound HTTP
    pub http_timeout: Duration,

    // TCC news digest
    pub news_channels: Vec<NewsChannel>,
    pub news_target_chat_id: Option<i64>,

    // Storage
    pub database_url: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        load_json_config_if_present(Path::new("config.json"))?;
        Self::from_env()
    }

    /// Build the config from the current environment only.
    pub fn from_env() -> Result<Self> {
        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN")
            .and_then(non_empty)
            .or_else(|| env_str("BOT_TOKEN").and_then(non_empty))
            .ok_or_else(|| {
                Error::Config("TELEGRAM_BOT_TOKEN environment variable is required".to_string())
            })?;

        let admin_id = env_str("ADMIN_ID")
            .and_then(non_empty)
            .and_then(|s| match s.trim().parse::<i64>() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!("ADMIN_ID is not a valid integer, ignoring");
                    None
                }
            });

        let weather_api_key = env_str("WEATHER_API_KEY").and_then(non_empty);
        let weather_default_city = env_str("WEATHER_DEFAULT_CITY")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_WEATHER_CITY.to_string());

        let ukraine_alarm_token = env_str("UKRAINE_ALARM_TOKEN").and_then(non_empty);
        let air_raid_api_url = env_str("AIR_RAID_API_URL")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_AIR_RAID_API_URL.to_string());
        let air_raid_check_interval =
            Duration::from_secs(env_parse::<u64>("AIR_RAID_CHECK_INTERVAL").unwrap_or(90).max(1));
        let air_raid_max_retries = env_parse::<u32>("AIR_RAID_MAX_RETRIES").unwrap_or(3);

        let notification_delay =
            Duration::from_secs_f64(env_f64("NOTIFICATION_DELAY").unwrap_or(0.1).max(0.0));
        let notification_concurrency = env_parse::<usize>("NOTIFICATION_CONCURRENCY")
            .unwrap_or(20)
            .max(1);
        let send_timeout = Duration::from_millis(env_parse::<u64>("SEND_TIMEOUT_MS").unwrap_or(10_000));
        let http_timeout = Duration::from_millis(env_parse::<u64>("HTTP_TIMEOUT_MS").unwrap_or(15_000));

        // config.json keys `telegram_channels` / `target_chat_id` also work.
        let news_channels = env_str("TCC_CHANNELS")
            .or_else(|| env_str("telegram_channels"))
            .and_then(non_empty)
            .map(|raw| parse_news_channels(&raw))
            .transpose()?
            .unwrap_or_default();
        let news_target_chat_id = env_str("TCC_TARGET_CHAT_ID")
            .or_else(|| env_str("target_chat_id"))
            .and_then(non_empty)
            .and_then(|s| match s.trim().parse::<i64>() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!("TCC_TARGET_CHAT_ID is not a valid integer, ignoring");
                    None
                }
            });

        let database_url = env_str("DATABASE_URL")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        Ok(Self {
            telegram_bot_token,
            admin_id,
            weather_api_key,
            weather_default_city,
            ukraine_alarm_token,
            air_raid_api_url,
            air_raid_check_interval,
            air_raid_max_retries,
            notification_delay,
            notification_concurrency,
            send_timeout,
            http_timeout,
            news_channels,
            news_target_chat_id,
            database_url,
        })
    }

    pub fn alerts_enabled(&self) -> bool {
        self.ukraine_alarm_token.is_some()
    }

    pub fn news_enabled(&self) -> bool {
        self.news_target_chat_id.is_some() && !self.news_channels.is_empty()
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

/// Fill unset environment variables from a JSON object.
///
/// A missing file is fine; a file with invalid JSON is a config error.
fn load_json_config_if_present(path: &Path) -> Result<()> {
    let Ok(contents) = fs::read_to_string(path) else {
        return Ok(());
    };

    let vars = parse_json_config(&contents)
        .map_err(|e| Error::Config(format!("invalid JSON in {}: {e}", path.display())))?;

    let mut applied = 0usize;
    for (key, val) in vars {
        if env::var_os(&key).is_some() {
            continue;
        }
        env::set_var(&key, val);
        applied += 1;
    }
    info!("Loaded {applied} settings from {}", path.display());
    Ok(())
}

fn parse_json_config(contents: &str) -> std::result::Result<Vec<(String, String)>, String> {
    let value: serde_json::Value = serde_json::from_str(contents).map_err(|e| e.to_string())?;
    let serde_json::Value::Object(map) = value else {
        return Err("top-level value must be an object".to_string());
    };

    let mut out = Vec::new();
    for (key, val) in map {
        let s = match val {
            serde_json::Value::String(s) => s,
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            serde_json::Value::Null => continue,
            // Nested values are passed on as JSON text.
            other => other.to_string(),
        };
        out.push((key, s));
    }
    Ok(out)
}

fn parse_news_channels(raw: &str) -> Result<Vec<NewsChannel>> {
    serde_json::from_str(raw)
        .map_err(|e| Error::Config(format!("TCC_CHANNELS must be a JSON list of channels: {e}")))
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env_str(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("{key}='{raw}' is not a valid number, using default");
            None
        }
    }
}

/// Like `env_parse::<f64>` but accepts a comma decimal separator.
fn env_f64(key: &str) -> Option<f64> {
    let raw = env_str(key)?;
    match parse_decimal(&raw) {
        Some(v) => Some(v),
        None => {
            warn!("{key}='{raw}' is not a valid number, using default");
            None
        }
    }
}

fn parse_decimal(s: &str) -> Option<f64> {
    s.trim()
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
