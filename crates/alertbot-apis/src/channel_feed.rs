//! Public Telegram channel feed read from the web preview (`t.me/s/<name>`).
//!
//! Only public channels with a username have a preview. The page lists the
//! latest ~20 posts, oldest first.

use std::{sync::OnceLock, time::Duration};

use async_trait::async_trait;
use chrono::DateTime;
use regex::Regex;
use tracing::{debug, warn};

use alertbot_core::{
    errors::Error,
    news::{ChannelFeed, ChannelPost},
    Result,
};

use crate::{http_client, status_error};

pub const DEFAULT_BASE_URL: &str = "https://t.me";

#[derive(Clone, Debug)]
pub struct TelegramChannelFeed {
    http: reqwest::Client,
    base_url: String,
}

impl TelegramChannelFeed {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Overrides the host (tests).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[async_trait]
impl ChannelFeed for TelegramChannelFeed {
    async fn recent_posts(&self, channel: &str) -> Result<Vec<ChannelPost>> {
        let name = channel_username(channel).ok_or_else(|| {
            Error::Config(format!("channel {channel} has no public username"))
        })?;

        let resp = self
            .http
            .get(format!("{}/s/{name}", self.base_url.trim_end_matches('/')))
            .send()
            .await
            .map_err(|e| Error::External(format!("channel feed request error: {e}")))?;

        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }

        let html = resp
            .text()
            .await
            .map_err(|e| Error::External(format!("channel feed body error: {e}")))?;
        let posts = parse_channel_page(channel, &html);
        debug!("Channel {name}: {} posts in preview", posts.len());
        Ok(posts)
    }
}

/// `@name`, `t.me/name` and `https://t.me/name` all become `name`.
/// Numeric ids have no web preview.
fn channel_username(channel: &str) -> Option<&str> {
    let name = channel.trim();
    let name = name
        .strip_prefix("https://")
        .or_else(|| name.strip_prefix("http://"))
        .unwrap_or(name);
    let name = name.strip_prefix("t.me/").unwrap_or(name);
    let name = name.strip_prefix("s/").unwrap_or(name);
    let name = name.trim_start_matches('@').trim_end_matches('/');

    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.chars().all(|c| c.is_ascii_digit());
    valid.then_some(name)
}

fn post_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"data-post="[^"/]+/(\d+)""#).expect("valid regex"))
}

fn post_text_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)<div class="tgme_widget_message_text[^"]*"[^>]*>(.*?)</div>"#)
            .expect("valid regex")
    })
}

fn post_time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"<time[^>]*datetime="([^"]+)""#).expect("valid regex"))
}

/// Extract posts from a preview page. Posts without text (media only) or
/// without a parsable timestamp are skipped.
pub fn parse_channel_page(channel: &str, html: &str) -> Vec<ChannelPost> {
    let markers: Vec<(usize, i64)> = post_marker_re()
        .captures_iter(html)
        .filter_map(|c| {
            let start = c.get(0)?.start();
            let id = c.get(1)?.as_str().parse().ok()?;
            Some((start, id))
        })
        .collect();

    let mut posts = Vec::new();
    for (i, (start, post_id)) in markers.iter().enumerate() {
        let end = markers.get(i + 1).map_or(html.len(), |(next, _)| *next);
        let block = &html[*start..end];

        let Some(text) = post_text_re()
            .captures(block)
            .and_then(|c| c.get(1))
            .map(|m| html_to_text(m.as_str()))
            .filter(|t| !t.trim().is_empty())
        else {
            continue;
        };

        let published_at = post_time_re()
            .captures(block)
            .and_then(|c| c.get(1))
            .and_then(|m| DateTime::parse_from_rfc3339(m.as_str()).ok());
        let Some(published_at) = published_at else {
            warn!("Skipping post {channel}/{post_id}: no timestamp");
            continue;
        };

        posts.push(ChannelPost {
            channel: channel.to_string(),
            post_id: *post_id,
            text,
            published_at,
        });
    }
    posts
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").expect("valid regex"))
}

fn line_break_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<br\s*/?>").expect("valid regex"))
}

fn html_to_text(fragment: &str) -> String {
    let text = line_break_re().replace_all(fragment, "\n");
    let text = tag_re().replace_all(&text, "");
    unescape_entities(text.trim())
}

fn unescape_entities(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let decoded = rest.find(';').and_then(|semi| {
            let entity = &rest[1..semi];
            let ch = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some(' '),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse().ok()))
                    .and_then(char::from_u32),
            }?;
            Some((ch, semi + 1))
        });
        match decoded {
            Some((ch, len)) => {
                out.push(ch);
                rest = &rest[len..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
