//! TCC news digest: recent keyword-matching posts from public channels,
//! forwarded once to a target chat.

use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use crate::{formatting::escape_html, Result};

/// One watched channel and the keywords that make a post relevant.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct NewsChannel {
    #[serde(rename = "channel_id")]
    pub channel: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelPost {
    pub channel: String,
    pub post_id: i64,
    pub text: String,
    pub published_at: DateTime<FixedOffset>,
}

/// Port for reading recent posts of a public channel, oldest first.
#[async_trait]
pub trait ChannelFeed: Send + Sync {
    async fn recent_posts(&self, channel: &str) -> Result<Vec<ChannelPost>>;
}

/// Remembers post texts that were already forwarded.
#[async_trait]
pub trait ProcessedNewsStore: Send + Sync {
    async fn is_processed(&self, text: &str) -> Result<bool>;

    /// Returns `false` when the text was already recorded.
    async fn mark_processed(&self, channel: &str, text: &str) -> Result<bool>;
}

pub fn default_window() -> Duration {
    Duration::days(3)
}

#[derive(Clone)]
pub struct NewsService {
    feed: Arc<dyn ChannelFeed>,
    store: Arc<dyn ProcessedNewsStore>,
    channels: Vec<NewsChannel>,
    window: Duration,
}

impl NewsService {
    pub fn new(
        feed: Arc<dyn ChannelFeed>,
        store: Arc<dyn ProcessedNewsStore>,
        channels: Vec<NewsChannel>,
    ) -> Self {
        Self {
            feed,
            store,
            channels,
            window: default_window(),
        }
    }

    /// Posts from the last window that match a keyword of their channel and
    /// were never forwarded. A channel that fails to load is skipped.
    pub async fn collect(&self, now: DateTime<Utc>) -> Result<Vec<ChannelPost>> {
        let since = now - self.window;
        let mut seen = HashSet::new();
        let mut found = Vec::new();

        for channel in self.channels.iter().filter(|c| !c.keywords.is_empty()) {
            let posts = match self.feed.recent_posts(&channel.channel).await {
                Ok(posts) => posts,
                Err(e) => {
                    warn!("Failed to read channel {}: {e}", channel.channel);
                    continue;
                }
            };

            for post in posts {
                if post.published_at < since || post.text.trim().is_empty() {
                    continue;
                }
                if !matches_keywords(&post.text, &channel.keywords) {
                    continue;
                }
                if seen.contains(&post.text) || self.store.is_processed(&post.text).await? {
                    continue;
                }
                seen.insert(post.text.clone());
                found.push(post);
            }
        }

        info!("News digest: {} new posts", found.len());
        Ok(found)
    }

    /// Record posts as forwarded so later digests skip them.
    pub async fn mark_sent(&self, posts: &[ChannelPost]) -> Result<()> {
        for post in posts {
            self.store.mark_processed(&post.channel, &post.text).await?;
        }
        Ok(())
    }
}

fn matches_keywords(text: &str, keywords: &[String]) -> bool {
    let text = text.to_lowercase();
    keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .any(|k| !k.is_empty() && text.contains(&k))
}

pub fn render_digest(posts: &[ChannelPost]) -> String {
    let mut out = String::from("📰 <b>Останні новини ТЦК за три дні</b>\n");
    for post in posts {
        out.push_str(&format!(
            "\nДжерело: {}\n{}\n",
            escape_html(&post.channel),
            escape_html(post.text.trim())
        ));
    }
    out
}
