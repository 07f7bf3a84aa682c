//! News feed clients. Each configured source exposes a JSON article list;
//! feeds for a symbol are fetched concurrently and deduplicated by
//! normalized title and URL.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

use screener_core::{NewsArticle, NewsFeedConfig, ScreenerError};

#[derive(Debug, Deserialize)]
struct FeedResponse {
    #[serde(default)]
    articles: Vec<FeedItem>,
}

#[derive(Debug, Deserialize)]
struct FeedItem {
    url: String,
    title: String,
    #[serde(default)]
    summary: Option<String>,
    published_at: String,
    #[serde(default)]
    source: Option<String>,
}

pub struct NewsFeed {
    id: String,
    base_url: String,
    client: reqwest::Client,
}

impl NewsFeed {
    pub fn new(config: &NewsFeedConfig, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            id: config.id.clone(),
            base_url: config.base_url.clone(),
            client,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn fetch(&self, symbol: &str, limit: usize) -> Result<Vec<NewsArticle>, ScreenerError> {
        let url = format!("{}/news", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("symbol", symbol), ("limit", &limit.to_string())])
            .send()
            .await
            .map_err(|e| ScreenerError::transient(&self.id, e.to_string()))?;

        if !response.status().is_success() {
            return Err(ScreenerError::transient(
                &self.id,
                format!("HTTP {}", response.status()),
            ));
        }

        let body: FeedResponse = response
            .json()
            .await
            .map_err(|_| ScreenerError::transient(&self.id, "non-JSON body"))?;

        Ok(body
            .articles
            .into_iter()
            .filter_map(|item| {
                let published_at = DateTime::parse_from_rfc3339(&item.published_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok()?;
                Some(NewsArticle {
                    url: item.url,
                    title: item.title,
                    summary: item.summary,
                    published_at,
                    source: item.source.unwrap_or_else(|| self.id.clone()),
                    symbol_hint: symbol.to_string(),
                })
            })
            .collect())
    }
}

/// Fetch all feeds for a symbol concurrently. A failed feed is logged and
/// skipped; the result is newest-first, deduped and capped at `limit`.
pub async fn fetch_articles(
    feeds: &[NewsFeed],
    symbol: &str,
    limit: usize,
) -> Vec<NewsArticle> {
    let results = join_all(feeds.iter().map(|f| f.fetch(symbol, limit))).await;

    let mut articles = Vec::new();
    for (feed, result) in feeds.iter().zip(results) {
        match result {
            Ok(items) => articles.extend(items),
            Err(e) => tracing::warn!("news feed {} failed for {}: {}", feed.id(), symbol, e),
        }
    }

    dedupe_articles(&mut articles);
    articles.sort_by(|a, b| b.published_at.cmp(&a.published_at));
    articles.truncate(limit);
    articles
}

fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Drop articles already seen under the same normalized title or URL.
pub fn dedupe_articles(articles: &mut Vec<NewsArticle>) {
    let mut seen_titles = HashSet::new();
    let mut seen_urls = HashSet::new();
    articles.retain(|a| {
        let title = normalize_title(&a.title);
        let url = a.url.trim_end_matches('/').to_lowercase();
        let fresh = seen_titles.insert(title) && seen_urls.insert(url);
        fresh
    });
}
