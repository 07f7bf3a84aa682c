//! Per-symbol news sentiment: fetch recent articles from the configured
//! sources, classify each through the financial-text model, and aggregate
//! into a confidence-weighted direction. `article_count == 0` is returned
//! as a distinct no-news sentinel and the classifier is never invoked on
//! empty input.

pub mod classifier;
pub mod feeds;

pub use classifier::{FinbertClient, SentimentModel, TextScore};
pub use feeds::{fetch_articles, NewsFeed};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use screener_core::{
    AggregateSentiment, ArticleSentiment, NewsArticle, ScreenerError, SentimentConfig,
    SentimentFeed,
};

struct CacheEntry {
    data: AggregateSentiment,
    cached_at: DateTime<Utc>,
}

pub struct SentimentAggregator {
    feeds: Vec<NewsFeed>,
    model: Arc<dyn SentimentModel>,
    cache: DashMap<String, CacheEntry>,
    disk_dir: PathBuf,
    ttl_minutes: u64,
    max_articles: usize,
}

impl SentimentAggregator {
    pub fn new(
        config: &SentimentConfig,
        model: Arc<dyn SentimentModel>,
        cache_root: &Path,
    ) -> Result<Self, ScreenerError> {
        let disk_dir = cache_root.join("sentiment");
        fs::create_dir_all(&disk_dir).map_err(|e| ScreenerError::Cache(e.to_string()))?;

        let feeds = config
            .feeds
            .iter()
            .map(|fc| NewsFeed::new(fc, Duration::from_secs(30)))
            .collect();

        Ok(Self {
            feeds,
            model,
            cache: DashMap::new(),
            disk_dir,
            ttl_minutes: config.cache_ttl_minutes,
            max_articles: config.max_articles,
        })
    }

    fn fresh(&self, cached_at: DateTime<Utc>) -> bool {
        (Utc::now() - cached_at).num_minutes() < self.ttl_minutes as i64
    }

    fn disk_path(&self, symbol: &str) -> PathBuf {
        let safe: String = symbol
            .chars()
            .map(|c| if c == '^' || c == '/' { '_' } else { c })
            .collect();
        self.disk_dir.join(format!("{}.json", safe))
    }

    fn read_cached(&self, symbol: &str) -> Option<AggregateSentiment> {
        if let Some(entry) = self.cache.get(symbol) {
            if self.fresh(entry.cached_at) {
                return Some(entry.data.clone());
            }
        }
        let bytes = fs::read(self.disk_path(symbol)).ok()?;
        let agg: AggregateSentiment = serde_json::from_slice(&bytes).ok()?;
        if self.fresh(agg.computed_at) {
            self.cache.insert(
                symbol.to_string(),
                CacheEntry {
                    cached_at: agg.computed_at,
                    data: agg.clone(),
                },
            );
            Some(agg)
        } else {
            None
        }
    }

    fn store(&self, symbol: &str, agg: &AggregateSentiment) {
        self.cache.insert(
            symbol.to_string(),
            CacheEntry {
                data: agg.clone(),
                cached_at: agg.computed_at,
            },
        );
        let path = self.disk_path(symbol);
        let tmp = path.with_extension("json.tmp");
        let write = serde_json::to_vec_pretty(agg)
            .map_err(|e| e.to_string())
            .and_then(|bytes| fs::write(&tmp, bytes).map_err(|e| e.to_string()))
            .and_then(|_| fs::rename(&tmp, &path).map_err(|e| e.to_string()));
        if let Err(e) = write {
            tracing::warn!("sentiment cache write failed for {}: {}", symbol, e);
        }
    }

    /// Classify articles and fold them into the aggregate. Direction is the
    /// confidence-weighted signed mean; aggregate confidence is the plain
    /// mean of per-article confidences.
    async fn classify_and_aggregate(
        &self,
        symbol: &str,
        articles: &[NewsArticle],
    ) -> Result<AggregateSentiment, ScreenerError> {
        let texts: Vec<String> = articles
            .iter()
            .map(|a| match &a.summary {
                Some(summary) => format!("{}. {}", a.title, summary),
                None => a.title.clone(),
            })
            .collect();

        let scores = self.model.classify(&texts).await?;

        let per_article: Vec<ArticleSentiment> = articles
            .iter()
            .zip(&scores)
            .map(|(article, score)| ArticleSentiment {
                article_url: article.url.clone(),
                label: score.label(),
                score: score.signed_score(),
                confidence: score.confidence(),
            })
            .collect();

        let weight_sum: f64 = per_article.iter().map(|a| a.confidence).sum();
        let direction = if weight_sum > 0.0 {
            per_article
                .iter()
                .map(|a| a.score * a.confidence)
                .sum::<f64>()
                / weight_sum
        } else {
            0.0
        };
        let confidence =
            per_article.iter().map(|a| a.confidence).sum::<f64>() / per_article.len() as f64;

        let mut sources: Vec<String> = articles.iter().map(|a| a.source.clone()).collect();
        sources.sort();
        sources.dedup();

        Ok(AggregateSentiment {
            symbol: symbol.to_string(),
            direction: direction.clamp(-1.0, 1.0),
            confidence: confidence.clamp(0.0, 1.0),
            article_count: articles.len(),
            sources,
            computed_at: Utc::now(),
        })
    }
}

#[async_trait]
impl SentimentFeed for SentimentAggregator {
    async fn aggregate_sentiment(&self, symbol: &str) -> Result<AggregateSentiment, ScreenerError> {
        if let Some(cached) = self.read_cached(symbol) {
            return Ok(cached);
        }

        let articles = fetch_articles(&self.feeds, symbol, self.max_articles).await;

        let aggregate = if articles.is_empty() {
            tracing::debug!("{}: no recent news", symbol);
            AggregateSentiment::no_news(symbol)
        } else {
            self.classify_and_aggregate(symbol, &articles).await?
        };

        self.store(symbol, &aggregate);
        Ok(aggregate)
    }
}
