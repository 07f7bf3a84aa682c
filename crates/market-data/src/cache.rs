//! Two-tier series cache: in-process map over a file-backed store.
//! Entries carry an explicit TTL; expired entries are refetched rather
//! than served. Disk writes are atomic (temp then rename).

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use screener_core::{Period, PriceSeries, Quote, ScreenerError};

struct CacheEntry<T> {
    data: T,
    cached_at: DateTime<Utc>,
}

/// OHLCV cache keyed by `(symbol, period)`, provider-agnostic.
pub struct SeriesCache {
    mem: DashMap<String, CacheEntry<PriceSeries>>,
    dir: PathBuf,
    ttl_minutes: u64,
    hits: AtomicU64,
    /// Per-key write locks so concurrent misses for the same key collapse
    /// into a single upstream fetch.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SeriesCache {
    pub fn new(cache_root: &Path, ttl_minutes: u64) -> Result<Self, ScreenerError> {
        let dir = cache_root.join("ohlcv");
        fs::create_dir_all(&dir).map_err(|e| ScreenerError::Cache(e.to_string()))?;
        Ok(Self {
            mem: DashMap::new(),
            dir,
            ttl_minutes,
            hits: AtomicU64::new(0),
            locks: DashMap::new(),
        })
    }

    pub fn key(symbol: &str, period: Period) -> String {
        format!("{}__{}", symbol, period.label())
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Caret and slash are not filesystem-safe.
        let safe: String = key
            .chars()
            .map(|c| if c == '^' { '_' } else if c == '/' { '-' } else { c })
            .collect();
        self.dir.join(format!("{}.bin", safe))
    }

    fn fresh(&self, cached_at: DateTime<Utc>) -> bool {
        (Utc::now() - cached_at).num_minutes() < self.ttl_minutes as i64
    }

    /// Lock guard for a key; hold it across the check-fetch-store sequence.
    pub fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn get(&self, key: &str) -> Option<PriceSeries> {
        if let Some(entry) = self.mem.get(key) {
            if self.fresh(entry.cached_at) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.data.clone());
            }
        }

        // Fall through to the disk tier; promote on hit.
        match self.read_disk(key) {
            Some(series) if self.fresh(series.fetched_at) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.mem.insert(
                    key.to_string(),
                    CacheEntry {
                        cached_at: series.fetched_at,
                        data: series.clone(),
                    },
                );
                Some(series)
            }
            _ => None,
        }
    }

    pub fn put(&self, key: &str, series: &PriceSeries) {
        self.mem.insert(
            key.to_string(),
            CacheEntry {
                data: series.clone(),
                cached_at: series.fetched_at,
            },
        );
        if let Err(e) = self.write_disk(key, series) {
            tracing::warn!("disk cache write failed for {}: {}", key, e);
        }
    }

    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    fn read_disk(&self, key: &str) -> Option<PriceSeries> {
        let path = self.path_for(key);
        let bytes = fs::read(&path).ok()?;
        match bincode::deserialize::<PriceSeries>(&bytes) {
            Ok(series) => Some(series),
            Err(e) => {
                tracing::warn!("corrupt cache file {:?}: {}", path, e);
                let _ = fs::remove_file(&path);
                None
            }
        }
    }

    fn write_disk(&self, key: &str, series: &PriceSeries) -> Result<(), ScreenerError> {
        let path = self.path_for(key);
        let bytes =
            bincode::serialize(series).map_err(|e| ScreenerError::Cache(e.to_string()))?;
        let tmp = path.with_extension("bin.tmp");
        fs::write(&tmp, &bytes).map_err(|e| ScreenerError::Cache(e.to_string()))?;
        fs::rename(&tmp, &path).map_err(|e| ScreenerError::Cache(e.to_string()))?;
        Ok(())
    }
}

/// Short-TTL quote cache, memory only.
pub struct QuoteCache {
    mem: DashMap<String, CacheEntry<Quote>>,
    ttl_seconds: u64,
    hits: AtomicU64,
}

impl QuoteCache {
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            mem: DashMap::new(),
            ttl_seconds,
            hits: AtomicU64::new(0),
        }
    }

    pub fn get(&self, symbol: &str) -> Option<Quote> {
        let entry = self.mem.get(symbol)?;
        if (Utc::now() - entry.cached_at).num_seconds() < self.ttl_seconds as i64 {
            self.hits.fetch_add(1, Ordering::Relaxed);
            Some(entry.data.clone())
        } else {
            None
        }
    }

    pub fn put(&self, symbol: &str, quote: &Quote) {
        self.mem.insert(
            symbol.to_string(),
            CacheEntry {
                data: quote.clone(),
                cached_at: Utc::now(),
            },
        );
    }

    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use screener_core::Bar;

    fn series(symbol: &str) -> PriceSeries {
        let bars = (1..=5)
            .map(|d| Bar {
                timestamp: Utc.with_ymd_and_hms(2025, 7, d, 0, 0, 0).unwrap(),
                open: 10.0,
                high: 11.0,
                low: 9.0,
                close: 10.0 + d as f64 / 10.0,
                adjusted_close: None,
                volume: 100_000.0,
            })
            .collect();
        PriceSeries::new(symbol, Period::ThreeMonths, bars, "yahoo_chart").unwrap()
    }

    #[test]
    fn round_trip_through_both_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SeriesCache::new(dir.path(), 240).unwrap();
        let key = SeriesCache::key("BHP.AX", Period::ThreeMonths);

        assert!(cache.get(&key).is_none());
        let s = series("BHP.AX");
        cache.put(&key, &s);

        let hit = cache.get(&key).unwrap();
        assert_eq!(hit.bars.len(), 5);
        assert_eq!(hit.source, "yahoo_chart");
        assert_eq!(cache.hit_count(), 1);

        // A fresh cache instance over the same directory hits the disk tier.
        let cache2 = SeriesCache::new(dir.path(), 240).unwrap();
        let disk_hit = cache2.get(&key).unwrap();
        assert_eq!(disk_hit.closes(), s.closes());
        assert_eq!(cache2.hit_count(), 1);
    }

    #[test]
    fn expired_entries_are_not_served() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SeriesCache::new(dir.path(), 0).unwrap(); // TTL zero
        let key = SeriesCache::key("BHP.AX", Period::ThreeMonths);
        cache.put(&key, &series("BHP.AX"));
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.hit_count(), 0);
    }

    #[test]
    fn index_symbols_map_to_safe_paths() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SeriesCache::new(dir.path(), 240).unwrap();
        let key = SeriesCache::key("^AXJO", Period::SixMonths);
        cache.put(&key, &series("^AXJO"));
        assert!(cache.get(&key).is_some());
    }

    #[test]
    fn quote_cache_ttl() {
        let cache = QuoteCache::new(60);
        let quote = Quote {
            symbol: "CBA.AX".to_string(),
            price: 110.0,
            prev_close: 109.0,
            volume: Some(1_000_000.0),
            asof: Utc::now(),
        };
        assert!(cache.get("CBA.AX").is_none());
        cache.put("CBA.AX", &quote);
        assert!(cache.get("CBA.AX").is_some());
        assert_eq!(cache.hit_count(), 1);
    }
}
