pub mod cache;
pub mod fetcher;
pub mod pacing;
pub mod providers;

pub use cache::{QuoteCache, SeriesCache};
pub use fetcher::{DataFetcher, FetcherStats, ProviderUsage};
pub use pacing::{backoff_delay, jitter, DailyUsage, TokenBucket};
pub use providers::{AlphaHistoryProvider, QuoteOnlyProvider, YahooChartProvider};
