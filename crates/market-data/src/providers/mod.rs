pub mod alpha;
pub mod quote_only;
pub mod yahoo;

pub use alpha::AlphaHistoryProvider;
pub use quote_only::QuoteOnlyProvider;
pub use yahoo::YahooChartProvider;

use screener_core::ScreenerError;

/// Map an HTTP status to the retry classification: 429 and 5xx are
/// transient, auth/not-found short-circuit failover.
pub(crate) fn classify_status(provider: &str, status: reqwest::StatusCode) -> ScreenerError {
    let code = status.as_u16();
    if code == 429 || status.is_server_error() {
        ScreenerError::transient(provider, format!("HTTP {}", code))
    } else {
        ScreenerError::permanent(provider, format!("HTTP {}", code))
    }
}
