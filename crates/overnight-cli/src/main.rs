//! overnight-screener: run the nightly scan/predict pipeline.
//!
//! Usage:
//!   overnight-screener --config config.toml
//!   overnight-screener --config config.toml --sectors Financials,Resources
//!   overnight-screener --config config.toml --test-mode --skip-predict
//!   overnight-screener --config config.toml --run-id run-rerun-1 --log-level debug
//!
//! Exit codes: 0 success, 1 completed PARTIAL, 2 failed or cancelled,
//! 64 config/usage error.

use std::sync::Arc;

use market_data::DataFetcher;
use news_sentiment::{FinbertClient, SentimentAggregator};
use pipeline_orchestrator::{Pipeline, RunOptions, RunStateStore};
use screener_core::Config;

const EXIT_USAGE: i32 = 64;

struct CliArgs {
    config_path: String,
    sectors: Option<Vec<String>>,
    test_mode: bool,
    skip_predict: bool,
    run_id: Option<String>,
    log_level: String,
}

fn usage() -> ! {
    eprintln!(
        "usage: overnight-screener --config <path> [--sectors <a,b>] \
         [--test-mode] [--skip-predict] [--run-id <id>] [--log-level <level>]"
    );
    std::process::exit(EXIT_USAGE);
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();

    let Some(config_path) = flag_value(&args, "--config") else {
        eprintln!("--config is required");
        usage();
    };

    let sectors = flag_value(&args, "--sectors").map(|raw| {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
    });
    if let Some(list) = &sectors {
        if list.is_empty() {
            eprintln!("--sectors needs at least one sector name");
            usage();
        }
    }

    let log_level = flag_value(&args, "--log-level").unwrap_or_else(|| "info".to_string());
    if !["debug", "info", "warn", "error"].contains(&log_level.as_str()) {
        eprintln!("--log-level must be one of debug/info/warn/error");
        usage();
    }

    CliArgs {
        config_path,
        sectors,
        test_mode: args.iter().any(|a| a == "--test-mode"),
        skip_predict: args.iter().any(|a| a == "--skip-predict"),
        run_id: flag_value(&args, "--run-id"),
        log_level,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = parse_args();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(format!(
                    "overnight_screener={level},pipeline_orchestrator={level},market_data={level},\
                     stock_scanner={level},ensemble_predictor={level},gap_monitor={level},\
                     market_regime={level},news_sentiment={level}",
                    level = cli.log_level
                ))
            }),
        )
        .init();

    let raw = match std::fs::read_to_string(&cli.config_path) {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("cannot read config {}: {}", cli.config_path, e);
            std::process::exit(EXIT_USAGE);
        }
    };
    let mut config = match Config::from_toml_str(&raw) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid config: {}", e);
            std::process::exit(EXIT_USAGE);
        }
    };
    let run_home = std::env::var("RUN_HOME").ok();
    config.apply_run_home(run_home.as_deref());

    // Assemble the production stack.
    let fetcher = match DataFetcher::from_config(&config.fetcher, &config.persistence.cache_path) {
        Ok(fetcher) => Arc::new(fetcher),
        Err(e) => {
            eprintln!("fetcher setup failed: {}", e);
            std::process::exit(EXIT_USAGE);
        }
    };

    let classifier = Arc::new(FinbertClient::new(&config.sentiment));
    let sentiment = match SentimentAggregator::new(
        &config.sentiment,
        classifier,
        &config.persistence.cache_path,
    ) {
        Ok(aggregator) => Arc::new(aggregator),
        Err(e) => {
            eprintln!("sentiment setup failed: {}", e);
            std::process::exit(EXIT_USAGE);
        }
    };

    let store = match RunStateStore::open(&config.persistence.cache_path).await {
        Ok(store) => store,
        Err(e) => {
            eprintln!("run-state store setup failed: {}", e);
            std::process::exit(EXIT_USAGE);
        }
    };

    // SIGINT flips the cancel flag; the pipeline stops at the next phase
    // boundary and emits whatever artifacts exist.
    let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("cancel requested, stopping at next phase boundary");
            let _ = cancel_tx.send(true);
        }
    });

    let pipeline = Pipeline::new(config, fetcher.clone(), sentiment, store, cancel_rx)
        .with_fetcher_stats(fetcher);

    let summary = pipeline
        .run(RunOptions {
            run_id: cli.run_id,
            sectors: cli.sectors,
            test_mode: cli.test_mode,
            skip_predict: cli.skip_predict,
        })
        .await;

    tracing::info!(
        "run {} -> {} ({} artifacts)",
        summary.run_id,
        summary.status.as_str(),
        summary.artifacts.len()
    );
    std::process::exit(summary.exit_code);
}
