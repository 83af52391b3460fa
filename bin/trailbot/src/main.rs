use std::sync::Arc;

use tracing::{error, info, warn};
use tokio::task::JoinError;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use common::{Config, Error, OrderBackend, Result, TradingMode};
use engine::{Engine, EngineContext, GateClient, GateTickerStream, PriceFeed};
use paper::PaperClient;

const EXIT_FAILURE: i32 = 1;
const EXIT_HALTED: i32 = 2;

#[tokio::main]
async fn main() {
    // ── Logging ──────────────────────────────────────────────────────────────
    let log_guard = init_logging();

    let code = run().await;

    // `process::exit` skips destructors; flush the file appender first.
    drop(log_guard);
    if code != 0 {
        std::process::exit(code);
    }
}

/// Everything after logging setup. Returns the process exit code.
async fn run() -> i32 {
    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return EXIT_FAILURE;
        }
    };
    let trading = &cfg.trading;
    info!(mode = %cfg.trading_mode, pair = %trading.pair, "TrailBot starting");

    // ── Price feed ────────────────────────────────────────────────────────────
    let feed = PriceFeed::new();
    let gate = match GateClient::new(&trading.rest, cfg.credentials.clone(), trading.price_precision) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "Failed to build exchange client");
            return EXIT_FAILURE;
        }
    };
    // Seed from REST so the first iteration does not wait on the stream.
    match gate.ticker_price(&trading.pair).await {
        Ok(price) => {
            info!(price, "Seeded price from ticker snapshot");
            feed.on_update(price);
        }
        Err(e) => warn!(error = %e, "Ticker snapshot unavailable, waiting for stream"),
    }
    feed.start(GateTickerStream::new(trading, cfg.credentials.clone()));

    // ── Order backend (injected based on TRADING_MODE) ────────────────────────
    let backend: Arc<dyn OrderBackend> = match cfg.trading_mode {
        TradingMode::Live => {
            info!("Live trading mode — using GateClient");
            Arc::new(gate)
        }
        TradingMode::Paper => {
            info!("Paper trading mode — using PaperClient");
            let paper = Arc::new(PaperClient::new());
            tokio::spawn(forward_prices(feed.clone(), paper.clone(), trading.pair.clone()));
            paper
        }
    };

    // ── Engine ────────────────────────────────────────────────────────────────
    let ctx = Arc::new(EngineContext::new(trading, backend, feed));
    let (mut engine, handle) = Engine::new(ctx);

    match engine.reconcile().await {
        Ok(()) => {}
        Err(e @ Error::RecoveryFailed { .. }) => {
            error!(error = %e, "Startup recovery failed, refusing to trade");
            return EXIT_HALTED;
        }
        Err(e) => warn!(error = %e, "Startup reconciliation failed, the loop will resolve it"),
    }

    let mut task = tokio::spawn(engine.run());
    info!("Engine started. Waiting for shutdown signal.");

    let outcome = tokio::select! {
        res = &mut task => res,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, stopping engine");
            handle.stop().await;
            task.await
        }
    };

    if let Ok(Ok(())) = outcome {
        let state = handle.state().await;
        info!(state = %state, "TrailBot stopped");
    }
    exit_code(outcome)
}

fn exit_code(outcome: std::result::Result<Result<()>, JoinError>) -> i32 {
    match outcome {
        Ok(Ok(())) => 0,
        Ok(Err(e)) => {
            error!(error = %e, "Engine halted, manual intervention required");
            EXIT_HALTED
        }
        Err(e) => {
            error!(error = %e, "Engine task panicked");
            EXIT_FAILURE
        }
    }
}

/// Stdout logging, plus a daily rolling file under `TRAILBOT_LOG_DIR` when set.
/// The returned guard must live until exit so buffered lines are flushed.
fn init_logging() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match std::env::var("TRAILBOT_LOG_DIR").ok().and_then(|dir| file_writer(&dir)) {
        Some((writer, guard)) => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true),
            ),
            Some(guard),
        ),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(file_layer)
        .init();

    guard
}

/// Non-blocking daily rolling writer for `dir/trailbot.log`.
fn file_writer(dir: &str) -> Option<(NonBlocking, WorkerGuard)> {
    // The rolling appender panics if it cannot create its file.
    if let Err(e) = std::fs::create_dir_all(dir) {
        eprintln!("Warning: could not create log directory {dir} ({e}), file logging disabled");
        return None;
    }
    let appender = tracing_appender::rolling::daily(dir, "trailbot.log");
    Some(tracing_appender::non_blocking(appender))
}

/// Keep the paper backend's price in step with the feed.
async fn forward_prices(feed: PriceFeed, paper: Arc<PaperClient>, pair: String) {
    let mut rx = feed.subscribe();
    loop {
        let latest = *rx.borrow_and_update();
        if let Some(price) = latest {
            paper.update_price(&pair, price).await;
        }
        if rx.changed().await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halted_engine_exits_with_halt_code() {
        let halted = Err(Error::RecoveryFailed {
            attempts: 3,
            last: Box::new(Error::Exchange("1 open orders remain after cancel-all".into())),
        });
        assert_eq!(exit_code(Ok(halted)), EXIT_HALTED);
        assert_eq!(exit_code(Ok(Ok(()))), 0);
    }

    #[test]
    fn file_log_is_flushed_when_guard_drops() {
        let dir = std::env::temp_dir().join(format!("trailbot-log-{}", std::process::id()));
        let (writer, guard) = file_writer(dir.to_str().unwrap()).unwrap();
        let subscriber = tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false));

        tracing::subscriber::with_default(subscriber, || {
            error!("CRITICAL: recovery failed, open orders could not be cleared");
        });
        drop(guard);

        let logged: String = std::fs::read_dir(&dir)
            .unwrap()
            .filter_map(|entry| std::fs::read_to_string(entry.ok()?.path()).ok())
            .collect();
        let _ = std::fs::remove_dir_all(&dir);
        assert!(logged.contains("CRITICAL: recovery failed"), "{logged}");
    }
}
