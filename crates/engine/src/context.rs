use std::sync::Arc;
use std::time::Duration;

use common::{OrderBackend, TradingConfig};

use crate::feed::PriceFeed;
use crate::pricing::PricingPolicy;
use crate::retry::RetryPolicy;

/// Everything the engine, executor and recovery controller share.
/// Built once at startup and passed around behind an `Arc`.
pub struct EngineContext {
    pub pair: String,
    pub quantity: f64,
    pub pricing: PricingPolicy,
    pub poll_interval: Duration,
    pub price_timeout: Duration,
    pub max_iterations: Option<u64>,
    pub placement_retry: RetryPolicy,
    pub recovery_retry: RetryPolicy,
    pub backend: Arc<dyn OrderBackend>,
    pub feed: PriceFeed,
}

impl EngineContext {
    pub fn new(cfg: &TradingConfig, backend: Arc<dyn OrderBackend>, feed: PriceFeed) -> Self {
        Self {
            pair: cfg.pair.clone(),
            quantity: cfg.quantity,
            pricing: PricingPolicy::from_config(cfg),
            poll_interval: cfg.poll_interval(),
            price_timeout: cfg.price_timeout(),
            max_iterations: cfg.max_iterations,
            placement_retry: cfg.retry.into(),
            recovery_retry: cfg.recovery.into(),
            backend,
            feed,
        }
    }

    /// Current price from the feed, waiting up to the configured timeout.
    pub async fn current_price(&self) -> common::Result<f64> {
        self.feed.get_price(self.price_timeout).await
    }
}
