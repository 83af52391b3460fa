#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use common::{
    Error, OpenOrder, OrderBackend, OrderHandle, OrderRequest, RejectionReason, Result,
    TradingConfig,
};
use engine::{EngineContext, PriceFeed};

pub const PAIR: &str = "BTC_USDT";

pub fn config(extra: &str) -> TradingConfig {
    TradingConfig::from_toml(&format!(
        r#"
        pair = "BTC_USDT"
        quantity = 0.01
        price_precision = 2
        poll_interval_ms = 100
        price_timeout_ms = 50
        {extra}

        [buy]
        trigger_adjust_pct = 1.0
        limit_adjust_pct = 1.5

        [sell]
        trigger_adjust_pct = 2.0
        limit_adjust_pct = 2.5

        [retry]
        max_attempts = 5
        base_delay_ms = 10

        [recovery]
        max_attempts = 3
        base_delay_ms = 10
        "#
    ))
    .unwrap()
}

pub fn context(cfg: &TradingConfig, backend: Arc<ScriptedBackend>, feed: PriceFeed) -> Arc<EngineContext> {
    Arc::new(EngineContext::new(cfg, backend, feed))
}

/// In-memory exchange whose failures are queued up front by the test.
#[derive(Default)]
pub struct ScriptedBackend {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    open: Vec<OpenOrder>,
    next_id: u64,
    placed: Vec<OrderRequest>,
    cancelled: Vec<String>,
    place_rejections: VecDeque<String>,
    cancel_errors: u32,
    cancel_unconfirmed: bool,
    open_orders_errors: u32,
    cancel_all_calls: u32,
    cancel_all_stuck: bool,
    price_after_rejection: Option<(PriceFeed, f64)>,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every open order executes.
    pub fn fill_all(&self) {
        self.inner.lock().unwrap().open.clear();
    }

    /// An order the engine did not place.
    pub fn inject_open(&self, id: &str, side: common::OrderSide) {
        self.inner.lock().unwrap().open.push(OpenOrder {
            id: id.to_string(),
            side,
            pair: PAIR.to_string(),
        });
    }

    pub fn reject_next(&self, count: usize, message: &str) {
        let mut inner = self.inner.lock().unwrap();
        for _ in 0..count {
            inner.place_rejections.push_back(message.to_string());
        }
    }

    pub fn fail_next_cancels(&self, count: u32) {
        self.inner.lock().unwrap().cancel_errors = count;
    }

    pub fn leave_cancels_unconfirmed(&self) {
        self.inner.lock().unwrap().cancel_unconfirmed = true;
    }

    pub fn fail_next_reads(&self, count: u32) {
        self.inner.lock().unwrap().open_orders_errors = count;
    }

    /// The market moves to `price` right after the next rejection.
    pub fn move_price_after_rejection(&self, feed: PriceFeed, price: f64) {
        self.inner.lock().unwrap().price_after_rejection = Some((feed, price));
    }

    /// Cancel-all reports success but leaves everything open.
    pub fn jam_cancel_all(&self) {
        self.inner.lock().unwrap().cancel_all_stuck = true;
    }

    pub fn open(&self) -> Vec<OpenOrder> {
        self.inner.lock().unwrap().open.clone()
    }

    pub fn placed(&self) -> Vec<OrderRequest> {
        self.inner.lock().unwrap().placed.clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.inner.lock().unwrap().cancelled.clone()
    }

    pub fn cancel_all_calls(&self) -> u32 {
        self.inner.lock().unwrap().cancel_all_calls
    }
}

#[async_trait]
impl OrderBackend for ScriptedBackend {
    async fn open_orders(&self, pair: &str) -> Result<Vec<OpenOrder>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.open_orders_errors > 0 {
            inner.open_orders_errors -= 1;
            return Err(Error::Http("connection reset".into()));
        }
        Ok(inner.open.iter().filter(|o| o.pair == pair).cloned().collect())
    }

    async fn place_conditional_order(&self, request: &OrderRequest) -> Result<OrderHandle> {
        let mut inner = self.inner.lock().unwrap();
        inner.placed.push(request.clone());
        if let Some(message) = inner.place_rejections.pop_front() {
            if let Some((feed, price)) = inner.price_after_rejection.take() {
                feed.on_update(price);
            }
            return Err(Error::OrderRejected {
                reason: RejectionReason::classify(request.side, &message),
            });
        }
        inner.next_id += 1;
        let order_id = format!("order-{}", inner.next_id);
        inner.open.push(OpenOrder {
            id: order_id.clone(),
            side: request.side,
            pair: request.pair.clone(),
        });
        Ok(OrderHandle {
            order_id,
            side: request.side,
            trigger_price: request.trigger_price,
            limit_price: request.limit_price,
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        if inner.cancel_errors > 0 {
            inner.cancel_errors -= 1;
            return Err(Error::Exchange("internal server error".into()));
        }
        if inner.cancel_unconfirmed {
            return Ok(false);
        }
        inner.open.retain(|o| o.id != order_id);
        inner.cancelled.push(order_id.to_string());
        Ok(true)
    }

    async fn cancel_all_orders(&self, pair: &str) -> Result<Vec<String>> {
        let mut inner = self.inner.lock().unwrap();
        inner.cancel_all_calls += 1;
        if inner.cancel_all_stuck {
            return Ok(Vec::new());
        }
        let (gone, kept): (Vec<_>, Vec<_>) = inner.open.drain(..).partition(|o| o.pair == pair);
        inner.open = kept;
        let ids: Vec<String> = gone.into_iter().map(|o| o.id).collect();
        inner.cancelled.extend(ids.iter().cloned());
        Ok(ids)
    }
}
