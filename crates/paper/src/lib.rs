use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use common::{
    Error, OpenOrder, OrderBackend, OrderHandle, OrderRequest, OrderSide, RejectionReason, Result,
};

/// A resting simulated conditional order.
#[derive(Debug, Clone, PartialEq)]
pub struct PaperOrder {
    pub id: String,
    pub pair: String,
    pub side: OrderSide,
    pub trigger_price: f64,
    pub limit_price: f64,
    pub quantity: f64,
    pub placed_at: DateTime<Utc>,
}

impl PaperOrder {
    /// A buy stop fires once the market reaches its trigger from below, a
    /// sell stop once it falls to its trigger.
    fn is_triggered_at(&self, price: f64) -> bool {
        match self.side {
            OrderSide::Buy => price >= self.trigger_price,
            OrderSide::Sell => price <= self.trigger_price,
        }
    }
}

/// A simulated order that executed.
#[derive(Debug, Clone, PartialEq)]
pub struct PaperFill {
    pub order: PaperOrder,
    pub market_price: f64,
    pub filled_at: DateTime<Utc>,
}

/// Simulated conditional-order backend for paper trading.
///
/// Orders rest until the latest price crosses their trigger, then count as
/// executed and drop out of the open set on the next enumeration. Nothing is
/// ever sent to the exchange.
#[derive(Default)]
pub struct PaperClient {
    /// Latest known price per pair, updated via `update_price`.
    prices: Arc<RwLock<HashMap<String, f64>>>,
    orders: Arc<RwLock<Vec<PaperOrder>>>,
    fills: Arc<RwLock<Vec<PaperFill>>>,
}

impl PaperClient {
    pub fn new() -> Self {
        info!("PaperClient initialized");
        Self::default()
    }

    /// Update the latest price for a pair (fed from the price feed).
    pub async fn update_price(&self, pair: &str, price: f64) {
        self.prices.write().await.insert(pair.to_string(), price);
    }

    /// Executed orders, oldest first.
    pub async fn fills(&self) -> Vec<PaperFill> {
        self.fills.read().await.clone()
    }

    async fn price_for(&self, pair: &str) -> Result<f64> {
        self.prices.read().await.get(pair).copied().ok_or_else(|| {
            Error::Exchange(format!(
                "PaperClient has no price for pair '{pair}'. Ensure the price feed is running."
            ))
        })
    }

    /// Move every order whose trigger the current price has crossed into
    /// the fill ledger.
    async fn sweep_triggered(&self, pair: &str) {
        let Some(price) = self.prices.read().await.get(pair).copied() else {
            return;
        };
        let mut orders = self.orders.write().await;
        let (triggered, resting): (Vec<_>, Vec<_>) = orders
            .drain(..)
            .partition(|o| o.pair == pair && o.is_triggered_at(price));
        *orders = resting;
        drop(orders);

        if triggered.is_empty() {
            return;
        }
        let mut fills = self.fills.write().await;
        for order in triggered {
            info!(
                order_id = %order.id,
                side = %order.side,
                trigger = order.trigger_price,
                limit = order.limit_price,
                price,
                "Paper order executed"
            );
            fills.push(PaperFill {
                order,
                market_price: price,
                filled_at: Utc::now(),
            });
        }
    }
}

#[async_trait]
impl OrderBackend for PaperClient {
    async fn open_orders(&self, pair: &str) -> Result<Vec<OpenOrder>> {
        self.sweep_triggered(pair).await;
        Ok(self
            .orders
            .read()
            .await
            .iter()
            .filter(|o| o.pair == pair)
            .map(|o| OpenOrder {
                id: o.id.clone(),
                side: o.side,
                pair: o.pair.clone(),
            })
            .collect())
    }

    async fn place_conditional_order(&self, request: &OrderRequest) -> Result<OrderHandle> {
        let price = self.price_for(&request.pair).await?;

        // Same constraint the exchange enforces on stop orders.
        let violation = match request.side {
            OrderSide::Buy if request.trigger_price <= price => {
                Some("trigger price must be > current price")
            }
            OrderSide::Sell if request.trigger_price >= price => {
                Some("trigger price must be < current price")
            }
            _ => None,
        };
        if let Some(message) = violation {
            debug!(
                side = %request.side,
                trigger = request.trigger_price,
                price,
                "Paper order rejected"
            );
            return Err(Error::OrderRejected {
                reason: RejectionReason::classify(request.side, message),
            });
        }
        if !(request.quantity > 0.0 && request.limit_price > 0.0) {
            return Err(Error::OrderRejected {
                reason: RejectionReason::Other(format!(
                    "invalid amount {} or limit price {}",
                    request.quantity, request.limit_price
                )),
            });
        }

        let order = PaperOrder {
            id: Uuid::new_v4().to_string(),
            pair: request.pair.clone(),
            side: request.side,
            trigger_price: request.trigger_price,
            limit_price: request.limit_price,
            quantity: request.quantity,
            placed_at: Utc::now(),
        };
        debug!(
            order_id = %order.id,
            pair = %order.pair,
            side = %order.side,
            trigger = order.trigger_price,
            limit = order.limit_price,
            qty = order.quantity,
            "Paper order resting"
        );

        let handle = OrderHandle {
            order_id: order.id.clone(),
            side: order.side,
            trigger_price: order.trigger_price,
            limit_price: order.limit_price,
        };
        self.orders.write().await.push(order);
        Ok(handle)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<bool> {
        let mut orders = self.orders.write().await;
        let before = orders.len();
        orders.retain(|o| o.id != order_id);
        if orders.len() < before {
            debug!(order_id, "Paper order cancelled");
        }
        // Unknown ids count as already gone.
        Ok(true)
    }
}
