use async_trait::async_trait;
use tracing::warn;

use crate::{OpenOrder, OrderHandle, OrderRequest, Result};

/// Placement, cancellation and enumeration of conditional orders.
///
/// `GateClient` implements this against the exchange REST API.
/// `PaperClient` implements this for simulation.
///
/// Every call is awaited to completion by the engine before the next
/// decision; implementations never see two concurrent order mutations.
#[async_trait]
pub trait OrderBackend: Send + Sync {
    /// Conditional orders still open for `pair`.
    async fn open_orders(&self, pair: &str) -> Result<Vec<OpenOrder>>;

    /// Submit a conditional order.
    async fn place_conditional_order(&self, request: &OrderRequest) -> Result<OrderHandle>;

    /// Cancel one order. `Ok(true)` means confirmed cancelled or already gone.
    async fn cancel_order(&self, order_id: &str) -> Result<bool>;

    /// Cancel every open order for `pair`, returning the cancelled ids.
    ///
    /// Best effort. The default enumerates open orders and cancels them one
    /// at a time; backends with a bulk primitive override it.
    async fn cancel_all_orders(&self, pair: &str) -> Result<Vec<String>> {
        let mut cancelled = Vec::new();
        for order in self.open_orders(pair).await? {
            if order.pair != pair {
                continue;
            }
            match self.cancel_order(&order.id).await {
                Ok(true) => cancelled.push(order.id),
                Ok(false) => warn!(order_id = %order.id, "Cancel not confirmed"),
                Err(e) => warn!(order_id = %order.id, error = %e, "Cancel failed"),
            }
        }
        Ok(cancelled)
    }
}
