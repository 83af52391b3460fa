use std::sync::Arc;

use tracing::info;

use common::{Error, OrderHandle, OrderRequest, OrderSide, Result};

use crate::context::EngineContext;

/// A placed order together with the price it was quoted from.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub handle: OrderHandle,
    /// Market price read by the attempt that succeeded.
    pub reference_price: f64,
}

/// Prices and submits conditional orders with bounded retry.
///
/// This is the ONLY component that calls
/// `OrderBackend::place_conditional_order`.
pub struct OrderExecutor {
    ctx: Arc<EngineContext>,
}

impl OrderExecutor {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Place an order for `side`.
    ///
    /// Every attempt re-reads the price before quoting. Only trigger-price
    /// rejections matching the side are retried (with exponential backoff);
    /// any other failure ends the sequence at once.
    pub async fn place(&self, side: OrderSide) -> Result<Placement> {
        let ctx = &*self.ctx;
        ctx.placement_retry
            .run(
                "place order",
                move |attempt| async move {
                    let price = ctx.current_price().await?;
                    let quote = ctx.pricing.quote(side, price);
                    let request = OrderRequest {
                        pair: ctx.pair.clone(),
                        side,
                        trigger_price: quote.trigger,
                        limit_price: quote.limit,
                        quantity: ctx.quantity,
                    };
                    info!(
                        pair = %request.pair,
                        side = %side,
                        attempt = attempt + 1,
                        price,
                        trigger = request.trigger_price,
                        limit = request.limit_price,
                        qty = request.quantity,
                        "Placing conditional order"
                    );

                    let handle = ctx.backend.place_conditional_order(&request).await?;
                    info!(order_id = %handle.order_id, side = %side, "Conditional order placed");
                    Ok(Placement {
                        handle,
                        reference_price: price,
                    })
                },
                Error::is_retryable_rejection,
            )
            .await
    }
}
