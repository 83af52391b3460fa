use std::sync::Arc;

use tracing::{error, info, warn};

use common::{Error, OrderState, Result};

use crate::context::EngineContext;

/// Restores a known-good baseline after a fault: no open orders on the
/// exchange and an idle `OrderState`.
pub struct RecoveryController {
    ctx: Arc<EngineContext>,
}

impl RecoveryController {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Cancel every open order for the pair and confirm none remain,
    /// retrying with backoff. On success `state` is reset with its side kept.
    ///
    /// Exhausting the attempts returns `Error::RecoveryFailed`; the caller
    /// must not resume trading on its own after that.
    pub async fn recover(&self, state: &mut OrderState) -> Result<()> {
        let ctx = &*self.ctx;
        info!(pair = %ctx.pair, "Attempting state recovery");

        let outcome = ctx
            .recovery_retry
            .run(
                "recovery",
                move |attempt| async move {
                    let cancelled = ctx.backend.cancel_all_orders(&ctx.pair).await?;
                    info!(attempt = attempt + 1, cancelled = ?cancelled, "Cancel-all requested");

                    let remaining = ctx.backend.open_orders(&ctx.pair).await?;
                    if !remaining.is_empty() {
                        warn!(remaining = remaining.len(), "Open orders survived cancel-all");
                        return Err(Error::Exchange(format!(
                            "{} open orders remain after cancel-all",
                            remaining.len()
                        )));
                    }
                    Ok(())
                },
                |_| true,
            )
            .await;

        match outcome {
            Ok(()) => {
                state.reset_preserving_side();
                info!(side = ?state.side(), "Recovery complete, state reset to idle");
                Ok(())
            }
            Err(e) => {
                let (attempts, last) = match e {
                    Error::RetriesExhausted { attempts, last, .. } => (attempts, last),
                    other => (1, Box::new(other)),
                };
                error!(
                    pair = %ctx.pair,
                    attempts,
                    error = %last,
                    "CRITICAL: recovery failed, open orders could not be cleared"
                );
                Err(Error::RecoveryFailed { attempts, last })
            }
        }
    }
}
