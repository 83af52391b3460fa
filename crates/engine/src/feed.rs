use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use common::{Error, Result};

use crate::gate::GateTickerStream;

/// Latest traded price, shared between the stream task and the engine loop.
///
/// The stream overwrites the value on every tick without waiting for readers;
/// only the most recent price is kept. Cloning yields another handle to the
/// same value.
#[derive(Clone)]
pub struct PriceFeed {
    tx: Arc<watch::Sender<Option<f64>>>,
    started: Arc<AtomicBool>,
}

impl Default for PriceFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl PriceFeed {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            tx: Arc::new(tx),
            started: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawn the streaming subscription. Only the first call spawns; later
    /// calls return `None`.
    pub fn start(&self, stream: GateTickerStream) -> Option<JoinHandle<()>> {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Price feed already started");
            return None;
        }
        info!("Starting price feed");
        Some(tokio::spawn(stream.run(self.clone())))
    }

    /// Record a new price. Invalid values are dropped.
    pub fn on_update(&self, price: f64) {
        if !(price.is_finite() && price > 0.0) {
            debug!(price, "Dropping invalid price update");
            return;
        }
        self.tx.send_replace(Some(price));
    }

    /// Most recent price, if any has been received.
    pub fn latest(&self) -> Option<f64> {
        *self.tx.borrow()
    }

    /// Latest price, waiting up to `timeout` for the first one to arrive.
    pub async fn get_price(&self, timeout: Duration) -> Result<f64> {
        if let Some(price) = self.latest() {
            return Ok(price);
        }
        let mut rx = self.tx.subscribe();
        let price = match tokio::time::timeout(timeout, rx.wait_for(Option::is_some)).await {
            Ok(Ok(guard)) => *guard,
            // The sender lives in `self`, so the channel cannot close under us.
            Ok(Err(_)) | Err(_) => None,
        };
        price.ok_or(Error::PriceUnavailable { waited: timeout })
    }

    /// Receiver notified on every price change.
    pub fn subscribe(&self) -> watch::Receiver<Option<f64>> {
        self.tx.subscribe()
    }
}
