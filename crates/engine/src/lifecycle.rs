use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{error, info, warn};

use common::{EngineCommand, Error, LifecycleState, OpenOrder, OrderSide, OrderState, Result};

use crate::context::EngineContext;
use crate::executor::OrderExecutor;
use crate::recovery::RecoveryController;

/// Cloneable handle for observing and stopping a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    command_tx: mpsc::Sender<EngineCommand>,
    state: Arc<RwLock<LifecycleState>>,
    order: Arc<RwLock<OrderState>>,
}

impl EngineHandle {
    pub async fn send(&self, cmd: EngineCommand) {
        let _ = self.command_tx.send(cmd).await;
    }

    /// Ask the loop to exit. Honoured between iterations, never while an
    /// order call is in flight.
    pub async fn stop(&self) {
        self.send(EngineCommand::Stop).await;
    }

    pub async fn state(&self) -> LifecycleState {
        *self.state.read().await
    }

    /// Snapshot of the tracked order as of the last completed iteration.
    pub async fn order_state(&self) -> OrderState {
        self.order.read().await.clone()
    }
}

/// What one iteration of the control loop did.
#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    /// No open orders and idle: a new order went out.
    Placed { side: OrderSide, order_id: String },
    /// Placement gave up this iteration; still idle.
    PlacementFailed { side: OrderSide },
    /// The tracked order left the open set, so it executed.
    Filled { side: OrderSide },
    /// Tracked order still open and the price has not drifted against it.
    Holding,
    /// Drift: the order was cancelled and re-placed at the new price.
    Replaced { order_id: String, reference_price: f64 },
    /// Open orders could not be read; nothing changed.
    ReadFailed,
    /// No price arrived in time; nothing changed.
    PriceUnavailable,
    /// A fault was resolved by cancelling everything and going idle.
    Recovered,
}

/// The order lifecycle state machine.
///
/// Keeps exactly one conditional order working: places it from Idle,
/// detects fills, cancels and re-places it when the price drifts against
/// it, and hands faults to the `RecoveryController`.
pub struct Engine {
    ctx: Arc<EngineContext>,
    executor: OrderExecutor,
    recovery: RecoveryController,
    order: OrderState,
    phase: LifecycleState,
    iterations: u64,
    stop_requested: bool,
    state: Arc<RwLock<LifecycleState>>,
    order_snapshot: Arc<RwLock<OrderState>>,
    command_rx: mpsc::Receiver<EngineCommand>,
    #[allow(dead_code)] // kept to prevent channel close
    command_tx: mpsc::Sender<EngineCommand>,
}

impl Engine {
    pub fn new(ctx: Arc<EngineContext>) -> (Self, EngineHandle) {
        let (command_tx, command_rx) = mpsc::channel(8);
        let state = Arc::new(RwLock::new(LifecycleState::Idle));
        let order_snapshot = Arc::new(RwLock::new(OrderState::new()));

        let handle = EngineHandle {
            command_tx: command_tx.clone(),
            state: state.clone(),
            order: order_snapshot.clone(),
        };

        let engine = Engine {
            executor: OrderExecutor::new(ctx.clone()),
            recovery: RecoveryController::new(ctx.clone()),
            ctx,
            order: OrderState::new(),
            phase: LifecycleState::Idle,
            iterations: 0,
            stop_requested: false,
            state,
            order_snapshot,
            command_rx,
            command_tx,
        };

        (engine, handle)
    }

    pub fn order_state(&self) -> &OrderState {
        &self.order
    }

    pub fn phase(&self) -> LifecycleState {
        self.phase
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Adopt whatever the exchange reports before the loop starts.
    ///
    /// No open orders: stay idle. One: track it, with the current price as
    /// reference. More than one: recover.
    pub async fn reconcile(&mut self) -> Result<()> {
        let orders = self.ctx.backend.open_orders(&self.ctx.pair).await?;
        match orders.as_slice() {
            [] => info!(pair = %self.ctx.pair, "No open orders at startup, starting idle"),
            [order] => {
                let price = self.ctx.current_price().await?;
                self.order.mark_placed(order.side, price, order.id.clone());
                self.set_phase(LifecycleState::Active).await;
                info!(
                    order_id = %order.id,
                    side = %order.side,
                    reference_price = price,
                    "Adopted open order at startup"
                );
            }
            many => {
                warn!(open = many.len(), "Multiple open orders at startup, recovering");
                self.recover().await?;
            }
        }
        self.publish_order().await;
        Ok(())
    }

    /// Run the control loop until stopped, the iteration budget is spent, or
    /// recovery fails. Call from `tokio::spawn`.
    pub async fn run(mut self) -> Result<()> {
        info!(pair = %self.ctx.pair, poll_interval = ?self.ctx.poll_interval, "Engine running");

        loop {
            while let Ok(cmd) = self.command_rx.try_recv() {
                self.handle_command(cmd);
            }
            if self.stop_requested {
                info!("Stop requested, leaving control loop");
                break;
            }
            if let Some(max) = self.ctx.max_iterations {
                if self.iterations >= max {
                    info!(iterations = self.iterations, "Iteration limit reached, leaving control loop");
                    break;
                }
            }

            if let Err(e) = self.tick().await {
                error!(error = %e, "Engine halted");
                return Err(e);
            }

            let cmd = tokio::select! {
                _ = tokio::time::sleep(self.ctx.poll_interval) => None,
                cmd = self.command_rx.recv() => cmd,
            };
            if let Some(cmd) = cmd {
                self.handle_command(cmd);
            }
        }

        self.set_phase(LifecycleState::Stopped).await;
        Ok(())
    }

    /// One iteration of the state machine. Faults are resolved through
    /// recovery here; only `Error::RecoveryFailed` comes back as `Err`.
    pub async fn tick(&mut self) -> Result<Tick> {
        self.iterations += 1;
        let tick = match self.step().await {
            Ok(tick) => tick,
            Err(e) => {
                error!(error = %e, "Unresolvable fault, entering recovery");
                self.recover().await?;
                Tick::Recovered
            }
        };
        self.publish_order().await;
        Ok(tick)
    }

    async fn step(&mut self) -> Result<Tick> {
        let orders = match self.ctx.backend.open_orders(&self.ctx.pair).await {
            Ok(orders) => orders,
            Err(e) => {
                warn!(error = %e, "Failed to fetch open orders, retrying next iteration");
                return Ok(Tick::ReadFailed);
            }
        };

        match (orders.as_slice(), self.order.is_active()) {
            ([], false) => Ok(self.place_next().await),
            ([], true) => Ok(self.on_fill().await),
            ([open], true) => self.check_drift(open).await,
            (open, active) => Err(Error::Exchange(format!(
                "unexpected exchange state: {} open orders while {}",
                open.len(),
                if active { "tracking one" } else { "idle" }
            ))),
        }
    }

    async fn place_next(&mut self) -> Tick {
        let side = self.order.next_side();
        self.set_phase(LifecycleState::Placing).await;

        match self.executor.place(side).await {
            Ok(placement) => {
                let order_id = placement.handle.order_id.clone();
                self.order.mark_placed(side, placement.reference_price, order_id.clone());
                self.set_phase(LifecycleState::Active).await;
                Tick::Placed { side, order_id }
            }
            Err(Error::PriceUnavailable { waited }) => {
                warn!(waited = ?waited, side = %side, "No price available, skipping placement");
                self.set_phase(LifecycleState::Idle).await;
                Tick::PriceUnavailable
            }
            Err(e) => {
                error!(side = %side, error = %e, "Order placement failed, staying idle");
                self.set_phase(LifecycleState::Idle).await;
                Tick::PlacementFailed { side }
            }
        }
    }

    async fn on_fill(&mut self) -> Tick {
        let side = self.order.side().unwrap_or(OrderSide::Buy);
        info!(
            side = %side,
            order_id = ?self.order.order_id(),
            "Order executed, no open orders remain"
        );
        self.order.mark_filled();
        self.set_phase(LifecycleState::Idle).await;
        Tick::Filled { side }
    }

    async fn check_drift(&mut self, open: &OpenOrder) -> Result<Tick> {
        if self.order.order_id() != Some(open.id.as_str()) {
            return Err(Error::Exchange(format!(
                "open order {} is not the tracked order {:?}",
                open.id,
                self.order.order_id()
            )));
        }
        let (Some(side), Some(reference)) = (self.order.side(), self.order.reference_price()) else {
            return Err(Error::Other("active order without side or reference price".into()));
        };

        let price = match self.ctx.current_price().await {
            Ok(price) => price,
            Err(e) => {
                warn!(error = %e, "No price available for drift check");
                return Ok(Tick::PriceUnavailable);
            }
        };

        let drifted = match side {
            OrderSide::Buy => price < reference,
            OrderSide::Sell => price > reference,
        };
        if !drifted {
            return Ok(Tick::Holding);
        }

        info!(
            side = %side,
            reference_price = reference,
            price,
            order_id = %open.id,
            "Price moved against order, replacing"
        );
        self.cancel_and_replace(side, &open.id).await
    }

    /// Any failure here leaves the exchange in an unknown state and is
    /// returned for recovery.
    async fn cancel_and_replace(&mut self, side: OrderSide, order_id: &str) -> Result<Tick> {
        self.set_phase(LifecycleState::Cancelling).await;
        if !self.ctx.backend.cancel_order(order_id).await? {
            return Err(Error::Exchange(format!("cancellation of order {order_id} not confirmed")));
        }
        self.order.mark_cancelled();
        info!(order_id, "Order cancelled");

        self.set_phase(LifecycleState::Replacing).await;
        let placement = self.executor.place(side).await?;
        let new_id = placement.handle.order_id.clone();
        self.order.mark_placed(side, placement.reference_price, new_id.clone());
        self.set_phase(LifecycleState::Active).await;
        info!(
            old_order_id = order_id,
            new_order_id = %new_id,
            reference_price = placement.reference_price,
            "Order replaced"
        );

        Ok(Tick::Replaced {
            order_id: new_id,
            reference_price: placement.reference_price,
        })
    }

    async fn recover(&mut self) -> Result<()> {
        self.set_phase(LifecycleState::Recovering).await;
        match self.recovery.recover(&mut self.order).await {
            Ok(()) => {
                self.set_phase(LifecycleState::Idle).await;
                Ok(())
            }
            Err(e) => {
                self.set_phase(LifecycleState::Halted).await;
                self.publish_order().await;
                Err(e)
            }
        }
    }

    fn handle_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::Stop => {
                info!("Stop command received");
                self.stop_requested = true;
            }
        }
    }

    async fn set_phase(&mut self, phase: LifecycleState) {
        if self.phase != phase {
            info!(from = %self.phase, to = %phase, "Lifecycle transition");
        }
        self.phase = phase;
        *self.state.write().await = phase;
    }

    async fn publish_order(&self) {
        self.order_snapshot.write().await.clone_from(&self.order);
    }
}
