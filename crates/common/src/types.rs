use serde::{Deserialize, Serialize};

/// Side of a conditional order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Side of the next order given the side of the previous one.
    /// `Buy` unless the previous order was a buy; an unrecorded side yields `Buy`.
    pub fn next_after(previous: Option<OrderSide>) -> OrderSide {
        match previous {
            Some(OrderSide::Buy) => OrderSide::Sell,
            _ => OrderSide::Buy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A conditional (stop-limit) order to submit. Built fresh for every
/// placement attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub pair: String,
    pub side: OrderSide,
    /// Price at which the resting order converts into a live limit order.
    pub trigger_price: f64,
    /// Price of the resulting limit order.
    pub limit_price: f64,
    /// Amount in base asset units.
    pub quantity: f64,
}

/// Result of a successful placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderHandle {
    pub order_id: String,
    pub side: OrderSide,
    pub trigger_price: f64,
    pub limit_price: f64,
}

/// An order the exchange reports as still open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub id: String,
    pub side: OrderSide,
    pub pair: String,
}

/// The single order the engine tracks.
///
/// Fields are private so every mutation goes through a transition that keeps
/// `active`, `reference_price` and `order_id` consistent: either all three
/// describe a live order, or the order is absent and only `side` survives.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OrderState {
    active: bool,
    side: Option<OrderSide>,
    reference_price: Option<f64>,
    order_id: Option<String>,
}

impl OrderState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Side of the tracked order, or of the last order if none is active.
    pub fn side(&self) -> Option<OrderSide> {
        self.side
    }

    pub fn reference_price(&self) -> Option<f64> {
        self.reference_price
    }

    pub fn order_id(&self) -> Option<&str> {
        self.order_id.as_deref()
    }

    /// Side for the next placement from the Idle state.
    pub fn next_side(&self) -> OrderSide {
        OrderSide::next_after(self.side)
    }

    /// Record a freshly placed (or replaced) order.
    pub fn mark_placed(&mut self, side: OrderSide, reference_price: f64, order_id: impl Into<String>) {
        self.active = true;
        self.side = Some(side);
        self.reference_price = Some(reference_price);
        self.order_id = Some(order_id.into());
    }

    /// The tracked order disappeared from the open set. Side is kept so the
    /// next placement takes the opposite one.
    pub fn mark_filled(&mut self) {
        self.clear_order();
    }

    /// The tracked order was cancelled by us.
    pub fn mark_cancelled(&mut self) {
        self.clear_order();
    }

    /// Wipe everything except the recorded side.
    pub fn reset_preserving_side(&mut self) {
        let side = self.side;
        *self = Self::default();
        self.side = side;
    }

    fn clear_order(&mut self) {
        self.active = false;
        self.reference_price = None;
        self.order_id = None;
    }
}

/// Why the exchange refused an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RejectionReason {
    /// The trigger price is on the wrong side of the market for this order's
    /// side. The market moved between pricing and submission; retryable.
    TriggerPrice(String),
    Other(String),
}

impl RejectionReason {
    /// Classify an exchange rejection message for an order of `side`.
    pub fn classify(side: OrderSide, message: &str) -> Self {
        let lower = message.to_lowercase();
        let trigger_violation = match side {
            OrderSide::Buy => lower.contains("trigger price must be >"),
            OrderSide::Sell => lower.contains("trigger price must be <"),
        };
        if trigger_violation {
            RejectionReason::TriggerPrice(message.to_string())
        } else {
            RejectionReason::Other(message.to_string())
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, RejectionReason::TriggerPrice(_))
    }
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::TriggerPrice(m) => write!(f, "trigger price constraint: {m}"),
            RejectionReason::Other(m) => write!(f, "{m}"),
        }
    }
}

/// Where the order lifecycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    #[default]
    Idle,
    Placing,
    Active,
    Cancelling,
    Replacing,
    Recovering,
    /// Loop exited cleanly (stop request or iteration budget).
    Stopped,
    /// Recovery did not converge; the loop will not resume on its own.
    Halted,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Placing => "placing",
            LifecycleState::Active => "active",
            LifecycleState::Cancelling => "cancelling",
            LifecycleState::Replacing => "replacing",
            LifecycleState::Recovering => "recovering",
            LifecycleState::Stopped => "stopped",
            LifecycleState::Halted => "halted",
        };
        f.write_str(s)
    }
}

/// Commands sent to the engine via the command channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    Stop,
}

/// Whether orders go to the real exchange or the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Live,
    Paper,
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::Live => write!(f, "live"),
            TradingMode::Paper => write!(f, "paper"),
        }
    }
}
