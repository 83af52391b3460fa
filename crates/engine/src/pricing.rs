use tracing::{debug, warn};

use common::{OrderSide, SideAdjust, TradingConfig};

/// Trigger and limit prices for one placement attempt, already rounded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub trigger: f64,
    pub limit: f64,
}

/// Derives trigger/limit prices from the current price.
///
/// Buys sit above the market (`price * (1 + pct/100)`), sells below it
/// (`price * (1 - pct/100)`). Both values are rounded to `precision` decimals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricingPolicy {
    pub buy: SideAdjust,
    pub sell: SideAdjust,
    pub precision: u32,
}

impl PricingPolicy {
    pub fn from_config(cfg: &TradingConfig) -> Self {
        Self {
            buy: cfg.buy,
            sell: cfg.sell,
            precision: cfg.price_precision,
        }
    }

    pub fn quote(&self, side: OrderSide, price: f64) -> Quote {
        let (adjust, sign) = match side {
            OrderSide::Buy => (self.buy, 1.0),
            OrderSide::Sell => (self.sell, -1.0),
        };
        let trigger = price * (1.0 + sign * adjust.trigger_adjust_pct / 100.0);
        let limit = price * (1.0 + sign * adjust.limit_adjust_pct / 100.0);
        Quote {
            trigger: self.round(trigger),
            limit: self.round(limit),
        }
    }

    /// Round to the configured precision, warning when digits are dropped.
    pub fn round(&self, value: f64) -> f64 {
        let rounded = round_to(value, self.precision);
        if exceeds_precision(value, rounded, self.precision) {
            warn!(
                value,
                rounded,
                precision = self.precision,
                "Price exceeds configured precision, truncating"
            );
        }
        debug!(value, rounded, "Formatted price");
        rounded
    }

    /// Decimal string for submission.
    pub fn format(&self, value: f64) -> String {
        format_price(value, self.precision)
    }
}

pub fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}

pub fn format_price(value: f64, precision: u32) -> String {
    format!("{:.*}", precision as usize, value)
}

/// Digits beyond `precision` count as truncation; float noise from the
/// multiplication (e.g. 101.00000000000001) does not.
fn exceeds_precision(value: f64, rounded: f64, precision: u32) -> bool {
    let digit_tolerance = 10f64.powi(-(precision as i32 + 6));
    let noise = value.abs() * 4.0 * f64::EPSILON;
    (value - rounded).abs() > digit_tolerance.max(noise)
}
