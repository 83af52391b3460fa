use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result, TradingMode};

/// Everything the process needs at startup: mode and credentials from the
/// environment, trading parameters from a TOML file.
#[derive(Debug, Clone)]
pub struct Config {
    pub trading_mode: TradingMode,
    pub credentials: Credentials,
    pub trading: TradingConfig,
}

/// Exchange API credentials. Opaque to the engine beyond request signing.
#[derive(Clone, Default)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl Credentials {
    pub fn is_empty(&self) -> bool {
        self.api_key.is_empty() || self.api_secret.is_empty()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// Trading parameters file (TOML).
///
/// Example `config/trailbot.toml`:
/// ```toml
/// pair = "BTC_USDT"
/// quantity = 0.0001
/// price_precision = 2
///
/// [buy]
/// trigger_adjust_pct = 1.0
/// limit_adjust_pct = 1.5
///
/// [sell]
/// trigger_adjust_pct = 2.0
/// limit_adjust_pct = 2.5
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TradingConfig {
    /// Currency pair in exchange form, e.g. "BTC_USDT".
    pub pair: String,
    /// Order amount in base asset units.
    pub quantity: f64,
    /// Decimal places prices are rounded to before submission.
    #[serde(default = "default_precision")]
    pub price_precision: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long a price read waits for the first tick.
    #[serde(default = "default_price_timeout_ms")]
    pub price_timeout_ms: u64,
    /// Stop the loop after this many iterations. Unlimited when absent.
    #[serde(default)]
    pub max_iterations: Option<u64>,
    pub buy: SideAdjust,
    pub sell: SideAdjust,
    #[serde(default = "RetrySettings::placement")]
    pub retry: RetrySettings,
    #[serde(default = "RetrySettings::recovery")]
    pub recovery: RetrySettings,
    #[serde(default)]
    pub feed: FeedSettings,
    #[serde(default)]
    pub rest: RestSettings,
}

/// Percent offsets from the current price for one side.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct SideAdjust {
    pub trigger_adjust_pct: f64,
    pub limit_adjust_pct: f64,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl RetrySettings {
    fn placement() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 100,
        }
    }

    fn recovery() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
        }
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedSettings {
    #[serde(default = "default_feed_url")]
    pub url: String,
    #[serde(default = "default_feed_channel")]
    pub channel: String,
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            url: default_feed_url(),
            channel: default_feed_channel(),
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RestSettings {
    #[serde(default = "default_rest_url")]
    pub base_url: String,
    /// Upper bound on one REST call, connect to last byte.
    #[serde(default = "default_rest_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RestSettings {
    fn default() -> Self {
        Self {
            base_url: default_rest_url(),
            timeout_ms: default_rest_timeout_ms(),
        }
    }
}

impl RestSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_precision() -> u32 {
    2
}
fn default_poll_interval_ms() -> u64 {
    100
}
fn default_price_timeout_ms() -> u64 {
    5_000
}
fn default_feed_url() -> String {
    "wss://api.gateio.ws/ws/v4/".to_string()
}
fn default_feed_channel() -> String {
    "spot.tickers".to_string()
}
fn default_reconnect_base_ms() -> u64 {
    1_000
}
fn default_reconnect_max_ms() -> u64 {
    30_000
}
fn default_rest_url() -> String {
    "https://api.gateio.ws/api/v4".to_string()
}
fn default_rest_timeout_ms() -> u64 {
    10_000
}

const MAX_PRECISION: u32 = 12;

impl TradingConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let cfg: TradingConfig = toml::from_str(content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read trading config at '{path}': {e}"))
        })?;
        Self::from_toml(&content)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn price_timeout(&self) -> Duration {
        Duration::from_millis(self.price_timeout_ms)
    }

    /// Pair without separators, as the ticker subscription expects it.
    pub fn stream_symbol(&self) -> String {
        self.pair.replace(['_', '/', '-'], "")
    }

    pub fn validate(&self) -> Result<()> {
        validate_pair(&self.pair)?;

        if !(self.quantity.is_finite() && self.quantity > 0.0) {
            return Err(Error::Config(format!(
                "quantity must be a positive number, got {}",
                self.quantity
            )));
        }
        if self.price_precision > MAX_PRECISION {
            return Err(Error::Config(format!(
                "price_precision must be at most {MAX_PRECISION}, got {}",
                self.price_precision
            )));
        }
        for (name, adjust) in [("buy", self.buy), ("sell", self.sell)] {
            for (field, pct) in [
                ("trigger_adjust_pct", adjust.trigger_adjust_pct),
                ("limit_adjust_pct", adjust.limit_adjust_pct),
            ] {
                if !(pct.is_finite() && (0.0..100.0).contains(&pct)) {
                    return Err(Error::Config(format!(
                        "{name}.{field} must be within [0, 100), got {pct}"
                    )));
                }
            }
        }
        for (name, retry) in [("retry", self.retry), ("recovery", self.recovery)] {
            if retry.max_attempts == 0 {
                return Err(Error::Config(format!("{name}.max_attempts must be at least 1")));
            }
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be positive".into()));
        }
        if self.rest.timeout_ms == 0 {
            return Err(Error::Config("rest.timeout_ms must be positive".into()));
        }
        if self.feed.reconnect_base_ms == 0 || self.feed.reconnect_max_ms < self.feed.reconnect_base_ms {
            return Err(Error::Config(
                "feed reconnect delays must satisfy 0 < base <= max".into(),
            ));
        }
        Ok(())
    }
}

/// Pairs look like `BASE_QUOTE` with ASCII alphanumeric halves.
fn validate_pair(pair: &str) -> Result<()> {
    let mut parts = pair.split('_');
    let well_formed = match (parts.next(), parts.next(), parts.next()) {
        (Some(base), Some(quote), None) => [base, quote]
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_alphanumeric())),
        _ => false,
    };
    if well_formed {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "pair must look like BASE_QUOTE (e.g. BTC_USDT), got '{pair}'"
        )))
    }
}

const API_KEY_LEN: usize = 32;
const API_SECRET_LEN: usize = 64;

impl Config {
    /// Load configuration from the environment and the trading config file.
    /// Loads `.env` if present.
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let trading_mode = match optional_env("TRADING_MODE")
            .unwrap_or_else(|| "paper".to_string())
            .to_lowercase()
            .as_str()
        {
            "paper" => TradingMode::Paper,
            "live" => TradingMode::Live,
            other => {
                return Err(Error::Config(format!(
                    "TRADING_MODE must be 'paper' or 'live', got '{other}'"
                )))
            }
        };

        let credentials = Credentials {
            api_key: optional_env("GATE_API_KEY").unwrap_or_default(),
            api_secret: optional_env("GATE_API_SECRET").unwrap_or_default(),
        };

        let path = optional_env("TRAILBOT_CONFIG")
            .unwrap_or_else(|| "config/trailbot.toml".to_string());
        let trading = TradingConfig::load(&path)?;

        let cfg = Config {
            trading_mode,
            credentials,
            trading,
        };
        cfg.validate_credentials()?;
        Ok(cfg)
    }

    /// Live trading needs well-formed credentials; paper mode accepts none
    /// (the ticker channel is public) but rejects a half-configured pair.
    pub fn validate_credentials(&self) -> Result<()> {
        let creds = &self.credentials;
        if self.trading_mode == TradingMode::Paper
            && creds.api_key.is_empty()
            && creds.api_secret.is_empty()
        {
            return Ok(());
        }
        if creds.api_key.len() != API_KEY_LEN {
            return Err(Error::Config(format!(
                "GATE_API_KEY must be {API_KEY_LEN} characters, got {}",
                creds.api_key.len()
            )));
        }
        if creds.api_secret.len() != API_SECRET_LEN {
            return Err(Error::Config(format!(
                "GATE_API_SECRET must be {API_SECRET_LEN} characters, got {}",
                creds.api_secret.len()
            )));
        }
        Ok(())
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
