use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use common::{Credentials, Error, Result, TradingConfig};

use super::auth;
use crate::feed::PriceFeed;
use crate::retry::RetryPolicy;

const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Gate.io spot ticker WebSocket subscription for a single pair.
///
/// Sends an authenticated subscribe on connect, pushes every "last traded
/// price" into the `PriceFeed`, and reconnects forever with exponential
/// backoff (reset after each successful connection).
pub struct GateTickerStream {
    url: String,
    channel: String,
    /// Pair with separators stripped, e.g. `BTCUSDT`.
    symbol: String,
    credentials: Credentials,
    backoff: RetryPolicy,
}

impl GateTickerStream {
    pub fn new(cfg: &TradingConfig, credentials: Credentials) -> Self {
        let backoff = RetryPolicy::new(u32::MAX, Duration::from_millis(cfg.feed.reconnect_base_ms))
            .with_max_delay(Duration::from_millis(cfg.feed.reconnect_max_ms));
        Self {
            url: cfg.feed.url.clone(),
            channel: cfg.feed.channel.clone(),
            symbol: cfg.stream_symbol(),
            credentials,
            backoff,
        }
    }

    /// Run the stream loop forever, reconnecting on failure.
    /// Spawned by `PriceFeed::start`.
    pub async fn run(self, feed: PriceFeed) {
        let mut failures: u32 = 0;

        loop {
            info!(symbol = %self.symbol, url = %self.url, "Connecting to ticker stream");
            let mut connected = false;
            let result = self.connect_once(&feed, &mut connected).await;

            let delay = self.next_delay(&mut failures, connected);
            match result {
                Ok(()) => {
                    info!(symbol = %self.symbol, delay = ?delay, "Ticker stream closed, reconnecting");
                }
                Err(e) => {
                    warn!(symbol = %self.symbol, error = %e, delay = ?delay, "Ticker stream error, reconnecting");
                }
            }
            tokio::time::sleep(delay).await;
        }
    }

    /// Delay before the next reconnect. A session that got as far as
    /// connecting resets the count, so its retry waits only the base delay.
    fn next_delay(&self, failures: &mut u32, connected: bool) -> Duration {
        if connected {
            *failures = 0;
        }
        let delay = self.backoff.delay_for(*failures);
        *failures = failures.saturating_add(1);
        delay
    }

    async fn connect_once(&self, feed: &PriceFeed, connected: &mut bool) -> Result<()> {
        let url = Url::parse(&self.url).map_err(|e| Error::WebSocket(e.to_string()))?;
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))?;
        *connected = true;
        info!(symbol = %self.symbol, "Ticker stream connected");

        let (mut write, mut read) = ws_stream.split();

        let subscribe = self.subscribe_message(Utc::now().timestamp());
        write
            .send(Message::Text(serde_json::to_string(&subscribe)?))
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))?;

        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.tick().await; // first tick is immediate

        loop {
            tokio::select! {
                _ = ping.tick() => {
                    write
                        .send(Message::Ping(Vec::new()))
                        .await
                        .map_err(|e| Error::WebSocket(e.to_string()))?;
                }
                msg = read.next() => {
                    let Some(msg) = msg else { return Ok(()) };
                    match msg.map_err(|e| Error::WebSocket(e.to_string()))? {
                        Message::Text(text) => match parse_ticker_update(&self.channel, &text) {
                            Some(price) => feed.on_update(price),
                            None => debug!(message = %text, "Ignoring non-ticker message"),
                        },
                        Message::Close(frame) => {
                            info!(frame = ?frame, "Ticker stream received close frame");
                            return Ok(());
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    fn subscribe_message(&self, time: i64) -> SubscribeMessage {
        let auth = (!self.credentials.is_empty()).then(|| {
            let payload = auth::subscription_payload(&self.channel, "subscribe", time);
            SubscribeAuth {
                method: "api_key".to_string(),
                key: self.credentials.api_key.clone(),
                sign: auth::sign(&self.credentials.api_secret, &payload),
            }
        });
        SubscribeMessage {
            time,
            channel: self.channel.clone(),
            event: "subscribe".to_string(),
            payload: vec![self.symbol.clone()],
            auth,
        }
    }
}

// ─── Wire types ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct SubscribeMessage {
    time: i64,
    channel: String,
    event: String,
    payload: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    auth: Option<SubscribeAuth>,
}

#[derive(Debug, Serialize)]
struct SubscribeAuth {
    method: String,
    #[serde(rename = "KEY")]
    key: String,
    #[serde(rename = "SIGN")]
    sign: String,
}

#[derive(Deserialize)]
struct TickerEnvelope {
    #[serde(default)]
    channel: String,
    #[serde(default)]
    event: String,
    #[serde(default)]
    result: Option<serde_json::Value>,
}

/// Extract the last traded price from a ticker update on `channel`.
/// Anything else (acks, other channels, malformed JSON, bad numbers) is `None`.
fn parse_ticker_update(channel: &str, text: &str) -> Option<f64> {
    let envelope: TickerEnvelope = match serde_json::from_str(text) {
        Ok(env) => env,
        Err(e) => {
            debug!(error = %e, "Unparseable stream message");
            return None;
        }
    };
    if envelope.channel != channel || envelope.event != "update" {
        return None;
    }
    let last = envelope.result?.get("last").cloned()?;
    let price = match &last {
        serde_json::Value::String(s) => s.parse::<f64>().ok(),
        serde_json::Value::Number(n) => n.as_f64(),
        _ => None,
    };
    if price.is_none() {
        debug!(last = %last, "Dropping unparseable last price");
    }
    price
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TradingConfig {
        TradingConfig::from_toml(
            r#"
            pair = "BTC_USDT"
            quantity = 0.001
            [buy]
            trigger_adjust_pct = 1.0
            limit_adjust_pct = 1.5
            [sell]
            trigger_adjust_pct = 2.0
            limit_adjust_pct = 2.5
            "#,
        )
        .unwrap()
    }

    #[test]
    fn parses_last_price_from_update() {
        let text = r#"{"time":1606292218,"channel":"spot.tickers","event":"update",
            "result":{"currency_pair":"BTC_USDT","last":"19106.55","lowest_ask":"19108"}}"#;
        assert_eq!(parse_ticker_update("spot.tickers", text), Some(19106.55));
    }

    #[test]
    fn ignores_irrelevant_and_malformed_messages() {
        let ack = r#"{"time":1,"channel":"spot.tickers","event":"subscribe","result":{"status":"success"}}"#;
        let other = r#"{"time":1,"channel":"spot.trades","event":"update","result":{"last":"1"}}"#;
        let bad_num = r#"{"time":1,"channel":"spot.tickers","event":"update","result":{"last":"abc"}}"#;
        let no_last = r#"{"time":1,"channel":"spot.tickers","event":"update","result":{}}"#;
        for text in [ack, other, bad_num, no_last, "not json", "[]"] {
            assert_eq!(parse_ticker_update("spot.tickers", text), None, "{text}");
        }
    }

    #[test]
    fn subscribe_message_is_signed() {
        let creds = Credentials {
            api_key: "key".into(),
            api_secret: "secret".into(),
        };
        let stream = GateTickerStream::new(&config(), creds);
        let msg = serde_json::to_value(stream.subscribe_message(1_700_000_000)).unwrap();

        assert_eq!(msg["time"], 1_700_000_000);
        assert_eq!(msg["channel"], "spot.tickers");
        assert_eq!(msg["event"], "subscribe");
        assert_eq!(msg["payload"], serde_json::json!(["BTCUSDT"]));
        assert_eq!(msg["auth"]["method"], "api_key");
        assert_eq!(msg["auth"]["KEY"], "key");
        assert_eq!(
            msg["auth"]["SIGN"],
            auth::sign("secret", "channel=spot.tickers&event=subscribe&time=1700000000")
        );
    }

    #[test]
    fn subscribe_without_credentials_omits_auth() {
        let stream = GateTickerStream::new(&config(), Credentials::default());
        let msg = serde_json::to_value(stream.subscribe_message(1)).unwrap();
        assert!(msg.get("auth").is_none());
    }

    #[test]
    fn reconnect_delay_resets_after_successful_connection() {
        let stream = GateTickerStream::new(&config(), Credentials::default());
        let base = Duration::from_secs(1);
        let mut failures = 0;

        let delays: Vec<Duration> = [false, false, true, false]
            .into_iter()
            .map(|connected| stream.next_delay(&mut failures, connected))
            .collect();

        assert_eq!(delays, vec![base, base * 2, base, base * 2]);
    }

    #[test]
    fn reconnect_backoff_is_capped() {
        let stream = GateTickerStream::new(&config(), Credentials::default());
        assert_eq!(stream.backoff.delay_for(0), Duration::from_secs(1));
        assert_eq!(stream.backoff.delay_for(3), Duration::from_secs(8));
        assert_eq!(stream.backoff.delay_for(10), Duration::from_secs(30));
    }
}
