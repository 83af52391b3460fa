use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};
use url::Url;

use common::{
    Credentials, Error, OpenOrder, OrderBackend, OrderHandle, OrderRequest, OrderSide,
    RejectionReason, RestSettings, Result,
};

use super::auth;
use crate::pricing::format_price;

/// Seconds a conditional order waits for its trigger before the exchange
/// drops it.
const ORDER_EXPIRATION_SECS: u64 = 7 * 24 * 60 * 60;

/// REST client for Gate.io spot price-triggered orders.
pub struct GateClient {
    base_url: String,
    /// Path prefix of `base_url` (e.g. `/api/v4`); part of the signed path.
    base_path: String,
    credentials: Credentials,
    precision: u32,
    http: Client,
}

impl GateClient {
    /// Every request is bounded by `rest.timeout`; a stalled connection
    /// surfaces as `Error::Http` instead of blocking the caller.
    pub fn new(rest: &RestSettings, credentials: Credentials, precision: u32) -> Result<Self> {
        let base_url = rest.base_url.as_str();
        let parsed = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("invalid REST base url '{base_url}': {e}")))?;
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(rest.timeout())
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            base_path: parsed.path().trim_end_matches('/').to_string(),
            credentials,
            precision,
            http,
        })
    }

    async fn signed_request(
        &self,
        method: Method,
        endpoint: &str,
        query: &str,
        body: &str,
    ) -> Result<(StatusCode, String)> {
        let ts = Utc::now().timestamp();
        let path = format!("{}{}", self.base_path, endpoint);
        let payload = auth::request_payload(method.as_str(), &path, query, body, ts);
        let signature = auth::sign(&self.credentials.api_secret, &payload);

        let mut url = format!("{}{}", self.base_url, endpoint);
        if !query.is_empty() {
            url.push('?');
            url.push_str(query);
        }

        let mut req = self
            .http
            .request(method, &url)
            .header("KEY", &self.credentials.api_key)
            .header("Timestamp", ts.to_string())
            .header("SIGN", signature)
            .header("Accept", "application/json");
        if !body.is_empty() {
            req = req
                .header("Content-Type", "application/json")
                .body(body.to_string());
        }

        let resp = req.send().await.map_err(|e| Error::Http(e.to_string()))?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        Ok((status, text))
    }

    /// Latest traded price from the public ticker endpoint.
    pub async fn ticker_price(&self, pair: &str) -> Result<f64> {
        let url = format!("{}/spot/tickers?currency_pair={pair}", self.base_url);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::Exchange(format!("HTTP {status}: {body}")));
        }
        parse_ticker(&body)
    }
}

#[async_trait]
impl OrderBackend for GateClient {
    async fn open_orders(&self, pair: &str) -> Result<Vec<OpenOrder>> {
        let query = format!("market={pair}&status=open");
        let (status, body) = self
            .signed_request(Method::GET, "/spot/price_orders", &query, "")
            .await?;
        if !status.is_success() {
            return Err(Error::Exchange(format!("HTTP {status}: {body}")));
        }
        parse_open_orders(&body)
    }

    async fn place_conditional_order(&self, request: &OrderRequest) -> Result<OrderHandle> {
        let body = order_body(request, self.precision).to_string();
        debug!(pair = %request.pair, side = %request.side, body = %body, "Submitting conditional order");

        let (status, text) = self
            .signed_request(Method::POST, "/spot/price_orders", "", &body)
            .await?;
        if !status.is_success() {
            let message = api_error_message(&text);
            return Err(Error::OrderRejected {
                reason: RejectionReason::classify(request.side, &message),
            });
        }

        let created: CreatedOrder = serde_json::from_str(&text)?;
        Ok(OrderHandle {
            order_id: created.id.into_string(),
            side: request.side,
            trigger_price: request.trigger_price,
            limit_price: request.limit_price,
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<bool> {
        let endpoint = format!("/spot/price_orders/{order_id}");
        let (status, body) = self
            .signed_request(Method::DELETE, &endpoint, "", "")
            .await?;

        if status.is_success() {
            return Ok(true);
        }
        if status == StatusCode::NOT_FOUND || api_error_label(&body).as_deref() == Some("ORDER_NOT_FOUND") {
            warn!(order_id, "Order not found on cancel, treating as already cancelled");
            return Ok(true);
        }
        Err(Error::Exchange(format!("HTTP {status}: {body}")))
    }

    async fn cancel_all_orders(&self, pair: &str) -> Result<Vec<String>> {
        let query = format!("market={pair}&account=normal");
        let (status, body) = self
            .signed_request(Method::DELETE, "/spot/price_orders", &query, "")
            .await?;
        if !status.is_success() {
            return Err(Error::Exchange(format!("HTTP {status}: {body}")));
        }
        let ids: Vec<String> = parse_open_orders(&body)?.into_iter().map(|o| o.id).collect();
        info!(pair, cancelled = ids.len(), "Bulk cancel completed");
        Ok(ids)
    }
}

fn order_body(request: &OrderRequest, precision: u32) -> serde_json::Value {
    let rule = match request.side {
        OrderSide::Buy => ">=",
        OrderSide::Sell => "<=",
    };
    json!({
        "market": request.pair,
        "trigger": {
            "price": format_price(request.trigger_price, precision),
            "rule": rule,
            "expiration": ORDER_EXPIRATION_SECS,
        },
        "put": {
            "type": "limit",
            "side": request.side.as_str(),
            "price": format_price(request.limit_price, precision),
            "amount": request.quantity.to_string(),
            "account": "normal",
            "time_in_force": "gtc",
        },
    })
}

fn parse_open_orders(body: &str) -> Result<Vec<OpenOrder>> {
    let orders: Vec<PriceOrder> = serde_json::from_str(body)?;
    Ok(orders
        .into_iter()
        .map(|o| OpenOrder {
            id: o.id.into_string(),
            side: o.put.side,
            pair: o.market,
        })
        .collect())
}

fn parse_ticker(body: &str) -> Result<f64> {
    let tickers: Vec<Ticker> = serde_json::from_str(body)?;
    let last = tickers
        .first()
        .ok_or_else(|| Error::Exchange("empty ticker response".into()))?;
    last.last
        .parse::<f64>()
        .map_err(|e| Error::Exchange(format!("bad ticker price '{}': {e}", last.last)))
}

fn api_error_message(body: &str) -> String {
    match serde_json::from_str::<ApiError>(body) {
        Ok(err) => format!("{}: {}", err.label, err.message),
        Err(_) => body.to_string(),
    }
}

fn api_error_label(body: &str) -> Option<String> {
    serde_json::from_str::<ApiError>(body).ok().map(|e| e.label)
}

// ─── Response types ───────────────────────────────────────────────────────────

/// Order ids come back as numbers from some endpoints and strings from others.
#[derive(Deserialize)]
#[serde(untagged)]
enum OrderId {
    Num(i64),
    Str(String),
}

impl OrderId {
    fn into_string(self) -> String {
        match self {
            OrderId::Num(n) => n.to_string(),
            OrderId::Str(s) => s,
        }
    }
}

#[derive(Deserialize)]
struct CreatedOrder {
    id: OrderId,
}

#[derive(Deserialize)]
struct PriceOrder {
    id: OrderId,
    market: String,
    put: PutDetail,
}

#[derive(Deserialize)]
struct PutDetail {
    side: OrderSide,
}

#[derive(Deserialize)]
struct Ticker {
    last: String,
}

#[derive(Deserialize)]
struct ApiError {
    label: String,
    #[serde(default)]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(side: OrderSide) -> OrderRequest {
        OrderRequest {
            pair: "BTC_USDT".into(),
            side,
            trigger_price: 101.0,
            limit_price: 101.5,
            quantity: 0.001,
        }
    }

    #[test]
    fn buy_body_triggers_at_or_above() {
        let body = order_body(&request(OrderSide::Buy), 2);
        assert_eq!(body["market"], "BTC_USDT");
        assert_eq!(body["trigger"]["rule"], ">=");
        assert_eq!(body["trigger"]["price"], "101.00");
        assert_eq!(body["put"]["price"], "101.50");
        assert_eq!(body["put"]["side"], "buy");
        assert_eq!(body["put"]["amount"], "0.001");
        assert_eq!(body["put"]["type"], "limit");
    }

    #[test]
    fn sell_body_triggers_at_or_below() {
        let body = order_body(&request(OrderSide::Sell), 1);
        assert_eq!(body["trigger"]["rule"], "<=");
        assert_eq!(body["put"]["side"], "sell");
        assert_eq!(body["trigger"]["price"], "101.0");
    }

    #[test]
    fn parses_open_orders_with_numeric_ids() {
        let body = r#"[
            {"id": 1432329, "market": "BTC_USDT", "status": "open",
             "trigger": {"price": "101", "rule": ">=", "expiration": 86400},
             "put": {"type": "limit", "side": "buy", "price": "101.5", "amount": "0.001"}}
        ]"#;
        let orders = parse_open_orders(body).unwrap();
        assert_eq!(
            orders,
            vec![OpenOrder {
                id: "1432329".into(),
                side: OrderSide::Buy,
                pair: "BTC_USDT".into(),
            }]
        );
    }

    #[test]
    fn parses_ticker_last_price() {
        let body = r#"[{"currency_pair": "BTC_USDT", "last": "19106.55", "lowest_ask": "19108"}]"#;
        assert_eq!(parse_ticker(body).unwrap(), 19106.55);
        assert!(parse_ticker("[]").is_err());
    }

    #[test]
    fn rejection_message_keeps_label_and_text() {
        let body = r#"{"label": "INVALID_PARAM_VALUE", "message": "trigger price must be > current price"}"#;
        let message = api_error_message(body);
        assert!(RejectionReason::classify(OrderSide::Buy, &message).is_retryable());
        assert_eq!(api_error_message("bad gateway"), "bad gateway");
    }

    fn rest(base_url: &str, timeout_ms: u64) -> RestSettings {
        RestSettings {
            base_url: base_url.to_string(),
            timeout_ms,
        }
    }

    #[test]
    fn signed_path_includes_base_prefix() {
        let settings = rest("https://api.gateio.ws/api/v4/", 10_000);
        let client = GateClient::new(&settings, Credentials::default(), 2).unwrap();
        assert_eq!(client.base_path, "/api/v4");
        assert_eq!(client.base_url, "https://api.gateio.ws/api/v4");
    }

    #[tokio::test]
    async fn unresponsive_server_times_out_as_http_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept connections and never answer.
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let settings = rest(&format!("http://{addr}/api/v4"), 200);
        let client = GateClient::new(&settings, Credentials::default(), 2).unwrap();

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            client.open_orders("BTC_USDT"),
        )
        .await
        .expect("request outlived its timeout");
        assert!(matches!(result, Err(Error::Http(_))), "{result:?}");
    }
}
