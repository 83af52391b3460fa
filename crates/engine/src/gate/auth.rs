use hmac::{Hmac, Mac};
use sha2::{Digest, Sha512};

type HmacSha512 = Hmac<Sha512>;

/// Hex HMAC-SHA512 of `payload` keyed by `secret`.
pub fn sign(secret: &str, payload: &str) -> String {
    let mut mac =
        HmacSha512::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Hex SHA512 of a request body (empty string for bodiless requests).
pub fn body_hash(body: &str) -> String {
    hex::encode(Sha512::digest(body.as_bytes()))
}

/// Payload signed for a websocket channel subscription.
pub fn subscription_payload(channel: &str, event: &str, time: i64) -> String {
    format!("channel={channel}&event={event}&time={time}")
}

/// Payload signed for a REST request:
/// `METHOD\nPATH\nQUERY\nhex(SHA512(body))\nTIMESTAMP`.
pub fn request_payload(method: &str, path: &str, query: &str, body: &str, timestamp: i64) -> String {
    format!(
        "{}\n{}\n{}\n{}\n{}",
        method.to_uppercase(),
        path,
        query,
        body_hash(body),
        timestamp
    )
}
