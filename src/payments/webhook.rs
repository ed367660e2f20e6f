use std::collections::HashMap;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use super::StripeError;

type HmacSha256 = Hmac<Sha256>;

/// The outer Stripe event object.
#[derive(Deserialize, Debug, Clone)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
    #[serde(default)]
    pub livemode: bool,
    pub created: Option<i64>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct StripeEventData {
    /// Shape depends on `event_type`.
    pub object: serde_json::Value,
}

/// `data.object` for `payment_intent.*` events.
#[derive(Deserialize, Debug, Clone)]
pub struct PaymentIntentObject {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub receipt_email: Option<String>,
    pub last_payment_error: Option<serde_json::Value>,
}

impl StripeEvent {
    pub fn payment_intent(&self) -> Result<PaymentIntentObject, StripeError> {
        Ok(serde_json::from_value(self.data.object.clone())?)
    }
}

impl PaymentIntentObject {
    pub fn order_id(&self) -> Option<&str> { self.metadata.get("orderId").map(String::as_str) }

    pub fn failure_message(&self) -> Option<&str> {
        self.last_payment_error.as_ref()?.get("message")?.as_str()
    }
}

/// Checks a `Stripe-Signature` header (`t=<unix>,v1=<hex>[,v1=...]`) against
/// the raw body. `now` is the current unix time; events signed more than
/// `tolerance_secs` away from it are rejected.
pub fn verify_signature(payload: &[u8], header: Option<&str>, secret: &str, tolerance_secs: i64, now: i64) -> Result<(), StripeError> {
    let header = header.ok_or_else(|| StripeError::Signature("Missing Stripe-Signature header".into()))?;

    let mut timestamp: Option<&str> = None;
    let mut signatures: Vec<&str> = Vec::new();
    for item in header.split(',') {
        match item.trim().split_once('=') {
            Some(("t", v)) => timestamp = Some(v),
            Some(("v1", v)) => signatures.push(v),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| StripeError::Signature("Missing timestamp in Stripe-Signature".into()))?;
    let signed_at: i64 = timestamp.parse().map_err(|_| StripeError::Signature("Invalid timestamp in Stripe-Signature".into()))?;
    if signatures.is_empty() {
        return Err(StripeError::Signature("Missing v1 signature in Stripe-Signature".into()));
    }
    if now.abs_diff(signed_at) > tolerance_secs.max(0).unsigned_abs() {
        return Err(StripeError::Signature("Timestamp outside the tolerance zone".into()));
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| StripeError::Signature("Invalid webhook secret".into()))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);

    let matched = signatures
        .iter()
        .filter_map(|s| hex::decode(s).ok())
        .any(|sig| mac.clone().verify_slice(&sig).is_ok());
    if matched { Ok(()) } else { Err(StripeError::Signature("No signatures found matching the expected signature".into())) }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test123secret456";
    const NOW: i64 = 1_700_000_000;

    fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}.{}", timestamp, String::from_utf8_lossy(payload)).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn test_valid_signature() {
        let payload = br#"{"type":"payment_intent.succeeded"}"#;
        let header = format!("t={},v1={}", NOW, sign(payload, SECRET, NOW));
        assert!(verify_signature(payload, Some(&header), SECRET, 300, NOW + 10).is_ok());
    }

    #[test]
    fn test_any_v1_may_match() {
        let payload = b"{}";
        let header = format!("t={},v1={},v1={}", NOW, sign(payload, "old_secret", NOW), sign(payload, SECRET, NOW));
        assert!(verify_signature(payload, Some(&header), SECRET, 300, NOW).is_ok());
    }

    #[test]
    fn test_modified_payload_rejected() {
        let header = format!("t={},v1={}", NOW, sign(b"{\"a\":1}", SECRET, NOW));
        assert!(matches!(verify_signature(b"{\"a\":2}", Some(&header), SECRET, 300, NOW), Err(StripeError::Signature(_))));
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let payload = b"{}";
        let header = format!("t={},v1={}", NOW - 600, sign(payload, SECRET, NOW - 600));
        assert!(verify_signature(payload, Some(&header), SECRET, 300, NOW).is_err());
    }

    #[test]
    fn test_malformed_headers() {
        assert!(verify_signature(b"{}", None, SECRET, 300, NOW).is_err());
        assert!(verify_signature(b"{}", Some("v1=abcd"), SECRET, 300, NOW).is_err());
        assert!(verify_signature(b"{}", Some(&format!("t={NOW}")), SECRET, 300, NOW).is_err());
        assert!(verify_signature(b"{}", Some(&format!("t={NOW},v1=zz-not-hex")), SECRET, 300, NOW).is_err());
    }

    #[test]
    fn test_extreme_timestamps_rejected() {
        for t in [i64::MIN, i64::MAX] {
            let header = format!("t={t},v1=00");
            assert!(matches!(verify_signature(b"{}", Some(&header), SECRET, 300, NOW), Err(StripeError::Signature(_))));
        }
        let header = format!("t={NOW},v1={}", sign(b"{}", SECRET, NOW));
        assert!(verify_signature(b"{}", Some(&header), SECRET, i64::MIN, i64::MIN).is_err());
    }

    #[test]
    fn test_payment_intent_object() {
        let event: StripeEvent = serde_json::from_value(serde_json::json!({
            "id": "evt_1",
            "type": "payment_intent.payment_failed",
            "data": { "object": {
                "id": "pi_1", "amount": 500, "currency": "usd",
                "metadata": { "orderId": "0190f7c4-0000-7000-8000-000000000000" },
                "last_payment_error": { "message": "Card declined" }
            } }
        })).unwrap();
        let pi = event.payment_intent().unwrap();
        assert_eq!(pi.order_id(), Some("0190f7c4-0000-7000-8000-000000000000"));
        assert_eq!(pi.failure_message(), Some("Card declined"));
    }
}
