//! Signature verification for inbound payment confirmations.
//!
//! Two independent channels, two distinct secrets:
//!
//! * client checkout confirmations sign `orderId|paymentId`;
//! * gateway webhooks sign the raw request body.
//!
//! Both checks are pure functions of their inputs.  `Mac::verify_slice`
//! performs the comparison in constant time.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verify a client-side checkout confirmation signature:
/// hex-encoded `HMAC_SHA256(secret, order_id + "|" + payment_id)`.
pub fn verify_checkout(secret: &str, order_id: &str, payment_id: &str, supplied: &str) -> bool {
    let Ok(sig) = hex::decode(supplied) else {
        return false;
    };
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(order_id.as_bytes());
    mac.update(b"|");
    mac.update(payment_id.as_bytes());
    mac.verify_slice(&sig).is_ok()
}

/// Verify a gateway webhook signature: hex-encoded
/// `HMAC_SHA256(webhook_secret, raw_body)`.
pub fn verify_webhook(webhook_secret: &str, body: &[u8], supplied: &str) -> bool {
    let Ok(sig) = hex::decode(supplied) else {
        return false;
    };
    let mut mac = match HmacSha256::new_from_slice(webhook_secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(body);
    mac.verify_slice(&sig).is_ok()
}

/// Compute the checkout signature for a given order/payment pair.
/// Used by the (out-of-scope) gateway wrapper and by tests.
pub fn checkout_signature(secret: &str, order_id: &str, payment_id: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(order_id.as_bytes());
    mac.update(b"|");
    mac.update(payment_id.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Compute the webhook signature over a raw payload.
/// Used by the gateway simulator in tests.
pub fn webhook_signature(webhook_secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(webhook_secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}
