use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::config::RazorpaySettings;

const RAZORPAY_API_BASE: &str = "https://api.razorpay.com/v1";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum RazorpayError {
    #[error("Razorpay request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Razorpay returned HTTP {status}: {description}")]
    Api { status: u16, description: String },

    #[error("Failed to encode Razorpay request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("RazorpayX account number is not configured")]
    MissingAccountNumber,

    #[error("Invalid Razorpay id: {0:?}")]
    InvalidId(String),
}

/// Razorpay ids (`pay_...`, `order_...`) are ASCII letters, digits and `_`.
pub fn check_id(id: &str) -> Result<&str, RazorpayError> {
    let valid = !id.is_empty() && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_');
    if valid {
        Ok(id)
    } else {
        Err(RazorpayError::InvalidId(id.to_string()))
    }
}

fn resource_path(
    collection: &str,
    id: &str,
    action: Option<&str>,
) -> Result<String, RazorpayError> {
    let id = check_id(id)?;
    Ok(match action {
        Some(action) => format!("/{}/{}/{}", collection, id, action),
        None => format!("/{}/{}", collection, id),
    })
}

#[derive(Debug, Serialize)]
pub struct CreateOrder {
    pub amount: u64,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, Default)]
struct ErrorEnvelope {
    #[serde(default)]
    error: ErrorBody,
}

#[derive(Debug, Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    description: String,
}

/// Thin client over the Razorpay REST API, authenticated with the key pair.
#[derive(Debug, Clone)]
pub struct RazorpayClient {
    client: Client,
    key_id: String,
    key_secret: String,
    webhook_secret: Option<String>,
    account_number: Option<String>,
}

impl RazorpayClient {
    pub fn new(client: Client, settings: &RazorpaySettings) -> Self {
        Self {
            client,
            key_id: settings.key_id.clone(),
            key_secret: settings.key_secret.clone(),
            webhook_secret: settings.webhook_secret.clone(),
            account_number: settings.account_number.clone(),
        }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn webhook_secret(&self) -> Option<&str> {
        self.webhook_secret.as_deref()
    }

    pub fn verify_payment(&self, order_id: &str, payment_id: &str, signature: &str) -> bool {
        verify_payment_signature(order_id, payment_id, signature, &self.key_secret)
    }

    pub async fn create_order(
        &self,
        order: &CreateOrder,
    ) -> Result<serde_json::Value, RazorpayError> {
        self.send(Method::POST, "/orders", Some(serde_json::to_value(order)?))
            .await
    }

    pub async fn fetch_order(&self, order_id: &str) -> Result<serde_json::Value, RazorpayError> {
        let path = resource_path("orders", order_id, None)?;
        self.send(Method::GET, &path, None).await
    }

    pub async fn fetch_payment(
        &self,
        payment_id: &str,
    ) -> Result<serde_json::Value, RazorpayError> {
        let path = resource_path("payments", payment_id, None)?;
        self.send(Method::GET, &path, None).await
    }

    /// Full refund when `amount` is `None`.
    pub async fn refund(
        &self,
        payment_id: &str,
        amount: Option<u64>,
    ) -> Result<serde_json::Value, RazorpayError> {
        let path = resource_path("payments", payment_id, Some("refund"))?;
        let body = match amount {
            Some(amount) => serde_json::json!({ "amount": amount }),
            None => serde_json::json!({}),
        };
        self.send(Method::POST, &path, Some(body)).await
    }

    /// RazorpayX payout from the configured business account.
    pub async fn create_payout(
        &self,
        mut payout: serde_json::Value,
    ) -> Result<serde_json::Value, RazorpayError> {
        let account_number = self
            .account_number
            .as_ref()
            .ok_or(RazorpayError::MissingAccountNumber)?;
        if let Some(obj) = payout.as_object_mut() {
            obj.insert("account_number".to_string(), serde_json::json!(account_number));
        }
        self.send(Method::POST, "/payouts", Some(payout)).await
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, RazorpayError> {
        let mut request = self
            .client
            .request(method, format!("{}{}", RAZORPAY_API_BASE, path))
            .basic_auth(&self.key_id, Some(&self.key_secret));
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            tracing::error!("Razorpay {} failed with {}: {}", path, status, raw);
            return Err(RazorpayError::Api {
                status: status.as_u16(),
                description: error_description(&raw),
            });
        }

        Ok(response.json().await?)
    }
}

fn error_description(raw: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(raw)
        .ok()
        .map(|envelope| envelope.error.description)
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| raw.trim().to_string())
}

/// Checkout signature: HMAC-SHA256 of `"{order_id}|{payment_id}"`, hex.
pub fn verify_payment_signature(
    order_id: &str,
    payment_id: &str,
    signature: &str,
    key_secret: &str,
) -> bool {
    verify_hex_hmac(
        key_secret,
        format!("{}|{}", order_id, payment_id).as_bytes(),
        signature,
    )
}

/// Webhook signature: HMAC-SHA256 of the raw request body, hex.
pub fn verify_webhook_signature(body: &[u8], signature: &str, webhook_secret: &str) -> bool {
    verify_hex_hmac(webhook_secret, body, signature)
}

fn verify_hex_hmac(secret: &str, message: &[u8], signature: &str) -> bool {
    let Some(expected) = decode_hex(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(message);
    mac.verify_slice(&expected).is_ok()
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.is_empty() || s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| s.get(i..i + 2).and_then(|pair| u8::from_str_radix(pair, 16).ok()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_ids_are_plain_tokens() {
        assert_eq!(check_id("pay_29QQoUBi66xm2f").unwrap(), "pay_29QQoUBi66xm2f");
        for bad in ["", "pay_1/refund", "../orders", "order_1?expand=x", "pay 1", "pay_1%2F"] {
            assert!(
                matches!(check_id(bad), Err(RazorpayError::InvalidId(ref id)) if id == bad),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn resource_paths_embed_checked_ids() {
        assert_eq!(
            resource_path("payments", "pay_1", Some("refund")).unwrap(),
            "/payments/pay_1/refund"
        );
        assert_eq!(resource_path("orders", "order_9", None).unwrap(), "/orders/order_9");
        assert!(resource_path("payments", "pay_1/../../payouts", None).is_err());
    }

    fn sign(secret: &str, message: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(message);
        mac.finalize()
            .into_bytes()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    #[test]
    fn accepts_signature_over_order_and_payment_ids() {
        let signature = sign("rzp_secret", b"order_9A33XWu170gUtm|pay_29QQoUBi66xm2f");
        assert!(verify_payment_signature(
            "order_9A33XWu170gUtm",
            "pay_29QQoUBi66xm2f",
            &signature,
            "rzp_secret"
        ));
    }

    #[test]
    fn rejects_signature_from_another_secret_or_payment() {
        let signature = sign("rzp_secret", b"order_1|pay_1");
        assert!(!verify_payment_signature("order_1", "pay_1", &signature, "other_secret"));
        assert!(!verify_payment_signature("order_1", "pay_2", &signature, "rzp_secret"));
    }

    #[test]
    fn rejects_malformed_signatures() {
        assert!(!verify_payment_signature("order_1", "pay_1", "", "rzp_secret"));
        assert!(!verify_payment_signature("order_1", "pay_1", "abc", "rzp_secret"));
        assert!(!verify_payment_signature("order_1", "pay_1", "zz", "rzp_secret"));
    }

    #[test]
    fn uppercase_hex_is_accepted() {
        let signature = sign("s", b"order_1|pay_1").to_uppercase();
        assert!(verify_payment_signature("order_1", "pay_1", &signature, "s"));
    }

    #[test]
    fn webhook_signature_covers_the_raw_body() {
        let body = br#"{"event":"payment.captured","payload":{}}"#;
        let signature = sign("whsec", body);
        assert!(verify_webhook_signature(body, &signature, "whsec"));
        assert!(!verify_webhook_signature(b"{\"event\":\"payment.failed\"}", &signature, "whsec"));
    }

    #[test]
    fn error_description_prefers_gateway_message() {
        let raw = r#"{"error":{"code":"BAD_REQUEST_ERROR","description":"The amount must be atleast INR 1.00"}}"#;
        assert_eq!(error_description(raw), "The amount must be atleast INR 1.00");
        assert_eq!(error_description("upstream timeout "), "upstream timeout");
    }
}
