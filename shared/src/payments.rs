use lambda_http::{Body, Response};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::interactions::record_interaction;
use crate::razorpay::{check_id, verify_webhook_signature, CreateOrder};
use crate::response::{created, ok, parse_body, required};
use crate::types::InteractionKind;
use crate::AppState;

const DEFAULT_CURRENCY: &str = "INR";

#[derive(Debug, Deserialize)]
pub struct OrderRequest {
    pub amount: Option<i64>,
    pub currency: Option<String>,
    pub receipt: Option<String>,
    pub notes: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub razorpay_order_id: Option<String>,
    pub razorpay_payment_id: Option<String>,
    pub razorpay_signature: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub payment_id: Option<String>,
    pub amount: Option<i64>,
}

#[derive(Serialize)]
struct OrderResponse {
    order: serde_json::Value,
    key_id: String,
}

/// Positive amount in the smallest currency unit (paise for INR).
pub fn validate_amount(amount: Option<i64>) -> Result<u64, ApiError> {
    match amount {
        None => Err(ApiError::bad_request("Missing required field: amount")),
        Some(a) if a <= 0 => Err(ApiError::bad_request("amount must be greater than zero")),
        Some(a) => Ok(a as u64),
    }
}

fn order_from_request(req: OrderRequest, user_id: &str) -> Result<CreateOrder, ApiError> {
    let amount = validate_amount(req.amount)?;
    let currency = req
        .currency
        .map(|c| c.trim().to_ascii_uppercase())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());

    let mut notes = match req.notes {
        Some(serde_json::Value::Object(map)) => map,
        Some(serde_json::Value::Null) | None => serde_json::Map::new(),
        Some(_) => return Err(ApiError::bad_request("notes must be an object")),
    };
    notes.insert("user_id".to_string(), serde_json::json!(user_id));

    Ok(CreateOrder {
        amount,
        currency,
        receipt: req.receipt.filter(|r| !r.trim().is_empty()),
        notes: Some(serde_json::Value::Object(notes)),
    })
}

pub async fn create_order(
    state: &AppState,
    user_id: &str,
    body: &[u8],
) -> Result<Response<Body>, ApiError> {
    let req: OrderRequest = parse_body(body)?;
    let order = order_from_request(req, user_id)?;
    let razorpay = state.razorpay()?;

    tracing::info!("Creating {} {} order for {}", order.amount, order.currency, user_id);
    let order = razorpay.create_order(&order).await?;

    created(&OrderResponse {
        order,
        key_id: razorpay.key_id().to_string(),
    })
}

pub async fn verify_payment(
    state: &AppState,
    user_id: &str,
    body: &[u8],
) -> Result<Response<Body>, ApiError> {
    let req: VerifyRequest = parse_body(body)?;
    let order_id = required(req.razorpay_order_id.as_deref(), "razorpay_order_id")?;
    let payment_id = required(req.razorpay_payment_id.as_deref(), "razorpay_payment_id")?;
    let signature = required(req.razorpay_signature.as_deref(), "razorpay_signature")?;
    let razorpay = state.razorpay()?;

    if !razorpay.verify_payment(&order_id, &payment_id, &signature) {
        tracing::warn!("Signature mismatch for order {} from {}", order_id, user_id);
        return Err(ApiError::bad_request("Invalid payment signature"));
    }

    tracing::info!("Verified payment {} for order {}", payment_id, order_id);
    record_interaction(
        state,
        user_id,
        InteractionKind::Payment,
        format!("Payment {} for order {}", payment_id, order_id),
    )
    .await;

    ok(&serde_json::json!({
        "verified": true,
        "order_id": order_id,
        "payment_id": payment_id,
    }))
}

/// Razorpay webhook. Authenticated only by `X-Razorpay-Signature`.
pub async fn webhook(
    state: &AppState,
    signature: Option<&str>,
    body: &[u8],
) -> Result<Response<Body>, ApiError> {
    let razorpay = state.razorpay()?;
    let secret = razorpay
        .webhook_secret()
        .ok_or(ApiError::Unavailable("Razorpay webhook secret"))?;
    let signature = signature
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing X-Razorpay-Signature header"))?;

    if !verify_webhook_signature(body, signature, secret) {
        tracing::warn!("Rejected webhook with bad signature");
        return Err(ApiError::bad_request("Invalid webhook signature"));
    }

    let payload: serde_json::Value = parse_body(body)?;
    let event = payload
        .get("event")
        .and_then(|e| e.as_str())
        .unwrap_or("unknown");
    tracing::info!("Razorpay webhook received: {}", event);

    ok(&serde_json::json!({ "event": event }))
}

pub async fn refund(
    state: &AppState,
    user_id: &str,
    body: &[u8],
) -> Result<Response<Body>, ApiError> {
    let req: RefundRequest = parse_body(body)?;
    let payment_id = required(req.payment_id.as_deref(), "payment_id")?;
    check_id(&payment_id)?;
    let amount = match req.amount {
        Some(amount) => Some(validate_amount(Some(amount))?),
        None => None,
    };
    let razorpay = state.razorpay()?;

    tracing::info!("Refunding payment {} for {}", payment_id, user_id);
    let refund = razorpay.refund(&payment_id, amount).await?;
    ok(&refund)
}

/// Caller must already be checked as admin.
pub async fn payout(
    state: &AppState,
    admin_id: &str,
    body: &[u8],
) -> Result<Response<Body>, ApiError> {
    let payout: serde_json::Value = parse_body(body)?;
    if !payout.is_object() {
        return Err(ApiError::bad_request("Payout body must be an object"));
    }
    let razorpay = state.razorpay()?;

    tracing::info!("Admin {} creating payout", admin_id);
    let result = razorpay.create_payout(payout).await?;
    created(&result)
}

pub async fn fetch_payment(
    state: &AppState,
    payment_id: &str,
) -> Result<Response<Body>, ApiError> {
    check_id(payment_id)?;
    let payment = state.razorpay()?.fetch_payment(payment_id).await?;
    ok(&payment)
}

pub async fn fetch_order(state: &AppState, order_id: &str) -> Result<Response<Body>, ApiError> {
    check_id(order_id)?;
    let order = state.razorpay()?.fetch_order(order_id).await?;
    ok(&order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json: serde_json::Value) -> OrderRequest {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn amounts_must_be_positive() {
        assert!(validate_amount(None).is_err());
        assert!(validate_amount(Some(0)).is_err());
        assert!(validate_amount(Some(-500)).is_err());
        assert_eq!(validate_amount(Some(49900)).unwrap(), 49900);
    }

    #[test]
    fn orders_default_to_rupees_and_tag_the_buyer() {
        let order =
            order_from_request(request(serde_json::json!({ "amount": 1000 })), "u1").unwrap();
        assert_eq!(order.currency, "INR");
        assert_eq!(order.notes.unwrap()["user_id"], "u1");
        assert!(order.receipt.is_none());
    }

    #[test]
    fn caller_notes_are_kept() {
        let order = order_from_request(
            request(serde_json::json!({
                "amount": 250,
                "currency": "usd",
                "receipt": "rcpt_7",
                "notes": { "plan": "premium" }
            })),
            "u2",
        )
        .unwrap();
        assert_eq!(order.currency, "USD");
        assert_eq!(order.receipt.as_deref(), Some("rcpt_7"));
        let notes = order.notes.unwrap();
        assert_eq!(notes["plan"], "premium");
        assert_eq!(notes["user_id"], "u2");
    }

    #[test]
    fn non_object_notes_are_rejected() {
        let err = order_from_request(
            request(serde_json::json!({ "amount": 1, "notes": [1] })),
            "u1",
        );
        assert!(matches!(err, Err(ApiError::BadRequest(_))));
    }
}
