use lambda_http::{
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    Body, Response,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::ApiError;

/// JSON response with the CORS headers every endpoint carries.
pub fn json_response(status: StatusCode, payload: &serde_json::Value) -> Response<Body> {
    let mut resp = Response::new(Body::from(payload.to_string()));
    *resp.status_mut() = status;
    let headers = resp.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert("Access-Control-Allow-Origin", HeaderValue::from_static("*"));
    resp
}

/// `{ "success": true, "data": ... }`
pub fn success<T: Serialize>(status: StatusCode, data: &T) -> Result<Response<Body>, ApiError> {
    let data = serde_json::to_value(data)?;
    Ok(json_response(
        status,
        &serde_json::json!({ "success": true, "data": data }),
    ))
}

pub fn ok<T: Serialize>(data: &T) -> Result<Response<Body>, ApiError> {
    success(StatusCode::OK, data)
}

pub fn created<T: Serialize>(data: &T) -> Result<Response<Body>, ApiError> {
    success(StatusCode::CREATED, data)
}

pub fn message(status: StatusCode, message: &str) -> Response<Body> {
    json_response(
        status,
        &serde_json::json!({ "success": true, "message": message }),
    )
}

pub fn preflight() -> Response<Body> {
    let mut resp = Response::new(Body::Empty);
    let headers = resp.headers_mut();
    headers.insert("Access-Control-Allow-Origin", HeaderValue::from_static("*"));
    headers.insert(
        "Access-Control-Allow-Methods",
        HeaderValue::from_static("GET,POST,PUT,PATCH,DELETE,OPTIONS"),
    );
    headers.insert(
        "Access-Control-Allow-Headers",
        HeaderValue::from_static("Content-Type,Authorization,X-User-Id,X-Razorpay-Signature"),
    );
    resp
}

pub fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    let body = if body.is_empty() { b"{}".as_slice() } else { body };
    serde_json::from_slice(body).map_err(|e| {
        tracing::warn!("Invalid request body: {} | body: {}", e, String::from_utf8_lossy(body));
        ApiError::bad_request(format!("Invalid request body: {}", e))
    })
}

/// Trimmed, non-empty string field or a 400 naming it.
pub fn required(value: Option<&str>, field: &str) -> Result<String, ApiError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::bad_request(format!("Missing required field: {}", field)))
}

/// `?limit=` query value: positive integers up to `max`, else `default`.
pub fn limit_param(raw: Option<&str>, default: i32, max: i32) -> i32 {
    raw.and_then(|v| v.trim().parse::<i32>().ok())
        .filter(|v| *v > 0)
        .map(|v| v.min(max))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Sample {
        #[serde(default)]
        name: Option<String>,
    }

    #[test]
    fn success_wraps_data() {
        let resp = ok(&serde_json::json!({ "id": 7 })).unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get("Access-Control-Allow-Origin").unwrap(),
            "*"
        );
        let body: serde_json::Value = serde_json::from_slice(&resp.body().to_vec()).unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["id"], 7);
    }

    #[test]
    fn empty_body_parses_as_empty_object() {
        let sample: Sample = parse_body(b"").unwrap();
        assert!(sample.name.is_none());
    }

    #[test]
    fn malformed_body_is_a_bad_request() {
        let err = parse_body::<Sample>(b"{not json").unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().starts_with("Invalid request body"));
    }

    #[test]
    fn required_rejects_blank_values() {
        assert_eq!(required(Some(" Asha "), "name").unwrap(), "Asha");
        let err = required(Some("   "), "name").unwrap_err();
        assert_eq!(err.to_string(), "Missing required field: name");
        assert!(required(None, "email").is_err());
    }

    #[test]
    fn limit_defaults_and_caps() {
        assert_eq!(limit_param(None, 20, 100), 20);
        assert_eq!(limit_param(Some("5"), 20, 100), 5);
        assert_eq!(limit_param(Some("500"), 20, 100), 100);
        assert_eq!(limit_param(Some("0"), 20, 100), 20);
        assert_eq!(limit_param(Some("lots"), 20, 100), 20);
    }
}
