use aws_sdk_cognitoidentityprovider::types::AuthFlowType;
use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use lambda_http::{Body, Request, RequestExt, Response};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::ApiError;
use crate::response::{ok, parse_body, required};
use crate::AppState;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub email: Option<String>,
    pub refresh_token: Option<String>,
}

#[derive(Serialize)]
pub struct TokenResponse {
    pub id_token: String,
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_in: i32,
}

type HmacSha256 = Hmac<Sha256>;

/// Caller's user id.
///
/// The JWT `sub` claim from the API Gateway authorizer always wins. The
/// `X-User-Id` header is read only when `allow_dev_header` is set and the
/// request carries no authorizer context at all.
pub fn caller_id(event: &Request, allow_dev_header: bool) -> Option<String> {
    if let Some(authorizer) = event.request_context_ref().and_then(|ctx| ctx.authorizer()) {
        return authorizer
            .jwt
            .as_ref()
            .and_then(|jwt| jwt.claims.get("sub"))
            .map(|sub| sub.trim().to_string())
            .filter(|sub| !sub.is_empty());
    }
    if !allow_dev_header {
        return None;
    }

    event
        .headers()
        .get("X-User-Id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn require_caller(caller: Option<&str>) -> Result<&str, ApiError> {
    caller.ok_or(ApiError::Unauthorized)
}

/// SECRET_HASH for Cognito app clients with a secret.
pub fn compute_secret_hash(
    username: &str,
    client_id: &str,
    client_secret: &str,
) -> Result<String, ApiError> {
    let mut mac = HmacSha256::new_from_slice(client_secret.as_bytes())
        .map_err(|e| ApiError::internal("Invalid Cognito client secret", e))?;
    mac.update(format!("{}{}", username, client_id).as_bytes());
    Ok(general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

fn cognito_client_credentials(state: &AppState) -> Result<(&str, &str), ApiError> {
    let cognito = &state.config.cognito;
    match (cognito.client_id.as_deref(), cognito.client_secret.as_deref()) {
        (Some(id), Some(secret)) => Ok((id, secret)),
        _ => Err(ApiError::Unavailable("Cognito client")),
    }
}

/// Map a Cognito failure onto something safe to show on the login form.
pub fn login_failure_message(raw: &str) -> &'static str {
    if raw.contains("NotAuthorizedException") {
        "Incorrect email or password"
    } else if raw.contains("UserNotConfirmedException") {
        "Please verify your email before logging in"
    } else if raw.contains("UserNotFoundException") {
        "No account found with this email"
    } else if raw.contains("PasswordResetRequiredException") {
        "Password reset required"
    } else if raw.contains("TooManyRequestsException") {
        "Too many login attempts. Please try again later"
    } else {
        "Login failed. Please check your credentials"
    }
}

pub async fn login(state: &AppState, body: &[u8]) -> Result<Response<Body>, ApiError> {
    let req: LoginRequest = parse_body(body)?;
    let email = required(req.email.as_deref(), "email")?;
    let password = required(req.password.as_deref(), "password")?;
    let (client_id, client_secret) = cognito_client_credentials(state)?;

    tracing::info!("Authenticating user: {}", email);
    let secret_hash = compute_secret_hash(&email, client_id, client_secret)?;

    let response = state
        .cognito_client
        .initiate_auth()
        .auth_flow(AuthFlowType::UserPasswordAuth)
        .client_id(client_id)
        .auth_parameters("USERNAME", &email)
        .auth_parameters("PASSWORD", &password)
        .auth_parameters("SECRET_HASH", &secret_hash)
        .send()
        .await
        .map_err(|e| {
            let raw = format!("{:?}", e);
            tracing::error!("Cognito authentication error: {}", raw);
            ApiError::AuthFailed(login_failure_message(&raw).to_string())
        })?;

    let result = response.authentication_result().ok_or_else(|| {
        tracing::error!("No authentication result returned for {}", email);
        ApiError::AuthFailed("Additional sign-in challenge required".to_string())
    })?;

    ok(&TokenResponse {
        id_token: result.id_token().unwrap_or_default().to_string(),
        access_token: result.access_token().unwrap_or_default().to_string(),
        refresh_token: result.refresh_token().map(str::to_string),
        expires_in: result.expires_in(),
    })
}

pub async fn refresh_token(state: &AppState, body: &[u8]) -> Result<Response<Body>, ApiError> {
    let req: RefreshRequest = parse_body(body)?;
    let email = required(req.email.as_deref(), "email")?;
    let refresh_token = required(req.refresh_token.as_deref(), "refresh_token")?;
    let (client_id, client_secret) = cognito_client_credentials(state)?;
    let secret_hash = compute_secret_hash(&email, client_id, client_secret)?;

    let response = state
        .cognito_client
        .initiate_auth()
        .auth_flow(AuthFlowType::RefreshTokenAuth)
        .client_id(client_id)
        .auth_parameters("REFRESH_TOKEN", &refresh_token)
        .auth_parameters("SECRET_HASH", &secret_hash)
        .send()
        .await
        .map_err(|e| {
            tracing::error!("Cognito refresh error: {:?}", e);
            ApiError::AuthFailed("Session expired, please log in again".to_string())
        })?;

    let result = response
        .authentication_result()
        .ok_or_else(|| ApiError::AuthFailed("Session expired, please log in again".to_string()))?;

    ok(&TokenResponse {
        id_token: result.id_token().unwrap_or_default().to_string(),
        access_token: result.access_token().unwrap_or_default().to_string(),
        refresh_token: None,
        expires_in: result.expires_in(),
    })
}
