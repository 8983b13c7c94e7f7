//! Community join requests: public submission, admin review.
//!
//! Approval first claims the request with a conditional write (`pending` to
//! `approving`), then provisions the Cognito account, the `User` and the
//! community membership. Every provisioning step can be repeated, so a
//! claim left behind by a failed approval can be taken over once it is
//! stale. Email delivery failures are logged but never undo a review.

use aws_sdk_cognitoidentityprovider::types::{AttributeType, DeliveryMediumType};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use lambda_http::{Body, Response};

use crate::email::{rejection_email, send_email, welcome_email};
use crate::error::ApiError;
use crate::members::add_member;
use crate::response::{created, ok, parse_body, required};
use crate::store::{
    self, get_json, get_string, get_string_or_default, Item, Update, JOIN_REQUESTS_PK,
};
use crate::types::{
    CommunityMember, CreateJoinRequest, JoinRequest, JoinStatus, RejectJoinRequest, Role, User,
};
use crate::users::save_user;
use crate::AppState;

const REQUEST_PREFIX: &str = "REQUEST#";
/// An `approving` claim older than this may be taken over.
const CLAIM_TTL_MINUTES: i64 = 5;

impl JoinRequest {
    pub fn to_item(&self) -> Result<Item, ApiError> {
        let mut item = store::keyed(JOIN_REQUESTS_PK, request_sk(&self.request_id));
        item.insert("request_id".to_string(), store::s(&self.request_id));
        item.insert("name".to_string(), store::s(&self.name));
        item.insert("email".to_string(), store::s(&self.email));
        item.insert("crops".to_string(), store::json(&self.crops)?);
        item.insert("status".to_string(), store::s(self.status.as_str()));
        item.insert("created_at".to_string(), store::s(&self.created_at));
        store::put_opt(&mut item, "phone", &self.phone);
        store::put_opt(&mut item, "location", &self.location);
        store::put_opt(&mut item, "farm_size", &self.farm_size);
        store::put_opt(&mut item, "reason", &self.reason);
        store::put_opt(&mut item, "reviewed_by", &self.reviewed_by);
        store::put_opt(&mut item, "reviewed_at", &self.reviewed_at);
        store::put_opt(&mut item, "rejection_reason", &self.rejection_reason);
        store::put_opt(&mut item, "user_id", &self.user_id);
        Ok(item)
    }

    pub fn from_item(item: &Item) -> Option<Self> {
        Some(Self {
            request_id: store::id_from_sk(item)?,
            name: get_string_or_default(item, "name"),
            email: get_string_or_default(item, "email"),
            phone: get_string(item, "phone"),
            location: get_string(item, "location"),
            farm_size: get_string(item, "farm_size"),
            crops: get_json(item, "crops"),
            reason: get_string(item, "reason"),
            status: get_string(item, "status")?.parse().ok()?,
            created_at: get_string_or_default(item, "created_at"),
            reviewed_by: get_string(item, "reviewed_by"),
            reviewed_at: get_string(item, "reviewed_at"),
            rejection_reason: get_string(item, "rejection_reason"),
            user_id: get_string(item, "user_id"),
        })
    }
}

fn optional(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Validate a submission into a pending request.
pub fn new_join_request(req: CreateJoinRequest) -> Result<JoinRequest, ApiError> {
    let name = required(req.name.as_deref(), "name")?;
    let email = required(req.email.as_deref(), "email")?.to_lowercase();
    if !email.contains('@') {
        return Err(ApiError::bad_request("Invalid email address"));
    }

    Ok(JoinRequest {
        request_id: uuid::Uuid::new_v4().to_string(),
        name,
        email,
        phone: optional(req.phone),
        location: optional(req.location),
        farm_size: optional(req.farm_size),
        crops: req
            .crops
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect(),
        reason: optional(req.reason),
        status: JoinStatus::Pending,
        created_at: Utc::now().to_rfc3339(),
        reviewed_by: None,
        reviewed_at: None,
        rejection_reason: None,
        user_id: None,
    })
}

fn ensure_pending(request: &JoinRequest) -> Result<(), ApiError> {
    match request.status {
        JoinStatus::Pending => Ok(()),
        JoinStatus::Approving => Err(ApiError::Conflict(
            "Join request is already being approved".to_string(),
        )),
        status => Err(ApiError::Conflict(format!(
            "Join request has already been {}",
            status.as_str()
        ))),
    }
}

fn review_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn request_sk(request_id: &str) -> String {
    format!("{}{}", REQUEST_PREFIX, request_id)
}

/// Moves a pending request (or one whose approval claim went stale) to
/// `approving`.
fn approval_claim(admin_id: &str, now: DateTime<Utc>) -> Update {
    let stale = now - Duration::minutes(CLAIM_TTL_MINUTES);
    Update::new("SET #status = :approving, reviewed_by = :admin, reviewed_at = :now")
        .name("#status", "status")
        .value(":approving", store::s(JoinStatus::Approving.as_str()))
        .value(":pending", store::s(JoinStatus::Pending.as_str()))
        .value(":admin", store::s(admin_id))
        .value(":now", store::s(review_timestamp(now)))
        .value(":stale", store::s(review_timestamp(stale)))
        .condition("#status = :pending OR (#status = :approving AND reviewed_at < :stale)")
}

/// Hands a claim back so the request can be reviewed again. Only the claim
/// stamped `claimed_at` is released.
fn claim_release(claimed_at: &str) -> Update {
    Update::new("SET #status = :pending REMOVE reviewed_by, reviewed_at")
        .name("#status", "status")
        .value(":pending", store::s(JoinStatus::Pending.as_str()))
        .value(":approving", store::s(JoinStatus::Approving.as_str()))
        .value(":claimed", store::s(claimed_at))
        .condition("#status = :approving AND reviewed_at = :claimed")
}

fn approval_completed(user_id: &str, claimed_at: &str) -> Update {
    Update::new("SET #status = :approved, user_id = :user")
        .name("#status", "status")
        .value(":approved", store::s(JoinStatus::Approved.as_str()))
        .value(":approving", store::s(JoinStatus::Approving.as_str()))
        .value(":user", store::s(user_id))
        .value(":claimed", store::s(claimed_at))
        .condition("#status = :approving AND reviewed_at = :claimed")
}

fn rejection(admin_id: &str, now: DateTime<Utc>, reason: Option<&str>) -> Update {
    let mut expression =
        "SET #status = :rejected, reviewed_by = :admin, reviewed_at = :now".to_string();
    if reason.is_some() {
        expression.push_str(", rejection_reason = :reason");
    }
    let update = Update::new(expression)
        .name("#status", "status")
        .value(":rejected", store::s(JoinStatus::Rejected.as_str()))
        .value(":pending", store::s(JoinStatus::Pending.as_str()))
        .value(":admin", store::s(admin_id))
        .value(":now", store::s(review_timestamp(now)))
        .condition("#status = :pending");
    match reason {
        Some(reason) => update.value(":reason", store::s(reason)),
        None => update,
    }
}

/// `sub` out of a Cognito attribute list.
fn sub_attribute(attributes: &[AttributeType]) -> Option<String> {
    attributes
        .iter()
        .find(|attr| attr.name() == "sub")
        .and_then(|attr| attr.value())
        .map(str::to_string)
}

async fn load_all(state: &AppState) -> Result<Vec<JoinRequest>, ApiError> {
    let items = store::query_prefix(
        &state.dynamo_client,
        state.table(),
        JOIN_REQUESTS_PK,
        REQUEST_PREFIX,
        false,
        None,
    )
    .await?;
    Ok(items.iter().filter_map(JoinRequest::from_item).collect())
}

async fn load_request(state: &AppState, request_id: &str) -> Result<JoinRequest, ApiError> {
    let sk = request_sk(request_id);
    store::get_item(&state.dynamo_client, state.table(), JOIN_REQUESTS_PK, &sk)
        .await?
        .as_ref()
        .and_then(JoinRequest::from_item)
        .ok_or_else(|| ApiError::not_found("Join request not found"))
}

async fn save_request(state: &AppState, request: &JoinRequest) -> Result<(), ApiError> {
    store::put_item(&state.dynamo_client, state.table(), request.to_item()?).await
}

/// Applies a conditional review update; `None` when the condition failed.
async fn update_request(
    state: &AppState,
    request_id: &str,
    update: Update,
) -> Result<Option<JoinRequest>, ApiError> {
    let item = store::update_item(
        &state.dynamo_client,
        state.table(),
        JOIN_REQUESTS_PK,
        &request_sk(request_id),
        update,
    )
    .await?;
    Ok(item.as_ref().and_then(JoinRequest::from_item))
}

pub async fn submit(state: &AppState, body: &[u8]) -> Result<Response<Body>, ApiError> {
    let req: CreateJoinRequest = parse_body(body)?;
    let request = new_join_request(req)?;

    let duplicate = load_all(state)
        .await?
        .into_iter()
        .any(|r| r.status == JoinStatus::Pending && r.email.eq_ignore_ascii_case(&request.email));
    if duplicate {
        return Err(ApiError::Conflict(
            "A join request for this email is already pending".to_string(),
        ));
    }

    save_request(state, &request).await?;
    tracing::info!("Join request {} submitted by {}", request.request_id, request.email);
    created(&request)
}

pub async fn list(state: &AppState, status: Option<&str>) -> Result<Response<Body>, ApiError> {
    let status = match status.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => Some(raw.parse::<JoinStatus>().map_err(ApiError::BadRequest)?),
        None => None,
    };

    let mut requests: Vec<JoinRequest> = load_all(state)
        .await?
        .into_iter()
        .filter(|r| status.map_or(true, |s| r.status == s))
        .collect();
    requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    ok(&requests)
}

fn cognito_pool(state: &AppState) -> Result<&str, ApiError> {
    state
        .config
        .cognito
        .user_pool_id
        .as_deref()
        .ok_or(ApiError::Unavailable("Cognito user pool"))
}

/// `sub` of an account that already exists under this email.
async fn existing_cognito_sub(
    state: &AppState,
    user_pool_id: &str,
    email: &str,
) -> Result<String, ApiError> {
    let response = state
        .cognito_client
        .admin_get_user()
        .user_pool_id(user_pool_id)
        .username(email)
        .send()
        .await
        .map_err(|e| ApiError::internal("Failed to look up Cognito user", e))?;

    sub_attribute(response.user_attributes())
        .ok_or_else(|| ApiError::internal("Cognito user has no sub", email))
}

/// Creates the Cognito account and returns its `sub`. An account left over
/// from an earlier attempt is reused.
async fn create_cognito_user(state: &AppState, request: &JoinRequest) -> Result<String, ApiError> {
    let user_pool_id = cognito_pool(state)?;

    let attribute = |name: &str, value: &str| {
        AttributeType::builder()
            .name(name)
            .value(value)
            .build()
            .map_err(|e| ApiError::internal("Failed to build Cognito attribute", e))
    };

    let result = state
        .cognito_client
        .admin_create_user()
        .user_pool_id(user_pool_id)
        .username(&request.email)
        .user_attributes(attribute("email", &request.email)?)
        .user_attributes(attribute("email_verified", "true")?)
        .user_attributes(attribute("name", &request.name)?)
        .desired_delivery_mediums(DeliveryMediumType::Email)
        .send()
        .await;

    let response = match result {
        Ok(response) => response,
        Err(e)
            if e.as_service_error()
                .map_or(false, |err| err.is_username_exists_exception()) =>
        {
            tracing::warn!("Cognito user already exists for {}, reusing it", request.email);
            return existing_cognito_sub(state, user_pool_id, &request.email).await;
        }
        Err(e) => return Err(ApiError::internal("Failed to create Cognito user", e)),
    };

    match response.user().and_then(|user| sub_attribute(user.attributes())) {
        Some(sub) => Ok(sub),
        None => existing_cognito_sub(state, user_pool_id, &request.email).await,
    }
}

/// Account, profile and membership for an approved request. Safe to repeat.
async fn provision(state: &AppState, request: &JoinRequest) -> Result<String, ApiError> {
    let user_id = create_cognito_user(state, request).await?;
    let now = Utc::now().to_rfc3339();

    let user = User {
        user_id: user_id.clone(),
        name: request.name.clone(),
        email: request.email.clone(),
        phone: request.phone.clone(),
        role: Role::Farmer,
        location: request.location.clone(),
        bio: None,
        farm_size: request.farm_size.clone(),
        crops: request.crops.clone(),
        avatar_url: None,
        created_at: now.clone(),
        last_login: None,
    };
    save_user(state, &user).await?;

    add_member(
        state,
        &CommunityMember {
            user_id: user_id.clone(),
            name: user.name,
            email: user.email,
            role: user.role,
            joined_at: now,
        },
    )
    .await?;

    Ok(user_id)
}

async fn finish_approval(
    state: &AppState,
    request: &JoinRequest,
    claimed_at: &str,
) -> Result<JoinRequest, ApiError> {
    let user_id = provision(state, request).await?;
    update_request(
        state,
        &request.request_id,
        approval_completed(&user_id, claimed_at),
    )
    .await?
    .ok_or_else(|| ApiError::Conflict("Join request approval was taken over".to_string()))
}

pub async fn approve(
    state: &AppState,
    admin_id: &str,
    request_id: &str,
) -> Result<Response<Body>, ApiError> {
    let request = load_request(state, request_id).await?;
    if request.status != JoinStatus::Approving {
        ensure_pending(&request)?;
    }

    let now = Utc::now();
    let claimed_at = review_timestamp(now);
    let claimed = update_request(state, request_id, approval_claim(admin_id, now))
        .await?
        .ok_or_else(|| {
            ApiError::Conflict("Join request is already being approved".to_string())
        })?;

    let request = match finish_approval(state, &claimed, &claimed_at).await {
        Ok(request) => request,
        Err(e) => {
            tracing::error!("Approval of join request {} failed: {}", request_id, e);
            let released = update_request(state, request_id, claim_release(&claimed_at)).await;
            if let Err(release_err) = released {
                tracing::error!(
                    "Failed to release claim on join request {}: {}",
                    request_id,
                    release_err
                );
            }
            return Err(e);
        }
    };
    tracing::info!("Join request {} approved by {}", request_id, admin_id);

    let template = welcome_email(&request.name, &request.email, &state.config.frontend_url);
    if let Err(e) = send_email(state, &request.email, template).await {
        tracing::error!("Failed to send welcome email to {}: {}", request.email, e);
    }

    ok(&request)
}

pub async fn reject(
    state: &AppState,
    admin_id: &str,
    request_id: &str,
    body: &[u8],
) -> Result<Response<Body>, ApiError> {
    let req: RejectJoinRequest = parse_body(body)?;
    let request = load_request(state, request_id).await?;
    ensure_pending(&request)?;

    let reason = optional(req.reason);
    let update = rejection(admin_id, Utc::now(), reason.as_deref());
    let request = update_request(state, request_id, update)
        .await?
        .ok_or_else(|| ApiError::Conflict("Join request is no longer pending".to_string()))?;
    tracing::info!("Join request {} rejected by {}", request_id, admin_id);

    let template = rejection_email(&request.name, request.rejection_reason.as_deref());
    if let Err(e) = send_email(state, &request.email, template).await {
        tracing::error!("Failed to send rejection email to {}: {}", request.email, e);
    }

    ok(&request)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(json: serde_json::Value) -> CreateJoinRequest {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn submissions_need_name_and_a_plausible_email() {
        let missing_email = new_join_request(submission(serde_json::json!({ "name": "Ravi" })));
        assert!(matches!(
            missing_email,
            Err(ApiError::BadRequest(m)) if m == "Missing required field: email"
        ));

        let bad_email = new_join_request(submission(serde_json::json!({
            "name": "Ravi",
            "email": "ravi"
        })));
        assert!(matches!(bad_email, Err(ApiError::BadRequest(_))));

        let missing_name =
            new_join_request(submission(serde_json::json!({ "email": "r@example.com" })));
        assert!(matches!(
            missing_name,
            Err(ApiError::BadRequest(m)) if m == "Missing required field: name"
        ));
    }

    #[test]
    fn submissions_start_pending_with_clean_fields() {
        let request = new_join_request(submission(serde_json::json!({
            "name": " Ravi Kumar ",
            "email": "Ravi@Example.com",
            "farmSize": "  ",
            "crops": ["Paddy", ""],
            "reason": "Want advice on paddy"
        })))
        .unwrap();
        assert_eq!(request.name, "Ravi Kumar");
        assert_eq!(request.email, "ravi@example.com");
        assert_eq!(request.status, JoinStatus::Pending);
        assert!(request.farm_size.is_none());
        assert_eq!(request.crops, vec!["Paddy"]);
    }

    #[test]
    fn only_pending_requests_can_be_reviewed() {
        let mut request = new_join_request(submission(serde_json::json!({
            "name": "Ravi", "email": "r@example.com"
        })))
        .unwrap();
        assert!(ensure_pending(&request).is_ok());

        request.status = JoinStatus::Approved;
        let err = ensure_pending(&request).unwrap_err();
        assert_eq!(err.to_string(), "Join request has already been approved");

        request.status = JoinStatus::Approving;
        let err = ensure_pending(&request).unwrap_err();
        assert_eq!(err.to_string(), "Join request is already being approved");
    }

    fn value<'a>(update: &'a Update, placeholder: &str) -> &'a str {
        update.values[placeholder].as_s().unwrap()
    }

    #[test]
    fn approval_claims_only_pending_or_stale_requests() {
        let now = DateTime::parse_from_rfc3339("2026-10-16T09:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let claim = approval_claim("admin-1", now);

        assert_eq!(
            claim.expression,
            "SET #status = :approving, reviewed_by = :admin, reviewed_at = :now"
        );
        assert_eq!(
            claim.condition.as_deref(),
            Some("#status = :pending OR (#status = :approving AND reviewed_at < :stale)")
        );
        assert_eq!(claim.names["#status"], "status");
        assert_eq!(value(&claim, ":pending"), "pending");
        assert_eq!(value(&claim, ":approving"), "approving");
        assert_eq!(value(&claim, ":admin"), "admin-1");
        assert_eq!(value(&claim, ":now"), "2026-10-16T09:30:00.000Z");
        assert_eq!(value(&claim, ":stale"), "2026-10-16T09:25:00.000Z");
    }

    #[test]
    fn claim_timestamps_sort_as_strings() {
        let earlier = DateTime::parse_from_rfc3339("2026-10-16T09:25:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let later = earlier + Duration::milliseconds(1500);
        assert!(review_timestamp(earlier) < review_timestamp(later));
    }

    #[test]
    fn completion_and_release_target_one_claim() {
        let done = approval_completed("sub-9", "2026-10-16T09:30:00.000Z");
        assert_eq!(
            done.condition.as_deref(),
            Some("#status = :approving AND reviewed_at = :claimed")
        );
        assert_eq!(value(&done, ":approved"), "approved");
        assert_eq!(value(&done, ":user"), "sub-9");
        assert_eq!(value(&done, ":claimed"), "2026-10-16T09:30:00.000Z");

        let release = claim_release("2026-10-16T09:30:00.000Z");
        assert_eq!(
            release.expression,
            "SET #status = :pending REMOVE reviewed_by, reviewed_at"
        );
        assert_eq!(release.condition, done.condition);
        assert_eq!(value(&release, ":claimed"), "2026-10-16T09:30:00.000Z");
    }

    #[test]
    fn rejections_need_a_pending_request() {
        let now = Utc::now();
        let with_reason = rejection("admin-1", now, Some("Outside our district"));
        assert_eq!(with_reason.condition.as_deref(), Some("#status = :pending"));
        assert!(with_reason.expression.ends_with(", rejection_reason = :reason"));
        assert_eq!(value(&with_reason, ":reason"), "Outside our district");

        let without = rejection("admin-1", now, None);
        assert!(!without.expression.contains("rejection_reason"));
        assert!(!without.values.contains_key(":reason"));
    }

    #[test]
    fn sub_is_read_from_cognito_attributes() {
        let attribute = |name: &str, value: &str| {
            AttributeType::builder()
                .name(name)
                .value(value)
                .build()
                .unwrap()
        };
        let attributes = vec![
            attribute("email", "r@example.com"),
            attribute("sub", "0f6c-42"),
        ];
        assert_eq!(sub_attribute(&attributes).as_deref(), Some("0f6c-42"));
        assert!(sub_attribute(&attributes[..1]).is_none());
    }

    #[test]
    fn requests_survive_storage() {
        let mut request = new_join_request(submission(serde_json::json!({
            "name": "Ravi", "email": "r@example.com", "crops": ["Cotton"]
        })))
        .unwrap();
        request.status = JoinStatus::Rejected;
        request.rejection_reason = Some("Duplicate".to_string());

        let item = request.to_item().unwrap();
        let back = JoinRequest::from_item(&item).unwrap();
        assert_eq!(back.request_id, request.request_id);
        assert_eq!(back.status, JoinStatus::Rejected);
        assert_eq!(back.crops, vec!["Cotton"]);
        assert_eq!(back.rejection_reason.as_deref(), Some("Duplicate"));
    }
}
