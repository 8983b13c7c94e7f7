use farmerai_shared::{
    assistant, auth, blogs,
    error::ApiError,
    events, gallery, interactions, join_requests, members, payments, posts, recommendations,
    response::preflight,
    search, users, AppState,
};
use lambda_http::{http::Method, Body, Error, Request, RequestExt, Response};
use std::sync::Arc;

/// Main Lambda handler - every `/api/...` route answers with the JSON envelope.
pub(crate) async fn function_handler(
    event: Request,
    state: Arc<AppState>,
) -> Result<Response<Body>, Error> {
    tracing::info!(
        "FarmerAI API invoked - Method: {} Path: {}",
        event.method(),
        event.uri().path()
    );

    // Handle CORS preflight
    if event.method() == Method::OPTIONS {
        return Ok(preflight());
    }

    Ok(route(&event, &state)
        .await
        .unwrap_or_else(ApiError::into_response))
}

async fn admin(state: &AppState, caller: Option<&str>) -> Result<String, ApiError> {
    let caller = auth::require_caller(caller)?;
    users::require_admin(state, caller).await?;
    Ok(caller.to_string())
}

async fn is_admin(state: &AppState, caller: Option<&str>) -> Result<bool, ApiError> {
    match caller {
        Some(id) => Ok(users::find_user(state, id)
            .await?
            .map(|u| u.is_admin())
            .unwrap_or(false)),
        None => Ok(false),
    }
}

async fn route(event: &Request, state: &AppState) -> Result<Response<Body>, ApiError> {
    let path = event.uri().path();
    let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let Some((&"api", rest)) = parts.split_first() else {
        return Err(not_found(event));
    };

    let body: &[u8] = event.body();
    let caller = auth::caller_id(event, state.config.allow_dev_user_header);
    let caller = caller.as_deref();
    let query = |name: &str| {
        event
            .query_string_parameters_ref()
            .and_then(|params| params.first(name))
    };
    let flag = |name: &str| matches!(query(name).map(str::trim), Some("true") | Some("1"));
    let me = || auth::require_caller(caller);

    match (event.method(), rest) {
        // ========== AUTH & USERS ==========
        (&Method::POST, ["auth", "login"]) => auth::login(state, body).await,
        (&Method::POST, ["auth", "refresh"]) => auth::refresh_token(state, body).await,
        (&Method::GET, ["users", "me"]) => users::get_me(state, me()?).await,
        (&Method::PATCH, ["users", "me"]) => users::update_me(state, me()?, body).await,
        (&Method::GET, ["users", "me", "activity"]) => {
            interactions::activity(state, me()?, query("limit")).await
        }
        (&Method::GET, ["admin", "users"]) => {
            admin(state, caller).await?;
            users::list_users(state).await
        }

        // ========== RECOMMENDATIONS ==========
        (&Method::POST, ["recommendations", "generate"]) => {
            recommendations::generate(state, me()?, body).await
        }
        (&Method::POST, ["recommendations", "soil"]) => {
            recommendations::soil_based(state, me()?, body).await
        }
        (&Method::GET, ["recommendations", "history"]) => {
            recommendations::history(state, me()?).await
        }

        // ========== ASSISTANT ==========
        (&Method::POST, ["assistant", "ask"]) => assistant::ask(state, me()?, body).await,
        (&Method::GET, ["assistant", "history"]) => {
            assistant::history(state, me()?, query("limit")).await
        }
        (&Method::DELETE, ["assistant", "history"]) => {
            assistant::clear_history(state, me()?).await
        }

        // ========== PAYMENTS ==========
        (&Method::POST, ["payments", "webhook"]) => {
            let signature = event
                .headers()
                .get("X-Razorpay-Signature")
                .and_then(|v| v.to_str().ok());
            payments::webhook(state, signature, body).await
        }
        (&Method::POST, ["payments", "order"]) => payments::create_order(state, me()?, body).await,
        (&Method::POST, ["payments", "verify"]) => {
            payments::verify_payment(state, me()?, body).await
        }
        (&Method::POST, ["payments", "refund"]) => payments::refund(state, me()?, body).await,
        (&Method::POST, ["payments", "payout"]) => {
            let admin_id = admin(state, caller).await?;
            payments::payout(state, &admin_id, body).await
        }
        (&Method::GET, ["payments", "payment", payment_id]) => {
            me()?;
            payments::fetch_payment(state, payment_id).await
        }
        (&Method::GET, ["payments", "order", order_id]) => {
            me()?;
            payments::fetch_order(state, order_id).await
        }

        // ========== COMMUNITY: POSTS ==========
        (&Method::GET, ["community", "posts"]) => posts::list_posts(state).await,
        (&Method::POST, ["community", "posts"]) => posts::create_post(state, me()?, body).await,
        (&Method::GET, ["community", "posts", post_id]) => posts::get_post(state, post_id).await,
        (&Method::DELETE, ["community", "posts", post_id]) => {
            posts::delete_post(state, me()?, post_id).await
        }
        (&Method::POST, ["community", "posts", post_id, "like"]) => {
            posts::toggle_like(state, me()?, post_id).await
        }
        (&Method::GET, ["community", "posts", post_id, "comments"]) => {
            posts::list_comments(state, post_id).await
        }
        (&Method::POST, ["community", "posts", post_id, "comments"]) => {
            posts::add_comment(state, me()?, post_id, body).await
        }

        // ========== COMMUNITY: EVENTS ==========
        (&Method::GET, ["community", "events"]) => events::list_events(state, query("past")).await,
        (&Method::POST, ["community", "events"]) => {
            let admin_id = admin(state, caller).await?;
            events::create_event(state, &admin_id, body).await
        }
        (&Method::GET, ["community", "events", event_id]) => {
            events::get_event(state, event_id).await
        }
        (&Method::PATCH | &Method::PUT, ["community", "events", event_id]) => {
            admin(state, caller).await?;
            events::update_event(state, event_id, body).await
        }
        (&Method::DELETE, ["community", "events", event_id]) => {
            admin(state, caller).await?;
            events::delete_event(state, event_id).await
        }
        (&Method::POST, ["community", "events", event_id, "register"]) => {
            events::register(state, me()?, event_id).await
        }

        // ========== COMMUNITY: PROFILES, MEMBERS, JOIN ==========
        (&Method::GET, ["community", "profiles", "me"]) => users::get_profile(state, me()?).await,
        (&Method::PATCH, ["community", "profiles", "me"]) => {
            users::update_me(state, me()?, body).await
        }
        (&Method::GET, ["community", "profiles", user_id]) => {
            users::get_profile(state, user_id).await
        }
        (&Method::GET, ["community", "members"]) => {
            members::require_member(state, me()?).await?;
            members::list_members(state).await
        }
        (&Method::POST, ["community", "join"]) => join_requests::submit(state, body).await,
        (&Method::GET, ["admin", "join-requests"]) => {
            admin(state, caller).await?;
            join_requests::list(state, query("status")).await
        }
        (&Method::POST, ["admin", "join-requests", request_id, "approve"]) => {
            let admin_id = admin(state, caller).await?;
            join_requests::approve(state, &admin_id, request_id).await
        }
        (&Method::POST, ["admin", "join-requests", request_id, "reject"]) => {
            let admin_id = admin(state, caller).await?;
            join_requests::reject(state, &admin_id, request_id, body).await
        }

        // ========== CONTENT ==========
        (&Method::GET, ["gallery"]) => gallery::list_gallery(state).await,
        (&Method::POST, ["gallery"]) => {
            let admin_id = admin(state, caller).await?;
            gallery::create_gallery_item(state, &admin_id, body).await
        }
        (&Method::DELETE, ["gallery", item_id]) => {
            admin(state, caller).await?;
            gallery::delete_gallery_item(state, item_id).await
        }
        (&Method::GET, ["blogs"]) => {
            let include_drafts = flag("all");
            if include_drafts {
                admin(state, caller).await?;
            }
            blogs::list_blogs(state, include_drafts).await
        }
        (&Method::GET, ["blogs", id_or_slug]) => {
            let include_drafts = is_admin(state, caller).await?;
            blogs::get_blog(state, id_or_slug, include_drafts).await
        }
        (&Method::POST, ["blogs"]) => {
            let admin_id = admin(state, caller).await?;
            blogs::create_blog(state, &admin_id, body).await
        }
        (&Method::PATCH | &Method::PUT, ["blogs", blog_id]) => {
            admin(state, caller).await?;
            blogs::update_blog(state, blog_id, body).await
        }
        (&Method::DELETE, ["blogs", blog_id]) => {
            admin(state, caller).await?;
            blogs::delete_blog(state, blog_id).await
        }
        (&Method::GET, ["search"]) => search::search(state, query("q"), query("type")).await,

        _ => Err(not_found(event)),
    }
}

fn not_found(event: &Request) -> ApiError {
    tracing::warn!(
        "No route matched - Method: {} Path: {}",
        event.method(),
        event.uri().path()
    );
    ApiError::not_found("Route not found")
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_config::{BehaviorVersion, Region, SdkConfig};
    use farmerai_shared::config::Config;
    use hmac::{Hmac, Mac};
    use lambda_http::http::{self, StatusCode};
    use sha2::Sha256;
    use std::collections::HashMap;

    fn state(vars: &[(&str, &str)]) -> Arc<AppState> {
        let vars: HashMap<String, String> = [("ALLOW_DEV_USER_HEADER", "true")]
            .iter()
            .chain(vars)
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let config = Config::from_lookup(|key| vars.get(key).cloned());
        let sdk = SdkConfig::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("ap-south-1"))
            .build();

        AppState::new(
            config,
            aws_sdk_cognitoidentityprovider::Client::new(&sdk),
            aws_sdk_dynamodb::Client::new(&sdk),
            aws_sdk_s3::Client::new(&sdk),
            aws_sdk_sesv2::Client::new(&sdk),
            reqwest::Client::new(),
        )
    }

    fn with_razorpay() -> Arc<AppState> {
        state(&[
            ("RAZORPAY_KEY_ID", "rzp_test_key"),
            ("RAZORPAY_KEY_SECRET", "rzp_test_secret"),
            ("RAZORPAY_WEBHOOK_SECRET", "whsec_test"),
        ])
    }

    fn request(method: &str, uri: &str, user: Option<&str>, body: &str) -> Request {
        let mut builder = http::Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header("X-User-Id", user);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn call(state: Arc<AppState>, request: Request) -> (StatusCode, serde_json::Value) {
        let response = function_handler(request, state).await.unwrap();
        let status = response.status();
        let body = match response.body() {
            Body::Empty => serde_json::Value::Null,
            other => serde_json::from_slice(other).unwrap(),
        };
        (status, body)
    }

    fn sign(secret: &str, message: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(message);
        mac.finalize()
            .into_bytes()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    #[tokio::test]
    async fn preflight_is_answered_for_any_path() {
        let (status, _) = call(state(&[]), request("OPTIONS", "/api/anything", None, "")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_routes_are_404_envelopes() {
        let (status, body) = call(state(&[]), request("GET", "/api/nowhere", None, "")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Route not found");

        let (status, _) = call(state(&[]), request("GET", "/health", None, "")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn caller_routes_need_an_identity() {
        for (method, uri) in [
            ("GET", "/api/users/me"),
            ("POST", "/api/recommendations/generate"),
            ("GET", "/api/assistant/history"),
            ("POST", "/api/community/posts"),
            ("GET", "/api/admin/join-requests"),
        ] {
            let (status, body) = call(state(&[]), request(method, uri, None, "{}")).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{} {}", method, uri);
            assert_eq!(body["message"], "Authentication required");
        }
    }

    #[tokio::test]
    async fn user_header_is_ignored_unless_enabled() {
        let (status, _) = call(
            state(&[("ALLOW_DEV_USER_HEADER", "false")]),
            request("GET", "/api/users/me", Some("admin-1"), ""),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn recommendation_inputs_are_validated() {
        let (status, body) = call(
            state(&[]),
            request(
                "POST",
                "/api/recommendations/generate",
                Some("farmer-1"),
                r#"{"n": "NaN", "p": 40, "k": 40, "rainfall": 100, "humidity": 60}"#,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "n must be a finite number");

        let (status, body) = call(
            state(&[]),
            request(
                "POST",
                "/api/recommendations/soil",
                Some("farmer-1"),
                r#"{"n": 90, "p": 40, "k": 40, "rainfall": 100, "humidity": 60, "mode": "sunny"}"#,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap().starts_with("Unknown mode 'sunny'"));
    }

    #[tokio::test]
    async fn join_requests_need_an_email() {
        let (status, body) = call(
            state(&[]),
            request("POST", "/api/community/join", None, r#"{"name": "Ravi"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Missing required field: email");
    }

    #[tokio::test]
    async fn assistant_without_gemini_is_unavailable() {
        let (status, body) = call(
            state(&[]),
            request(
                "POST",
                "/api/assistant/ask",
                Some("farmer-1"),
                r#"{"question": "When to sow?"}"#,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["message"], "Gemini is not configured");

        let (status, _) = call(
            state(&[]),
            request("POST", "/api/assistant/ask", Some("farmer-1"), r#"{"question": "  "}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn payments_without_razorpay_are_unavailable() {
        let (status, body) = call(
            state(&[]),
            request("POST", "/api/payments/order", Some("farmer-1"), r#"{"amount": 49900}"#),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["message"], "Razorpay is not configured");

        let (status, _) = call(
            state(&[]),
            request("POST", "/api/payments/order", Some("farmer-1"), r#"{"amount": 0}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn forged_payment_signatures_are_rejected() {
        let (status, body) = call(
            with_razorpay(),
            request(
                "POST",
                "/api/payments/verify",
                Some("farmer-1"),
                r#"{"razorpay_order_id": "order_1", "razorpay_payment_id": "pay_1", "razorpay_signature": "deadbeef"}"#,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Invalid payment signature");
    }

    #[tokio::test]
    async fn malformed_gateway_ids_never_reach_razorpay() {
        let (status, body) = call(
            with_razorpay(),
            request(
                "POST",
                "/api/payments/refund",
                Some("farmer-1"),
                r#"{"payment_id": "pay_1/../../payouts"}"#,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], r#"Invalid Razorpay id: "pay_1/../../payouts""#);

        let (status, _) = call(
            with_razorpay(),
            request("GET", "/api/payments/order/order_1%3Fexpand=x", Some("farmer-1"), ""),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn webhooks_are_checked_against_the_raw_body() {
        let payload = r#"{"event":"payment.captured","payload":{}}"#;

        let mut forged = request("POST", "/api/payments/webhook", None, payload);
        forged
            .headers_mut()
            .insert("x-razorpay-signature", "00ff".parse().unwrap());
        let (status, _) = call(with_razorpay(), forged).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let mut signed = request("POST", "/api/payments/webhook", None, payload);
        signed.headers_mut().insert(
            "x-razorpay-signature",
            sign("whsec_test", payload.as_bytes()).parse().unwrap(),
        );
        let (status, body) = call(with_razorpay(), signed).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["event"], "payment.captured");
    }

    #[tokio::test]
    async fn search_needs_a_query() {
        let (status, body) = call(state(&[]), request("GET", "/api/search", None, "")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Missing required field: q");
    }

    #[tokio::test]
    async fn search_rejects_unknown_types() {
        let request: Request = request("GET", "/api/search", None, "").with_query_string_parameters(
            HashMap::from([
                ("q".to_string(), "rice".to_string()),
                ("type".to_string(), "videos".to_string()),
            ]),
        );
        let (status, body) = call(state(&[]), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Unknown search type: videos");
    }
}
