use lambda_http::{Body, Response};

use crate::error::ApiError;
use crate::response::{ok, parse_body};
use crate::store::{self, get_json, get_string, get_string_or_default, Item};
use crate::types::{Profile, Role, UpdateProfileRequest, User};
use crate::AppState;

impl User {
    pub fn to_item(&self) -> Result<Item, ApiError> {
        let pk = store::user_pk(&self.user_id);
        let mut item = store::keyed(pk.clone(), pk);
        item.insert("user_id".to_string(), store::s(&self.user_id));
        item.insert("name".to_string(), store::s(&self.name));
        item.insert("email".to_string(), store::s(&self.email));
        item.insert("role".to_string(), store::s(self.role.as_str()));
        item.insert("crops".to_string(), store::json(&self.crops)?);
        item.insert("created_at".to_string(), store::s(&self.created_at));
        store::put_opt(&mut item, "phone", &self.phone);
        store::put_opt(&mut item, "location", &self.location);
        store::put_opt(&mut item, "bio", &self.bio);
        store::put_opt(&mut item, "farm_size", &self.farm_size);
        store::put_opt(&mut item, "avatar_url", &self.avatar_url);
        store::put_opt(&mut item, "last_login", &self.last_login);
        Ok(item)
    }

    pub fn from_item(item: &Item) -> Option<Self> {
        let user_id = get_string(item, "user_id").or_else(|| {
            get_string(item, "PK").and_then(|pk| pk.strip_prefix("USER#").map(str::to_string))
        })?;
        Some(Self {
            user_id,
            name: get_string_or_default(item, "name"),
            email: get_string_or_default(item, "email"),
            phone: get_string(item, "phone"),
            role: get_string(item, "role")
                .and_then(|r| r.parse().ok())
                .unwrap_or_default(),
            location: get_string(item, "location"),
            bio: get_string(item, "bio"),
            farm_size: get_string(item, "farm_size"),
            crops: get_json(item, "crops"),
            avatar_url: get_string(item, "avatar_url"),
            created_at: get_string_or_default(item, "created_at"),
            last_login: get_string(item, "last_login"),
        })
    }

    pub fn profile(&self) -> Profile {
        Profile {
            user_id: self.user_id.clone(),
            name: self.name.clone(),
            role: self.role,
            location: self.location.clone(),
            bio: self.bio.clone(),
            farm_size: self.farm_size.clone(),
            crops: self.crops.clone(),
            avatar_url: self.avatar_url.clone(),
            member_since: self.created_at.clone(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Apply the fields present in `req`; blank strings clear optional fields.
    pub fn apply_update(&mut self, req: UpdateProfileRequest) {
        fn optional(value: String) -> Option<String> {
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }

        if let Some(name) = req.name.and_then(optional) {
            self.name = name;
        }
        if let Some(phone) = req.phone {
            self.phone = optional(phone);
        }
        if let Some(location) = req.location {
            self.location = optional(location);
        }
        if let Some(bio) = req.bio {
            self.bio = optional(bio);
        }
        if let Some(farm_size) = req.farm_size {
            self.farm_size = optional(farm_size);
        }
        if let Some(crops) = req.crops {
            self.crops = crops.into_iter().filter_map(optional).collect();
        }
        if let Some(avatar_url) = req.avatar_url {
            self.avatar_url = optional(avatar_url);
        }
    }
}

pub async fn find_user(state: &AppState, user_id: &str) -> Result<Option<User>, ApiError> {
    let pk = store::user_pk(user_id);
    let item = store::get_item(&state.dynamo_client, state.table(), &pk, &pk).await?;
    Ok(item.as_ref().and_then(User::from_item))
}

pub async fn load_user(state: &AppState, user_id: &str) -> Result<User, ApiError> {
    find_user(state, user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

pub async fn require_admin(state: &AppState, user_id: &str) -> Result<User, ApiError> {
    let user = find_user(state, user_id)
        .await?
        .ok_or_else(|| ApiError::Forbidden("Admin access required".to_string()))?;
    if !user.is_admin() {
        tracing::warn!("User {} attempted an admin action", user_id);
        return Err(ApiError::Forbidden("Admin access required".to_string()));
    }
    Ok(user)
}

pub async fn save_user(state: &AppState, user: &User) -> Result<(), ApiError> {
    store::put_item(&state.dynamo_client, state.table(), user.to_item()?).await
}

/// Current user; stamps `last_login`.
pub async fn get_me(state: &AppState, user_id: &str) -> Result<Response<Body>, ApiError> {
    let mut user = load_user(state, user_id).await?;

    let now = chrono::Utc::now().to_rfc3339();
    let pk = store::user_pk(user_id);
    if let Err(e) = state
        .dynamo_client
        .update_item()
        .table_name(state.table())
        .key("PK", store::s(&pk))
        .key("SK", store::s(&pk))
        .update_expression("SET last_login = :login")
        .expression_attribute_values(":login", store::s(&now))
        .send()
        .await
    {
        tracing::warn!("Failed to stamp last_login for {}: {:?}", user_id, e);
    }
    user.last_login = Some(now);

    ok(&user)
}

pub async fn update_me(
    state: &AppState,
    user_id: &str,
    body: &[u8],
) -> Result<Response<Body>, ApiError> {
    let req: UpdateProfileRequest = parse_body(body)?;
    let mut user = load_user(state, user_id).await?;
    user.apply_update(req);
    save_user(state, &user).await?;
    tracing::info!("Updated profile for {}", user_id);
    ok(&user)
}

pub async fn get_profile(state: &AppState, user_id: &str) -> Result<Response<Body>, ApiError> {
    let user = find_user(state, user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Profile not found"))?;
    ok(&user.profile())
}

/// Every user record. Admin only; the caller has already been checked.
pub async fn list_users(state: &AppState) -> Result<Response<Body>, ApiError> {
    let mut users = Vec::new();
    let mut start_key: Option<Item> = None;

    loop {
        let result = state
            .dynamo_client
            .scan()
            .table_name(state.table())
            .filter_expression("begins_with(PK, :user) AND PK = SK")
            .expression_attribute_values(":user", store::s("USER#"))
            .set_exclusive_start_key(start_key.take())
            .send()
            .await
            .map_err(|e| ApiError::internal("Failed to list users", e))?;

        users.extend(result.items().iter().filter_map(User::from_item));

        match result.last_evaluated_key() {
            Some(key) if !key.is_empty() => start_key = Some(key.clone()),
            _ => break,
        }
    }

    users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    ok(&users)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            user_id: "u1".to_string(),
            name: "Asha Patil".to_string(),
            email: "asha@example.com".to_string(),
            phone: None,
            role: Role::Farmer,
            location: Some("Nashik".to_string()),
            bio: None,
            farm_size: Some("4 acres".to_string()),
            crops: vec!["Grapes".to_string(), "Onion".to_string()],
            avatar_url: None,
            created_at: "2026-03-01T10:00:00+00:00".to_string(),
            last_login: None,
        }
    }

    #[test]
    fn item_conversion_keeps_profile_fields() {
        let item = user().to_item().unwrap();
        assert_eq!(get_string(&item, "PK").as_deref(), Some("USER#u1"));
        assert_eq!(get_string(&item, "SK").as_deref(), Some("USER#u1"));
        assert!(!item.contains_key("phone"));

        let back = User::from_item(&item).unwrap();
        assert_eq!(back.name, "Asha Patil");
        assert_eq!(back.role, Role::Farmer);
        assert_eq!(back.crops, vec!["Grapes", "Onion"]);
        assert_eq!(back.farm_size.as_deref(), Some("4 acres"));
    }

    #[test]
    fn legacy_items_fall_back_to_partition_key() {
        let mut item = store::keyed("USER#legacy", "USER#legacy");
        item.insert("role".to_string(), store::s("admin"));
        let user = User::from_item(&item).unwrap();
        assert_eq!(user.user_id, "legacy");
        assert!(user.is_admin());
    }

    #[test]
    fn update_applies_present_fields_and_clears_blanks() {
        let mut u = user();
        u.apply_update(UpdateProfileRequest {
            name: Some("  ".to_string()),
            location: Some("".to_string()),
            bio: Some("Grape grower".to_string()),
            crops: Some(vec!["Grapes".to_string(), " ".to_string()]),
            ..Default::default()
        });
        assert_eq!(u.name, "Asha Patil");
        assert!(u.location.is_none());
        assert_eq!(u.bio.as_deref(), Some("Grape grower"));
        assert_eq!(u.crops, vec!["Grapes"]);
        assert_eq!(u.farm_size.as_deref(), Some("4 acres"));
    }

    #[test]
    fn profile_hides_contact_details() {
        let profile = serde_json::to_value(user().profile()).unwrap();
        assert!(profile.get("email").is_none());
        assert_eq!(profile["member_since"], "2026-03-01T10:00:00+00:00");
    }
}
