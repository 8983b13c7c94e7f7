use lambda_http::{Body, Response};

use crate::error::ApiError;
use crate::response::ok;
use crate::store::{self, get_string, get_string_or_default, Item, MEMBERS_PK};
use crate::types::CommunityMember;
use crate::users;
use crate::AppState;

const MEMBER_PREFIX: &str = "MEMBER#";

impl CommunityMember {
    pub fn to_item(&self) -> Item {
        let mut item = store::keyed(MEMBERS_PK, format!("{}{}", MEMBER_PREFIX, self.user_id));
        item.insert("user_id".to_string(), store::s(&self.user_id));
        item.insert("name".to_string(), store::s(&self.name));
        item.insert("email".to_string(), store::s(&self.email));
        item.insert("role".to_string(), store::s(self.role.as_str()));
        item.insert("joined_at".to_string(), store::s(&self.joined_at));
        item
    }

    pub fn from_item(item: &Item) -> Option<Self> {
        Some(Self {
            user_id: store::id_from_sk(item)?,
            name: get_string_or_default(item, "name"),
            email: get_string_or_default(item, "email"),
            role: get_string(item, "role")
                .and_then(|r| r.parse().ok())
                .unwrap_or_default(),
            joined_at: get_string_or_default(item, "joined_at"),
        })
    }
}

pub async fn is_member(state: &AppState, user_id: &str) -> Result<bool, ApiError> {
    let sk = format!("{}{}", MEMBER_PREFIX, user_id);
    Ok(store::get_item(&state.dynamo_client, state.table(), MEMBERS_PK, &sk)
        .await?
        .is_some())
}

/// Community members and admins pass; everyone else gets a 403.
pub async fn require_member(state: &AppState, user_id: &str) -> Result<(), ApiError> {
    if is_member(state, user_id).await? {
        return Ok(());
    }
    match users::find_user(state, user_id).await? {
        Some(user) if user.is_admin() => Ok(()),
        _ => Err(ApiError::Forbidden("Community membership required".to_string())),
    }
}

pub async fn add_member(state: &AppState, member: &CommunityMember) -> Result<(), ApiError> {
    store::put_item(&state.dynamo_client, state.table(), member.to_item()).await?;
    tracing::info!("Added community member {}", member.user_id);
    Ok(())
}

pub async fn list_members(state: &AppState) -> Result<Response<Body>, ApiError> {
    let items = store::query_prefix(
        &state.dynamo_client,
        state.table(),
        MEMBERS_PK,
        MEMBER_PREFIX,
        false,
        None,
    )
    .await?;

    let mut members: Vec<CommunityMember> =
        items.iter().filter_map(CommunityMember::from_item).collect();
    members.sort_by(|a, b| a.joined_at.cmp(&b.joined_at));
    ok(&members)
}
