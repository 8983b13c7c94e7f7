use lambda_http::{Body, Response};

use crate::error::ApiError;
use crate::response::{limit_param, ok};
use crate::store::{self, get_string, get_string_or_default, Item};
use crate::types::{Interaction, InteractionKind};
use crate::AppState;

const INTERACTION_PREFIX: &str = "INTERACTION";
const DEFAULT_ACTIVITY_LIMIT: i32 = 50;
const MAX_ACTIVITY_LIMIT: i32 = 200;

impl Interaction {
    pub fn new(user_id: &str, kind: InteractionKind, summary: impl Into<String>) -> Self {
        Self {
            interaction_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            kind,
            summary: summary.into(),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn to_item(&self) -> Item {
        let mut item = store::keyed(
            store::user_pk(&self.user_id),
            store::timeline_sk(INTERACTION_PREFIX, &self.created_at, &self.interaction_id),
        );
        item.insert("user_id".to_string(), store::s(&self.user_id));
        item.insert("kind".to_string(), store::s(self.kind.as_str()));
        item.insert("summary".to_string(), store::s(&self.summary));
        item.insert("created_at".to_string(), store::s(&self.created_at));
        item
    }

    pub fn from_item(item: &Item) -> Option<Self> {
        Some(Self {
            interaction_id: store::id_from_sk(item)?,
            user_id: get_string_or_default(item, "user_id"),
            kind: get_string(item, "kind")?.parse().ok()?,
            summary: get_string_or_default(item, "summary"),
            created_at: get_string_or_default(item, "created_at"),
        })
    }
}

/// Activity log write. Failures are logged and swallowed so the caller's
/// response is never affected.
pub async fn record_interaction(
    state: &AppState,
    user_id: &str,
    kind: InteractionKind,
    summary: impl Into<String>,
) {
    let interaction = Interaction::new(user_id, kind, summary);
    let result = store::put_item(&state.dynamo_client, state.table(), interaction.to_item()).await;
    if let Err(e) = result {
        tracing::warn!(
            "Failed to record {} interaction for {}: {}",
            kind.as_str(),
            user_id,
            e
        );
    }
}

pub async fn list_interactions(
    state: &AppState,
    user_id: &str,
    limit: i32,
) -> Result<Vec<Interaction>, ApiError> {
    let items = store::query_prefix(
        &state.dynamo_client,
        state.table(),
        &store::user_pk(user_id),
        &format!("{}#", INTERACTION_PREFIX),
        true,
        Some(limit),
    )
    .await?;
    Ok(items.iter().filter_map(Interaction::from_item).collect())
}

/// Caller's activity feed, newest first.
pub async fn activity(
    state: &AppState,
    user_id: &str,
    limit: Option<&str>,
) -> Result<Response<Body>, ApiError> {
    let limit = limit_param(limit, DEFAULT_ACTIVITY_LIMIT, MAX_ACTIVITY_LIMIT);
    ok(&list_interactions(state, user_id, limit).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interactions_live_on_the_user_timeline() {
        let interaction = Interaction::new("u1", InteractionKind::Payment, "Paid order_1");
        let item = interaction.to_item();

        let sk = get_string(&item, "SK").unwrap();
        assert!(sk.starts_with("INTERACTION#"));
        assert!(sk.ends_with(&interaction.interaction_id));

        let back = Interaction::from_item(&item).unwrap();
        assert_eq!(back.kind, InteractionKind::Payment);
        assert_eq!(back.summary, "Paid order_1");
    }

    #[test]
    fn unknown_kinds_are_skipped() {
        let mut item = Interaction::new("u1", InteractionKind::Assistant, "x").to_item();
        item.insert("kind".to_string(), store::s("telepathy"));
        assert!(Interaction::from_item(&item).is_none());
    }
}
