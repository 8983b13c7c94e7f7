use lambda_http::{Body, Response};
use serde::Serialize;

use crate::error::ApiError;
use crate::interactions::record_interaction;
use crate::response::{limit_param, ok, parse_body, required};
use crate::store::{self, get_string_or_default, Item};
use crate::types::{AskRequest, AssistantHistory, InteractionKind};
use crate::AppState;

const HISTORY_PREFIX: &str = "ASSISTANT";
const DEFAULT_HISTORY_LIMIT: i32 = 20;
const MAX_HISTORY_LIMIT: i32 = 100;

#[derive(Serialize)]
struct AskResponse<'a> {
    answer: &'a str,
    model: &'a str,
}

impl AssistantHistory {
    pub fn to_item(&self) -> Item {
        let mut item = store::keyed(
            store::user_pk(&self.user_id),
            store::timeline_sk(HISTORY_PREFIX, &self.created_at, &self.entry_id),
        );
        item.insert("user_id".to_string(), store::s(&self.user_id));
        item.insert("question".to_string(), store::s(&self.question));
        item.insert("answer".to_string(), store::s(&self.answer));
        item.insert("language".to_string(), store::s(&self.language));
        item.insert("model".to_string(), store::s(&self.model));
        item.insert("created_at".to_string(), store::s(&self.created_at));
        item
    }

    pub fn from_item(item: &Item) -> Option<Self> {
        Some(Self {
            entry_id: store::id_from_sk(item)?,
            user_id: get_string_or_default(item, "user_id"),
            question: get_string_or_default(item, "question"),
            answer: get_string_or_default(item, "answer"),
            language: get_string_or_default(item, "language"),
            model: get_string_or_default(item, "model"),
            created_at: get_string_or_default(item, "created_at"),
        })
    }
}

fn summarize(question: &str) -> String {
    const MAX_CHARS: usize = 80;
    if question.chars().count() <= MAX_CHARS {
        return question.to_string();
    }
    let cut: String = question.chars().take(MAX_CHARS).collect();
    format!("{}...", cut.trim_end())
}

pub async fn ask(state: &AppState, user_id: &str, body: &[u8]) -> Result<Response<Body>, ApiError> {
    let req: AskRequest = parse_body(body)?;
    let question = required(req.question.as_deref(), "question")?;
    let language = req
        .language
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| "en".to_string());

    let gemini = state.gemini.as_ref().ok_or(ApiError::Unavailable("Gemini"))?;

    tracing::info!("Assistant question from {} ({})", user_id, language);
    let answer = gemini.ask(&question, &language).await?;

    let entry = AssistantHistory {
        entry_id: uuid::Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        question: question.clone(),
        answer: answer.text.clone(),
        language,
        model: answer.model.clone(),
        created_at: chrono::Utc::now().to_rfc3339(),
    };
    store::put_item(&state.dynamo_client, state.table(), entry.to_item()).await?;
    record_interaction(state, user_id, InteractionKind::Assistant, summarize(&question)).await;

    ok(&AskResponse {
        answer: &answer.text,
        model: &answer.model,
    })
}

pub async fn history(
    state: &AppState,
    user_id: &str,
    limit: Option<&str>,
) -> Result<Response<Body>, ApiError> {
    let items = store::query_prefix(
        &state.dynamo_client,
        state.table(),
        &store::user_pk(user_id),
        &format!("{}#", HISTORY_PREFIX),
        true,
        Some(limit_param(limit, DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT)),
    )
    .await?;

    let entries: Vec<AssistantHistory> =
        items.iter().filter_map(AssistantHistory::from_item).collect();
    ok(&entries)
}

pub async fn clear_history(state: &AppState, user_id: &str) -> Result<Response<Body>, ApiError> {
    let deleted = store::delete_prefix(
        &state.dynamo_client,
        state.table(),
        &store::user_pk(user_id),
        &format!("{}#", HISTORY_PREFIX),
    )
    .await?;

    tracing::info!("Cleared {} assistant entries for {}", deleted, user_id);
    ok(&serde_json::json!({ "deleted": deleted }))
}
