//! Crop and soil recommendations.
//!
//! Both endpoints validate the numeric inputs, collect every crop already
//! recommended to the caller, ask Gemini for a JSON list and fall back to the
//! seeded scorer in [`crate::scorer`] when Gemini is missing, fails, or
//! answers with something unusable.

use std::collections::HashSet;

use lambda_http::{Body, Response};
use serde::Deserialize;
use serde_json::Value;

use crate::error::ApiError;
use crate::gemini::{GeminiAnswer, GeminiError};
use crate::interactions::record_interaction;
use crate::response::{created, ok, parse_body};
use crate::scorer::{self, FallbackQuery, Mode};
use crate::store::{self, get_json, get_string, get_string_or_default, Item};
use crate::types::{
    RecommendationKind, RecommendationRecord, RecommendationRequest, RecommendationSource,
    RecommendedCrop, SoilInputs,
};
use crate::AppState;

// ========== INPUT VALIDATION ==========

/// Non-negative finite number from a JSON number or numeric string.
pub fn parse_number(field: &str, value: Option<&Value>) -> Result<f64, ApiError> {
    let number = match value {
        None | Some(Value::Null) => {
            return Err(ApiError::bad_request(format!(
                "Missing required field: {}",
                field
            )))
        }
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    }
    .ok_or_else(|| ApiError::bad_request(format!("{} must be a number", field)))?;

    if !number.is_finite() {
        return Err(ApiError::bad_request(format!("{} must be a finite number", field)));
    }
    if number < 0.0 {
        return Err(ApiError::bad_request(format!("{} must not be negative", field)));
    }
    Ok(number)
}

pub fn validate_inputs(req: &RecommendationRequest) -> Result<SoilInputs, ApiError> {
    let inputs = SoilInputs {
        n: parse_number("n", req.n.as_ref())?,
        p: parse_number("p", req.p.as_ref())?,
        k: parse_number("k", req.k.as_ref())?,
        rainfall: parse_number("rainfall", req.rainfall.as_ref())?,
        humidity: parse_number("humidity", req.humidity.as_ref())?,
    };
    if inputs.humidity > 100.0 {
        return Err(ApiError::bad_request("humidity must be between 0 and 100"));
    }
    Ok(inputs)
}

pub fn parse_mode(raw: Option<&str>) -> Result<Mode, ApiError> {
    match raw.map(str::trim).filter(|m| !m.is_empty()) {
        None => Ok(Mode::default()),
        Some(m) => m.parse().map_err(ApiError::BadRequest),
    }
}

// ========== LLM OUTPUT ==========

#[derive(Debug, Deserialize)]
struct LlmCrop {
    name: String,
    #[serde(default)]
    reason: String,
    score: Option<f64>,
}

fn strip_code_fences(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Crops from a Gemini answer: code fences stripped, then the outermost
/// JSON array parsed. `None` when there is no parseable array.
pub fn parse_llm_crops(text: &str) -> Option<Vec<RecommendedCrop>> {
    let cleaned = strip_code_fences(text);
    let start = cleaned.find('[')?;
    let end = cleaned.rfind(']')?;
    if end <= start {
        return None;
    }

    let raw: Vec<LlmCrop> = serde_json::from_str(&cleaned[start..=end]).ok()?;
    Some(
        raw.into_iter()
            .filter_map(|crop| {
                let name = crop.name.trim().to_string();
                (!name.is_empty()).then(|| RecommendedCrop {
                    name,
                    score: crop
                        .score
                        .filter(|s| s.is_finite())
                        .map(|s| (s.clamp(0.0, 1.0) * 1000.0).round() / 1000.0)
                        .unwrap_or(0.0),
                    reason: crop.reason.trim().to_string(),
                })
            })
            .collect(),
    )
}

/// Drops previously recommended crops (unless `forget_history`) and
/// duplicates, then truncates to `count`.
pub fn filter_crops(
    crops: Vec<RecommendedCrop>,
    history: &HashSet<String>,
    forget_history: bool,
    count: usize,
) -> Vec<RecommendedCrop> {
    let excluded: HashSet<String> = if forget_history {
        HashSet::new()
    } else {
        history.iter().map(|h| h.trim().to_lowercase()).collect()
    };

    let mut seen = HashSet::new();
    crops
        .into_iter()
        .filter(|crop| {
            let key = crop.name.to_lowercase();
            !excluded.contains(&key) && seen.insert(key)
        })
        .take(count)
        .collect()
}

/// Gemini's list when it parses and leaves at least one usable crop after
/// filtering; otherwise the fallback scorer. `answer` is `None` when Gemini
/// is not configured.
pub fn choose_crops(
    answer: Option<Result<GeminiAnswer, GeminiError>>,
    history: &HashSet<String>,
    query: &FallbackQuery<'_>,
) -> (RecommendationSource, Vec<RecommendedCrop>) {
    let llm_crops = match answer {
        Some(Ok(answer)) => match parse_llm_crops(&answer.text) {
            Some(crops) => filter_crops(crops, history, query.forget_history, query.count),
            None => {
                tracing::warn!("Unparseable Gemini recommendation from {}", answer.model);
                Vec::new()
            }
        },
        Some(Err(e)) => {
            tracing::warn!("Gemini recommendation failed, using fallback: {}", e);
            Vec::new()
        }
        None => Vec::new(),
    };

    if llm_crops.is_empty() {
        (RecommendationSource::Fallback, scorer::recommend(query, history))
    } else {
        (RecommendationSource::Llm, llm_crops)
    }
}

pub fn build_prompt(
    kind: RecommendationKind,
    inputs: &SoilInputs,
    mode: Mode,
    soil_type: Option<&str>,
    excluded: &[String],
    count: usize,
) -> String {
    let mut prompt = format!(
        "Recommend {} crops for a farm with these conditions:\n\
         - Nitrogen (N): {}\n- Phosphorus (P): {}\n- Potassium (K): {}\n\
         - Annual rainfall: {} mm\n- Humidity: {}%\n",
        count, inputs.n, inputs.p, inputs.k, inputs.rainfall, inputs.humidity
    );
    if kind == RecommendationKind::Soil {
        if let Some(soil) = soil_type {
            prompt.push_str(&format!("- Soil type: {}\n", soil));
        }
    }
    prompt.push_str(&format!("Prioritise the '{}' factors.\n", mode));
    if !excluded.is_empty() {
        prompt.push_str(&format!(
            "Do not recommend any of these crops: {}.\n",
            excluded.join(", ")
        ));
    }
    prompt.push_str(
        "Answer with only a JSON array of objects with the keys \"name\", \
         \"reason\" and \"score\" (a number between 0 and 1).",
    );
    prompt
}

// ========== PERSISTENCE ==========

impl RecommendationRecord {
    pub fn to_item(&self) -> Result<Item, ApiError> {
        let mut item = store::keyed(
            store::user_pk(&self.user_id),
            store::timeline_sk(self.kind.sk_prefix(), &self.created_at, &self.recommendation_id),
        );
        item.insert("user_id".to_string(), store::s(&self.user_id));
        item.insert("inputs".to_string(), store::json(&self.inputs)?);
        item.insert("mode".to_string(), store::s(&self.mode));
        item.insert("source".to_string(), store::s(self.source.to_string()));
        item.insert("crops".to_string(), store::json(&self.crops)?);
        item.insert("created_at".to_string(), store::s(&self.created_at));
        store::put_opt(&mut item, "salt", &self.salt);
        store::put_opt(&mut item, "soil_type", &self.soil_type);
        Ok(item)
    }

    pub fn from_item(item: &Item) -> Option<Self> {
        let sk = get_string(item, "SK")?;
        let kind = if sk.starts_with(RecommendationKind::Soil.sk_prefix()) {
            RecommendationKind::Soil
        } else {
            RecommendationKind::Crop
        };
        let inputs = get_string(item, "inputs").and_then(|raw| serde_json::from_str(&raw).ok())?;
        let source = match get_string(item, "source").as_deref() {
            Some("llm") => RecommendationSource::Llm,
            _ => RecommendationSource::Fallback,
        };

        Some(Self {
            recommendation_id: store::id_from_sk(item)?,
            user_id: get_string_or_default(item, "user_id"),
            kind,
            inputs,
            mode: get_string_or_default(item, "mode"),
            salt: get_string(item, "salt"),
            soil_type: get_string(item, "soil_type"),
            source,
            crops: get_json(item, "crops"),
            created_at: get_string_or_default(item, "created_at"),
        })
    }
}

async fn load_records(
    state: &AppState,
    user_id: &str,
) -> Result<Vec<RecommendationRecord>, ApiError> {
    let pk = store::user_pk(user_id);
    let mut records = Vec::new();
    for kind in [RecommendationKind::Crop, RecommendationKind::Soil] {
        let items = store::query_prefix(
            &state.dynamo_client,
            state.table(),
            &pk,
            &format!("{}#", kind.sk_prefix()),
            true,
            None,
        )
        .await?;
        records.extend(items.iter().filter_map(RecommendationRecord::from_item));
    }
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(records)
}

/// Names of every crop previously recommended to the user, crop and soil alike.
pub fn history_names(records: &[RecommendationRecord]) -> HashSet<String> {
    records
        .iter()
        .flat_map(|r| r.crops.iter().map(|c| c.name.clone()))
        .collect()
}

// ========== HANDLERS ==========

pub async fn generate(
    state: &AppState,
    user_id: &str,
    body: &[u8],
) -> Result<Response<Body>, ApiError> {
    recommend(state, user_id, body, RecommendationKind::Crop).await
}

pub async fn soil_based(
    state: &AppState,
    user_id: &str,
    body: &[u8],
) -> Result<Response<Body>, ApiError> {
    recommend(state, user_id, body, RecommendationKind::Soil).await
}

async fn recommend(
    state: &AppState,
    user_id: &str,
    body: &[u8],
    kind: RecommendationKind,
) -> Result<Response<Body>, ApiError> {
    let req: RecommendationRequest = parse_body(body)?;
    let inputs = validate_inputs(&req)?;
    let mode = parse_mode(req.mode.as_deref())?;
    let count = scorer::clamp_count(req.count);
    let salt = req.salt.clone().unwrap_or_default();
    let soil_type = req
        .soil_type
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let history = if req.forget_history {
        HashSet::new()
    } else {
        history_names(&load_records(state, user_id).await?)
    };

    let answer = match state.gemini.as_ref() {
        Some(gemini) => {
            let mut excluded: Vec<String> = history.iter().cloned().collect();
            excluded.sort();
            let prompt = build_prompt(kind, &inputs, mode, soil_type.as_deref(), &excluded, count);
            let language = req.language.as_deref().unwrap_or("en");
            Some(gemini.ask(&prompt, language).await)
        }
        None => None,
    };

    let query = FallbackQuery {
        user_id,
        inputs,
        mode,
        salt: &salt,
        forget_history: req.forget_history,
        count,
    };
    let (source, crops) = choose_crops(answer, &history, &query);

    let record = RecommendationRecord {
        recommendation_id: uuid::Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        kind,
        inputs,
        mode: mode.to_string(),
        salt: req.salt.filter(|s| !s.is_empty()),
        soil_type: if kind == RecommendationKind::Soil { soil_type } else { None },
        source,
        crops,
        created_at: chrono::Utc::now().to_rfc3339(),
    };
    store::put_item(&state.dynamo_client, state.table(), record.to_item()?).await?;

    let names: Vec<&str> = record.crops.iter().map(|c| c.name.as_str()).collect();
    tracing::info!(
        "{} {:?} recommendation for {}: {}",
        source,
        kind,
        user_id,
        names.join(", ")
    );
    record_interaction(
        state,
        user_id,
        kind.interaction(),
        format!("Recommended {} ({})", names.join(", "), source),
    )
    .await;

    created(&record)
}

pub async fn history(state: &AppState, user_id: &str) -> Result<Response<Body>, ApiError> {
    let records = load_records(state, user_id).await?;
    ok(&records)
}
