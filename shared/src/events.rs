use aws_sdk_dynamodb::types::AttributeValue;
use chrono::{DateTime, SecondsFormat, Utc};
use lambda_http::{Body, Response};

use crate::error::ApiError;
use crate::members::require_member;
use crate::response::{created, ok, parse_body, required};
use crate::s3::resolve_image;
use crate::store::{
    self, get_string, get_string_or_default, get_string_set, Item, Update, EVENTS_PK,
};
use crate::types::{CommunityEvent, CreateEventRequest, UpdateEventRequest};
use crate::AppState;

const EVENT_PREFIX: &str = "EVENT#";

impl CommunityEvent {
    pub fn to_item(&self) -> Result<Item, ApiError> {
        let mut item = store::keyed(EVENTS_PK, event_sk(&self.event_id));
        item.insert("event_id".to_string(), store::s(&self.event_id));
        item.insert("title".to_string(), store::s(&self.title));
        item.insert("description".to_string(), store::s(&self.description));
        item.insert("location".to_string(), store::s(&self.location));
        item.insert("starts_at".to_string(), store::s(&self.starts_at));
        item.insert("created_by".to_string(), store::s(&self.created_by));
        item.insert("created_at".to_string(), store::s(&self.created_at));
        if let Some(attendees) = store::string_set(&self.attendees) {
            item.insert("attendees".to_string(), attendees);
        }
        store::put_opt(&mut item, "ends_at", &self.ends_at);
        store::put_opt(&mut item, "image_url", &self.image_url);
        Ok(item)
    }

    pub fn from_item(item: &Item) -> Option<Self> {
        Some(Self {
            event_id: store::id_from_sk(item)?,
            title: get_string_or_default(item, "title"),
            description: get_string_or_default(item, "description"),
            location: get_string_or_default(item, "location"),
            starts_at: get_string_or_default(item, "starts_at"),
            ends_at: get_string(item, "ends_at"),
            image_url: get_string(item, "image_url"),
            created_by: get_string_or_default(item, "created_by"),
            created_at: get_string_or_default(item, "created_at"),
            attendees: get_string_set(item, "attendees"),
        })
    }

    fn start(&self) -> Option<DateTime<Utc>> {
        parse_time(&self.starts_at)
    }

    pub fn is_upcoming(&self, now: DateTime<Utc>) -> bool {
        let end = self.ends_at.as_deref().and_then(parse_time).or_else(|| self.start());
        end.map_or(true, |end| end >= now)
    }

    pub fn is_attending(&self, user_id: &str) -> bool {
        self.attendees.iter().any(|id| id == user_id)
    }
}

fn event_sk(event_id: &str) -> String {
    format!("{}{}", EVENT_PREFIX, event_id)
}

fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn utc_string(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Both timestamps must be RFC 3339 and the end may not precede the start.
/// Returns them rewritten in UTC.
pub fn validate_schedule(
    starts_at: &str,
    ends_at: Option<&str>,
) -> Result<(String, Option<String>), ApiError> {
    let start = parse_time(starts_at)
        .ok_or_else(|| ApiError::bad_request("starts_at must be an RFC 3339 timestamp"))?;
    let end = match ends_at {
        Some(end) => {
            let end = parse_time(end)
                .ok_or_else(|| ApiError::bad_request("ends_at must be an RFC 3339 timestamp"))?;
            if end < start {
                return Err(ApiError::bad_request("ends_at must not be before starts_at"));
            }
            Some(utc_string(end))
        }
        None => None,
    };
    Ok((utc_string(start), end))
}

/// Upcoming events soonest first; past events (when included) follow, most recent first.
pub fn order_events(
    mut events: Vec<CommunityEvent>,
    include_past: bool,
    now: DateTime<Utc>,
) -> Vec<CommunityEvent> {
    events.sort_by_key(|e| e.start());
    let (upcoming, mut past): (Vec<_>, Vec<_>) =
        events.into_iter().partition(|e| e.is_upcoming(now));

    if !include_past {
        return upcoming;
    }
    past.reverse();
    upcoming.into_iter().chain(past).collect()
}

async fn load_event(state: &AppState, event_id: &str) -> Result<CommunityEvent, ApiError> {
    store::get_item(&state.dynamo_client, state.table(), EVENTS_PK, &event_sk(event_id))
        .await?
        .as_ref()
        .and_then(CommunityEvent::from_item)
        .ok_or_else(|| ApiError::not_found("Event not found"))
}

async fn save_event(state: &AppState, event: &CommunityEvent) -> Result<(), ApiError> {
    store::put_item(&state.dynamo_client, state.table(), event.to_item()?).await
}

async fn update_event_item(
    state: &AppState,
    event_id: &str,
    update: Update,
) -> Result<CommunityEvent, ApiError> {
    store::update_item(
        &state.dynamo_client,
        state.table(),
        EVENTS_PK,
        &event_sk(event_id),
        update,
    )
    .await?
    .as_ref()
    .and_then(CommunityEvent::from_item)
    .ok_or_else(|| ApiError::not_found("Event not found"))
}

/// Rewrites the editable fields only, leaving `attendees` to concurrent
/// registrations.
fn details_update(event: &CommunityEvent) -> Update {
    let fields = [
        ("title", Some(&event.title)),
        ("description", Some(&event.description)),
        ("location", Some(&event.location)),
        ("starts_at", Some(&event.starts_at)),
        ("ends_at", event.ends_at.as_ref()),
        ("image_url", event.image_url.as_ref()),
    ];

    let mut update = Update::default();
    let mut set = Vec::new();
    let mut remove = Vec::new();
    for (field, value) in fields {
        let name = format!("#{}", field);
        update = update.name(&name, field);
        match value {
            Some(value) => {
                update = update.value(&format!(":{}", field), store::s(value));
                set.push(format!("{} = :{}", name, field));
            }
            None => remove.push(name),
        }
    }

    update.expression = format!("SET {}", set.join(", "));
    if !remove.is_empty() {
        update.expression.push_str(&format!(" REMOVE {}", remove.join(", ")));
    }
    update.condition("attribute_exists(PK)")
}

fn attendee_added(user_id: &str) -> Update {
    Update::new("ADD attendees :user")
        .value(":user", AttributeValue::Ss(vec![user_id.to_string()]))
        .condition("attribute_exists(PK)")
}

pub async fn all_events(state: &AppState) -> Result<Vec<CommunityEvent>, ApiError> {
    let items = store::query_prefix(
        &state.dynamo_client,
        state.table(),
        EVENTS_PK,
        EVENT_PREFIX,
        false,
        None,
    )
    .await?;
    Ok(items.iter().filter_map(CommunityEvent::from_item).collect())
}

pub async fn list_events(state: &AppState, past: Option<&str>) -> Result<Response<Body>, ApiError> {
    let include_past = matches!(past.map(str::trim), Some("true") | Some("1"));
    let events = order_events(all_events(state).await?, include_past, Utc::now());
    ok(&events)
}

pub async fn get_event(state: &AppState, event_id: &str) -> Result<Response<Body>, ApiError> {
    ok(&load_event(state, event_id).await?)
}

pub async fn create_event(
    state: &AppState,
    admin_id: &str,
    body: &[u8],
) -> Result<Response<Body>, ApiError> {
    let req: CreateEventRequest = parse_body(body)?;
    let title = required(req.title.as_deref(), "title")?;
    let starts_at = required(req.starts_at.as_deref(), "starts_at")?;
    let ends_at = req.ends_at.map(|e| e.trim().to_string()).filter(|e| !e.is_empty());
    let (starts_at, ends_at) = validate_schedule(&starts_at, ends_at.as_deref())?;

    let image_url = resolve_image(state, "events", req.image.as_ref(), req.image_url).await?;
    let event = CommunityEvent {
        event_id: uuid::Uuid::new_v4().to_string(),
        title,
        description: req.description.trim().to_string(),
        location: req.location.trim().to_string(),
        starts_at,
        ends_at,
        image_url,
        created_by: admin_id.to_string(),
        created_at: Utc::now().to_rfc3339(),
        attendees: Vec::new(),
    };
    save_event(state, &event).await?;

    tracing::info!("Event {} created by {}", event.event_id, admin_id);
    created(&event)
}

pub async fn update_event(
    state: &AppState,
    event_id: &str,
    body: &[u8],
) -> Result<Response<Body>, ApiError> {
    let req: UpdateEventRequest = parse_body(body)?;
    let mut event = load_event(state, event_id).await?;

    if let Some(title) = req.title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) {
        event.title = title;
    }
    if let Some(description) = req.description {
        event.description = description.trim().to_string();
    }
    if let Some(location) = req.location {
        event.location = location.trim().to_string();
    }
    if let Some(starts_at) = req.starts_at {
        event.starts_at = starts_at.trim().to_string();
    }
    if let Some(ends_at) = req.ends_at {
        event.ends_at = Some(ends_at.trim().to_string()).filter(|e| !e.is_empty());
    }
    if let Some(image_url) = req.image_url {
        event.image_url = Some(image_url.trim().to_string()).filter(|u| !u.is_empty());
    }
    let (starts_at, ends_at) = validate_schedule(&event.starts_at, event.ends_at.as_deref())?;
    event.starts_at = starts_at;
    event.ends_at = ends_at;

    let event = update_event_item(state, event_id, details_update(&event)).await?;
    tracing::info!("Event {} updated", event_id);
    ok(&event)
}

pub async fn delete_event(state: &AppState, event_id: &str) -> Result<Response<Body>, ApiError> {
    load_event(state, event_id).await?;
    store::delete_item(&state.dynamo_client, state.table(), EVENTS_PK, &event_sk(event_id)).await?;
    tracing::info!("Event {} deleted", event_id);
    ok(&serde_json::json!({ "event_id": event_id }))
}

/// Members only; registering twice is a no-op.
pub async fn register(
    state: &AppState,
    user_id: &str,
    event_id: &str,
) -> Result<Response<Body>, ApiError> {
    require_member(state, user_id).await?;
    let event = load_event(state, event_id).await?;
    if event.is_attending(user_id) {
        return ok(&event);
    }

    let event = update_event_item(state, event_id, attendee_added(user_id)).await?;
    tracing::info!("{} registered for event {}", user_id, event_id);
    ok(&event)
}
