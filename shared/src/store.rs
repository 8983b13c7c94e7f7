//! Single-table DynamoDB access.
//!
//! Every record lives under a `PK`/`SK` pair. Per-user records share the
//! `USER#{id}` partition; community and content collections each get a
//! fixed partition so a single query lists them.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use aws_sdk_dynamodb::types::{AttributeValue, DeleteRequest, ReturnValue, WriteRequest};
use aws_sdk_dynamodb::Client as DynamoClient;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::ApiError;

pub type Item = HashMap<String, AttributeValue>;

pub const MEMBERS_PK: &str = "COMMUNITY#MEMBERS";
pub const JOIN_REQUESTS_PK: &str = "COMMUNITY#JOIN_REQUESTS";
pub const EVENTS_PK: &str = "COMMUNITY#EVENTS";
pub const POSTS_PK: &str = "COMMUNITY#POSTS";
pub const GALLERY_PK: &str = "CONTENT#GALLERY";
pub const BLOGS_PK: &str = "CONTENT#BLOGS";

const BATCH_WRITE_LIMIT: usize = 25;
const BATCH_WRITE_ATTEMPTS: u32 = 5;

pub fn user_pk(user_id: &str) -> String {
    format!("USER#{}", user_id)
}

pub fn post_pk(post_id: &str) -> String {
    format!("POST#{}", post_id)
}

/// Sort key that orders by creation time within a partition.
pub fn timeline_sk(prefix: &str, created_at: &str, id: &str) -> String {
    format!("{}#{}#{}", prefix, created_at, id)
}

pub fn s(value: impl Into<String>) -> AttributeValue {
    AttributeValue::S(value.into())
}

pub fn n(value: impl ToString) -> AttributeValue {
    AttributeValue::N(value.to_string())
}

/// Nested values are stored as JSON strings.
pub fn json<T: Serialize>(value: &T) -> Result<AttributeValue, ApiError> {
    Ok(AttributeValue::S(serde_json::to_string(value)?))
}

/// String set attribute. DynamoDB rejects empty sets, so `None` means omit.
pub fn string_set(values: &[String]) -> Option<AttributeValue> {
    (!values.is_empty()).then(|| AttributeValue::Ss(values.to_vec()))
}

pub fn keyed(pk: impl Into<String>, sk: impl Into<String>) -> Item {
    let mut item = Item::new();
    item.insert("PK".to_string(), s(pk));
    item.insert("SK".to_string(), s(sk));
    item
}

/// Insert an optional string attribute, skipping `None`.
pub fn put_opt(item: &mut Item, key: &str, value: &Option<String>) {
    if let Some(v) = value {
        item.insert(key.to_string(), s(v.clone()));
    }
}

pub fn get_string(item: &Item, key: &str) -> Option<String> {
    item.get(key).and_then(|v| v.as_s().ok()).map(|v| v.to_string())
}

pub fn get_string_or_default(item: &Item, key: &str) -> String {
    get_string(item, key).unwrap_or_default()
}

pub fn get_f64(item: &Item, key: &str) -> Option<f64> {
    item.get(key)
        .and_then(|v| v.as_n().ok())
        .and_then(|v| v.parse::<f64>().ok())
}

pub fn get_u32(item: &Item, key: &str) -> u32 {
    item.get(key)
        .and_then(|v| v.as_n().ok())
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(0)
}

pub fn get_bool(item: &Item, key: &str) -> bool {
    item.get(key)
        .and_then(|v| v.as_bool().ok())
        .copied()
        .unwrap_or(false)
}

/// Members of a string set, sorted. Missing sets read as empty.
pub fn get_string_set(item: &Item, key: &str) -> Vec<String> {
    let mut values = item
        .get(key)
        .and_then(|v| v.as_ss().ok())
        .cloned()
        .unwrap_or_default();
    values.sort();
    values
}

pub fn get_json<T: DeserializeOwned + Default>(item: &Item, key: &str) -> T {
    item.get(key)
        .and_then(|v| v.as_s().ok())
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default()
}

/// Last `#`-separated segment of the sort key, which is always the record id.
pub fn id_from_sk(item: &Item) -> Option<String> {
    get_string(item, "SK").and_then(|sk| sk.rsplit('#').next().map(|id| id.to_string()))
}

pub async fn put_item(client: &DynamoClient, table_name: &str, item: Item) -> Result<(), ApiError> {
    client
        .put_item()
        .table_name(table_name)
        .set_item(Some(item))
        .send()
        .await
        .map_err(|e| ApiError::internal("Failed to save record", e))?;
    Ok(())
}

pub async fn get_item(
    client: &DynamoClient,
    table_name: &str,
    pk: &str,
    sk: &str,
) -> Result<Option<Item>, ApiError> {
    let result = client
        .get_item()
        .table_name(table_name)
        .key("PK", s(pk))
        .key("SK", s(sk))
        .send()
        .await
        .map_err(|e| ApiError::internal("Failed to fetch record", e))?;
    Ok(result.item().cloned())
}

pub async fn delete_item(
    client: &DynamoClient,
    table_name: &str,
    pk: &str,
    sk: &str,
) -> Result<(), ApiError> {
    client
        .delete_item()
        .table_name(table_name)
        .key("PK", s(pk))
        .key("SK", s(sk))
        .send()
        .await
        .map_err(|e| ApiError::internal("Failed to delete record", e))?;
    Ok(())
}

/// One `UpdateItem` call: the update expression, its placeholders and an
/// optional condition.
#[derive(Debug, Clone, Default)]
pub struct Update {
    pub expression: String,
    pub condition: Option<String>,
    pub names: HashMap<String, String>,
    pub values: Item,
}

impl Update {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            ..Default::default()
        }
    }

    pub fn name(mut self, placeholder: &str, attribute: &str) -> Self {
        self.names.insert(placeholder.to_string(), attribute.to_string());
        self
    }

    pub fn value(mut self, placeholder: &str, value: AttributeValue) -> Self {
        self.values.insert(placeholder.to_string(), value);
        self
    }

    pub fn condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }
}

/// Applies `update` and returns the item's new attributes, or `None` when
/// the condition did not hold.
pub async fn update_item(
    client: &DynamoClient,
    table_name: &str,
    pk: &str,
    sk: &str,
    update: Update,
) -> Result<Option<Item>, ApiError> {
    let Update {
        expression,
        condition,
        names,
        values,
    } = update;

    let result = client
        .update_item()
        .table_name(table_name)
        .key("PK", s(pk))
        .key("SK", s(sk))
        .update_expression(expression)
        .set_condition_expression(condition)
        .set_expression_attribute_names((!names.is_empty()).then_some(names))
        .set_expression_attribute_values((!values.is_empty()).then_some(values))
        .return_values(ReturnValue::AllNew)
        .send()
        .await;

    match result {
        Ok(output) => Ok(Some(output.attributes().cloned().unwrap_or_default())),
        Err(e)
            if e.as_service_error()
                .map_or(false, |err| err.is_conditional_check_failed_exception()) =>
        {
            Ok(None)
        }
        Err(e) => Err(ApiError::internal("Failed to update record", e)),
    }
}

/// All items in `pk` whose sort key starts with `sk_prefix`.
///
/// With `limit` set only the first page is read; otherwise pages are
/// followed until the partition is exhausted.
pub async fn query_prefix(
    client: &DynamoClient,
    table_name: &str,
    pk: &str,
    sk_prefix: &str,
    newest_first: bool,
    limit: Option<i32>,
) -> Result<Vec<Item>, ApiError> {
    let mut items = Vec::new();
    let mut start_key: Option<Item> = None;

    loop {
        let result = client
            .query()
            .table_name(table_name)
            .key_condition_expression("PK = :pk AND begins_with(SK, :sk_prefix)")
            .expression_attribute_values(":pk", s(pk))
            .expression_attribute_values(":sk_prefix", s(sk_prefix))
            .scan_index_forward(!newest_first)
            .set_limit(limit)
            .set_exclusive_start_key(start_key.take())
            .send()
            .await
            .map_err(|e| ApiError::internal("Failed to query records", e))?;

        items.extend(result.items().iter().cloned());

        match result.last_evaluated_key() {
            Some(key) if limit.is_none() && !key.is_empty() => start_key = Some(key.clone()),
            _ => break,
        }
    }

    Ok(items)
}

/// Delete every item in `pk` under `sk_prefix`, 25 keys per batch.
pub async fn delete_prefix(
    client: &DynamoClient,
    table_name: &str,
    pk: &str,
    sk_prefix: &str,
) -> Result<usize, ApiError> {
    let items = query_prefix(client, table_name, pk, sk_prefix, false, None).await?;
    let keys: Vec<Item> = items
        .iter()
        .filter_map(|item| {
            let sk = item.get("SK")?.clone();
            let mut key = Item::new();
            key.insert("PK".to_string(), s(pk));
            key.insert("SK".to_string(), sk);
            Some(key)
        })
        .collect();

    for chunk in keys.chunks(BATCH_WRITE_LIMIT) {
        let requests = chunk
            .iter()
            .map(|key| {
                DeleteRequest::builder()
                    .set_key(Some(key.clone()))
                    .build()
                    .map(|req| WriteRequest::builder().delete_request(req).build())
                    .map_err(|e| ApiError::internal("Failed to build delete request", e))
            })
            .collect::<Result<Vec<_>, _>>()?;

        write_batch(requests, |pending| async move {
            let result = client
                .batch_write_item()
                .request_items(table_name, pending)
                .send()
                .await
                .map_err(|e| ApiError::internal("Failed to delete records", e))?;
            Ok(result
                .unprocessed_items()
                .and_then(|unprocessed| unprocessed.get(table_name))
                .cloned()
                .unwrap_or_default())
        })
        .await?;
    }

    Ok(keys.len())
}

fn retry_delay(attempt: u32) -> Duration {
    Duration::from_millis(50 * u64::from(attempt))
}

/// Sends one batch and resends whatever comes back unprocessed, up to
/// `BATCH_WRITE_ATTEMPTS` times. `send` returns the unprocessed requests.
async fn write_batch<F, Fut>(requests: Vec<WriteRequest>, mut send: F) -> Result<(), ApiError>
where
    F: FnMut(Vec<WriteRequest>) -> Fut,
    Fut: Future<Output = Result<Vec<WriteRequest>, ApiError>>,
{
    let mut pending = requests;
    for attempt in 1..=BATCH_WRITE_ATTEMPTS {
        let unprocessed = send(pending).await?;
        if unprocessed.is_empty() {
            return Ok(());
        }
        if attempt == BATCH_WRITE_ATTEMPTS {
            return Err(ApiError::internal(
                "Failed to write records",
                format!(
                    "{} requests still unprocessed after {} attempts",
                    unprocessed.len(),
                    attempt
                ),
            ));
        }
        tracing::warn!(
            "Retrying {} unprocessed requests (attempt {})",
            unprocessed.len(),
            attempt
        );
        tokio::time::sleep(retry_delay(attempt)).await;
        pending = unprocessed;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    fn delete_request(sk: &str) -> WriteRequest {
        let delete = DeleteRequest::builder()
            .set_key(Some(keyed("POST#p1", sk)))
            .build()
            .unwrap();
        WriteRequest::builder().delete_request(delete).build()
    }

    #[test]
    fn keyed_sets_partition_and_sort_key() {
        let item = keyed(user_pk("u1"), timeline_sk("ASSISTANT", "2026-01-01T00:00:00Z", "a1"));
        assert_eq!(get_string(&item, "PK").as_deref(), Some("USER#u1"));
        assert_eq!(
            get_string(&item, "SK").as_deref(),
            Some("ASSISTANT#2026-01-01T00:00:00Z#a1")
        );
        assert_eq!(id_from_sk(&item).as_deref(), Some("a1"));
    }

    #[test]
    fn json_attributes_round_trip_through_strings() {
        let mut item = Item::new();
        item.insert("crops".to_string(), json(&vec!["rice", "maize"]).unwrap());
        let crops: Vec<String> = get_json(&item, "crops");
        assert_eq!(crops, vec!["rice", "maize"]);

        let missing: Vec<String> = get_json(&item, "tags");
        assert!(missing.is_empty());
    }

    #[test]
    fn numeric_getters_tolerate_missing_values() {
        let mut item = Item::new();
        item.insert("score".to_string(), n(0.75));
        item.insert("count".to_string(), n(3));
        assert_eq!(get_f64(&item, "score"), Some(0.75));
        assert_eq!(get_u32(&item, "count"), 3);
        assert_eq!(get_u32(&item, "absent"), 0);
        assert!(!get_bool(&item, "absent"));
    }

    #[test]
    fn put_opt_skips_none() {
        let mut item = Item::new();
        put_opt(&mut item, "phone", &None);
        put_opt(&mut item, "location", &Some("Nashik".to_string()));
        assert!(!item.contains_key("phone"));
        assert_eq!(get_string(&item, "location").as_deref(), Some("Nashik"));
    }

    #[test]
    fn empty_string_sets_are_omitted() {
        assert!(string_set(&[]).is_none());

        let mut item = Item::new();
        let likes = vec!["u2".to_string(), "u1".to_string()];
        item.insert("likes".to_string(), string_set(&likes).unwrap());
        assert_eq!(get_string_set(&item, "likes"), vec!["u1", "u2"]);
        assert!(get_string_set(&item, "attendees").is_empty());
    }

    #[test]
    fn updates_collect_placeholders_and_condition() {
        let update = Update::new("ADD #count :one")
            .name("#count", "comment_count")
            .value(":one", n(1))
            .condition("attribute_exists(PK)");
        assert_eq!(update.expression, "ADD #count :one");
        assert_eq!(update.names.get("#count").map(String::as_str), Some("comment_count"));
        assert_eq!(update.values.get(":one"), Some(&n(1)));
        assert_eq!(update.condition.as_deref(), Some("attribute_exists(PK)"));
    }

    #[tokio::test]
    async fn unprocessed_writes_are_resent_until_drained() {
        let batches = RefCell::new(Vec::new());
        let requests = vec![delete_request("a"), delete_request("b"), delete_request("c")];

        let result = write_batch(requests, |pending| {
            batches.borrow_mut().push(pending.len());
            let left: Vec<WriteRequest> = pending.into_iter().skip(1).collect();
            async move { Ok(left) }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(*batches.borrow(), vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn writes_left_after_the_last_attempt_are_an_error() {
        let attempts = Cell::new(0);
        let err = write_batch(vec![delete_request("a")], |pending| {
            attempts.set(attempts.get() + 1);
            async move { Ok(pending) }
        })
        .await
        .unwrap_err();

        assert_eq!(attempts.get(), BATCH_WRITE_ATTEMPTS);
        assert!(matches!(err, ApiError::Internal(m) if m.contains("1 requests still unprocessed")));
    }

    #[tokio::test]
    async fn send_failures_stop_the_batch() {
        let attempts = Cell::new(0);
        let err = write_batch(vec![delete_request("a")], |_pending| {
            attempts.set(attempts.get() + 1);
            async { Err(ApiError::Internal("Failed to delete records: throttled".to_string())) }
        })
        .await
        .unwrap_err();

        assert_eq!(attempts.get(), 1);
        assert_eq!(err.to_string(), "Failed to delete records: throttled");
    }
}
