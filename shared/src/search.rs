use lambda_http::{Body, Response};
use serde::Serialize;

use crate::blogs::all_blogs;
use crate::error::ApiError;
use crate::events::all_events;
use crate::posts::all_posts;
use crate::response::{ok, required};
use crate::scorer::CROP_POOL;
use crate::AppState;

const SNIPPET_CHARS: usize = 160;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchKind {
    Blog,
    Event,
    Post,
    Crop,
}

impl SearchKind {
    /// `?type=` filter; accepts singular or plural.
    pub fn parse_filter(raw: &str) -> Result<Option<Self>, ApiError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "all" => Ok(None),
            "blog" | "blogs" => Ok(Some(SearchKind::Blog)),
            "event" | "events" => Ok(Some(SearchKind::Event)),
            "post" | "posts" => Ok(Some(SearchKind::Post)),
            "crop" | "crops" => Ok(Some(SearchKind::Crop)),
            other => Err(ApiError::bad_request(format!("Unknown search type: {}", other))),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SearchHit {
    #[serde(rename = "type")]
    pub kind: SearchKind,
    pub id: String,
    pub title: String,
    pub snippet: String,
}

/// Case-insensitive substring match against any of `fields`.
pub fn matches(needle: &str, fields: &[&str]) -> bool {
    let needle = needle.to_lowercase();
    fields.iter().any(|f| f.to_lowercase().contains(&needle))
}

fn snippet(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= SNIPPET_CHARS {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(SNIPPET_CHARS).collect();
    format!("{}...", cut.trim_end())
}

fn wants(filter: Option<SearchKind>, kind: SearchKind) -> bool {
    filter.map_or(true, |f| f == kind)
}

pub fn search_crops(query: &str) -> Vec<SearchHit> {
    CROP_POOL
        .iter()
        .filter(|crop| matches(query, &[crop.name]))
        .map(|crop| SearchHit {
            kind: SearchKind::Crop,
            id: crop.name.to_lowercase().replace(' ', "-"),
            title: crop.name.to_string(),
            snippet: format!(
                "Prefers {}-{} mm rainfall and {}-{}% humidity",
                crop.rainfall.min, crop.rainfall.max, crop.humidity.min, crop.humidity.max
            ),
        })
        .collect()
}

pub async fn search(
    state: &AppState,
    query: Option<&str>,
    kind: Option<&str>,
) -> Result<Response<Body>, ApiError> {
    let q = required(query, "q")?;
    let filter = SearchKind::parse_filter(kind.unwrap_or(""))?;
    let mut hits = Vec::new();

    if wants(filter, SearchKind::Blog) {
        for blog in all_blogs(state).await?.into_iter().filter(|b| b.published) {
            let tags = blog.tags.join(" ");
            let summary = blog.summary.as_deref().unwrap_or("");
            if matches(&q, &[&blog.title, summary, &blog.body, &tags]) {
                hits.push(SearchHit {
                    kind: SearchKind::Blog,
                    snippet: snippet(if summary.is_empty() { &blog.body } else { summary }),
                    id: blog.slug,
                    title: blog.title,
                });
            }
        }
    }

    if wants(filter, SearchKind::Event) {
        for event in all_events(state).await? {
            if matches(&q, &[&event.title, &event.description, &event.location]) {
                hits.push(SearchHit {
                    kind: SearchKind::Event,
                    snippet: snippet(&event.description),
                    id: event.event_id,
                    title: event.title,
                });
            }
        }
    }

    if wants(filter, SearchKind::Post) {
        for post in all_posts(state).await? {
            let tags = post.tags.join(" ");
            if matches(&q, &[&post.content, &tags]) {
                hits.push(SearchHit {
                    kind: SearchKind::Post,
                    title: format!("Post by {}", post.author_name),
                    snippet: snippet(&post.content),
                    id: post.post_id,
                });
            }
        }
    }

    if wants(filter, SearchKind::Crop) {
        hits.extend(search_crops(&q));
    }

    tracing::info!("Search '{}' returned {} hits", q, hits.len());
    ok(&hits)
}
