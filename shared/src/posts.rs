use aws_sdk_dynamodb::types::AttributeValue;
use lambda_http::{Body, Response};

use crate::error::ApiError;
use crate::members::require_member;
use crate::response::{created, ok, parse_body, required};
use crate::s3::resolve_image;
use crate::store::{
    self, get_json, get_string, get_string_or_default, get_string_set, get_u32, Item, Update,
    POSTS_PK,
};
use crate::types::{CommunityPost, CreateCommentRequest, CreatePostRequest, PostComment};
use crate::users::find_user;
use crate::AppState;

const POST_PREFIX: &str = "POST#";
const COMMENT_PREFIX: &str = "COMMENT";
const MAX_POST_CHARS: usize = 5000;
const MAX_COMMENT_CHARS: usize = 1000;

impl CommunityPost {
    pub fn to_item(&self) -> Result<Item, ApiError> {
        let mut item = store::keyed(POSTS_PK, post_sk(&self.post_id));
        item.insert("post_id".to_string(), store::s(&self.post_id));
        item.insert("author_id".to_string(), store::s(&self.author_id));
        item.insert("author_name".to_string(), store::s(&self.author_name));
        item.insert("content".to_string(), store::s(&self.content));
        item.insert("tags".to_string(), store::json(&self.tags)?);
        if let Some(likes) = store::string_set(&self.likes) {
            item.insert("likes".to_string(), likes);
        }
        item.insert("comment_count".to_string(), store::n(self.comment_count));
        item.insert("created_at".to_string(), store::s(&self.created_at));
        store::put_opt(&mut item, "image_url", &self.image_url);
        Ok(item)
    }

    pub fn from_item(item: &Item) -> Option<Self> {
        Some(Self {
            post_id: store::id_from_sk(item)?,
            author_id: get_string_or_default(item, "author_id"),
            author_name: get_string_or_default(item, "author_name"),
            content: get_string_or_default(item, "content"),
            image_url: get_string(item, "image_url"),
            tags: get_json(item, "tags"),
            likes: get_string_set(item, "likes"),
            comment_count: get_u32(item, "comment_count"),
            created_at: get_string_or_default(item, "created_at"),
        })
    }

    pub fn is_liked_by(&self, user_id: &str) -> bool {
        self.likes.iter().any(|id| id == user_id)
    }
}

fn post_sk(post_id: &str) -> String {
    format!("{}{}", POST_PREFIX, post_id)
}

/// Adds or removes one user in the `likes` set without touching anyone else's like.
fn like_update(user_id: &str, like: bool) -> Update {
    let action = if like { "ADD" } else { "DELETE" };
    Update::new(format!("{} likes :user", action))
        .value(":user", AttributeValue::Ss(vec![user_id.to_string()]))
        .condition("attribute_exists(PK)")
}

fn comment_added() -> Update {
    Update::new("ADD comment_count :one")
        .value(":one", store::n(1))
        .condition("attribute_exists(PK)")
}

impl PostComment {
    pub fn to_item(&self) -> Item {
        let mut item = store::keyed(
            store::post_pk(&self.post_id),
            store::timeline_sk(COMMENT_PREFIX, &self.created_at, &self.comment_id),
        );
        item.insert("post_id".to_string(), store::s(&self.post_id));
        item.insert("author_id".to_string(), store::s(&self.author_id));
        item.insert("author_name".to_string(), store::s(&self.author_name));
        item.insert("text".to_string(), store::s(&self.text));
        item.insert("created_at".to_string(), store::s(&self.created_at));
        item
    }

    pub fn from_item(item: &Item) -> Option<Self> {
        Some(Self {
            comment_id: store::id_from_sk(item)?,
            post_id: get_string_or_default(item, "post_id"),
            author_id: get_string_or_default(item, "author_id"),
            author_name: get_string_or_default(item, "author_name"),
            text: get_string_or_default(item, "text"),
            created_at: get_string_or_default(item, "created_at"),
        })
    }
}

fn check_length(field: &str, value: &str, max: usize) -> Result<(), ApiError> {
    if value.chars().count() > max {
        return Err(ApiError::bad_request(format!(
            "{} must be at most {} characters",
            field, max
        )));
    }
    Ok(())
}

fn clean_tags(tags: Vec<String>) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.trim().trim_start_matches('#').to_lowercase();
        if !tag.is_empty() && !cleaned.contains(&tag) {
            cleaned.push(tag);
        }
    }
    cleaned
}

async fn author_name(state: &AppState, user_id: &str) -> Result<String, ApiError> {
    Ok(find_user(state, user_id)
        .await?
        .map(|u| u.name)
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "Community member".to_string()))
}

pub async fn load_post(state: &AppState, post_id: &str) -> Result<CommunityPost, ApiError> {
    store::get_item(&state.dynamo_client, state.table(), POSTS_PK, &post_sk(post_id))
        .await?
        .as_ref()
        .and_then(CommunityPost::from_item)
        .ok_or_else(|| ApiError::not_found("Post not found"))
}

async fn save_post(state: &AppState, post: &CommunityPost) -> Result<(), ApiError> {
    store::put_item(&state.dynamo_client, state.table(), post.to_item()?).await
}

async fn update_post(
    state: &AppState,
    post_id: &str,
    update: Update,
) -> Result<CommunityPost, ApiError> {
    store::update_item(
        &state.dynamo_client,
        state.table(),
        POSTS_PK,
        &post_sk(post_id),
        update,
    )
    .await?
    .as_ref()
    .and_then(CommunityPost::from_item)
    .ok_or_else(|| ApiError::not_found("Post not found"))
}

pub async fn all_posts(state: &AppState) -> Result<Vec<CommunityPost>, ApiError> {
    let items = store::query_prefix(
        &state.dynamo_client,
        state.table(),
        POSTS_PK,
        POST_PREFIX,
        false,
        None,
    )
    .await?;
    let mut posts: Vec<CommunityPost> = items.iter().filter_map(CommunityPost::from_item).collect();
    posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(posts)
}

pub async fn list_posts(state: &AppState) -> Result<Response<Body>, ApiError> {
    ok(&all_posts(state).await?)
}

pub async fn get_post(state: &AppState, post_id: &str) -> Result<Response<Body>, ApiError> {
    ok(&load_post(state, post_id).await?)
}

pub async fn create_post(
    state: &AppState,
    user_id: &str,
    body: &[u8],
) -> Result<Response<Body>, ApiError> {
    let req: CreatePostRequest = parse_body(body)?;
    let content = required(req.content.as_deref(), "content")?;
    check_length("content", &content, MAX_POST_CHARS)?;
    require_member(state, user_id).await?;

    let image_url = resolve_image(state, "posts", req.image.as_ref(), req.image_url).await?;
    let post = CommunityPost {
        post_id: uuid::Uuid::new_v4().to_string(),
        author_id: user_id.to_string(),
        author_name: author_name(state, user_id).await?,
        content,
        image_url,
        tags: clean_tags(req.tags),
        likes: Vec::new(),
        comment_count: 0,
        created_at: chrono::Utc::now().to_rfc3339(),
    };
    save_post(state, &post).await?;

    tracing::info!("Post {} created by {}", post.post_id, user_id);
    created(&post)
}

/// Author or admin only. Comments go with the post.
pub async fn delete_post(
    state: &AppState,
    user_id: &str,
    post_id: &str,
) -> Result<Response<Body>, ApiError> {
    let post = load_post(state, post_id).await?;
    if post.author_id != user_id {
        let is_admin = find_user(state, user_id)
            .await?
            .map(|u| u.is_admin())
            .unwrap_or(false);
        if !is_admin {
            return Err(ApiError::Forbidden(
                "Only the author or an admin can delete this post".to_string(),
            ));
        }
    }

    let comments = store::delete_prefix(
        &state.dynamo_client,
        state.table(),
        &store::post_pk(post_id),
        &format!("{}#", COMMENT_PREFIX),
    )
    .await?;
    store::delete_item(&state.dynamo_client, state.table(), POSTS_PK, &post_sk(post_id)).await?;

    tracing::info!("Post {} deleted by {} with {} comments", post_id, user_id, comments);
    ok(&serde_json::json!({ "post_id": post_id, "deleted_comments": comments }))
}

pub async fn toggle_like(
    state: &AppState,
    user_id: &str,
    post_id: &str,
) -> Result<Response<Body>, ApiError> {
    let liked = !load_post(state, post_id).await?.is_liked_by(user_id);
    let post = update_post(state, post_id, like_update(user_id, liked)).await?;
    ok(&serde_json::json!({ "liked": liked, "likes": post.likes.len() }))
}

pub async fn list_comments(state: &AppState, post_id: &str) -> Result<Response<Body>, ApiError> {
    load_post(state, post_id).await?;
    let items = store::query_prefix(
        &state.dynamo_client,
        state.table(),
        &store::post_pk(post_id),
        &format!("{}#", COMMENT_PREFIX),
        false,
        None,
    )
    .await?;
    let comments: Vec<PostComment> = items.iter().filter_map(PostComment::from_item).collect();
    ok(&comments)
}

pub async fn add_comment(
    state: &AppState,
    user_id: &str,
    post_id: &str,
    body: &[u8],
) -> Result<Response<Body>, ApiError> {
    let req: CreateCommentRequest = parse_body(body)?;
    let text = required(req.text.as_deref(), "text")?;
    check_length("text", &text, MAX_COMMENT_CHARS)?;

    load_post(state, post_id).await?;
    let comment = PostComment {
        comment_id: uuid::Uuid::new_v4().to_string(),
        post_id: post_id.to_string(),
        author_id: user_id.to_string(),
        author_name: author_name(state, user_id).await?,
        text,
        created_at: chrono::Utc::now().to_rfc3339(),
    };
    store::put_item(&state.dynamo_client, state.table(), comment.to_item()).await?;

    update_post(state, post_id, comment_added()).await?;

    created(&comment)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post() -> CommunityPost {
        CommunityPost {
            post_id: "p1".to_string(),
            author_id: "u1".to_string(),
            author_name: "Asha".to_string(),
            content: "Drip irrigation halved my water bill".to_string(),
            image_url: None,
            tags: vec!["irrigation".to_string()],
            likes: Vec::new(),
            comment_count: 2,
            created_at: "2026-04-01T09:00:00+00:00".to_string(),
        }
    }

    #[test]
    fn likes_change_one_member_of_the_set() {
        let like = like_update("u2", true);
        assert_eq!(like.expression, "ADD likes :user");
        assert_eq!(
            like.values.get(":user"),
            Some(&AttributeValue::Ss(vec!["u2".to_string()]))
        );
        assert_eq!(like.condition.as_deref(), Some("attribute_exists(PK)"));

        assert_eq!(like_update("u2", false).expression, "DELETE likes :user");
    }

    #[test]
    fn comments_increment_in_place() {
        let update = comment_added();
        assert_eq!(update.expression, "ADD comment_count :one");
        assert_eq!(update.values.get(":one"), Some(&store::n(1)));
    }

    #[test]
    fn posts_keep_counts_and_likes_through_storage() {
        let mut p = post();
        let item = p.to_item().unwrap();
        assert!(!item.contains_key("likes"));

        p.likes = vec!["u3".to_string(), "u2".to_string()];
        let back = CommunityPost::from_item(&p.to_item().unwrap()).unwrap();
        assert_eq!(back.post_id, "p1");
        assert_eq!(back.comment_count, 2);
        assert_eq!(back.likes, vec!["u2", "u3"]);
        assert!(back.is_liked_by("u3"));
        assert!(!back.is_liked_by("u1"));
    }

    #[test]
    fn comments_live_under_their_post() {
        let comment = PostComment {
            comment_id: "c1".to_string(),
            post_id: "p1".to_string(),
            author_id: "u2".to_string(),
            author_name: "Ravi".to_string(),
            text: "Which emitters?".to_string(),
            created_at: "2026-04-01T10:00:00+00:00".to_string(),
        };
        let item = comment.to_item();
        assert_eq!(get_string(&item, "PK").as_deref(), Some("POST#p1"));
        assert!(get_string(&item, "SK").unwrap().starts_with("COMMENT#2026-04-01"));
        assert_eq!(PostComment::from_item(&item).unwrap().comment_id, "c1");
    }

    #[test]
    fn tags_are_normalised_and_deduplicated() {
        let tags = clean_tags(vec![
            "#Organic".to_string(),
            "organic".to_string(),
            " ".to_string(),
            "Millets".to_string(),
        ]);
        assert_eq!(tags, vec!["organic", "millets"]);
    }

    #[test]
    fn overlong_text_is_rejected() {
        assert!(check_length("text", &"a".repeat(MAX_COMMENT_CHARS), MAX_COMMENT_CHARS).is_ok());
        let overlong = "a".repeat(MAX_COMMENT_CHARS + 1);
        assert!(check_length("text", &overlong, MAX_COMMENT_CHARS).is_err());
    }
}
