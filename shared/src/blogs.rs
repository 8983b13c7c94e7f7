use lambda_http::{Body, Response};

use crate::error::ApiError;
use crate::response::{created, ok, parse_body, required};
use crate::s3::resolve_image;
use crate::store::{self, get_bool, get_json, get_string, get_string_or_default, Item, BLOGS_PK};
use crate::types::{BlogPost, CreateBlogRequest, UpdateBlogRequest};
use crate::AppState;

const BLOG_PREFIX: &str = "BLOG#";

impl BlogPost {
    pub fn to_item(&self) -> Result<Item, ApiError> {
        let mut item = store::keyed(BLOGS_PK, format!("{}{}", BLOG_PREFIX, self.blog_id));
        item.insert("blog_id".to_string(), store::s(&self.blog_id));
        item.insert("title".to_string(), store::s(&self.title));
        item.insert("slug".to_string(), store::s(&self.slug));
        item.insert("body".to_string(), store::s(&self.body));
        item.insert("author".to_string(), store::s(&self.author));
        item.insert("tags".to_string(), store::json(&self.tags)?);
        item.insert(
            "published".to_string(),
            aws_sdk_dynamodb::types::AttributeValue::Bool(self.published),
        );
        item.insert("created_at".to_string(), store::s(&self.created_at));
        store::put_opt(&mut item, "summary", &self.summary);
        store::put_opt(&mut item, "cover_image_url", &self.cover_image_url);
        store::put_opt(&mut item, "updated_at", &self.updated_at);
        Ok(item)
    }

    pub fn from_item(item: &Item) -> Option<Self> {
        Some(Self {
            blog_id: store::id_from_sk(item)?,
            title: get_string_or_default(item, "title"),
            slug: get_string_or_default(item, "slug"),
            summary: get_string(item, "summary"),
            body: get_string_or_default(item, "body"),
            author: get_string_or_default(item, "author"),
            tags: get_json(item, "tags"),
            cover_image_url: get_string(item, "cover_image_url"),
            published: get_bool(item, "published"),
            created_at: get_string_or_default(item, "created_at"),
            updated_at: get_string(item, "updated_at"),
        })
    }
}

/// Lowercase ASCII words joined by single hyphens.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "post".to_string()
    } else {
        slug
    }
}

/// `base`, or `base-2`, `base-3`... when taken by another post.
pub fn unique_slug(base: &str, blog_id: &str, existing: &[BlogPost]) -> String {
    let taken = |slug: &str| existing.iter().any(|b| b.slug == slug && b.blog_id != blog_id);
    if !taken(base) {
        return base.to_string();
    }
    (2..)
        .map(|i| format!("{}-{}", base, i))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| format!("{}-{}", base, blog_id))
}

pub fn find_blog<'a>(blogs: &'a [BlogPost], id_or_slug: &str) -> Option<&'a BlogPost> {
    blogs
        .iter()
        .find(|b| b.blog_id == id_or_slug)
        .or_else(|| blogs.iter().find(|b| b.slug == id_or_slug))
}

pub async fn all_blogs(state: &AppState) -> Result<Vec<BlogPost>, ApiError> {
    let items = store::query_prefix(
        &state.dynamo_client,
        state.table(),
        BLOGS_PK,
        BLOG_PREFIX,
        false,
        None,
    )
    .await?;
    let mut blogs: Vec<BlogPost> = items.iter().filter_map(BlogPost::from_item).collect();
    blogs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(blogs)
}

async fn save_blog(state: &AppState, blog: &BlogPost) -> Result<(), ApiError> {
    store::put_item(&state.dynamo_client, state.table(), blog.to_item()?).await
}

/// Published posts; drafts too when `include_drafts` (admins only).
pub async fn list_blogs(
    state: &AppState,
    include_drafts: bool,
) -> Result<Response<Body>, ApiError> {
    let blogs: Vec<BlogPost> = all_blogs(state)
        .await?
        .into_iter()
        .filter(|b| include_drafts || b.published)
        .collect();
    ok(&blogs)
}

pub async fn get_blog(
    state: &AppState,
    id_or_slug: &str,
    include_drafts: bool,
) -> Result<Response<Body>, ApiError> {
    let blogs = all_blogs(state).await?;
    let blog = find_blog(&blogs, id_or_slug)
        .filter(|b| include_drafts || b.published)
        .ok_or_else(|| ApiError::not_found("Blog post not found"))?;
    ok(blog)
}

pub async fn create_blog(
    state: &AppState,
    admin_id: &str,
    body: &[u8],
) -> Result<Response<Body>, ApiError> {
    let req: CreateBlogRequest = parse_body(body)?;
    let title = required(req.title.as_deref(), "title")?;
    let content = required(req.body.as_deref(), "body")?;

    let blog_id = uuid::Uuid::new_v4().to_string();
    let existing = all_blogs(state).await?;
    let slug = unique_slug(&slugify(&title), &blog_id, &existing);
    let cover_image_url =
        resolve_image(state, "blogs", req.cover_image.as_ref(), req.cover_image_url).await?;

    let blog = BlogPost {
        blog_id,
        title,
        slug,
        summary: req.summary.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
        body: content,
        author: req
            .author
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| "FarmerAI Team".to_string()),
        tags: req
            .tags
            .into_iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect(),
        cover_image_url,
        published: req.published,
        created_at: chrono::Utc::now().to_rfc3339(),
        updated_at: None,
    };
    save_blog(state, &blog).await?;

    tracing::info!("Blog {} ({}) created by {}", blog.blog_id, blog.slug, admin_id);
    created(&blog)
}

pub async fn update_blog(
    state: &AppState,
    blog_id: &str,
    body: &[u8],
) -> Result<Response<Body>, ApiError> {
    let req: UpdateBlogRequest = parse_body(body)?;
    let blogs = all_blogs(state).await?;
    let mut blog = find_blog(&blogs, blog_id)
        .cloned()
        .ok_or_else(|| ApiError::not_found("Blog post not found"))?;

    if let Some(title) = req.title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) {
        if title != blog.title {
            blog.slug = unique_slug(&slugify(&title), &blog.blog_id, &blogs);
            blog.title = title;
        }
    }
    if let Some(summary) = req.summary {
        blog.summary = Some(summary.trim().to_string()).filter(|s| !s.is_empty());
    }
    if let Some(content) = req.body.map(|b| b.trim().to_string()).filter(|b| !b.is_empty()) {
        blog.body = content;
    }
    if let Some(author) = req.author.map(|a| a.trim().to_string()).filter(|a| !a.is_empty()) {
        blog.author = author;
    }
    if let Some(tags) = req.tags {
        blog.tags = tags
            .into_iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
    }
    if let Some(url) = req.cover_image_url {
        blog.cover_image_url = Some(url.trim().to_string()).filter(|u| !u.is_empty());
    }
    if let Some(published) = req.published {
        blog.published = published;
    }
    blog.updated_at = Some(chrono::Utc::now().to_rfc3339());

    save_blog(state, &blog).await?;
    tracing::info!("Blog {} updated", blog.blog_id);
    ok(&blog)
}

pub async fn delete_blog(state: &AppState, blog_id: &str) -> Result<Response<Body>, ApiError> {
    let blogs = all_blogs(state).await?;
    let blog =
        find_blog(&blogs, blog_id).ok_or_else(|| ApiError::not_found("Blog post not found"))?;

    store::delete_item(
        &state.dynamo_client,
        state.table(),
        BLOGS_PK,
        &format!("{}{}", BLOG_PREFIX, blog.blog_id),
    )
    .await?;
    tracing::info!("Blog {} deleted", blog.blog_id);
    ok(&serde_json::json!({ "blog_id": blog.blog_id }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blog(id: &str, slug: &str, published: bool) -> BlogPost {
        BlogPost {
            blog_id: id.to_string(),
            title: slug.replace('-', " "),
            slug: slug.to_string(),
            summary: None,
            body: "body".to_string(),
            author: "FarmerAI Team".to_string(),
            tags: Vec::new(),
            cover_image_url: None,
            published,
            created_at: "2026-02-01T00:00:00+00:00".to_string(),
            updated_at: None,
        }
    }

    #[test]
    fn slugs_are_lowercase_and_hyphenated() {
        assert_eq!(slugify("Kharif Sowing: 5 Tips!"), "kharif-sowing-5-tips");
        assert_eq!(slugify("  Soil   Health  "), "soil-health");
        assert_eq!(slugify("मिट्टी"), "post");
    }

    #[test]
    fn colliding_slugs_get_a_suffix() {
        let existing = vec![blog("b1", "soil-health", true), blog("b2", "soil-health-2", true)];
        assert_eq!(unique_slug("soil-health", "b3", &existing), "soil-health-3");
        assert_eq!(unique_slug("soil-health", "b1", &existing), "soil-health");
        assert_eq!(unique_slug("water", "b3", &existing), "water");
    }

    #[test]
    fn blogs_are_found_by_id_or_slug() {
        let blogs = vec![blog("b1", "soil-health", true), blog("b2", "drip-irrigation", false)];
        assert_eq!(find_blog(&blogs, "b2").unwrap().slug, "drip-irrigation");
        assert_eq!(find_blog(&blogs, "soil-health").unwrap().blog_id, "b1");
        assert!(find_blog(&blogs, "nope").is_none());
    }

    #[test]
    fn published_flag_survives_storage() {
        let draft = blog("b2", "drip-irrigation", false);
        let back = BlogPost::from_item(&draft.to_item().unwrap()).unwrap();
        assert!(!back.published);
        assert_eq!(back.slug, "drip-irrigation");
    }
}
