use lambda_http::{Body, Response};

use crate::error::ApiError;
use crate::response::{created, ok, parse_body, required};
use crate::s3::resolve_image;
use crate::store::{self, get_string, get_string_or_default, Item, GALLERY_PK};
use crate::types::{CreateGalleryItemRequest, GalleryItem};
use crate::AppState;

const GALLERY_PREFIX: &str = "GALLERY#";

impl GalleryItem {
    pub fn to_item(&self) -> Item {
        let mut item = store::keyed(GALLERY_PK, format!("{}{}", GALLERY_PREFIX, self.item_id));
        item.insert("item_id".to_string(), store::s(&self.item_id));
        item.insert("title".to_string(), store::s(&self.title));
        item.insert("image_url".to_string(), store::s(&self.image_url));
        item.insert("created_by".to_string(), store::s(&self.created_by));
        item.insert("created_at".to_string(), store::s(&self.created_at));
        store::put_opt(&mut item, "caption", &self.caption);
        item
    }

    pub fn from_item(item: &Item) -> Option<Self> {
        Some(Self {
            item_id: store::id_from_sk(item)?,
            title: get_string_or_default(item, "title"),
            caption: get_string(item, "caption"),
            image_url: get_string(item, "image_url")?,
            created_by: get_string_or_default(item, "created_by"),
            created_at: get_string_or_default(item, "created_at"),
        })
    }
}

pub async fn list_gallery(state: &AppState) -> Result<Response<Body>, ApiError> {
    let items = store::query_prefix(
        &state.dynamo_client,
        state.table(),
        GALLERY_PK,
        GALLERY_PREFIX,
        false,
        None,
    )
    .await?;

    let mut gallery: Vec<GalleryItem> = items.iter().filter_map(GalleryItem::from_item).collect();
    gallery.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    ok(&gallery)
}

pub async fn create_gallery_item(
    state: &AppState,
    admin_id: &str,
    body: &[u8],
) -> Result<Response<Body>, ApiError> {
    let req: CreateGalleryItemRequest = parse_body(body)?;
    let title = required(req.title.as_deref(), "title")?;
    if req.image.is_none() && req.image_url.as_deref().map_or(true, |u| u.trim().is_empty()) {
        return Err(ApiError::bad_request("Either image or image_url is required"));
    }

    let image_url = resolve_image(state, "gallery", req.image.as_ref(), req.image_url)
        .await?
        .ok_or_else(|| ApiError::bad_request("Either image or image_url is required"))?;

    let item = GalleryItem {
        item_id: uuid::Uuid::new_v4().to_string(),
        title,
        caption: req.caption.map(|c| c.trim().to_string()).filter(|c| !c.is_empty()),
        image_url,
        created_by: admin_id.to_string(),
        created_at: chrono::Utc::now().to_rfc3339(),
    };
    store::put_item(&state.dynamo_client, state.table(), item.to_item()).await?;

    tracing::info!("Gallery item {} added by {}", item.item_id, admin_id);
    created(&item)
}

pub async fn delete_gallery_item(
    state: &AppState,
    item_id: &str,
) -> Result<Response<Body>, ApiError> {
    let sk = format!("{}{}", GALLERY_PREFIX, item_id);
    if store::get_item(&state.dynamo_client, state.table(), GALLERY_PK, &sk)
        .await?
        .is_none()
    {
        return Err(ApiError::not_found("Gallery item not found"));
    }

    store::delete_item(&state.dynamo_client, state.table(), GALLERY_PK, &sk).await?;
    tracing::info!("Gallery item {} deleted", item_id);
    ok(&serde_json::json!({ "item_id": item_id }))
}
