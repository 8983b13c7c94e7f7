use aws_sdk_s3::primitives::ByteStream;
use base64::Engine;

use crate::error::ApiError;
use crate::types::ImageUpload;
use crate::AppState;

const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024; // 5MB

/// Decoded, validated image ready for upload.
#[derive(Debug)]
pub struct PreparedImage {
    pub key: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

fn extension(file_name: &str, content_type: &str) -> String {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| {
            !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .or_else(|| content_type.strip_prefix("image/").map(|sub| sub.to_string()))
        .unwrap_or_else(|| "jpg".to_string())
}

/// Validate and decode a base64 image. Accepts bare base64 or a `data:` URL.
pub fn prepare_image(folder: &str, upload: &ImageUpload) -> Result<PreparedImage, ApiError> {
    let content_type = upload.content_type.trim().to_ascii_lowercase();
    if !content_type.starts_with("image/") {
        return Err(ApiError::bad_request("Only image uploads are supported"));
    }

    let data = match upload.data.split_once(";base64,") {
        Some((_, payload)) => payload,
        None => upload.data.as_str(),
    };
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| ApiError::bad_request(format!("Failed to decode base64 image: {}", e)))?;

    if bytes.is_empty() {
        return Err(ApiError::bad_request("Image is empty"));
    }
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(ApiError::bad_request("Image exceeds the 5MB limit"));
    }

    // {folder}/{uuid}.{ext}
    let key = format!(
        "{}/{}.{}",
        folder,
        uuid::Uuid::new_v4(),
        extension(&upload.file_name, &content_type)
    );

    Ok(PreparedImage {
        key,
        content_type,
        bytes,
    })
}

pub fn public_url(bucket: &str, key: &str) -> String {
    format!("https://{}.s3.amazonaws.com/{}", bucket, key)
}

/// Upload an image and return its public URL.
pub async fn upload_image(
    state: &AppState,
    folder: &str,
    upload: &ImageUpload,
) -> Result<String, ApiError> {
    let image = prepare_image(folder, upload)?;
    let bucket = &state.config.upload_bucket;

    state
        .s3_client
        .put_object()
        .bucket(bucket)
        .key(&image.key)
        .body(ByteStream::from(image.bytes))
        .content_type(&image.content_type)
        .send()
        .await
        .map_err(|e| ApiError::internal("Failed to upload to S3", e))?;

    tracing::info!("Uploaded image to s3://{}/{}", bucket, image.key);
    Ok(public_url(bucket, &image.key))
}

/// Uploaded image URL if one was sent, else the caller-supplied URL.
pub async fn resolve_image(
    state: &AppState,
    folder: &str,
    upload: Option<&ImageUpload>,
    url: Option<String>,
) -> Result<Option<String>, ApiError> {
    match upload {
        Some(upload) => Ok(Some(upload_image(state, folder, upload).await?)),
        None => Ok(url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(file_name: &str, content_type: &str, data: &str) -> ImageUpload {
        ImageUpload {
            file_name: file_name.to_string(),
            content_type: content_type.to_string(),
            data: data.to_string(),
        }
    }

    #[test]
    fn decodes_base64_and_builds_key() {
        let data = base64::engine::general_purpose::STANDARD.encode(b"\x89PNG fake");
        let image = prepare_image("gallery", &upload("Field.PNG", "image/png", &data)).unwrap();
        assert!(image.key.starts_with("gallery/"));
        assert!(image.key.ends_with(".png"));
        assert_eq!(image.bytes, b"\x89PNG fake");
    }

    #[test]
    fn accepts_data_urls() {
        let data = format!(
            "data:image/jpeg;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(b"jpeg")
        );
        let image = prepare_image("posts", &upload("photo", "image/jpeg", &data)).unwrap();
        assert!(image.key.ends_with(".jpeg"));
        assert_eq!(image.bytes, b"jpeg");
    }

    #[test]
    fn rejects_non_images_and_bad_payloads() {
        let data = base64::engine::general_purpose::STANDARD.encode(b"%PDF");
        assert!(prepare_image("blogs", &upload("a.pdf", "application/pdf", &data)).is_err());
        assert!(prepare_image("blogs", &upload("a.png", "image/png", "not base64!")).is_err());
        assert!(prepare_image("blogs", &upload("a.png", "image/png", "")).is_err());
    }

    #[test]
    fn rejects_oversized_images() {
        let big = vec![0u8; MAX_IMAGE_BYTES + 1];
        let data = base64::engine::general_purpose::STANDARD.encode(big);
        let err = prepare_image("gallery", &upload("big.jpg", "image/jpeg", &data)).unwrap_err();
        assert_eq!(err.to_string(), "Image exceeds the 5MB limit");
    }

    #[test]
    fn public_url_points_at_the_bucket() {
        assert_eq!(
            public_url("farmerai-uploads", "gallery/x.png"),
            "https://farmerai-uploads.s3.amazonaws.com/gallery/x.png"
        );
    }
}
