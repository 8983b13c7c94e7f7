use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ========== ENUMS ==========
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Farmer,
    Expert,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Farmer => "farmer",
            Role::Expert => "expert",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "farmer" => Ok(Role::Farmer),
            "expert" => Ok(Role::Expert),
            "admin" => Ok(Role::Admin),
            other => Err(format!("Unknown role: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinStatus {
    Pending,
    /// Claimed by an approval still provisioning the account.
    Approving,
    Approved,
    Rejected,
}

impl JoinStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinStatus::Pending => "pending",
            JoinStatus::Approving => "approving",
            JoinStatus::Approved => "approved",
            JoinStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for JoinStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(JoinStatus::Pending),
            "approving" => Ok(JoinStatus::Approving),
            "approved" => Ok(JoinStatus::Approved),
            "rejected" => Ok(JoinStatus::Rejected),
            other => Err(format!("Unknown join request status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Assistant,
    CropRecommendation,
    SoilRecommendation,
    Payment,
}

impl InteractionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionKind::Assistant => "assistant",
            InteractionKind::CropRecommendation => "crop_recommendation",
            InteractionKind::SoilRecommendation => "soil_recommendation",
            InteractionKind::Payment => "payment",
        }
    }
}

impl FromStr for InteractionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "assistant" => Ok(InteractionKind::Assistant),
            "crop_recommendation" => Ok(InteractionKind::CropRecommendation),
            "soil_recommendation" => Ok(InteractionKind::SoilRecommendation),
            "payment" => Ok(InteractionKind::Payment),
            other => Err(format!("Unknown interaction kind: {}", other)),
        }
    }
}

/// Which record a recommendation is stored as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationKind {
    Crop,
    Soil,
}

impl RecommendationKind {
    pub fn sk_prefix(&self) -> &'static str {
        match self {
            RecommendationKind::Crop => "CROPREC",
            RecommendationKind::Soil => "SOILREC",
        }
    }

    pub fn interaction(&self) -> InteractionKind {
        match self {
            RecommendationKind::Crop => InteractionKind::CropRecommendation,
            RecommendationKind::Soil => InteractionKind::SoilRecommendation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationSource {
    Llm,
    Fallback,
}

impl fmt::Display for RecommendationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecommendationSource::Llm => write!(f, "llm"),
            RecommendationSource::Fallback => write!(f, "fallback"),
        }
    }
}

// ========== USER ==========
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: Role,
    pub location: Option<String>,
    pub bio: Option<String>,
    pub farm_size: Option<String>,
    #[serde(default)]
    pub crops: Vec<String>,
    pub avatar_url: Option<String>,
    pub created_at: String,
    pub last_login: Option<String>,
}

/// The public face of a user, as shown on community pages.
#[derive(Debug, Serialize, Clone)]
pub struct Profile {
    pub user_id: String,
    pub name: String,
    pub role: Role,
    pub location: Option<String>,
    pub bio: Option<String>,
    pub farm_size: Option<String>,
    pub crops: Vec<String>,
    pub avatar_url: Option<String>,
    pub member_since: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub bio: Option<String>,
    pub farm_size: Option<String>,
    pub crops: Option<Vec<String>>,
    pub avatar_url: Option<String>,
}

// ========== INTERACTION ==========
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Interaction {
    pub interaction_id: String,
    pub user_id: String,
    pub kind: InteractionKind,
    pub summary: String,
    pub created_at: String,
}

// ========== ASSISTANT ==========
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AssistantHistory {
    pub entry_id: String,
    pub user_id: String,
    pub question: String,
    pub answer: String,
    pub language: String,
    pub model: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: Option<String>,
    pub language: Option<String>,
}

// ========== RECOMMENDATIONS ==========
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct SoilInputs {
    pub n: f64,
    pub p: f64,
    pub k: f64,
    pub rainfall: f64,
    pub humidity: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RecommendedCrop {
    pub name: String,
    pub score: f64,
    pub reason: String,
}

/// Stored as either a CropRecommendation or a SoilRecommendation, per `kind`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecommendationRecord {
    pub recommendation_id: String,
    pub user_id: String,
    pub kind: RecommendationKind,
    pub inputs: SoilInputs,
    pub mode: String,
    pub salt: Option<String>,
    pub soil_type: Option<String>,
    pub source: RecommendationSource,
    pub crops: Vec<RecommendedCrop>,
    pub created_at: String,
}

/// Numeric fields arrive as JSON numbers or numeric strings; both are
/// validated by the recommendation handlers.
#[derive(Debug, Deserialize, Default)]
pub struct RecommendationRequest {
    #[serde(default, alias = "N", alias = "nitrogen")]
    pub n: Option<serde_json::Value>,
    #[serde(default, alias = "P", alias = "phosphorus")]
    pub p: Option<serde_json::Value>,
    #[serde(default, alias = "K", alias = "potassium")]
    pub k: Option<serde_json::Value>,
    #[serde(default)]
    pub rainfall: Option<serde_json::Value>,
    #[serde(default)]
    pub humidity: Option<serde_json::Value>,
    pub mode: Option<String>,
    pub salt: Option<String>,
    #[serde(default, alias = "forgetHistory")]
    pub forget_history: bool,
    pub count: Option<usize>,
    #[serde(alias = "soilType")]
    pub soil_type: Option<String>,
    pub language: Option<String>,
}

// ========== COMMUNITY ==========
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CommunityMember {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub joined_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JoinRequest {
    pub request_id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub farm_size: Option<String>,
    pub crops: Vec<String>,
    pub reason: Option<String>,
    pub status: JoinStatus,
    pub created_at: String,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<String>,
    pub rejection_reason: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateJoinRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    #[serde(alias = "farmSize")]
    pub farm_size: Option<String>,
    #[serde(default)]
    pub crops: Vec<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RejectJoinRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CommunityEvent {
    pub event_id: String,
    pub title: String,
    pub description: String,
    pub location: String,
    pub starts_at: String,
    pub ends_at: Option<String>,
    pub image_url: Option<String>,
    pub created_by: String,
    pub created_at: String,
    pub attendees: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateEventRequest {
    pub title: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
    #[serde(alias = "startsAt")]
    pub starts_at: Option<String>,
    #[serde(alias = "endsAt")]
    pub ends_at: Option<String>,
    #[serde(alias = "imageUrl")]
    pub image_url: Option<String>,
    pub image: Option<ImageUpload>,
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateEventRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    #[serde(alias = "startsAt")]
    pub starts_at: Option<String>,
    #[serde(alias = "endsAt")]
    pub ends_at: Option<String>,
    #[serde(alias = "imageUrl")]
    pub image_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CommunityPost {
    pub post_id: String,
    pub author_id: String,
    pub author_name: String,
    pub content: String,
    pub image_url: Option<String>,
    pub tags: Vec<String>,
    pub likes: Vec<String>,
    pub comment_count: u32,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    pub content: Option<String>,
    #[serde(alias = "imageUrl")]
    pub image_url: Option<String>,
    pub image: Option<ImageUpload>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PostComment {
    pub comment_id: String,
    pub post_id: String,
    pub author_id: String,
    pub author_name: String,
    pub text: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateCommentRequest {
    pub text: Option<String>,
}

// ========== CONTENT ==========
/// Base64 image carried in a JSON body.
#[derive(Debug, Deserialize, Clone)]
pub struct ImageUpload {
    #[serde(alias = "fileName")]
    pub file_name: String,
    #[serde(alias = "contentType")]
    pub content_type: String,
    pub data: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GalleryItem {
    pub item_id: String,
    pub title: String,
    pub caption: Option<String>,
    pub image_url: String,
    pub created_by: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateGalleryItemRequest {
    pub title: Option<String>,
    pub caption: Option<String>,
    #[serde(alias = "imageUrl")]
    pub image_url: Option<String>,
    pub image: Option<ImageUpload>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BlogPost {
    pub blog_id: String,
    pub title: String,
    pub slug: String,
    pub summary: Option<String>,
    pub body: String,
    pub author: String,
    pub tags: Vec<String>,
    pub cover_image_url: Option<String>,
    pub published: bool,
    pub created_at: String,
    pub updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateBlogRequest {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub body: Option<String>,
    pub author: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(alias = "coverImageUrl")]
    pub cover_image_url: Option<String>,
    #[serde(alias = "coverImage")]
    pub cover_image: Option<ImageUpload>,
    #[serde(default)]
    pub published: bool,
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateBlogRequest {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub body: Option<String>,
    pub author: Option<String>,
    pub tags: Option<Vec<String>>,
    #[serde(alias = "coverImageUrl")]
    pub cover_image_url: Option<String>,
    pub published: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_parse_case_insensitively() {
        assert_eq!("Admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!(" farmer ".parse::<Role>().unwrap(), Role::Farmer);
        assert!("owner".parse::<Role>().is_err());
    }

    #[test]
    fn recommendation_request_accepts_frontend_aliases() {
        let req: RecommendationRequest = serde_json::from_str(
            r#"{"N": 150, "P": "40", "K": 90, "rainfall": 200, "humidity": 80,
                "forgetHistory": true, "soilType": "loam"}"#,
        )
        .unwrap();
        assert_eq!(req.n, Some(serde_json::json!(150)));
        assert_eq!(req.p, Some(serde_json::json!("40")));
        assert!(req.forget_history);
        assert_eq!(req.soil_type.as_deref(), Some("loam"));
    }

    #[test]
    fn interaction_kind_round_trips_through_str() {
        for kind in [
            InteractionKind::Assistant,
            InteractionKind::CropRecommendation,
            InteractionKind::SoilRecommendation,
            InteractionKind::Payment,
        ] {
            assert_eq!(kind.as_str().parse::<InteractionKind>().unwrap(), kind);
        }
    }
}
