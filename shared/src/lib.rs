pub mod types;
pub mod config;
pub mod error;
pub mod response;
pub mod store;
pub mod auth;
pub mod users;
pub mod interactions;
pub mod scorer;
pub mod gemini;
pub mod assistant;
pub mod recommendations;
pub mod razorpay;
pub mod payments;
pub mod members;
pub mod join_requests;
pub mod posts;
pub mod events;
pub mod gallery;
pub mod blogs;
pub mod search;
pub mod s3;
pub mod email;

use aws_sdk_cognitoidentityprovider::Client as CognitoClient;
use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_sesv2::Client as SesClient;
use std::sync::Arc;

use crate::config::Config;
use crate::error::ApiError;
use crate::gemini::GeminiClient;
use crate::razorpay::RazorpayClient;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub cognito_client: CognitoClient,
    pub dynamo_client: DynamoClient,
    pub s3_client: S3Client,
    pub ses_client: SesClient,
    pub gemini: Option<GeminiClient>,
    pub razorpay: Option<RazorpayClient>,
}

impl AppState {
    pub fn new(
        config: Config,
        cognito_client: CognitoClient,
        dynamo_client: DynamoClient,
        s3_client: S3Client,
        ses_client: SesClient,
        http_client: reqwest::Client,
    ) -> Arc<Self> {
        let gemini = config.gemini_api_key.as_ref().map(|key| {
            GeminiClient::new(http_client.clone(), key.clone(), config.gemini_models.clone())
        });
        let razorpay = config
            .razorpay
            .as_ref()
            .map(|settings| RazorpayClient::new(http_client.clone(), settings));

        Arc::new(Self {
            config,
            cognito_client,
            dynamo_client,
            s3_client,
            ses_client,
            gemini,
            razorpay,
        })
    }

    pub fn table(&self) -> &str {
        &self.config.table_name
    }

    pub fn razorpay(&self) -> Result<&RazorpayClient, ApiError> {
        self.razorpay.as_ref().ok_or(ApiError::Unavailable("Razorpay"))
    }
}
