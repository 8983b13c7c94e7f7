use aws_sdk_cognitoidentityprovider::Client as CognitoClient;
use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_sesv2::Client as SesClient;
use farmerai_shared::{config::Config, AppState};
use lambda_http::{run, service_fn, tracing, Error, Request};
use std::sync::Arc;

mod http_handler;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing::init_default_subscriber();

    let config = Config::load();
    tracing::info!(
        "Starting FarmerAI API (table: {}, gemini: {}, razorpay: {})",
        config.table_name,
        config.gemini_api_key.is_some(),
        config.razorpay.is_some()
    );

    // Initialize AWS clients once at startup
    let aws_config = aws_config::load_from_env().await;
    let http_client = reqwest::Client::builder().build()?;

    let state = AppState::new(
        config,
        CognitoClient::new(&aws_config),
        DynamoClient::new(&aws_config),
        S3Client::new(&aws_config),
        SesClient::new(&aws_config),
        http_client,
    );

    run(service_fn(move |event: Request| {
        let state = Arc::clone(&state);
        async move { http_handler::function_handler(event, state).await }
    }))
    .await
}
