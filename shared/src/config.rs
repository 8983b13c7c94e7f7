use std::env;

use tracing::{info, warn};

const DEFAULT_GEMINI_MODELS: &str = "gemini-1.5-flash,gemini-1.5-flash-latest,gemini-pro";

/// Runtime configuration, read once per cold start.
#[derive(Debug, Clone)]
pub struct Config {
    pub table_name: String,
    pub upload_bucket: String,
    pub frontend_url: String,
    pub sender_email: String,
    pub cognito: CognitoSettings,
    pub gemini_api_key: Option<String>,
    pub gemini_models: Vec<String>,
    pub razorpay: Option<RazorpaySettings>,
    /// Trust `X-User-Id` when no authorizer context is present. Local development only.
    pub allow_dev_user_header: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CognitoSettings {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub user_pool_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RazorpaySettings {
    pub key_id: String,
    pub key_secret: String,
    pub webhook_secret: Option<String>,
    pub account_number: Option<String>,
}

impl Config {
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let var_or = |key: &str, default: &str| {
            var(key).unwrap_or_else(|| {
                info!("{key} not set, using default: {default}");
                default.to_string()
            })
        };

        let gemini_api_key = var("GEMINI_API_KEY");
        if gemini_api_key.is_none() {
            warn!(
                "GEMINI_API_KEY not set, assistant disabled and recommendations use the fallback scorer"
            );
        }

        let razorpay = match (var("RAZORPAY_KEY_ID"), var("RAZORPAY_KEY_SECRET")) {
            (Some(key_id), Some(key_secret)) => Some(RazorpaySettings {
                key_id,
                key_secret,
                webhook_secret: var("RAZORPAY_WEBHOOK_SECRET"),
                account_number: var("RAZORPAYX_ACCOUNT_NUMBER"),
            }),
            _ => {
                warn!("Razorpay credentials not set, payments disabled");
                None
            }
        };

        let allow_dev_user_header = matches!(
            var("ALLOW_DEV_USER_HEADER").map(|v| v.to_ascii_lowercase()).as_deref(),
            Some("true") | Some("1")
        );
        if allow_dev_user_header {
            warn!("ALLOW_DEV_USER_HEADER set, X-User-Id is trusted for requests without a JWT");
        }

        Self {
            table_name: var_or("TABLE_NAME", "farmerai"),
            upload_bucket: var_or("UPLOAD_BUCKET", "farmerai-uploads"),
            frontend_url: var_or("FRONTEND_URL", "http://localhost:5173"),
            sender_email: var_or("SENDER_EMAIL", "noreply@farmerai.app"),
            cognito: CognitoSettings {
                client_id: var("COGNITO_CLIENT_ID"),
                client_secret: var("COGNITO_CLIENT_SECRET"),
                user_pool_id: var("COGNITO_USER_POOL_ID"),
            },
            gemini_api_key,
            gemini_models: parse_models(&var_or("GEMINI_MODELS", DEFAULT_GEMINI_MODELS)),
            razorpay,
            allow_dev_user_header,
        }
    }
}

fn parse_models(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let config = Config::from_lookup(lookup(&[]));
        assert_eq!(config.table_name, "farmerai");
        assert_eq!(
            config.gemini_models,
            vec!["gemini-1.5-flash", "gemini-1.5-flash-latest", "gemini-pro"]
        );
        assert!(config.gemini_api_key.is_none());
        assert!(config.razorpay.is_none());
        assert!(!config.allow_dev_user_header);
    }

    #[test]
    fn dev_user_header_is_opt_in() {
        let config = Config::from_lookup(lookup(&[("ALLOW_DEV_USER_HEADER", "TRUE")]));
        assert!(config.allow_dev_user_header);

        let config = Config::from_lookup(lookup(&[("ALLOW_DEV_USER_HEADER", "yes please")]));
        assert!(!config.allow_dev_user_header);
    }

    #[test]
    fn razorpay_needs_both_key_and_secret() {
        let config = Config::from_lookup(lookup(&[("RAZORPAY_KEY_ID", "rzp_test_1")]));
        assert!(config.razorpay.is_none());

        let config = Config::from_lookup(lookup(&[
            ("RAZORPAY_KEY_ID", "rzp_test_1"),
            ("RAZORPAY_KEY_SECRET", "secret"),
            ("RAZORPAY_WEBHOOK_SECRET", "  "),
        ]));
        let razorpay = config.razorpay.expect("razorpay configured");
        assert_eq!(razorpay.key_id, "rzp_test_1");
        assert!(razorpay.webhook_secret.is_none());
    }

    #[test]
    fn model_list_is_trimmed() {
        let config = Config::from_lookup(lookup(&[(
            "GEMINI_MODELS",
            " gemini-2.0-flash , ,gemini-pro ",
        )]));
        assert_eq!(config.gemini_models, vec!["gemini-2.0-flash", "gemini-pro"]);
    }
}
