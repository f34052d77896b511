//! Configuration management for the skill Lambda.

use std::env;

use crate::models::AssistantArgs;

/// Watson Assistant v1 API version date the skill was built against.
pub const DEFAULT_ASSISTANT_VERSION: &str = "2018-02-16";

/// Service URL used when the invocation does not name one.
pub const DEFAULT_ASSISTANT_URL: &str = "https://gateway.watsonplatform.net/assistant/api";

/// IBM Cloud IAM endpoint that exchanges API keys for bearer tokens.
pub const DEFAULT_IAM_TOKEN_URL: &str = "https://iam.cloud.ibm.com/identity/token";

/// Maximum age of an Alexa request, in seconds.
pub const DEFAULT_TIMESTAMP_TOLERANCE_SECS: i64 = 150;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Watson Assistant API version date
    pub assistant_version: String,
    /// Default Watson Assistant service URL
    pub assistant_url: String,
    /// IAM token endpoint
    pub iam_token_url: String,
    /// Allowed clock skew for Alexa request timestamps
    pub timestamp_tolerance_secs: i64,
    /// Credentials and workspace used when the invocation omits them
    pub fallback: AssistantArgs,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            assistant_version: lookup("ASSISTANT_VERSION")
                .unwrap_or_else(|| DEFAULT_ASSISTANT_VERSION.to_string()),
            assistant_url: lookup("ASSISTANT_URL")
                .unwrap_or_else(|| DEFAULT_ASSISTANT_URL.to_string()),
            iam_token_url: lookup("ASSISTANT_IAM_TOKEN_URL")
                .unwrap_or_else(|| DEFAULT_IAM_TOKEN_URL.to_string()),
            timestamp_tolerance_secs: lookup("ALEXA_TIMESTAMP_TOLERANCE_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_TIMESTAMP_TOLERANCE_SECS),
            fallback: AssistantArgs {
                iam_apikey: lookup("ASSISTANT_IAM_APIKEY"),
                iam_url: lookup("ASSISTANT_IAM_URL"),
                username: lookup("ASSISTANT_USERNAME"),
                password: lookup("ASSISTANT_PASSWORD"),
                workspace_id: lookup("WORKSPACE_ID"),
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}
