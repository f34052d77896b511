//! Watson Assistant v1 client.

use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

use crate::config::Config;
use crate::models::AssistantArgs;
use crate::{Error, Result};

/// Grant type for exchanging an IBM Cloud API key.
const IAM_APIKEY_GRANT: &str = "urn:ibm:params:oauth:grant-type:apikey";

/// How the client authenticates with Watson Assistant.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// IBM Cloud IAM API key, exchanged for a bearer token per request
    IamApiKey { api_key: String },
    /// Service username and password (HTTP basic auth)
    Basic { username: String, password: String },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::IamApiKey { .. } => f.write_str("IamApiKey(***)"),
            Credentials::Basic { username, .. } => write!(f, "Basic({}:***)", username),
        }
    }
}

impl Credentials {
    /// Pick the credential mode from the invocation arguments.
    ///
    /// An API key wins over a username; with neither present the invocation
    /// cannot talk to Watson.
    pub fn from_args(args: &AssistantArgs) -> Result<Self> {
        if let Some(api_key) = non_empty(&args.iam_apikey) {
            return Ok(Credentials::IamApiKey {
                api_key: api_key.to_string(),
            });
        }

        if let Some(username) = non_empty(&args.username) {
            return Ok(Credentials::Basic {
                username: username.to_string(),
                password: args.password.clone().unwrap_or_default(),
            });
        }

        Err(Error::InvalidCredentials)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Everything the client needs to reach one Watson Assistant instance.
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub credentials: Credentials,
    /// Service URL, without the `/v1` suffix
    pub url: String,
    /// API version date
    pub version: String,
    /// IAM token endpoint, used in API key mode
    pub iam_token_url: String,
}

impl AssistantConfig {
    /// Build the client configuration for one invocation.
    pub fn from_args(args: &AssistantArgs, config: &Config) -> Result<Self> {
        let credentials = Credentials::from_args(args)?;

        let url = match credentials {
            Credentials::IamApiKey { .. } => non_empty(&args.iam_url),
            Credentials::Basic { .. } => None,
        }
        .unwrap_or(config.assistant_url.as_str())
        .to_string();

        Ok(Self {
            credentials,
            url,
            version: config.assistant_version.clone(),
            iam_token_url: config.iam_token_url.clone(),
        })
    }
}

/// Request body of the `message` method.
#[derive(Debug, Serialize)]
pub struct MessageRequest {
    pub input: MessageInput,
}

#[derive(Debug, Serialize)]
pub struct MessageInput {
    pub text: String,
}

/// Response of the `message` method.
#[derive(Debug, Deserialize)]
pub struct MessageResponse {
    pub output: MessageOutput,
}

#[derive(Debug, Deserialize)]
pub struct MessageOutput {
    /// Dialog reply, one entry per response node
    #[serde(default)]
    pub text: Vec<String>,
}

impl MessageResponse {
    /// Reply fragments joined into a single sentence for speech.
    pub fn joined_text(&self) -> String {
        self.output.text.join(" ")
    }
}

#[derive(Debug, Deserialize)]
struct IamTokenResponse {
    access_token: String,
}

/// Client for the Watson Assistant v1 API.
pub struct AssistantClient {
    http_client: HttpClient,
    config: AssistantConfig,
}

impl AssistantClient {
    /// Create a new assistant client.
    ///
    /// The HTTP client is cheap to clone and keeps its connection pool, so
    /// callers pass the one they hold for the lifetime of the process.
    pub fn new(http_client: HttpClient, config: AssistantConfig) -> Self {
        info!("Connected to Watson Assistant at {}", config.url);
        Self {
            http_client,
            config,
        }
    }

    /// Send one utterance to a workspace and return the dialog reply.
    pub async fn message(&self, workspace_id: &str, text: &str) -> Result<MessageResponse> {
        if workspace_id.is_empty() {
            return Err(Error::DialogService("No workspace id configured".to_string()));
        }

        let url = format!(
            "{}/v1/workspaces/{}/message",
            self.config.url.trim_end_matches('/'),
            workspace_id
        );

        let request = self
            .http_client
            .post(&url)
            .query(&[("version", self.config.version.as_str())])
            .json(&MessageRequest {
                input: MessageInput {
                    text: text.to_string(),
                },
            });

        let request = match &self.config.credentials {
            Credentials::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
            Credentials::IamApiKey { api_key } => {
                request.bearer_auth(self.access_token(api_key).await?)
            }
        };

        let response = request
            .send()
            .await
            .map_err(|e| Error::DialogService(format!("Failed to reach Watson Assistant: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::DialogService(format!(
                "Watson Assistant returned {}: {}",
                status, body
            )));
        }

        let message: MessageResponse = response.json().await.map_err(|e| {
            Error::DialogService(format!("Failed to parse Watson Assistant response: {}", e))
        })?;

        debug!("Watson Assistant replied with {} fragments", message.output.text.len());
        Ok(message)
    }

    /// Exchange the API key for an IAM bearer token.
    async fn access_token(&self, api_key: &str) -> Result<String> {
        let response = self
            .http_client
            .post(&self.config.iam_token_url)
            .header("accept", "application/json")
            .form(&[("grant_type", IAM_APIKEY_GRANT), ("apikey", api_key)])
            .send()
            .await
            .map_err(|e| Error::DialogService(format!("IAM token request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::DialogService(format!(
                "IAM token exchange failed: {}",
                response.status()
            )));
        }

        let token: IamTokenResponse = response
            .json()
            .await
            .map_err(|e| Error::DialogService(format!("Failed to parse IAM token: {}", e)))?;

        Ok(token.access_token)
    }
}
