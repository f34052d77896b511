//! Alexa wire models and invocation arguments.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::{Error, Result};

/// Utterance sent to Watson when a session starts without an intent.
pub const START_SKILL_UTTERANCE: &str = "start skill";

/// Slot that carries the user's free-text input.
pub const UTTERANCE_SLOT: &str = "EverythingSlot";

/// Reply from the workspace that closes the session.
pub const GOODBYE_PHRASE: &str = "Thank you for using Alexa and Watson.";

/// Watson Assistant credentials and workspace, as passed to the function.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssistantArgs {
    #[serde(rename = "ASSISTANT_IAM_APIKEY", default, deserialize_with = "lenient_string")]
    pub iam_apikey: Option<String>,
    #[serde(rename = "ASSISTANT_IAM_URL", default, deserialize_with = "lenient_string")]
    pub iam_url: Option<String>,
    #[serde(rename = "ASSISTANT_USERNAME", default, deserialize_with = "lenient_string")]
    pub username: Option<String>,
    #[serde(rename = "ASSISTANT_PASSWORD", default, deserialize_with = "lenient_string")]
    pub password: Option<String>,
    #[serde(rename = "WORKSPACE_ID", default, deserialize_with = "lenient_string")]
    pub workspace_id: Option<String>,
}

impl AssistantArgs {
    /// Fill every field that is absent or empty from `fallback`.
    pub fn or(self, fallback: &AssistantArgs) -> Self {
        fn pick(value: Option<String>, fallback: &Option<String>) -> Option<String> {
            value
                .filter(|v| !v.is_empty())
                .or_else(|| fallback.clone().filter(|v| !v.is_empty()))
        }

        Self {
            iam_apikey: pick(self.iam_apikey, &fallback.iam_apikey),
            iam_url: pick(self.iam_url, &fallback.iam_url),
            username: pick(self.username, &fallback.username),
            password: pick(self.password, &fallback.password),
            workspace_id: pick(self.workspace_id, &fallback.workspace_id),
        }
    }
}

/// Arguments of one function invocation.
///
/// Bound parameters and headers arrive untyped, so scalars of any kind are
/// read as strings and other values are treated as absent.
#[derive(Debug, Default, Deserialize)]
pub struct InvocationArgs {
    /// Base64-encoded Alexa request body
    #[serde(rename = "__ow_body", default, deserialize_with = "lenient_string")]
    pub body: Option<String>,
    /// HTTP headers of the Alexa request
    #[serde(rename = "__ow_headers", default, deserialize_with = "lenient_headers")]
    pub headers: HashMap<String, String>,
    #[serde(flatten)]
    pub assistant: AssistantArgs,
}

fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(scalar_to_string(Value::deserialize(deserializer)?))
}

fn lenient_headers<'de, D>(deserializer: D) -> std::result::Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let headers = match Value::deserialize(deserializer)? {
        Value::Object(map) => map
            .into_iter()
            .filter_map(|(name, value)| scalar_to_string(value).map(|value| (name, value)))
            .collect(),
        _ => HashMap::new(),
    };
    Ok(headers)
}

impl InvocationArgs {
    /// Look up a header by name, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Alexa request envelope.
#[derive(Debug, Deserialize)]
pub struct SkillRequest {
    pub request: IncomingRequest,
}

/// The `request` object of an Alexa request envelope.
#[derive(Debug, Deserialize)]
pub struct IncomingRequest {
    #[serde(rename = "type")]
    pub request_type: Option<String>,
    pub intent: Option<Intent>,
}

#[derive(Debug, Deserialize)]
pub struct Intent {
    pub name: Option<String>,
    #[serde(default)]
    pub slots: HashMap<String, Slot>,
}

#[derive(Debug, Deserialize)]
pub struct Slot {
    pub value: Option<String>,
}

impl IncomingRequest {
    /// Text to forward to Watson.
    ///
    /// Requests without an intent (a session launch) map to
    /// [`START_SKILL_UTTERANCE`].
    pub fn utterance(&self) -> Result<&str> {
        let Some(intent) = &self.intent else {
            return Ok(START_SKILL_UTTERANCE);
        };

        intent
            .slots
            .get(UTTERANCE_SLOT)
            .and_then(|slot| slot.value.as_deref())
            .ok_or_else(|| {
                Error::MalformedRequest(format!(
                    "Intent {} has no {} value",
                    intent.name.as_deref().unwrap_or("<unnamed>"),
                    UTTERANCE_SLOT
                ))
            })
    }
}

/// Alexa response envelope.
#[derive(Debug, Serialize, PartialEq)]
pub struct AlexaResponse {
    pub version: String,
    pub response: AlexaResponseBody,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlexaResponseBody {
    pub should_end_session: bool,
    pub output_speech: OutputSpeech,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct OutputSpeech {
    #[serde(rename = "type")]
    pub speech_type: String,
    pub text: String,
}

impl AlexaResponse {
    /// Speak `text` as plain text.
    pub fn speak(text: impl Into<String>, should_end_session: bool) -> Self {
        Self {
            version: "1.0".to_string(),
            response: AlexaResponseBody {
                should_end_session,
                output_speech: OutputSpeech {
                    speech_type: "PlainText".to_string(),
                    text: text.into(),
                },
            },
        }
    }

    /// Speak a Watson reply, closing the session on the goodbye phrase.
    pub fn from_dialog(text: String) -> Self {
        let should_end_session = text == GOODBYE_PHRASE;
        Self::speak(text, should_end_session)
    }

    /// Speak the user-safe text for `error` and close the session.
    pub fn from_error(error: &Error) -> Self {
        Self::speak(error.speech(), true)
    }
}
