//! Alexa Skill Lambda - Bridges Alexa voice interactions to Watson Assistant.
//!
//! Each invocation verifies that the request was signed by Alexa, forwards the
//! user's utterance to a Watson Assistant workspace and speaks the reply.
//! Failures never escape the handler: they are spoken back and end the session.

use base64::Engine;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::Value;
use shared::{
    AlexaResponse, AlexaVerifier, AssistantClient, AssistantConfig, Config, InvocationArgs,
    RequestVerifier, SkillRequest,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Application state shared across invocations.
///
/// Holds the HTTP connection pool, the verifier and the environment config.
/// The Watson client is built fresh from every invocation's arguments.
struct AppState {
    http_client: reqwest::Client,
    verifier: Arc<dyn RequestVerifier>,
    config: Config,
}

impl AppState {
    fn new() -> Self {
        let config = Config::from_env();
        let http_client = reqwest::Client::new();
        let verifier = Arc::new(AlexaVerifier::new(
            http_client.clone(),
            config.timestamp_tolerance_secs,
        ));

        Self {
            http_client,
            verifier,
            config,
        }
    }
}

async fn handler(state: Arc<AppState>, event: LambdaEvent<Value>) -> Result<AlexaResponse, Error> {
    let (payload, _context) = event.into_parts();
    Ok(respond(&state, payload).await)
}

/// Run the skill pipeline and turn any failure into a spoken error.
async fn respond(state: &AppState, payload: Value) -> AlexaResponse {
    match process(state, payload).await {
        Ok(response) => response,
        Err(e) => {
            error!("Skill request failed: {}", e);
            AlexaResponse::from_error(&e)
        }
    }
}

async fn process(state: &AppState, payload: Value) -> shared::Result<AlexaResponse> {
    // Argument fields deserialize leniently, so only a payload that is not an
    // object fails here, and such a payload has no body either.
    let args: InvocationArgs =
        serde_json::from_value(payload).map_err(|_| shared::Error::MissingBody)?;

    // Decode and parse the Alexa request
    let encoded = args
        .body
        .as_deref()
        .filter(|body| !body.is_empty())
        .ok_or(shared::Error::MissingBody)?;
    let raw_body = decode_body(encoded)?;
    let skill_request: SkillRequest = serde_json::from_str(&raw_body)?;

    info!(
        "Received {} request",
        skill_request.request.request_type.as_deref().unwrap_or("unknown")
    );

    // Verify it was signed by Alexa
    let cert_url = args.header("signaturecertchainurl").unwrap_or_default();
    let signature = args.header("signature").unwrap_or_default();
    state.verifier.verify(cert_url, signature, &raw_body).await?;

    // Connect to Watson Assistant
    let assistant_args = args.assistant.or(&state.config.fallback);
    let assistant_config = AssistantConfig::from_args(&assistant_args, &state.config)?;
    let assistant = AssistantClient::new(state.http_client.clone(), assistant_config);

    // Forward the utterance and speak the reply
    let input = skill_request.request.utterance()?;
    let workspace_id = assistant_args.workspace_id.as_deref().unwrap_or_default();
    info!("Input text for workspace {}: {}", workspace_id, input);

    let reply = assistant.message(workspace_id, input).await?;
    let output = reply.joined_text();
    info!("Output text: {}", output);

    Ok(AlexaResponse::from_dialog(output))
}

/// Decode the base64 request body into the raw JSON text Alexa signed.
fn decode_body(encoded: &str) -> shared::Result<String> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| shared::Error::MalformedRequest(format!("Body is not base64: {}", e)))?;

    String::from_utf8(bytes)
        .map_err(|e| shared::Error::MalformedRequest(format!("Body is not UTF-8: {}", e)))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let state = Arc::new(AppState::new());

    lambda_runtime::run(service_fn(move |event| {
        let state = Arc::clone(&state);
        async move { handler(state, event).await }
    }))
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use shared::error::{GENERIC_ERROR_SPEECH, MISSING_BODY_SPEECH};
    use shared::models::GOODBYE_PHRASE;
    use std::sync::Mutex;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CERT_URL: &str = "https://s3.amazonaws.com/echo.api/echo-api-cert.pem";

    /// Verifier that records its calls and answers with a fixed outcome.
    struct StubVerifier {
        failure: Option<String>,
        calls: Mutex<Vec<(String, String, String)>>,
    }

    impl StubVerifier {
        fn passing() -> Arc<Self> {
            Arc::new(Self {
                failure: None,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn failing(reason: &str) -> Arc<Self> {
            Arc::new(Self {
                failure: Some(reason.to_string()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RequestVerifier for StubVerifier {
        async fn verify(&self, cert_url: &str, signature: &str, body: &str) -> shared::Result<()> {
            self.calls.lock().unwrap().push((
                cert_url.to_string(),
                signature.to_string(),
                body.to_string(),
            ));

            match &self.failure {
                Some(reason) => Err(shared::Error::Verification(reason.clone())),
                None => Ok(()),
            }
        }
    }

    fn state(verifier: Arc<StubVerifier>, assistant_url: &str) -> AppState {
        AppState {
            http_client: reqwest::Client::new(),
            verifier,
            config: Config {
                assistant_url: assistant_url.to_string(),
                ..Config::default()
            },
        }
    }

    fn encode(body: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(body)
    }

    fn launch_body() -> String {
        json!({
            "version": "1.0",
            "request": {"type": "LaunchRequest", "timestamp": "2018-06-01T12:00:00Z"}
        })
        .to_string()
    }

    fn intent_body(utterance: &str) -> String {
        json!({
            "version": "1.0",
            "request": {
                "type": "IntentRequest",
                "timestamp": "2018-06-01T12:00:00Z",
                "intent": {
                    "name": "EverythingIntent",
                    "slots": {"EverythingSlot": {"name": "EverythingSlot", "value": utterance}}
                }
            }
        })
        .to_string()
    }

    fn payload(body: &str) -> Value {
        json!({
            "__ow_body": encode(body),
            "__ow_headers": {
                "signaturecertchainurl": CERT_URL,
                "signature": "c2lnbmF0dXJl"
            },
            "ASSISTANT_USERNAME": "user",
            "ASSISTANT_PASSWORD": "pass",
            "WORKSPACE_ID": "ws-1"
        })
    }

    async fn mount_reply(server: &MockServer, input: &str, reply: Value) {
        Mock::given(method("POST"))
            .and(path("/v1/workspaces/ws-1/message"))
            .and(body_json(json!({"input": {"text": input}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"output": {"text": reply}})))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_missing_body() {
        let verifier = StubVerifier::passing();
        let state = state(verifier.clone(), "http://127.0.0.1:1");

        let response = respond(&state, json!({"WORKSPACE_ID": "ws-1"})).await;

        assert_eq!(response, AlexaResponse::speak(MISSING_BODY_SPEECH, true));
        assert!(verifier.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_body_with_untyped_arguments() {
        let verifier = StubVerifier::passing();
        let state = state(verifier.clone(), "http://127.0.0.1:1");

        for payload in [
            json!({"ASSISTANT_PASSWORD": 1234}),
            json!({"__ow_headers": {"content-length": 0}}),
            json!({"__ow_headers": null}),
            json!({"__ow_body": null, "WORKSPACE_ID": ["ws-1"]}),
            json!("not an object"),
        ] {
            let response = respond(&state, payload.clone()).await;
            assert_eq!(
                response,
                AlexaResponse::speak(MISSING_BODY_SPEECH, true),
                "payload {}",
                payload
            );
        }

        assert!(verifier.calls().is_empty());
    }

    #[tokio::test]
    async fn test_untyped_arguments_alongside_body() {
        let mock_server = MockServer::start().await;
        mount_reply(&mock_server, "start skill", json!(["Hi."])).await;

        let state = state(StubVerifier::passing(), &mock_server.uri());

        let mut payload = payload(&launch_body());
        payload["ASSISTANT_PASSWORD"] = json!(1234);
        payload["__ow_headers"]["content-length"] = json!(129);

        let response = respond(&state, payload).await;
        assert_eq!(response, AlexaResponse::speak("Hi.", false));
    }

    #[tokio::test]
    async fn test_empty_body_counts_as_missing() {
        let state = state(StubVerifier::passing(), "http://127.0.0.1:1");
        let response = respond(&state, json!({"__ow_body": ""})).await;
        assert_eq!(response.response.output_speech.text, MISSING_BODY_SPEECH);
    }

    #[tokio::test]
    async fn test_verification_failure() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;

        let verifier = StubVerifier::failing("certificate expired");
        let state = state(verifier.clone(), &mock_server.uri());

        let response = respond(&state, payload(&launch_body())).await;

        assert_eq!(response, AlexaResponse::speak(GENERIC_ERROR_SPEECH, true));
        assert_eq!(verifier.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_verifier_receives_headers_and_raw_body() {
        let mock_server = MockServer::start().await;
        mount_reply(&mock_server, "start skill", json!(["Welcome."])).await;

        let verifier = StubVerifier::passing();
        let state = state(verifier.clone(), &mock_server.uri());

        let body = launch_body();
        let mut payload = payload(&body);
        payload["__ow_headers"] = json!({
            "SignatureCertChainUrl": CERT_URL,
            "Signature": "c2lnbmF0dXJl"
        });

        respond(&state, payload).await;

        assert_eq!(
            verifier.calls(),
            vec![(CERT_URL.to_string(), "c2lnbmF0dXJl".to_string(), body)]
        );
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let verifier = StubVerifier::passing();
        let state = state(verifier.clone(), "http://127.0.0.1:1");

        let mut payload = payload(&launch_body());
        let args = payload.as_object_mut().unwrap();
        args.remove("ASSISTANT_USERNAME");
        args.remove("ASSISTANT_PASSWORD");

        let response = respond(&state, payload).await;

        assert_eq!(response, AlexaResponse::speak(GENERIC_ERROR_SPEECH, true));
        assert_eq!(verifier.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_launch_sends_start_skill() {
        let mock_server = MockServer::start().await;
        mount_reply(&mock_server, "start skill", json!(["Hello", "there."])).await;

        let state = state(StubVerifier::passing(), &mock_server.uri());
        let response = respond(&state, payload(&launch_body())).await;

        assert_eq!(response, AlexaResponse::speak("Hello there.", false));
    }

    #[tokio::test]
    async fn test_intent_forwards_slot_value() {
        let mock_server = MockServer::start().await;
        mount_reply(&mock_server, "tell me a joke", json!(["Why did the robot cross the road?"])).await;

        let state = state(StubVerifier::passing(), &mock_server.uri());
        let response = respond(&state, payload(&intent_body("tell me a joke"))).await;

        assert!(!response.response.should_end_session);
        assert_eq!(
            response.response.output_speech.text,
            "Why did the robot cross the road?"
        );
    }

    #[tokio::test]
    async fn test_goodbye_ends_session() {
        let mock_server = MockServer::start().await;
        mount_reply(&mock_server, "goodbye", json!(["Thank you for using", "Alexa and Watson."])).await;

        let state = state(StubVerifier::passing(), &mock_server.uri());
        let response = respond(&state, payload(&intent_body("goodbye"))).await;

        assert_eq!(response, AlexaResponse::speak(GOODBYE_PHRASE, true));
    }

    #[tokio::test]
    async fn test_credentials_fall_back_to_environment() {
        let mock_server = MockServer::start().await;
        mount_reply(&mock_server, "start skill", json!(["Hi."])).await;

        let mut state = state(StubVerifier::passing(), &mock_server.uri());
        state.config.fallback.username = Some("env-user".to_string());
        state.config.fallback.password = Some("env-pass".to_string());
        state.config.fallback.workspace_id = Some("ws-1".to_string());

        let payload = json!({
            "__ow_body": encode(&launch_body()),
            "__ow_headers": {"signaturecertchainurl": CERT_URL, "signature": "c2lnbmF0dXJl"}
        });

        let response = respond(&state, payload).await;
        assert_eq!(response, AlexaResponse::speak("Hi.", false));
    }

    #[tokio::test]
    async fn test_dialog_service_failure() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/workspaces/ws-1/message"))
            .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
            .mount(&mock_server)
            .await;

        let state = state(StubVerifier::passing(), &mock_server.uri());
        let response = respond(&state, payload(&launch_body())).await;

        assert_eq!(response, AlexaResponse::speak(GENERIC_ERROR_SPEECH, true));
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let verifier = StubVerifier::passing();
        let state = state(verifier.clone(), "http://127.0.0.1:1");

        let mut not_base64 = payload(&launch_body());
        not_base64["__ow_body"] = json!("!!not base64!!");
        let response = respond(&state, not_base64).await;
        assert_eq!(response, AlexaResponse::speak(GENERIC_ERROR_SPEECH, true));

        let not_json = payload("this is not json");
        let response = respond(&state, not_json).await;
        assert_eq!(response, AlexaResponse::speak(GENERIC_ERROR_SPEECH, true));

        assert!(verifier.calls().is_empty());
    }

    #[test]
    fn test_decode_body() {
        assert_eq!(decode_body(&encode("{\"a\":1}")).unwrap(), "{\"a\":1}");
        assert!(decode_body("%%%").is_err());
    }
}
