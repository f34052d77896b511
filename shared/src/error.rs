//! Error types for the Alexa skill bridge.

use thiserror::Error;

/// Spoken when the function is invoked without a request body.
pub const MISSING_BODY_SPEECH: &str = "Must be called from Alexa.";

/// Spoken for every other failure.
pub const GENERIC_ERROR_SPEECH: &str = "An unexpected error occurred. Please try again later.";

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can end a skill invocation.
///
/// The message carried by a variant is for logs only. What the user hears is
/// decided by [`Error::speech`].
#[derive(Error, Debug)]
pub enum Error {
    /// The invocation carried no request body
    #[error("Missing request body")]
    MissingBody,

    /// The body could not be decoded or lacks a field the skill relies on
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// The request did not pass Alexa signature verification
    #[error("Verification failed: {0}")]
    Verification(String),

    /// Neither an IAM API key nor a username/password pair was supplied
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Watson Assistant could not be reached or answered with an error
    #[error("Dialog service error: {0}")]
    DialogService(String),
}

impl Error {
    /// User-safe text to speak back for this error.
    pub fn speech(&self) -> &'static str {
        match self {
            Error::MissingBody => MISSING_BODY_SPEECH,
            _ => GENERIC_ERROR_SPEECH,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::MalformedRequest(e.to_string())
    }
}
