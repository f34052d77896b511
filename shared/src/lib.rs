//! Shared library for the Alexa skill bridge.
//!
//! This crate provides the error taxonomy, configuration, Alexa wire models,
//! the Watson Assistant client and request verification used by the skill Lambda.

pub mod assistant;
pub mod config;
pub mod error;
pub mod models;
pub mod verifier;

pub use assistant::{AssistantClient, AssistantConfig, Credentials, MessageResponse};
pub use config::Config;
pub use error::{Error, Result};
pub use models::{AlexaResponse, AssistantArgs, IncomingRequest, InvocationArgs, SkillRequest};
pub use verifier::{AlexaVerifier, RequestVerifier};
