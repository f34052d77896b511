//! Alexa request signature verification.
//!
//! Alexa signs every skill request with the private key of a certificate it
//! publishes on S3. The request names that certificate chain in the
//! `SignatureCertChainUrl` header and carries a base64 RSA-SHA1 signature of
//! the raw body in the `Signature` header.

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client as HttpClient;
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::Verifier;
use rsa::RsaPublicKey;
use sha1::Sha1;
use std::collections::HashMap;
use std::sync::OnceLock;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use url::Url;
use x509_parser::extensions::GeneralName;
use x509_parser::pem::Pem;

use crate::{Error, Result};

/// Host that serves Alexa signing certificates.
const CERT_HOST: &str = "s3.amazonaws.com";

/// Path prefix every Alexa certificate URL must start with.
const CERT_PATH_PREFIX: &str = "/echo.api/";

/// Subject alternative name the signing certificate must carry.
const ECHO_API_DOMAIN: &str = "echo-api.amazon.com";

/// Checks that a request really comes from Alexa.
#[async_trait]
pub trait RequestVerifier: Send + Sync {
    /// Verify `body` against the certificate chain URL and signature taken
    /// from the request headers.
    async fn verify(&self, cert_url: &str, signature: &str, body: &str) -> Result<()>;
}

/// Downloaded certificate chains keyed by URL.
static CERT_CACHE: OnceLock<RwLock<HashMap<String, Vec<u8>>>> = OnceLock::new();

fn get_cache() -> &'static RwLock<HashMap<String, Vec<u8>>> {
    CERT_CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Clear the certificate cache (useful for testing or certificate rotation).
pub async fn clear_cache() {
    let mut cache = get_cache().write().await;
    cache.clear();
}

/// Verifies requests the way the Alexa Skills Kit requires.
pub struct AlexaVerifier {
    http_client: HttpClient,
    timestamp_tolerance: Duration,
}

impl AlexaVerifier {
    /// Create a verifier that accepts requests up to `tolerance_secs` old.
    pub fn new(http_client: HttpClient, tolerance_secs: i64) -> Self {
        Self {
            http_client,
            timestamp_tolerance: Duration::seconds(tolerance_secs),
        }
    }

    /// Fetch the PEM certificate chain, using the cache when possible.
    async fn fetch_cert_chain(&self, url: &Url) -> Result<Vec<u8>> {
        {
            let cache = get_cache().read().await;
            if let Some(chain) = cache.get(url.as_str()) {
                return Ok(chain.clone());
            }
        }

        debug!("Downloading certificate chain from {}", url);

        let response = self
            .http_client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::Verification(format!("Failed to download certificate: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Verification(format!(
                "Certificate download failed: {}",
                response.status()
            )));
        }

        let chain = response
            .bytes()
            .await
            .map_err(|e| Error::Verification(format!("Failed to read certificate: {}", e)))?
            .to_vec();

        {
            let mut cache = get_cache().write().await;
            cache.insert(url.to_string(), chain.clone());
        }

        Ok(chain)
    }
}

#[async_trait]
impl RequestVerifier for AlexaVerifier {
    async fn verify(&self, cert_url: &str, signature: &str, body: &str) -> Result<()> {
        let url = validate_cert_url(cert_url)?;

        if signature.is_empty() {
            return Err(Error::Verification("Missing signature".to_string()));
        }
        let signature = base64::engine::general_purpose::STANDARD
            .decode(signature)
            .map_err(|e| Error::Verification(format!("Invalid signature encoding: {}", e)))?;

        check_timestamp(body, Utc::now(), self.timestamp_tolerance)?;

        let chain = self.fetch_cert_chain(&url).await?;
        let public_key = validate_cert_chain(&chain)?;

        verify_body_signature(&public_key, &signature, body.as_bytes())
    }
}

/// Check that the certificate URL points at Alexa's certificate bucket.
pub fn validate_cert_url(cert_url: &str) -> Result<Url> {
    if cert_url.is_empty() {
        return Err(Error::Verification("Missing certificate URL".to_string()));
    }

    // Parsing lowercases scheme and host, drops the default port and
    // resolves dot segments in the path.
    let url = Url::parse(cert_url)
        .map_err(|e| Error::Verification(format!("Invalid certificate URL: {}", e)))?;

    if url.scheme() != "https" {
        return Err(Error::Verification(format!(
            "Certificate URL must use https: {}",
            cert_url
        )));
    }

    if url.host_str() != Some(CERT_HOST) {
        return Err(Error::Verification(format!(
            "Certificate URL has unexpected host: {}",
            cert_url
        )));
    }

    if !url.path().starts_with(CERT_PATH_PREFIX) {
        return Err(Error::Verification(format!(
            "Certificate URL has unexpected path: {}",
            cert_url
        )));
    }

    if url.port().is_some_and(|port| port != 443) {
        return Err(Error::Verification(format!(
            "Certificate URL has unexpected port: {}",
            cert_url
        )));
    }

    Ok(url)
}

/// Reject requests whose `request.timestamp` is too far from `now`.
pub fn check_timestamp(body: &str, now: DateTime<Utc>, tolerance: Duration) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| Error::Verification(format!("Request body is not JSON: {}", e)))?;

    let timestamp = value
        .pointer("/request/timestamp")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Verification("Request has no timestamp".to_string()))?;

    let sent = DateTime::parse_from_rfc3339(timestamp)
        .map_err(|e| Error::Verification(format!("Invalid request timestamp: {}", e)))?
        .with_timezone(&Utc);

    let skew = now.signed_duration_since(sent);
    if skew.num_seconds().abs() > tolerance.num_seconds() {
        warn!("Request timestamp {} is {}s away from now", timestamp, skew.num_seconds());
        return Err(Error::Verification("Request timestamp is out of range".to_string()));
    }

    Ok(())
}

/// Validate the PEM chain and return the signing certificate's public key
/// as DER-encoded SubjectPublicKeyInfo.
pub fn validate_cert_chain(pem_data: &[u8]) -> Result<Vec<u8>> {
    let pems = Pem::iter_from_buffer(pem_data)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Verification(format!("Invalid certificate PEM: {}", e)))?;

    let certs = pems
        .iter()
        .map(|pem| pem.parse_x509())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Verification(format!("Invalid certificate: {}", e)))?;

    let leaf = certs
        .first()
        .ok_or_else(|| Error::Verification("Certificate chain is empty".to_string()))?;

    if !leaf.validity().is_valid() {
        return Err(Error::Verification(
            "Signing certificate is expired or not yet valid".to_string(),
        ));
    }

    let san = leaf
        .subject_alternative_name()
        .map_err(|e| Error::Verification(format!("Invalid subject alternative names: {}", e)))?
        .ok_or_else(|| {
            Error::Verification("Signing certificate has no subject alternative names".to_string())
        })?;

    let covers_echo_api = san
        .value
        .general_names
        .iter()
        .any(|name| matches!(name, GeneralName::DNSName(dns) if *dns == ECHO_API_DOMAIN));

    if !covers_echo_api {
        return Err(Error::Verification(format!(
            "Signing certificate is not issued for {}",
            ECHO_API_DOMAIN
        )));
    }

    for pair in certs.windows(2) {
        pair[0]
            .verify_signature(Some(pair[1].public_key()))
            .map_err(|e| Error::Verification(format!("Broken certificate chain: {}", e)))?;
    }

    Ok(leaf.public_key().raw.to_vec())
}

/// Check the RSA-SHA1 signature of the raw request body.
pub fn verify_body_signature(public_key_der: &[u8], signature: &[u8], body: &[u8]) -> Result<()> {
    let public_key = RsaPublicKey::from_public_key_der(public_key_der)
        .map_err(|e| Error::Verification(format!("Unsupported certificate key: {}", e)))?;

    let verifying_key = VerifyingKey::<Sha1>::new(public_key);

    let signature = Signature::try_from(signature)
        .map_err(|e| Error::Verification(format!("Invalid signature: {}", e)))?;

    verifying_key
        .verify(body, &signature)
        .map_err(|_| Error::Verification("Request body signature does not match".to_string()))
}
