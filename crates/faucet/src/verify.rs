//! Human verification

use crate::config::VerificationCredentials;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub const HCAPTCHA_VERIFY_URL: &str = "https://hcaptcha.com/siteverify";

/// Evidence a claim carries from its transport.
#[derive(Debug, Clone, Default)]
pub struct VerificationEvidence {
    pub response: Option<String>,
    pub remote_ip: String,
}

#[async_trait]
pub trait Verifier: Send + Sync {
    /// `Err` carries the reason shown to the requester.
    async fn verify(&self, credentials: &VerificationCredentials, evidence: &VerificationEvidence) -> Result<(), String>;
}

/// Accepts every claim.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl Verifier for AllowAll {
    async fn verify(&self, _: &VerificationCredentials, _: &VerificationEvidence) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct SiteVerifyResponse {
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

pub struct HCaptchaVerifier {
    client: reqwest::Client,
    verify_url: String,
}

impl HCaptchaVerifier {
    pub fn new() -> Self {
        Self::with_url(HCAPTCHA_VERIFY_URL)
    }

    pub fn with_url(verify_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            verify_url: verify_url.to_string(),
        }
    }
}

impl Default for HCaptchaVerifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Verifier for HCaptchaVerifier {
    async fn verify(&self, credentials: &VerificationCredentials, evidence: &VerificationEvidence) -> Result<(), String> {
        let secret = match credentials.secret.as_deref() {
            Some(secret) if !secret.is_empty() => secret,
            _ => return Ok(()),
        };
        let response = evidence
            .response
            .as_deref()
            .filter(|r| !r.is_empty())
            .ok_or_else(|| "captcha response missing".to_string())?;

        let form = [
            ("secret", secret),
            ("response", response),
            ("remoteip", evidence.remote_ip.as_str()),
        ];
        let reply: SiteVerifyResponse = self
            .client
            .post(&self.verify_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| format!("captcha service unreachable: {}", e))?
            .json()
            .await
            .map_err(|e| format!("captcha service returned invalid response: {}", e))?;

        if reply.success {
            debug!(client = %evidence.remote_ip, "Captcha verified");
            Ok(())
        } else if reply.error_codes.is_empty() {
            Err("captcha verification failed".to_string())
        } else {
            Err(format!("captcha verification failed: {}", reply.error_codes.join(", ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evidence(response: Option<&str>) -> VerificationEvidence {
        VerificationEvidence {
            response: response.map(str::to_string),
            remote_ip: "10.0.0.1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_disabled_without_secret() {
        let verifier = HCaptchaVerifier::with_url("http://127.0.0.1:1/siteverify");
        let credentials = VerificationCredentials {
            site_key: Some("site".to_string()),
            secret: None,
        };
        assert!(verifier.verify(&credentials, &evidence(None)).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_response() {
        let verifier = HCaptchaVerifier::with_url("http://127.0.0.1:1/siteverify");
        let credentials = VerificationCredentials {
            site_key: None,
            secret: Some("secret".to_string()),
        };
        let reason = verifier.verify(&credentials, &evidence(Some(""))).await.unwrap_err();
        assert_eq!(reason, "captcha response missing");
    }

    #[tokio::test]
    async fn test_unreachable_service_fails_closed() {
        let verifier = HCaptchaVerifier::with_url("http://127.0.0.1:1/siteverify");
        let credentials = VerificationCredentials {
            site_key: None,
            secret: Some("secret".to_string()),
        };
        let reason = verifier.verify(&credentials, &evidence(Some("token"))).await.unwrap_err();
        assert!(reason.contains("unreachable"));
    }

    #[test]
    fn test_site_verify_response_shape() {
        let reply: SiteVerifyResponse =
            serde_json::from_str(r#"{"success":false,"error-codes":["invalid-input-response"]}"#).unwrap();
        assert!(!reply.success);
        assert_eq!(reply.error_codes, vec!["invalid-input-response"]);
    }
}
