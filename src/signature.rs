use axum::http::HeaderMap;
use chrono::Utc;
use ring::hmac;

use crate::errors::AppError;

pub const SLACK_TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";
pub const SLACK_SIGNATURE_HEADER: &str = "x-slack-signature";

const SIGNATURE_VERSION: &str = "v0";
const MAX_CLOCK_SKEW_SECONDS: i64 = 60 * 5;

/// Verifies the `X-Slack-Signature` Slack attaches to every request.
#[derive(Clone)]
pub struct SignatureVerifier {
    key: hmac::Key,
}

impl SignatureVerifier {
    pub fn new(signing_secret: &str) -> SignatureVerifier {
        SignatureVerifier { key: hmac::Key::new(hmac::HMAC_SHA256, signing_secret.as_bytes()) }
    }

    pub fn sign(&self, timestamp: i64, body: &str) -> String {
        let sig_basestring = format!("{}:{}:{}", SIGNATURE_VERSION, timestamp, body);
        let signature = hex::encode(hmac::sign(&self.key, sig_basestring.as_bytes()).as_ref());

        format!("{}={}", SIGNATURE_VERSION, signature)
    }

    pub fn verify(&self, headers: &HeaderMap, body: &str) -> Result<(), AppError> {
        let timestamp = header(headers, SLACK_TIMESTAMP_HEADER)?;
        let signature = header(headers, SLACK_SIGNATURE_HEADER)?;

        self.verify_at(timestamp, signature, body, Utc::now().timestamp())
    }

    pub fn verify_at(&self, timestamp: &str, signature: &str, body: &str, now: i64) -> Result<(), AppError> {
        let slack_request_timestamp: i64 = timestamp.trim().parse()
            .map_err(|_| AppError::InvalidSignature(format!("invalid timestamp {}", timestamp)))?;

        if (now - slack_request_timestamp).abs() > MAX_CLOCK_SKEW_SECONDS {
            return Err(AppError::InvalidSignature(format!("stale timestamp {}", slack_request_timestamp)));
        }

        let expected = signature.strip_prefix("v0=")
            .and_then(|hex_signature| hex::decode(hex_signature).ok())
            .ok_or_else(|| AppError::InvalidSignature("malformed signature".to_string()))?;

        let sig_basestring = format!("{}:{}:{}", SIGNATURE_VERSION, slack_request_timestamp, body);

        // constant time comparison
        hmac::verify(&self.key, sig_basestring.as_bytes(), &expected)
            .map_err(|_| AppError::InvalidSignature("signature mismatch".to_string()))
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, AppError> {
    headers.get(name)
        .ok_or_else(|| AppError::InvalidSignature(format!("missing {}", name)))?
        .to_str()
        .map_err(|_| AppError::InvalidSignature(format!("invalid {}", name)))
}
