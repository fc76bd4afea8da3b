use base64::{Engine as _, engine::general_purpose};

use crate::errors::AppError;

pub fn encode_no_pad(bytes: &[u8]) -> String {
    general_purpose::STANDARD_NO_PAD.encode(bytes)
}

pub fn encode_with_pad(bytes: &[u8]) -> String {
    general_purpose::STANDARD.encode(bytes)
}

pub fn encode_url_safe(bytes: &[u8]) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Accepts keys with or without trailing padding.
pub fn decode_no_pad(encoded: &[u8]) -> Result<Vec<u8>, AppError> {
    let trimmed: Vec<u8> = encoded.iter().copied().filter(|b| *b != b'=').collect();
    Ok(general_purpose::STANDARD_NO_PAD.decode(trimmed)?)
}
