use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    XChaCha20Poly1305, XNonce
};
use serde_derive::{Serialize, Deserialize};
use crate::base64;
use crate::errors::AppError;

const KEY_LENGTH: usize = 32;

/// Stored form of an encrypted Slack token.
#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct EncryptedData {
    pub nonce: String,
    pub data: String,
}

#[derive(Clone)]
pub struct Encryption {
    cipher: XChaCha20Poly1305,
}

impl Encryption {
    pub fn new(key: &[u8; KEY_LENGTH]) -> Encryption {
        Encryption {
            cipher: XChaCha20Poly1305::new(key.into()),
        }
    }

    /// Builds the cipher from the base64 `TOKEN_ENCRYPTION_KEY` value.
    pub fn from_base64_key(key_base64: &str) -> Result<Encryption, AppError> {
        let key = base64::decode_no_pad(key_base64.trim().as_bytes())?;
        let key: [u8; KEY_LENGTH] = key.try_into()
            .map_err(|key: Vec<u8>| AppError::ConfigError(format!("TOKEN_ENCRYPTION_KEY must decode to {} bytes, got {}", KEY_LENGTH, key.len())))?;

        Ok(Encryption::new(&key))
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedData, AppError> {
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng); // 192-bits; unique per message
        let ciphertext = self.cipher.encrypt(&nonce, plaintext.as_bytes())?;

        Ok(EncryptedData{
            nonce: base64::encode_no_pad(nonce.as_slice()),
            data: base64::encode_no_pad(&ciphertext),
        })
    }

    pub fn decrypt(&self, encrypted_data: &EncryptedData) -> Result<String, AppError> {
        let nonce_bytes = base64::decode_no_pad(encrypted_data.nonce.as_ref())?;
        let encrypted = base64::decode_no_pad(encrypted_data.data.as_ref())?;

        if nonce_bytes.len() != 24 {
            return Err(AppError::UnexpectedError(format!("Invalid nonce length: {}", nonce_bytes.len())));
        }

        let nonce = XNonce::from_slice(nonce_bytes.as_slice());
        let plaintext = self.cipher.decrypt(nonce, encrypted.as_slice())?;

        String::from_utf8(plaintext).map_err(|err| AppError::UnexpectedError(format!("Decrypted token is not UTF-8: {}", err)))
    }

    /// Encrypts into the JSON string kept in the installations table.
    pub fn seal(&self, plaintext: &str) -> Result<String, AppError> {
        Ok(serde_json::to_string(&self.encrypt(plaintext)?)?)
    }

    pub fn open(&self, sealed: &str) -> Result<String, AppError> {
        let encrypted: EncryptedData = serde_json::from_str(sealed)?;
        self.decrypt(&encrypted)
    }
}

#[cfg(test)]
mod tests {
    use crate::{base64, encryption::Encryption, errors::AppError};

    const KEY: &[u8; 32] = b"plain text key which should be s";

    #[test]
    fn seal_and_open_token() {
        let encryption = Encryption::new(KEY);

        let sealed = encryption.seal("xoxb-1234-abcd").expect("Failed to encrypt token");
        assert!(!sealed.contains("xoxb"));

        let opened = encryption.open(&sealed).expect("failed to decrypt sealed token");
        assert_eq!(opened, "xoxb-1234-abcd");
    }

    #[test]
    fn nonce_differs_per_message() {
        let encryption = Encryption::new(KEY);

        let first = encryption.encrypt("same").unwrap();
        let second = encryption.encrypt("same").unwrap();

        assert_ne!(first, second);
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let sealed = Encryption::new(KEY).seal("xoxb-1234").unwrap();
        let other = Encryption::new(b"another key that is 32 bytes lon");

        assert!(matches!(other.open(&sealed), Err(AppError::Chacha20poly1305Error(_))));
    }

    #[test]
    fn key_from_base64_must_be_32_bytes() {
        let key = base64::encode_with_pad(KEY);
        assert!(Encryption::from_base64_key(&key).is_ok());

        let short = base64::encode_with_pad(b"too short");
        assert!(matches!(Encryption::from_base64_key(&short), Err(AppError::ConfigError(_))));
    }
}
