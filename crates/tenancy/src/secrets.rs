//! API key and invitation token generation and verification

use hmac::{Hmac, Mac};
use lnk_shared::LnkError;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub const API_KEY_PREFIX: &str = "lnk_";
const API_KEY_VERSION: &str = "01";

/// version(2) + random(64)
const API_KEY_PAYLOAD_LEN: usize = 2 + 64;
/// First 8 bytes of the HMAC, hex encoded
const SIGNATURE_LEN: usize = 16;
const TOKEN_PAYLOAD_LEN: usize = 64;

/// Freshly minted API key. `full_key` is shown to the caller once and never
/// stored.
#[derive(Debug, Clone)]
pub struct GeneratedKey {
    pub full_key: String,
    pub key_hash: String,
    pub key_prefix: String,
}

/// Signs and checks the secrets handed out to clients
#[derive(Clone)]
pub struct SecretSigner {
    hmac_secret: Vec<u8>,
}

impl SecretSigner {
    pub fn new(secret: &str) -> Self {
        Self {
            hmac_secret: secret.as_bytes().to_vec(),
        }
    }

    /// Generate a new API key: `lnk_` + version + 32 random bytes + signature.
    pub fn generate_api_key(&self) -> Result<GeneratedKey, SecretError> {
        let random_bytes: [u8; 32] = rand::random();
        let payload = format!("{}{}", API_KEY_VERSION, hex::encode(random_bytes));
        let signature = self.sign(&payload)?;

        let full_key = format!("{}{}{}", API_KEY_PREFIX, payload, signature);
        let key_hash = hash_key(&full_key);
        // Prefix for display (first 12 chars after prefix)
        let key_prefix = format!("{}{}...", API_KEY_PREFIX, &payload[..12]);

        Ok(GeneratedKey {
            full_key,
            key_hash,
            key_prefix,
        })
    }

    /// Check the format and signature of a presented API key without
    /// touching storage.
    pub fn verify_api_key(&self, key: &str) -> bool {
        let Some(body) = key.strip_prefix(API_KEY_PREFIX) else {
            return false;
        };
        if body.len() != API_KEY_PAYLOAD_LEN + SIGNATURE_LEN || !body.is_ascii() {
            return false;
        }

        let (payload, provided_sig) = body.split_at(API_KEY_PAYLOAD_LEN);
        if !payload.starts_with(API_KEY_VERSION) {
            return false;
        }
        self.signature_matches(payload, provided_sig)
    }

    /// Invitation token: 32 random bytes and a signature, `{payload}.{sig}`.
    pub fn generate_invitation_token(&self) -> Result<String, SecretError> {
        let random_bytes: [u8; 32] = rand::random();
        let payload = hex::encode(random_bytes);
        let signature = self.sign(&payload)?;
        Ok(format!("{}.{}", payload, signature))
    }

    pub fn verify_invitation_token(&self, token: &str) -> bool {
        let Some((payload, provided_sig)) = token.split_once('.') else {
            return false;
        };
        if payload.len() != TOKEN_PAYLOAD_LEN {
            return false;
        }
        self.signature_matches(payload, provided_sig)
    }

    /// A signer that cannot sign accepts nothing.
    fn signature_matches(&self, payload: &str, provided_sig: &str) -> bool {
        match self.sign(payload) {
            Ok(expected) => constant_time_compare(provided_sig, &expected),
            Err(e) => {
                tracing::error!(error = %e, "secret verification failed");
                false
            }
        }
    }

    fn sign(&self, payload: &str) -> Result<String, SecretError> {
        let mut mac = HmacSha256::new_from_slice(&self.hmac_secret)
            .map_err(|_| SecretError::HmacInitFailed)?;
        mac.update(payload.as_bytes());
        let signature = mac.finalize().into_bytes();
        Ok(hex::encode(&signature[..8]))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("HMAC initialization failed")]
    HmacInitFailed,
}

impl From<SecretError> for LnkError {
    fn from(e: SecretError) -> Self {
        LnkError::Internal(e.to_string())
    }
}

/// One-way hash of an API key for storage and lookup
pub fn hash_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-time comparison to prevent timing attacks
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    // Even when lengths differ, we do constant-time work to avoid leaking length
    if a.len() != b.len() {
        let dummy = vec![0u8; a.len()];
        let _ = a.as_bytes().ct_eq(&dummy);
        return false;
    }

    a.as_bytes().ct_eq(b.as_bytes()).into()
}
