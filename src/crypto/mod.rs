//! MSL crypto providers.
//!
//! Two interchangeable backends sit behind [`CryptoProvider`]:
//! - [`SoftwareCrypto`]: RSA-2048 key exchange (JWK wrapped, OAEP), AES-128-CBC
//!   with PKCS#7 padding and HMAC-SHA256.
//! - [`HardwareCrypto`]: every primitive goes through a platform Widevine
//!   crypto session ([`MediaDrm`]); only opaque key handles leave it.
//!
//! Session keys are owned by the session state and handed to each call, so a
//! provider never holds half-installed key material.

pub mod hardware;
pub mod software;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::token::MasterToken;

pub use hardware::{HardwareCrypto, MediaDrm};
pub use software::SoftwareCrypto;

/// Placeholder digest every envelope carries; the server ignores it.
pub const ENVELOPE_SHA256_PLACEHOLDER: &str = "AA==";

/// Crypto backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Software,
    HardwareDrm,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Software => write!(f, "software"),
            Backend::HardwareDrm => write!(f, "hardware_drm"),
        }
    }
}

/// Key request sent in the handshake header (`keyrequestdata`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scheme", content = "keydata")]
pub enum KeyRequestData {
    /// RSA public key; the server wraps the session keys as JWKs under it.
    #[serde(rename = "ASYMMETRIC_WRAPPED")]
    AsymmetricWrapped {
        /// Base64 DER (SubjectPublicKeyInfo) public key.
        publickey: String,
        mechanism: String,
        keypairid: String,
    },
    /// Opaque key request produced by the DRM session.
    #[serde(rename = "WIDEVINE")]
    Widevine { keyrequest: String },
}

/// Key response found in the decoded handshake header (`keyresponsedata`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KeyResponseData {
    #[serde(default)]
    pub scheme: String,
    pub keydata: Value,
    pub mastertoken: MasterToken,
}

/// Session keys produced by a handshake.
#[derive(Clone, PartialEq, Eq)]
pub enum SessionKeys {
    /// Raw key bytes (software backend).
    Software {
        encryption_key: [u8; 16],
        sign_key: [u8; 32],
    },
    /// Opaque handles into the DRM session (hardware backend).
    Hardware {
        key_set_id: Vec<u8>,
        key_id: Vec<u8>,
        hmac_key_id: Vec<u8>,
    },
}

impl SessionKeys {
    #[must_use]
    pub fn backend(&self) -> Backend {
        match self {
            SessionKeys::Software { .. } => Backend::Software,
            SessionKeys::Hardware { .. } => Backend::HardwareDrm,
        }
    }
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKeys::Software { .. } => f
                .debug_struct("Software")
                .field("encryption_key", &"<16 bytes>")
                .field("sign_key", &"<32 bytes>")
                .finish(),
            SessionKeys::Hardware {
                key_set_id,
                key_id,
                hmac_key_id,
            } => f
                .debug_struct("Hardware")
                .field("key_set_id", &hex::encode(key_set_id))
                .field("key_id", &hex::encode(key_id))
                .field("hmac_key_id", &hex::encode(hmac_key_id))
                .finish(),
        }
    }
}

/// JSON record carrying one encrypted block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionEnvelope {
    /// Set to 1 by the hardware backend only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    pub ciphertext: String,
    pub keyid: String,
    pub sha256: String,
    pub iv: String,
}

/// Uniform crypto contract shared by both backends.
///
/// Implementations are selected once when the client is built. All methods
/// take `&self`; backends that need mutation guard it internally.
pub trait CryptoProvider: Send + Sync {
    /// Which backend this is.
    fn backend(&self) -> Backend;

    /// Build the `keyrequestdata` entry for a handshake.
    fn key_request(&self) -> Result<KeyRequestData>;

    /// Unwrap the server's key response into staged session keys.
    ///
    /// Nothing is installed; the caller commits the keys together with the
    /// new master token.
    fn parse_key_response(&self, response: &KeyResponseData) -> Result<SessionKeys>;

    /// Make the keys from the last `parse_key_response` the live ones.
    fn commit_handshake(&self) -> Result<()> {
        Ok(())
    }

    /// Take keys from a server-initiated renewal carried in a response
    /// header. Call only once the accompanying master token is accepted.
    fn renew_keys(&self, response: &KeyResponseData) -> Result<SessionKeys> {
        self.parse_key_response(response)
    }

    /// Encrypt `plaintext` into an envelope. `keyid` is the `ESN_seq` label.
    fn encrypt(
        &self,
        keys: &SessionKeys,
        plaintext: &[u8],
        keyid: &str,
    ) -> Result<EncryptionEnvelope>;

    /// Decrypt an envelope and strip its padding.
    fn decrypt(&self, keys: &SessionKeys, envelope: &EncryptionEnvelope) -> Result<Vec<u8>>;

    /// HMAC-SHA256 over `message`.
    fn sign(&self, keys: &SessionKeys, message: &[u8]) -> Result<Vec<u8>>;

    /// Check a signature produced by the peer.
    fn verify(&self, keys: &SessionKeys, message: &[u8], signature: &[u8]) -> Result<bool>;

    /// Backend-specific fields of the persisted state.
    fn export_state(&self, keys: &SessionKeys) -> Result<Map<String, Value>>;

    /// Restore backend material from persisted fields and return the keys.
    fn import_state(&self, state: &Map<String, Value>) -> Result<SessionKeys>;
}

/// Read a base64 string field from persisted state.
pub(crate) fn state_bytes(state: &Map<String, Value>, field: &str) -> Result<Vec<u8>> {
    let value = state
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| crate::error::Error::StateCorruption(format!("missing {}", field)))?;
    crate::utils::b64_decode(value)
        .map_err(|e| crate::error::Error::StateCorruption(format!("{}: {}", field, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_request_serializes_with_scheme_tag() {
        let req = KeyRequestData::AsymmetricWrapped {
            publickey: "AAAA".into(),
            mechanism: "JWK_RSA".into(),
            keypairid: "superKeyPair".into(),
        };
        let json = serde_json::to_value(&req).expect("serialize");
        assert_eq!(json["scheme"], "ASYMMETRIC_WRAPPED");
        assert_eq!(json["keydata"]["keypairid"], "superKeyPair");
        assert_eq!(json["keydata"]["mechanism"], "JWK_RSA");

        let req = KeyRequestData::Widevine {
            keyrequest: "Cg==".into(),
        };
        let json = serde_json::to_value(&req).expect("serialize");
        assert_eq!(json["scheme"], "WIDEVINE");
        assert_eq!(json["keydata"]["keyrequest"], "Cg==");
    }

    #[test]
    fn session_keys_debug_hides_material() {
        let keys = SessionKeys::Software {
            encryption_key: [0x41; 16],
            sign_key: [0x42; 32],
        };
        let text = format!("{:?}", keys);
        assert!(!text.contains("65"));
        assert!(text.contains("<16 bytes>"));
    }

    #[test]
    fn software_envelope_omits_version() {
        let env = EncryptionEnvelope {
            version: None,
            ciphertext: "AA==".into(),
            keyid: "ESN_1".into(),
            sha256: ENVELOPE_SHA256_PLACEHOLDER.into(),
            iv: "AA==".into(),
        };
        let json = serde_json::to_value(&env).expect("serialize");
        let obj = json.as_object().expect("object");
        let mut keys: Vec<_> = obj.keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, ["ciphertext", "iv", "keyid", "sha256"]);
    }
}
