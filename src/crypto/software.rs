//! Software crypto backend.
//!
//! The handshake sends an RSA public key (`ASYMMETRIC_WRAPPED`, `JWK_RSA`);
//! the server answers with the AES and HMAC keys as JWKs encrypted under it
//! with RSA-OAEP (SHA-1). Envelopes use AES-128-CBC with PKCS#7 padding and a
//! random IV, signatures are HMAC-SHA256.

use aes::Aes128;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey};
use rsa::rand_core::OsRng;
use rsa::{Oaep, RsaPrivateKey};
use serde::Deserialize;
use serde_json::{Map, Value};
use sha1::Sha1;
use sha2::Sha256;

use super::{
    state_bytes, Backend, CryptoProvider, EncryptionEnvelope, KeyRequestData, KeyResponseData,
    SessionKeys, ENVELOPE_SHA256_PLACEHOLDER,
};
use crate::error::{Error, Result};
use crate::utils::{b64_decode, b64_encode, decode_jwk_key, random_bytes};

type HmacSha256 = Hmac<Sha256>;
type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// Key pair identifier the server expects for asymmetric wrapping.
pub const KEY_PAIR_ID: &str = "superKeyPair";
/// Key exchange mechanism.
pub const MECHANISM: &str = "JWK_RSA";
/// RSA modulus size generated on first run.
pub const RSA_KEY_BITS: usize = 2048;

#[derive(Debug, Deserialize)]
struct WrappedKeyData {
    encryptionkey: String,
    hmackey: String,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    k: String,
}

/// Software (RSA/AES/HMAC) crypto provider.
pub struct SoftwareCrypto {
    rsa_key: RwLock<RsaPrivateKey>,
}

impl std::fmt::Debug for SoftwareCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareCrypto").finish_non_exhaustive()
    }
}

impl SoftwareCrypto {
    /// Create a provider with a freshly generated RSA-2048 key pair.
    pub fn new() -> Result<Self> {
        Self::generate(RSA_KEY_BITS)
    }

    /// Create a provider with a freshly generated key pair of `bits`.
    pub fn generate(bits: usize) -> Result<Self> {
        debug!("Generating RSA-{} key pair", bits);
        let key = RsaPrivateKey::new(&mut OsRng, bits)?;
        Ok(Self::from_private_key(key))
    }

    /// Create a provider around an existing key pair.
    #[must_use]
    pub fn from_private_key(key: RsaPrivateKey) -> Self {
        Self {
            rsa_key: RwLock::new(key),
        }
    }

    /// DER (SubjectPublicKeyInfo) encoding of the current public key.
    pub fn public_key_der(&self) -> Result<Vec<u8>> {
        let der = self
            .rsa_key
            .read()
            .to_public_key()
            .to_public_key_der()
            .map_err(|e| Error::Other(format!("Failed to encode public key: {}", e)))?;
        Ok(der.as_bytes().to_vec())
    }

    fn unwrap_jwk(&self, wrapped_b64: &str, expected_len: usize) -> Result<Vec<u8>> {
        let wrapped = b64_decode(wrapped_b64)
            .map_err(|e| Error::HandshakeFailed(format!("wrapped key is not base64: {}", e)))?;
        let jwk_bytes = self
            .rsa_key
            .read()
            .decrypt(Oaep::new::<Sha1>(), &wrapped)
            .map_err(|e| Error::HandshakeFailed(format!("RSA-OAEP unwrap failed: {}", e)))?;
        let jwk: Jwk = serde_json::from_slice(&jwk_bytes)
            .map_err(|e| Error::HandshakeFailed(format!("wrapped key is not a JWK: {}", e)))?;
        let key = decode_jwk_key(&jwk.k)?;
        if key.len() != expected_len {
            return Err(Error::HandshakeFailed(format!(
                "Unexpected key length: expected {}, got {}",
                expected_len,
                key.len()
            )));
        }
        Ok(key)
    }
}

fn software_keys(keys: &SessionKeys) -> Result<(&[u8; 16], &[u8; 32])> {
    match keys {
        SessionKeys::Software {
            encryption_key,
            sign_key,
        } => Ok((encryption_key, sign_key)),
        SessionKeys::Hardware { .. } => Err(Error::StateCorruption(
            "hardware session keys handed to the software backend".to_string(),
        )),
    }
}

impl CryptoProvider for SoftwareCrypto {
    fn backend(&self) -> Backend {
        Backend::Software
    }

    fn key_request(&self) -> Result<KeyRequestData> {
        Ok(KeyRequestData::AsymmetricWrapped {
            publickey: b64_encode(self.public_key_der()?),
            mechanism: MECHANISM.to_string(),
            keypairid: KEY_PAIR_ID.to_string(),
        })
    }

    fn parse_key_response(&self, response: &KeyResponseData) -> Result<SessionKeys> {
        if !response.scheme.is_empty() && response.scheme != "ASYMMETRIC_WRAPPED" {
            return Err(Error::HandshakeFailed(format!(
                "Unexpected key exchange scheme {}",
                response.scheme
            )));
        }
        let key_data: WrappedKeyData = serde_json::from_value(response.keydata.clone())
            .map_err(|e| Error::HandshakeFailed(format!("Invalid key data: {}", e)))?;

        let mut encryption_key = [0u8; 16];
        encryption_key.copy_from_slice(&self.unwrap_jwk(&key_data.encryptionkey, 16)?);
        let mut sign_key = [0u8; 32];
        sign_key.copy_from_slice(&self.unwrap_jwk(&key_data.hmackey, 32)?);

        Ok(SessionKeys::Software {
            encryption_key,
            sign_key,
        })
    }

    fn encrypt(
        &self,
        keys: &SessionKeys,
        plaintext: &[u8],
        keyid: &str,
    ) -> Result<EncryptionEnvelope> {
        let (encryption_key, _) = software_keys(keys)?;
        let iv: [u8; 16] = random_bytes();
        let ciphertext = aes_cbc_encrypt(encryption_key, &iv, plaintext);
        Ok(EncryptionEnvelope {
            version: None,
            ciphertext: b64_encode(ciphertext),
            keyid: keyid.to_string(),
            sha256: ENVELOPE_SHA256_PLACEHOLDER.to_string(),
            iv: b64_encode(iv),
        })
    }

    fn decrypt(&self, keys: &SessionKeys, envelope: &EncryptionEnvelope) -> Result<Vec<u8>> {
        let (encryption_key, _) = software_keys(keys)?;
        let iv = b64_decode(&envelope.iv).map_err(Error::into_corruption)?;
        let ciphertext = b64_decode(&envelope.ciphertext).map_err(Error::into_corruption)?;
        aes_cbc_decrypt(encryption_key, &iv, &ciphertext)
    }

    fn sign(&self, keys: &SessionKeys, message: &[u8]) -> Result<Vec<u8>> {
        let (_, sign_key) = software_keys(keys)?;
        Ok(hmac_sha256(sign_key, message))
    }

    fn verify(&self, keys: &SessionKeys, message: &[u8], signature: &[u8]) -> Result<bool> {
        let (_, sign_key) = software_keys(keys)?;
        Ok(hmac_sha256_verify(sign_key, message, signature))
    }

    fn export_state(&self, keys: &SessionKeys) -> Result<Map<String, Value>> {
        let (encryption_key, sign_key) = software_keys(keys)?;
        let rsa_der = self
            .rsa_key
            .read()
            .to_pkcs8_der()
            .map_err(|e| Error::Other(format!("Failed to encode RSA key: {}", e)))?;

        let mut state = Map::new();
        state.insert("encryption_key".into(), b64_encode(encryption_key).into());
        state.insert("sign_key".into(), b64_encode(sign_key).into());
        state.insert("rsa_key".into(), b64_encode(rsa_der.as_bytes()).into());
        Ok(state)
    }

    fn import_state(&self, state: &Map<String, Value>) -> Result<SessionKeys> {
        let encryption_key: [u8; 16] = state_bytes(state, "encryption_key")?
            .try_into()
            .map_err(|_| Error::StateCorruption("encryption_key must be 16 bytes".into()))?;
        let sign_key: [u8; 32] = state_bytes(state, "sign_key")?
            .try_into()
            .map_err(|_| Error::StateCorruption("sign_key must be 32 bytes".into()))?;
        let rsa_der = state_bytes(state, "rsa_key")?;
        let rsa_key = RsaPrivateKey::from_pkcs8_der(&rsa_der)
            .map_err(|e| Error::StateCorruption(format!("rsa_key: {}", e)))?;

        *self.rsa_key.write() = rsa_key;
        Ok(SessionKeys::Software {
            encryption_key,
            sign_key,
        })
    }
}

/// AES-128-CBC encrypt with PKCS#7 padding.
pub(crate) fn aes_cbc_encrypt(key: &[u8; 16], iv: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
    Aes128CbcEnc::new(&(*key).into(), &(*iv).into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

/// AES-128-CBC decrypt and strip PKCS#7 padding.
pub(crate) fn aes_cbc_decrypt(key: &[u8; 16], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let iv: [u8; 16] = iv
        .try_into()
        .map_err(|_| Error::ProtocolCorruption(format!("IV must be 16 bytes, got {}", iv.len())))?;
    Aes128CbcDec::new(&(*key).into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|e| Error::ProtocolCorruption(format!("Failed to decrypt envelope: {}", e)))
}

pub(crate) fn hmac_sha256(key: &[u8], message: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

/// Constant-time HMAC-SHA256 check.
pub(crate) fn hmac_sha256_verify(key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(message);
    mac.verify_slice(signature).is_ok()
}
