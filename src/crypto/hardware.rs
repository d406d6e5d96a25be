//! Hardware DRM crypto backend.
//!
//! Key exchange, encryption and signing all run inside a platform Widevine
//! crypto session. Only opaque handles (`key_set_id`, `key_id`,
//! `hmac_key_id`) are visible to the client and persisted.
//!
//! The DRM session is thread-bound on most platforms, so every call goes
//! through one mutex.
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{
    state_bytes, Backend, CryptoProvider, EncryptionEnvelope, KeyRequestData, KeyResponseData,
    SessionKeys, ENVELOPE_SHA256_PLACEHOLDER,
};
use crate::error::{Error, Result};
use crate::utils::{b64_decode, b64_encode, random_bytes};

/// Widevine system UUID.
pub const WIDEVINE_UUID: Uuid = Uuid::from_u128(0xedef8ba979d64acea3c827dcd51d21ed);
/// Cipher declared when opening the crypto session. Padding is done by hand.
pub const CIPHER_ALGORITHM: &str = "AES/CBC/NoPadding";
/// MAC declared when opening the crypto session.
pub const MAC_ALGORITHM: &str = "HmacSHA256";
/// Fixed init data for the MSL key request.
pub const KEY_REQUEST_INIT_DATA: [u8; 6] = [0x0A, 0x7A, 0x00, 0x6C, 0x38, 0x2B];
/// Mime type for the MSL key request.
pub const KEY_REQUEST_MIME_TYPE: &str = "application/xml";
/// Envelope version emitted by this backend.
pub const ENVELOPE_VERSION: u32 = 1;

const BLOCK_SIZE: usize = 16;

/// Platform DRM session contract (Android `MediaDrm` / `CryptoSession` shape).
///
/// Every call is scoped to a session id returned by [`MediaDrm::open_session`].
pub trait MediaDrm: Send {
    /// Open a crypto session for `system_id` with the given cipher and MAC.
    fn open_session(
        &mut self,
        system_id: Uuid,
        cipher_algorithm: &str,
        mac_algorithm: &str,
    ) -> Result<Vec<u8>>;

    /// Close a session. Unknown ids are ignored.
    fn close_session(&mut self, session_id: &[u8]);

    /// Produce an opaque key request blob.
    fn get_key_request(
        &mut self,
        session_id: &[u8],
        init_data: &[u8],
        mime_type: &str,
    ) -> Result<Vec<u8>>;

    /// Load the server's key response; returns the key set id.
    fn provide_key_response(&mut self, session_id: &[u8], response: &[u8]) -> Result<Vec<u8>>;

    /// Reload a previously provisioned key set into a session.
    fn restore_keys(&mut self, session_id: &[u8], key_set_id: &[u8]) -> Result<()>;

    /// Raw AES-CBC encryption (no padding) under `key_id`.
    fn encrypt(&mut self, session_id: &[u8], key_id: &[u8], input: &[u8], iv: &[u8])
        -> Result<Vec<u8>>;

    /// Raw AES-CBC decryption (no padding) under `key_id`.
    fn decrypt(&mut self, session_id: &[u8], key_id: &[u8], input: &[u8], iv: &[u8])
        -> Result<Vec<u8>>;

    /// MAC over `message` under `key_id`.
    fn sign(&mut self, session_id: &[u8], key_id: &[u8], message: &[u8]) -> Result<Vec<u8>>;

    /// Verify a MAC under `key_id`.
    fn verify(
        &mut self,
        session_id: &[u8],
        key_id: &[u8],
        message: &[u8],
        signature: &[u8],
    ) -> Result<bool>;
}

#[derive(Debug, Deserialize)]
struct CdmKeyData {
    cdmkeyresponse: String,
    encryptionkeyid: String,
    hmackeyid: String,
}

struct DrmState {
    drm: Box<dyn MediaDrm>,
    /// Session holding the live keys.
    active: Vec<u8>,
    /// Session opened by an in-progress handshake.
    pending: Option<Vec<u8>>,
}

/// Crypto provider backed by a hardware Widevine session.
pub struct HardwareCrypto {
    state: Mutex<DrmState>,
}

impl std::fmt::Debug for HardwareCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareCrypto").finish_non_exhaustive()
    }
}

impl HardwareCrypto {
    /// Open the Widevine crypto session.
    ///
    /// Fails with [`Error::BackendUnavailable`] when the platform refuses; the
    /// caller may fall back to [`super::SoftwareCrypto`].
    pub fn open(mut drm: Box<dyn MediaDrm>) -> Result<Self> {
        let active = drm
            .open_session(WIDEVINE_UUID, CIPHER_ALGORITHM, MAC_ALGORITHM)
            .map_err(|e| Error::BackendUnavailable(format!("Cannot open Widevine session: {}", e)))?;
        debug!("Opened Widevine crypto session {}", hex::encode(&active));
        Ok(Self {
            state: Mutex::new(DrmState {
                drm,
                active,
                pending: None,
            }),
        })
    }
}

impl Drop for HardwareCrypto {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(pending) = state.pending.take() {
            state.drm.close_session(&pending);
        }
        let active = std::mem::take(&mut state.active);
        state.drm.close_session(&active);
    }
}

/// Decoded `keydata` of a Widevine key response.
struct DecodedKeyData {
    cdm_response: Vec<u8>,
    key_id: Vec<u8>,
    hmac_key_id: Vec<u8>,
}

impl DecodedKeyData {
    fn into_keys(self, key_set_id: Vec<u8>) -> SessionKeys {
        SessionKeys::Hardware {
            key_set_id,
            key_id: self.key_id,
            hmac_key_id: self.hmac_key_id,
        }
    }
}

fn decode_key_data(response: &KeyResponseData) -> Result<DecodedKeyData> {
    if !response.scheme.is_empty() && response.scheme != "WIDEVINE" {
        return Err(Error::HandshakeFailed(format!(
            "Unexpected key exchange scheme {}",
            response.scheme
        )));
    }
    let key_data: CdmKeyData = serde_json::from_value(response.keydata.clone())
        .map_err(|e| Error::HandshakeFailed(format!("Invalid key data: {}", e)))?;
    Ok(DecodedKeyData {
        cdm_response: b64_decode(&key_data.cdmkeyresponse)
            .map_err(|e| Error::HandshakeFailed(format!("cdmkeyresponse: {}", e)))?,
        key_id: b64_decode(&key_data.encryptionkeyid)
            .map_err(|e| Error::HandshakeFailed(format!("encryptionkeyid: {}", e)))?,
        hmac_key_id: b64_decode(&key_data.hmackeyid)
            .map_err(|e| Error::HandshakeFailed(format!("hmackeyid: {}", e)))?,
    })
}

fn hardware_keys(keys: &SessionKeys) -> Result<(&[u8], &[u8], &[u8])> {
    match keys {
        SessionKeys::Hardware {
            key_set_id,
            key_id,
            hmac_key_id,
        } => Ok((key_set_id, key_id, hmac_key_id)),
        SessionKeys::Software { .. } => Err(Error::StateCorruption(
            "software session keys handed to the hardware backend".to_string(),
        )),
    }
}

/// PKCS#5 pad to the AES block size.
fn pad(plaintext: &[u8]) -> Vec<u8> {
    let pad = BLOCK_SIZE - plaintext.len() % BLOCK_SIZE;
    let mut out = Vec::with_capacity(plaintext.len() + pad);
    out.extend_from_slice(plaintext);
    out.resize(plaintext.len() + pad, pad as u8);
    out
}

/// Drop as many trailing bytes as the last byte says.
fn unpad(mut data: Vec<u8>) -> Result<Vec<u8>> {
    let pad = *data
        .last()
        .ok_or_else(|| Error::ProtocolCorruption("empty plaintext".to_string()))?
        as usize;
    if pad == 0 || pad > BLOCK_SIZE || pad > data.len() {
        return Err(Error::ProtocolCorruption(format!("invalid pad length {}", pad)));
    }
    data.truncate(data.len() - pad);
    Ok(data)
}

impl CryptoProvider for HardwareCrypto {
    fn backend(&self) -> Backend {
        Backend::HardwareDrm
    }

    fn key_request(&self) -> Result<KeyRequestData> {
        let mut state = self.state.lock();
        if let Some(stale) = state.pending.take() {
            state.drm.close_session(&stale);
        }
        let session = state
            .drm
            .open_session(WIDEVINE_UUID, CIPHER_ALGORITHM, MAC_ALGORITHM)
            .map_err(|e| Error::BackendUnavailable(format!("Cannot open Widevine session: {}", e)))?;
        let request = state
            .drm
            .get_key_request(&session, &KEY_REQUEST_INIT_DATA, KEY_REQUEST_MIME_TYPE);
        match request {
            Ok(request) => {
                state.pending = Some(session);
                Ok(KeyRequestData::Widevine {
                    keyrequest: b64_encode(request),
                })
            }
            Err(e) => {
                state.drm.close_session(&session);
                Err(Error::HandshakeFailed(format!("DRM key request failed: {}", e)))
            }
        }
    }

    fn parse_key_response(&self, response: &KeyResponseData) -> Result<SessionKeys> {
        let key_data = decode_key_data(response)?;
        let mut state = self.state.lock();
        let pending = state
            .pending
            .clone()
            .ok_or_else(|| Error::HandshakeFailed("No key request in progress".to_string()))?;
        let key_set_id = state
            .drm
            .provide_key_response(&pending, &key_data.cdm_response)
            .map_err(|e| Error::HandshakeFailed(format!("DRM rejected key response: {}", e)))?;
        Ok(key_data.into_keys(key_set_id))
    }

    /// A renewal answers no key request of ours, so it goes straight into the
    /// active session. Any pending handshake is left alone.
    fn renew_keys(&self, response: &KeyResponseData) -> Result<SessionKeys> {
        let key_data = decode_key_data(response)?;
        let mut state = self.state.lock();
        let DrmState { drm, active, .. } = &mut *state;
        let key_set_id = drm
            .provide_key_response(active, &key_data.cdm_response)
            .map_err(|e| Error::HandshakeFailed(format!("DRM rejected key renewal: {}", e)))?;
        debug!("Renewed keys in Widevine session {}", hex::encode(active));
        Ok(key_data.into_keys(key_set_id))
    }

    fn commit_handshake(&self) -> Result<()> {
        let mut state = self.state.lock();
        let pending = state
            .pending
            .take()
            .ok_or_else(|| Error::HandshakeFailed("No key request in progress".to_string()))?;
        let previous = std::mem::replace(&mut state.active, pending);
        state.drm.close_session(&previous);
        Ok(())
    }

    fn encrypt(
        &self,
        keys: &SessionKeys,
        plaintext: &[u8],
        _keyid: &str,
    ) -> Result<EncryptionEnvelope> {
        let (_, key_id, _) = hardware_keys(keys)?;
        let iv: [u8; 16] = random_bytes();
        let padded = pad(plaintext);

        let mut state = self.state.lock();
        let DrmState { drm, active, .. } = &mut *state;
        let ciphertext = drm.encrypt(active, key_id, &padded, &iv)?;

        Ok(EncryptionEnvelope {
            version: Some(ENVELOPE_VERSION),
            ciphertext: b64_encode(ciphertext),
            keyid: b64_encode(key_id),
            sha256: ENVELOPE_SHA256_PLACEHOLDER.to_string(),
            iv: b64_encode(iv),
        })
    }

    fn decrypt(&self, keys: &SessionKeys, envelope: &EncryptionEnvelope) -> Result<Vec<u8>> {
        let (_, key_id, _) = hardware_keys(keys)?;
        let iv = b64_decode(&envelope.iv).map_err(Error::into_corruption)?;
        let ciphertext = b64_decode(&envelope.ciphertext).map_err(Error::into_corruption)?;
        if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(Error::ProtocolCorruption(format!(
                "ciphertext length {} is not a block multiple",
                ciphertext.len()
            )));
        }

        let mut state = self.state.lock();
        let DrmState { drm, active, .. } = &mut *state;
        let plaintext = drm
            .decrypt(active, key_id, &ciphertext, &iv)
            .map_err(|e| Error::ProtocolCorruption(format!("DRM decrypt failed: {}", e)))?;
        unpad(plaintext)
    }

    fn sign(&self, keys: &SessionKeys, message: &[u8]) -> Result<Vec<u8>> {
        let (_, _, hmac_key_id) = hardware_keys(keys)?;
        let mut state = self.state.lock();
        let DrmState { drm, active, .. } = &mut *state;
        drm.sign(active, hmac_key_id, message)
    }

    fn verify(&self, keys: &SessionKeys, message: &[u8], signature: &[u8]) -> Result<bool> {
        let (_, _, hmac_key_id) = hardware_keys(keys)?;
        let mut state = self.state.lock();
        let DrmState { drm, active, .. } = &mut *state;
        drm.verify(active, hmac_key_id, message, signature)
    }

    fn export_state(&self, keys: &SessionKeys) -> Result<Map<String, Value>> {
        let (key_set_id, key_id, hmac_key_id) = hardware_keys(keys)?;
        let mut state = Map::new();
        state.insert("key_set_id".into(), b64_encode(key_set_id).into());
        state.insert("key_id".into(), b64_encode(key_id).into());
        state.insert("hmac_key_id".into(), b64_encode(hmac_key_id).into());
        Ok(state)
    }

    fn import_state(&self, persisted: &Map<String, Value>) -> Result<SessionKeys> {
        let key_set_id = state_bytes(persisted, "key_set_id")?;
        let key_id = state_bytes(persisted, "key_id")?;
        let hmac_key_id = state_bytes(persisted, "hmac_key_id")?;

        let mut state = self.state.lock();
        let DrmState { drm, active, .. } = &mut *state;
        drm.restore_keys(active, &key_set_id)
            .map_err(|e| Error::StateCorruption(format!("Cannot restore DRM keys: {}", e)))?;

        Ok(SessionKeys::Hardware {
            key_set_id,
            key_id,
            hmac_key_id,
        })
    }
}
