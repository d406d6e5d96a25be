//! Test doubles: fixed RSA keys, a fake Widevine session and an in-process
//! MSL server.
use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use aes::Aes128;
use base64::Engine;
use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use flate2::write::GzEncoder;
use parking_lot::Mutex;
use rsa::pkcs8::DecodePublicKey;
use rsa::rand_core::OsRng;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use serde_json::{json, Value};
use sha1::Sha1;
use uuid::Uuid;

use crate::crypto::hardware::{MediaDrm, WIDEVINE_UUID};
use crate::crypto::software::{aes_cbc_decrypt, aes_cbc_encrypt, hmac_sha256, hmac_sha256_verify};
use crate::crypto::{KeyRequestData, KeyResponseData, SoftwareCrypto};
use crate::envelope::{split_chunks, HeaderData, WireHeader, WirePayload};
use crate::error::{Error, Result};
use crate::token::MasterToken;
use crate::transport::{HttpResponse, Transport};
use crate::utils::{b64_decode, b64_encode, random_bytes, unix_now};

const TEST_KEY_BITS: usize = 1024;
const TOKEN_SERIAL: u64 = 4242;

static TEST_RSA_KEY: LazyLock<RsaPrivateKey> =
    LazyLock::new(|| RsaPrivateKey::new(&mut OsRng, TEST_KEY_BITS).expect("test RSA key"));
static OTHER_RSA_KEY: LazyLock<RsaPrivateKey> =
    LazyLock::new(|| RsaPrivateKey::new(&mut OsRng, TEST_KEY_BITS).expect("test RSA key"));

/// Software provider over a shared 1024-bit test key.
pub fn software_crypto() -> SoftwareCrypto {
    SoftwareCrypto::from_private_key(TEST_RSA_KEY.clone())
}

/// A second, different test key.
pub fn other_rsa_key() -> RsaPrivateKey {
    OTHER_RSA_KEY.clone()
}

/// Master token with `expiration = now + lifetime_secs`.
pub fn master_token(sequence: u64, lifetime_secs: i64) -> MasterToken {
    let tokendata = json!({
        "sequencenumber": sequence,
        "expiration": unix_now() + lifetime_secs,
        "renewalwindow": unix_now() + lifetime_secs / 2,
        "serialnumber": TOKEN_SERIAL,
    });
    MasterToken::new(
        b64_encode(tokendata.to_string()),
        b64_encode(format!("server-signature-{}", sequence)),
    )
    .expect("valid test token")
}

fn wrap_jwk(public: &RsaPublicKey, key: &[u8]) -> String {
    let jwk = json!({
        "k": base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(key),
        "kty": "oct",
    });
    let wrapped = public
        .encrypt(&mut OsRng, Oaep::new::<Sha1>(), jwk.to_string().as_bytes())
        .expect("OAEP wrap");
    b64_encode(wrapped)
}

/// Server key response wrapping `encryption_key`/`sign_key` for `crypto`.
pub fn wrap_jwk_response(
    crypto: &SoftwareCrypto,
    encryption_key: &[u8; 16],
    sign_key: &[u8; 32],
    master_token: MasterToken,
) -> KeyResponseData {
    let public = RsaPublicKey::from_public_key_der(&crypto.public_key_der().expect("der"))
        .expect("public key");
    KeyResponseData {
        scheme: "ASYMMETRIC_WRAPPED".to_string(),
        keydata: json!({
            "encryptionkey": wrap_jwk(&public, encryption_key),
            "hmackey": wrap_jwk(&public, sign_key),
            "keypairid": "superKeyPair",
        }),
        mastertoken: master_token,
    }
}

const FAKE_ENCRYPTION_KEY: [u8; 16] = [0x31; 16];
const FAKE_HMAC_KEY: [u8; 32] = [0x32; 32];
const FAKE_ENCRYPTION_KEY_ID: &[u8] = b"fake-wv-enc-key";
const FAKE_HMAC_KEY_ID: &[u8] = b"fake-wv-hmac-key";

#[derive(Default)]
struct FakeDrmState {
    fail_open: bool,
    next_id: u8,
    /// Session id -> loaded key set.
    sessions: HashMap<Vec<u8>, Option<Vec<u8>>>,
    /// Key set id -> (encryption key, hmac key).
    key_sets: HashMap<Vec<u8>, ([u8; 16], [u8; 32])>,
}

impl FakeDrmState {
    fn session_keys(&self, session_id: &[u8]) -> Result<([u8; 16], [u8; 32])> {
        let key_set = self
            .sessions
            .get(session_id)
            .ok_or_else(|| Error::Other("unknown DRM session".into()))?
            .as_ref()
            .ok_or_else(|| Error::Other("no keys loaded".into()))?;
        self.key_sets
            .get(key_set)
            .copied()
            .ok_or_else(|| Error::Other("unknown key set".into()))
    }
}

/// In-memory Widevine crypto session. Clones share state.
#[derive(Clone, Default)]
pub struct FakeDrm {
    state: Arc<Mutex<FakeDrmState>>,
}

impl FakeDrm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_open(&self, fail: bool) {
        self.state.lock().fail_open = fail;
    }

    pub fn expected_key_request(&self) -> Vec<u8> {
        let mut request = b"KEYREQ".to_vec();
        request.extend_from_slice(&crate::crypto::hardware::KEY_REQUEST_INIT_DATA);
        request
    }

    pub fn encryption_key_id(&self) -> Vec<u8> {
        FAKE_ENCRYPTION_KEY_ID.to_vec()
    }

    pub fn hmac_key_id(&self) -> Vec<u8> {
        FAKE_HMAC_KEY_ID.to_vec()
    }

    /// Keys the license server provisions into the session.
    pub fn server_keys(&self) -> ([u8; 16], [u8; 32]) {
        (FAKE_ENCRYPTION_KEY, FAKE_HMAC_KEY)
    }

    pub fn open_sessions(&self) -> usize {
        self.state.lock().sessions.len()
    }
}

fn check_key_id(key_id: &[u8], expected: &[u8]) -> Result<()> {
    if key_id == expected {
        Ok(())
    } else {
        Err(Error::Other("unknown key id".into()))
    }
}

impl MediaDrm for FakeDrm {
    fn open_session(&mut self, system_id: Uuid, cipher: &str, mac: &str) -> Result<Vec<u8>> {
        let mut state = self.state.lock();
        if state.fail_open {
            return Err(Error::Other("ERROR_DRM_NOT_PROVISIONED".into()));
        }
        assert_eq!(system_id, WIDEVINE_UUID);
        assert_eq!(cipher, "AES/CBC/NoPadding");
        assert_eq!(mac, "HmacSHA256");
        state.next_id += 1;
        let id = vec![0xd0, state.next_id];
        state.sessions.insert(id.clone(), None);
        Ok(id)
    }

    fn close_session(&mut self, session_id: &[u8]) {
        self.state.lock().sessions.remove(session_id);
    }

    fn get_key_request(&mut self, session_id: &[u8], init_data: &[u8], mime_type: &str) -> Result<Vec<u8>> {
        assert_eq!(mime_type, "application/xml");
        if !self.state.lock().sessions.contains_key(session_id) {
            return Err(Error::Other("unknown DRM session".into()));
        }
        let mut request = b"KEYREQ".to_vec();
        request.extend_from_slice(init_data);
        Ok(request)
    }

    fn provide_key_response(&mut self, session_id: &[u8], response: &[u8]) -> Result<Vec<u8>> {
        if response.len() != 48 {
            return Err(Error::Other("malformed key response".into()));
        }
        let mut state = self.state.lock();
        if !state.sessions.contains_key(session_id) {
            return Err(Error::Other("unknown DRM session".into()));
        }
        let mut enc = [0u8; 16];
        enc.copy_from_slice(&response[..16]);
        let mut hmac = [0u8; 32];
        hmac.copy_from_slice(&response[16..]);
        state.next_id += 1;
        let key_set_id = vec![0xe0, state.next_id];
        state.key_sets.insert(key_set_id.clone(), (enc, hmac));
        state.sessions.insert(session_id.to_vec(), Some(key_set_id.clone()));
        Ok(key_set_id)
    }

    fn restore_keys(&mut self, session_id: &[u8], key_set_id: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        if !state.key_sets.contains_key(key_set_id) {
            return Err(Error::Other("unknown key set".into()));
        }
        match state.sessions.get_mut(session_id) {
            Some(slot) => {
                *slot = Some(key_set_id.to_vec());
                Ok(())
            }
            None => Err(Error::Other("unknown DRM session".into())),
        }
    }

    fn encrypt(&mut self, session_id: &[u8], key_id: &[u8], input: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
        check_key_id(key_id, FAKE_ENCRYPTION_KEY_ID)?;
        let (enc, _) = self.state.lock().session_keys(session_id)?;
        if input.len() % 16 != 0 {
            return Err(Error::Other("input is not block aligned".into()));
        }
        Ok(cbc::Encryptor::<Aes128>::new_from_slices(&enc, iv)
            .map_err(|e| Error::Other(e.to_string()))?
            .encrypt_padded_vec_mut::<NoPadding>(input))
    }

    fn decrypt(&mut self, session_id: &[u8], key_id: &[u8], input: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
        check_key_id(key_id, FAKE_ENCRYPTION_KEY_ID)?;
        let (enc, _) = self.state.lock().session_keys(session_id)?;
        cbc::Decryptor::<Aes128>::new_from_slices(&enc, iv)
            .map_err(|e| Error::Other(e.to_string()))?
            .decrypt_padded_vec_mut::<NoPadding>(input)
            .map_err(|e| Error::Other(e.to_string()))
    }

    fn sign(&mut self, session_id: &[u8], key_id: &[u8], message: &[u8]) -> Result<Vec<u8>> {
        check_key_id(key_id, FAKE_HMAC_KEY_ID)?;
        let (_, hmac) = self.state.lock().session_keys(session_id)?;
        Ok(hmac_sha256(&hmac, message))
    }

    fn verify(&mut self, session_id: &[u8], key_id: &[u8], message: &[u8], signature: &[u8]) -> Result<bool> {
        check_key_id(key_id, FAKE_HMAC_KEY_ID)?;
        let (_, hmac) = self.state.lock().session_keys(session_id)?;
        Ok(hmac_sha256_verify(&hmac, message, signature))
    }
}

fn widevine_keydata(drm: &FakeDrm) -> Value {
    let (enc, hmac) = drm.server_keys();
    let mut cdm_response = enc.to_vec();
    cdm_response.extend_from_slice(&hmac);
    json!({
        "cdmkeyresponse": b64_encode(cdm_response),
        "encryptionkeyid": b64_encode(drm.encryption_key_id()),
        "hmackeyid": b64_encode(drm.hmac_key_id()),
    })
}

/// Server key response for the fake DRM.
pub fn widevine_key_response(drm: &FakeDrm, master_token: MasterToken) -> KeyResponseData {
    KeyResponseData {
        scheme: "WIDEVINE".to_string(),
        keydata: widevine_keydata(drm),
        mastertoken: master_token,
    }
}

/// One request seen by [`MockMsl`].
#[derive(Debug, Clone)]
pub struct Exchange {
    pub url: String,
    pub handshake: bool,
    /// Decrypted header data.
    pub header: Value,
    /// Encryption envelope of the header (authenticated requests only).
    pub envelope: Option<Value>,
    /// Decoded business JSON (authenticated requests only).
    pub body: Option<Value>,
}

struct MockState {
    drm: Option<FakeDrm>,
    keys: Option<([u8; 16], [u8; 32])>,
    client_key: Option<RsaPublicKey>,
    sequence: u64,
    token_lifetime: i64,
    handshakes: usize,
    exchanges: Vec<Exchange>,
    tamper_next: bool,
    errordata_next: Option<i64>,
    status_next: Option<u16>,
    issue_user_id_token: bool,
    renew_next: bool,
    manifest: Value,
    delay: Duration,
}

/// In-process MSL server implementing [`Transport`]. Clones share state.
#[derive(Clone)]
pub struct MockMsl {
    state: Arc<Mutex<MockState>>,
}

impl MockMsl {
    /// Server for software clients.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                drm: None,
                keys: None,
                client_key: None,
                sequence: 0,
                token_lifetime: 2 * 86_400,
                handshakes: 0,
                exchanges: Vec::new(),
                tamper_next: false,
                errordata_next: None,
                status_next: None,
                issue_user_id_token: true,
                renew_next: false,
                manifest: sample_manifest(),
                delay: Duration::from_millis(5),
            })),
        }
    }

    /// Server for clients on the fake hardware DRM.
    pub fn with_drm(drm: FakeDrm) -> Self {
        let mock = Self::new();
        mock.state.lock().drm = Some(drm);
        mock
    }

    pub fn set_token_lifetime(&self, secs: i64) {
        self.state.lock().token_lifetime = secs;
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().delay = delay;
    }

    /// Flip one ciphertext bit in the next response.
    pub fn tamper_next_response(&self) {
        self.state.lock().tamper_next = true;
    }

    /// Answer the next authenticated request with an MSL error.
    pub fn fail_next_with(&self, errorcode: i64) {
        self.state.lock().errordata_next = Some(errorcode);
    }

    pub fn fail_next_with_status(&self, status: u16) {
        self.state.lock().status_next = Some(status);
    }

    /// Attach a server-side key renewal to the next response.
    pub fn renew_next(&self) {
        self.state.lock().renew_next = true;
    }

    pub fn handshakes(&self) -> usize {
        self.state.lock().handshakes
    }

    pub fn exchanges(&self) -> Vec<Exchange> {
        self.state.lock().exchanges.clone()
    }

    fn handle(&self, url: &str, body: &str) -> Result<HttpResponse> {
        let segments = split_chunks(body)?;
        let header: WireHeader = serde_json::from_str(segments[0])?;
        let mut state = self.state.lock();
        if let Some(status) = state.status_next.take() {
            return Ok(HttpResponse {
                status,
                body: b"Service Unavailable".to_vec(),
            });
        }
        if header.entityauthdata.is_some() {
            handshake(&mut state, url, &header)
        } else {
            let payloads = segments[1..]
                .iter()
                .map(|s| serde_json::from_str(s))
                .collect::<std::result::Result<Vec<WirePayload>, _>>()?;
            exchange(&mut state, url, &header, &payloads)
        }
    }
}

fn ok(body: String) -> Result<HttpResponse> {
    Ok(HttpResponse {
        status: 200,
        body: body.into_bytes(),
    })
}

fn issue_token(state: &MockState) -> MasterToken {
    master_token(state.sequence, state.token_lifetime)
}

fn server_keydata(state: &mut MockState, request: &KeyRequestData) -> Result<(String, Value)> {
    match request {
        KeyRequestData::AsymmetricWrapped { publickey, .. } => {
            let public = RsaPublicKey::from_public_key_der(&b64_decode(publickey)?)
                .map_err(|e| Error::Other(e.to_string()))?;
            let enc: [u8; 16] = random_bytes();
            let hmac: [u8; 32] = random_bytes();
            state.keys = Some((enc, hmac));
            let keydata = json!({
                "encryptionkey": wrap_jwk(&public, &enc),
                "hmackey": wrap_jwk(&public, &hmac),
                "keypairid": "superKeyPair",
            });
            state.client_key = Some(public);
            Ok((
                "ASYMMETRIC_WRAPPED".to_string(),
                keydata,
            ))
        }
        KeyRequestData::Widevine { keyrequest } => {
            let drm = state
                .drm
                .clone()
                .ok_or_else(|| Error::Other("server has no DRM".into()))?;
            assert_eq!(b64_decode(keyrequest)?, drm.expected_key_request());
            state.keys = Some(drm.server_keys());
            Ok(("WIDEVINE".to_string(), widevine_keydata(&drm)))
        }
    }
}

fn handshake(state: &mut MockState, url: &str, header: &WireHeader) -> Result<HttpResponse> {
    let headerdata = b64_decode(header.headerdata.as_deref().unwrap_or_default())?;
    let data: HeaderData = serde_json::from_slice(&headerdata)?;
    let request = data
        .keyrequestdata
        .as_ref()
        .and_then(|r| r.first())
        .ok_or_else(|| Error::Other("handshake without keyrequestdata".into()))?;

    let (scheme, keydata) = server_keydata(state, request)?;
    state.sequence += 1;
    state.handshakes += 1;
    state.exchanges.push(Exchange {
        url: url.to_string(),
        handshake: true,
        header: serde_json::to_value(&data)?,
        envelope: None,
        body: None,
    });

    let response_header = json!({
        "sender": "Netflix",
        "messageid": data.messageid,
        "keyresponsedata": {
            "scheme": scheme,
            "keydata": keydata,
            "mastertoken": issue_token(state),
        },
    });
    ok(json!({
        "headerdata": b64_encode(response_header.to_string()),
        "signature": "",
    })
    .to_string())
}

fn seal(keys: &([u8; 16], [u8; 32]), keyid: &str, plaintext: &[u8]) -> (String, String) {
    let iv: [u8; 16] = random_bytes();
    let envelope = json!({
        "ciphertext": b64_encode(aes_cbc_encrypt(&keys.0, &iv, plaintext)),
        "keyid": keyid,
        "sha256": "AA==",
        "iv": b64_encode(iv),
    })
    .to_string();
    let sealed = b64_encode(envelope);
    let signature = hmac_sha256(&keys.1, sealed.as_bytes());
    (sealed, b64_encode(signature))
}

fn open(keys: &([u8; 16], [u8; 32]), sealed: &str, signature: &str) -> Result<(Value, Vec<u8>)> {
    if !hmac_sha256_verify(&keys.1, sealed.as_bytes(), &b64_decode(signature)?) {
        return Err(Error::Other("client signature mismatch".into()));
    }
    let envelope_json = b64_decode(sealed)?;
    let envelope: Value = serde_json::from_slice(&envelope_json)?;
    let iv = b64_decode(envelope["iv"].as_str().unwrap_or_default())?;
    let ciphertext = b64_decode(envelope["ciphertext"].as_str().unwrap_or_default())?;
    let plaintext = aes_cbc_decrypt(&keys.0, &iv, &ciphertext)?;
    Ok((envelope, plaintext))
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).expect("gzip");
    encoder.finish().expect("gzip")
}

fn errordata(code: i64) -> Result<HttpResponse> {
    let error = json!({
        "errorcode": code,
        "internalcode": 207_000 + code,
        "errormsg": format!("mock MSL error {}", code),
    });
    ok(json!({"errordata": b64_encode(error.to_string()), "signature": ""}).to_string())
}

fn exchange(
    state: &mut MockState,
    url: &str,
    header: &WireHeader,
    payloads: &[WirePayload],
) -> Result<HttpResponse> {
    let Some(keys) = state.keys else {
        return errordata(3);
    };
    let token = header
        .mastertoken
        .as_ref()
        .ok_or_else(|| Error::Other("request without master token".into()))?;
    if token.sequence_number() != state.sequence {
        return errordata(8);
    }

    let (envelope, plaintext) = open(
        &keys,
        header.headerdata.as_deref().unwrap_or_default(),
        &header.signature,
    )?;
    let data: HeaderData = serde_json::from_slice(&plaintext)?;

    let mut body = Vec::new();
    for payload in payloads {
        let (_, chunk) = open(&keys, &payload.payload, &payload.signature)?;
        let chunk: crate::envelope::PayloadChunk = serde_json::from_slice(&chunk)?;
        body.extend(chunk.decoded_data()?);
    }
    let body: Value = serde_json::from_slice(&body)?;
    state.exchanges.push(Exchange {
        url: url.to_string(),
        handshake: false,
        header: serde_json::to_value(&data)?,
        envelope: Some(envelope),
        body: Some(body.clone()),
    });

    if let Some(code) = state.errordata_next.take() {
        return errordata(code);
    }

    let result = if body["url"] == "/manifest" {
        state.manifest.clone()
    } else {
        let params = &body["params"][0];
        let challenge = params["challengeBase64"].as_str().unwrap_or_default();
        json!([{
            "drmSessionId": params["drmSessionId"],
            "licenseResponseBase64": b64_encode(format!("license-for:{}", challenge)),
        }])
    };

    let mut response_header = json!({"sender": "Netflix", "messageid": data.messageid});
    if data.userauthdata.is_some() && state.issue_user_id_token {
        response_header["useridtoken"] = json!({
            "tokendata": b64_encode(r#"{"customerid":"c-1"}"#),
            "signature": b64_encode("uid-signature"),
        });
    }
    if std::mem::take(&mut state.renew_next) {
        // Re-issue the same keys under the next sequence number.
        let renewal = match (&state.client_key, &state.drm) {
            (Some(public), _) => Some((
                "ASYMMETRIC_WRAPPED",
                json!({
                    "encryptionkey": wrap_jwk(public, &keys.0),
                    "hmackey": wrap_jwk(public, &keys.1),
                }),
            )),
            (None, Some(drm)) => Some(("WIDEVINE", widevine_keydata(drm))),
            (None, None) => None,
        };
        if let Some((scheme, keydata)) = renewal {
            state.sequence += 1;
            response_header["keyresponsedata"] = json!({
                "scheme": scheme,
                "keydata": keydata,
                "mastertoken": issue_token(state),
            });
        }
    }

    let keyid = format!("{}_{}", data.sender, state.sequence);
    let (headerdata, signature) = seal(&keys, &keyid, response_header.to_string().as_bytes());
    let mut wire = json!({
        "headerdata": headerdata,
        "signature": signature,
        "mastertoken": issue_token(state),
    })
    .to_string();

    // Three gzip chunks.
    let result_json = json!({"result": result}).to_string().into_bytes();
    let part = result_json.len().div_ceil(3);
    let parts: Vec<&[u8]> = result_json.chunks(part).collect();
    for (i, part) in parts.iter().enumerate() {
        let mut chunk = json!({
            "messageid": data.messageid,
            "sequencenumber": i + 1,
            "data": b64_encode(gzip(part)),
            "compressionalgo": "GZIP",
        });
        if i + 1 == parts.len() {
            chunk["endofmsg"] = Value::Bool(true);
        }
        let (payload, signature) = seal(&keys, &keyid, chunk.to_string().as_bytes());
        let payload = if i == 0 && std::mem::take(&mut state.tamper_next) {
            let mut envelope: Value = serde_json::from_slice(&b64_decode(&payload)?)?;
            let mut ciphertext = b64_decode(envelope["ciphertext"].as_str().unwrap_or_default())?;
            ciphertext[0] ^= 0x01;
            envelope["ciphertext"] = Value::String(b64_encode(ciphertext));
            b64_encode(envelope.to_string())
        } else {
            payload
        };
        wire.push_str(&json!({"payload": payload, "signature": signature}).to_string());
    }
    ok(wire)
}

impl Transport for MockMsl {
    async fn send(&self, url: &str, body: String, _timeout: Duration) -> Result<HttpResponse> {
        let delay = self.state.lock().delay;
        tokio::time::sleep(delay).await;
        self.handle(url, &body)
    }
}

/// Manifest with one DRM video track, two audio tracks and three subtitle
/// tracks (one of them the none track).
pub fn sample_manifest() -> Value {
    json!({
        "movieId": 80025678,
        "duration": 6_000_000,
        "links": {"license": {"href": "/license?licenseType=standard&playbackContextId=E1"}},
        "video_tracks": [{
            "trackType": "PRIMARY",
            "hasDrmStreams": true,
            "drmHeader": {
                "bytes": "AAAANHBzc2gAAAAA7e+LqXnWSs6jyCfc1R0h7QAAABQIARIQAAECAwQFBgcICQoLDA0ODw==",
                "keyId": "AAECAwQFBgcICQoLDA0ODw=="
            },
            "streams": [
                {
                    "downloadable_id": "v1",
                    "content_profile": "playready-h264mpl40-dash",
                    "bitrate": 1750, "res_w": 1280, "res_h": 720,
                    "framerate_value": 25, "framerate_scale": 1,
                    "isDrm": true, "hdcpVersions": ["none"],
                    "startByteOffset": 1234,
                    "urls": [{"cdn_id": 1, "url": "https://cdn.test/v/1750?o=1&e=2"}]
                },
                {
                    "downloadable_id": "v0",
                    "content_profile": "playready-h264mpl30-dash",
                    "bitrate": 235, "res_w": 320, "res_h": 240,
                    "isDrm": false,
                    "urls": [{"cdn_id": 1, "url": "https://cdn.test/v/clear"}]
                },
                {
                    "downloadable_id": "v2",
                    "content_profile": "hevc-main10-L41-dash-cenc-prk",
                    "bitrate": 5800, "res_w": 3840, "res_h": 2160,
                    "framerate_value": 24000, "framerate_scale": 1001,
                    "isDrm": true, "hdcpVersions": ["1.4", "2.2"],
                    "sidx": {"offset": 1000, "size": 600},
                    "urls": [{"cdn_id": 1, "url": "https://cdn.test/v/5800"}]
                }
            ]
        }],
        "audio_tracks": [
            {
                "language": "en", "trackType": "PRIMARY", "isNative": true,
                "channels": "5.1", "profile": "ddplus-atmos-dash",
                "streams": [{
                    "downloadable_id": "a1",
                    "content_profile": "ddplus-5.1-dash", "bitrate": 448,
                    "channels": "5.1", "isDrm": false,
                    "urls": [{"cdn_id": 1, "url": "https://cdn.test/a/en"}]
                }]
            },
            {
                "language": "en", "trackType": "ASSISTIVE", "isNative": false,
                "channels": "2.0", "profile": "heaac-2-dash",
                "streams": [{
                    "downloadable_id": "a2",
                    "content_profile": "heaac-2-dash", "bitrate": 96,
                    "channels": "2.0", "isDrm": false,
                    "urls": [{"cdn_id": 1, "url": "https://cdn.test/a/en-ad"}]
                }]
            }
        ],
        "timedtexttracks": [
            {
                "language": "en", "trackType": "PRIMARY",
                "isNoneTrack": false, "isForcedNarrative": false,
                "ttDownloadables": {
                    "webvtt-lssdh-ios8": {"downloadUrls": {"1": "https://cdn.test/t/en.vtt"}}
                }
            },
            {
                "language": "en", "trackType": "PRIMARY",
                "isNoneTrack": false, "isForcedNarrative": true,
                "ttDownloadables": {
                    "dfxp-ls-sdh": {"downloadUrls": {"1": "https://cdn.test/t/en-forced.dfxp"}}
                }
            },
            {"isNoneTrack": true, "trackType": "PRIMARY", "ttDownloadables": {}}
        ]
    })
}
