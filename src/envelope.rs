//! MSL wire framing.
//!
//! A message on the wire is one header object followed by one or more
//! payload chunk objects, concatenated without separators:
//!
//! ```text
//! {"headerdata":"<b64 envelope>","signature":"<b64 hmac>","mastertoken":{..}}
//! {"payload":"<b64 envelope>","signature":"<b64 hmac>"}
//! ```
//!
//! Authenticated header data and payload chunks are encrypted into an
//! [`EncryptionEnvelope`] and signed; handshake messages travel in clear with
//! empty signatures.
use std::io::{Read, Write};
use std::sync::LazyLock;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crypto::{CryptoProvider, EncryptionEnvelope, KeyRequestData, KeyResponseData, SessionKeys};
use crate::error::{Error, Result};
use crate::token::MasterToken;
use crate::utils::{b64_decode, b64_encode};

/// Service name in the `recipient` header field.
pub const RECIPIENT: &str = "Netflix";

/// MSL error codes that mean the entity keys or master token must be re-issued.
const REAUTH_ERROR_CODES: [i64; 4] = [
    3, // ENTITY_REAUTH
    5, // KEYX_REQUIRED
    6, // ENTITYDATA_REAUTH
    8, // EXPIRED
];

static SIGNATURE_END: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#","signature":"[0-9A-Za-z=/+]*"\}"#).expect("signature pattern is valid")
});

/// Payload compression algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Compression {
    Gzip,
}

/// `capabilities` header field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub languages: Vec<String>,
    pub compressionalgos: Vec<Compression>,
    #[serde(default)]
    pub encoderformats: Vec<String>,
}

/// `userauthdata` header field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scheme", content = "authdata")]
pub enum UserAuthData {
    #[serde(rename = "EMAIL_PASSWORD")]
    EmailPassword { email: String, password: String },
}

/// Plaintext header data (before encryption).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderData {
    pub sender: String,
    pub messageid: u64,
    pub renewable: bool,
    pub handshake: bool,
    pub nonreplayable: bool,
    pub capabilities: Capabilities,
    pub recipient: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyrequestdata: Option<Vec<KeyRequestData>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userauthdata: Option<UserAuthData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub useridtoken: Option<Value>,
}

/// Decoded header data of a response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseHeaderData {
    #[serde(default)]
    pub messageid: Option<u64>,
    #[serde(default)]
    pub sender: Option<String>,
    /// Present on handshakes and on server-initiated key renewal.
    #[serde(default)]
    pub keyresponsedata: Option<KeyResponseData>,
    #[serde(default)]
    pub useridtoken: Option<Value>,
}

/// `entityauthdata` of an unauthenticated (handshake) header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityAuthData {
    pub scheme: String,
    pub authdata: EntityIdentity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityIdentity {
    pub identity: String,
}

/// Header object as framed on the wire.
///
/// Field order keeps `mastertoken` last so authenticated headers end in `}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireHeader {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headerdata: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errordata: Option<String>,
    #[serde(default)]
    pub signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entityauthdata: Option<EntityAuthData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mastertoken: Option<MasterToken>,
}

/// Payload chunk object as framed on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WirePayload {
    pub payload: String,
    #[serde(default)]
    pub signature: String,
}

/// Decrypted payload chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadChunk {
    pub messageid: u64,
    pub sequencenumber: u64,
    /// Absent on every chunk but the last.
    #[serde(default)]
    pub endofmsg: bool,
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compressionalgo: Option<Compression>,
}

impl PayloadChunk {
    /// Single terminal chunk carrying `body` as JSON.
    pub fn single(messageid: u64, body: &Value, compression: Option<Compression>) -> Result<Self> {
        let json = serde_json::to_vec(body)?;
        let data = match compression {
            Some(Compression::Gzip) => gzip(&json)?,
            None => json,
        };
        Ok(Self {
            messageid,
            sequencenumber: 1,
            endofmsg: true,
            data: b64_encode(data),
            compressionalgo: compression,
        })
    }

    /// Base64-decode (and decompress) the `data` field.
    pub fn decoded_data(&self) -> Result<Vec<u8>> {
        let data = b64_decode(&self.data).map_err(Error::into_corruption)?;
        match self.compressionalgo {
            Some(Compression::Gzip) => gunzip(&data),
            None => Ok(data),
        }
    }
}

/// Error record carried base64-encoded in a header's `errordata`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorData {
    #[serde(default)]
    pub errorcode: Option<i64>,
    #[serde(default)]
    pub internalcode: Option<i64>,
    #[serde(default)]
    pub errormsg: Option<String>,
    #[serde(default)]
    pub usermsg: Option<String>,
}

impl ErrorData {
    /// Decode base64 `errordata`.
    pub fn decode(errordata: &str) -> Result<Self> {
        let json = b64_decode(errordata).map_err(Error::into_corruption)?;
        serde_json::from_slice(&json).map_err(|e| Error::from(e).into_corruption())
    }

    fn message(&self) -> String {
        self.errormsg
            .clone()
            .or_else(|| self.usermsg.clone())
            .unwrap_or_else(|| "unspecified MSL error".to_string())
    }

    /// Map onto the client error taxonomy.
    #[must_use]
    pub fn into_error(self) -> Error {
        if self
            .errorcode
            .is_some_and(|code| REAUTH_ERROR_CODES.contains(&code))
        {
            return Error::TokenExpired(self.message());
        }
        let code = self
            .internalcode
            .or(self.errorcode)
            .map(|c| c.to_string())
            .unwrap_or_default();
        Error::Protocol {
            code,
            message: self.message(),
        }
    }
}

/// A response split into its header and payload chunks.
#[derive(Debug, Clone)]
pub struct ChunkedResponse {
    pub header: WireHeader,
    pub payloads: Vec<WirePayload>,
}

impl ChunkedResponse {
    /// Split and parse a response body.
    ///
    /// Success means the body is a well-formed MSL message and not an error
    /// envelope: an `errordata` header is returned as the mapped error.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(body)
            .map_err(|e| Error::ProtocolCorruption(format!("response is not UTF-8: {}", e)))?;
        let segments = split_chunks(text)?;

        let header_value: Value =
            serde_json::from_str(segments[0]).map_err(|e| Error::from(e).into_corruption())?;
        if let Some(error) = service_error(&header_value) {
            return Err(error);
        }
        let header: WireHeader =
            serde_json::from_value(header_value).map_err(|e| Error::from(e).into_corruption())?;
        if let Some(errordata) = &header.errordata {
            return Err(ErrorData::decode(errordata)?.into_error());
        }
        if header.headerdata.is_none() {
            return Err(Error::ProtocolCorruption(
                "response header has neither headerdata nor errordata".to_string(),
            ));
        }

        let payloads = segments[1..]
            .iter()
            .map(|s| serde_json::from_str(s).map_err(|e| Error::from(e).into_corruption()))
            .collect::<Result<Vec<WirePayload>>>()?;
        Ok(Self { header, payloads })
    }
}

/// Split a wire message into its top-level JSON objects.
///
/// Brace-balanced scan that skips string contents. The first segment is the
/// header, the rest are payload chunks. Whitespace between objects is
/// ignored; anything else between them is rejected.
pub fn split_chunks(text: &str) -> Result<Vec<&str>> {
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, b) in text.bytes().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            b'}' => {
                if depth == 0 {
                    return Err(Error::ProtocolCorruption(format!(
                        "unbalanced '}}' at offset {}",
                        i
                    )));
                }
                depth -= 1;
                if depth == 0 {
                    segments.push(&text[start..=i]);
                }
            }
            b'"' if depth > 0 => in_string = true,
            b if b.is_ascii_whitespace() => {}
            _ if depth == 0 => {
                return Err(Error::ProtocolCorruption(format!(
                    "unexpected byte 0x{:02x} between chunks at offset {}",
                    b, i
                )));
            }
            _ => {}
        }
    }

    if depth != 0 || in_string {
        return Err(Error::ProtocolCorruption("truncated message".to_string()));
    }
    if segments.is_empty() {
        return Err(Error::ProtocolCorruption("empty message".to_string()));
    }
    Ok(segments)
}

/// Fast split for authenticated responses whose header ends in `}}` and
/// whose chunks end in `,"signature":"<b64>"}`.
pub fn split_chunks_fast(text: &str) -> Result<Vec<&str>> {
    let text = text.trim();
    let header_end = text
        .find("}}")
        .ok_or_else(|| Error::ProtocolCorruption("no header terminator".to_string()))?
        + 2;
    let (header, rest) = text.split_at(header_end);

    let mut segments = vec![header];
    let mut chunk_start = 0;
    for m in SIGNATURE_END.find_iter(rest) {
        segments.push(rest[chunk_start..m.end()].trim());
        chunk_start = m.end();
    }
    if !rest[chunk_start..].trim().is_empty() {
        return Err(Error::ProtocolCorruption(
            "trailing data after last chunk".to_string(),
        ));
    }
    Ok(segments)
}

/// Encode an unauthenticated handshake message.
pub fn encode_handshake(header: &HeaderData) -> Result<String> {
    let wire_header = WireHeader {
        headerdata: Some(b64_encode(serde_json::to_vec(header)?)),
        errordata: None,
        signature: String::new(),
        entityauthdata: Some(EntityAuthData {
            scheme: "NONE".to_string(),
            authdata: EntityIdentity {
                identity: header.sender.clone(),
            },
        }),
        mastertoken: None,
    };
    let chunk = PayloadChunk {
        messageid: header.messageid,
        sequencenumber: 1,
        endofmsg: true,
        data: String::new(),
        compressionalgo: None,
    };
    let payload = WirePayload {
        payload: b64_encode(serde_json::to_vec(&chunk)?),
        signature: String::new(),
    };
    Ok(serde_json::to_string(&wire_header)? + &serde_json::to_string(&payload)?)
}

/// Decode the header of a handshake response into its key response.
pub fn decode_handshake_response(body: &[u8]) -> Result<(KeyResponseData, ResponseHeaderData)> {
    let response = ChunkedResponse::parse(body).map_err(|e| match e {
        Error::Protocol { code, message } => {
            Error::HandshakeFailed(format!("server error {}: {}", code, message))
        }
        Error::TokenExpired(message) => Error::HandshakeFailed(message),
        other => other,
    })?;
    let headerdata = response.header.headerdata.unwrap_or_default();
    let json = b64_decode(&headerdata).map_err(Error::into_corruption)?;
    let mut header: ResponseHeaderData =
        serde_json::from_slice(&json).map_err(|e| Error::from(e).into_corruption())?;
    let key_response = header
        .keyresponsedata
        .take()
        .ok_or_else(|| Error::HandshakeFailed("response carries no keyresponsedata".to_string()))?;
    Ok((key_response, header))
}

/// Encrypting and signing codec bound to one set of session keys.
pub struct MessageCodec<'a> {
    crypto: &'a dyn CryptoProvider,
    keys: &'a SessionKeys,
    keyid: String,
}

impl<'a> MessageCodec<'a> {
    /// `keyid` is the `ESN_seq` label of the current master token.
    pub fn new(crypto: &'a dyn CryptoProvider, keys: &'a SessionKeys, keyid: String) -> Self {
        Self {
            crypto,
            keys,
            keyid,
        }
    }

    /// Encrypt and sign `plaintext`; returns base64 envelope and signature.
    ///
    /// The signature covers the base64 envelope text as sent on the wire.
    pub fn seal(&self, plaintext: &[u8]) -> Result<(String, String)> {
        let envelope = self.crypto.encrypt(self.keys, plaintext, &self.keyid)?;
        let sealed = b64_encode(serde_json::to_vec(&envelope)?);
        let signature = self.crypto.sign(self.keys, sealed.as_bytes())?;
        Ok((sealed, b64_encode(signature)))
    }

    /// Verify and decrypt a base64 envelope.
    pub fn open(&self, sealed: &str, signature: &str) -> Result<Vec<u8>> {
        let signature = b64_decode(signature).map_err(Error::into_corruption)?;
        if !self.crypto.verify(self.keys, sealed.as_bytes(), &signature)? {
            return Err(Error::ProtocolCorruption("signature mismatch".to_string()));
        }
        let envelope_json = b64_decode(sealed).map_err(Error::into_corruption)?;
        let envelope: EncryptionEnvelope =
            serde_json::from_slice(&envelope_json).map_err(|e| Error::from(e).into_corruption())?;
        self.crypto.decrypt(self.keys, &envelope)
    }

    /// Encode an authenticated message carrying `body`.
    pub fn encode(
        &self,
        header: &HeaderData,
        master_token: &MasterToken,
        body: &Value,
        compression: Option<Compression>,
    ) -> Result<String> {
        let (headerdata, header_signature) = self.seal(&serde_json::to_vec(header)?)?;
        let wire_header = WireHeader {
            headerdata: Some(headerdata),
            errordata: None,
            signature: header_signature,
            entityauthdata: None,
            mastertoken: Some(master_token.clone()),
        };

        let chunk = PayloadChunk::single(header.messageid, body, compression)?;
        let (payload, payload_signature) = self.seal(&serde_json::to_vec(&chunk)?)?;
        let wire_payload = WirePayload {
            payload,
            signature: payload_signature,
        };
        Ok(serde_json::to_string(&wire_header)? + &serde_json::to_string(&wire_payload)?)
    }

    /// Verify and decrypt a response header.
    pub fn decode_header(&self, header: &WireHeader) -> Result<ResponseHeaderData> {
        let headerdata = header
            .headerdata
            .as_deref()
            .ok_or_else(|| Error::ProtocolCorruption("missing headerdata".to_string()))?;
        let plaintext = self.open(headerdata, &header.signature)?;
        serde_json::from_slice(&plaintext).map_err(|e| Error::from(e).into_corruption())
    }

    /// Verify, decrypt and concatenate the `data` of every payload chunk.
    pub fn decode_payloads(&self, payloads: &[WirePayload]) -> Result<Vec<u8>> {
        if payloads.is_empty() {
            return Err(Error::ProtocolCorruption("response has no payload".to_string()));
        }
        let mut body = Vec::new();
        let mut last_sequence = 0u64;
        let mut ended = false;
        for payload in payloads {
            if ended {
                return Err(Error::ProtocolCorruption("chunk after end of message".to_string()));
            }
            let plaintext = self.open(&payload.payload, &payload.signature)?;
            let chunk: PayloadChunk =
                serde_json::from_slice(&plaintext).map_err(|e| Error::from(e).into_corruption())?;
            if chunk.sequencenumber <= last_sequence {
                return Err(Error::ProtocolCorruption(format!(
                    "chunk sequence {} after {}",
                    chunk.sequencenumber, last_sequence
                )));
            }
            last_sequence = chunk.sequencenumber;
            ended = chunk.endofmsg;
            body.extend_from_slice(&chunk.decoded_data()?);
        }
        if !ended {
            return Err(Error::ProtocolCorruption("message has no final chunk".to_string()));
        }
        Ok(body)
    }
}

/// Pull the service result out of a decoded response body.
///
/// Accepted shapes: `{"result": X}`, `[_, {"payload": {"json": {"result": X}}}]`
/// and `[_, {"payload": {"data": "<b64 JSON>"}}]`.
pub fn extract_result(body: &[u8]) -> Result<Value> {
    let value: Value = serde_json::from_slice(body).map_err(|e| Error::from(e).into_corruption())?;
    if let Some(error) = service_error(&value) {
        return Err(error);
    }

    let result = match value {
        Value::Object(mut obj) if obj.contains_key("result") => obj.remove("result"),
        Value::Array(items) => {
            let payload = items.get(1).and_then(|item| item.get("payload"));
            if let Some(result) = payload.and_then(|p| p.get("json")).and_then(|j| j.get("result")) {
                Some(result.clone())
            } else if let Some(data) = payload.and_then(|p| p.get("data")).and_then(Value::as_str) {
                let inner = b64_decode(data).map_err(Error::into_corruption)?;
                let inner: Value =
                    serde_json::from_slice(&inner).map_err(|e| Error::from(e).into_corruption())?;
                Some(match inner {
                    Value::Object(mut obj) if obj.contains_key("result") => {
                        obj.remove("result").unwrap_or_default()
                    }
                    other => other,
                })
            } else {
                None
            }
        }
        _ => None,
    }
    .ok_or_else(|| Error::ProtocolCorruption("response carries no result".to_string()))?;

    if let Some(error) = service_error(&result) {
        return Err(error);
    }
    Ok(result)
}

/// Detect a service-level error object (`error` or `errordata`).
fn service_error(value: &Value) -> Option<Error> {
    let obj = value.as_object()?;
    if let Some(Value::String(errordata)) = obj.get("errordata") {
        return Some(match ErrorData::decode(errordata) {
            Ok(data) => data.into_error(),
            Err(e) => e,
        });
    }
    let error = obj.get("error")?;
    if error.is_null() {
        return None;
    }
    let code = ["code", "errorCode", "bladeRunnerCode"]
        .iter()
        .find_map(|k| error.get(*k))
        .map(|c| match c {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_default();
    let message = ["errorDisplayMessage", "display", "detail", "message", "bladeRunnerMessage"]
        .iter()
        .find_map(|k| error.get(*k).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string());
    Some(Error::Protocol { code, message })
}

fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn gunzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| Error::ProtocolCorruption(format!("Failed to gunzip chunk: {}", e)))?;
    Ok(out)
}
