//! Master token handling.
//!
//! The server hands out the master token as `{tokendata, signature}`; the
//! token data is base64 JSON exposing the sequence number and expiration.
//! The token is otherwise opaque and is sent back verbatim.
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::utils::b64_decode;

/// Wire shape of a master token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMasterToken {
    pub tokendata: String,
    pub signature: String,
}

/// Fields of the decoded `tokendata`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenData {
    pub sequencenumber: u64,
    /// UNIX seconds.
    pub expiration: i64,
    /// UNIX seconds after which the server accepts renewal.
    #[serde(default)]
    pub renewalwindow: i64,
    #[serde(default)]
    pub serialnumber: u64,
}

/// A master token with its token data decoded once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawMasterToken", into = "RawMasterToken")]
pub struct MasterToken {
    raw: RawMasterToken,
    data: TokenData,
}

impl TryFrom<RawMasterToken> for MasterToken {
    type Error = Error;

    fn try_from(raw: RawMasterToken) -> Result<Self> {
        let json = b64_decode(&raw.tokendata)
            .map_err(|e| Error::ProtocolCorruption(format!("tokendata is not base64: {}", e)))?;
        let data: TokenData = serde_json::from_slice(&json)
            .map_err(|e| Error::ProtocolCorruption(format!("Invalid tokendata: {}", e)))?;
        Ok(Self { raw, data })
    }
}

impl From<MasterToken> for RawMasterToken {
    fn from(token: MasterToken) -> Self {
        token.raw
    }
}

impl MasterToken {
    /// Decode a master token from its wire shape.
    pub fn new(tokendata: impl Into<String>, signature: impl Into<String>) -> Result<Self> {
        Self::try_from(RawMasterToken {
            tokendata: tokendata.into(),
            signature: signature.into(),
        })
    }

    #[must_use]
    pub fn sequence_number(&self) -> u64 {
        self.data.sequencenumber
    }

    #[must_use]
    pub fn expiration(&self) -> i64 {
        self.data.expiration
    }

    #[must_use]
    pub fn renewal_window(&self) -> i64 {
        self.data.renewalwindow
    }

    #[must_use]
    pub fn serial_number(&self) -> u64 {
        self.data.serialnumber
    }

    /// Seconds left before expiration (negative once expired).
    #[must_use]
    pub fn remaining(&self, now: i64) -> i64 {
        self.data.expiration - now
    }

    /// True when `expiration - now <= window`.
    #[must_use]
    pub fn expires_within(&self, now: i64, window: i64) -> bool {
        self.remaining(now) <= window
    }

    /// Encryption envelope key label `"{esn}_{sequence}"`.
    #[must_use]
    pub fn keyid(&self, esn: &str) -> String {
        format!("{}_{}", esn, self.data.sequencenumber)
    }
}
