//! MSL session state.
//!
//! Holds the session keys, the master token and the user id token, and
//! persists them as one JSON blob:
//!
//! ```text
//! {"backend": "software", "tokens": {"mastertoken": {..}, "useridtoken": {..}},
//!  "encryption_key": "..", "sign_key": "..", "rsa_key": ".."}
//! ```
//!
//! The hardware backend stores `key_set_id`, `key_id` and `hmac_key_id` in
//! place of the raw keys. The client keeps this struct behind its session
//! lock; nothing here synchronizes on its own.
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::crypto::{Backend, CryptoProvider, SessionKeys};
use crate::error::{Error, Result};
use crate::store::Store;
use crate::token::MasterToken;
use crate::utils::random_message_id;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedTokens {
    mastertoken: MasterToken,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    useridtoken: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    backend: Option<Backend>,
    tokens: PersistedTokens,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl PersistedState {
    /// Backend named by the tag, or inferred from the key fields.
    fn backend(&self) -> Option<Backend> {
        self.backend.or_else(|| {
            if self.fields.contains_key("key_set_id") {
                Some(Backend::HardwareDrm)
            } else if self.fields.contains_key("encryption_key") {
                Some(Backend::Software)
            } else {
                None
            }
        })
    }
}

/// Outcome of [`SessionState::load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Nothing persisted yet.
    Missing,
    /// Keys and master token restored.
    Restored,
    /// The blob belongs to another backend and was ignored.
    ForeignBackend,
    /// The blob was unreadable and was discarded.
    Discarded,
}

/// Keys and tokens a request needs, copied out under the session lock.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub keys: SessionKeys,
    pub master_token: MasterToken,
    pub user_id_token: Option<Value>,
    /// Whether `userauthdata` should go with this request.
    pub send_user_auth: bool,
    pub generation: u64,
}

/// Mutable session state.
pub struct SessionState {
    esn: String,
    state_name: String,
    store: Arc<dyn Store>,
    keys: Option<SessionKeys>,
    master_token: Option<MasterToken>,
    user_id_token: Option<Value>,
    user_auth_sent: bool,
    sequence_number: u64,
    generation: u64,
    loaded: bool,
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("esn", &self.esn)
            .field("keys", &self.keys)
            .field("sequence_number", &self.sequence_number)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl SessionState {
    pub fn new(esn: impl Into<String>, store: Arc<dyn Store>, state_name: impl Into<String>) -> Self {
        Self {
            esn: esn.into(),
            state_name: state_name.into(),
            store,
            keys: None,
            master_token: None,
            user_id_token: None,
            user_auth_sent: false,
            sequence_number: 0,
            generation: 0,
            loaded: false,
        }
    }

    #[must_use]
    pub fn esn(&self) -> &str {
        &self.esn
    }

    #[must_use]
    pub fn keys(&self) -> Option<&SessionKeys> {
        self.keys.as_ref()
    }

    #[must_use]
    pub fn master_token(&self) -> Option<&MasterToken> {
        self.master_token.as_ref()
    }

    #[must_use]
    pub fn user_id_token(&self) -> Option<&Value> {
        self.user_id_token.as_ref()
    }

    #[must_use]
    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    /// Incremented whenever the master token changes.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Fresh 52-bit message id.
    #[must_use]
    pub fn next_message_id(&self) -> u64 {
        random_message_id()
    }

    /// Read the persisted blob and restore keys and tokens through `crypto`.
    ///
    /// Unreadable blobs and blobs of another backend are logged and leave the
    /// state empty, so the caller handshakes. Only store I/O errors propagate.
    pub fn load(&mut self, crypto: &dyn CryptoProvider) -> Result<LoadOutcome> {
        self.loaded = true;
        let Some(blob) = self.store.load(&self.state_name)? else {
            debug!("No persisted MSL state '{}'", self.state_name);
            return Ok(LoadOutcome::Missing);
        };

        let persisted = match decode_state(&blob) {
            Ok(persisted) => persisted,
            Err(e) => {
                warn!("Discarding persisted MSL state: {}", e);
                return Ok(LoadOutcome::Discarded);
            }
        };

        let backend = crypto.backend();
        if persisted.backend() != Some(backend) {
            warn!(
                "Persisted MSL state is not for the {} backend, ignoring it",
                backend
            );
            return Ok(LoadOutcome::ForeignBackend);
        }

        let keys = match crypto.import_state(&persisted.fields) {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Discarding persisted MSL state: {}", e);
                return Ok(LoadOutcome::Discarded);
            }
        };

        let token = persisted.tokens.mastertoken;
        info!(
            "Restored MSL state (sequence {}, expires {})",
            token.sequence_number(),
            token.expiration()
        );
        self.sequence_number = token.sequence_number();
        self.master_token = Some(token);
        self.keys = Some(keys);
        self.user_id_token = persisted.tokens.useridtoken;
        self.user_auth_sent = self.user_id_token.is_some();
        self.generation += 1;
        Ok(LoadOutcome::Restored)
    }

    /// Persist the current keys and tokens. No-op before the first handshake.
    pub fn save(&self, crypto: &dyn CryptoProvider) -> Result<()> {
        let (Some(keys), Some(token)) = (&self.keys, &self.master_token) else {
            return Ok(());
        };
        let state = PersistedState {
            backend: Some(crypto.backend()),
            tokens: PersistedTokens {
                mastertoken: token.clone(),
                useridtoken: self.user_id_token.clone(),
            },
            fields: crypto.export_state(keys)?,
        };
        let blob = serde_json::to_vec(&state)?;
        self.store.store(&self.state_name, &blob)?;
        debug!("Saved MSL state '{}' ({} bytes)", self.state_name, blob.len());
        Ok(())
    }

    /// True when there are no keys or the master token expires within
    /// `window` seconds of `now`.
    #[must_use]
    pub fn needs_handshake(&self, now: i64, window: i64) -> bool {
        match (&self.keys, &self.master_token) {
            (Some(_), Some(token)) => token.expires_within(now, window),
            _ => true,
        }
    }

    /// Install the result of a handshake. The user id token is bound to the
    /// previous master token and is dropped.
    pub fn install(&mut self, keys: SessionKeys, master_token: MasterToken) {
        self.sequence_number = master_token.sequence_number();
        self.keys = Some(keys);
        self.master_token = Some(master_token);
        self.user_id_token = None;
        self.user_auth_sent = false;
        self.generation += 1;
    }

    /// Swap in a renewed master token.
    ///
    /// A token from the same serial with a lower sequence number is stale and
    /// ignored; returns whether the token was taken.
    pub fn bump_sequence(&mut self, master_token: MasterToken) -> bool {
        if !self.accepts(&master_token) {
            warn!(
                "Ignoring stale master token (sequence {} < {})",
                master_token.sequence_number(),
                self.sequence_number
            );
            return false;
        }
        self.sequence_number = master_token.sequence_number();
        self.master_token = Some(master_token);
        self.generation += 1;
        true
    }

    /// Whether `master_token` may replace the current one.
    pub fn accepts(&self, master_token: &MasterToken) -> bool {
        match &self.master_token {
            Some(current) => {
                current.serial_number() != master_token.serial_number()
                    || master_token.sequence_number() >= current.sequence_number()
            }
            None => true,
        }
    }

    /// Replace the keys after a server-initiated renewal.
    pub fn renew(&mut self, keys: SessionKeys, master_token: MasterToken) -> bool {
        if self.bump_sequence(master_token) {
            self.keys = Some(keys);
            true
        } else {
            false
        }
    }

    pub fn set_user_id_token(&mut self, token: Value) {
        self.user_id_token = Some(token);
    }

    /// Record that `userauthdata` went out and was accepted.
    pub fn mark_user_authenticated(&mut self) {
        self.user_auth_sent = true;
    }

    /// Copy out what a request needs; `None` before the first handshake.
    #[must_use]
    pub fn snapshot(&self) -> Option<Snapshot> {
        Some(Snapshot {
            keys: self.keys.clone()?,
            master_token: self.master_token.clone()?,
            user_id_token: self.user_id_token.clone(),
            send_user_auth: self.user_id_token.is_none() && !self.user_auth_sent,
            generation: self.generation,
        })
    }
}

fn decode_state(blob: &[u8]) -> Result<PersistedState> {
    serde_json::from_slice(blob)
        .map_err(|e| Error::StateCorruption(format!("Invalid MSL state: {}", e)))
}
