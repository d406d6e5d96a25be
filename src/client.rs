//! MSL client: handshake, authenticated requests and token refresh.
//!
//! All state transitions (load, handshake, token renewal) happen under the
//! session lock. Authenticated sends copy a [`Snapshot`] of the keys out of
//! the lock and may run in parallel; whatever they learn from the response
//! is applied only if the session has not moved on in the meantime.
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::config::MslConfig;
use crate::crypto::{Backend, CryptoProvider, HardwareCrypto, MediaDrm, SoftwareCrypto};
use crate::envelope::{
    decode_handshake_response, encode_handshake, extract_result, Capabilities, ChunkedResponse,
    Compression, HeaderData, MessageCodec, ResponseHeaderData, UserAuthData, RECIPIENT,
};
use crate::error::{Error, Result};
use crate::mpd::{self, Manifest, TranslateOptions};
use crate::profiles::{self, ManifestCapabilities};
use crate::session::{SessionState, Snapshot};
use crate::store::Store;
use crate::transport::{HttpResponse, Transport};
use crate::utils::unix_now;

/// License endpoint path used before any manifest advertised one.
pub const DEFAULT_LICENSE_HREF: &str = "/license";

/// Business JSON above this size is gzipped.
const COMPRESSION_THRESHOLD: usize = 1024;

/// Session diagnostics returned by [`MslClient::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub backend: Backend,
    pub has_keys: bool,
    pub sequence_number: Option<u64>,
    /// Master token expiration (unix seconds).
    pub expiration: Option<i64>,
    /// Seconds until expiration; negative once expired.
    pub remaining_secs: Option<i64>,
}

/// MSL client over a [`Transport`].
pub struct MslClient<T: Transport> {
    config: MslConfig,
    transport: T,
    crypto: Arc<dyn CryptoProvider>,
    state: Mutex<SessionState>,
    license_href: parking_lot::Mutex<Option<String>>,
}

impl<T: Transport> std::fmt::Debug for MslClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MslClient")
            .field("esn", &self.config.esn)
            .field("backend", &self.crypto.backend())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> MslClient<T> {
    /// Build a client, picking the crypto backend from `config`.
    ///
    /// The hardware backend needs `drm`; when it is missing or refuses to open
    /// a session the client falls back to software if
    /// `config.fallback_to_software` is set, otherwise
    /// [`Error::BackendUnavailable`] is returned.
    pub fn new(
        config: MslConfig,
        transport: T,
        store: Arc<dyn Store>,
        drm: Option<Box<dyn MediaDrm>>,
    ) -> Result<Self> {
        Self::build(config, transport, store, drm, SoftwareCrypto::new)
    }

    /// Build a client around an already chosen provider.
    pub fn with_provider(
        config: MslConfig,
        transport: T,
        store: Arc<dyn Store>,
        crypto: Arc<dyn CryptoProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let state = SessionState::new(config.esn.clone(), store, config.state_name.clone());
        Ok(Self {
            config,
            transport,
            crypto,
            state: Mutex::new(state),
            license_href: parking_lot::Mutex::new(None),
        })
    }

    fn build(
        config: MslConfig,
        transport: T,
        store: Arc<dyn Store>,
        drm: Option<Box<dyn MediaDrm>>,
        software: impl FnOnce() -> Result<SoftwareCrypto>,
    ) -> Result<Self> {
        config.validate()?;
        let crypto: Arc<dyn CryptoProvider> = match config.effective_backend() {
            Backend::Software => Arc::new(software()?),
            Backend::HardwareDrm => {
                let hardware = drm
                    .ok_or_else(|| Error::BackendUnavailable("no MediaDrm available".to_string()))
                    .and_then(HardwareCrypto::open);
                match hardware {
                    Ok(hardware) => Arc::new(hardware),
                    Err(e) if config.fallback_to_software => {
                        warn!("{}; falling back to software crypto", e);
                        Arc::new(software()?)
                    }
                    Err(e) => return Err(e),
                }
            }
        };
        info!("MSL client for {} using {} crypto", config.esn, crypto.backend());
        Self::with_provider(config, transport, store, crypto)
    }

    #[must_use]
    pub fn config(&self) -> &MslConfig {
        &self.config
    }

    #[must_use]
    pub fn backend(&self) -> Backend {
        self.crypto.backend()
    }

    /// Request a manifest and translate it into an MPD document.
    pub async fn request_manifest(
        &self,
        viewable_id: u64,
        capabilities: &ManifestCapabilities,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let manifest = self.fetch_manifest(viewable_id, capabilities, cancel).await?;
        let options = TranslateOptions {
            preferred_audio_language: self.config.locale.first().cloned(),
        };
        mpd::translate(&manifest, &options)
    }

    /// Request a manifest and return it untranslated.
    ///
    /// Remembers the manifest's license link for the next
    /// [`request_license`](Self::request_license).
    pub async fn fetch_manifest(
        &self,
        viewable_id: u64,
        capabilities: &ManifestCapabilities,
        cancel: &CancellationToken,
    ) -> Result<Manifest> {
        info!("Requesting manifest for {}", viewable_id);
        let body = profiles::manifest_request(&self.config, viewable_id, capabilities);
        let result = self
            .authenticated_request(&self.config.manifest_url(), &body, cancel)
            .await?;
        let manifest: Manifest =
            serde_json::from_value(result).map_err(|e| Error::from(e).into_corruption())?;
        if let Some(link) = &manifest.links.license {
            *self.license_href.lock() = Some(link.href.clone());
        }
        debug!(
            "Manifest has {} video, {} audio and {} text tracks",
            manifest.video_tracks.len(),
            manifest.audio_tracks.len(),
            manifest.timedtexttracks.len()
        );
        Ok(manifest)
    }

    /// Exchange a base64 Widevine challenge for a base64 license.
    pub async fn request_license(
        &self,
        challenge_b64: &str,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let href = self
            .license_href
            .lock()
            .clone()
            .unwrap_or_else(|| DEFAULT_LICENSE_HREF.to_string());
        info!("Requesting license for DRM session {}", session_id);
        let body = profiles::license_request(&self.config, &href, challenge_b64, session_id);
        let result = self
            .authenticated_request(&self.config.license_url(), &body, cancel)
            .await?;

        let entry = match &result {
            Value::Array(entries) => entries.first(),
            other => Some(other),
        };
        entry
            .and_then(|e| e.get("licenseResponseBase64"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                Error::ProtocolCorruption("license result has no licenseResponseBase64".to_string())
            })
    }

    /// Run a key exchange now, whatever the token state.
    pub async fn perform_handshake(&self, cancel: &CancellationToken) -> Result<()> {
        let mut state = self.lock_state(cancel).await?;
        self.load_locked(&mut state)?;
        self.handshake_locked(&mut state, cancel).await
    }

    /// Current token sequence and expiration.
    pub async fn status(&self) -> Result<SessionStatus> {
        let mut state = self.state.lock().await;
        self.load_locked(&mut state)?;
        let token = state.master_token();
        Ok(SessionStatus {
            backend: self.crypto.backend(),
            has_keys: state.keys().is_some(),
            sequence_number: token.map(|t| t.sequence_number()),
            expiration: token.map(|t| t.expiration()),
            remaining_secs: token.map(|t| t.remaining(unix_now())),
        })
    }

    async fn lock_state(&self, cancel: &CancellationToken) -> Result<MutexGuard<'_, SessionState>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            guard = self.state.lock() => Ok(guard),
        }
    }

    fn load_locked(&self, state: &mut SessionState) -> Result<()> {
        if !state.is_loaded() {
            let outcome = state.load(&*self.crypto)?;
            debug!("MSL state load: {:?}", outcome);
        }
        Ok(())
    }

    /// Load state and handshake if the token is missing or about to expire.
    async fn ensure_ready(&self, cancel: &CancellationToken) -> Result<Snapshot> {
        let mut state = self.lock_state(cancel).await?;
        self.load_locked(&mut state)?;
        if state.needs_handshake(unix_now(), self.config.refresh_window_secs) {
            self.handshake_locked(&mut state, cancel).await?;
        }
        state
            .snapshot()
            .ok_or_else(|| Error::HandshakeFailed("no session keys after handshake".to_string()))
    }

    async fn handshake_locked(
        &self,
        state: &mut SessionState,
        cancel: &CancellationToken,
    ) -> Result<()> {
        info!("Performing MSL key exchange ({} crypto)", self.crypto.backend());
        let header = HeaderData {
            sender: self.config.esn.clone(),
            messageid: state.next_message_id(),
            renewable: true,
            handshake: true,
            nonreplayable: false,
            capabilities: Capabilities {
                languages: self.config.locale.clone(),
                compressionalgos: Vec::new(),
                encoderformats: vec!["JSON".to_string()],
            },
            recipient: RECIPIENT.to_string(),
            timestamp: unix_now(),
            keyrequestdata: Some(vec![self.crypto.key_request()?]),
            userauthdata: None,
            useridtoken: None,
        };
        let body = encode_handshake(&header)?;
        let response = self
            .send(
                &self.config.manifest_url(),
                body,
                self.config.handshake_timeout(),
                cancel,
            )
            .await?;
        if !response.is_success() {
            return Err(Error::HandshakeFailed(format!(
                "HTTP status {}",
                response.status
            )));
        }

        let (key_response, _) = decode_handshake_response(&response.body)?;
        let keys = self.crypto.parse_key_response(&key_response)?;
        self.crypto.commit_handshake()?;
        let token = key_response.mastertoken;
        info!(
            "MSL key exchange done (sequence {}, expires {})",
            token.sequence_number(),
            token.expiration()
        );
        state.install(keys, token);
        if let Err(e) = state.save(&*self.crypto) {
            warn!("Failed to persist MSL state: {}", e);
        }
        Ok(())
    }

    /// Send with the per-call timeout, aborting when `cancel` fires.
    async fn send(
        &self,
        url: &str,
        body: String,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = tokio::time::timeout(timeout, self.transport.send(url, body, timeout)) => {
                match result {
                    Ok(response) => response,
                    Err(_) => Err(Error::Transport(format!(
                        "POST {} timed out after {}s",
                        url,
                        timeout.as_secs()
                    ))),
                }
            }
        }
    }

    /// Authenticated request with one re-handshake on token rejection.
    async fn authenticated_request(
        &self,
        url: &str,
        body: &Value,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let snapshot = self.ensure_ready(cancel).await?;
        match self.exchange(url, body, &snapshot, cancel).await {
            Err(Error::TokenExpired(reason)) => {
                info!("Master token rejected ({}), renewing", reason);
                let snapshot = {
                    let mut state = self.lock_state(cancel).await?;
                    if state.generation() == snapshot.generation
                        || state.needs_handshake(unix_now(), self.config.refresh_window_secs)
                    {
                        self.handshake_locked(&mut state, cancel).await?;
                    }
                    state.snapshot().ok_or_else(|| {
                        Error::HandshakeFailed("no session keys after handshake".to_string())
                    })?
                };
                self.exchange(url, body, &snapshot, cancel).await
            }
            other => other,
        }
    }

    fn request_header(&self, snapshot: &Snapshot) -> HeaderData {
        let (userauthdata, useridtoken) = match &self.config.credentials {
            Some(credentials) if snapshot.send_user_auth => (
                Some(UserAuthData::EmailPassword {
                    email: credentials.email.clone(),
                    password: credentials.password.clone(),
                }),
                None,
            ),
            _ => (None, snapshot.user_id_token.clone()),
        };
        HeaderData {
            sender: self.config.esn.clone(),
            messageid: crate::utils::random_message_id(),
            renewable: true,
            handshake: false,
            nonreplayable: false,
            capabilities: Capabilities {
                languages: self.config.locale.clone(),
                compressionalgos: vec![Compression::Gzip],
                encoderformats: vec!["JSON".to_string()],
            },
            recipient: RECIPIENT.to_string(),
            timestamp: unix_now(),
            keyrequestdata: None,
            userauthdata,
            useridtoken,
        }
    }

    /// One encrypted round trip with the keys in `snapshot`.
    async fn exchange(
        &self,
        url: &str,
        body: &Value,
        snapshot: &Snapshot,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let header = self.request_header(snapshot);
        let sent_user_auth = header.userauthdata.is_some();
        let codec = MessageCodec::new(
            &*self.crypto,
            &snapshot.keys,
            snapshot.master_token.keyid(&self.config.esn),
        );
        let compression = (serde_json::to_vec(body)?.len() > COMPRESSION_THRESHOLD)
            .then_some(Compression::Gzip);
        let wire = codec.encode(&header, &snapshot.master_token, body, compression)?;
        debug!(
            "MSL message {} to {} (sequence {})",
            header.messageid,
            url,
            snapshot.master_token.sequence_number()
        );

        let response = self
            .send(url, wire, self.config.request_timeout(), cancel)
            .await?;
        if !response.is_success() {
            return Err(Error::Transport(format!(
                "HTTP status {} from {}",
                response.status, url
            )));
        }
        let response = ChunkedResponse::parse(&response.body)?;
        let response_header = codec.decode_header(&response.header)?;
        let payload = codec.decode_payloads(&response.payloads)?;
        debug!(
            "MSL response {} ({} chunks, {} bytes)",
            header.messageid,
            response.payloads.len(),
            payload.len()
        );

        self.apply_response_header(response_header, snapshot, sent_user_auth, cancel)
            .await?;
        extract_result(&payload)
    }

    /// Take renewed keys and user tokens from a verified response header.
    async fn apply_response_header(
        &self,
        header: ResponseHeaderData,
        snapshot: &Snapshot,
        sent_user_auth: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if header.keyresponsedata.is_none() && header.useridtoken.is_none() && !sent_user_auth {
            return Ok(());
        }
        let mut state = self.lock_state(cancel).await?;
        if state.generation() != snapshot.generation {
            debug!("Session changed during request, dropping response tokens");
            return Ok(());
        }

        if let Some(key_response) = header.keyresponsedata {
            if !state.accepts(&key_response.mastertoken) {
                warn!(
                    "Ignoring server key renewal with stale sequence {}",
                    key_response.mastertoken.sequence_number()
                );
            } else {
                match self.crypto.renew_keys(&key_response) {
                    Ok(keys) => {
                        state.renew(keys, key_response.mastertoken);
                        info!("Server renewed keys (sequence {})", state.sequence_number());
                    }
                    Err(e) => warn!("Ignoring server key renewal: {}", e),
                }
            }
        }
        if let Some(token) = header.useridtoken {
            state.set_user_id_token(token);
        }
        if sent_user_auth {
            state.mark_user_authenticated();
        }
        if let Err(e) = state.save(&*self.crypto) {
            warn!("Failed to persist MSL state: {}", e);
        }
        Ok(())
    }
}
