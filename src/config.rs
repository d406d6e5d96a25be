//! Client configuration loaded from YAML.
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::Backend;
use crate::error::{Error, Result};

/// Subtitle format requested in the profile list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubtitleProfile {
    /// `webvtt-lssdh-ios8`
    #[default]
    Webvtt,
    /// `simplesdh`
    SimpleSdh,
}

impl SubtitleProfile {
    #[must_use]
    pub fn profile(self) -> &'static str {
        match self {
            SubtitleProfile::Webvtt => "webvtt-lssdh-ios8",
            SubtitleProfile::SimpleSdh => "simplesdh",
        }
    }
}

/// Account credentials sent as `userauthdata` on the first authenticated
/// request after a handshake.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// MSL client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MslConfig {
    /// Device identity (ESN), sent in every header.
    pub esn: String,
    /// Crypto backend to use.
    pub backend: Backend,
    /// Use the software backend even when a DRM session is available.
    pub force_pure_software: bool,
    /// Fall back to software when the DRM session cannot be opened.
    pub fallback_to_software: bool,
    /// BCP-47 tags for `capabilities.languages`.
    pub locale: Vec<String>,
    /// Report HDCP as engaged on the video output descriptor.
    pub prefer_hdcp_engaged: bool,
    pub subtitle_profile: SubtitleProfile,
    pub base_url: String,
    pub manifest_path: String,
    pub license_path: String,
    /// Name of the persisted state blob.
    pub state_name: String,
    pub request_timeout_secs: u64,
    pub handshake_timeout_secs: u64,
    /// Re-handshake when the master token expires within this many seconds.
    pub refresh_window_secs: i64,
    pub credentials: Option<Credentials>,
    pub client_version: String,
    pub ui_version: String,
}

impl Default for MslConfig {
    fn default() -> Self {
        Self {
            esn: String::new(),
            backend: Backend::Software,
            force_pure_software: false,
            fallback_to_software: true,
            locale: vec!["en-US".to_string()],
            prefer_hdcp_engaged: false,
            subtitle_profile: SubtitleProfile::Webvtt,
            base_url: "https://www.netflix.com".to_string(),
            manifest_path: "/nq/msl_v1/cadmium/pbo_manifests/%5E1.0.0/router".to_string(),
            license_path: "/nq/msl_v1/cadmium/pbo_licenses/%5E1.0.0/router".to_string(),
            state_name: "msl_data".to_string(),
            request_timeout_secs: 30,
            handshake_timeout_secs: 60,
            refresh_window_secs: 36_000,
            credentials: None,
            client_version: "6.0041.930.911".to_string(),
            ui_version: "shakti-v25d2fa21".to_string(),
        }
    }
}

impl MslConfig {
    /// Default configuration for a device identity.
    pub fn new(esn: impl Into<String>) -> Self {
        Self {
            esn: esn.into(),
            ..Self::default()
        }
    }

    /// Load and validate a YAML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&text)
    }

    /// Parse and validate YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)
            .map_err(|e| Error::Config(format!("Invalid YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.esn.trim().is_empty() {
            return Err(Error::Config("esn must not be empty".to_string()));
        }
        if self.locale.is_empty() {
            return Err(Error::Config("locale must list at least one language".to_string()));
        }
        if self.request_timeout_secs == 0 || self.handshake_timeout_secs == 0 {
            return Err(Error::Config("timeouts must be positive".to_string()));
        }
        Ok(())
    }

    /// Backend to try first, after `force_pure_software`.
    #[must_use]
    pub fn effective_backend(&self) -> Backend {
        if self.force_pure_software {
            Backend::Software
        } else {
            self.backend
        }
    }

    #[must_use]
    pub fn manifest_url(&self) -> String {
        join_url(&self.base_url, &self.manifest_path)
    }

    #[must_use]
    pub fn license_url(&self) -> String {
        join_url(&self.base_url, &self.license_path)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
