//! Stream profile selection and service request bodies.
use serde_json::{json, Value};

use crate::config::MslConfig;
use crate::utils::unix_now;

/// Audio and trick-play profiles every device accepts.
pub const BASE_PROFILES: [&str; 4] = ["heaac-2-dash", "heaac-2hq-dash", "BIF240", "BIF320"];

pub const H264_PROFILES: [&str; 6] = [
    "playready-h264mpl30-dash",
    "playready-h264mpl31-dash",
    "playready-h264mpl40-dash",
    "playready-h264hpl30-dash",
    "playready-h264hpl31-dash",
    "playready-h264hpl40-dash",
];

pub const VP9_PROFILES: [&str; 4] = [
    "vp9-profile0-L21-dash-cenc",
    "vp9-profile0-L30-dash-cenc",
    "vp9-profile0-L31-dash-cenc",
    "vp9-profile0-L40-dash-cenc",
];

pub const DOLBY_AUDIO_PROFILES: [&str; 4] = [
    "ddplus-2.0-dash",
    "ddplus-5.1-dash",
    "ddplus-5.1hq-dash",
    "ddplus-atmos-dash",
];

const HEVC_LEVELS: [&str; 6] = ["L30", "L31", "L40", "L41", "L50", "L51"];

/// Media capabilities requested for one manifest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManifestCapabilities {
    pub hevc: bool,
    pub hdr: bool,
    pub dolby_vision: bool,
    pub vp9: bool,
    pub dolby_audio: bool,
    /// Report HDCP as engaged (ORed with the configured preference).
    pub hdcp_engaged: bool,
}

fn hevc_family(
    prefix: &'static str,
    tails: &'static [&'static str],
) -> impl Iterator<Item = String> {
    HEVC_LEVELS.iter().flat_map(move |level| {
        tails
            .iter()
            .map(move |tail| format!("{}{}-{}", prefix, level, tail))
    })
}

/// Profile list for `capabilities`, always ending with the subtitle profile.
#[must_use]
pub fn profiles(capabilities: &ManifestCapabilities, config: &MslConfig) -> Vec<String> {
    let mut profiles: Vec<String> = BASE_PROFILES.iter().map(|p| p.to_string()).collect();
    profiles.extend(H264_PROFILES.iter().map(|p| p.to_string()));

    if capabilities.hevc {
        profiles.extend(hevc_family("hevc-main-", &["dash-cenc"]));
        profiles.extend(hevc_family("hevc-main10-", &["dash-cenc-prk"]));
    }
    if capabilities.hdr {
        profiles.extend(hevc_family("hevc-hdr-main10-", &["dash-cenc", "dash-cenc-prk"]));
    }
    if capabilities.dolby_vision {
        profiles.extend(hevc_family("hevc-dv5-main10-", &["dash-cenc-prk"]));
    }
    if capabilities.vp9 {
        profiles.extend(VP9_PROFILES.iter().map(|p| p.to_string()));
    }
    if capabilities.dolby_audio {
        profiles.extend(DOLBY_AUDIO_PROFILES.iter().map(|p| p.to_string()));
    }

    profiles.push(config.subtitle_profile.profile().to_string());
    profiles
}

/// Service request envelope shared by manifest and license calls.
fn request_body(config: &MslConfig, url: &str, params: Value, echo: &str) -> Value {
    json!({
        "version": 2,
        "url": url,
        "id": unix_now(),
        "languages": config.locale,
        "params": params,
        "echo": echo,
    })
}

/// Manifest request body for `viewable_id`.
#[must_use]
pub fn manifest_request(
    config: &MslConfig,
    viewable_id: u64,
    capabilities: &ManifestCapabilities,
) -> Value {
    let profiles = profiles(capabilities, config);
    let hdcp_engaged = capabilities.hdcp_engaged || config.prefer_hdcp_engaged;
    let hdcp_versions: Vec<&str> = if hdcp_engaged { vec!["1.4"] } else { Vec::new() };

    let params = json!({
        "type": "standard",
        "viewableId": viewable_id,
        "profiles": profiles,
        "flavor": "PRE_FETCH",
        "drmType": "widevine",
        "drmVersion": 25,
        "usePsshBox": true,
        "isBranching": false,
        "useHttpsStreams": true,
        "imageSubtitleHeight": 1080,
        "uiVersion": config.ui_version,
        "uiPlatform": "SHAKTI",
        "clientVersion": config.client_version,
        "supportsPreReleasePin": true,
        "supportsWatermark": true,
        "videoOutputInfo": [{
            "type": "DigitalVideoOutputDescriptor",
            "outputType": "unknown",
            "supportedHdcpVersions": hdcp_versions,
            "isHdcpEngaged": hdcp_engaged,
        }],
        "titleSpecificData": {
            (viewable_id.to_string()): {"unletterboxed": true}
        },
        "preferAssistiveAudio": false,
        "isNonMember": false,
        "profileGroups": [{"name": "default", "profiles": profiles}],
        "licenseType": "standard",
    });
    request_body(config, "/manifest", params, "")
}

/// License request body. `url` is the license link of the last manifest.
#[must_use]
pub fn license_request(config: &MslConfig, url: &str, challenge_b64: &str, session_id: &str) -> Value {
    let now = unix_now();
    let params = json!([{
        "drmSessionId": session_id,
        "clientTime": now,
        "challengeBase64": challenge_b64,
        "xid": (now * 1000 + 1610).to_string(),
    }]);
    request_body(config, url, params, "drmSessionId")
}
