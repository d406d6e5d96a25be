//! Manifest to DASH MPD translation.
//!
//! The service manifest lists video, audio and timed text tracks with their
//! downloadable streams. Each track becomes one `AdaptationSet` of a single
//! `Period`; each stream becomes one `Representation` addressed through a
//! `BaseURL` and a `SegmentBase` index range.
use std::collections::BTreeMap;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::utils::b64_decode;

pub const MPD_NAMESPACE: &str = "urn:mpeg:dash:schema:mpd:2011";
pub const CENC_NAMESPACE: &str = "urn:mpeg:cenc:2013";
pub const WIDEVINE_NAMESPACE: &str = "urn:mpeg:widevine:2013";
pub const MP4_PROTECTION_SCHEME: &str = "urn:mpeg:dash:mp4protection:2011";
pub const WIDEVINE_SCHEME: &str = "urn:uuid:EDEF8BA9-79D6-4ACE-A3C8-27DCD51D21ED";
pub const AUDIO_CHANNEL_SCHEME: &str = "urn:mpeg:dash:23003:3:audio_channel_configuration:2011";
pub const ROLE_SCHEME: &str = "urn:mpeg:dash:role:2011";
pub const WEBVTT_PROFILE: &str = "webvtt-lssdh-ios8";

/// Decoded service manifest (the parts the translator reads).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Manifest {
    #[serde(default, rename = "movieId")]
    pub movie_id: Option<u64>,
    /// Milliseconds.
    pub duration: u64,
    #[serde(default)]
    pub links: Links,
    #[serde(default)]
    pub video_tracks: Vec<VideoTrack>,
    #[serde(default)]
    pub audio_tracks: Vec<AudioTrack>,
    #[serde(default)]
    pub timedtexttracks: Vec<TextTrack>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Links {
    #[serde(default)]
    pub license: Option<Link>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Link {
    pub href: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrmHeader {
    /// Base64 PSSH box.
    #[serde(default)]
    pub bytes: Option<String>,
    /// Base64 16-byte key id.
    #[serde(default)]
    pub key_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoTrack {
    #[serde(default)]
    pub has_drm_streams: bool,
    #[serde(default)]
    pub drm_header: Option<DrmHeader>,
    #[serde(default)]
    pub streams: Vec<VideoStream>,
}

/// Segment index location inside the stream file.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Sidx {
    pub offset: u64,
    pub size: u64,
}

/// Stream URLs: either `[{url, cdn_id}]` or `{cdn_id: url}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StreamUrls {
    List(Vec<StreamUrl>),
    Map(BTreeMap<String, String>),
}

impl Default for StreamUrls {
    fn default() -> Self {
        StreamUrls::List(Vec::new())
    }
}

impl StreamUrls {
    /// First advertised URL.
    #[must_use]
    pub fn first(&self) -> Option<&str> {
        match self {
            StreamUrls::List(list) => list.first().map(|u| u.url.as_str()),
            StreamUrls::Map(map) => map.values().next().map(String::as_str),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamUrl {
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStream {
    #[serde(default, rename = "downloadable_id")]
    pub downloadable_id: Option<String>,
    #[serde(rename = "content_profile")]
    pub content_profile: String,
    pub bitrate: u64,
    #[serde(rename = "res_w")]
    pub res_w: u32,
    #[serde(rename = "res_h")]
    pub res_h: u32,
    #[serde(default = "one", rename = "framerate_value")]
    pub framerate_value: u32,
    #[serde(default = "one", rename = "framerate_scale")]
    pub framerate_scale: u32,
    #[serde(default)]
    pub is_drm: bool,
    #[serde(default)]
    pub hdcp_versions: Vec<String>,
    #[serde(default)]
    pub urls: StreamUrls,
    #[serde(default)]
    pub start_byte_offset: Option<u64>,
    #[serde(default)]
    pub sidx: Option<Sidx>,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioTrack {
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub track_type: String,
    #[serde(default)]
    pub is_native: bool,
    #[serde(default)]
    pub channels: Option<String>,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub streams: Vec<AudioStream>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioStream {
    #[serde(default, rename = "downloadable_id")]
    pub downloadable_id: Option<String>,
    #[serde(rename = "content_profile")]
    pub content_profile: String,
    pub bitrate: u64,
    #[serde(default)]
    pub channels: Option<String>,
    #[serde(default)]
    pub urls: StreamUrls,
    #[serde(default)]
    pub start_byte_offset: Option<u64>,
    #[serde(default)]
    pub sidx: Option<Sidx>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextTrack {
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub track_type: String,
    #[serde(default)]
    pub is_none_track: bool,
    #[serde(default)]
    pub is_forced_narrative: bool,
    #[serde(default)]
    pub tt_downloadables: BTreeMap<String, TextDownloadable>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDownloadable {
    #[serde(default)]
    pub download_urls: BTreeMap<String, String>,
}

/// Translation options.
#[derive(Debug, Clone, Default)]
pub struct TranslateOptions {
    /// Audio language marked `default` when present (`"de"` matches `"de-DE"`).
    pub preferred_audio_language: Option<String>,
}

/// Translate a manifest into an MPD document.
pub fn translate(manifest: &Manifest, options: &TranslateOptions) -> Result<String> {
    let seconds = manifest.duration / 1000;
    let duration = format!("PT{}.00S", seconds);
    let init_length = seconds / 2 * 12 + 20_000;

    let mut xml = XmlOut::new();
    xml.decl()?;
    xml.start(
        "MPD",
        &[
            ("xmlns", MPD_NAMESPACE.into()),
            ("xmlns:cenc", CENC_NAMESPACE.into()),
            ("xmlns:widevine", WIDEVINE_NAMESPACE.into()),
            ("type", "static".into()),
            ("mediaPresentationDuration", duration.clone()),
        ],
    )?;
    xml.start("Period", &[("start", "PT0S".into()), ("duration", duration)])?;

    let drm_streams = manifest
        .video_tracks
        .first()
        .map(|t| t.has_drm_streams)
        .unwrap_or(false);
    for track in &manifest.video_tracks {
        write_video_track(&mut xml, track, drm_streams, init_length)?;
    }

    let default_audio = default_audio_index(&manifest.audio_tracks, options);
    for (index, track) in manifest.audio_tracks.iter().enumerate() {
        write_audio_track(&mut xml, track, Some(index) == default_audio, init_length)?;
    }

    let default_language = default_audio
        .and_then(|i| manifest.audio_tracks.get(i))
        .map(|t| t.language.as_str());
    for track in &manifest.timedtexttracks {
        if track.is_none_track {
            continue;
        }
        write_text_track(&mut xml, track, default_language)?;
    }

    xml.end("Period")?;
    xml.end("MPD")?;
    xml.finish()
}

fn write_video_track(
    xml: &mut XmlOut,
    track: &VideoTrack,
    drm_streams: bool,
    init_length: u64,
) -> Result<()> {
    xml.start(
        "AdaptationSet",
        &[("mimeType", "video/mp4".into()), ("contentType", "video".into())],
    )?;

    if let Some(header) = &track.drm_header {
        write_content_protection(xml, header)?;
    }

    for stream in track.streams.iter().filter(|s| s.is_drm == drm_streams) {
        let mut attrs = Vec::new();
        if let Some(id) = &stream.downloadable_id {
            attrs.push(("id", id.clone()));
        }
        attrs.extend([
            ("width", stream.res_w.to_string()),
            ("height", stream.res_h.to_string()),
            ("bandwidth", (stream.bitrate * 1024).to_string()),
            (
                "frameRate",
                format!("{}/{}", stream.framerate_value, stream.framerate_scale),
            ),
            ("hdcp", hdcp_version(&stream.hdcp_versions)),
            ("nflxContentProfile", stream.content_profile.clone()),
            ("codecs", video_codec(&stream.content_profile)),
            ("mimeType", "video/mp4".into()),
        ]);
        xml.start("Representation", &attrs)?;
        write_base_url(xml, stream.urls.first())?;
        write_segment_base(
            xml,
            init_range(stream.start_byte_offset, stream.sidx, init_length),
        )?;
        xml.end("Representation")?;
    }

    xml.end("AdaptationSet")
}

fn write_content_protection(xml: &mut XmlOut, header: &DrmHeader) -> Result<()> {
    if let Some(key_id) = &header.key_id {
        let kid = b64_decode(key_id).map_err(Error::into_corruption)?;
        let kid = Uuid::from_slice(&kid).map_err(|_| {
            Error::ProtocolCorruption(format!("keyId must be 16 bytes, got {}", kid.len()))
        })?;
        xml.empty(
            "ContentProtection",
            &[
                ("schemeIdUri", MP4_PROTECTION_SCHEME.into()),
                ("value", "cenc".into()),
                ("cenc:default_KID", kid.hyphenated().to_string()),
            ],
        )?;
    }

    xml.start(
        "ContentProtection",
        &[("schemeIdUri", WIDEVINE_SCHEME.into()), ("value", "widevine".into())],
    )?;
    xml.empty(
        "widevine:license",
        &[("robustness_level", "HW_SECURE_CODECS_REQUIRED".into())],
    )?;
    if let Some(pssh) = header.bytes.as_deref().filter(|p| !p.is_empty()) {
        xml.text_element("cenc:pssh", &[], pssh)?;
    }
    xml.end("ContentProtection")
}

fn write_audio_track(
    xml: &mut XmlOut,
    track: &AudioTrack,
    default: bool,
    init_length: u64,
) -> Result<()> {
    let mut attrs = vec![
        ("lang", track.language.clone()),
        ("contentType", "audio".into()),
        ("mimeType", "audio/mp4".into()),
        ("impaired", bool_attr(track.track_type == "ASSISTIVE")),
        ("original", bool_attr(track.is_native)),
        ("default", bool_attr(default)),
    ];
    let profile = track
        .profile
        .as_deref()
        .or_else(|| track.streams.first().map(|s| s.content_profile.as_str()))
        .unwrap_or_default();
    if profile.starts_with("ddplus-atmos") {
        attrs.push(("name", "ATMOS".into()));
    }
    xml.start("AdaptationSet", &attrs)?;

    for stream in &track.streams {
        let mut attrs = Vec::new();
        if let Some(id) = &stream.downloadable_id {
            attrs.push(("id", id.clone()));
        }
        attrs.extend([
            ("codecs", audio_codec(&stream.content_profile).to_string()),
            ("bandwidth", (stream.bitrate * 1024).to_string()),
            ("mimeType", "audio/mp4".into()),
        ]);
        xml.start("Representation", &attrs)?;

        let channels = stream
            .channels
            .as_deref()
            .or(track.channels.as_deref())
            .unwrap_or("2.0");
        xml.empty(
            "AudioChannelConfiguration",
            &[
                ("schemeIdUri", AUDIO_CHANNEL_SCHEME.into()),
                ("value", channel_count(channels).to_string()),
            ],
        )?;
        write_base_url(xml, stream.urls.first())?;
        write_segment_base(
            xml,
            init_range(stream.start_byte_offset, stream.sidx, init_length),
        )?;
        xml.end("Representation")?;
    }

    xml.end("AdaptationSet")
}

fn write_text_track(
    xml: &mut XmlOut,
    track: &TextTrack,
    default_language: Option<&str>,
) -> Result<()> {
    let Some((profile, downloadable)) = track
        .tt_downloadables
        .get_key_value(WEBVTT_PROFILE)
        .or_else(|| track.tt_downloadables.iter().next())
    else {
        return Ok(());
    };
    let is_webvtt = profile == WEBVTT_PROFILE;
    let language = track.language.clone().unwrap_or_default();
    let default = track.is_forced_narrative && default_language == Some(language.as_str());

    xml.start(
        "AdaptationSet",
        &[
            ("lang", language),
            ("codecs", if is_webvtt { "wvtt" } else { "stpp" }.into()),
            ("contentType", "text".into()),
            (
                "mimeType",
                if is_webvtt {
                    "text/vtt"
                } else {
                    "application/ttml+xml"
                }
                .into(),
            ),
            ("impaired", bool_attr(track.track_type == "ASSISTIVE")),
            ("forced", bool_attr(track.is_forced_narrative)),
            ("default", bool_attr(default)),
        ],
    )?;
    xml.empty(
        "Role",
        &[
            ("schemeIdUri", ROLE_SCHEME.into()),
            (
                "value",
                if track.is_forced_narrative { "forced" } else { "main" }.into(),
            ),
        ],
    )?;
    xml.start("Representation", &[("nflxProfile", profile.clone())])?;
    write_base_url(xml, downloadable.download_urls.values().next().map(String::as_str))?;
    xml.end("Representation")?;
    xml.end("AdaptationSet")
}

fn write_base_url(xml: &mut XmlOut, url: Option<&str>) -> Result<()> {
    match url {
        Some(url) => xml.text_element("BaseURL", &[], url),
        None => {
            warn!("Stream has no URL, emitting empty BaseURL");
            xml.text_element("BaseURL", &[], "")
        }
    }
}

fn write_segment_base(xml: &mut XmlOut, init: u64) -> Result<()> {
    let range = format!("0-{}", init);
    xml.start(
        "SegmentBase",
        &[("indexRange", range.clone()), ("indexRangeExact", "true".into())],
    )?;
    xml.empty("Initialization", &[("range", range)])?;
    xml.end("SegmentBase")
}

/// Upper bound of the init/index byte range.
fn init_range(start_byte_offset: Option<u64>, sidx: Option<Sidx>, init_length: u64) -> u64 {
    start_byte_offset
        .or_else(|| sidx.map(|s| s.offset + s.size))
        .unwrap_or(init_length)
}

fn bool_attr(value: bool) -> String {
    value.to_string()
}

/// Last entry that is not `none`; `any` means HDCP 1.0.
fn hdcp_version(versions: &[String]) -> String {
    match versions.iter().rev().find(|v| v.as_str() != "none") {
        Some(v) if v == "any" => "1.0".to_string(),
        Some(v) => v.clone(),
        None => "0.0".to_string(),
    }
}

fn video_codec(profile: &str) -> String {
    if profile.contains("hevc") {
        return "hevc".to_string();
    }
    if let Some(rest) = profile.strip_prefix("vp9-profile") {
        let mut parts = rest.split('-');
        let profile_number = parts.next().unwrap_or("0");
        let level = parts
            .next()
            .and_then(|l| l.strip_prefix('L'))
            .unwrap_or("30");
        return format!("vp9.{}.{}", profile_number, level);
    }
    "h264".to_string()
}

fn audio_codec(profile: &str) -> &'static str {
    match profile {
        "ddplus-2.0-dash" | "ddplus-5.1-dash" => "ec-3",
        _ => "aac",
    }
}

fn channel_count(channels: &str) -> u8 {
    match channels {
        "1.0" => 1,
        "5.1" => 6,
        "7.1" => 8,
        _ => 2,
    }
}

/// First track in the preferred language, else the first native track, else
/// the first track.
fn default_audio_index(tracks: &[AudioTrack], options: &TranslateOptions) -> Option<usize> {
    if tracks.is_empty() {
        return None;
    }
    let preferred = options.preferred_audio_language.as_deref().map(|lang| {
        lang.split(['-', '_'])
            .next()
            .unwrap_or(lang)
            .to_ascii_lowercase()
    });
    preferred
        .and_then(|p| {
            tracks.iter().position(|t| {
                t.track_type != "ASSISTIVE"
                    && t.language.split('-').next().unwrap_or("").eq_ignore_ascii_case(&p)
            })
        })
        .or_else(|| tracks.iter().position(|t| t.is_native))
        .or(Some(0))
}

/// Minimal element writer over `quick_xml`.
struct XmlOut {
    writer: Writer<Vec<u8>>,
}

impl XmlOut {
    fn new() -> Self {
        Self {
            writer: Writer::new(Vec::new()),
        }
    }

    fn write(&mut self, event: Event<'_>) -> Result<()> {
        self.writer
            .write_event(event)
            .map_err(|e| Error::Other(format!("Failed to write MPD: {}", e)))
    }

    fn decl(&mut self) -> Result<()> {
        self.write(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
    }

    fn element<'a>(name: &'a str, attrs: &'a [(&'a str, String)]) -> BytesStart<'a> {
        let mut start = BytesStart::new(name);
        for (key, value) in attrs {
            start.push_attribute((*key, value.as_str()));
        }
        start
    }

    fn start(&mut self, name: &str, attrs: &[(&str, String)]) -> Result<()> {
        self.write(Event::Start(Self::element(name, attrs)))
    }

    fn empty(&mut self, name: &str, attrs: &[(&str, String)]) -> Result<()> {
        self.write(Event::Empty(Self::element(name, attrs)))
    }

    fn text_element(&mut self, name: &str, attrs: &[(&str, String)], text: &str) -> Result<()> {
        self.start(name, attrs)?;
        self.write(Event::Text(BytesText::new(text)))?;
        self.end(name)
    }

    fn end(&mut self, name: &str) -> Result<()> {
        self.write(Event::End(BytesEnd::new(name)))
    }

    fn finish(self) -> Result<String> {
        let xml = String::from_utf8(self.writer.into_inner())
            .map_err(|e| Error::Other(format!("MPD is not UTF-8: {}", e)))?;
        Ok(xml.replace(['\n', '\r'], ""))
    }
}
