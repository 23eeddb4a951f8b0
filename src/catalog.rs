//! Turns yt-dlp's `--dump-single-json` payload into the list of formats a
//! caller can pick from.
//!
//! yt-dlp reports every variant it knows about, including storyboards and
//! other non-media records. Those are dropped here, and every remaining record
//! is classified by which codecs it carries so the download path can decide
//! whether a separate audio track has to be merged in.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use tracing::debug;

/// Codec tag yt-dlp uses to say "this stream has no such track".
const NO_CODEC: &str = "none";
const FALLBACK_QUALITY: &str = "Audio";
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// One entry of the engine's `formats` array. Only the fields the catalog and
/// the plan resolver look at are kept.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFormat {
    pub format_id: String,
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default)]
    pub vcodec: Option<String>,
    #[serde(default)]
    pub acodec: Option<String>,
    #[serde(default)]
    pub format_note: Option<String>,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub height: Option<f64>,
    #[serde(default)]
    pub filesize: Option<f64>,
    #[serde(default)]
    pub filesize_approx: Option<f64>,
    #[serde(default)]
    pub url: Option<String>,
}

impl RawFormat {
    /// A missing tag means yt-dlp did not identify the codec, which still
    /// implies a track is there. Only the explicit `"none"` marks absence.
    pub fn has_video(&self) -> bool {
        codec_present(self.vcodec.as_deref())
    }

    pub fn has_audio(&self) -> bool {
        codec_present(self.acodec.as_deref())
    }

    pub fn kind(&self) -> Option<StreamKind> {
        StreamKind::classify(self.has_video(), self.has_audio())
    }

    /// Exact size when reported, otherwise the engine's estimate.
    pub fn size_bytes(&self) -> Option<u64> {
        self.filesize
            .or(self.filesize_approx)
            .filter(|size| size.is_finite() && *size > 0.0)
            .map(|size| size.round() as u64)
    }

    pub fn quality_label(&self) -> String {
        non_blank(self.format_note.as_deref())
            .or_else(|| non_blank(self.resolution.as_deref()))
            .unwrap_or(FALLBACK_QUALITY)
            .to_string()
    }
}

fn codec_present(tag: Option<&str>) -> bool {
    tag != Some(NO_CODEC)
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.trim().is_empty())
}

/// Top-level metadata for a source URL as reported by the engine.
#[derive(Debug, Clone, Default)]
pub struct SourceInfo {
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub duration: Option<f64>,
    pub formats: Vec<RawFormat>,
}

#[derive(Deserialize)]
struct DumpedInfo {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    formats: Vec<Value>,
}

impl SourceInfo {
    /// Parses a single-JSON dump. A document that is not JSON (or whose top
    /// level fields have the wrong shape) is an error; individual format
    /// records that cannot be read are skipped.
    pub fn from_json(raw: &[u8]) -> Result<Self, serde_json::Error> {
        let dumped: DumpedInfo = serde_json::from_slice(raw)?;
        let formats = dumped
            .formats
            .into_iter()
            .filter_map(|value| match serde_json::from_value::<RawFormat>(value) {
                Ok(format) => Some(format),
                Err(err) => {
                    debug!(%err, "skipping unreadable format record");
                    None
                }
            })
            .collect();

        Ok(Self {
            title: dumped.title,
            thumbnail: dumped.thumbnail,
            duration: dumped.duration,
            formats,
        })
    }

    pub fn find_format(&self, format_id: &str) -> Option<&RawFormat> {
        self.formats
            .iter()
            .find(|format| format.format_id == format_id)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum StreamKind {
    #[serde(rename = "Combined")]
    Combined,
    #[serde(rename = "Video Only")]
    VideoOnly,
    #[serde(rename = "Audio Only")]
    AudioOnly,
}

impl StreamKind {
    /// `None` for records that carry neither track.
    pub fn classify(video: bool, audio: bool) -> Option<Self> {
        match (video, audio) {
            (true, true) => Some(Self::Combined),
            (true, false) => Some(Self::VideoOnly),
            (false, true) => Some(Self::AudioOnly),
            (false, false) => None,
        }
    }
}

/// A selectable format as shown to the caller.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StreamVariant {
    pub id: String,
    pub ext: Option<String>,
    pub quality: String,
    pub height: u32,
    #[serde(rename = "size", serialize_with = "serialize_size")]
    pub size_bytes: Option<u64>,
    pub url: Option<String>,
    #[serde(rename = "type")]
    pub kind: StreamKind,
}

impl StreamVariant {
    fn from_raw(format: &RawFormat, kind: StreamKind) -> Self {
        let height = format
            .height
            .filter(|height| height.is_finite() && *height > 0.0)
            .map(|height| height.round() as u32)
            .unwrap_or(0);
        Self {
            id: format.format_id.clone(),
            ext: format.ext.clone(),
            quality: format.quality_label(),
            height,
            size_bytes: format.size_bytes(),
            url: format.url.clone(),
            kind,
        }
    }
}

fn serialize_size<S: Serializer>(size: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
    match size {
        Some(bytes) => serializer.serialize_str(&format_size(*bytes)),
        None => serializer.serialize_none(),
    }
}

/// Renders a byte count as MiB rounded to two decimals, e.g. `12.5 MB`.
pub fn format_size(bytes: u64) -> String {
    let megabytes = (bytes as f64 / BYTES_PER_MB * 100.0).round() / 100.0;
    format!("{megabytes} MB")
}

/// Builds the caller-facing catalog, keeping the engine's order.
pub fn build_catalog(formats: &[RawFormat]) -> Vec<StreamVariant> {
    formats
        .iter()
        .filter_map(|format| {
            format
                .kind()
                .map(|kind| StreamVariant::from_raw(format, kind))
        })
        .collect()
}
