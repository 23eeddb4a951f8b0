//! Resolves a caller-chosen format id into the format expression handed to
//! yt-dlp.

use crate::catalog::SourceInfo;
use crate::error::{FetchError, FetchResult};

/// Audio fallback chain appended to a video-only format: best M4A track,
/// then any audio, then the best pre-merged stream.
const AUDIO_FALLBACK: &str = "bestaudio[ext=m4a]/bestaudio/best";
/// Container yt-dlp merges into when video and audio are fetched separately.
pub const MERGE_CONTAINER: &str = "mp4";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPlan {
    /// Format expression understood by the engine.
    pub format: String,
    /// Set only when two streams are merged, so the output has a single
    /// predictable extension.
    pub merge_container: Option<String>,
}

impl FetchPlan {
    pub fn direct(format_id: &str) -> Self {
        Self {
            format: format_id.to_string(),
            merge_container: None,
        }
    }

    pub fn combined(video_format_id: &str) -> Self {
        Self {
            format: format!("{video_format_id}+{AUDIO_FALLBACK}"),
            merge_container: Some(MERGE_CONTAINER.to_string()),
        }
    }
}

/// Picks the plan for `format_id` against a freshly probed catalog. The id
/// may have disappeared since the caller listed formats, in which case the
/// request is rejected before anything is downloaded.
pub fn resolve_plan(info: &SourceInfo, format_id: &str) -> FetchResult<FetchPlan> {
    let format = info
        .find_format(format_id)
        .ok_or_else(|| FetchError::FormatNotFound {
            format_id: format_id.to_string(),
        })?;

    if format.has_video() && !format.has_audio() {
        Ok(FetchPlan::combined(format_id))
    } else {
        Ok(FetchPlan::direct(format_id))
    }
}
