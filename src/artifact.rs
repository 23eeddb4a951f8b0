//! Per-download scratch space and the file the engine leaves behind in it.
//!
//! Every download gets its own directory under the downloads root, named
//! after a fresh UUID. yt-dlp writes `<run>/<run>.<ext>` (plus intermediates
//! when it merges), so two concurrent downloads of the same video never see
//! each other's files. Dropping a [`DownloadRun`] removes its directory, which
//! is what keeps failed downloads from leaking files.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::{FetchError, FetchResult};

/// Download name used when nothing of the title survives sanitizing.
pub const FALLBACK_FILE_STEM: &str = "video";
const PREFERRED_EXTENSION: &str = "mp4";

/// Scratch directory owned by a single download request.
#[derive(Debug)]
pub struct DownloadRun {
    id: String,
    dir: TempDir,
}

impl DownloadRun {
    /// Creates `<root>/<uuid>`. Creation is exclusive: an existing directory
    /// with the same name is an error, never reused.
    pub fn create(root: &Path) -> FetchResult<Self> {
        fs::create_dir_all(root)
            .map_err(|err| FetchError::storage("creating downloads directory", root, err))?;
        let id = Uuid::new_v4().simple().to_string();
        let dir = tempfile::Builder::new()
            .prefix(&id)
            .rand_bytes(0)
            .tempdir_in(root)
            .map_err(|err| FetchError::storage("creating run directory", root.join(&id), err))?;
        Ok(Self { id, dir })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// yt-dlp output template; the engine substitutes the real extension.
    pub fn output_template(&self) -> PathBuf {
        self.dir().join(format!("{}.%(ext)s", self.id))
    }

    /// Removes the run directory and everything in it, reporting failures
    /// instead of swallowing them like `Drop` does.
    pub fn remove(self) -> io::Result<()> {
        self.dir.close()
    }
}

/// The single file a completed run hands to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub file_name: String,
    pub size: u64,
}

impl Artifact {
    /// Locates the output of `run` and names it after `title`.
    pub fn resolve(run: &DownloadRun, title: Option<&str>) -> FetchResult<Self> {
        let path = find_output(run.id(), run.dir())?;
        let size = fs::metadata(&path)
            .map_err(|err| FetchError::storage("reading artifact metadata", &path, err))?
            .len();
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or(PREFERRED_EXTENSION);
        Ok(Self {
            file_name: download_file_name(title, extension),
            path,
            size,
        })
    }
}

/// Picks the canonical output among the files starting with `run_id`.
///
/// Preference: `.mp4` first, then the merged file over per-format
/// intermediates (`<id>.mp4` beats `<id>.f137.mp4`), then by name so the
/// choice never depends on directory iteration order.
pub fn find_output(run_id: &str, dir: &Path) -> FetchResult<PathBuf> {
    let mut candidates: Vec<(CandidateRank, PathBuf)> = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|err| {
            let path = err.path().unwrap_or(dir).to_path_buf();
            FetchError::storage("scanning run directory", path, err.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !name.starts_with(run_id) || is_incomplete(&name) {
            continue;
        }
        let rank = CandidateRank::new(run_id, &name);
        candidates.push((rank, entry.into_path()));
    }

    candidates
        .into_iter()
        .min_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, path)| path)
        .ok_or_else(|| FetchError::ArtifactMissing {
            run_id: run_id.to_string(),
        })
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct CandidateRank {
    not_preferred_container: bool,
    intermediate: bool,
    name: String,
}

impl CandidateRank {
    fn new(run_id: &str, name: &str) -> Self {
        let not_preferred_container = !Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(PREFERRED_EXTENSION));
        // `<id>.<ext>` has a single segment after the id; yt-dlp's per-format
        // downloads carry an extra `.f<format>` segment.
        let intermediate = name[run_id.len()..]
            .trim_start_matches('.')
            .split('.')
            .count()
            > 1;
        Self {
            not_preferred_container,
            intermediate,
            name: name.to_string(),
        }
    }
}

/// Fragments yt-dlp leaves while a download or merge is still in flight.
fn is_incomplete(name: &str) -> bool {
    name.ends_with(".part")
        || name.ends_with(".ytdl")
        || name.contains(".part-Frag")
        || name.contains(".temp.")
}

/// Keeps letters, digits and spaces only, so the name is safe as a download
/// file name on every platform.
pub fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ')
        .collect::<String>()
        .trim_end()
        .to_string()
}

pub fn download_file_name(title: Option<&str>, extension: &str) -> String {
    let sanitized = title.map(sanitize_title).unwrap_or_default();
    let stem = if sanitized.trim().is_empty() {
        FALLBACK_FILE_STEM
    } else {
        sanitized.as_str()
    };
    format!("{stem}.{extension}")
}
