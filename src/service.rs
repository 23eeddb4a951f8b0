//! The two request flows: listing formats for a URL and producing a single
//! downloadable file for a chosen format.

use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use serde::Serialize;
use tokio::fs::File;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::oneshot;
use tracing::{error, info};

use crate::artifact::{Artifact, DownloadRun};
use crate::catalog::{StreamVariant, build_catalog};
use crate::cleanup::CleanupScheduler;
use crate::engine::MediaEngine;
use crate::error::{FetchError, FetchResult};
use crate::plan::resolve_plan;

/// Payload of the info endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct VideoInfo {
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub duration: Option<f64>,
    pub formats: Vec<StreamVariant>,
}

/// Orchestrates probe → plan → fetch → resolve. Cheap to clone; nothing in
/// here is shared between requests except the engine handle and the
/// scheduler.
#[derive(Clone)]
pub struct DownloadService {
    engine: Arc<dyn MediaEngine>,
    downloads_dir: PathBuf,
    cleanup: CleanupScheduler,
}

impl DownloadService {
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        downloads_dir: impl Into<PathBuf>,
        cleanup: CleanupScheduler,
    ) -> Self {
        Self {
            engine,
            downloads_dir: downloads_dir.into(),
            cleanup,
        }
    }

    pub fn cleanup(&self) -> &CleanupScheduler {
        &self.cleanup
    }

    pub async fn info(&self, url: &str) -> FetchResult<VideoInfo> {
        let result = self.load_info(url).await;
        if let Err(err) = &result {
            error!(url, %err, "get info failed");
        }
        result
    }

    async fn load_info(&self, url: &str) -> FetchResult<VideoInfo> {
        let source = self
            .engine
            .probe(url)
            .await
            .map_err(FetchError::ExtractionFailed)?;
        let formats = build_catalog(&source.formats);
        Ok(VideoInfo {
            title: source.title,
            thumbnail: source.thumbnail,
            duration: source.duration,
            formats,
        })
    }

    /// Downloads `format_id` of `url` into a fresh run directory. On any
    /// error the run directory is already gone when this returns.
    ///
    /// The work runs as a tracked task. If the caller stops waiting (client
    /// disconnect), the engine is left to finish and the finished run is
    /// handed to the cleanup scheduler instead of the caller.
    pub async fn download(&self, url: &str, format_id: &str) -> FetchResult<PreparedDownload> {
        let (sender, receiver) = oneshot::channel();
        let service = self.clone();
        let (task_url, task_format) = (url.to_string(), format_id.to_string());
        self.cleanup.track(async move {
            let result = service.run_download(&task_url, &task_format).await;
            if let Err(err) = &result {
                error!(url = %task_url, format_id = %task_format, %err, "download failed");
            }
            if let Err(Ok(abandoned)) = sender.send(result) {
                info!(
                    run_id = abandoned.run_id(),
                    url = %task_url,
                    "caller went away before the download finished"
                );
                abandoned.release();
            }
        });

        receiver.await.map_err(|_| FetchError::Interrupted {
            url: url.to_string(),
        })?
    }

    async fn run_download(&self, url: &str, format_id: &str) -> FetchResult<PreparedDownload> {
        // The catalog is probed again: the caller's list may be stale.
        let source = self
            .engine
            .probe(url)
            .await
            .map_err(FetchError::ExtractionFailed)?;
        let plan = resolve_plan(&source, format_id)?;

        let run = DownloadRun::create(&self.downloads_dir)?;
        info!(run_id = run.id(), url, format = %plan.format, "fetching");
        self.engine
            .fetch(url, &plan, &run.output_template())
            .await
            .map_err(FetchError::DownloadFailed)?;

        let artifact = Artifact::resolve(&run, source.title.as_deref())?;
        info!(
            run_id = run.id(),
            file = %artifact.file_name,
            size = artifact.size,
            "download ready"
        );
        Ok(PreparedDownload {
            run,
            artifact,
            cleanup: self.cleanup.clone(),
        })
    }
}

/// A finished run waiting to be streamed to the caller.
#[derive(Debug)]
pub struct PreparedDownload {
    run: DownloadRun,
    artifact: Artifact,
    cleanup: CleanupScheduler,
}

impl PreparedDownload {
    pub fn run_id(&self) -> &str {
        self.run.id()
    }

    pub fn artifact(&self) -> &Artifact {
        &self.artifact
    }

    /// Gives up on streaming and queues the run for deletion.
    fn release(self) {
        self.cleanup.schedule(self.run);
    }

    /// Opens the artifact for streaming. The returned reader owns the run;
    /// dropping it (after the body is sent, or when the client goes away)
    /// hands the run to the cleanup scheduler.
    pub async fn into_reader(self) -> FetchResult<ArtifactReader> {
        let Self {
            run,
            artifact,
            cleanup,
        } = self;
        let release = ReleaseGuard {
            run: Some(run),
            cleanup,
        };
        let file = File::open(&artifact.path)
            .await
            .map_err(|err| FetchError::storage("opening artifact", &artifact.path, err))?;
        Ok(ArtifactReader {
            file,
            _release: release,
        })
    }
}

/// Schedules cleanup of its run when dropped, whichever way the request ends.
#[derive(Debug)]
struct ReleaseGuard {
    run: Option<DownloadRun>,
    cleanup: CleanupScheduler,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if let Some(run) = self.run.take() {
            self.cleanup.schedule(run);
        }
    }
}

/// Async reader over an artifact that keeps the run alive while it is read.
#[derive(Debug)]
pub struct ArtifactReader {
    file: File,
    _release: ReleaseGuard,
}

impl AsyncRead for ArtifactReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().file).poll_read(cx, buf)
    }
}
