//! The external extraction engine. Everything the service knows about yt-dlp
//! lives behind [`MediaEngine`] so the orchestration can be exercised with a
//! stub engine in tests.

use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::catalog::SourceInfo;
use crate::error::EngineError;
use crate::plan::FetchPlan;

/// Listing and fetching capability of an extraction engine.
#[async_trait]
pub trait MediaEngine: Send + Sync + 'static {
    /// Lists metadata and stream variants for `url` without downloading.
    async fn probe(&self, url: &str) -> Result<SourceInfo, EngineError>;

    /// Downloads `url` according to `plan`, writing into `output_template`
    /// (yt-dlp syntax, `%(ext)s` is filled in by the engine). Returns once the
    /// engine has exited.
    async fn fetch(
        &self,
        url: &str,
        plan: &FetchPlan,
        output_template: &Path,
    ) -> Result<(), EngineError>;
}

/// [`MediaEngine`] backed by the `yt-dlp` command line tool.
#[derive(Debug, Clone)]
pub struct YtDlpEngine {
    program: PathBuf,
    cookies: Option<PathBuf>,
    probe_timeout: Duration,
}

impl YtDlpEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            cookies: None,
            probe_timeout: Duration::from_secs(10),
        }
    }

    /// Cookie jar passed with `--cookies`. Skipped at call time when the file
    /// does not exist.
    pub fn with_cookies(mut self, path: impl Into<PathBuf>) -> Self {
        self.cookies = Some(path.into());
        self
    }

    /// Socket timeout for metadata probes. Downloads run without one.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    fn base_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.stdin(Stdio::null());
        if let Some(cookies) = &self.cookies
            && cookies.exists()
        {
            command.arg("--cookies").arg(cookies);
        }
        command
    }

    fn probe_command(&self, url: &str) -> Command {
        let mut command = self.base_command();
        command
            .arg("--dump-single-json")
            .arg("--skip-download")
            .arg("--no-warnings")
            .arg("--no-playlist")
            .arg("--no-check-certificates")
            .arg("--socket-timeout")
            .arg(self.probe_timeout.as_secs().max(1).to_string())
            .arg("--")
            .arg(url);
        command
    }

    fn fetch_command(&self, url: &str, plan: &FetchPlan, output_template: &Path) -> Command {
        let mut command = self.base_command();
        command
            .arg("--format")
            .arg(&plan.format)
            .arg("--output")
            .arg(output_template)
            .arg("--no-playlist")
            .arg("--no-progress");
        if let Some(container) = &plan.merge_container {
            command.arg("--merge-output-format").arg(container);
        }
        command.arg("--").arg(url);
        command
    }

    fn program_label(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    /// Runs the command on the blocking pool so a minutes-long download never
    /// occupies an async worker.
    async fn run(&self, mut command: Command) -> Result<Output, EngineError> {
        let program = self.program_label();
        let output = tokio::task::spawn_blocking(move || command.output())
            .await
            .map_err(|err| EngineError::Join(err.to_string()))?
            .map_err(|source| EngineError::Launch {
                program: program.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(output)
        } else {
            Err(EngineError::Exit {
                program,
                status: output.status.to_string(),
                detail: last_diagnostic(&output.stderr),
            })
        }
    }
}

#[async_trait]
impl MediaEngine for YtDlpEngine {
    async fn probe(&self, url: &str) -> Result<SourceInfo, EngineError> {
        let output = self.run(self.probe_command(url)).await?;
        Ok(SourceInfo::from_json(&output.stdout)?)
    }

    async fn fetch(
        &self,
        url: &str,
        plan: &FetchPlan,
        output_template: &Path,
    ) -> Result<(), EngineError> {
        debug!(
            url,
            format = %plan.format,
            template = %output_template.display(),
            "starting yt-dlp download"
        );
        let result = self
            .run(self.fetch_command(url, plan, output_template))
            .await;
        match &result {
            Ok(output) => {
                forward_lines(&output.stdout, "stdout");
                forward_lines(&output.stderr, "stderr");
            }
            Err(err) => warn!(url, format = %plan.format, %err, "yt-dlp download failed"),
        }
        result.map(|_| ())
    }
}

fn forward_lines(raw: &[u8], stream: &'static str) {
    for line in String::from_utf8_lossy(raw).lines() {
        let line = line.trim();
        if !line.is_empty() {
            debug!(stream, "[yt-dlp] {line}");
        }
    }
}

/// Picks the most useful line of yt-dlp's stderr: the last `ERROR:` line if
/// there is one, otherwise the last non-empty line.
fn last_diagnostic(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    lines
        .iter()
        .rev()
        .find(|line| line.starts_with("ERROR"))
        .or_else(|| lines.last())
        .map(|line| line.to_string())
        .unwrap_or_else(|| "no diagnostic output".to_string())
}
