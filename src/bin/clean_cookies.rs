#![forbid(unsafe_code)]

//! Strips a browser-exported cookie jar down to the cookies yt-dlp needs.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use fetchtube::{
    config::{SettingsOverrides, resolve_settings},
    cookies::{DEFAULT_COOKIE_DOMAIN, clean_cookie_file},
    logging::{DEFAULT_LOG_LEVEL, init_logging},
};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "clean_cookies", about = "Keep only one site's cookies in a Netscape cookie jar")]
struct CleanCookiesArgs {
    /// Jar to rewrite. Defaults to the configured COOKIES_FILE.
    #[arg(long)]
    input: Option<PathBuf>,
    #[arg(long, default_value = DEFAULT_COOKIE_DOMAIN)]
    domain: String,
    #[arg(long)]
    env_file: Option<PathBuf>,
}

impl CleanCookiesArgs {
    fn jar_path(self) -> Result<(PathBuf, String)> {
        let path = match self.input {
            Some(path) => path,
            None => {
                resolve_settings(SettingsOverrides {
                    env_path: self.env_file,
                    ..SettingsOverrides::default()
                })?
                .cookies_file
            }
        };
        Ok((path, self.domain))
    }
}

fn main() -> Result<()> {
    init_logging(DEFAULT_LOG_LEVEL, None)?;
    let (path, domain) = CleanCookiesArgs::parse().jar_path()?;

    let stats = clean_cookie_file(&path, &domain)?;
    info!(
        path = %path.display(),
        domain = %domain,
        kept = stats.kept,
        dropped = stats.dropped,
        "cookie jar cleaned"
    );
    Ok(())
}
