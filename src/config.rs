#![forbid(unsafe_code)]

//! Runtime settings. Each value is looked up in order: explicit override
//! (command line), process environment, `.env` file, built-in default.

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_DOWNLOADS_DIR: &str = "downloads";
pub const DEFAULT_COOKIES_FILE: &str = "youtube.com_cookies.txt";
pub const DEFAULT_ERROR_LOG: &str = "yt_error.log";
pub const DEFAULT_CLEANUP_DELAY_SECS: u64 = 5;
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_YTDLP_BIN: &str = "yt-dlp";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub downloads_dir: PathBuf,
    pub cookies_file: PathBuf,
    pub error_log: PathBuf,
    pub cleanup_delay: Duration,
    pub probe_timeout: Duration,
    pub ytdlp_bin: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub downloads_dir: Option<PathBuf>,
    pub cookies_file: Option<PathBuf>,
    pub error_log: Option<PathBuf>,
    pub cleanup_delay_secs: Option<u64>,
    pub ytdlp_bin: Option<PathBuf>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_settings(overrides: SettingsOverrides) -> Result<Settings> {
    let env_path = overrides
        .env_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(&env_path)?;
    Ok(build_settings(&file_vars, env_var_string, overrides))
}

fn build_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: SettingsOverrides,
) -> Settings {
    let lookup = |key: &str| env_lookup(key).or_else(|| file_vars.get(key).cloned());
    let path_or = |value: Option<PathBuf>, key: &str, default: &str| {
        value
            .or_else(|| lookup(key).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(default))
    };
    let number_or = |value: Option<u64>, key: &str, default: u64| {
        value
            .or_else(|| lookup(key).and_then(|raw| raw.parse::<u64>().ok()))
            .unwrap_or(default)
    };

    let host = non_blank(overrides.host)
        .or_else(|| non_blank(lookup("FETCHTUBE_HOST")))
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = overrides
        .port
        .or_else(|| lookup("FETCHTUBE_PORT").and_then(|raw| raw.parse::<u16>().ok()))
        .unwrap_or(DEFAULT_PORT);

    Settings {
        host,
        port,
        downloads_dir: path_or(overrides.downloads_dir, "DOWNLOADS_DIR", DEFAULT_DOWNLOADS_DIR),
        cookies_file: path_or(overrides.cookies_file, "COOKIES_FILE", DEFAULT_COOKIES_FILE),
        error_log: path_or(overrides.error_log, "ERROR_LOG", DEFAULT_ERROR_LOG),
        cleanup_delay: Duration::from_secs(number_or(
            overrides.cleanup_delay_secs,
            "CLEANUP_DELAY_SECS",
            DEFAULT_CLEANUP_DELAY_SECS,
        )),
        probe_timeout: Duration::from_secs(number_or(
            None,
            "PROBE_TIMEOUT_SECS",
            DEFAULT_PROBE_TIMEOUT_SECS,
        )),
        ytdlp_bin: path_or(overrides.ytdlp_bin, "YTDLP_BIN", DEFAULT_YTDLP_BIN),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_var_string(key: &str) -> Option<String> {
    non_blank(env::var(key).ok())
}

/// Reads `KEY=value` pairs. A missing file is the same as an empty one.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(content.lines().filter_map(parse_env_line).collect())
}

/// Parses one `.env` line, accepting an `export ` prefix and single or
/// double quotes. Comments, blank values and lines without `=` yield `None`.
fn parse_env_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("export ").unwrap_or(line);
    let (key, raw) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    let raw = raw.trim();
    let value = ['"', '\'']
        .iter()
        .find_map(|quote| raw.strip_prefix(*quote)?.strip_suffix(*quote))
        .unwrap_or(raw)
        .trim();
    if value.is_empty() {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}
