//! Maintenance of the Netscape cookie jar yt-dlp authenticates with.
//!
//! Browser exports usually contain cookies for every site the user visited.
//! Only the target site's cookies are needed, so the jar is rewritten to keep
//! header comments plus cookies whose domain is the site or one of its
//! subdomains. The running server never touches the jar; this is a one-off
//! step run through the `clean_cookies` binary.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

pub const DEFAULT_COOKIE_DOMAIN: &str = "youtube.com";
/// curl/yt-dlp prefix marking HttpOnly cookies. Such lines start with `#` but
/// are cookies, not comments.
const HTTP_ONLY_PREFIX: &str = "#HttpOnly_";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CookieStats {
    pub kept: usize,
    pub dropped: usize,
}

/// Returns the filtered jar and how many cookie lines were kept or dropped.
pub fn filter_cookie_jar(contents: &str, domain: &str) -> (String, CookieStats) {
    let domain = domain.trim().trim_start_matches('.').to_ascii_lowercase();
    let mut stats = CookieStats::default();
    let mut output = String::with_capacity(contents.len());

    for line in contents.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.starts_with('#') && !trimmed.starts_with(HTTP_ONLY_PREFIX) {
            output.push_str(line);
            output.push('\n');
            continue;
        }

        let cookie_domain = trimmed
            .trim_start_matches(HTTP_ONLY_PREFIX)
            .split('\t')
            .next()
            .unwrap_or_default();
        if domain_matches(cookie_domain, &domain) {
            stats.kept += 1;
            output.push_str(line);
            output.push('\n');
        } else {
            stats.dropped += 1;
        }
    }

    (output, stats)
}

fn domain_matches(cookie_domain: &str, domain: &str) -> bool {
    let cookie_domain = cookie_domain.trim().trim_start_matches('.').to_ascii_lowercase();
    cookie_domain == domain
        || cookie_domain
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

/// Filters the jar at `path` in place. The new content is written to a
/// sibling temp file first and renamed over the original.
pub fn clean_cookie_file(path: &Path, domain: &str) -> Result<CookieStats> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let (filtered, stats) = filter_cookie_jar(&contents, domain);

    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, filtered).with_context(|| format!("writing {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("replacing {} with {}", path.display(), tmp_path.display()))?;
    Ok(stats)
}
