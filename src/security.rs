//! Input validation applied before anything reaches a subprocess argument list
//! or an outbound URL.

use regex::Regex;
use reqwest::Url;

use crate::error::{Error, Result};

const MAX_NAME_LEN: usize = 214;
const MAX_BRANCH_LEN: usize = 255;

/// Validate package specs such as `lodash`, `@types/node` or `react@^18.2.0`.
///
/// Names starting with `-` are rejected so a spec can never be read as a CLI flag.
pub fn validate_package_names(names: &[String]) -> Result<()> {
    let spec_re = Regex::new(
        r"^(@[a-z0-9][a-z0-9._~-]*/)?[a-z0-9][a-z0-9._~-]*(@[A-Za-z0-9.^~<>=*|+_ -]+)?$",
    )
    .map_err(|e| Error::Validation(e.to_string()))?;

    for name in names {
        if name.is_empty() {
            return Err(Error::Validation("package name is empty".into()));
        }
        if name.starts_with('-') {
            return Err(Error::Validation(format!(
                "package name `{name}` looks like a flag"
            )));
        }
        let bare_len = name
            .rfind('@')
            .filter(|&i| i > 0)
            .map_or(name.len(), |i| i);
        if bare_len > MAX_NAME_LEN {
            return Err(Error::Validation(format!("package name `{name}` is too long")));
        }
        if !spec_re.is_match(name) {
            return Err(Error::Validation(format!("invalid package name `{name}`")));
        }
    }
    Ok(())
}

/// Accept only absolute `http`/`https` URLs with a host.
pub fn validate_url(url: &str) -> Result<()> {
    let parsed = Url::parse(url).map_err(|e| Error::Validation(format!("invalid URL `{url}`: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::Validation(format!(
            "unsupported URL scheme `{}`",
            parsed.scheme()
        )));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(Error::Validation(format!("URL `{url}` has no host")));
    }
    Ok(())
}

/// One owner, group or repository path segment of a hosted git project.
pub fn validate_repo_segment(segment: &str) -> Result<()> {
    let invalid = segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.len() > MAX_BRANCH_LEN
        || !segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

    if invalid {
        return Err(Error::Validation(format!("invalid repository path segment `{segment}`")));
    }
    Ok(())
}

pub fn validate_branch_name(branch: &str) -> Result<()> {
    let invalid = branch.is_empty()
        || branch.len() > MAX_BRANCH_LEN
        || branch.starts_with('-')
        || branch.starts_with('/')
        || branch.ends_with('/')
        || branch.ends_with(".lock")
        || branch.contains("..")
        || !branch
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/'));

    if invalid {
        return Err(Error::Validation(format!("invalid branch name `{branch}`")));
    }
    Ok(())
}
