use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A GitHub repository, `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GithubRepo {
    pub owner: String,
    pub name: String,
}

impl fmt::Display for GithubRepo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for GithubRepo {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_github_repo(s)
    }
}

impl GithubRepo {
    /// File-name friendly form, used for the default store path.
    pub fn slug(&self) -> String {
        format!("{}-{}", self.owner, self.name)
    }
}

/// Parse a GitHub repository reference.
///
/// Supported forms:
/// - `owner/repo`
/// - `https://github.com/owner/repo` (optionally with `.git` or trailing path)
/// - `git@github.com:owner/repo.git`
pub fn parse_github_repo(input: &str) -> Result<GithubRepo> {
    let input = input.trim();

    if let Some(rest) = input.strip_prefix("git@github.com:") {
        return split_owner_repo(input, rest);
    }

    if input.contains("://") {
        let url = url::Url::parse(input)
            .map_err(|e| Error::InvalidIdentifier(format!("{input}: {e}")))?;
        let host = url.host_str().unwrap_or("");
        if host != "github.com" && host != "www.github.com" {
            return Err(Error::InvalidIdentifier(format!(
                "not a GitHub URL: {input}"
            )));
        }
        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();
        if segments.len() < 2 {
            return Err(Error::InvalidIdentifier(format!(
                "missing owner or repository in URL: {input}"
            )));
        }
        return split_owner_repo(input, &format!("{}/{}", segments[0], segments[1]));
    }

    split_owner_repo(input, input)
}

fn split_owner_repo(input: &str, path: &str) -> Result<GithubRepo> {
    let path = path.trim_end_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    let mut parts = path.split('/');
    let (Some(owner), Some(name), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(Error::InvalidIdentifier(format!(
            "expected owner/repo, got: {input}"
        )));
    };
    if !is_github_name(owner) || !is_github_name(name) {
        return Err(Error::InvalidIdentifier(format!(
            "invalid characters in repository: {input}"
        )));
    }
    Ok(GithubRepo {
        owner: owner.to_string(),
        name: name.to_string(),
    })
}

fn is_github_name(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Normalize a Radicle repository id to its `rad:z…` form.
///
/// Accepts `rad:z…`, a bare `z…`, or a `rad://z…` URL. The id body must be
/// base58 (no `0`, `O`, `I`, `l`).
pub fn parse_rid(input: &str) -> Result<String> {
    let input = input.trim();
    let body = input
        .strip_prefix("rad://")
        .or_else(|| input.strip_prefix("rad:"))
        .unwrap_or(input);
    let body = body.split('/').next().unwrap_or("");

    if !body.starts_with('z') || body.len() < 10 || !body.chars().all(is_base58) {
        return Err(Error::InvalidIdentifier(format!(
            "not a Radicle repository id: {input}"
        )));
    }
    Ok(format!("rad:{body}"))
}

fn is_base58(c: char) -> bool {
    c.is_ascii_alphanumeric() && !matches!(c, '0' | 'O' | 'I' | 'l')
}
