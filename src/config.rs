//! Resolved settings for one sync target, and construction of the two
//! platform adapters from them.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::ident::{parse_github_repo, parse_rid, GithubRepo};
use crate::platform::github::GithubClient;
use crate::platform::radicle::RadicleClient;
use crate::store::default_store_path;

/// Per-call timeout for adapter requests when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct Settings {
    pub github: GithubRepo,
    /// Radicle repository id; when absent it is resolved with `rad inspect`
    /// in the checkout or the working directory.
    pub rid: Option<String>,
    /// Local Radicle checkout to run `rad` in.
    pub rad_path: Option<PathBuf>,
    /// Explicit GitHub token; falls back to the token environment variables.
    pub token: Option<String>,
    /// GitHub API root, for GitHub Enterprise.
    pub github_api: Option<String>,
    pub store_path: Option<PathBuf>,
    pub timeout: Duration,
}

impl Settings {
    /// Parse and validate user-supplied identifiers.
    pub fn new(github: &str, rid: Option<&str>) -> Result<Self> {
        let github = parse_github_repo(github)?;
        let rid = rid.map(parse_rid).transpose()?;
        Ok(Self {
            github,
            rid,
            rad_path: None,
            token: None,
            github_api: None,
            store_path: None,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_rad_path(mut self, path: Option<PathBuf>) -> Result<Self> {
        if let Some(path) = &path {
            if !path.is_dir() {
                return Err(Error::Config(format!(
                    "Radicle checkout {} is not a directory",
                    path.display()
                )));
            }
        }
        self.rad_path = path;
        Ok(self)
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn with_store_path(mut self, path: Option<PathBuf>) -> Self {
        self.store_path = path;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Explicit store path, or `~/.radsync/<owner>-<repo>.json`.
    pub fn store_path(&self) -> Result<PathBuf> {
        match &self.store_path {
            Some(path) => Ok(path.clone()),
            None => default_store_path(&self.github.slug()),
        }
    }

    pub async fn radicle_client(&self) -> Result<RadicleClient> {
        RadicleClient::connect(self.rid.clone(), self.rad_path.clone(), self.timeout).await
    }

    pub fn github_client(&self) -> Result<GithubClient> {
        let client = match &self.token {
            Some(token) => GithubClient::new(self.github.clone(), token.clone(), self.timeout)?,
            None => GithubClient::from_env(self.github.clone(), self.timeout)?,
        };
        Ok(match &self.github_api {
            Some(api) => client.with_api_base(api),
            None => client,
        })
    }
}
