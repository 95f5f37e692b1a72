//! GitHub adapter over the REST v3 issues API.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::ident::GithubRepo;
use crate::platform::{Category, CreatedItem, NewItem, Platform, RemoteItem, Side};

const PLATFORM: &str = "github";
const DEFAULT_API_BASE: &str = "https://api.github.com";
const PER_PAGE: usize = 100;
/// Hard stop for pagination so a misbehaving Link header cannot loop forever.
const MAX_PAGES: usize = 50;

/// Environment variables checked, in order, for the bearer token.
pub const TOKEN_ENV_VARS: &[&str] = &["GITHUB_PERSONAL_ACCESS_TOKEN", "GITHUB_TOKEN"];

#[derive(Debug, Deserialize)]
struct GithubUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GithubLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GithubIssue {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    user: Option<GithubUser>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    labels: Vec<GithubLabel>,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

impl GithubIssue {
    fn into_remote_item(self) -> Result<RemoteItem> {
        RemoteItem {
            id: self.number.to_string(),
            title: self.title,
            body: self.body.unwrap_or_default(),
            author: self.user.map(|u| u.login).unwrap_or_default(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            url: self.html_url,
            labels: self.labels.into_iter().map(|l| l.name).collect(),
        }
        .validate(PLATFORM)
    }
}

pub struct GithubClient {
    http: reqwest::Client,
    repo: GithubRepo,
    token: String,
    api_base: String,
}

impl GithubClient {
    pub fn new(repo: GithubRepo, token: String, timeout: Duration) -> Result<Self> {
        if token.trim().is_empty() {
            return Err(Error::auth(PLATFORM, "empty GitHub token"));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("radsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            repo,
            token,
            api_base: DEFAULT_API_BASE.to_string(),
        })
    }

    /// Build a client from the first token variable that is set.
    pub fn from_env(repo: GithubRepo, timeout: Duration) -> Result<Self> {
        let token = TOKEN_ENV_VARS
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|t| !t.trim().is_empty()))
            .ok_or_else(|| {
                Error::auth(
                    PLATFORM,
                    format!("no token found; set {}", TOKEN_ENV_VARS.join(" or ")),
                )
            })?;
        Self::new(repo, token, timeout)
    }

    /// Point the client at a GitHub Enterprise API root.
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn issues_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/issues",
            self.api_base, self.repo.owner, self.repo.name
        )
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status.as_u16(), &body))
    }
}

#[async_trait]
impl Platform for GithubClient {
    fn side(&self) -> Side {
        Side::B
    }

    fn name(&self) -> &str {
        PLATFORM
    }

    fn identifier(&self) -> String {
        self.repo.to_string()
    }

    async fn list_items(
        &self,
        category: Category,
        limit: Option<usize>,
    ) -> Result<Vec<RemoteItem>> {
        if category == Category::Patches {
            return Err(Error::not_supported(PLATFORM, "pull request listing"));
        }

        let per_page = limit.map(|l| l.clamp(1, PER_PAGE)).unwrap_or(PER_PAGE);
        let mut url = format!(
            "{}?state=all&per_page={per_page}&sort=created&direction=asc",
            self.issues_url()
        );
        let mut items = Vec::new();

        for _ in 0..MAX_PAGES {
            let response = self.send(self.request(reqwest::Method::GET, &url)).await?;
            let next = response
                .headers()
                .get(reqwest::header::LINK)
                .and_then(|v| v.to_str().ok())
                .and_then(next_page_url);
            let page: Vec<GithubIssue> = response
                .json()
                .await
                .map_err(|e| Error::unavailable(PLATFORM, format!("malformed issue list: {e}")))?;

            for issue in page {
                // The issues endpoint also returns pull requests.
                if issue.pull_request.is_some() {
                    continue;
                }
                items.push(issue.into_remote_item()?);
                if limit.is_some_and(|l| items.len() >= l) {
                    return Ok(items);
                }
            }

            match next {
                Some(next) => url = next,
                None => break,
            }
        }

        log::debug!("Listed {} GitHub issues for {}", items.len(), self.repo);
        Ok(items)
    }

    async fn create_item(&self, category: Category, item: &NewItem) -> Result<CreatedItem> {
        if category == Category::Patches {
            return Err(Error::not_supported(
                PLATFORM,
                "pull request creation (requires branch management)",
            ));
        }
        let payload = serde_json::json!({
            "title": item.title,
            "body": item.body,
            "labels": item.labels,
        });
        let response = self
            .send(self.request(reqwest::Method::POST, &self.issues_url()).json(&payload))
            .await?;
        let issue: GithubIssue = response
            .json()
            .await
            .map_err(|e| Error::unavailable(PLATFORM, format!("malformed create response: {e}")))?;
        Ok(CreatedItem {
            id: issue.number.to_string(),
            url: issue.html_url,
            updated_at: issue.updated_at,
        })
    }
}

fn transport_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::unavailable(PLATFORM, format!("request timed out: {e}"))
    } else {
        Error::unavailable(PLATFORM, e.to_string())
    }
}

/// Map an HTTP error status onto the error taxonomy.
pub fn classify_status(status: u16, body: &str) -> Error {
    let message = format!("HTTP {status}: {}", summarize_body(body));
    match status {
        401 => Error::auth(PLATFORM, message),
        // 403 doubles as the secondary rate limit response.
        403 if body.to_lowercase().contains("rate limit") => Error::unavailable(PLATFORM, message),
        403 => Error::auth(PLATFORM, message),
        429 => Error::unavailable(PLATFORM, message),
        400 | 404 | 410 | 422 => Error::validation(PLATFORM, message),
        s if s >= 500 => Error::unavailable(PLATFORM, message),
        _ => Error::validation(PLATFORM, message),
    }
}

fn summarize_body(body: &str) -> String {
    #[derive(Deserialize)]
    struct ApiError {
        message: String,
    }
    match serde_json::from_str::<ApiError>(body) {
        Ok(err) => err.message,
        Err(_) => body.chars().take(200).collect(),
    }
}

/// Extract the `rel="next"` target from a GitHub `Link` header.
pub fn next_page_url(link: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r#"<([^>]+)>;\s*rel="next""#).unwrap());
    re.captures(link).map(|caps| caps[1].to_string())
}
