//! Remote hosting API (GitHub REST v3).
//!
//! [`HostingApi`] is the seam the identity resolver and orchestrator talk to;
//! [`GithubClient`] is the reqwest-backed implementation.


use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::cancel;
use crate::error::{CensusError, Result};
use crate::reqwest_simd_json::{ResponseSimdJsonExt, parse_json_bytes};
use crate::types::RepoSlug;

const GITHUB_ACCEPT: &str = "application/vnd.github+json";
const CLIENT_USER_AGENT: &str = concat!("commitcensus/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserCandidate {
    pub login: String,
    pub profile_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryInfo {
    pub description: Option<String>,
    /// Size reported by the host, in kilobytes.
    pub size_kb: u64,
    pub stargazers: u64,
}

#[async_trait]
pub trait HostingApi: Send + Sync {
    /// Profile URL of the author of `sha`, when the host linked one.
    async fn commit_author(
        &self,
        slug: &RepoSlug,
        sha: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>>;

    /// Users matching `query`, in the host's ranked order.
    async fn search_users(
        &self,
        query: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<UserCandidate>>;

    /// Display name of `login`, if set.
    async fn user_display_name(
        &self,
        login: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>>;

    async fn repository(
        &self,
        slug: &RepoSlug,
        cancel: &CancellationToken,
    ) -> Result<Option<RepositoryInfo>>;

    /// The owner's most-starred repositories.
    async fn top_repositories(
        &self,
        owner: &str,
        count: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<RepoSlug>>;
}

impl std::fmt::Debug for dyn HostingApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn HostingApi")
    }
}

/// Backoff schedule for "202 Accepted, still computing" responses.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(16),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    api_url: String,
    token: Option<String>,
    retry: RetryPolicy,
}

impl GithubClient {
    pub fn new(api_url: &str, token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            token,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn url(&self, path: &str) -> Result<Url> {
        Url::parse(&format!("{}{}", self.api_url, path))
            .map_err(|e| CensusError::Validation(format!("invalid API URL for {path}: {e}")))
    }

    /// GET `url` and decode the body.
    ///
    /// 404 and 422 map to `Ok(None)`. 202 is retried with exponential backoff
    /// up to `max_attempts`, after which a timeout error is returned.
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        cancel: &CancellationToken,
    ) -> Result<Option<T>> {
        for attempt in 0..self.retry.max_attempts {
            let mut request = self
                .http
                .get(url.clone())
                .header(ACCEPT, GITHUB_ACCEPT)
                .header(USER_AGENT, CLIENT_USER_AGENT);
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }

            let response = cancel::or_cancel(cancel, request.send()).await??;
            let status = response.status();

            if status == StatusCode::ACCEPTED {
                if attempt + 1 == self.retry.max_attempts {
                    break;
                }
                let delay = self.retry.delay_for(attempt);
                tracing::debug!(%url, attempt, ?delay, "GitHub is still computing, backing off");
                cancel::sleep(cancel, delay).await?;
                continue;
            }

            if status.is_success() {
                let parsed = cancel::or_cancel(cancel, response.simd_json::<T>()).await??;
                return Ok(Some(parsed));
            }

            if status == StatusCode::NOT_FOUND || status == StatusCode::UNPROCESSABLE_ENTITY {
                return Ok(None);
            }

            let body = cancel::or_cancel(cancel, response.bytes())
                .await?
                .map(|b| b.to_vec())
                .unwrap_or_default();
            let message = extract_api_message(body)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());
            return Err(CensusError::upstream(format!(
                "{} returned {}: {}",
                url.path(),
                status.as_u16(),
                message
            )));
        }

        Err(CensusError::upstream(format!(
            "GitHub is still preparing {}; try again in a minute",
            url.path()
        )))
    }
}

/// GitHub error bodies look like `{"message": "..."}`.
fn extract_api_message(body: Vec<u8>) -> Option<String> {
    #[derive(Deserialize)]
    struct ApiError {
        message: String,
    }
    if !body.iter().find(|b| !b.is_ascii_whitespace()).is_some_and(|b| *b == b'{') {
        return None;
    }
    parse_json_bytes::<ApiError>(body)
        .ok()
        .map(|e| e.message)
}

// =============================================================================
// Response shapes
// =============================================================================

#[derive(Deserialize)]
struct CommitResponse {
    author: Option<AccountRef>,
}

#[derive(Deserialize)]
struct AccountRef {
    login: String,
    html_url: String,
}

#[derive(Deserialize)]
struct SearchResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Deserialize)]
struct UserResponse {
    name: Option<String>,
}

#[derive(Deserialize)]
struct RepoResponse {
    description: Option<String>,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    stargazers_count: u64,
}

#[derive(Deserialize)]
struct RepoSearchItem {
    full_name: String,
}

#[async_trait]
impl HostingApi for GithubClient {
    async fn commit_author(
        &self,
        slug: &RepoSlug,
        sha: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let url = self.url(&format!("/repos/{}/{}/commits/{}", slug.owner, slug.name, sha))?;
        let commit: Option<CommitResponse> = self.get_json(url, cancel).await?;
        Ok(commit
            .and_then(|c| c.author)
            .filter(|author| !author.login.is_empty())
            .map(|author| author.html_url))
    }

    async fn search_users(
        &self,
        query: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<UserCandidate>> {
        let mut url = self.url("/search/users")?;
        url.query_pairs_mut()
            .append_pair("q", &format!("{query} in:name"))
            .append_pair("per_page", &limit.max(1).to_string());
        let response: Option<SearchResponse<AccountRef>> = self.get_json(url, cancel).await?;
        Ok(response
            .map(|r| r.items)
            .unwrap_or_default()
            .into_iter()
            .take(limit)
            .map(|item| UserCandidate {
                login: item.login,
                profile_url: item.html_url,
            })
            .collect())
    }

    async fn user_display_name(
        &self,
        login: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let url = self.url(&format!("/users/{login}"))?;
        let user: Option<UserResponse> = self.get_json(url, cancel).await?;
        Ok(user
            .and_then(|u| u.name)
            .filter(|name| !name.trim().is_empty()))
    }

    async fn repository(
        &self,
        slug: &RepoSlug,
        cancel: &CancellationToken,
    ) -> Result<Option<RepositoryInfo>> {
        let url = self.url(&format!("/repos/{}/{}", slug.owner, slug.name))?;
        let repo: Option<RepoResponse> = self.get_json(url, cancel).await?;
        Ok(repo.map(|r| RepositoryInfo {
            description: r.description.filter(|d| !d.trim().is_empty()),
            size_kb: r.size,
            stargazers: r.stargazers_count,
        }))
    }

    async fn top_repositories(
        &self,
        owner: &str,
        count: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<RepoSlug>> {
        let mut url = self.url("/search/repositories")?;
        url.query_pairs_mut()
            .append_pair("q", &format!("user:{owner} fork:false"))
            .append_pair("sort", "stars")
            .append_pair("order", "desc")
            .append_pair("per_page", &count.clamp(1, 100).to_string());
        let response: Option<SearchResponse<RepoSearchItem>> = self.get_json(url, cancel).await?;
        Ok(response
            .map(|r| r.items)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|item| item.full_name.parse::<RepoSlug>().ok())
            .take(count)
            .collect())
    }
}
