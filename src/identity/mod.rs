//! Contributor identity resolution.
//!
//! Maps a `(email, display name)` pair from the commit log to a canonical
//! profile URL on the hosting site. Lookups go, in order:
//!
//! 1. reserved no-reply email patterns (no I/O),
//! 2. the email cache, then the name cache (negative hits count),
//! 3. a commit by that author in the local clone, looked up on the API,
//! 4. a user search by display name.
//!
//! Whatever steps 3 and 4 produce, including "nothing", is written to both
//! caches. Cancellation is the only error that escapes [`IdentityResolver::resolve`].


use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use crate::error::Result;
use crate::git::{self, GitRunner};
use crate::github::HostingApi;
use crate::persistent_cache::PersistentCache;
use crate::progress::Progress;
use crate::types::RepoSlug;

pub const DEFAULT_CANDIDATE_LIMIT: usize = 3;

/// Cached value: profile URL, or `None` for a remembered miss.
pub type ProfileCache = PersistentCache<Option<String>>;

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// NFD-decompose, drop combining marks and non-alphanumerics, lowercase.
pub fn normalize_name(name: &str) -> String {
    name.nfd()
        .filter(|c| !is_combining_mark(*c))
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Derive a profile URL from an email the hosting site reserves for its users:
/// `login@users.noreply.<host>`, `<id>+login@users.noreply.<host>` or
/// `login@<host>`.
pub fn profile_from_reserved_email(email: &str, web_host: &str, web_url: &str) -> Option<String> {
    let email = normalize_email(email);
    let (local, domain) = email.rsplit_once('@')?;

    let login = if domain.strip_prefix("users.noreply.") == Some(web_host) {
        local.split_once('+').map_or(local, |(_, login)| login)
    } else if domain == web_host {
        local
    } else {
        return None;
    };

    if !is_valid_login(login) || matches!(login, "noreply" | "no-reply") {
        return None;
    }
    Some(format!("{}/{}", web_url.trim_end_matches('/'), login))
}

fn is_valid_login(login: &str) -> bool {
    !login.is_empty()
        && !login.starts_with('-')
        && login
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Exact match or containment either way, on normalized forms.
fn names_match(candidate: &str, target: &str) -> bool {
    !candidate.is_empty()
        && !target.is_empty()
        && (candidate == target || candidate.contains(target) || target.contains(candidate))
}

/// Per-request state threaded into [`IdentityResolver::resolve`].
#[derive(Clone, Copy)]
pub struct LookupContext<'a> {
    pub slug: &'a RepoSlug,
    /// Local clone to search for the author's commits; `None` skips that step.
    pub repo: Option<&'a Path>,
    pub progress: &'a Progress,
    pub cancel: &'a CancellationToken,
}

#[derive(Clone)]
pub struct IdentityResolver {
    api: Arc<dyn HostingApi>,
    runner: GitRunner,
    email_cache: ProfileCache,
    name_cache: ProfileCache,
    web_url: String,
    web_host: String,
    lookups_enabled: bool,
    candidate_limit: usize,
}

impl std::fmt::Debug for IdentityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityResolver")
            .field("web_host", &self.web_host)
            .field("lookups_enabled", &self.lookups_enabled)
            .finish_non_exhaustive()
    }
}

impl IdentityResolver {
    pub fn new(
        api: Arc<dyn HostingApi>,
        runner: GitRunner,
        email_cache: ProfileCache,
        name_cache: ProfileCache,
        web_url: &str,
        web_host: &str,
    ) -> Self {
        Self {
            api,
            runner,
            email_cache,
            name_cache,
            web_url: web_url.trim_end_matches('/').to_string(),
            web_host: web_host.to_lowercase(),
            lookups_enabled: true,
            candidate_limit: DEFAULT_CANDIDATE_LIMIT,
        }
    }

    /// Restrict resolution to patterns and caches.
    pub fn with_lookups(mut self, enabled: bool) -> Self {
        self.lookups_enabled = enabled;
        self
    }

    pub fn reserved_profile(&self, email: &str) -> Option<String> {
        profile_from_reserved_email(email, &self.web_host, &self.web_url)
    }

    /// Pattern and cache lookup only; never touches git or the network.
    pub async fn cached_profile(&self, email: &str, name: &str) -> Option<String> {
        if let Some(url) = self.reserved_profile(email) {
            return Some(url);
        }
        self.cache_hit(email, name).await.flatten()
    }

    /// `Some(hit)` when either cache holds an entry; the hit itself may be a
    /// remembered miss.
    async fn cache_hit(&self, email: &str, name: &str) -> Option<Option<String>> {
        let email_key = normalize_email(email);
        if !email_key.is_empty()
            && let Some(value) = self.email_cache.get_value(&email_key).await
        {
            return Some(value);
        }
        let name_key = normalize_name(name);
        if !name_key.is_empty()
            && let Some(value) = self.name_cache.get_value(&name_key).await
        {
            return Some(value);
        }
        None
    }

    pub async fn resolve(
        &self,
        email: &str,
        name: &str,
        ctx: LookupContext<'_>,
    ) -> Result<Option<String>> {
        if let Some(url) = self.reserved_profile(email) {
            return Ok(Some(url));
        }
        if let Some(hit) = self.cache_hit(email, name).await {
            tracing::debug!(email, name, hit = ?hit, "identity cache hit");
            return Ok(hit);
        }
        if !self.lookups_enabled {
            return Ok(None);
        }

        let resolved = self.lookup(email, name, ctx).await?;
        self.remember(email, name, resolved.clone()).await;
        Ok(resolved)
    }

    async fn remember(&self, email: &str, name: &str, value: Option<String>) {
        let email_key = normalize_email(email);
        if !email_key.is_empty()
            && let Err(e) = self.email_cache.set(&email_key, value.clone()).await
        {
            tracing::warn!("failed to persist identity cache: {e}");
        }
        let name_key = normalize_name(name);
        if !name_key.is_empty()
            && let Err(e) = self.name_cache.set(&name_key, value).await
        {
            tracing::warn!("failed to persist identity cache: {e}");
        }
    }

    async fn lookup(&self, email: &str, name: &str, ctx: LookupContext<'_>) -> Result<Option<String>> {
        match self.lookup_by_commit(email, ctx).await {
            Ok(Some(url)) => return Ok(Some(url)),
            Ok(None) => {}
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => tracing::warn!(email, "commit-based identity lookup failed: {e}"),
        }

        match self.lookup_by_search(name, ctx.cancel).await {
            Ok(found) => Ok(found),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                tracing::warn!(name, "user search failed: {e}");
                Ok(None)
            }
        }
    }

    async fn lookup_by_commit(&self, email: &str, ctx: LookupContext<'_>) -> Result<Option<String>> {
        let email = email.trim();
        let Some(repo) = ctx.repo else {
            return Ok(None);
        };
        if email.is_empty() {
            return Ok(None);
        }

        let Some(sha) =
            git::find_commit_by_author(&self.runner, repo, email, ctx.progress, ctx.cancel).await?
        else {
            return Ok(None);
        };
        self.api.commit_author(ctx.slug, &sha, ctx.cancel).await
    }

    async fn lookup_by_search(&self, name: &str, cancel: &CancellationToken) -> Result<Option<String>> {
        let target = normalize_name(name);
        if target.is_empty() {
            return Ok(None);
        }

        let candidates = self
            .api
            .search_users(name.trim(), self.candidate_limit, cancel)
            .await?;

        for candidate in candidates.iter().take(self.candidate_limit) {
            if names_match(&normalize_name(&candidate.login), &target) {
                return Ok(Some(candidate.profile_url.clone()));
            }
            let display = match self.api.user_display_name(&candidate.login, cancel).await {
                Ok(display) => display,
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    tracing::debug!(login = %candidate.login, "user detail lookup failed: {e}");
                    None
                }
            };
            if display.is_some_and(|d| names_match(&normalize_name(&d), &target)) {
                return Ok(Some(candidate.profile_url.clone()));
            }
        }

        // Best guess when nothing matched by name.
        Ok(candidates.into_iter().next().map(|c| c.profile_url))
    }
}
