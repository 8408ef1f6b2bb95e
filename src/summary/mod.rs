//! Contribution summaries: the public entry point of the pipeline.
//!
//! A request moves through `validating -> syncing -> windowing ->
//! (cache reuse | aggregating) -> resolving identities -> persisting`, and can
//! be cancelled from any of those states. Completed summaries are cached by
//! `(slug, limit)`; when the interval and the first and last commit timestamps
//! still match, every period but the last is replayed from the cache (below-cut
//! rows included) and only the tail is recomputed.


use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::aggregate::{self, SeriesBuilder, ShortlogEntry};
use crate::cancel;
use crate::config::Config;
use crate::error::{CensusError, Result};
use crate::git::{self, GitRunner};
use crate::github::{GithubClient, HostingApi};
use crate::identity::{IdentityResolver, LookupContext};
use crate::persistent_cache::{CacheOptions, PersistentCache, ensure_state_dir};
use crate::progress::{Progress, ProgressCallback};
use crate::sync::RepositorySynchronizer;
use crate::types::{PeriodContributor, PeriodRecord, RepoContributionSummary, RepoSlug};

pub const IDENTITY_EMAIL_CACHE_FILE: &str = "identity-emails.json";
pub const IDENTITY_NAME_CACHE_FILE: &str = "identity-names.json";
pub const SUMMARY_CACHE_FILE: &str = "summaries.json";

/// Progress events are emitted roughly this many times per aggregation.
const PROGRESS_STEPS: usize = 10;

pub fn summary_cache_key(slug: &RepoSlug, limit: usize) -> String {
    format!("{slug}#{limit}")
}

#[derive(Clone, Default)]
pub struct CollectOptions {
    pub on_progress: Option<ProgressCallback>,
    pub cancel: CancellationToken,
}

impl std::fmt::Debug for CollectOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectOptions")
            .field("on_progress", &self.on_progress.is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ContributionService {
    api: Arc<dyn HostingApi>,
    runner: GitRunner,
    sync: RepositorySynchronizer,
    resolver: IdentityResolver,
    summaries: PersistentCache<RepoContributionSummary>,
}

impl ContributionService {
    pub fn new(config: &Config) -> Result<Self> {
        let api = GithubClient::new(&config.github.api_url, config.github_token())?;
        Self::with_api(config, Arc::new(api))
    }

    /// Build the service around an arbitrary hosting API implementation.
    pub fn with_api(config: &Config, api: Arc<dyn HostingApi>) -> Result<Self> {
        let cache_dir = config.cache_dir();
        let options = |max_age, max_entries| CacheOptions {
            max_age: Some(max_age),
            max_entries: Some(max_entries),
            prune_interval: Some(config.prune_interval()),
            directory: cache_dir.clone(),
        };
        let identity_options =
            options(config.identity_ttl(), config.cache.identity_max_entries);
        let summary_options = options(config.summary_ttl(), config.cache.summary_max_entries);

        let runner = GitRunner::new(config.kill_grace());
        let repos_root = match config.repos_dir() {
            Some(dir) => dir,
            None => ensure_state_dir(cache_dir.as_deref())?.join("repos"),
        };

        let resolver = IdentityResolver::new(
            api.clone(),
            runner.clone(),
            PersistentCache::open(IDENTITY_EMAIL_CACHE_FILE, identity_options.clone()),
            PersistentCache::open(IDENTITY_NAME_CACHE_FILE, identity_options),
            &config.github.web_url,
            &config.web_host(),
        )
        .with_lookups(config.aggregation.resolve_identities);

        Ok(Self {
            api,
            sync: RepositorySynchronizer::new(runner.clone(), repos_root, config.remote_base()),
            runner,
            resolver,
            summaries: PersistentCache::open(SUMMARY_CACHE_FILE, summary_options),
        })
    }

    pub fn summary_cache(&self) -> &PersistentCache<RepoContributionSummary> {
        &self.summaries
    }

    pub fn repos_root(&self) -> &Path {
        self.sync.root()
    }

    /// Sync `slug`, aggregate its history into per-period top-`limit`
    /// contributor tables plus series, and cache the result.
    pub async fn collect_contribution_summary(
        &self,
        slug: &str,
        limit: usize,
        options: CollectOptions,
    ) -> Result<RepoContributionSummary> {
        if limit == 0 {
            return Err(CensusError::Validation(
                "limit must be a positive integer".to_string(),
            ));
        }
        let slug: RepoSlug = slug.parse()?;
        let progress = Progress::from_option(options.on_progress);
        let cancel = &options.cancel;
        cancel::check(cancel)?;

        progress.status(format!("Syncing {slug}"));
        let repo = self.sync.ensure(&slug, &progress, cancel).await?;

        progress.status("Determining commit window");
        let window = aggregate::detect_window(&self.runner, &repo, &progress, cancel).await?;
        let interval = window.interval();
        let periods = aggregate::build_periods(&window, interval);
        let Some(last_period) = periods.last() else {
            return Err(CensusError::Window("no periods in commit window".to_string()));
        };
        tracing::debug!(%slug, %interval, periods = periods.len(), "commit window");

        let key = summary_cache_key(&slug, limit);
        let labels: Vec<String> = periods.iter().map(|p| p.label.clone()).collect();
        let mut builder = SeriesBuilder::new(labels);
        let mut records: Vec<PeriodRecord> = Vec::with_capacity(periods.len());

        if let Some(cached) = self.summaries.get_value(&key).await.filter(|cached| {
            cached.interval == interval
                && cached.start_date == window.first
                && cached.end_date == window.last
                && cached.periods.len() == periods.len()
        }) {
            let reuse = periods.len() - 1;
            records.extend(cached.periods.into_iter().take(reuse));
            for record in &mut records {
                for row in record.below_cut.iter_mut().filter(|r| r.profile_url.is_none()) {
                    let email = row.email.as_deref().unwrap_or_default();
                    row.profile_url = self.resolver.cached_profile(email, &row.author).await;
                }
                builder.replay(record);
            }
            progress.status(format!(
                "Reusing {reuse} cached period(s); refreshing {}",
                last_period.label
            ));
        } else {
            progress.status(format!("Aggregating {} {interval} period(s)", periods.len()));
        }

        let total = periods.len();
        let stride = total.div_ceil(PROGRESS_STEPS).max(1);
        for (index, period) in periods.iter().enumerate().skip(records.len()) {
            cancel::check(cancel)?;
            let entries =
                aggregate::count_period(&self.runner, &repo, period, &progress, cancel).await?;
            let (top, rest) = aggregate::split_at_limit(entries, limit);

            let mut record = PeriodRecord::empty(period);
            let mut pending: Vec<ShortlogEntry> = Vec::new();
            for entry in top {
                let profile = self.resolver.reserved_profile(&entry.email);
                builder.record(&period.label, &entry.name, profile.as_deref(), entry.commits, true);
                record.contributors.push(PeriodContributor {
                    author: entry.name.clone(),
                    commits: entry.commits,
                    profile_url: profile.clone(),
                    email: Some(entry.email.clone()).filter(|e| !e.is_empty()),
                });
                if profile.is_none() {
                    pending.push(entry);
                }
            }
            for entry in rest {
                let profile = self.resolver.cached_profile(&entry.email, &entry.name).await;
                builder.record(&period.label, &entry.name, profile.as_deref(), entry.commits, false);
                record.below_cut.push(PeriodContributor {
                    author: entry.name,
                    commits: entry.commits,
                    profile_url: profile,
                    email: Some(entry.email).filter(|e| !e.is_empty()),
                });
            }
            records.push(record);

            if !pending.is_empty() {
                progress.status(format!(
                    "Resolving {} contributor identit{} for {}",
                    pending.len(),
                    if pending.len() == 1 { "y" } else { "ies" },
                    period.label
                ));
            }
            for entry in pending {
                let ctx = LookupContext {
                    slug: &slug,
                    repo: Some(&repo),
                    progress: &progress,
                    cancel,
                };
                if let Some(url) = self.resolver.resolve(&entry.email, &entry.name, ctx).await? {
                    builder.rekey(&entry.name, &url);
                    attach_profile(&mut records, &entry.name, &url);
                }
            }

            let done = index + 1;
            if done % stride == 0 || done == total {
                progress.status(format!("Processed {done}/{total} periods ({})", period.label));
            }
        }

        progress.status("Gathering repository metadata");
        let (description, clone_depth, disk_size) = tokio::join!(
            self.api.repository(&slug, cancel),
            git::commit_count(&self.runner, &repo, &progress, cancel),
            cancel::or_cancel(cancel, disk_usage(repo.clone())),
        );
        let description = optional(description, "repository description")?.flatten();
        let clone_depth = optional(clone_depth, "commit count")?;
        let disk_size = optional(disk_size.and_then(|size| size), "disk usage")?;

        let mut summary = RepoContributionSummary {
            slug: slug.to_string(),
            repo_path: None,
            description: description.and_then(|info| info.description),
            clone_depth,
            disk_size,
            interval,
            start_date: window.first,
            end_date: window.last,
            periods: records,
            series: builder.finish(),
        };

        cancel::check(cancel)?;
        progress.status("Saving summary");
        if let Err(e) = self.summaries.set(&key, summary.clone()).await {
            tracing::warn!(%slug, "failed to persist summary cache: {e}");
        }

        summary.repo_path = Some(repo.display().to_string());
        progress.status(format!("Finished {slug}"));
        Ok(summary)
    }

    /// Collect summaries for `owner`'s most-starred repositories, one at a
    /// time. Failures are reported and skipped; cancellation stops the batch.
    pub async fn collect_top_repositories(
        &self,
        owner: &str,
        count: usize,
        limit: usize,
        options: CollectOptions,
    ) -> Result<Vec<RepoContributionSummary>> {
        let owner = owner.trim();
        if owner.is_empty() || count == 0 {
            return Err(CensusError::Validation(
                "owner must be non-empty and count positive".to_string(),
            ));
        }
        let progress = Progress::from_option(options.on_progress.clone());

        progress.status(format!("Listing top repositories for {owner}"));
        let slugs = self
            .api
            .top_repositories(owner, count, &options.cancel)
            .await?;

        let mut summaries = Vec::with_capacity(slugs.len());
        for (index, slug) in slugs.iter().enumerate() {
            progress.status(format!("[{}/{}] {slug}", index + 1, slugs.len()));
            match self
                .collect_contribution_summary(&slug.to_string(), limit, options.clone())
                .await
            {
                Ok(summary) => summaries.push(summary),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    tracing::warn!(%slug, "skipping repository: {e}");
                    progress.status(format!("Skipping {slug}: {e}"));
                }
            }
        }
        Ok(summaries)
    }
}

/// Give already-emitted rows for `author` the newly resolved profile.
fn attach_profile(records: &mut [PeriodRecord], author: &str, url: &str) {
    let author = author.to_lowercase();
    for contributor in records.iter_mut().flat_map(|r| r.contributors.iter_mut()) {
        if contributor.profile_url.is_none() && contributor.author.to_lowercase() == author {
            contributor.profile_url = Some(url.to_string());
        }
    }
}

/// Metadata is best-effort: only cancellation is an error.
fn optional<T>(result: Result<T>, what: &str) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_cancelled() => Err(e),
        Err(e) => {
            tracing::warn!("could not determine {what}: {e}");
            Ok(None)
        }
    }
}

/// Total size in bytes of the files under `path`.
async fn disk_usage(path: PathBuf) -> Result<u64> {
    tokio::task::spawn_blocking(move || {
        WalkDir::new(&path)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| entry.metadata().ok())
            .map(|meta| meta.len())
            .sum::<u64>()
    })
    .await
    .map_err(|e| CensusError::Io(std::io::Error::other(e)))
}
