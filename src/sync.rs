//! Keeps a full local clone of each analysed repository.

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::git::{GitCommand, GitRunner};
use crate::progress::Progress;
use crate::types::RepoSlug;

/// Directory name for a slug's clone: `owner__name`, path separators and
/// drive colons replaced by `_`.
pub fn repo_dir_name(slug: &RepoSlug) -> String {
    let escape = |part: &str| part.replace(['/', '\\', ':'], "_");
    format!("{}__{}", escape(&slug.owner), escape(&slug.name))
}

#[derive(Debug, Clone)]
pub struct RepositorySynchronizer {
    runner: GitRunner,
    root: PathBuf,
    remote_base: String,
}

impl RepositorySynchronizer {
    /// `remote_base` is the web URL clones are fetched from
    /// (`<remote_base>/<owner>/<name>.git`).
    pub fn new(runner: GitRunner, root: PathBuf, remote_base: &str) -> Self {
        Self {
            runner,
            root,
            remote_base: remote_base.trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn local_path(&self, slug: &RepoSlug) -> PathBuf {
        self.root.join(repo_dir_name(slug))
    }

    pub fn remote_url(&self, slug: &RepoSlug) -> String {
        format!("{}/{}/{}.git", self.remote_base, slug.owner, slug.name)
    }

    /// Clone (if needed), fetch everything, unshallow, and fast-forward.
    ///
    /// Only the fast-forward is allowed to fail; it is reported as a status
    /// event and the existing checkout is used as-is.
    pub async fn ensure(
        &self,
        slug: &RepoSlug,
        progress: &Progress,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let dir = self.local_path(slug);
        tokio::fs::create_dir_all(&self.root).await?;

        if !dir.join(".git").exists() {
            if dir.exists() {
                tracing::warn!(path = %dir.display(), "removing incomplete clone");
                tokio::fs::remove_dir_all(&dir).await?;
            }
            progress.status(format!("Cloning {slug}"));
            let clone = GitCommand::new([
                "clone".to_string(),
                "--no-tags".to_string(),
                "--progress".to_string(),
                self.remote_url(slug),
                dir.to_string_lossy().into_owned(),
            ])
            .label("git clone")
            .current_dir(&self.root);
            self.runner.run(&clone, progress, cancel).await?;
        } else {
            tracing::debug!(path = %dir.display(), "reusing existing clone");
        }

        progress.status(format!("Fetching {slug}"));
        let fetch = GitCommand::new(["fetch", "--all", "--tags", "--prune", "--progress"])
            .label("git fetch")
            .current_dir(&dir);
        self.runner.run(&fetch, progress, cancel).await?;

        let shallow = GitCommand::new(["rev-parse", "--is-shallow-repository"])
            .label("git rev-parse")
            .current_dir(&dir)
            .capture_stdout();
        if self.runner.run(&shallow, progress, cancel).await?.trim() == "true" {
            progress.status(format!("Unshallowing {slug}"));
            let unshallow = GitCommand::new(["fetch", "--unshallow", "--progress"])
                .label("git fetch --unshallow")
                .current_dir(&dir);
            self.runner.run(&unshallow, progress, cancel).await?;
        }

        let pull = GitCommand::new(["pull", "--ff-only"])
            .label("git pull")
            .current_dir(&dir);
        if let Err(e) = self.runner.run(&pull, progress, cancel).await {
            if e.is_cancelled() {
                return Err(e);
            }
            tracing::warn!(%slug, "fast-forward failed: {e}");
            progress.status(format!("Could not fast-forward {slug}; using existing checkout"));
        }

        Ok(dir)
    }
}
