#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use commitcensus::config::Config;
use commitcensus::github::{HostingApi, RepositoryInfo, UserCandidate};
use commitcensus::{ProgressCallback, ProgressEvent, RepoSlug, Result};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .is_ok_and(|out| out.status.success())
}

/// Bail out of a test when there is no usable git binary.
macro_rules! require_git {
    () => {
        if !common::git_available() {
            eprintln!("Skipping test: git is not available");
            return;
        }
    };
}

fn git(dir: &Path, args: &[&str], envs: &[(&str, &str)]) {
    let out = Command::new("git")
        .args(["-c", "commit.gpgsign=false", "-c", "init.defaultBranch=main"])
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .envs(envs.iter().copied())
        .output()
        .expect("spawn git");
    assert!(
        out.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
}

/// A working repository plus a bare clone laid out as `<remotes>/<owner>/<name>.git`.
pub struct Fixture {
    pub dir: TempDir,
    pub work: PathBuf,
    pub remotes: PathBuf,
    pub slug: RepoSlug,
}

impl Fixture {
    pub fn new(owner: &str, name: &str) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let work = dir.path().join("work");
        let remotes = dir.path().join("remotes");
        std::fs::create_dir_all(&work).expect("work dir");
        std::fs::create_dir_all(remotes.join(owner)).expect("remote dir");
        git(&work, &["init", "--quiet"], &[]);
        Self {
            dir,
            work,
            remotes,
            slug: RepoSlug::new(owner, name),
        }
    }

    /// Commit (empty tree changes are fine) as `name <email>` at `date` (RFC 3339).
    pub fn commit(&self, name: &str, email: &str, date: &str) {
        let marker = self.work.join("CHANGES");
        let mut text = std::fs::read_to_string(&marker).unwrap_or_default();
        text.push_str(&format!("{date} {name}\n"));
        std::fs::write(&marker, text).expect("write marker");

        let envs = [
            ("GIT_AUTHOR_NAME", name),
            ("GIT_AUTHOR_EMAIL", email),
            ("GIT_AUTHOR_DATE", date),
            ("GIT_COMMITTER_NAME", name),
            ("GIT_COMMITTER_EMAIL", email),
            ("GIT_COMMITTER_DATE", date),
        ];
        git(&self.work, &["add", "CHANGES"], &envs);
        git(&self.work, &["commit", "--quiet", "-m", date], &envs);
    }

    pub fn bare_path(&self) -> PathBuf {
        self.remotes
            .join(&self.slug.owner)
            .join(format!("{}.git", self.slug.name))
    }

    /// Create or update the bare remote from the working repository.
    pub fn publish(&self) {
        let bare = self.bare_path();
        if bare.exists() {
            let target = bare.to_string_lossy().into_owned();
            git(&self.work, &["push", "--quiet", &target, "HEAD:refs/heads/main"], &[]);
        } else {
            let source = self.work.to_string_lossy().into_owned();
            let target = bare.to_string_lossy().into_owned();
            git(self.dir.path(), &["clone", "--quiet", "--bare", &source, &target], &[]);
        }
    }

    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.cache.directory = self.dir.path().join("state").display().to_string();
        config.sync.repos_dir = self.dir.path().join("repos").display().to_string();
        config.sync.remote_base = self.remotes.display().to_string();
        config.sync.kill_grace_ms = 500;
        config
    }
}

/// Progress sink that records every event.
pub fn recorder() -> (ProgressCallback, Arc<Mutex<Vec<ProgressEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let callback: ProgressCallback = Arc::new(move |event: &ProgressEvent| {
        sink.lock().push(event.clone());
    });
    (callback, events)
}

pub fn statuses(events: &[ProgressEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            ProgressEvent::Status { message } => Some(message.clone()),
            ProgressEvent::Git { .. } => None,
        })
        .collect()
}

pub fn git_commands(events: &[ProgressEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            ProgressEvent::Git { command, .. } => Some(command.clone()),
            ProgressEvent::Status { .. } => None,
        })
        .collect()
}

/// Hosting API double: search results keyed by query, no linked commit authors.
#[derive(Default)]
pub struct FakeHost {
    pub users: Vec<(String, UserCandidate)>,
    pub description: Option<String>,
    pub searches: AtomicUsize,
    pub commit_lookups: AtomicUsize,
}

impl FakeHost {
    pub fn with_user(mut self, query: &str, login: &str) -> Self {
        self.users.push((
            query.to_string(),
            UserCandidate {
                login: login.to_string(),
                profile_url: format!("https://github.com/{login}"),
            },
        ));
        self
    }

    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HostingApi for FakeHost {
    async fn commit_author(
        &self,
        _slug: &RepoSlug,
        _sha: &str,
        _cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        self.commit_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }

    async fn search_users(
        &self,
        query: &str,
        limit: usize,
        _cancel: &CancellationToken,
    ) -> Result<Vec<UserCandidate>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .users
            .iter()
            .filter(|(q, _)| q == query)
            .map(|(_, user)| user.clone())
            .take(limit)
            .collect())
    }

    async fn user_display_name(
        &self,
        _login: &str,
        _cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        Ok(None)
    }

    async fn repository(
        &self,
        _slug: &RepoSlug,
        _cancel: &CancellationToken,
    ) -> Result<Option<RepositoryInfo>> {
        Ok(Some(RepositoryInfo {
            description: self.description.clone(),
            ..Default::default()
        }))
    }

    async fn top_repositories(
        &self,
        _owner: &str,
        _count: usize,
        _cancel: &CancellationToken,
    ) -> Result<Vec<RepoSlug>> {
        Ok(Vec::new())
    }
}
