//! Concurrency-safe access to one logical git repository.
//!
//! A `Repository` owns a bare git directory (on disk, or in a scratch
//! directory for in-memory use) with an optional `origin` remote. It is the
//! single point of concurrency control for that repository:
//!
//! - `view` takes a read lock and hands a read-only tree filesystem to the
//!   caller.
//! - `fetch` and `update_and_push` take the write lock.
//! - Subscribers are notified of branch movements after the lock has been
//!   released, so handlers may call back into `view`.
//!
//! Branch heads are always read from the remote-tracking references
//! (`refs/remotes/origin/<branch>`), which fetch and push keep current.

mod commits;
mod filesystem;
mod remote;

pub use commits::{CommitInfo, CommitIter, PathFilter};
pub use remote::{Credentials, REMOTE_NAME};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use git2::Oid;
use tempfile::TempDir;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::errors::{Error, Result};
use crate::fs::Filesystem;
use filesystem::TreeFilesystem;
use remote::Connection;

const README: &str = "# Glu Configuration Repository";

/// Receives branch-head movements.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Branch names or prefix patterns (`glu/checkout/staging/*`).
    fn branches(&self) -> Vec<String>;

    /// Called with the branches matching `branches()` that moved, mapped to
    /// their new heads.
    async fn notify(&self, refs: &HashMap<String, Oid>) -> Result<()>;
}

/// Commit identity used for commits made by glu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSignature {
    pub name: String,
    pub email: String,
}

impl Default for CommitSignature {
    fn default() -> Self {
        Self {
            name: "glu bot".to_string(),
            email: "bot@get-glu.dev".to_string(),
        }
    }
}

/// Construction options for `Repository::open`.
#[derive(Debug, Clone)]
pub struct RepositoryOptions {
    pub remote: Option<String>,
    pub default_branch: String,
    /// Location of the bare git directory. `None` uses a scratch directory
    /// removed when the repository is dropped.
    pub path: Option<PathBuf>,
    pub signature: CommitSignature,
    /// Background fetch period. `None` disables polling.
    pub poll_interval: Option<Duration>,
    pub credentials: Credentials,
    pub insecure_skip_tls: bool,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self {
            remote: None,
            default_branch: "main".to_string(),
            path: None,
            signature: CommitSignature::default(),
            poll_interval: None,
            credentials: Credentials::default(),
            insecure_skip_tls: false,
        }
    }
}

impl RepositoryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_remote(mut self, url: impl Into<String>) -> Self {
        self.remote = Some(url.into());
        self
    }

    pub fn with_default_branch(mut self, branch: impl Into<String>) -> Self {
        self.default_branch = branch.into();
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_signature(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.signature = CommitSignature {
            name: name.into(),
            email: email.into(),
        };
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_insecure_skip_tls(mut self, skip: bool) -> Self {
        self.insecure_skip_tls = skip;
        self
    }
}

/// What `view` reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewOptions {
    /// Branch whose head is read; defaults to the default branch.
    pub branch: Option<String>,
    /// Exact commit to read, taking precedence over `branch`.
    pub revision: Option<Oid>,
}

impl ViewOptions {
    pub fn branch(branch: impl Into<String>) -> Self {
        Self {
            branch: Some(branch.into()),
            revision: None,
        }
    }

    pub fn revision(revision: Oid) -> Self {
        Self {
            branch: None,
            revision: Some(revision),
        }
    }
}

/// How `update_and_push` writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Target branch; defaults to the default branch.
    pub branch: Option<String>,
    /// Expected current head. A mismatch fails with `Conflict`.
    pub expected_revision: Option<Oid>,
    /// Force-push instead of requiring a fast-forward.
    pub force: bool,
    /// When the write changes nothing, push the current head anyway instead
    /// of failing with `NoChange`.
    pub push_if_empty: bool,
}

impl UpdateOptions {
    pub fn branch(branch: impl Into<String>) -> Self {
        Self {
            branch: Some(branch.into()),
            ..Default::default()
        }
    }

    pub fn with_expected_revision(mut self, revision: Oid) -> Self {
        self.expected_revision = Some(revision);
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_push_if_empty(mut self, push_if_empty: bool) -> Self {
        self.push_if_empty = push_if_empty;
        self
    }
}

/// One logical git repository with an optional remote.
pub struct Repository {
    path: PathBuf,
    _scratch: Option<TempDir>,
    remote: Option<String>,
    default_branch: String,
    signature: CommitSignature,
    connection: Connection,
    poll_interval: Option<Duration>,
    lock: RwLock<()>,
    subscribers: Mutex<Vec<Weak<dyn Subscriber>>>,
    cancel: CancellationToken,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl Repository {
    /// Open (or initialise) the repository, fetch from the remote, seed an
    /// initial commit when the default branch does not exist yet, and start
    /// background polling.
    pub async fn open(options: RepositoryOptions) -> Result<Arc<Self>> {
        if options.default_branch.trim().is_empty() {
            return Err(Error::Configuration("default branch cannot be empty".into()));
        }

        let (path, scratch) = match &options.path {
            Some(path) => (path.clone(), None),
            None => {
                let dir = tempfile::Builder::new().prefix("glu-repo-").tempdir()?;
                (dir.path().to_path_buf(), Some(dir))
            }
        };
        init_bare(&path, options.remote.as_deref())?;

        let repo = Arc::new(Self {
            path,
            _scratch: scratch,
            remote: options.remote,
            default_branch: options.default_branch,
            signature: options.signature,
            connection: Connection {
                credentials: options.credentials,
                insecure_skip_tls: options.insecure_skip_tls,
            },
            poll_interval: options.poll_interval,
            lock: RwLock::new(()),
            subscribers: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
            poller: Mutex::new(None),
        });

        if repo.remote.is_some() {
            repo.fetch(&[]).await?;
        }

        if repo.resolve(&repo.default_branch).is_err() {
            tracing::warn!(
                branch = %repo.default_branch,
                "repository empty, seeding an initial README commit"
            );
            repo.seed().await?;
        }

        repo.start_polling();
        Ok(repo)
    }

    /// In-memory repository without a remote.
    pub async fn in_memory() -> Result<Arc<Self>> {
        Self::open(RepositoryOptions::default()).await
    }

    pub fn default_branch(&self) -> &str {
        &self.default_branch
    }

    pub fn remote_url(&self) -> Option<&str> {
        self.remote.as_deref()
    }

    /// Location of the bare git directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Browsable URL of `commit` when the remote is a recognised host.
    pub fn commit_url(&self, commit: Oid) -> Option<String> {
        remote::commit_url(self.remote.as_deref()?, &commit.to_string())
    }

    /// Register interest in branch movements. Dropped subscribers are
    /// pruned on the next notification.
    pub fn subscribe(&self, subscriber: Weak<dyn Subscriber>) -> Result<()> {
        self.subscribers.lock()?.push(subscriber);
        Ok(())
    }

    /// Branches fetched when `fetch` is called without explicit branches:
    /// the default branch plus every subscriber's branches, deduplicated.
    pub fn fetch_heads(&self) -> Result<Vec<String>> {
        let mut heads = vec![self.default_branch.clone()];
        for subscriber in self.live_subscribers()? {
            for branch in subscriber.branches() {
                if !heads.contains(&branch) {
                    heads.push(branch);
                }
            }
        }
        Ok(heads)
    }

    /// Fetch `branches` (or `fetch_heads()` when empty) from the remote and
    /// notify subscribers of every tracked branch that moved.
    ///
    /// Without a remote this is a no-op.
    pub async fn fetch(&self, branches: &[String]) -> Result<()> {
        if self.remote.is_none() {
            return Ok(());
        }

        let moved = {
            let _guard = self.lock.write().await;
            let heads = if branches.is_empty() {
                self.fetch_heads()?
            } else {
                branches.to_vec()
            };
            let refspecs: Vec<String> = heads.iter().map(|h| fetch_refspec(h)).collect();
            for spec in &refspecs {
                tracing::debug!(refspec = %spec, "preparing refspec for fetch");
            }

            let before = self.tracking_refs(&heads)?;
            remote::fetch(&self.path, refspecs, &self.connection, &self.cancel).await?;
            let after = self.tracking_refs(&heads)?;

            after
                .into_iter()
                .filter(|(branch, oid)| before.get(branch) != Some(oid))
                .collect::<HashMap<_, _>>()
        };

        if !moved.is_empty() {
            tracing::debug!(moved = moved.len(), "fetch moved tracked branches");
            self.notify_subscribers(&moved).await;
        }
        Ok(())
    }

    /// Run `f` against a read-only view of one commit.
    pub async fn view<T, F>(&self, options: ViewOptions, f: F) -> Result<T>
    where
        F: FnOnce(Oid, &dyn Filesystem) -> Result<T>,
    {
        let _guard = self.lock.read().await;
        let repo = self.open_handle()?;
        let oid = match options.revision {
            Some(oid) => oid,
            None => {
                let branch = options.branch.as_deref().unwrap_or(&self.default_branch);
                resolve_in(&repo, branch)?
            }
        };
        tracing::debug!(revision = %oid, "view");
        let fs = TreeFilesystem::read_only(&repo, oid)?;
        f(oid, &fs)
    }

    /// Apply `f` to the branch head, commit, push and notify subscribers.
    ///
    /// `f` mutates the filesystem and returns the commit message. Returns the
    /// new head. Fails with `Conflict` if `expected_revision` is stale (no
    /// commit is made) and with `NoChange` if the tree is unchanged (unless
    /// `push_if_empty`).
    pub async fn update_and_push<F>(&self, options: UpdateOptions, f: F) -> Result<Oid>
    where
        F: FnOnce(&dyn Filesystem) -> Result<String> + Send,
    {
        let branch = options
            .branch
            .clone()
            .unwrap_or_else(|| self.default_branch.clone());

        let head = {
            let _guard = self.lock.write().await;

            let (previous, head) = {
                let repo = self.open_handle()?;
                let previous = resolve_in(&repo, &branch)?;
                if let Some(expected) = options.expected_revision
                    && expected != previous
                {
                    return Err(Error::conflict(
                        &branch,
                        format!("base revision {expected} has changed (now {previous})"),
                    ));
                }

                let fs = TreeFilesystem::writable(&repo, Some(previous))?;
                let message = f(&fs)?;
                let signature = git2::Signature::now(&self.signature.name, &self.signature.email)?;
                let head = match fs.commit(&signature, &message) {
                    Ok(oid) => oid,
                    Err(e) if e.is_no_change() && options.push_if_empty => previous,
                    Err(e) => return Err(e),
                };
                repo.reference(&local_ref(&branch), head, true, "glu: update")?;
                (previous, head)
            };

            if self.remote.is_some() {
                remote::push(&self.path, &branch, options.force, &self.connection, &self.cancel)
                    .await?;
            }

            let repo = self.open_handle()?;
            repo.reference(&tracking_ref(&branch), head, true, "glu: update")?;
            tracing::debug!(
                branch = %branch,
                from = %previous,
                to = %head,
                "updated branch"
            );
            head
        };

        self.notify_subscribers(&HashMap::from([(branch, head)])).await;
        Ok(head)
    }

    /// Point `branch` at the head of `base` (default branch when `None`)
    /// unless it already exists.
    pub async fn create_branch_if_not_exists(&self, branch: &str, base: Option<&str>) -> Result<()> {
        let _guard = self.lock.write().await;
        let repo = self.open_handle()?;
        if resolve_in(&repo, branch).is_ok() {
            return Ok(());
        }
        let base = base.unwrap_or(&self.default_branch);
        let head = resolve_in(&repo, base)?;
        repo.reference(&tracking_ref(branch), head, true, "glu: create branch")?;
        Ok(())
    }

    /// Point `branch` at the head of `base`, creating or moving it.
    pub async fn reset_branch(&self, branch: &str, base: Option<&str>) -> Result<Oid> {
        let _guard = self.lock.write().await;
        let repo = self.open_handle()?;
        let base = base.unwrap_or(&self.default_branch);
        let head = resolve_in(&repo, base)?;
        repo.reference(&tracking_ref(branch), head, true, "glu: reset branch")?;
        Ok(head)
    }

    /// Current head of a tracked branch.
    pub fn resolve(&self, branch: &str) -> Result<Oid> {
        let repo = self.open_handle()?;
        resolve_in(&repo, branch)
    }

    /// Commits reachable from `from` (or the head of `branch`), breadth-first.
    pub async fn list_commits(
        &self,
        branch: &str,
        from: Option<Oid>,
        filter: Option<PathFilter>,
    ) -> Result<CommitIter> {
        let _guard = self.lock.read().await;
        let repo = self.open_handle()?;
        let start = match from {
            Some(oid) => oid,
            None => resolve_in(&repo, branch)?,
        };
        tracing::debug!(branch = %branch, from = %start, "list commits");
        Ok(CommitIter::new(repo, start, filter))
    }

    /// Stop background polling and wait for the poller to exit.
    pub async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        let handle = self.poller.lock()?.take();
        if let Some(handle) = handle {
            handle.await?;
        }
        Ok(())
    }

    fn open_handle(&self) -> Result<git2::Repository> {
        Ok(git2::Repository::open_bare(&self.path)?)
    }

    fn live_subscribers(&self) -> Result<Vec<Arc<dyn Subscriber>>> {
        let mut subscribers = self.subscribers.lock()?;
        subscribers.retain(|s| s.strong_count() > 0);
        Ok(subscribers.iter().filter_map(Weak::upgrade).collect())
    }

    /// Current tracking heads of every branch matching one of `heads`.
    fn tracking_refs(&self, heads: &[String]) -> Result<HashMap<String, Oid>> {
        let repo = self.open_handle()?;
        let prefix = format!("refs/remotes/{REMOTE_NAME}/");
        let mut refs = HashMap::new();
        for reference in repo.references_glob(&format!("{prefix}*"))? {
            let reference = reference?;
            let (Some(name), Some(oid)) = (reference.name(), reference.target()) else {
                continue;
            };
            let Some(branch) = name.strip_prefix(&prefix) else {
                continue;
            };
            if heads.iter().any(|h| ref_match(branch, h)) {
                refs.insert(branch.to_string(), oid);
            }
        }
        Ok(refs)
    }

    async fn notify_subscribers(&self, refs: &HashMap<String, Oid>) {
        let subscribers = match self.live_subscribers() {
            Ok(subscribers) => subscribers,
            Err(e) => {
                tracing::error!(error = %e, "reading subscribers");
                return;
            }
        };

        for subscriber in subscribers {
            let patterns = subscriber.branches();
            let matched: HashMap<String, Oid> = refs
                .iter()
                .filter(|(branch, _)| patterns.iter().any(|p| ref_match(branch, p)))
                .map(|(branch, oid)| (branch.clone(), *oid))
                .collect();
            if matched.is_empty() {
                continue;
            }
            if let Err(e) = subscriber.notify(&matched).await {
                tracing::error!(error = %e, "while updating subscriber");
            }
        }
    }

    /// Create a root commit holding a README on the default branch.
    async fn seed(&self) -> Result<()> {
        let branch = self.default_branch.clone();
        let head = {
            let _guard = self.lock.write().await;
            let head = {
                let repo = self.open_handle()?;
                let fs = TreeFilesystem::writable(&repo, None)?;
                fs.write("README.md", README.as_bytes())?;
                let signature = git2::Signature::now(&self.signature.name, &self.signature.email)?;
                let head = fs.commit(&signature, "add initial README")?;
                repo.reference(&local_ref(&branch), head, true, "glu: seed")?;
                head
            };
            if self.remote.is_some() {
                remote::push(&self.path, &branch, false, &self.connection, &self.cancel).await?;
            }
            let repo = self.open_handle()?;
            repo.reference(&tracking_ref(&branch), head, true, "glu: seed")?;
            head
        };
        self.notify_subscribers(&HashMap::from([(branch, head)])).await;
        Ok(())
    }

    fn start_polling(self: &Arc<Self>) {
        let Some(interval) = self.poll_interval else {
            return;
        };
        if self.remote.is_none() || interval.is_zero() {
            return;
        }

        let weak = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; the initial fetch already ran.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(repo) = weak.upgrade() else { break };
                        match repo.fetch(&[]).await {
                            Ok(()) => tracing::debug!("fetch successful"),
                            Err(e) => tracing::error!(error = %e, "error performing fetch"),
                        }
                    }
                }
            }
        });

        if let Ok(mut poller) = self.poller.lock() {
            *poller = Some(handle);
        }
    }
}

impl Drop for Repository {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("path", &self.path)
            .field("remote", &self.remote)
            .field("default_branch", &self.default_branch)
            .finish_non_exhaustive()
    }
}

fn init_bare(path: &Path, remote: Option<&str>) -> Result<()> {
    let repo = match git2::Repository::open_bare(path) {
        Ok(repo) => repo,
        Err(_) => {
            std::fs::create_dir_all(path)?;
            git2::Repository::init_bare(path)?
        }
    };
    if let Some(url) = remote {
        match repo.find_remote(REMOTE_NAME) {
            Ok(existing) if existing.url() == Some(url) => {}
            Ok(_) => repo.remote_set_url(REMOTE_NAME, url)?,
            Err(_) => {
                repo.remote(REMOTE_NAME, url)?;
            }
        }
    }
    Ok(())
}

fn local_ref(branch: &str) -> String {
    format!("refs/heads/{branch}")
}

fn tracking_ref(branch: &str) -> String {
    format!("refs/remotes/{REMOTE_NAME}/{branch}")
}

fn fetch_refspec(head: &str) -> String {
    format!("+{}:{}", local_ref(head), tracking_ref(head))
}

fn resolve_in(repo: &git2::Repository, branch: &str) -> Result<Oid> {
    match repo.refname_to_id(&tracking_ref(branch)) {
        Ok(oid) => Ok(oid),
        Err(e) if e.code() == git2::ErrorCode::NotFound => Err(Error::not_found("branch", branch)),
        Err(e) => Err(e.into()),
    }
}

/// Exact match, or prefix match up to the first `*` in `pattern`.
pub fn ref_match(reference: &str, pattern: &str) -> bool {
    match pattern.find('*') {
        Some(idx) => reference.starts_with(&pattern[..idx]),
        None => reference == pattern,
    }
}
