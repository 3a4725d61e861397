//! Phase whose resource lives on a branch of a git repository.
//!
//! Reads are served from the version log, which is refreshed whenever the
//! repository reports that the phase's branch moved. Updates either commit
//! straight to the branch or go through a review request:
//!
//! ```text
//! no proposal          -> branch glu/<pipeline>/<phase>/<digest> from base, open proposal
//! open, same base      -> same digest: nothing to do
//!                         new digest: force-push onto the open proposal
//! open, base advanced  -> close it, branch again from the new base, open a new one
//! ```

mod proposal;

pub use proposal::{Proposal, ProposalOptions, Proposer};

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use git2::Oid;
use glu_common::{
    Annotations, Descriptor, Metadata, PromotionResult, State, UpdateKind, annotations,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::core::{Phase, Resource, RollbackPhase, TypedPhase, UpdatablePhase};
use crate::errors::{Error, Result};
use crate::fs::Filesystem;
use crate::history::VersionLog;
use crate::repository::{Repository, Subscriber, UpdateOptions, ViewOptions};

pub const KIND: &str = "git";

/// A resource that can be read from and written to a repository tree.
///
/// The optional methods customise where the resource lives and how changes
/// to it are described.
pub trait GitResource: Resource + Serialize + DeserializeOwned + Default {
    fn read_from(&mut self, phase: &Descriptor, fs: &dyn Filesystem) -> Result<()>;

    fn write_to(&self, phase: &Descriptor, fs: &dyn Filesystem) -> Result<()>;

    /// Branch holding this phase's copy, instead of the repository default.
    fn branch(&self, _phase: &Descriptor) -> Option<String> {
        None
    }

    fn commit_message(&self, phase: &Descriptor, _from: &Self, kind: UpdateKind) -> Result<String> {
        Ok(kind.default_message(phase))
    }

    fn proposal_title(&self, phase: &Descriptor, _from: &Self, kind: UpdateKind) -> Result<String> {
        Ok(kind.default_message(phase))
    }

    fn proposal_body(&self, _phase: &Descriptor, from: &Self, _kind: UpdateKind) -> Result<String> {
        Ok(format!(
            "| from | to |\n| -- | -- |\n| {} | {} |\n",
            from.digest()?,
            self.digest()?
        ))
    }
}

/// Construction options for `GitPhase`.
#[derive(Clone, Default)]
pub struct GitPhaseOptions {
    log: Option<Arc<VersionLog>>,
    proposer: Option<Arc<dyn Proposer>>,
    propose: Option<ProposalOptions>,
}

impl GitPhaseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Version log to record into. Defaults to a private in-memory log.
    pub fn with_log(mut self, log: Arc<VersionLog>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn with_proposer(mut self, proposer: Arc<dyn Proposer>) -> Self {
        self.proposer = Some(proposer);
        self
    }

    /// Route updates through review requests instead of committing directly.
    pub fn propose_changes(mut self, options: ProposalOptions) -> Self {
        self.propose = Some(options);
        self
    }
}

/// Git-backed phase for resource type `R`.
pub struct GitPhase<R> {
    descriptor: Descriptor,
    branch: String,
    repo: Arc<Repository>,
    log: Arc<VersionLog>,
    proposer: Option<Arc<dyn Proposer>>,
    propose: Option<ProposalOptions>,
    // Also serialises proposal state transitions.
    current_proposal: Mutex<Option<Proposal>>,
    _resource: PhantomData<fn() -> R>,
}

impl<R: GitResource> GitPhase<R> {
    /// Create the phase, subscribe it to its branch and record the branch's
    /// current state.
    pub async fn new(
        pipeline: &str,
        metadata: Metadata,
        repo: Arc<Repository>,
        options: GitPhaseOptions,
    ) -> Result<Arc<Self>> {
        let descriptor = Descriptor::new(KIND, pipeline, metadata);
        let branch = R::default()
            .branch(&descriptor)
            .unwrap_or_else(|| repo.default_branch().to_string());
        let log = options
            .log
            .unwrap_or_else(|| Arc::new(VersionLog::in_memory()));
        log.create_log(&descriptor)?;

        let phase = Arc::new(Self {
            descriptor,
            branch,
            repo,
            log,
            proposer: options.proposer,
            propose: options.propose,
            current_proposal: Mutex::new(None),
            _resource: PhantomData,
        });

        let subscriber: Arc<dyn Subscriber> = phase.clone();
        phase.repo.subscribe(Arc::downgrade(&subscriber))?;

        phase
            .record_state(ViewOptions::branch(phase.branch.clone()))
            .await?;

        if let Some(proposer) = &phase.proposer {
            let mut cached = phase.current_proposal.lock().await;
            phase.lookup_proposal(&mut cached, proposer.as_ref()).await?;
        }

        Ok(phase)
    }

    /// Branch this phase tracks.
    pub fn branch(&self) -> &str {
        &self.branch
    }

    fn branch_prefix(&self) -> String {
        format!(
            "glu/{}/{}",
            self.descriptor.pipeline, self.descriptor.metadata.name
        )
    }

    async fn record_state(&self, options: ViewOptions) -> Result<()> {
        let descriptor = &self.descriptor;
        let (head, resource) = self
            .repo
            .view(options, |oid, fs| {
                let mut resource = R::default();
                resource.read_from(descriptor, fs)?;
                Ok((oid, resource))
            })
            .await?;

        let mut recorded = Annotations::from([(
            annotations::GIT_HEAD_SHA.to_string(),
            head.to_string(),
        )]);
        if let Some(url) = self.repo.commit_url(head) {
            recorded.insert(annotations::GIT_COMMIT_URL.to_string(), url);
        }

        if self.log.record_latest(descriptor, &resource, recorded)? {
            tracing::debug!(
                pipeline = %descriptor.pipeline,
                phase = %descriptor.metadata.name,
                revision = %head,
                digest = %resource.digest()?,
                "recorded phase state"
            );
        }
        Ok(())
    }

    /// Cached proposal if still open, else whatever the review system reports.
    async fn lookup_proposal(
        &self,
        cached: &mut Option<Proposal>,
        proposer: &dyn Proposer,
    ) -> Result<Option<Proposal>> {
        if let Some(proposal) = cached.as_ref() {
            if proposer.is_proposal_open(proposal).await? {
                return Ok(Some(proposal.clone()));
            }
            tracing::debug!(phase = %self.descriptor, id = %proposal.id, "cached proposal no longer open");
            *cached = None;
            return Ok(None);
        }

        let found = proposer
            .get_current_proposal(&self.branch, &self.branch_prefix())
            .await?;
        if found.is_none() {
            tracing::debug!(phase = %self.descriptor, "proposal not found");
        }
        cached.clone_from(&found);
        Ok(found)
    }

    /// Write `to` onto a branch and push. Returns the new head.
    async fn write(&self, from: &R, to: &R, kind: UpdateKind, options: UpdateOptions) -> Result<Oid> {
        let descriptor = &self.descriptor;
        self.repo
            .update_and_push(options, |fs| {
                to.write_to(descriptor, fs)?;
                to.commit_message(descriptor, from, kind)
            })
            .await
    }

    async fn propose(
        &self,
        proposer: &dyn Proposer,
        options: &ProposalOptions,
        from: &R,
        to: &R,
        kind: UpdateKind,
    ) -> Result<PromotionResult> {
        let base_branch = self.branch.as_str();
        let base_revision = self.repo.resolve(base_branch)?.to_string();
        let from_digest = from.digest()?;
        let to_digest = to.digest()?;
        let branch = format!("{}/{}", self.branch_prefix(), to_digest);

        tracing::debug!(
            phase = %self.descriptor,
            from = %from_digest,
            to = %to_digest,
            "proposing update"
        );

        let mut cached = self.current_proposal.lock().await;
        let existing = self.lookup_proposal(&mut cached, proposer).await?;

        let replaced = match existing {
            Some(mut proposal) if proposal.base_revision == base_revision => {
                if proposal.digest == to_digest {
                    tracing::debug!(
                        phase = %self.descriptor,
                        id = %proposal.id,
                        reason = "already_exists_and_up_to_date",
                        "skipping proposal"
                    );
                    return Ok(PromotionResult::proposed(proposal.result_annotations()));
                }

                self.repo
                    .create_branch_if_not_exists(&proposal.branch, Some(base_branch))
                    .await?;
                let head = self
                    .write(
                        from,
                        to,
                        kind,
                        UpdateOptions::branch(proposal.branch.clone())
                            .with_force(true)
                            .with_push_if_empty(true),
                    )
                    .await?;
                tracing::debug!(
                    phase = %self.descriptor,
                    id = %proposal.id,
                    head = %head,
                    "updated existing proposal"
                );
                proposal.head_revision = head.to_string();
                proposal.digest = to_digest;
                let result = PromotionResult::proposed(proposal.result_annotations());
                *cached = Some(proposal);
                return Ok(result);
            }
            Some(stale) => {
                tracing::debug!(
                    phase = %self.descriptor,
                    id = %stale.id,
                    base = %stale.base_revision,
                    current = %base_revision,
                    "closing stale proposal"
                );
                proposer.close_proposal(&stale).await?;
                *cached = None;
                self.repo.reset_branch(&branch, Some(base_branch)).await?;
                Some(stale)
            }
            None => {
                self.repo
                    .create_branch_if_not_exists(&branch, Some(base_branch))
                    .await?;
                None
            }
        };

        let head = self
            .write(
                from,
                to,
                kind,
                UpdateOptions::branch(branch.clone())
                    .with_force(replaced.is_some())
                    .with_push_if_empty(true),
            )
            .await?;

        let mut proposal = Proposal {
            base_revision,
            base_branch: base_branch.to_string(),
            branch,
            head_revision: head.to_string(),
            digest: to_digest,
            title: to.proposal_title(&self.descriptor, from, kind)?,
            body: to.proposal_body(&self.descriptor, from, kind)?,
            ..Default::default()
        };
        proposer.create_proposal(&mut proposal, options).await?;
        tracing::info!(
            phase = %self.descriptor,
            id = %proposal.id,
            url = %proposal.url,
            "opened proposal"
        );

        let result = PromotionResult::proposed(proposal.result_annotations());
        if let Some(old) = replaced {
            proposer
                .comment_proposal(
                    &old,
                    &format!("Closed in favour of new proposal #{}", proposal.id),
                )
                .await?;
        }
        *cached = Some(proposal);
        Ok(result)
    }
}

#[async_trait]
impl<R: GitResource> Phase for GitPhase<R> {
    fn descriptor(&self) -> Descriptor {
        self.descriptor.clone()
    }

    async fn get(&self) -> Result<Box<dyn Resource>> {
        Ok(Box::new(self.get_resource().await?))
    }

    async fn history(&self) -> Result<Vec<State>> {
        self.log.history(&self.descriptor)
    }
}

#[async_trait]
impl<R: GitResource> TypedPhase<R> for GitPhase<R> {
    async fn get_resource(&self) -> Result<R> {
        self.log.latest_resource(&self.descriptor)
    }
}

#[async_trait]
impl<R: GitResource> UpdatablePhase<R> for GitPhase<R> {
    async fn update(&self, to: R, kind: UpdateKind) -> Result<PromotionResult> {
        let proposer = match (&self.propose, &self.proposer) {
            (Some(_), None) => {
                return Err(Error::Configuration(format!(
                    "phase {}: proposals requested but no proposer configured",
                    self.descriptor
                )));
            }
            (Some(options), Some(proposer)) => Some((options, proposer)),
            (None, _) => None,
        };

        self.repo.fetch(std::slice::from_ref(&self.branch)).await?;

        let from = self.get_resource().await?;

        if let Some((options, proposer)) = proposer {
            return self
                .propose(proposer.as_ref(), options, &from, &to, kind)
                .await;
        }

        let mut result = Annotations::from([(
            annotations::GIT_BASE_REF.to_string(),
            self.branch.clone(),
        )]);
        match self
            .write(&from, &to, kind, UpdateOptions::branch(self.branch.clone()))
            .await
        {
            Ok(head) => {
                result.insert(annotations::GIT_HEAD_SHA.to_string(), head.to_string());
                Ok(PromotionResult::updated(result))
            }
            Err(e) if e.is_no_change() => {
                tracing::debug!(phase = %self.descriptor, reason = "no_change", "update produced no commit");
                Ok(PromotionResult::no_change(result))
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl<R: GitResource> RollbackPhase for GitPhase<R> {
    async fn rollback(&self, version: Uuid) -> Result<PromotionResult> {
        let resource: R = self.log.resource_at_version(&self.descriptor, version)?;
        self.update(resource, UpdateKind::Rollback).await
    }
}

#[async_trait]
impl<R: GitResource> Subscriber for GitPhase<R> {
    fn branches(&self) -> Vec<String> {
        vec![self.branch.clone()]
    }

    async fn notify(&self, refs: &HashMap<String, Oid>) -> Result<()> {
        let Some(head) = refs.get(&self.branch) else {
            tracing::debug!(branch = %self.branch, "reference not found on notify");
            return Ok(());
        };
        self.record_state(ViewOptions::revision(*head)).await
    }
}

impl<R> std::fmt::Debug for GitPhase<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitPhase")
            .field("descriptor", &self.descriptor)
            .field("branch", &self.branch)
            .field("propose", &self.propose.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use sha2::{Digest, Sha256};
    use std::collections::BTreeMap;
    use std::io;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct App {
        image: String,
    }

    impl App {
        fn new(image: &str) -> Self {
            Self {
                image: image.to_string(),
            }
        }
    }

    impl Resource for App {
        fn digest(&self) -> Result<String> {
            Ok(hex::encode(Sha256::digest(self.image.as_bytes())))
        }
    }

    impl GitResource for App {
        fn read_from(&mut self, _phase: &Descriptor, fs: &dyn Filesystem) -> Result<()> {
            match fs.read("app.json") {
                Ok(data) => {
                    *self = serde_json::from_slice(&data).map_err(|source| Error::Decode {
                        what: "app",
                        source,
                    })?;
                    Ok(())
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        }

        fn write_to(&self, _phase: &Descriptor, fs: &dyn Filesystem) -> Result<()> {
            let data = serde_json::to_vec_pretty(self).map_err(|source| Error::Encode {
                what: "app",
                source,
            })?;
            fs.write("app.json", &data)?;
            Ok(())
        }
    }

    #[derive(Default)]
    struct Reviews {
        next_id: u64,
        open: BTreeMap<String, Proposal>,
        created: Vec<String>,
        closed: Vec<String>,
        comments: Vec<(String, String)>,
    }

    #[derive(Default)]
    struct MemoryProposer {
        reviews: std::sync::Mutex<Reviews>,
    }

    #[async_trait]
    impl Proposer for MemoryProposer {
        async fn get_current_proposal(
            &self,
            base_branch: &str,
            branch_prefix: &str,
        ) -> Result<Option<Proposal>> {
            let reviews = self.reviews.lock().unwrap();
            Ok(reviews
                .open
                .values()
                .find(|p| p.base_branch == base_branch && p.branch.starts_with(branch_prefix))
                .cloned())
        }

        async fn create_proposal(
            &self,
            proposal: &mut Proposal,
            _options: &ProposalOptions,
        ) -> Result<()> {
            let mut reviews = self.reviews.lock().unwrap();
            reviews.next_id += 1;
            proposal.id = reviews.next_id.to_string();
            proposal.url = format!("https://example.com/pulls/{}", proposal.id);
            reviews.created.push(proposal.id.clone());
            reviews.open.insert(proposal.id.clone(), proposal.clone());
            Ok(())
        }

        async fn close_proposal(&self, proposal: &Proposal) -> Result<()> {
            let mut reviews = self.reviews.lock().unwrap();
            reviews.open.remove(&proposal.id);
            reviews.closed.push(proposal.id.clone());
            Ok(())
        }

        async fn comment_proposal(&self, proposal: &Proposal, comment: &str) -> Result<()> {
            let mut reviews = self.reviews.lock().unwrap();
            reviews
                .comments
                .push((proposal.id.clone(), comment.to_string()));
            Ok(())
        }

        async fn is_proposal_open(&self, proposal: &Proposal) -> Result<bool> {
            Ok(self.reviews.lock().unwrap().open.contains_key(&proposal.id))
        }
    }

    async fn direct_phase(repo: &Arc<Repository>) -> Arc<GitPhase<App>> {
        GitPhase::<App>::new(
            "checkout",
            Metadata::new("staging"),
            repo.clone(),
            GitPhaseOptions::new(),
        )
        .await
        .unwrap()
    }

    async fn proposing_phase(
        repo: &Arc<Repository>,
        proposer: &Arc<MemoryProposer>,
    ) -> Arc<GitPhase<App>> {
        GitPhase::<App>::new(
            "checkout",
            Metadata::new("staging"),
            repo.clone(),
            GitPhaseOptions::new()
                .with_proposer(proposer.clone())
                .propose_changes(ProposalOptions {
                    labels: vec!["automerge".into()],
                }),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_direct_update_commits_and_records_history() {
        let repo = Repository::in_memory().await.unwrap();
        let phase = direct_phase(&repo).await;
        assert_eq!(phase.get_resource().await.unwrap(), App::default());

        let result = phase
            .update(App::new("nginx@a"), UpdateKind::Update)
            .await
            .unwrap();
        assert_eq!(result.status, glu_common::PromotionStatus::Updated);
        let head = repo.resolve("main").unwrap();
        assert_eq!(
            result.annotations.get(annotations::GIT_HEAD_SHA),
            Some(&head.to_string())
        );
        assert_eq!(
            result.annotations.get(annotations::GIT_BASE_REF).map(String::as_str),
            Some("main")
        );

        assert_eq!(phase.get_resource().await.unwrap(), App::new("nginx@a"));
        let history = phase.history().await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].resource["image"], "nginx@a");
        assert_eq!(
            history[0].annotations.get(annotations::GIT_HEAD_SHA),
            Some(&head.to_string())
        );
    }

    #[tokio::test]
    async fn test_repeated_direct_update_is_no_change() {
        let repo = Repository::in_memory().await.unwrap();
        let phase = direct_phase(&repo).await;
        phase
            .update(App::new("nginx@a"), UpdateKind::Update)
            .await
            .unwrap();
        let head = repo.resolve("main").unwrap();

        let result = phase
            .update(App::new("nginx@a"), UpdateKind::Update)
            .await
            .unwrap();
        assert_eq!(result.status, glu_common::PromotionStatus::NoChange);
        assert_eq!(repo.resolve("main").unwrap(), head);
    }

    #[tokio::test]
    async fn test_rollback_restores_recorded_version() {
        let repo = Repository::in_memory().await.unwrap();
        let phase = direct_phase(&repo).await;
        phase
            .update(App::new("nginx@a"), UpdateKind::Update)
            .await
            .unwrap();
        phase
            .update(App::new("nginx@b"), UpdateKind::Update)
            .await
            .unwrap();

        let history = phase.history().await.unwrap();
        let version_a = history[1].version;
        phase.rollback(version_a).await.unwrap();

        assert_eq!(phase.get_resource().await.unwrap(), App::new("nginx@a"));
        let commit = repo.list_commits("main", None, None).await.unwrap().next();
        assert_eq!(commit.unwrap().unwrap().message, "Rollback staging");
    }

    #[tokio::test]
    async fn test_propose_without_proposer_is_configuration_error() {
        let repo = Repository::in_memory().await.unwrap();
        let phase = GitPhase::<App>::new(
            "checkout",
            Metadata::new("staging"),
            repo.clone(),
            GitPhaseOptions::new().propose_changes(ProposalOptions::default()),
        )
        .await
        .unwrap();

        let err = phase
            .update(App::new("nginx@a"), UpdateKind::Promotion)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[tokio::test]
    async fn test_first_proposal_branches_from_base() {
        let repo = Repository::in_memory().await.unwrap();
        let proposer = Arc::new(MemoryProposer::default());
        let phase = proposing_phase(&repo, &proposer).await;
        let base = repo.resolve("main").unwrap();

        let target = App::new("nginx@b");
        let result = phase
            .update(target.clone(), UpdateKind::Promotion)
            .await
            .unwrap();
        assert_eq!(result.status, glu_common::PromotionStatus::Proposed);
        assert_eq!(
            result.annotations.get(annotations::GIT_PROPOSAL_URL).map(String::as_str),
            Some("https://example.com/pulls/1")
        );

        let reviews = proposer.reviews.lock().unwrap();
        assert_eq!(reviews.created, ["1"]);
        let proposal = &reviews.open["1"];
        let expected_branch = format!("glu/checkout/staging/{}", target.digest().unwrap());
        assert_eq!(proposal.branch, expected_branch);
        assert_eq!(proposal.base_revision, base.to_string());
        assert_eq!(proposal.title, "Promote staging");
        assert!(proposal.body.starts_with("| from | to |"));
        drop(reviews);

        // base untouched, proposal branch carries the change
        assert_eq!(repo.resolve("main").unwrap(), base);
        let proposed = repo
            .view(ViewOptions::branch(expected_branch), |_, fs| {
                Ok(fs.read_to_string("app.json")?)
            })
            .await
            .unwrap();
        assert!(proposed.contains("nginx@b"));
    }

    #[tokio::test]
    async fn test_repeated_proposal_is_idempotent() {
        let repo = Repository::in_memory().await.unwrap();
        let proposer = Arc::new(MemoryProposer::default());
        let phase = proposing_phase(&repo, &proposer).await;
        let target = App::new("nginx@b");
        let branch = format!("glu/checkout/staging/{}", target.digest().unwrap());

        let first = phase
            .update(target.clone(), UpdateKind::Promotion)
            .await
            .unwrap();
        let head = repo.resolve(&branch).unwrap();

        let second = phase.update(target, UpdateKind::Promotion).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(repo.resolve(&branch).unwrap(), head);
        assert_eq!(proposer.reviews.lock().unwrap().created, ["1"]);
    }

    #[tokio::test]
    async fn test_new_digest_on_current_base_updates_open_proposal() {
        let repo = Repository::in_memory().await.unwrap();
        let proposer = Arc::new(MemoryProposer::default());
        let phase = proposing_phase(&repo, &proposer).await;
        let first_target = App::new("nginx@b");
        let branch = format!("glu/checkout/staging/{}", first_target.digest().unwrap());

        phase
            .update(first_target, UpdateKind::Promotion)
            .await
            .unwrap();
        let before = repo.resolve(&branch).unwrap();

        let result = phase
            .update(App::new("nginx@c"), UpdateKind::Promotion)
            .await
            .unwrap();
        let after = repo.resolve(&branch).unwrap();
        assert_ne!(before, after);
        assert_eq!(
            result.annotations.get(annotations::GIT_HEAD_SHA),
            Some(&after.to_string())
        );

        let reviews = proposer.reviews.lock().unwrap();
        assert_eq!(reviews.created, ["1"]);
        assert!(reviews.closed.is_empty());
    }

    #[tokio::test]
    async fn test_advanced_base_replaces_stale_proposal() {
        let repo = Repository::in_memory().await.unwrap();
        let proposer = Arc::new(MemoryProposer::default());
        let phase = proposing_phase(&repo, &proposer).await;
        let target = App::new("nginx@b");

        phase
            .update(target.clone(), UpdateKind::Promotion)
            .await
            .unwrap();

        let advanced = repo
            .update_and_push(UpdateOptions::default(), |fs| {
                fs.write("other.txt", b"unrelated")?;
                Ok("unrelated change".to_string())
            })
            .await
            .unwrap();

        phase.update(target, UpdateKind::Promotion).await.unwrap();

        let reviews = proposer.reviews.lock().unwrap();
        assert_eq!(reviews.created, ["1", "2"]);
        assert_eq!(reviews.closed, ["1"]);
        assert_eq!(
            reviews.comments,
            [(
                "1".to_string(),
                "Closed in favour of new proposal #2".to_string()
            )]
        );
        assert_eq!(reviews.open["2"].base_revision, advanced.to_string());
    }
}
