use async_trait::async_trait;
use glu_common::{Annotations, annotations};

use crate::errors::Result;

/// One outstanding review request carrying a pending promotion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Proposal {
    /// Assigned by the review system on creation.
    pub id: String,
    pub url: String,
    /// Head of `base_branch` the proposal was computed against.
    pub base_revision: String,
    pub base_branch: String,
    pub branch: String,
    pub head_revision: String,
    /// Digest of the proposed resource.
    pub digest: String,
    pub title: String,
    pub body: String,
    pub annotations: Annotations,
}

impl Proposal {
    /// Annotations describing this proposal on a promotion result.
    pub fn result_annotations(&self) -> Annotations {
        let mut out = Annotations::from([
            (annotations::GIT_PROPOSAL_URL.to_string(), self.url.clone()),
            (annotations::GIT_BASE_REF.to_string(), self.base_branch.clone()),
            (annotations::GIT_HEAD_SHA.to_string(), self.head_revision.clone()),
        ]);
        out.extend(self.annotations.clone());
        out
    }
}

/// Passed to the review system when opening a proposal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProposalOptions {
    pub labels: Vec<String>,
}

/// Review-system collaborator (pull/merge requests).
#[async_trait]
pub trait Proposer: Send + Sync {
    /// The open proposal against `base_branch` whose branch starts with
    /// `branch_prefix`, if any.
    async fn get_current_proposal(
        &self,
        base_branch: &str,
        branch_prefix: &str,
    ) -> Result<Option<Proposal>>;

    /// Open `proposal`, filling in its `id` and `url`.
    async fn create_proposal(&self, proposal: &mut Proposal, options: &ProposalOptions) -> Result<()>;

    async fn close_proposal(&self, proposal: &Proposal) -> Result<()>;

    async fn comment_proposal(&self, proposal: &Proposal, comment: &str) -> Result<()>;

    async fn is_proposal_open(&self, proposal: &Proposal) -> Result<bool>;
}
