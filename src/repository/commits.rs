use std::collections::{HashSet, VecDeque};
use std::path::Path;

use chrono::{DateTime, Utc};
use git2::{Oid, Repository};

use crate::errors::Result;

/// Predicate over changed paths used to filter `list_commits`.
pub type PathFilter = Box<dyn Fn(&str) -> bool + Send>;

/// Owned summary of a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub id: Oid,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub time: DateTime<Utc>,
    pub parents: Vec<Oid>,
}

/// Breadth-first walk over commit ancestry.
///
/// Owns its repository handle so it does not borrow from the `Repository`
/// that created it. With a path filter, only commits that change at least
/// one matching path (relative to their first parent) are yielded.
pub struct CommitIter {
    repo: Repository,
    queue: VecDeque<Oid>,
    seen: HashSet<Oid>,
    filter: Option<PathFilter>,
    failed: bool,
}

impl CommitIter {
    pub(crate) fn new(repo: Repository, start: Oid, filter: Option<PathFilter>) -> Self {
        Self {
            repo,
            queue: VecDeque::from([start]),
            seen: HashSet::from([start]),
            filter,
            failed: false,
        }
    }

    fn touches_filtered_path(&self, commit: &git2::Commit<'_>) -> Result<bool> {
        let Some(filter) = &self.filter else {
            return Ok(true);
        };
        let tree = commit.tree()?;
        let parent_tree = match commit.parents().next() {
            Some(parent) => Some(parent.tree()?),
            None => None,
        };
        let diff = self
            .repo
            .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)?;
        Ok(diff.deltas().any(|delta| {
            [delta.new_file().path(), delta.old_file().path()]
                .into_iter()
                .flatten()
                .filter_map(Path::to_str)
                .any(|p| filter(p))
        }))
    }

    fn step(&mut self) -> Result<Option<CommitInfo>> {
        while let Some(oid) = self.queue.pop_front() {
            let commit = self.repo.find_commit(oid)?;
            let parents: Vec<Oid> = commit.parent_ids().collect();
            for parent in &parents {
                if self.seen.insert(*parent) {
                    self.queue.push_back(*parent);
                }
            }

            if !self.touches_filtered_path(&commit)? {
                continue;
            }

            let author = commit.author();
            return Ok(Some(CommitInfo {
                id: oid,
                message: commit.message().unwrap_or_default().to_string(),
                author_name: author.name().unwrap_or_default().to_string(),
                author_email: author.email().unwrap_or_default().to_string(),
                time: DateTime::from_timestamp(commit.time().seconds(), 0).unwrap_or_default(),
                parents,
            }));
        }
        Ok(None)
    }
}

impl Iterator for CommitIter {
    type Item = Result<CommitInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.step() {
            Ok(Some(info)) => Some(Ok(info)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
