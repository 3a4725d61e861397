//! Phase implementations: git branches (read/write) and registry
//! references (read-only).

pub mod git;
pub mod oci;

pub use git::{GitPhase, GitPhaseOptions, GitResource};
pub use oci::{ImageDigest, OciPhase, OciResource, Resolver};
