pub mod cli;
pub mod config;
pub mod core;
pub mod edges;
pub mod errors;
pub mod fs;
pub mod history;
pub mod kv;
pub mod logging;
pub mod phases;
pub mod repository;
pub mod triggers;

pub use errors::{Error, Result};
pub use glu_common::{
    Annotations, Descriptor, Metadata, PromotionResult, PromotionStatus, State, UpdateKind,
    annotations,
};
