//! Minimal transactional key/value store with nested buckets.
//!
//! A `Db` exposes read-only (`view`) and read-write (`update`) transaction
//! scopes. Inside a scope the root `Bucket` is the transaction: buckets nest,
//! keys are ordered bytewise, and `range` yields a lazy sequence that can be
//! restarted by calling it again.
//!
//! Two implementations share the same semantics:
//! - `MemoryDb`: `BTreeMap` tree behind an `RwLock`, for tests and
//!   ephemeral deployments
//! - `SqliteDb`: durable storage in a single SQLite file

mod memory;
mod sqlite;

pub use memory::MemoryDb;
pub use sqlite::SqliteDb;

use crate::errors::{Error, Result};

/// A key/value pair yielded by bucket iteration.
pub type Entry = (Vec<u8>, Vec<u8>);

/// Lazy ordered sequence of entries.
pub type EntryIter<'a> = Box<dyn Iterator<Item = Result<Entry>> + 'a>;

/// Iteration order for `Bucket::range`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Ascending,
    Descending,
}

/// Options for `Bucket::range`.
///
/// With a `start` key, ascending iteration begins at the first key `>= start`
/// and descending iteration at the last key `<= start`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeOptions {
    pub order: Order,
    pub start: Option<Vec<u8>>,
}

impl RangeOptions {
    pub fn ascending() -> Self {
        Self::default()
    }

    pub fn descending() -> Self {
        Self {
            order: Order::Descending,
            start: None,
        }
    }

    pub fn with_start(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.start = Some(key.into());
        self
    }
}

/// Read access to a bucket (or the transaction root).
pub trait Bucket {
    /// Nested bucket by name. Fails with `NotFound` if absent.
    fn bucket(&self, name: &[u8]) -> Result<Box<dyn Bucket + '_>>;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Smallest key in the bucket.
    fn first(&self) -> Result<Option<Entry>>;

    /// Greatest key in the bucket.
    fn last(&self) -> Result<Option<Entry>>;

    fn range(&self, options: RangeOptions) -> Result<EntryIter<'_>>;
}

/// Write access to a bucket inside an `update` scope.
pub trait BucketMut: Bucket {
    /// Nested bucket by name. Fails with `NotFound` if absent.
    fn bucket_mut(&mut self, name: &[u8]) -> Result<Box<dyn BucketMut + '_>>;

    /// Nested bucket by name, created when missing. Empty names are rejected.
    fn create_bucket_if_not_exists(&mut self, name: &[u8]) -> Result<Box<dyn BucketMut + '_>>;

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()>;
}

/// A transactional store.
///
/// `update` is atomic: if the closure returns an error nothing it wrote is
/// kept. Writers are serialized.
pub trait Db: Send + Sync {
    fn view(&self, f: &mut dyn FnMut(&dyn Bucket) -> Result<()>) -> Result<()>;

    fn update(&self, f: &mut dyn FnMut(&mut dyn BucketMut) -> Result<()>) -> Result<()>;
}

/// Value-returning wrappers around `Db::view` / `Db::update`.
pub trait DbExt: Db {
    fn read<T>(&self, f: impl FnOnce(&dyn Bucket) -> Result<T>) -> Result<T> {
        let mut f = Some(f);
        let mut out = None;
        self.view(&mut |root| {
            if let Some(f) = f.take() {
                out = Some(f(root)?);
            }
            Ok(())
        })?;
        out.ok_or_else(|| Error::Other(anyhow::anyhow!("view closure did not run")))
    }

    fn write<T>(&self, f: impl FnOnce(&mut dyn BucketMut) -> Result<T>) -> Result<T> {
        let mut f = Some(f);
        let mut out = None;
        self.update(&mut |root| {
            if let Some(f) = f.take() {
                out = Some(f(root)?);
            }
            Ok(())
        })?;
        out.ok_or_else(|| Error::Other(anyhow::anyhow!("update closure did not run")))
    }
}

impl<D: Db + ?Sized> DbExt for D {}

/// Run `f` against the bucket at `path` below `root`.
/// Fails with `NotFound` if any bucket along the path is missing.
pub fn with_bucket<T>(
    root: &dyn Bucket,
    path: &[&[u8]],
    f: impl FnOnce(&dyn Bucket) -> Result<T>,
) -> Result<T> {
    match path.split_first() {
        None => f(root),
        Some((head, rest)) => {
            let child = root.bucket(head)?;
            with_bucket(child.as_ref(), rest, f)
        }
    }
}

/// Run `f` against the bucket at `path` below `root`, creating missing
/// buckets along the way.
pub fn with_bucket_mut<T>(
    root: &mut dyn BucketMut,
    path: &[&[u8]],
    f: impl FnOnce(&mut dyn BucketMut) -> Result<T>,
) -> Result<T> {
    match path.split_first() {
        None => f(root),
        Some((head, rest)) => {
            let mut child = root.create_bucket_if_not_exists(head)?;
            with_bucket_mut(child.as_mut(), rest, f)
        }
    }
}

fn not_found_bucket(name: &[u8]) -> Error {
    Error::not_found("bucket", String::from_utf8_lossy(name).into_owned())
}

fn empty_bucket_name() -> Error {
    Error::Configuration("bucket name cannot be empty".into())
}
