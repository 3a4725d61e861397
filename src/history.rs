//! Append-only, content-addressed version log per phase.
//!
//! Layout inside the key/value store:
//!
//! ```text
//! v0/refs/<pipeline>/<phase>/<uuid-v7 text>  -> {"digest": ..., "annotations": {...}}
//! v0/blobs/<pipeline>/<phase>/<digest>       -> encoded resource
//! ```
//!
//! Version keys embed their creation time, so the latest entry is the
//! greatest key and a descending range scan yields history newest-first.
//! Identical resources share one blob. Nothing is ever overwritten.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use glu_common::{Annotations, Descriptor, State};

use crate::core::Resource;
use crate::errors::{Error, Result};
use crate::kv::{Bucket, Db, DbExt, MemoryDb, RangeOptions, with_bucket, with_bucket_mut};

const VERSION_BUCKET: &[u8] = b"v0";
const REFS_BUCKET: &[u8] = b"refs";
const BLOBS_BUCKET: &[u8] = b"blobs";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct VersionRecord {
    digest: String,
    #[serde(default)]
    annotations: Annotations,
}

type PhaseKey = (String, String);

/// Version log over a key/value store.
///
/// The latest-record cache is a per-process optimisation: correctness under
/// concurrent writers comes from re-reading inside the write transaction.
pub struct VersionLog {
    db: Arc<dyn Db>,
    last: Mutex<HashMap<PhaseKey, VersionRecord>>,
}

impl VersionLog {
    pub fn new(db: Arc<dyn Db>) -> Self {
        Self {
            db,
            last: Mutex::new(HashMap::new()),
        }
    }

    /// Version log backed by a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryDb::new()))
    }

    /// Ensure the refs and blobs buckets for `phase` exist.
    pub fn create_log(&self, phase: &Descriptor) -> Result<()> {
        self.db.write(|root| {
            with_bucket_mut(root, &path(REFS_BUCKET, phase), |_| Ok(()))?;
            with_bucket_mut(root, &path(BLOBS_BUCKET, phase), |_| Ok(()))
        })
    }

    /// Record `resource` as the latest state of `phase`.
    ///
    /// Returns `false` without writing when the latest recorded digest already
    /// equals the resource's digest.
    pub fn record_latest<R>(
        &self,
        phase: &Descriptor,
        resource: &R,
        annotations: Annotations,
    ) -> Result<bool>
    where
        R: Resource + Serialize,
    {
        let digest = resource.digest()?;

        let up_to_date = self.db.read(|root| {
            with_bucket(root, &path(REFS_BUCKET, phase), |refs| {
                self.is_up_to_date(refs, phase, &digest)
            })
        })?;
        if up_to_date {
            return Ok(false);
        }

        let record = VersionRecord {
            digest: digest.clone(),
            annotations,
        };
        let encoded_record = serde_json::to_vec(&record).map_err(|source| Error::Encode {
            what: "version record",
            source,
        })?;

        let written = self.db.write(|root| {
            let (up_to_date, last_key) =
                with_bucket_mut(root, &path(REFS_BUCKET, phase), |refs| {
                    // Authoritative re-check: another writer may have landed
                    // since the cached read.
                    match refs.last()? {
                        Some((key, value)) => {
                            let latest = decode_record(&value)?;
                            Ok((latest.digest == digest, Some(key)))
                        }
                        None => Ok((false, None)),
                    }
                })?;
            if up_to_date {
                return Ok(false);
            }

            with_bucket_mut(root, &path(BLOBS_BUCKET, phase), |blobs| {
                if blobs.get(digest.as_bytes())?.is_none() {
                    let data = serde_json::to_vec(resource).map_err(|source| Error::Encode {
                        what: "resource",
                        source,
                    })?;
                    blobs.put(digest.as_bytes(), &data)?;
                }
                Ok(())
            })?;

            let key = next_version_key(last_key.as_deref());
            with_bucket_mut(root, &path(REFS_BUCKET, phase), |refs| {
                refs.put(key.as_bytes(), &encoded_record)
            })?;
            Ok(true)
        })?;

        if written {
            self.last.lock()?.insert(phase_key(phase), record);
            tracing::debug!(
                pipeline = %phase.pipeline,
                phase = %phase.metadata.name,
                digest = %digest,
                "recorded latest version"
            );
        }
        Ok(written)
    }

    /// Latest recorded resource of `phase`.
    pub fn latest_resource<R: DeserializeOwned>(&self, phase: &Descriptor) -> Result<R> {
        Ok(self.latest::<R>(phase)?.resource)
    }

    /// Latest recorded state of `phase`.
    pub fn latest<R: DeserializeOwned>(&self, phase: &Descriptor) -> Result<State<R>> {
        self.db.read(|root| {
            let (key, value) = with_bucket(root, &path(REFS_BUCKET, phase), |refs| refs.last())?
                .ok_or_else(|| Error::not_found("latest version", phase.to_string()))?;
            let version = parse_version_key(&key)?;
            let record = decode_record(&value)?;
            with_bucket(root, &path(BLOBS_BUCKET, phase), |blobs| {
                state_from(version, record, blobs)
            })
        })
    }

    /// Resource exactly as recorded at `version`.
    pub fn resource_at_version<R: DeserializeOwned>(
        &self,
        phase: &Descriptor,
        version: Uuid,
    ) -> Result<R> {
        Ok(self.state_at_version::<R>(phase, version)?.resource)
    }

    /// State recorded at `version`.
    pub fn state_at_version<R: DeserializeOwned>(
        &self,
        phase: &Descriptor,
        version: Uuid,
    ) -> Result<State<R>> {
        let key = version_key(version);
        self.db.read(|root| {
            let value = with_bucket(root, &path(REFS_BUCKET, phase), |refs| {
                refs.get(key.as_bytes())
            })?
            .ok_or_else(|| Error::not_found("version", format!("{phase}@{version}")))?;
            let record = decode_record(&value)?;
            with_bucket(root, &path(BLOBS_BUCKET, phase), |blobs| {
                state_from(version, record, blobs)
            })
        })
    }

    /// Every recorded state of `phase`, newest first.
    pub fn history<R: DeserializeOwned>(&self, phase: &Descriptor) -> Result<Vec<State<R>>> {
        self.db.read(|root| {
            with_bucket(root, &path(REFS_BUCKET, phase), |refs| {
                with_bucket(root, &path(BLOBS_BUCKET, phase), |blobs| {
                    let mut states = Vec::new();
                    for entry in refs.range(RangeOptions::descending())? {
                        let (key, value) = entry?;
                        let version = parse_version_key(&key)?;
                        let record = decode_record(&value)?;
                        states.push(state_from(version, record, blobs)?);
                    }
                    Ok(states)
                })
            })
        })
    }

    fn is_up_to_date<B: Bucket + ?Sized>(
        &self,
        refs: &B,
        phase: &Descriptor,
        digest: &str,
    ) -> Result<bool> {
        let key = phase_key(phase);
        let cached = self.last.lock()?.get(&key).cloned();
        let latest = match cached {
            Some(record) => Some(record),
            None => {
                let fetched = match refs.last()? {
                    Some((_, value)) => Some(decode_record(&value)?),
                    None => None,
                };
                if let Some(record) = &fetched {
                    self.last.lock()?.insert(key, record.clone());
                }
                fetched
            }
        };

        let up_to_date = latest.is_some_and(|record| record.digest == digest);
        if up_to_date {
            tracing::debug!(
                pipeline = %phase.pipeline,
                phase = %phase.metadata.name,
                reason = "no_change",
                "skipped recording latest"
            );
        }
        Ok(up_to_date)
    }
}

impl std::fmt::Debug for VersionLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionLog").finish_non_exhaustive()
    }
}

fn path<'a>(kind: &'a [u8], phase: &'a Descriptor) -> [&'a [u8]; 4] {
    [
        VERSION_BUCKET,
        kind,
        phase.pipeline.as_bytes(),
        phase.metadata.name.as_bytes(),
    ]
}

fn phase_key(phase: &Descriptor) -> PhaseKey {
    (phase.pipeline.clone(), phase.metadata.name.clone())
}

fn version_key(version: Uuid) -> String {
    version.hyphenated().to_string()
}

/// Fresh time-ordered key strictly greater than `last`.
fn next_version_key(last: Option<&[u8]>) -> String {
    loop {
        let key = version_key(Uuid::now_v7());
        match last {
            Some(last) if key.as_bytes() <= last => std::thread::yield_now(),
            _ => return key,
        }
    }
}

fn parse_version_key(key: &[u8]) -> Result<Uuid> {
    let text = std::str::from_utf8(key)
        .map_err(|e| Error::Other(anyhow::anyhow!("version key is not utf-8: {e}")))?;
    Uuid::parse_str(text).map_err(|e| Error::Other(anyhow::anyhow!("invalid version key {text:?}: {e}")))
}

fn decode_record(value: &[u8]) -> Result<VersionRecord> {
    serde_json::from_slice(value).map_err(|source| Error::Decode {
        what: "version record",
        source,
    })
}

fn recorded_at(version: Uuid) -> DateTime<Utc> {
    version
        .get_timestamp()
        .and_then(|ts| {
            let (secs, nanos) = ts.to_unix();
            DateTime::from_timestamp(secs as i64, nanos)
        })
        .unwrap_or_default()
}

fn state_from<R: DeserializeOwned>(
    version: Uuid,
    record: VersionRecord,
    blobs: &dyn Bucket,
) -> Result<State<R>> {
    let blob = blobs
        .get(record.digest.as_bytes())?
        .ok_or_else(|| Error::not_found("blob", record.digest.clone()))?;
    let resource = serde_json::from_slice(&blob).map_err(|source| Error::Decode {
        what: "resource",
        source,
    })?;
    Ok(State {
        version,
        digest: record.digest,
        resource,
        annotations: record.annotations,
        recorded_at: recorded_at(version),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::SqliteDb;
    use glu_common::Metadata;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Image {
        digest: String,
    }

    impl Resource for Image {
        fn digest(&self) -> Result<String> {
            Ok(self.digest.clone())
        }
    }

    fn image(d: &str) -> Image {
        Image {
            digest: d.to_string(),
        }
    }

    fn staging() -> Descriptor {
        Descriptor::new("git", "checkout", Metadata::new("staging"))
    }

    fn count(db: &dyn Db, kind: &[u8], phase: &Descriptor) -> usize {
        db.read(|root| {
            with_bucket(root, &path(kind, phase), |b| {
                Ok(b.range(RangeOptions::ascending())?.count())
            })
        })
        .unwrap()
    }

    #[test]
    fn test_equal_digest_is_not_recorded_twice() {
        let db: Arc<dyn Db> = Arc::new(MemoryDb::new());
        let log = VersionLog::new(db.clone());
        let phase = staging();
        log.create_log(&phase).unwrap();

        assert!(log.record_latest(&phase, &image("a"), Annotations::new()).unwrap());
        assert!(!log.record_latest(&phase, &image("a"), Annotations::new()).unwrap());

        assert_eq!(count(db.as_ref(), REFS_BUCKET, &phase), 1);
        assert_eq!(count(db.as_ref(), BLOBS_BUCKET, &phase), 1);
    }

    #[test]
    fn test_reverting_reuses_blob_but_appends_version() {
        let db: Arc<dyn Db> = Arc::new(MemoryDb::new());
        let log = VersionLog::new(db.clone());
        let phase = staging();
        log.create_log(&phase).unwrap();

        for d in ["a", "b", "a"] {
            log.record_latest(&phase, &image(d), Annotations::new())
                .unwrap();
        }

        assert_eq!(count(db.as_ref(), REFS_BUCKET, &phase), 3);
        assert_eq!(count(db.as_ref(), BLOBS_BUCKET, &phase), 2);
    }

    #[test]
    fn test_history_is_newest_first_and_versions_round_trip() {
        let log = VersionLog::in_memory();
        let phase = staging();
        log.create_log(&phase).unwrap();

        for d in ["a", "b", "c"] {
            let mut annotations = Annotations::new();
            annotations.insert("step".to_string(), d.to_string());
            log.record_latest(&phase, &image(d), annotations).unwrap();
        }

        let history: Vec<State<Image>> = log.history(&phase).unwrap();
        let digests: Vec<_> = history.iter().map(|s| s.digest.as_str()).collect();
        assert_eq!(digests, ["c", "b", "a"]);
        assert!(history.windows(2).all(|w| w[0].version > w[1].version));
        assert_eq!(history[2].annotations.get("step").map(String::as_str), Some("a"));

        for state in &history {
            let at: Image = log.resource_at_version(&phase, state.version).unwrap();
            assert_eq!(at, state.resource);
        }

        let latest: State<Image> = log.latest(&phase).unwrap();
        assert_eq!(latest.resource, image("c"));
        assert_eq!(latest.version, history[0].version);
    }

    #[test]
    fn test_recorded_at_comes_from_version_time() {
        let log = VersionLog::in_memory();
        let phase = staging();
        log.create_log(&phase).unwrap();
        let before = Utc::now() - chrono::Duration::seconds(1);
        log.record_latest(&phase, &image("a"), Annotations::new())
            .unwrap();
        let latest: State<Image> = log.latest(&phase).unwrap();
        assert!(latest.recorded_at >= before);
        assert!(latest.recorded_at <= Utc::now() + chrono::Duration::seconds(1));
    }

    #[test]
    fn test_missing_log_and_version_are_not_found() {
        let log = VersionLog::in_memory();
        let phase = staging();

        let err = log.latest::<Image>(&phase).unwrap_err();
        assert!(err.is_not_found());

        log.create_log(&phase).unwrap();
        let err = log.latest::<Image>(&phase).unwrap_err();
        assert!(err.is_not_found());

        let err = log
            .resource_at_version::<Image>(&phase, Uuid::now_v7())
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_second_writer_sees_first_writers_state() {
        // Two logs over one store model two processes without a shared cache.
        let dir = tempfile::tempdir().unwrap();
        let db: Arc<dyn Db> = Arc::new(SqliteDb::open(&dir.path().join("glu.db")).unwrap());
        let first = VersionLog::new(db.clone());
        let second = VersionLog::new(db.clone());
        let phase = staging();
        first.create_log(&phase).unwrap();

        assert!(first.record_latest(&phase, &image("a"), Annotations::new()).unwrap());
        assert!(!second.record_latest(&phase, &image("a"), Annotations::new()).unwrap());
        assert!(second.record_latest(&phase, &image("b"), Annotations::new()).unwrap());

        let history: Vec<State<Image>> = first.history(&phase).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].digest, "b");
    }
}
