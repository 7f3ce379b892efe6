//! core::state
//!
//! Persisted build state: the last built revision of every tracked ref.
//!
//! # Storage
//!
//! One JSON document per project at `<root>/state/build-state.json`:
//!
//! ```json
//! {
//!   "version": 1,
//!   "last_built": "refs/heads/master",
//!   "records": {
//!     "refs/heads/master": {
//!       "ref": "refs/heads/master",
//!       "built_revision": "…",
//!       "build_number": 7,
//!       "recorded_at": "2026-01-01T00:00:00Z",
//!       "history": ["…"]
//!     }
//!   }
//! }
//! ```
//!
//! # Invariants
//!
//! - A record is created by the first successful build of its ref and only
//!   ever updated in place after that; normal operation never deletes one.
//! - Writes go to a temporary file that is synced and renamed over the old
//!   document, so a crash or cancelled operation leaves either the old or
//!   the new state, never a torn one.
//! - In-memory state only changes once the write has succeeded.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::types::{Branch, CommitId, TrackedRef};

/// Current on-disk format version.
pub const STATE_VERSION: u32 = 1;

/// Errors from the build state store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read build state '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write build state '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse build state '{path}': {message}")]
    Parse { path: PathBuf, message: String },

    #[error("unsupported build state version {found} (expected {STATE_VERSION})")]
    UnsupportedVersion { found: u32 },
}

/// What was last built for one ref.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
    #[serde(rename = "ref")]
    pub reference: TrackedRef,
    pub built_revision: CommitId,
    pub build_number: u64,
    pub recorded_at: DateTime<Utc>,
    /// Revisions built under this ref before `built_revision`, newest first.
    #[serde(default)]
    pub history: Vec<CommitId>,
}

impl BuildRecord {
    /// True if `revision` was ever built under this ref name.
    pub fn has_built(&self, revision: &CommitId) -> bool {
        &self.built_revision == revision || self.history.contains(revision)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct StateDocument {
    version: u32,
    #[serde(default)]
    last_built: Option<TrackedRef>,
    #[serde(default)]
    records: BTreeMap<TrackedRef, BuildRecord>,
}

/// Build records for one project.
///
/// The store is owned by exactly one project and is only mutated while the
/// project's workspace lock is held.
#[derive(Debug)]
pub struct BuildStateStore {
    path: PathBuf,
    history_limit: usize,
    doc: StateDocument,
}

impl BuildStateStore {
    /// Open the store at `path`. A missing file is an empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>, history_limit: usize) -> Result<Self, StoreError> {
        let path = path.into();
        let doc = match fs::read_to_string(&path) {
            Ok(content) => {
                let doc: StateDocument =
                    serde_json::from_str(&content).map_err(|e| StoreError::Parse {
                        path: path.clone(),
                        message: e.to_string(),
                    })?;
                if doc.version != STATE_VERSION {
                    return Err(StoreError::UnsupportedVersion { found: doc.version });
                }
                doc
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StateDocument {
                version: STATE_VERSION,
                ..Default::default()
            },
            Err(source) => return Err(StoreError::Read { path, source }),
        };

        Ok(Self {
            path,
            history_limit,
            doc,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The record for a ref, if it was ever built.
    pub fn get(&self, reference: &TrackedRef) -> Option<&BuildRecord> {
        self.doc.records.get(reference)
    }

    /// All records, ordered by full ref name.
    pub fn records(&self) -> impl Iterator<Item = &BuildRecord> {
        self.doc.records.values()
    }

    pub fn is_empty(&self) -> bool {
        self.doc.records.is_empty()
    }

    /// The record of the ref built most recently.
    pub fn last_built(&self) -> Option<&BuildRecord> {
        self.doc
            .last_built
            .as_ref()
            .and_then(|r| self.doc.records.get(r))
    }

    /// Record a successful build of `built`.
    ///
    /// `contained` lists other refs observed at build time whose tips the
    /// build contains; those without a record get one at their observed tip.
    /// Existing records for them are left alone.
    pub fn record_build(
        &mut self,
        built: &Branch,
        build_number: u64,
        contained: &[Branch],
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut doc = self.doc.clone();

        upsert(&mut doc, built, build_number, now, self.history_limit);
        for branch in contained {
            if !doc.records.contains_key(&branch.reference) {
                upsert(&mut doc, branch, build_number, now, self.history_limit);
            }
        }
        doc.last_built = Some(built.reference.clone());

        self.persist(doc)
    }

    /// Record a ref the build itself moved (the publish target).
    ///
    /// Does not change which ref counts as last built.
    pub fn record_published(
        &mut self,
        published: &Branch,
        build_number: u64,
    ) -> Result<(), StoreError> {
        let mut doc = self.doc.clone();
        upsert(&mut doc, published, build_number, Utc::now(), self.history_limit);
        self.persist(doc)
    }

    fn persist(&mut self, doc: StateDocument) -> Result<(), StoreError> {
        write_atomic(&self.path, &doc)?;
        self.doc = doc;
        Ok(())
    }
}

fn upsert(
    doc: &mut StateDocument,
    branch: &Branch,
    build_number: u64,
    now: DateTime<Utc>,
    history_limit: usize,
) {
    match doc.records.get_mut(&branch.reference) {
        Some(record) => {
            if record.built_revision != branch.revision {
                let previous = record.built_revision.clone();
                record.history.retain(|r| r != &previous && r != &branch.revision);
                record.history.insert(0, previous);
                record.history.truncate(history_limit);
                record.built_revision = branch.revision.clone();
            }
            record.build_number = build_number;
            record.recorded_at = now;
        }
        None => {
            doc.records.insert(
                branch.reference.clone(),
                BuildRecord {
                    reference: branch.reference.clone(),
                    built_revision: branch.revision.clone(),
                    build_number,
                    recorded_at: now,
                    history: Vec::new(),
                },
            );
        }
    }
}

fn write_atomic(path: &Path, doc: &StateDocument) -> Result<(), StoreError> {
    let write_err = |source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(write_err)?;

    let content = serde_json::to_string_pretty(doc).map_err(|e| StoreError::Write {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
    })?;

    let tmp = dir.join(format!(".build-state.{}.tmp", uuid::Uuid::new_v4()));
    let result = (|| {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result.map_err(write_err)
}
