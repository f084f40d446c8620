//! Crash-resumable record of completed chunks.
//!
//! A checkpoint is a directory:
//!
//! ```text
//! <dir>/manifest.json        fingerprint, timestamps, completed chunk indices
//! <dir>/chunk-000000.json    rows produced by chunk 0
//! <dir>/chunk-000003.json    ...
//! ```
//!
//! Every file is written to a temporary sibling and renamed into place, so a
//! crash leaves either the old or the new version. A chunk counts as
//! completed only once the manifest lists it, which happens after its rows
//! are on disk.

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ParallelError, Result};

const MANIFEST: &str = "manifest.json";
const FORMAT_VERSION: u32 = 1;

/// Default age after which a checkpoint is discarded
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(24 * 60 * 60);

/// Lifecycle of a checkpointed job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointState {
    NotStarted,
    InProgress,
    Completed,
    /// Found on disk in progress from an earlier run
    Interrupted,
}

/// Why an existing checkpoint was not reused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscardReason {
    FingerprintMismatch { expected: String, found: String },
    Expired { created_at: DateTime<Utc> },
    ChunkCountMismatch { expected: usize, found: usize },
    Unreadable(String),
}

impl std::fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscardReason::FingerprintMismatch { expected, found } => {
                write!(f, "configuration fingerprint changed ({} != {})", found, expected)
            }
            DiscardReason::Expired { created_at } => write!(f, "expired (created {})", created_at),
            DiscardReason::ChunkCountMismatch { expected, found } => {
                write!(f, "chunk count changed ({} != {})", found, expected)
            }
            DiscardReason::Unreadable(e) => write!(f, "unreadable manifest: {}", e),
        }
    }
}

/// What `open` found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeStatus {
    /// No checkpoint existed
    Fresh,
    /// A matching checkpoint was found; these chunks need no work
    Resumed { completed: BTreeSet<usize> },
    /// A checkpoint existed but could not be used and was cleared
    Discarded(DiscardReason),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    version: u32,
    fingerprint: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    total_chunks: usize,
    completed: BTreeSet<usize>,
    state: CheckpointState,
}

/// Durable completed-chunk log shared by all workers of one job
#[derive(Debug)]
pub struct CheckpointManager {
    dir: PathBuf,
    manifest: Mutex<Manifest>,
}

fn chunk_file(index: usize) -> String {
    format!("chunk-{:06}.json", index)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

impl CheckpointManager {
    /// Open or create the checkpoint at `dir` for a job.
    ///
    /// An existing checkpoint is reused only when its fingerprint and chunk
    /// count match and it is younger than `expiry`; otherwise it is cleared
    /// and the job restarts from zero.
    pub fn open(
        dir: impl AsRef<Path>,
        fingerprint: &str,
        total_chunks: usize,
        expiry: Duration,
    ) -> Result<(Self, ResumeStatus)> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let now = Utc::now();

        let mut resumed_from: Option<DateTime<Utc>> = None;
        let status = match Self::load_manifest(&dir) {
            None => ResumeStatus::Fresh,
            Some(Err(e)) => ResumeStatus::Discarded(DiscardReason::Unreadable(e)),
            Some(Ok(found)) => {
                let expired = now
                    .signed_duration_since(found.created_at)
                    .to_std()
                    .map(|age| age > expiry)
                    .unwrap_or(false);
                if found.fingerprint != fingerprint {
                    ResumeStatus::Discarded(DiscardReason::FingerprintMismatch {
                        expected: fingerprint.to_string(),
                        found: found.fingerprint,
                    })
                } else if found.total_chunks != total_chunks {
                    ResumeStatus::Discarded(DiscardReason::ChunkCountMismatch {
                        expected: total_chunks,
                        found: found.total_chunks,
                    })
                } else if expired {
                    ResumeStatus::Discarded(DiscardReason::Expired {
                        created_at: found.created_at,
                    })
                } else {
                    // Keep only chunks whose rows actually made it to disk
                    let completed: BTreeSet<usize> = found
                        .completed
                        .into_iter()
                        .filter(|&i| i < total_chunks && dir.join(chunk_file(i)).is_file())
                        .collect();
                    if found.state == CheckpointState::InProgress {
                        info!(
                            dir = %dir.display(),
                            completed = completed.len(),
                            total_chunks,
                            "resuming interrupted job"
                        );
                    }
                    resumed_from = Some(found.created_at);
                    ResumeStatus::Resumed { completed }
                }
            }
        };

        if let ResumeStatus::Discarded(reason) = &status {
            warn!(dir = %dir.display(), %reason, "discarding checkpoint, restarting from zero");
            Self::clear(&dir)?;
        }
        let completed = match &status {
            ResumeStatus::Resumed { completed } => completed.clone(),
            _ => BTreeSet::new(),
        };
        let manifest = Manifest {
            version: FORMAT_VERSION,
            fingerprint: fingerprint.to_string(),
            created_at: resumed_from.unwrap_or(now),
            updated_at: now,
            total_chunks,
            completed,
            state: CheckpointState::InProgress,
        };

        let manager = Self {
            dir,
            manifest: Mutex::new(manifest),
        };
        manager.persist(&manager.lock())?;
        Ok((manager, status))
    }

    /// State a checkpoint directory is in, without opening it for a job
    pub fn inspect(dir: impl AsRef<Path>) -> CheckpointState {
        match Self::load_manifest(dir.as_ref()) {
            None | Some(Err(_)) => CheckpointState::NotStarted,
            Some(Ok(m)) if m.state == CheckpointState::InProgress => CheckpointState::Interrupted,
            Some(Ok(m)) => m.state,
        }
    }

    fn load_manifest(dir: &Path) -> Option<std::result::Result<Manifest, String>> {
        let path = dir.join(MANIFEST);
        if !path.is_file() {
            return None;
        }
        Some(
            fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|text| serde_json::from_str::<Manifest>(&text).map_err(|e| e.to_string()))
                .and_then(|m| {
                    if m.version == FORMAT_VERSION {
                        Ok(m)
                    } else {
                        Err(format!("unsupported checkpoint version {}", m.version))
                    }
                }),
        )
    }

    /// Remove every checkpoint file in `dir`
    fn clear(dir: &Path) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if name == MANIFEST || (name.starts_with("chunk-") && name.contains(".json")) {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Manifest> {
        self.manifest.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, manifest: &Manifest) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(manifest)?;
        write_atomic(&self.dir.join(MANIFEST), &bytes)
    }

    pub fn state(&self) -> CheckpointState {
        self.lock().state
    }

    pub fn completed(&self) -> BTreeSet<usize> {
        self.lock().completed.clone()
    }

    pub fn is_completed(&self, index: usize) -> bool {
        self.lock().completed.contains(&index)
    }

    /// Durably record that chunk `index` finished with `rows`.
    ///
    /// Safe to call from concurrent workers; writes are serialized.
    pub fn record_completion<T: Serialize>(&self, index: usize, rows: &T) -> Result<()> {
        let mut manifest = self.lock();
        if index >= manifest.total_chunks {
            return Err(ParallelError::Checkpoint(format!(
                "chunk {} out of range (total {})",
                index, manifest.total_chunks
            )));
        }
        let bytes = serde_json::to_vec(rows)?;
        write_atomic(&self.dir.join(chunk_file(index)), &bytes)?;

        manifest.completed.insert(index);
        manifest.updated_at = Utc::now();
        self.persist(&manifest)?;
        debug!(chunk = index, completed = manifest.completed.len(), "checkpointed chunk");
        Ok(())
    }

    /// Rows recorded for a completed chunk
    pub fn load_chunk<T: DeserializeOwned>(&self, index: usize) -> Result<T> {
        if !self.is_completed(index) {
            return Err(ParallelError::Checkpoint(format!("chunk {} is not completed", index)));
        }
        let text = fs::read_to_string(self.dir.join(chunk_file(index)))?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Mark the job as finished; the files stay until [`remove`](Self::remove)
    pub fn mark_completed(&self) -> Result<()> {
        let mut manifest = self.lock();
        manifest.state = CheckpointState::Completed;
        manifest.updated_at = Utc::now();
        self.persist(&manifest)
    }

    /// Delete the checkpoint after a successful job
    pub fn remove(self) -> Result<()> {
        Self::clear(&self.dir)?;
        // Leave a caller-owned directory in place if it holds other files
        if fs::read_dir(&self.dir)?.next().is_none() {
            fs::remove_dir(&self.dir)?;
        }
        Ok(())
    }

    /// Explicitly discard any checkpoint in `dir`
    pub fn invalidate(dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        if dir.is_dir() {
            Self::clear(dir)?;
        }
        Ok(())
    }
}
