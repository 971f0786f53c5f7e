//! One-to-one peer assignment
//!
//! Instances that must be paired with exactly one peer (for example a
//! server and its standby) record assignments in a small JSON file shared by
//! every invocation on the host: `{instance_id: peer_instance_id}`. The file
//! is rewritten under an exclusive file lock; contention is retried a bounded
//! number of times.

use crate::error::{OperationError, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions, TryLockError};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runtime key holding the assigned peer
pub const PAIRED_INSTANCE_ID: &str = "paired_instance_id";
/// Input overriding the pairing file location
pub const PAIRING_DB: &str = "pairing_db";
/// Input listing candidate peers when no `paired_with` relationship exists
pub const CANDIDATES: &str = "candidates";

const LOCK_ATTEMPTS: u32 = 10;
const LOCK_BACKOFF: Duration = Duration::from_millis(200);

type Assignments = BTreeMap<String, String>;

/// Default pairing file: `<data-local-dir>/stackflow/pairing.json`
pub fn default_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|dir| dir.join("stackflow").join("pairing.json"))
}

#[derive(Debug, Clone)]
pub struct PairingDb {
    path: PathBuf,
}

impl PairingDb {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Pairing file named by the `pairing_db` input, or the default one
    pub fn from_inputs(inputs: &Map<String, Value>) -> Result<Self> {
        let configured = inputs
            .get(PAIRING_DB)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);
        configured
            .or_else(default_path)
            .map(Self::new)
            .ok_or_else(|| {
                OperationError::non_recoverable(
                    "no pairing_db given and no local data directory available",
                )
            })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Assign the first free candidate to `instance_id`
    ///
    /// An instance that already has a peer keeps it. A candidate is free
    /// when it is neither paired itself nor already someone's peer.
    pub async fn assign(&self, instance_id: &str, candidates: &[String]) -> Result<Option<String>> {
        let mut file = self.lock().await?;
        let mut assignments = read(&mut file, &self.path)?;

        if let Some(peer) = assignments.get(instance_id) {
            return Ok(Some(peer.clone()));
        }

        let taken = |candidate: &String| {
            candidate == instance_id
                || assignments.contains_key(candidate)
                || assignments.values().any(|peer| peer == candidate)
        };
        let Some(peer) = candidates.iter().find(|c| !taken(c)).cloned() else {
            return Ok(None);
        };

        assignments.insert(instance_id.to_string(), peer.clone());
        write(&mut file, &self.path, &assignments)?;
        tracing::info!(instance = instance_id, peer = %peer, "peer assigned");
        Ok(Some(peer))
    }

    /// Drop the assignment of `instance_id`, returning the released peer
    pub async fn release(&self, instance_id: &str) -> Result<Option<String>> {
        let mut file = self.lock().await?;
        let mut assignments = read(&mut file, &self.path)?;
        let released = assignments.remove(instance_id);
        if released.is_some() {
            write(&mut file, &self.path, &assignments)?;
            tracing::info!(instance = instance_id, "peer released");
        }
        Ok(released)
    }

    /// Current assignments
    pub async fn assignments(&self) -> Result<Assignments> {
        let mut file = self.lock().await?;
        read(&mut file, &self.path)
    }

    /// Open the file and take the exclusive lock; closing the file releases it
    async fn lock(&self) -> Result<File> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_error(&self.path, e))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| io_error(&self.path, e))?;

        for attempt in 1..=LOCK_ATTEMPTS {
            if try_lock(&file).map_err(|e| io_error(&self.path, e))? {
                return Ok(file);
            }
            tracing::debug!(path = %self.path.display(), attempt, "pairing file is locked, waiting");
            tokio::time::sleep(LOCK_BACKOFF).await;
        }
        Err(OperationError::recoverable(format!(
            "pairing file {} is still locked after {} attempts",
            self.path.display(),
            LOCK_ATTEMPTS
        )))
    }
}

fn io_error(path: &Path, err: std::io::Error) -> OperationError {
    OperationError::non_recoverable(format!("pairing file {}: {}", path.display(), err)).caused_by(err)
}

fn read(file: &mut File, path: &Path) -> Result<Assignments> {
    let mut content = String::new();
    file.seek(SeekFrom::Start(0))
        .and_then(|_| file.read_to_string(&mut content))
        .map_err(|e| io_error(path, e))?;
    if content.trim().is_empty() {
        return Ok(Assignments::new());
    }
    serde_json::from_str(&content).map_err(|e| {
        OperationError::non_recoverable(format!("pairing file {} is corrupt", path.display()))
            .caused_by(e)
    })
}

fn write(file: &mut File, path: &Path, assignments: &Assignments) -> Result<()> {
    let content = serde_json::to_vec_pretty(assignments).map_err(|e| {
        OperationError::non_recoverable("failed to serialize pairing assignments").caused_by(e)
    })?;
    file.set_len(0)
        .and_then(|_| file.seek(SeekFrom::Start(0)))
        .and_then(|_| file.write_all(&content))
        .and_then(|_| file.sync_all())
        .map_err(|e| io_error(path, e))
}

/// Exclusive, non-blocking lock; `false` when another handle holds it
fn try_lock(file: &File) -> std::io::Result<bool> {
    match file.try_lock() {
        Ok(()) => Ok(true),
        Err(TryLockError::WouldBlock) => Ok(false),
        Err(TryLockError::Error(err)) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn candidates(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_assign_picks_first_free_candidate() {
        let dir = TempDir::new().unwrap();
        let db = PairingDb::new(dir.path().join("pairing.json"));

        let first = db.assign("a", &candidates(&["x", "y"])).await.unwrap();
        assert_eq!(first.as_deref(), Some("x"));

        let second = db.assign("b", &candidates(&["x", "y"])).await.unwrap();
        assert_eq!(second.as_deref(), Some("y"));

        let none = db.assign("c", &candidates(&["x", "y"])).await.unwrap();
        assert_eq!(none, None);
    }

    #[tokio::test]
    async fn test_assign_is_stable_and_release_frees_peer() {
        let dir = TempDir::new().unwrap();
        let db = PairingDb::new(dir.path().join("nested").join("pairing.json"));

        db.assign("a", &candidates(&["x"])).await.unwrap();
        assert_eq!(
            db.assign("a", &candidates(&["y"])).await.unwrap().as_deref(),
            Some("x")
        );

        assert_eq!(db.release("a").await.unwrap().as_deref(), Some("x"));
        assert!(db.assignments().await.unwrap().is_empty());
        assert_eq!(
            db.assign("b", &candidates(&["x"])).await.unwrap().as_deref(),
            Some("x")
        );
    }

    #[tokio::test]
    async fn test_held_lock_is_recoverable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pairing.json");
        std::fs::write(&path, "{}").unwrap();
        let holder = File::open(&path).unwrap();
        holder.lock().unwrap();

        let err = PairingDb::new(&path).assign("a", &candidates(&["x"])).await.unwrap_err();
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("still locked"), "{}", err);

        holder.unlock().unwrap();
        let peer = PairingDb::new(&path).assign("a", &candidates(&["x"])).await.unwrap();
        assert_eq!(peer.as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_non_recoverable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pairing.json");
        std::fs::write(&path, "not json").unwrap();
        let err = PairingDb::new(&path).assign("a", &candidates(&["x"])).await.unwrap_err();
        assert!(err.is_non_recoverable());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_lock_contention_is_recoverable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pairing.json");
        let db = PairingDb::new(&path);

        let holder = db.lock().await.unwrap();
        let err = db.release("a").await.unwrap_err();
        assert!(err.is_recoverable());
        drop(holder);
        assert!(db.release("a").await.unwrap().is_none());
    }
}
