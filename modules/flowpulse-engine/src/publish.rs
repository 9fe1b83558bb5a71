//! Publishing sealed snapshots.
//!
//! Each target either shows the complete new snapshot or keeps the previous
//! one. The file target writes a temp file next to the published path and
//! renames it into place while holding an exclusive lock file.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use flowpulse_common::{CanonicalSnapshot, FlowPulseError};
use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use crate::stats::PublishOutcome;

/// Lock files older than this are assumed abandoned by a crashed publisher.
pub const STALE_LOCK_AFTER: Duration = Duration::from_secs(30 * 60);

#[async_trait]
pub trait PublishTarget: Send + Sync {
    fn name(&self) -> &str;
    async fn publish(&self, snapshot: &CanonicalSnapshot) -> Result<(), FlowPulseError>;
}

/// The JSON snapshot file served as the read fallback.
#[derive(Debug, Clone)]
pub struct FileTarget {
    path: PathBuf,
    stale_after: Duration,
}

impl FileTarget {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            stale_after: STALE_LOCK_AFTER,
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "snapshot".into());
        name.push(".lock");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl PublishTarget for FileTarget {
    fn name(&self) -> &str {
        "file"
    }

    async fn publish(&self, snapshot: &CanonicalSnapshot) -> Result<(), FlowPulseError> {
        let body = serde_json::to_vec_pretty(snapshot)?;
        let target = self.clone();
        tokio::task::spawn_blocking(move || target.write_locked(&body))
            .await
            .map_err(|e| FlowPulseError::publish("file", format!("publish task failed: {e}")))?
    }
}

impl FileTarget {
    fn write_locked(&self, body: &[u8]) -> Result<(), FlowPulseError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let lock = LockFile::acquire(self.lock_path(), self.stale_after)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(body)?;
        tmp.as_file().sync_all()?;
        lock.confirm()?;
        tmp.persist(&self.path).map_err(|e| FlowPulseError::Io(e.error))?;
        Ok(())
    }
}

/// Exclusive lock held for the duration of a file publish. Holds a token unique
/// to this holder; removed on drop only while it still holds that token.
struct LockFile {
    path: PathBuf,
    token: String,
}

impl LockFile {
    fn acquire(path: PathBuf, stale_after: Duration) -> Result<Self, FlowPulseError> {
        let token = format!("{} {}", std::process::id(), Uuid::new_v4());
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(token.as_bytes())?;
                    file.sync_all()?;
                    return Ok(Self { path, token });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if !is_stale(&path, stale_after) {
                        return Err(busy(&path));
                    }
                    reclaim(&path, stale_after, &token)?;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(FlowPulseError::publish(
            "file",
            format!("could not acquire {}", path.display()),
        ))
    }

    /// Fails when the lock no longer carries this holder's token.
    fn confirm(&self) -> Result<(), FlowPulseError> {
        match fs::read_to_string(&self.path) {
            Ok(current) if current == self.token => Ok(()),
            _ => Err(FlowPulseError::publish(
                "file",
                format!("lost {} to another publisher", self.path.display()),
            )),
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if self.confirm().is_ok() {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Move a stale lock aside. Only one contender can rename a given lock file;
/// if the file it moved turns out to be fresh (another publisher got there
/// first), it is linked back and the publish reports the lock as busy.
fn reclaim(path: &Path, stale_after: Duration, token: &str) -> Result<(), FlowPulseError> {
    let mut aside = path.as_os_str().to_os_string();
    aside.push(format!(".stale-{}", token.replace(' ', "-")));
    let aside = PathBuf::from(aside);

    match fs::rename(path, &aside) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    }
    if is_stale(&aside, stale_after) {
        warn!(lock = %path.display(), "Reclaimed stale publish lock");
        let _ = fs::remove_file(&aside);
        return Ok(());
    }
    let _ = fs::hard_link(&aside, path);
    let _ = fs::remove_file(&aside);
    Err(busy(path))
}

fn busy(path: &Path) -> FlowPulseError {
    FlowPulseError::publish("file", format!("another publish holds {}", path.display()))
}

fn is_stale(path: &Path, stale_after: Duration) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age >= stale_after)
}

/// Read a published snapshot file. `Ok(None)` when nothing was published yet.
pub fn load_snapshot(path: &Path) -> Result<Option<CanonicalSnapshot>, FlowPulseError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Retry policy for publishing.
#[derive(Debug, Clone, Copy)]
pub struct PublishPolicy {
    pub max_attempts: u32,
    pub retry_base: Duration,
}

impl Default for PublishPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_base: Duration::from_secs(1),
        }
    }
}

/// Publish to one target, retrying with backoff.
pub async fn publish_with_retry(
    target: &dyn PublishTarget,
    snapshot: &CanonicalSnapshot,
    policy: PublishPolicy,
) -> PublishOutcome {
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = String::new();
    for attempt in 0..max_attempts {
        match target.publish(snapshot).await {
            Ok(()) => {
                info!(
                    publish_target = target.name(),
                    version = %snapshot.snapshot_version,
                    workflows = snapshot.workflows.len(),
                    attempts = attempt + 1,
                    "Snapshot published"
                );
                return PublishOutcome {
                    target: target.name().to_string(),
                    attempts: attempt + 1,
                    error: None,
                };
            }
            Err(e) => {
                last_error = e.to_string();
                if attempt + 1 < max_attempts {
                    let backoff = policy.retry_base * 3u32.pow(attempt);
                    warn!(
                        publish_target = target.name(),
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Publish failed, retrying after backoff"
                    );
                    let cap = policy.retry_base.as_millis().min(1000) as u64;
                    let jitter = if cap == 0 {
                        Duration::ZERO
                    } else {
                        Duration::from_millis(rand::rng().random_range(0..cap))
                    };
                    tokio::time::sleep(backoff + jitter).await;
                }
            }
        }
    }
    warn!(publish_target = target.name(), error = %last_error, "Publish failed, previous snapshot left in place");
    PublishOutcome {
        target: target.name().to_string(),
        attempts: max_attempts,
        error: Some(last_error),
    }
}

/// Publish to every target independently. A failing target never blocks the others.
pub async fn publish_all(
    snapshot: &CanonicalSnapshot,
    targets: &[Arc<dyn PublishTarget>],
    policy: PublishPolicy,
) -> Vec<PublishOutcome> {
    let mut outcomes = Vec::with_capacity(targets.len());
    for target in targets {
        outcomes.push(publish_with_retry(target.as_ref(), snapshot, policy).await);
    }
    outcomes
}

/// First failed publish as an error naming its target.
pub fn first_failure(outcomes: &[PublishOutcome]) -> Option<FlowPulseError> {
    outcomes.iter().find_map(|o| {
        o.error
            .as_ref()
            .map(|e| FlowPulseError::publish(o.target.clone(), e.clone()))
    })
}
