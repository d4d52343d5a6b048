use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tokio::time::Instant;

use common::prelude::{SlotKey, StoreError, SyncDirection, SyncMode, SyncSlot};

use crate::rpc::RpcError;
use crate::state::State;
use crate::status::StatusLevel;

/// An engine-side job this manager is responsible for.
#[derive(Debug, Clone)]
pub struct TrackedJob {
    pub job_id: i64,
    pub mode: SyncMode,
    pub started_at: DateTime<Utc>,
    pub last_health_check: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
enum JobEntry {
    /// Reserved while a start (possibly a whole bootstrap) is in flight.
    Pending,
    Running(TrackedJob),
}

/// Drives the bootstrap-then-continuous sync protocol per (bookmark, slot)
/// and supervises the resulting engine jobs.
///
/// The engine's bidirectional command naturally terminates after one
/// reconciliation pass; continuous sync is simulated by relaunching a
/// fresh pass from the health-check sweep whenever the previous one
/// finished cleanly. A recognized safety abort ("too many deletes" class)
/// is healed automatically with a forced-resync pass instead of being
/// surfaced as fatal.
pub struct SyncManager {
    state: Arc<State>,
    jobs: Arc<RwLock<HashMap<SlotKey, JobEntry>>>,
}

impl SyncManager {
    pub fn new(state: Arc<State>) -> Self {
        Self {
            state,
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start syncing a slot.
    ///
    /// An uninitialized bidirectional slot is bootstrapped first: a
    /// conservative one-shot copy from the remote, then a forced-resync
    /// bidirectional pass to establish the baseline. Only after both
    /// succeed does the `initialized` latch flip and the steady-state job
    /// start. The steady job itself is tracked asynchronously, never
    /// awaited.
    pub async fn start(&self, bookmark_name: &str, slot_id: &str) -> Result<(), SyncError> {
        let key = SlotKey::new(bookmark_name, slot_id);
        let bookmark = self
            .state
            .store()
            .bookmark(bookmark_name)?
            .ok_or_else(|| SyncError::UnknownBookmark(bookmark_name.to_string()))?;
        let slot = self
            .state
            .store()
            .sync_slot(bookmark_name, slot_id)?
            .ok_or_else(|| SyncError::UnknownSyncSlot(key.clone()))?;
        if slot.local_path.as_os_str().is_empty() || slot.remote_path.is_empty() {
            return Err(SyncError::MissingPaths(key));
        }

        self.reserve(&key).await?;

        let outcome = self.start_inner(&key, &bookmark.remote_spec(&slot.remote_path), &slot).await;
        match outcome {
            Ok(job) => {
                let job_id = job.job_id;
                self.jobs
                    .write()
                    .await
                    .insert(key.clone(), JobEntry::Running(job));
                self.state.notify();
                self.state.report(
                    StatusLevel::Info,
                    "Sync started",
                    &format!("{} (job {})", key, job_id),
                );
                Ok(())
            }
            Err(e) => {
                self.jobs.write().await.remove(&key);
                self.state
                    .report(StatusLevel::Error, "Sync failed", &format!("{}: {}", key, e));
                Err(e)
            }
        }
    }

    /// Claim the key or reject the start. A tracked job only blocks a new
    /// start if the engine confirms it is still running — a stale
    /// in-memory flag is not trusted.
    async fn reserve(&self, key: &SlotKey) -> Result<(), SyncError> {
        let previous = {
            let mut jobs = self.jobs.write().await;
            match jobs.get(key) {
                Some(JobEntry::Pending) => return Err(SyncError::AlreadyActive(key.clone())),
                Some(JobEntry::Running(job)) => job.clone(),
                None => {
                    jobs.insert(key.clone(), JobEntry::Pending);
                    return Ok(());
                }
            }
        };

        if !self.job_finished(previous.job_id).await? {
            return Err(SyncError::AlreadyActive(key.clone()));
        }

        // The old job is done; take the entry over unless someone raced us.
        let mut jobs = self.jobs.write().await;
        match jobs.get(key) {
            Some(JobEntry::Running(current)) if current.job_id == previous.job_id => {
                jobs.insert(key.clone(), JobEntry::Pending);
                Ok(())
            }
            _ => Err(SyncError::AlreadyActive(key.clone())),
        }
    }

    async fn start_inner(
        &self,
        key: &SlotKey,
        remote_spec: &str,
        slot: &SyncSlot,
    ) -> Result<TrackedJob, SyncError> {
        match slot.mode {
            SyncMode::OneShot => {
                let direction = slot
                    .direction
                    .ok_or_else(|| SyncError::MissingDirection(key.clone()))?;
                let local = slot.local_path.to_string_lossy();
                let (src, dst) = match direction {
                    SyncDirection::Upload => (local.as_ref(), remote_spec),
                    SyncDirection::Download => (remote_spec, local.as_ref()),
                };
                let job_id = self
                    .submit(
                        "sync/copy",
                        json!({
                            "srcFs": src,
                            "dstFs": dst,
                            "_async": true,
                            "_config": {
                                "Transfers": slot.transfers,
                                "Checkers": slot.checkers,
                                "MaxDelete": slot.max_delete,
                            },
                        }),
                    )
                    .await?;
                tracing::info!("One-shot {} sync for {} running as job {}", direction.as_str(), key, job_id);
                Ok(tracked(job_id, SyncMode::OneShot))
            }
            SyncMode::Bidirectional => {
                if !slot.initialized {
                    self.bootstrap(key, remote_spec, slot).await?;
                    self.state.store().set_sync_initialized(&key.bookmark, &key.slot)?;
                    tracing::info!("Sync slot {} initialized", key);
                }
                let job_id = self.submit_bisync(remote_spec, slot, false).await?;
                tracing::info!("Bidirectional sync for {} running as job {}", key, job_id);
                Ok(tracked(job_id, SyncMode::Bidirectional))
            }
        }
    }

    /// First-run sequence: conservative copy from the remote, awaited;
    /// then a forced-resync bidirectional pass, awaited. Failure anywhere
    /// aborts the start and leaves the `initialized` latch untouched so a
    /// retry re-attempts the whole bootstrap.
    async fn bootstrap(
        &self,
        key: &SlotKey,
        remote_spec: &str,
        slot: &SyncSlot,
    ) -> Result<(), SyncError> {
        tracing::info!("Bootstrapping sync slot {}", key);

        // Nothing already present locally is overwritten or deleted.
        let job_id = self
            .submit(
                "sync/copy",
                json!({
                    "srcFs": remote_spec,
                    "dstFs": slot.local_path.to_string_lossy(),
                    "_async": true,
                    "_config": {
                        "IgnoreExisting": true,
                        "CreateEmptySrcDirs": true,
                        "TrackRenames": true,
                        "Transfers": slot.transfers,
                        "Checkers": slot.checkers,
                    },
                }),
            )
            .await?;
        self.wait_for_job(job_id)
            .await
            .map_err(|e| SyncError::Bootstrap {
                stage: "initial copy",
                source: Box::new(e),
            })?;

        let job_id = self.submit_bisync(remote_spec, slot, true).await?;
        self.wait_for_job(job_id)
            .await
            .map_err(|e| SyncError::Bootstrap {
                stage: "baseline resync",
                source: Box::new(e),
            })?;
        Ok(())
    }

    async fn submit_bisync(
        &self,
        remote_spec: &str,
        slot: &SyncSlot,
        resync: bool,
    ) -> Result<i64, SyncError> {
        self.submit(
            "sync/bisync",
            json!({
                "path1": remote_spec,
                "path2": slot.local_path.to_string_lossy(),
                "_async": true,
                "_config": {
                    "Force": true,
                    "CreateEmptySrcDirs": true,
                    "Resilient": true,
                    "IgnoreCase": true,
                    "ConflictResolve": "newer",
                    "Compare": "modtime,size",
                    "ModifyWindow": "2s",
                    "Timeout": "30s",
                    "Transfers": 1,
                    "Checkers": slot.checkers,
                    "MaxDelete": slot.max_delete,
                    "IgnoreListingChecksum": true,
                    "Resync": resync,
                },
            }),
        )
        .await
    }

    /// Submit an asynchronous job and return its engine-assigned id.
    async fn submit(&self, endpoint: &str, params: Value) -> Result<i64, SyncError> {
        let value = self
            .state
            .transport()
            .call_long(endpoint, params)
            .await
            .map_err(map_rpc)?;
        value
            .get("jobid")
            .and_then(Value::as_i64)
            .ok_or_else(|| SyncError::Protocol(format!("{} response carried no jobid", endpoint)))
    }

    /// Poll a job to completion, bounded by the bootstrap timeout.
    async fn wait_for_job(&self, job_id: i64) -> Result<(), SyncError> {
        let deadline = Instant::now() + self.state.config().bootstrap_timeout;
        loop {
            let status = self
                .state
                .transport()
                .call("job/status", json!({ "jobid": job_id }))
                .await
                .map_err(map_rpc)?;

            if status["finished"].as_bool().unwrap_or(false) {
                let error = status["error"].as_str().unwrap_or("");
                if error.is_empty() {
                    return Ok(());
                }
                return Err(SyncError::JobFailed(error.to_string()));
            }
            if Instant::now() >= deadline {
                return Err(SyncError::JobWaitTimeout(job_id));
            }
            tokio::time::sleep(self.state.config().job_poll_interval).await;
        }
    }

    async fn job_finished(&self, job_id: i64) -> Result<bool, SyncError> {
        match self
            .state
            .transport()
            .call("job/status", json!({ "jobid": job_id }))
            .await
        {
            Ok(status) => Ok(status["finished"].as_bool().unwrap_or(false)),
            // A job the engine no longer knows about cannot be running.
            Err(RpcError::Daemon(msg)) if is_job_not_found(&msg) => Ok(true),
            Err(e) => Err(map_rpc(e)),
        }
    }

    /// One pass of the periodic health-check sweep. A failing key never
    /// stops the others from being processed.
    pub async fn health_check(&self) {
        let tracked: Vec<(SlotKey, TrackedJob)> = self
            .jobs
            .read()
            .await
            .iter()
            .filter_map(|(key, entry)| match entry {
                JobEntry::Running(job) => Some((key.clone(), job.clone())),
                JobEntry::Pending => None,
            })
            .collect();

        for (key, job) in tracked {
            if let Err(e) = self.check_job(&key, &job).await {
                tracing::warn!("Health check for {} failed: {}", key, e);
            }
        }
    }

    async fn check_job(&self, key: &SlotKey, job: &TrackedJob) -> Result<(), SyncError> {
        let status = match self
            .state
            .transport()
            .call("job/status", json!({ "jobid": job.job_id }))
            .await
        {
            Ok(status) => status,
            Err(RpcError::Daemon(msg)) if is_job_not_found(&msg) => {
                // Expired on the engine side or the engine restarted;
                // either way there is nothing to supervise any more.
                tracing::debug!("Job {} for {} is gone, clearing", job.job_id, key);
                self.clear_entry(key, job.job_id).await;
                return Ok(());
            }
            Err(e) => return Err(map_rpc(e)),
        };

        if !status["finished"].as_bool().unwrap_or(false) {
            self.touch(key, job.job_id).await;
            return Ok(());
        }

        let error = status["error"].as_str().unwrap_or("");
        if error.is_empty() {
            match job.mode {
                SyncMode::OneShot => {
                    tracing::info!("One-shot sync for {} finished", key);
                    self.clear_entry(key, job.job_id).await;
                    self.state
                        .report(StatusLevel::Info, "Sync finished", &key.to_string());
                }
                SyncMode::Bidirectional => {
                    // One pass done; continuous sync means starting the next.
                    self.relaunch(key, job, false).await?;
                }
            }
        } else if is_abort_signature(error) {
            tracing::warn!(
                "Bidirectional sync for {} aborted ({}), re-establishing baseline",
                key,
                error
            );
            self.state.report(
                StatusLevel::Warning,
                "Sync resync",
                &format!("{}: recovering from aborted run", key),
            );
            self.relaunch(key, job, true).await?;
        } else {
            self.state
                .report(StatusLevel::Error, "Sync failed", &format!("{}: {}", key, error));
            self.clear_entry(key, job.job_id).await;
        }
        Ok(())
    }

    /// Replace a finished job with a fresh bidirectional pass.
    async fn relaunch(&self, key: &SlotKey, old: &TrackedJob, resync: bool) -> Result<(), SyncError> {
        let bookmark = self
            .state
            .store()
            .bookmark(&key.bookmark)?
            .ok_or_else(|| SyncError::UnknownBookmark(key.bookmark.clone()))?;
        let slot = self
            .state
            .store()
            .sync_slot(&key.bookmark, &key.slot)?
            .ok_or_else(|| SyncError::UnknownSyncSlot(key.clone()))?;

        let job_id = self
            .submit_bisync(&bookmark.remote_spec(&slot.remote_path), &slot, resync)
            .await?;
        tracing::debug!(
            "Relaunched sync for {} as job {} (resync: {})",
            key,
            job_id,
            resync
        );

        let mut jobs = self.jobs.write().await;
        match jobs.get(key) {
            Some(JobEntry::Running(current)) if current.job_id == old.job_id => {
                jobs.insert(key.clone(), JobEntry::Running(tracked(job_id, SyncMode::Bidirectional)));
            }
            // Stopped or restarted while we were submitting; leave it be.
            _ => tracing::debug!("Tracked entry for {} changed during relaunch", key),
        }
        drop(jobs);
        self.state.notify();
        Ok(())
    }

    async fn clear_entry(&self, key: &SlotKey, expected_job: i64) {
        let mut jobs = self.jobs.write().await;
        if let Some(JobEntry::Running(current)) = jobs.get(key) {
            if current.job_id == expected_job {
                jobs.remove(key);
            }
        }
        drop(jobs);
        self.state.notify();
    }

    async fn touch(&self, key: &SlotKey, expected_job: i64) {
        let mut jobs = self.jobs.write().await;
        if let Some(JobEntry::Running(current)) = jobs.get_mut(key) {
            if current.job_id == expected_job {
                current.last_health_check = Some(Utc::now());
            }
        }
    }

    /// Stop the tracked job of a slot. Returns `Ok(false)` without any
    /// engine call when nothing is tracked for the key. Once a stop has
    /// been attempted the entry is cleared no matter what the engine said.
    pub async fn stop(&self, bookmark: &str, slot: &str) -> Result<bool, SyncError> {
        let key = SlotKey::new(bookmark, slot);
        let job = {
            let mut jobs = self.jobs.write().await;
            match jobs.get(&key) {
                None => return Ok(false),
                Some(JobEntry::Pending) => return Err(SyncError::StartInFlight(key)),
                Some(JobEntry::Running(job)) => {
                    let job = job.clone();
                    jobs.remove(&key);
                    job
                }
            }
        };

        match self
            .state
            .transport()
            .call("job/stop", json!({ "jobid": job.job_id }))
            .await
        {
            Ok(_) => {}
            Err(RpcError::Daemon(msg)) if is_job_not_found(&msg) => {
                tracing::debug!("Job {} for {} was already gone", job.job_id, key);
            }
            Err(e) => tracing::warn!("Failed to stop job {} for {}: {}", job.job_id, key, e),
        }

        self.state.notify();
        self.state
            .report(StatusLevel::Info, "Sync stopped", &key.to_string());
        Ok(true)
    }

    /// Shutdown sweep: ask the engine to stop every tracked job, all
    /// attempts in flight at once, none blocking the others.
    pub async fn cleanup(&self) {
        let tracked: Vec<(SlotKey, TrackedJob)> = {
            let mut jobs = self.jobs.write().await;
            jobs.drain()
                .filter_map(|(key, entry)| match entry {
                    JobEntry::Running(job) => Some((key, job)),
                    JobEntry::Pending => None,
                })
                .collect()
        };
        if tracked.is_empty() {
            return;
        }

        tracing::info!("Stopping {} tracked sync jobs", tracked.len());
        let stops = tracked.into_iter().map(|(key, job)| {
            let transport = self.state.transport();
            async move {
                match transport.call("job/stop", json!({ "jobid": job.job_id })).await {
                    Ok(_) => tracing::debug!("Stopped job {} for {}", job.job_id, key),
                    Err(e) => {
                        tracing::warn!("Failed to stop job {} for {}: {}", job.job_id, key, e)
                    }
                }
            }
        });
        join_all(stops).await;
        self.state.notify();
    }

    pub async fn sync_status(&self, bookmark: &str, slot: &str) -> Option<TrackedJob> {
        let key = SlotKey::new(bookmark, slot);
        match self.jobs.read().await.get(&key) {
            Some(JobEntry::Running(job)) => Some(job.clone()),
            _ => None,
        }
    }

    pub async fn active_jobs(&self) -> Vec<(SlotKey, TrackedJob)> {
        self.jobs
            .read()
            .await
            .iter()
            .filter_map(|(key, entry)| match entry {
                JobEntry::Running(job) => Some((key.clone(), job.clone())),
                JobEntry::Pending => None,
            })
            .collect()
    }

    pub async fn has_active_for_bookmark(&self, bookmark: &str) -> bool {
        self.jobs
            .read()
            .await
            .keys()
            .any(|key| key.bookmark == bookmark)
    }

    /// Delete a sync slot record; rejected while the slot has a tracked
    /// job or a start in flight.
    pub async fn delete_slot(&self, bookmark: &str, slot: &str) -> Result<(), SyncError> {
        let key = SlotKey::new(bookmark, slot);
        if self.jobs.read().await.contains_key(&key) {
            return Err(SyncError::AlreadyActive(key));
        }
        self.state.store().delete_sync_slot(bookmark, slot)?;
        self.state.notify();
        Ok(())
    }
}

fn tracked(job_id: i64, mode: SyncMode) -> TrackedJob {
    TrackedJob {
        job_id,
        mode,
        started_at: Utc::now(),
        last_health_check: None,
    }
}

fn is_job_not_found(message: &str) -> bool {
    message.to_ascii_lowercase().contains("job not found")
}

/// The engine's bidirectional safety abort, recognizable by its error
/// text. Recoverable by a forced resync, unlike other sync failures.
fn is_abort_signature(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("too many deletes") || message.contains("too many changes")
}

fn map_rpc(err: RpcError) -> SyncError {
    match err {
        RpcError::Unavailable => SyncError::RpcUnavailable,
        other => SyncError::Rpc(other),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("unknown bookmark: {0}")]
    UnknownBookmark(String),

    #[error("unknown sync slot: {0}")]
    UnknownSyncSlot(SlotKey),

    #[error("sync slot {0} has no local or remote path")]
    MissingPaths(SlotKey),

    #[error("one-shot sync slot {0} has no direction")]
    MissingDirection(SlotKey),

    #[error("sync for {0} is already active")]
    AlreadyActive(SlotKey),

    #[error("a sync start for {0} is still in flight")]
    StartInFlight(SlotKey),

    #[error("bootstrap {stage} failed: {source}")]
    Bootstrap {
        stage: &'static str,
        source: Box<SyncError>,
    },

    #[error("sync job failed: {0}")]
    JobFailed(String),

    #[error("gave up waiting for job {0}")]
    JobWaitTimeout(i64),

    #[error("malformed engine response: {0}")]
    Protocol(String),

    #[error("sync requires an active RPC channel")]
    RpcUnavailable,

    #[error(transparent)]
    Rpc(RpcError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{scripted_state, RecordingSink, ScriptedTransport};
    use common::prelude::Bookmark;

    struct Fixture {
        _dir: tempfile::TempDir,
        transport: Arc<ScriptedTransport>,
        sink: Arc<RecordingSink>,
        state: Arc<State>,
        manager: SyncManager,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new();
        let sink = Arc::new(RecordingSink::new());
        let state = scripted_state(dir.path(), transport.clone(), sink.clone());
        state
            .store()
            .set_bookmark(&Bookmark::new("remote1", "sftp").unwrap())
            .unwrap();
        let manager = SyncManager::new(state.clone());
        Fixture {
            _dir: dir,
            transport,
            sink,
            state,
            manager,
        }
    }

    fn seed_bidirectional(fx: &Fixture, initialized: bool) {
        let mut slot = SyncSlot::bidirectional("/home/u/work", "backup");
        slot.initialized = initialized;
        fx.state.store().set_sync_slot("remote1", "work", &slot).unwrap();
    }

    fn finished_ok() -> Value {
        json!({ "finished": true, "error": "" })
    }

    #[tokio::test]
    async fn bootstrap_runs_copy_then_resync_then_steady() {
        let fx = fixture();
        seed_bidirectional(&fx, false);

        fx.transport.script("sync/copy", Ok(json!({ "jobid": 1 })));
        fx.transport.script("job/status", Ok(finished_ok()));
        fx.transport.script("sync/bisync", Ok(json!({ "jobid": 2 })));
        fx.transport.script("job/status", Ok(finished_ok()));
        fx.transport.script("sync/bisync", Ok(json!({ "jobid": 3 })));

        fx.manager.start("remote1", "work").await.unwrap();

        assert_eq!(
            fx.transport.endpoints(),
            vec![
                "sync/copy",
                "job/status",
                "sync/bisync",
                "job/status",
                "sync/bisync"
            ]
        );

        let calls = fx.transport.calls();
        // The initial copy never clobbers existing local files.
        assert_eq!(calls[0].1["_config"]["IgnoreExisting"], json!(true));
        assert_eq!(calls[0].1["srcFs"], json!("remote1:backup"));
        // Baseline pass is forced-resync, steady pass is not.
        assert_eq!(calls[2].1["_config"]["Resync"], json!(true));
        assert_eq!(calls[4].1["_config"]["Resync"], json!(false));

        // The latch flipped and the steady job is the tracked one.
        let slot = fx.state.store().sync_slot("remote1", "work").unwrap().unwrap();
        assert!(slot.initialized);
        let job = fx.manager.sync_status("remote1", "work").await.unwrap();
        assert_eq!(job.job_id, 3);
    }

    #[tokio::test]
    async fn second_start_is_rejected_while_job_runs() {
        let fx = fixture();
        seed_bidirectional(&fx, true);

        fx.transport.script("sync/bisync", Ok(json!({ "jobid": 7 })));
        fx.manager.start("remote1", "work").await.unwrap();

        // The tracked job reports as still running when re-queried.
        fx.transport
            .script("job/status", Ok(json!({ "finished": false })));
        let err = fx.manager.start("remote1", "work").await.unwrap_err();
        assert!(matches!(err, SyncError::AlreadyActive(_)));
    }

    #[tokio::test]
    async fn failed_bootstrap_copy_leaves_the_latch_unset() {
        let fx = fixture();
        seed_bidirectional(&fx, false);

        fx.transport.script("sync/copy", Ok(json!({ "jobid": 1 })));
        fx.transport
            .script("job/status", Ok(json!({ "finished": true, "error": "connection lost" })));

        let err = fx.manager.start("remote1", "work").await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Bootstrap {
                stage: "initial copy",
                ..
            }
        ));

        // No resync, no steady job, latch untouched.
        assert_eq!(fx.transport.endpoints(), vec!["sync/copy", "job/status"]);
        let slot = fx.state.store().sync_slot("remote1", "work").unwrap().unwrap();
        assert!(!slot.initialized);
        assert!(fx.manager.sync_status("remote1", "work").await.is_none());
    }

    #[tokio::test]
    async fn initialized_slot_skips_bootstrap() {
        let fx = fixture();
        seed_bidirectional(&fx, true);

        fx.transport.script("sync/bisync", Ok(json!({ "jobid": 5 })));
        fx.manager.start("remote1", "work").await.unwrap();

        assert_eq!(fx.transport.endpoints(), vec!["sync/bisync"]);
        let calls = fx.transport.calls();
        assert_eq!(calls[0].1["_config"]["Resync"], json!(false));
    }

    #[tokio::test]
    async fn one_shot_start_tracks_without_waiting() {
        let fx = fixture();
        let slot = SyncSlot::one_shot("/home/u/photos", "photos", SyncDirection::Upload);
        fx.state.store().set_sync_slot("remote1", "photos", &slot).unwrap();

        fx.transport.script("sync/copy", Ok(json!({ "jobid": 11 })));
        fx.manager.start("remote1", "photos").await.unwrap();

        assert_eq!(fx.transport.endpoints(), vec!["sync/copy"]);
        let calls = fx.transport.calls();
        assert_eq!(calls[0].1["srcFs"], json!("/home/u/photos"));
        assert_eq!(calls[0].1["dstFs"], json!("remote1:photos"));
        assert_eq!(
            fx.manager.sync_status("remote1", "photos").await.unwrap().job_id,
            11
        );
    }

    #[tokio::test]
    async fn health_check_relaunches_finished_bidirectional_jobs() {
        let fx = fixture();
        seed_bidirectional(&fx, true);

        fx.transport.script("sync/bisync", Ok(json!({ "jobid": 7 })));
        fx.manager.start("remote1", "work").await.unwrap();

        fx.transport.script("job/status", Ok(finished_ok()));
        fx.transport.script("sync/bisync", Ok(json!({ "jobid": 8 })));
        fx.manager.health_check().await;

        let job = fx.manager.sync_status("remote1", "work").await.unwrap();
        assert_eq!(job.job_id, 8);
        let calls = fx.transport.calls();
        assert_eq!(calls.last().unwrap().1["_config"]["Resync"], json!(false));
    }

    #[tokio::test]
    async fn health_check_clears_finished_one_shot_jobs() {
        let fx = fixture();
        let slot = SyncSlot::one_shot("/home/u/photos", "photos", SyncDirection::Download);
        fx.state.store().set_sync_slot("remote1", "photos", &slot).unwrap();

        fx.transport.script("sync/copy", Ok(json!({ "jobid": 4 })));
        fx.manager.start("remote1", "photos").await.unwrap();

        fx.transport.script("job/status", Ok(finished_ok()));
        fx.manager.health_check().await;

        assert!(fx.manager.sync_status("remote1", "photos").await.is_none());
        // No relaunch happened.
        assert_eq!(fx.transport.endpoints(), vec!["sync/copy", "job/status"]);
    }

    #[tokio::test]
    async fn health_check_clears_jobs_unknown_to_the_engine() {
        let fx = fixture();
        seed_bidirectional(&fx, true);

        fx.transport.script("sync/bisync", Ok(json!({ "jobid": 7 })));
        fx.manager.start("remote1", "work").await.unwrap();
        fx.sink.clear();

        fx.transport
            .script("job/status", Err(RpcError::Daemon("job not found".to_string())));
        fx.manager.health_check().await;

        assert!(fx.manager.sync_status("remote1", "work").await.is_none());
        // Cleared silently: no user-visible error was reported.
        assert!(fx
            .sink
            .events()
            .iter()
            .all(|(level, _, _)| *level != StatusLevel::Error));
    }

    #[tokio::test]
    async fn abort_signature_triggers_forced_resync() {
        let fx = fixture();
        seed_bidirectional(&fx, true);

        fx.transport.script("sync/bisync", Ok(json!({ "jobid": 7 })));
        fx.manager.start("remote1", "work").await.unwrap();

        fx.transport.script(
            "job/status",
            Ok(json!({
                "finished": true,
                "error": "bisync aborted: too many deletes, run resync to recover"
            })),
        );
        fx.transport.script("sync/bisync", Ok(json!({ "jobid": 9 })));
        fx.manager.health_check().await;

        let job = fx.manager.sync_status("remote1", "work").await.unwrap();
        assert_eq!(job.job_id, 9);
        let calls = fx.transport.calls();
        assert_eq!(calls.last().unwrap().1["_config"]["Resync"], json!(true));
    }

    #[tokio::test]
    async fn other_errors_clear_without_restart() {
        let fx = fixture();
        seed_bidirectional(&fx, true);

        fx.transport.script("sync/bisync", Ok(json!({ "jobid": 7 })));
        fx.manager.start("remote1", "work").await.unwrap();

        fx.transport.script(
            "job/status",
            Ok(json!({ "finished": true, "error": "permission denied" })),
        );
        fx.manager.health_check().await;

        assert!(fx.manager.sync_status("remote1", "work").await.is_none());
        // job/status was the last call: no new job was submitted.
        assert_eq!(fx.transport.endpoints().last().unwrap(), "job/status");
        assert!(fx
            .sink
            .events()
            .iter()
            .any(|(level, _, _)| *level == StatusLevel::Error));
    }

    #[tokio::test]
    async fn stop_on_unknown_key_is_not_active() {
        let fx = fixture();
        assert!(!fx.manager.stop("remote1", "work").await.unwrap());
        assert!(fx.transport.endpoints().is_empty());
    }

    #[tokio::test]
    async fn stop_clears_entry_even_when_job_is_gone() {
        let fx = fixture();
        seed_bidirectional(&fx, true);

        fx.transport.script("sync/bisync", Ok(json!({ "jobid": 7 })));
        fx.manager.start("remote1", "work").await.unwrap();

        fx.transport
            .script("job/stop", Err(RpcError::Daemon("job not found".to_string())));
        assert!(fx.manager.stop("remote1", "work").await.unwrap());
        assert!(fx.manager.sync_status("remote1", "work").await.is_none());
    }

    #[tokio::test]
    async fn cleanup_stops_every_tracked_job() {
        let fx = fixture();
        seed_bidirectional(&fx, true);
        let slot = SyncSlot::one_shot("/home/u/photos", "photos", SyncDirection::Upload);
        fx.state.store().set_sync_slot("remote1", "photos", &slot).unwrap();

        fx.transport.script("sync/bisync", Ok(json!({ "jobid": 7 })));
        fx.transport.script("sync/copy", Ok(json!({ "jobid": 8 })));
        fx.manager.start("remote1", "work").await.unwrap();
        fx.manager.start("remote1", "photos").await.unwrap();

        // One stop fails; the other must still go through.
        fx.transport
            .script("job/stop", Err(RpcError::Daemon("job not found".to_string())));
        fx.transport.script("job/stop", Ok(json!({})));
        fx.manager.cleanup().await;

        assert!(fx.manager.active_jobs().await.is_empty());
        let stops = fx
            .transport
            .endpoints()
            .iter()
            .filter(|e| e.as_str() == "job/stop")
            .count();
        assert_eq!(stops, 2);
    }

    #[tokio::test]
    async fn start_requires_paths() {
        let fx = fixture();
        let mut slot = SyncSlot::bidirectional("/home/u/work", "backup");
        slot.remote_path = String::new();
        fx.state.store().set_sync_slot("remote1", "work", &slot).unwrap();

        let err = fx.manager.start("remote1", "work").await.unwrap_err();
        assert!(matches!(err, SyncError::MissingPaths(_)));
        assert!(fx.transport.endpoints().is_empty());
    }

    #[tokio::test]
    async fn start_on_unknown_bookmark_fails_before_any_call() {
        let fx = fixture();
        let err = fx.manager.start("nope", "work").await.unwrap_err();
        assert!(matches!(err, SyncError::UnknownBookmark(_)));
        assert!(fx.transport.endpoints().is_empty());
    }

    #[tokio::test]
    async fn delete_slot_is_rejected_while_active() {
        let fx = fixture();
        seed_bidirectional(&fx, true);

        fx.transport.script("sync/bisync", Ok(json!({ "jobid": 7 })));
        fx.manager.start("remote1", "work").await.unwrap();

        let err = fx.manager.delete_slot("remote1", "work").await.unwrap_err();
        assert!(matches!(err, SyncError::AlreadyActive(_)));

        fx.transport.script("job/stop", Ok(json!({})));
        fx.manager.stop("remote1", "work").await.unwrap();
        fx.manager.delete_slot("remote1", "work").await.unwrap();
        assert!(fx.state.store().sync_slot("remote1", "work").unwrap().is_none());
    }
}
