use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;

use common::prelude::{BookmarkError, SlotKey, StoreError};

use crate::rpc::RpcError;
use crate::state::State;
use crate::status::StatusLevel;

/// Attempts before giving up on a mount that never shows up in the
/// engine's live mount list.
const MOUNT_ATTEMPTS: u32 = 3;
const MOUNT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Mount options applied to every slot unless the slot overrides them.
const DEFAULT_MOUNT_OPTIONS: &[(&str, &str)] = &[("vfs-cache-mode", "writes")];

/// A confirmed live mount.
#[derive(Debug, Clone)]
pub struct MountInfo {
    pub mount_point: PathBuf,
    pub remote_spec: String,
    pub mounted_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
enum MountEntry {
    /// Reserved while a mount attempt is in flight; blocks duplicate
    /// starts on the same key.
    Pending,
    Mounted(MountInfo),
}

/// Per-slot mount orchestration over the engine's mount endpoints.
///
/// The `active` map is the single source of truth for what is mounted
/// right now; the bookmark store only records the enabled/disabled intent.
/// Cache entries are mutated strictly after a confirmed engine-side
/// change, so a failed daemon call never leaves a phantom mount behind.
pub struct MountManager {
    state: Arc<State>,
    active: Arc<RwLock<HashMap<SlotKey, MountEntry>>>,
}

impl MountManager {
    pub fn new(state: Arc<State>) -> Self {
        Self {
            state,
            active: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Mount a slot. Mounting an already-mounted slot succeeds without
    /// talking to the engine.
    pub async fn mount(&self, bookmark: &str, slot: &str) -> Result<PathBuf, MountError> {
        let key = SlotKey::new(bookmark, slot);
        {
            let mut active = self.active.write().await;
            match active.get(&key) {
                Some(MountEntry::Mounted(info)) => {
                    tracing::debug!("{} is already mounted at {}", key, info.mount_point.display());
                    return Ok(info.mount_point.clone());
                }
                Some(MountEntry::Pending) => return Err(MountError::InFlight(key)),
                None => {
                    active.insert(key.clone(), MountEntry::Pending);
                }
            }
        }

        match self.mount_inner(&key).await {
            Ok(info) => {
                let mount_point = info.mount_point.clone();
                self.active
                    .write()
                    .await
                    .insert(key.clone(), MountEntry::Mounted(info));
                if let Err(e) = self.state.store().set_mount_enabled(&key.bookmark, &key.slot, true) {
                    tracing::warn!("Failed to persist mount intent for {}: {}", key, e);
                }
                self.state.notify();
                self.state.report(
                    StatusLevel::Info,
                    "Mounted",
                    &format!("{} at {}", key, mount_point.display()),
                );
                Ok(mount_point)
            }
            Err(e) => {
                self.active.write().await.remove(&key);
                self.state
                    .report(StatusLevel::Error, "Mount failed", &format!("{}: {}", key, e));
                Err(e)
            }
        }
    }

    async fn mount_inner(&self, key: &SlotKey) -> Result<MountInfo, MountError> {
        let bookmark = self
            .state
            .store()
            .bookmark(&key.bookmark)?
            .ok_or_else(|| MountError::UnknownBookmark(key.bookmark.clone()))?;
        let slot = self
            .state
            .store()
            .mount_slot(&key.bookmark, &key.slot)?
            .ok_or_else(|| MountError::UnknownSlot(key.clone()))?;

        let mount_point = slot
            .local_path
            .clone()
            .unwrap_or_else(|| self.state.config().mount_base_dir.join(key.to_string()));
        tokio::fs::create_dir_all(&mount_point).await?;

        let remote_spec = bookmark.remote_spec(&slot.remote_sub_path);
        let params = json!({
            "fs": remote_spec,
            "mountPoint": mount_point.to_string_lossy(),
            "mountOpt": options_object(&slot.options),
        });

        for attempt in 1..=MOUNT_ATTEMPTS {
            self.state
                .transport()
                .call("mount/mount", params.clone())
                .await
                .map_err(map_rpc)?;

            if self.verify_mounted(&mount_point).await? {
                tracing::info!("Mounted {} ({}) at {}", key, remote_spec, mount_point.display());
                return Ok(MountInfo {
                    mount_point,
                    remote_spec,
                    mounted_at: Utc::now(),
                });
            }
            tracing::warn!(
                "Mount {} missing from the live mount list (attempt {}/{})",
                key,
                attempt,
                MOUNT_ATTEMPTS
            );
            tokio::time::sleep(MOUNT_RETRY_DELAY).await;
        }
        Err(MountError::VerificationFailed(key.clone()))
    }

    /// Whether the engine reports a live mount at the given path.
    async fn verify_mounted(&self, mount_point: &PathBuf) -> Result<bool, MountError> {
        let value = self
            .state
            .transport()
            .call("mount/listmounts", json!({}))
            .await
            .map_err(map_rpc)?;
        let target = mount_point.to_string_lossy();
        Ok(value["mountPoints"]
            .as_array()
            .map(|mounts| {
                mounts.iter().any(|m| {
                    m.get("MountPoint").and_then(Value::as_str) == Some(target.as_ref())
                })
            })
            .unwrap_or(false))
    }

    /// Unmount a slot. Returns `Ok(false)` without any engine call when
    /// the slot is not mounted.
    pub async fn unmount(&self, bookmark: &str, slot: &str) -> Result<bool, MountError> {
        let key = SlotKey::new(bookmark, slot);
        let info = {
            let active = self.active.read().await;
            match active.get(&key) {
                None => return Ok(false),
                Some(MountEntry::Pending) => return Err(MountError::InFlight(key)),
                Some(MountEntry::Mounted(info)) => info.clone(),
            }
        };

        match self
            .state
            .transport()
            .call(
                "mount/unmount",
                json!({ "mountPoint": info.mount_point.to_string_lossy() }),
            )
            .await
        {
            Ok(_) => {
                self.active.write().await.remove(&key);
                if let Err(e) = self.state.store().set_mount_enabled(&key.bookmark, &key.slot, false)
                {
                    tracing::warn!("Failed to persist unmount intent for {}: {}", key, e);
                }
                self.state.notify();
                self.state
                    .report(StatusLevel::Info, "Unmounted", &key.to_string());
                Ok(true)
            }
            Err(e) => {
                // The cache keeps claiming the mount; the engine still has it.
                let err = map_rpc(e);
                self.state.report(
                    StatusLevel::Error,
                    "Unmount failed",
                    &format!("{}: {}", key, err),
                );
                Err(err)
            }
        }
    }

    /// Mount point of a slot if it is currently mounted. Pure cache read.
    pub async fn mount_status(&self, bookmark: &str, slot: &str) -> Option<PathBuf> {
        let key = SlotKey::new(bookmark, slot);
        match self.active.read().await.get(&key) {
            Some(MountEntry::Mounted(info)) => Some(info.mount_point.clone()),
            _ => None,
        }
    }

    pub async fn active_mounts(&self) -> Vec<(SlotKey, MountInfo)> {
        self.active
            .read()
            .await
            .iter()
            .filter_map(|(key, entry)| match entry {
                MountEntry::Mounted(info) => Some((key.clone(), info.clone())),
                MountEntry::Pending => None,
            })
            .collect()
    }

    pub async fn has_active_for_bookmark(&self, bookmark: &str) -> bool {
        self.active
            .read()
            .await
            .keys()
            .any(|key| key.bookmark == bookmark)
    }

    /// Delete a mount slot record; rejected while the slot is mounted or
    /// a mount attempt is in flight.
    pub async fn delete_slot(&self, bookmark: &str, slot: &str) -> Result<(), MountError> {
        let key = SlotKey::new(bookmark, slot);
        if self.active.read().await.contains_key(&key) {
            return Err(MountError::SlotBusy(key));
        }
        self.state.store().delete_mount_slot(bookmark, slot)?;
        self.state.notify();
        Ok(())
    }

    /// Startup sweep: mount every slot whose stored intent is enabled.
    /// Individual failures are reported and skipped.
    pub async fn restore_enabled(&self) {
        let bookmarks = match self.state.store().bookmarks() {
            Ok(bookmarks) => bookmarks,
            Err(e) => {
                tracing::warn!("Cannot read bookmarks for mount restore: {}", e);
                return;
            }
        };

        for bookmark in bookmarks {
            let slots = match self.state.store().mount_slots(&bookmark.name) {
                Ok(slots) => slots,
                Err(e) => {
                    tracing::warn!("Cannot read mount slots of {}: {}", bookmark.name, e);
                    continue;
                }
            };
            for (slot_id, slot) in slots {
                if !slot.enabled {
                    continue;
                }
                if let Err(e) = self.mount(&bookmark.name, &slot_id).await {
                    tracing::warn!("Restore mount {}.{} failed: {}", bookmark.name, slot_id, e);
                }
            }
        }
    }
}

/// Default options overlaid with the slot's own, as a JSON object.
fn options_object(slot_options: &BTreeMap<String, String>) -> Value {
    let mut merged: BTreeMap<&str, &str> = DEFAULT_MOUNT_OPTIONS.iter().copied().collect();
    for (k, v) in slot_options {
        merged.insert(k.as_str(), v.as_str());
    }
    let mut object = Map::new();
    for (k, v) in merged {
        object.insert(k.to_string(), Value::String(v.to_string()));
    }
    Value::Object(object)
}

fn map_rpc(err: RpcError) -> MountError {
    match err {
        RpcError::Unavailable => MountError::RpcUnavailable,
        other => MountError::Rpc(other),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MountError {
    #[error("unknown bookmark: {0}")]
    UnknownBookmark(String),

    #[error("unknown mount slot: {0}")]
    UnknownSlot(SlotKey),

    #[error("a mount attempt for {0} is already in flight")]
    InFlight(SlotKey),

    #[error("mount slot {0} is busy")]
    SlotBusy(SlotKey),

    #[error("mount {0} never appeared in the live mount list")]
    VerificationFailed(SlotKey),

    #[error("mount requires an active RPC channel")]
    RpcUnavailable,

    #[error(transparent)]
    Rpc(RpcError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Record(#[from] BookmarkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
