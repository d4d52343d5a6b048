use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use ini::Ini;
use parking_lot::Mutex;

use crate::bookmark::{
    mount_section_name, sync_section_name, Bookmark, BookmarkError, MountSlot, SyncSlot,
    DEFAULT_MOUNT_SLOT,
};

/// Record store over the engine's INI config file.
///
/// Bookmarks live in sections named after them; slot records live in
/// synthetic sections `<bookmark>.mount_<slot>` and `<bookmark>.sync_<slot>`.
///
/// The file is also edited by hand and by the engine itself: concurrent
/// external writers are last-writer-wins and not guarded against. Writes
/// from this process all pass through [`ConfigStore::with_doc_mut`], which
/// serializes them behind one lock so the process cannot race itself.
pub struct ConfigStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fetch one record by section name.
    pub fn get(&self, name: &str) -> Result<Option<BTreeMap<String, String>>, StoreError> {
        let _guard = self.lock.lock();
        let doc = self.load_doc()?;
        Ok(section_map(&doc, name))
    }

    /// Write one record, replacing any existing section of the same name.
    pub fn set(&self, name: &str, record: &BTreeMap<String, String>) -> Result<(), StoreError> {
        self.with_doc_mut(|doc| {
            doc.delete(Some(name));
            for (k, v) in record {
                doc.set_to(Some(name), k.clone(), v.clone());
            }
        })
    }

    /// Delete one record. Returns whether a section was removed.
    pub fn delete(&self, name: &str) -> Result<bool, StoreError> {
        self.with_doc_mut(|doc| doc.delete(Some(name)).is_some())
    }

    /// Full dump of every section.
    pub fn dump(&self) -> Result<BTreeMap<String, BTreeMap<String, String>>, StoreError> {
        let _guard = self.lock.lock();
        let doc = self.load_doc()?;
        let mut out = BTreeMap::new();
        for (section, props) in doc.iter() {
            if let Some(name) = section {
                out.insert(
                    name.to_string(),
                    props
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                );
            }
        }
        Ok(out)
    }

    // ===== Bookmark records =====

    pub fn bookmark(&self, name: &str) -> Result<Option<Bookmark>, StoreError> {
        match self.get(name)? {
            Some(section) => Ok(Some(Bookmark::from_section(name, &section)?)),
            None => Ok(None),
        }
    }

    pub fn set_bookmark(&self, bookmark: &Bookmark) -> Result<(), StoreError> {
        self.set(&bookmark.name, &bookmark.to_section())
    }

    /// All bookmark records (sections without a slot namespace).
    pub fn bookmarks(&self) -> Result<Vec<Bookmark>, StoreError> {
        let mut out = Vec::new();
        for (name, section) in self.dump()? {
            if name.contains('.') {
                continue;
            }
            match Bookmark::from_section(&name, &section) {
                Ok(bookmark) => out.push(bookmark),
                Err(e) => tracing::warn!("Skipping malformed bookmark section {}: {}", name, e),
            }
        }
        Ok(out)
    }

    /// Delete a bookmark together with all of its slot records.
    ///
    /// Liveness checks (nothing mounted, no sync running) are the caller's
    /// responsibility; the store only knows about records.
    pub fn delete_bookmark(&self, name: &str) -> Result<bool, StoreError> {
        self.with_doc_mut(|doc| {
            let slot_prefix = format!("{}.", name);
            let stale: Vec<String> = doc
                .iter()
                .filter_map(|(section, _)| section)
                .filter(|s| *s == name || s.starts_with(&slot_prefix))
                .map(|s| s.to_string())
                .collect();
            let mut removed = false;
            for section in stale {
                removed |= doc.delete(Some(&section)).is_some();
            }
            removed
        })
    }

    // ===== Mount slot records =====

    /// Fetch a mount slot. The implicit `default` slot always exists, even
    /// when it has never been written.
    pub fn mount_slot(&self, bookmark: &str, slot: &str) -> Result<Option<MountSlot>, StoreError> {
        match self.get(&mount_section_name(bookmark, slot))? {
            Some(section) => Ok(Some(MountSlot::from_section(&section)?)),
            None if slot == DEFAULT_MOUNT_SLOT => Ok(Some(MountSlot::default())),
            None => Ok(None),
        }
    }

    pub fn set_mount_slot(
        &self,
        bookmark: &str,
        slot: &str,
        record: &MountSlot,
    ) -> Result<(), StoreError> {
        self.set(&mount_section_name(bookmark, slot), &record.to_section())
    }

    /// Flip the persisted enabled intent of a mount slot, creating the
    /// record if it does not exist yet.
    pub fn set_mount_enabled(
        &self,
        bookmark: &str,
        slot: &str,
        enabled: bool,
    ) -> Result<(), StoreError> {
        let mut record = self.mount_slot(bookmark, slot)?.unwrap_or_default();
        record.enabled = enabled;
        self.set_mount_slot(bookmark, slot, &record)
    }

    pub fn delete_mount_slot(&self, bookmark: &str, slot: &str) -> Result<bool, StoreError> {
        self.delete(&mount_section_name(bookmark, slot))
    }

    /// All mount slot records of one bookmark, keyed by slot id. The
    /// implicit default slot is included only once written.
    pub fn mount_slots(&self, bookmark: &str) -> Result<Vec<(String, MountSlot)>, StoreError> {
        let prefix = format!("{}.mount_", bookmark);
        let mut out = Vec::new();
        for (name, section) in self.dump()? {
            if let Some(slot) = name.strip_prefix(&prefix) {
                out.push((slot.to_string(), MountSlot::from_section(&section)?));
            }
        }
        Ok(out)
    }

    // ===== Sync slot records =====

    pub fn sync_slot(&self, bookmark: &str, slot: &str) -> Result<Option<SyncSlot>, StoreError> {
        match self.get(&sync_section_name(bookmark, slot))? {
            Some(section) => Ok(Some(SyncSlot::from_section(&section)?)),
            None => Ok(None),
        }
    }

    pub fn set_sync_slot(
        &self,
        bookmark: &str,
        slot: &str,
        record: &SyncSlot,
    ) -> Result<(), StoreError> {
        self.set(&sync_section_name(bookmark, slot), &record.to_section())
    }

    /// Latch the one-way `initialized` flag of a sync slot.
    pub fn set_sync_initialized(&self, bookmark: &str, slot: &str) -> Result<(), StoreError> {
        let mut record = self
            .sync_slot(bookmark, slot)?
            .ok_or_else(|| StoreError::NotFound(sync_section_name(bookmark, slot)))?;
        record.initialized = true;
        self.set_sync_slot(bookmark, slot, &record)
    }

    pub fn delete_sync_slot(&self, bookmark: &str, slot: &str) -> Result<bool, StoreError> {
        self.delete(&sync_section_name(bookmark, slot))
    }

    pub fn sync_slots(&self, bookmark: &str) -> Result<Vec<(String, SyncSlot)>, StoreError> {
        let prefix = format!("{}.sync_", bookmark);
        let mut out = Vec::new();
        for (name, section) in self.dump()? {
            if let Some(slot) = name.strip_prefix(&prefix) {
                out.push((slot.to_string(), SyncSlot::from_section(&section)?));
            }
        }
        Ok(out)
    }

    // ===== Internals =====

    fn load_doc(&self) -> Result<Ini, StoreError> {
        if !self.path.exists() {
            return Ok(Ini::new());
        }
        Ini::load_from_file(&self.path).map_err(|e| match e {
            ini::Error::Io(io) => StoreError::Io(io),
            ini::Error::Parse(parse) => StoreError::Parse(parse.to_string()),
        })
    }

    /// The single read-modify-write chokepoint every in-process writer
    /// goes through.
    fn with_doc_mut<T>(&self, f: impl FnOnce(&mut Ini) -> T) -> Result<T, StoreError> {
        let _guard = self.lock.lock();
        let mut doc = self.load_doc()?;
        let out = f(&mut doc);
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        doc.write_to_file(&self.path)?;
        Ok(out)
    }
}

fn section_map(doc: &Ini, name: &str) -> Option<BTreeMap<String, String>> {
    doc.section(Some(name)).map(|props| {
        props
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    })
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("config parse error: {0}")]
    Parse(String),

    #[error("malformed record: {0}")]
    Record(#[from] BookmarkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bookmark::SyncMode;
    use std::path::PathBuf;

    fn scratch_store(dir: &tempfile::TempDir) -> ConfigStore {
        ConfigStore::new(dir.path().join("bookmarks.conf"))
    }

    #[test]
    fn set_get_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = scratch_store(&dir);

        let record = BTreeMap::from([
            ("type".to_string(), "sftp".to_string()),
            ("host".to_string(), "example.com".to_string()),
        ]);
        store.set("remote1", &record).unwrap();
        assert_eq!(store.get("remote1").unwrap(), Some(record));

        assert!(store.delete("remote1").unwrap());
        assert_eq!(store.get("remote1").unwrap(), None);
        assert!(!store.delete("remote1").unwrap());
    }

    #[test]
    fn mount_slot_round_trip_preserves_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = scratch_store(&dir);

        let slot = MountSlot {
            enabled: true,
            local_path: Some(PathBuf::from("/mnt/docs")),
            remote_sub_path: "docs".to_string(),
            options: BTreeMap::from([("read_only".to_string(), "true".to_string())]),
        };
        store.set_mount_slot("remote1", "docs", &slot).unwrap();

        let loaded = store.mount_slot("remote1", "docs").unwrap().unwrap();
        assert_eq!(loaded, slot);
    }

    #[test]
    fn default_mount_slot_always_exists() {
        let dir = tempfile::tempdir().unwrap();
        let store = scratch_store(&dir);

        let slot = store.mount_slot("remote1", "default").unwrap().unwrap();
        assert!(!slot.enabled);
        assert!(store.mount_slot("remote1", "other").unwrap().is_none());
    }

    #[test]
    fn set_mount_enabled_creates_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = scratch_store(&dir);

        store.set_mount_enabled("remote1", "default", true).unwrap();
        let slot = store.mount_slot("remote1", "default").unwrap().unwrap();
        assert!(slot.enabled);

        store.set_mount_enabled("remote1", "default", false).unwrap();
        assert!(!store.mount_slot("remote1", "default").unwrap().unwrap().enabled);
    }

    #[test]
    fn sync_initialized_latch_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = scratch_store(&dir);

        let slot = SyncSlot::bidirectional("/home/u/work", "backup");
        store.set_sync_slot("remote1", "work", &slot).unwrap();
        assert!(!store.sync_slot("remote1", "work").unwrap().unwrap().initialized);

        store.set_sync_initialized("remote1", "work").unwrap();
        let loaded = store.sync_slot("remote1", "work").unwrap().unwrap();
        assert!(loaded.initialized);
        assert_eq!(loaded.mode, SyncMode::Bidirectional);
    }

    #[test]
    fn delete_bookmark_sweeps_slot_sections() {
        let dir = tempfile::tempdir().unwrap();
        let store = scratch_store(&dir);

        store
            .set_bookmark(&Bookmark::new("remote1", "sftp").unwrap())
            .unwrap();
        store
            .set_mount_slot("remote1", "docs", &MountSlot::default())
            .unwrap();
        store
            .set_sync_slot(
                "remote1",
                "work",
                &SyncSlot::bidirectional("/home/u/work", "backup"),
            )
            .unwrap();
        // A lookalike prefix on another bookmark must survive the sweep.
        store
            .set_bookmark(&Bookmark::new("remote12", "sftp").unwrap())
            .unwrap();

        assert!(store.delete_bookmark("remote1").unwrap());
        assert!(store.get("remote1").unwrap().is_none());
        assert!(store.mount_slot("remote1", "docs").unwrap().is_none());
        assert!(store.sync_slot("remote1", "work").unwrap().is_none());
        assert!(store.bookmark("remote12").unwrap().is_some());
    }

    #[test]
    fn bookmarks_skips_slot_sections() {
        let dir = tempfile::tempdir().unwrap();
        let store = scratch_store(&dir);

        store
            .set_bookmark(&Bookmark::new("remote1", "sftp").unwrap())
            .unwrap();
        store
            .set_mount_slot("remote1", "docs", &MountSlot::default())
            .unwrap();

        let names: Vec<String> = store.bookmarks().unwrap().into_iter().map(|b| b.name).collect();
        assert_eq!(names, vec!["remote1".to_string()]);
    }
}
