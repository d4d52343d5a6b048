use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The implicit mount slot every bookmark has.
pub const DEFAULT_MOUNT_SLOT: &str = "default";

/// Prefix under which provider/mount options are flattened into slot sections.
const OPTION_PREFIX: &str = "opt_";

/// Addresses one mount or sync slot of one bookmark.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotKey {
    pub bookmark: String,
    pub slot: String,
}

impl SlotKey {
    pub fn new(bookmark: impl Into<String>, slot: impl Into<String>) -> Self {
        Self {
            bookmark: bookmark.into(),
            slot: slot.into(),
        }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.bookmark, self.slot)
    }
}

/// A named remote-storage configuration.
///
/// The name doubles as the section key in the engine's config file, so it
/// must stay free of the characters the store and the remote-spec syntax
/// reserve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    pub name: String,
    pub provider: String,
    pub options: BTreeMap<String, String>,
}

impl Bookmark {
    pub fn new(name: impl Into<String>, provider: impl Into<String>) -> Result<Self, BookmarkError> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self {
            name,
            provider: provider.into(),
            options: BTreeMap::new(),
        })
    }

    /// Remote spec for the engine: `name:` joined with an optional sub-path.
    pub fn remote_spec(&self, sub_path: &str) -> String {
        if sub_path.is_empty() {
            format!("{}:", self.name)
        } else {
            format!("{}:{}", self.name, sub_path.trim_start_matches('/'))
        }
    }

    pub fn from_section(name: &str, section: &BTreeMap<String, String>) -> Result<Self, BookmarkError> {
        validate_name(name)?;
        let provider = section
            .get("type")
            .cloned()
            .ok_or(BookmarkError::MissingField("type"))?;
        let options = section
            .iter()
            .filter(|(k, _)| k.as_str() != "type")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Self {
            name: name.to_string(),
            provider,
            options,
        })
    }

    pub fn to_section(&self) -> BTreeMap<String, String> {
        let mut section = BTreeMap::new();
        section.insert("type".to_string(), self.provider.clone());
        for (k, v) in &self.options {
            section.insert(k.clone(), v.clone());
        }
        section
    }
}

/// One mount configuration attached to a bookmark.
///
/// `enabled` records desired intent only; whether the slot is actually
/// mounted right now lives in the mount orchestrator's cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSlot {
    pub enabled: bool,
    pub local_path: Option<PathBuf>,
    pub remote_sub_path: String,
    pub options: BTreeMap<String, String>,
}

impl Default for MountSlot {
    fn default() -> Self {
        Self {
            enabled: false,
            local_path: None,
            remote_sub_path: String::new(),
            options: BTreeMap::new(),
        }
    }
}

impl MountSlot {
    pub fn from_section(section: &BTreeMap<String, String>) -> Result<Self, BookmarkError> {
        let enabled = parse_bool(section.get("enabled").map(String::as_str).unwrap_or("false"))
            .ok_or(BookmarkError::InvalidField("enabled"))?;
        let local_path = section
            .get("path")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);
        let remote_sub_path = section.get("remote_path").cloned().unwrap_or_default();
        Ok(Self {
            enabled,
            local_path,
            remote_sub_path,
            options: collect_options(section),
        })
    }

    pub fn to_section(&self) -> BTreeMap<String, String> {
        let mut section = BTreeMap::new();
        section.insert("enabled".to_string(), self.enabled.to_string());
        if let Some(path) = &self.local_path {
            section.insert("path".to_string(), path.display().to_string());
        }
        if !self.remote_sub_path.is_empty() {
            section.insert("remote_path".to_string(), self.remote_sub_path.clone());
        }
        flatten_options(&self.options, &mut section);
        section
    }
}

/// Sync mode of a sync slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    OneShot,
    Bidirectional,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::OneShot => "oneshot",
            SyncMode::Bidirectional => "bidirectional",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "oneshot" => Some(SyncMode::OneShot),
            "bidirectional" => Some(SyncMode::Bidirectional),
            _ => None,
        }
    }
}

/// Transfer direction for one-shot sync slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncDirection {
    Upload,
    Download,
}

impl SyncDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDirection::Upload => "upload",
            SyncDirection::Download => "download",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "upload" => Some(SyncDirection::Upload),
            "download" => Some(SyncDirection::Download),
            _ => None,
        }
    }
}

/// One sync configuration attached to a bookmark.
///
/// `initialized` is a one-way latch: it stays false until the first
/// bootstrap (initial copy plus forced resync) has completed, and gates
/// which startup path later runs take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSlot {
    pub local_path: PathBuf,
    pub remote_path: String,
    pub mode: SyncMode,
    pub direction: Option<SyncDirection>,
    pub transfers: u32,
    pub checkers: u32,
    pub max_delete: u32,
    pub initialized: bool,
}

impl SyncSlot {
    pub fn bidirectional(local_path: impl Into<PathBuf>, remote_path: impl Into<String>) -> Self {
        Self {
            local_path: local_path.into(),
            remote_path: remote_path.into(),
            mode: SyncMode::Bidirectional,
            direction: None,
            transfers: 4,
            checkers: 8,
            max_delete: 50,
            initialized: false,
        }
    }

    pub fn one_shot(
        local_path: impl Into<PathBuf>,
        remote_path: impl Into<String>,
        direction: SyncDirection,
    ) -> Self {
        Self {
            local_path: local_path.into(),
            remote_path: remote_path.into(),
            mode: SyncMode::OneShot,
            direction: Some(direction),
            transfers: 4,
            checkers: 8,
            max_delete: 50,
            initialized: false,
        }
    }

    pub fn from_section(section: &BTreeMap<String, String>) -> Result<Self, BookmarkError> {
        let mode = section
            .get("mode")
            .and_then(|m| SyncMode::parse(m))
            .ok_or(BookmarkError::InvalidField("mode"))?;
        let direction = match section.get("direction") {
            Some(d) => Some(SyncDirection::parse(d).ok_or(BookmarkError::InvalidField("direction"))?),
            None => None,
        };
        if mode == SyncMode::OneShot && direction.is_none() {
            return Err(BookmarkError::MissingField("direction"));
        }
        Ok(Self {
            local_path: PathBuf::from(
                section
                    .get("local_path")
                    .ok_or(BookmarkError::MissingField("local_path"))?,
            ),
            remote_path: section
                .get("remote_path")
                .cloned()
                .ok_or(BookmarkError::MissingField("remote_path"))?,
            mode,
            direction,
            transfers: parse_u32(section, "transfers", 4)?,
            checkers: parse_u32(section, "checkers", 8)?,
            max_delete: parse_u32(section, "max_delete", 50)?,
            initialized: parse_bool(section.get("initialized").map(String::as_str).unwrap_or("false"))
                .ok_or(BookmarkError::InvalidField("initialized"))?,
        })
    }

    pub fn to_section(&self) -> BTreeMap<String, String> {
        let mut section = BTreeMap::new();
        section.insert("local_path".to_string(), self.local_path.display().to_string());
        section.insert("remote_path".to_string(), self.remote_path.clone());
        section.insert("mode".to_string(), self.mode.as_str().to_string());
        if let Some(direction) = self.direction {
            section.insert("direction".to_string(), direction.as_str().to_string());
        }
        section.insert("transfers".to_string(), self.transfers.to_string());
        section.insert("checkers".to_string(), self.checkers.to_string());
        section.insert("max_delete".to_string(), self.max_delete.to_string());
        section.insert("initialized".to_string(), self.initialized.to_string());
        section
    }
}

/// Section name for a mount slot record.
pub(crate) fn mount_section_name(bookmark: &str, slot: &str) -> String {
    format!("{}.mount_{}", bookmark, slot)
}

/// Section name for a sync slot record.
pub(crate) fn sync_section_name(bookmark: &str, slot: &str) -> String {
    format!("{}.sync_{}", bookmark, slot)
}

fn validate_name(name: &str) -> Result<(), BookmarkError> {
    if name.is_empty() || name.contains('.') || name.contains(':') || name.contains(['[', ']']) {
        return Err(BookmarkError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" | "" => Some(false),
        _ => None,
    }
}

fn parse_u32(
    section: &BTreeMap<String, String>,
    field: &'static str,
    default: u32,
) -> Result<u32, BookmarkError> {
    match section.get(field) {
        Some(v) => v.parse().map_err(|_| BookmarkError::InvalidField(field)),
        None => Ok(default),
    }
}

fn collect_options(section: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    section
        .iter()
        .filter_map(|(k, v)| {
            k.strip_prefix(OPTION_PREFIX)
                .map(|name| (name.to_string(), v.clone()))
        })
        .collect()
}

fn flatten_options(options: &BTreeMap<String, String>, section: &mut BTreeMap<String, String>) {
    for (k, v) in options {
        section.insert(format!("{}{}", OPTION_PREFIX, k), v.clone());
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BookmarkError {
    #[error("invalid bookmark name: {0:?}")]
    InvalidName(String),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid value for field: {0}")]
    InvalidField(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_spec_joins_sub_path() {
        let bookmark = Bookmark::new("remote1", "sftp").unwrap();
        assert_eq!(bookmark.remote_spec(""), "remote1:");
        assert_eq!(bookmark.remote_spec("backup"), "remote1:backup");
        assert_eq!(bookmark.remote_spec("/backup"), "remote1:backup");
    }

    #[test]
    fn rejects_reserved_characters_in_names() {
        assert!(Bookmark::new("a.b", "sftp").is_err());
        assert!(Bookmark::new("a:b", "sftp").is_err());
        assert!(Bookmark::new("", "sftp").is_err());
        assert!(Bookmark::new("work-docs", "sftp").is_ok());
    }

    #[test]
    fn mount_slot_section_round_trip() {
        let slot = MountSlot {
            enabled: true,
            local_path: Some(PathBuf::from("/mnt/work")),
            remote_sub_path: "projects".to_string(),
            options: BTreeMap::from([("vfs_cache_mode".to_string(), "writes".to_string())]),
        };
        let section = slot.to_section();
        assert_eq!(section.get("enabled").map(String::as_str), Some("true"));
        assert_eq!(
            section.get("opt_vfs_cache_mode").map(String::as_str),
            Some("writes")
        );
        let decoded = MountSlot::from_section(&section).unwrap();
        assert_eq!(decoded, slot);
    }

    #[test]
    fn sync_slot_section_round_trip() {
        let mut slot = SyncSlot::bidirectional("/home/u/work", "backup");
        slot.initialized = true;
        let decoded = SyncSlot::from_section(&slot.to_section()).unwrap();
        assert_eq!(decoded, slot);
    }

    #[test]
    fn one_shot_slot_requires_direction() {
        let slot = SyncSlot::one_shot("/home/u/photos", "photos", SyncDirection::Upload);
        let mut section = slot.to_section();
        assert_eq!(SyncSlot::from_section(&section).unwrap(), slot);
        section.remove("direction");
        assert!(matches!(
            SyncSlot::from_section(&section),
            Err(BookmarkError::MissingField("direction"))
        ));
    }

    #[test]
    fn sync_slot_defaults_apply_when_fields_absent() {
        let section = BTreeMap::from([
            ("local_path".to_string(), "/home/u/work".to_string()),
            ("remote_path".to_string(), "backup".to_string()),
            ("mode".to_string(), "bidirectional".to_string()),
        ]);
        let slot = SyncSlot::from_section(&section).unwrap();
        assert_eq!(slot.transfers, 4);
        assert_eq!(slot.checkers, 8);
        assert_eq!(slot.max_delete, 50);
        assert!(!slot.initialized);
    }
}
