/**
 * Common types that describe core dockhand responsibilities.
 *  - Bookmarks and their mount/sync slots
 */
mod bookmark;
/**
 * Settings store implementation.
 *  A TOML file under the dockhand dot-directory holding the
 *  scalar knobs the service is configured from.
 */
mod settings;
/**
 * Bookmark store implementation.
 *  A light wrapper around the engine's INI config file,
 *  treated as a record store keyed by section name.
 */
mod store;
/**
 * Helper for reporting build version information.
 */
pub mod version;

pub mod prelude {
    pub use crate::bookmark::{
        Bookmark, BookmarkError, MountSlot, SlotKey, SyncDirection, SyncMode, SyncSlot,
        DEFAULT_MOUNT_SLOT,
    };
    pub use crate::settings::{Settings, SettingsError, APP_NAME};
    pub use crate::store::{ConfigStore, StoreError};
    pub use crate::version::{build_info, BuildInfo};
}
