//! # wirebus-settings
//!
//! Configuration management with layered sources for the wirebus server.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`WirebusSettings::default()`]
//! 2. **JSON file** — deep-merged over defaults
//! 3. **Environment variables** — `WIREBUS_*` overrides (highest priority)
//!
//! The global singleton is reloadable, so long-lived processes can pick
//! up a rewritten settings file without restarting.
//!
//! ```no_run
//! let settings = wirebus_settings::get_settings();
//! println!("bind: {}", settings.server.bind_addr);
//! ```

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::SettingsError;
pub use loader::{deep_merge, load_settings_from_path};
pub use types::*;

use std::path::Path;
use std::sync::{Arc, RwLock};

/// Global settings singleton.
///
/// `RwLock<Option<Arc<..>>>` rather than `OnceLock` so the cached value
/// can be swapped on reload. Reads are a shared lock plus `Arc::clone`.
static SETTINGS: RwLock<Option<Arc<WirebusSettings>>> = RwLock::new(None);

/// Get the global settings instance.
///
/// On first call, returns compiled defaults unless [`init_settings`] or
/// [`reload_settings_from_path`] ran earlier. Returns an `Arc` so
/// callers hold a consistent snapshot across concurrent reloads.
pub fn get_settings() -> Arc<WirebusSettings> {
    {
        let guard = SETTINGS.read().expect("settings lock poisoned");
        if let Some(s) = guard.as_ref() {
            return Arc::clone(s);
        }
    }
    let mut guard = SETTINGS.write().expect("settings lock poisoned");
    if let Some(s) = guard.as_ref() {
        return Arc::clone(s);
    }
    let settings = Arc::new(WirebusSettings::default());
    *guard = Some(Arc::clone(&settings));
    settings
}

/// Initialize the global settings with a specific value.
///
/// Replaces any previously cached settings. Used by server startup and
/// by tests.
pub fn init_settings(settings: WirebusSettings) {
    let mut guard = SETTINGS.write().expect("settings lock poisoned");
    *guard = Some(Arc::new(settings));
}

/// Reload settings from a file path and swap the global cache.
///
/// Falls back to compiled defaults when loading fails, so a broken file
/// cannot take the process down.
pub fn reload_settings_from_path(path: &Path) {
    let new = Arc::new(match load_settings_from_path(path) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, ?path, "failed to load settings, using defaults");
            WirebusSettings::default()
        }
    });
    let mut guard = SETTINGS.write().expect("settings lock poisoned");
    *guard = Some(new);
    tracing::info!(?path, "settings loaded");
}
