//! User preference store (contact number, zones, periodic sharing flag)
//!
//! Reads return defaults until the first write, last write wins. Both
//! producers read a fresh snapshot per event; a structural read failure is
//! treated as the default preferences (`read_or_default`), never an error.

use crate::domain::types::{
    Coordinate, DispatchTarget, ZoneDefinition, COLLEGE_ZONE_ID, HOME_ZONE_ID,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error("preference store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("preference file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserPreferences {
    pub contact_number: String,
    pub home_zone: Coordinate,
    pub college_zone: Coordinate,
    pub periodic_sharing_enabled: bool,
}

impl UserPreferences {
    pub fn target(&self) -> DispatchTarget {
        DispatchTarget::new(&self.contact_number)
    }

    /// The two watched zones at the given radius
    pub fn zones(&self, radius_m: f64) -> Vec<ZoneDefinition> {
        vec![
            ZoneDefinition::new(HOME_ZONE_ID, self.home_zone, radius_m),
            ZoneDefinition::new(COLLEGE_ZONE_ID, self.college_zone, radius_m),
        ]
    }

    fn apply(&mut self, update: PreferencesUpdate) {
        if let Some(contact_number) = update.contact_number {
            self.contact_number = contact_number;
        }
        if let Some(home_zone) = update.home_zone {
            self.home_zone = home_zone;
        }
        if let Some(college_zone) = update.college_zone {
            self.college_zone = college_zone;
        }
        if let Some(enabled) = update.periodic_sharing_enabled {
            self.periodic_sharing_enabled = enabled;
        }
    }
}

/// Partial update; `None` fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreferencesUpdate {
    pub contact_number: Option<String>,
    pub home_zone: Option<Coordinate>,
    pub college_zone: Option<Coordinate>,
    pub periodic_sharing_enabled: Option<bool>,
}

impl PreferencesUpdate {
    pub fn contact_number(number: &str) -> Self {
        Self { contact_number: Some(number.trim().to_string()), ..Default::default() }
    }

    pub fn home_zone(center: Coordinate) -> Self {
        Self { home_zone: Some(center), ..Default::default() }
    }

    pub fn college_zone(center: Coordinate) -> Self {
        Self { college_zone: Some(center), ..Default::default() }
    }

    pub fn periodic_sharing(enabled: bool) -> Self {
        Self { periodic_sharing_enabled: Some(enabled), ..Default::default() }
    }
}

#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn read(&self) -> Result<UserPreferences, PreferenceError>;
    async fn write(&self, update: PreferencesUpdate) -> Result<(), PreferenceError>;
    async fn clear(&self) -> Result<(), PreferenceError>;
}

/// Read preferences, mapping a store failure to defaults
pub async fn read_or_default(store: &dyn PreferenceStore) -> UserPreferences {
    match store.read().await {
        Ok(prefs) => prefs,
        Err(e) => {
            warn!(error = %e, "preferences_unavailable_using_defaults");
            UserPreferences::default()
        }
    }
}

/// Process-local store, used by tests and as a fallback
#[derive(Default)]
pub struct MemoryPreferenceStore {
    prefs: RwLock<UserPreferences>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_preferences(prefs: UserPreferences) -> Self {
        Self { prefs: RwLock::new(prefs) }
    }
}

#[async_trait]
impl PreferenceStore for MemoryPreferenceStore {
    async fn read(&self) -> Result<UserPreferences, PreferenceError> {
        Ok(self.prefs.read().clone())
    }

    async fn write(&self, update: PreferencesUpdate) -> Result<(), PreferenceError> {
        self.prefs.write().apply(update);
        Ok(())
    }

    async fn clear(&self) -> Result<(), PreferenceError> {
        *self.prefs.write() = UserPreferences::default();
        Ok(())
    }
}

/// JSON file store. Writes go to a temp file that is renamed into place,
/// so a concurrent reader never sees a half-written file.
pub struct FilePreferenceStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process
    write_lock: tokio::sync::Mutex<()>,
}

impl FilePreferenceStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        info!(file = %path.display(), "preference_store_initialized");
        Self { path, write_lock: tokio::sync::Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<UserPreferences, PreferenceError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(UserPreferences::default()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(UserPreferences::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, prefs: &UserPreferences) -> Result<(), PreferenceError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_vec_pretty(prefs)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(file = %self.path.display(), bytes = %json.len(), "preferences_written");
        Ok(())
    }
}

#[async_trait]
impl PreferenceStore for FilePreferenceStore {
    async fn read(&self) -> Result<UserPreferences, PreferenceError> {
        self.load().await
    }

    async fn write(&self, update: PreferencesUpdate) -> Result<(), PreferenceError> {
        let _guard = self.write_lock.lock().await;
        // A corrupt file is replaced rather than blocking every future write
        let mut prefs = match self.load().await {
            Ok(prefs) => prefs,
            Err(PreferenceError::Corrupt(e)) => {
                warn!(error = %e, file = %self.path.display(), "preferences_corrupt_overwriting");
                UserPreferences::default()
            }
            Err(e) => return Err(e),
        };
        prefs.apply(update);
        self.store(&prefs).await
    }

    async fn clear(&self) -> Result<(), PreferenceError> {
        let _guard = self.write_lock.lock().await;
        self.store(&UserPreferences::default()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_defaults_then_last_write_wins() {
        let store = MemoryPreferenceStore::new();
        assert_eq!(store.read().await.unwrap(), UserPreferences::default());

        store.write(PreferencesUpdate::contact_number("+1555")).await.unwrap();
        store.write(PreferencesUpdate::contact_number("+1666")).await.unwrap();
        store.write(PreferencesUpdate::periodic_sharing(true)).await.unwrap();

        let prefs = store.read().await.unwrap();
        assert_eq!(prefs.contact_number, "+1666");
        assert!(prefs.periodic_sharing_enabled);
        assert_eq!(prefs.home_zone, Coordinate::default());
    }

    #[tokio::test]
    async fn test_file_store_missing_file_reads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePreferenceStore::new(dir.path().join("missing.json"));
        assert_eq!(store.read().await.unwrap(), UserPreferences::default());
    }

    #[tokio::test]
    async fn test_file_store_persists_partial_updates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("prefs.json");
        let store = FilePreferenceStore::new(&path);

        let home = Coordinate::new(51.5, -0.12).unwrap();
        store.write(PreferencesUpdate::home_zone(home)).await.unwrap();
        store.write(PreferencesUpdate::contact_number(" +15551234 ")).await.unwrap();

        let reopened = FilePreferenceStore::new(&path);
        let prefs = reopened.read().await.unwrap();
        assert_eq!(prefs.home_zone, home);
        assert_eq!(prefs.contact_number, "+15551234");
        assert!(!prefs.periodic_sharing_enabled);

        reopened.clear().await.unwrap();
        assert_eq!(store.read().await.unwrap(), UserPreferences::default());
    }

    #[tokio::test]
    async fn test_corrupt_file_reads_as_default_via_read_or_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, b"{not json").unwrap();
        let store = FilePreferenceStore::new(&path);

        assert!(matches!(store.read().await, Err(PreferenceError::Corrupt(_))));
        assert_eq!(read_or_default(&store).await, UserPreferences::default());

        store.write(PreferencesUpdate::periodic_sharing(true)).await.unwrap();
        assert!(store.read().await.unwrap().periodic_sharing_enabled);
    }

    #[tokio::test]
    async fn test_out_of_range_zone_center_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        std::fs::write(&path, br#"{"home_zone":{"latitude":500.0,"longitude":-999.0}}"#).unwrap();
        let store = FilePreferenceStore::new(&path);

        assert!(matches!(store.read().await, Err(PreferenceError::Corrupt(_))));
        assert_eq!(read_or_default(&store).await.home_zone, Coordinate::default());
    }

    #[test]
    fn test_zones_use_current_centers() {
        let prefs = UserPreferences {
            home_zone: Coordinate::new(1.0, 2.0).unwrap(),
            college_zone: Coordinate::new(3.0, 4.0).unwrap(),
            ..Default::default()
        };
        let zones = prefs.zones(1000.0);
        assert_eq!(zones[0].id, HOME_ZONE_ID);
        assert_eq!(zones[1].center, Coordinate::new(3.0, 4.0).unwrap());
        assert_eq!(zones[1].radius_m, 1000.0);
    }
}
