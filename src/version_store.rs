use std::{
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::INSTALLED_VERSION_FILE;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledVersion {
    pub version: String,
    #[serde(rename = "updated_at", default)]
    pub installed_at: Option<DateTime<Utc>>,
}

/// Durable record of the installed logical version. The packaged manifest is
/// immutable after install, so this record wins whenever it exists.
#[derive(Debug)]
pub struct VersionStore {
    path: PathBuf,
    bundled_version: String,
    cached: Mutex<Option<InstalledVersion>>,
}

impl VersionStore {
    pub fn new(app_root: &Path, bundled_version: impl Into<String>) -> Self {
        Self::at_path(app_root.join(INSTALLED_VERSION_FILE), bundled_version)
    }

    pub fn at_path(path: PathBuf, bundled_version: impl Into<String>) -> Self {
        Self {
            path,
            bundled_version: bundled_version.into(),
            cached: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the persisted record, falling back to the bundled version when the
    /// record is missing, unreadable or has an empty version.
    pub fn load_or_bundled(&self) -> InstalledVersion {
        read_record(&self.path).unwrap_or_else(|| InstalledVersion {
            version: self.bundled_version.clone(),
            installed_at: None,
        })
    }

    pub fn current_version(&self) -> String {
        let mut guard = match self.cached.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard
            .get_or_insert_with(|| self.load_or_bundled())
            .version
            .clone()
    }

    pub fn has_record(&self) -> bool {
        read_record(&self.path).is_some()
    }

    /// Writes the record through a sibling temp file so a crash mid-write never
    /// leaves a truncated record behind.
    pub fn save_installed_version(&self, version: &str) -> Result<InstalledVersion, String> {
        let record = InstalledVersion {
            version: version.trim().trim_start_matches('v').to_string(),
            installed_at: Some(Utc::now()),
        };
        if record.version.is_empty() {
            return Err("Refusing to persist an empty version.".to_string());
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|error| {
                format!(
                    "Failed to create version record directory {}: {}",
                    parent.display(),
                    error
                )
            })?;
        }
        let payload = serde_json::to_string(&record)
            .map_err(|error| format!("Failed to serialize version record: {error}"))?;
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, payload).map_err(|error| {
            format!(
                "Failed to write version record {}: {}",
                temp_path.display(),
                error
            )
        })?;
        fs::rename(&temp_path, &self.path).map_err(|error| {
            let _ = fs::remove_file(&temp_path);
            format!(
                "Failed to move version record into place {}: {}",
                self.path.display(),
                error
            )
        })?;

        let mut guard = match self.cached.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(record.clone());
        Ok(record)
    }

    /// Creates the record on the first successful launch; later launches keep
    /// whatever an update last wrote.
    pub fn record_first_launch(&self) -> Result<bool, String> {
        if self.has_record() {
            return Ok(false);
        }
        let version = self.current_version();
        self.save_installed_version(&version)?;
        Ok(true)
    }
}

fn read_record(path: &Path) -> Option<InstalledVersion> {
    let text = fs::read_to_string(path).ok()?;
    let record: InstalledVersion = serde_json::from_str(&text).ok()?;
    if record.version.trim().is_empty() {
        return None;
    }
    Some(record)
}
