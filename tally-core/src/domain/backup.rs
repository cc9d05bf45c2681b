//! Backup domain model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Application name written into every backup manifest
pub const APP_NAME: &str = "tally";

/// Newest archive layout this build can read and the one it writes
pub const BACKUP_VERSION: u32 = 1;

/// Manifest stored as `manifest.json` at the root of a backup archive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupManifest {
    pub app_name: String,
    pub backup_version: u32,
    pub exported_at: DateTime<Utc>,
    /// Collection names present as `<name>.csv`
    pub contains: Vec<String>,
}

impl BackupManifest {
    pub fn new(contains: Vec<String>) -> Self {
        Self {
            app_name: APP_NAME.to_string(),
            backup_version: BACKUP_VERSION,
            exported_at: Utc::now(),
            contains,
        }
    }

    /// Check that this build can restore the archive
    pub fn validate(&self) -> Result<(), String> {
        if self.app_name != APP_NAME {
            return Err(format!(
                "archive was produced by '{}', expected '{}'",
                self.app_name, APP_NAME
            ));
        }
        if self.backup_version > BACKUP_VERSION {
            return Err(format!(
                "backup version {} is newer than supported version {}",
                self.backup_version, BACKUP_VERSION
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_json_shape() {
        let manifest = BackupManifest::new(vec!["accounts".to_string()]);
        let json = serde_json::to_value(&manifest).unwrap();
        assert_eq!(json["appName"], "tally");
        assert_eq!(json["backupVersion"], 1);
        assert!(json["exportedAt"].is_string());
        assert_eq!(json["contains"][0], "accounts");
    }

    #[test]
    fn test_manifest_validation() {
        let mut manifest = BackupManifest::new(Vec::new());
        assert!(manifest.validate().is_ok());

        manifest.backup_version = BACKUP_VERSION + 1;
        assert!(manifest.validate().is_err());

        manifest.backup_version = BACKUP_VERSION;
        manifest.app_name = "other".to_string();
        assert!(manifest.validate().unwrap_err().contains("other"));
    }
}
