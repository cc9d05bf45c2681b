//! Configuration management
//!
//! Reads and writes `settings.json` in the data directory:
//! ```json
//! {
//!   "app": { "defaultCurrency": "BRL", "writeConcurrency": 4 },
//!   "importProfiles": { "profiles": { ... } },
//!   "currency": { "baseCurrency": "USD", "rates": { "BRL": "0.19" } }
//! }
//! ```
//! Fields this crate does not manage are kept as-is on save.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::RateTable;
use crate::services::import::ColumnMapping;

pub const SETTINGS_FILE: &str = "settings.json";
pub const DEFAULT_WRITE_CONCURRENCY: usize = 4;

/// Raw settings.json structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsFile {
    #[serde(default)]
    app: AppSettings,
    #[serde(default)]
    import_profiles: ImportProfilesContainer,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    currency: Option<RateTable>,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default_currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    write_concurrency: Option<usize>,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportProfilesContainer {
    #[serde(default)]
    profiles: BTreeMap<String, ImportProfile>,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

/// Tally configuration (simplified view of settings)
#[derive(Debug, Clone)]
pub struct Config {
    /// Currency for rows that carry none
    pub default_currency: Option<String>,
    /// Maximum concurrent writes during an import phase
    pub write_concurrency: usize,
    pub import_profiles: BTreeMap<String, ImportProfile>,
    pub rates: Option<RateTable>,
    // Keep the raw settings for preservation when saving
    _raw_settings: SettingsFile,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_currency: None,
            write_concurrency: DEFAULT_WRITE_CONCURRENCY,
            import_profiles: BTreeMap::new(),
            rates: None,
            _raw_settings: SettingsFile::default(),
        }
    }
}

impl Config {
    /// Load config from the data directory
    ///
    /// `TALLY_DEFAULT_CURRENCY` and `TALLY_WRITE_CONCURRENCY` override the
    /// file. A malformed settings file is ignored with a warning.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let settings_path = data_dir.join(SETTINGS_FILE);

        let raw: SettingsFile = if settings_path.exists() {
            let content = std::fs::read_to_string(&settings_path)
                .with_context(|| format!("Failed to read {}", settings_path.display()))?;
            match serde_json::from_str(&content) {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(path = %settings_path.display(), error = %e, "ignoring malformed settings");
                    SettingsFile::default()
                }
            }
        } else {
            SettingsFile::default()
        };

        let default_currency = std::env::var("TALLY_DEFAULT_CURRENCY")
            .ok()
            .filter(|c| !c.trim().is_empty())
            .or_else(|| raw.app.default_currency.clone())
            .map(|c| c.trim().to_uppercase());

        let write_concurrency = match std::env::var("TALLY_WRITE_CONCURRENCY").ok() {
            Some(value) => value
                .trim()
                .parse::<usize>()
                .with_context(|| format!("TALLY_WRITE_CONCURRENCY must be a number, got '{}'", value))?,
            None => raw.app.write_concurrency.unwrap_or(DEFAULT_WRITE_CONCURRENCY),
        }
        .max(1);

        Ok(Self {
            default_currency,
            write_concurrency,
            import_profiles: raw.import_profiles.profiles.clone(),
            rates: raw.currency.clone(),
            _raw_settings: raw,
        })
    }

    /// Save config to the data directory
    /// Preserves other settings that the CLI doesn't manage
    pub fn save(&self, data_dir: &Path) -> Result<()> {
        let settings_path = data_dir.join(SETTINGS_FILE);

        // Load existing settings to preserve fields we don't manage
        let mut settings = if settings_path.exists() {
            let content = std::fs::read_to_string(&settings_path)?;
            serde_json::from_str::<SettingsFile>(&content).unwrap_or_default()
        } else {
            self._raw_settings.clone()
        };

        // Update only the fields we manage
        settings.app.default_currency = self.default_currency.clone();
        settings.app.write_concurrency = Some(self.write_concurrency);
        settings.import_profiles.profiles = self.import_profiles.clone();
        settings.currency = self.rates.clone();

        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create {}", data_dir.display()))?;
        let content = serde_json::to_string_pretty(&settings)?;
        std::fs::write(&settings_path, content)
            .with_context(|| format!("Failed to write {}", settings_path.display()))?;
        Ok(())
    }
}

/// Saved column mapping and session options for a recurring file layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportProfile {
    pub column_mapping: ColumnMapping,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_currency: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::import::CanonicalField;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.write_concurrency, DEFAULT_WRITE_CONCURRENCY);
        assert!(config.import_profiles.is_empty());
        assert!(config.rates.is_none());
    }

    #[test]
    fn test_save_preserves_unknown_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(
            &path,
            r#"{"app":{"theme":"dark","writeConcurrency":2},"importProfiles":{"accountMappings":{"a":"b"}},"plugins":{"x":1}}"#,
        )
        .unwrap();

        let mut config = Config::load(dir.path()).unwrap();
        assert_eq!(config.write_concurrency, 2);
        config.import_profiles.insert(
            "nubank".to_string(),
            ImportProfile {
                column_mapping: ColumnMapping::new().with(CanonicalField::Date, "Data"),
                primary_account: Some("Nubank".to_string()),
                default_currency: None,
            },
        );
        config.save(dir.path()).unwrap();

        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["app"]["theme"], "dark");
        assert_eq!(saved["plugins"]["x"], 1);
        assert_eq!(saved["importProfiles"]["accountMappings"]["a"], "b");
        assert_eq!(
            saved["importProfiles"]["profiles"]["nubank"]["columnMapping"]["date"],
            "Data"
        );

        let reloaded = Config::load(dir.path()).unwrap();
        assert_eq!(reloaded.import_profiles["nubank"].primary_account.as_deref(), Some("Nubank"));
    }

    #[test]
    fn test_malformed_settings_ignored() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(SETTINGS_FILE), "{ not json").unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert!(config.default_currency.is_none());
    }
}
