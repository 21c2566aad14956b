use miette::miette;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use std::{env, fs};

use crate::error::FieldReportError;

/// Remote report service settings.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the report API (uploads go to `{endpoint}/images`)
    pub endpoint: String,
    /// Per-request timeout; an upload that times out counts as a failed photo
    pub timeout_secs: u64,
    /// Environment variable holding the bearer token
    pub token_env: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/api".into(),
            timeout_secs: 30,
            token_env: "FIELDREPORT_TOKEN".into(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file holding staged images and the draft slot
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "fieldreport.db".into(),
        }
    }
}

/// Tunables for the composer core.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ComposerConfig {
    pub autosave_debounce_ms: u64,
    pub draft_freshness_hours: i64,
    /// Staged photos wider than this are downscaled
    pub max_image_width: u32,
    /// JPEG quality factor (1-100) used when re-encoding staged photos
    pub jpeg_quality: u8,
    /// Width of stock-panel preview thumbnails
    pub preview_width: u32,
    pub stage_batch_size: usize,
    /// Batches larger than this report progress
    pub stage_progress_threshold: usize,
    pub upload_batch_size: usize,
    pub hold_delay_ms: u64,
    pub drag_threshold_px: i32,
    /// Delete staged images from the local store once a submit has used them
    pub prune_after_submit: bool,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            autosave_debounce_ms: 1000,
            draft_freshness_hours: 24,
            max_image_width: 1600,
            jpeg_quality: 80,
            preview_width: 256,
            stage_batch_size: 3,
            stage_progress_threshold: 10,
            upload_batch_size: 3,
            hold_delay_ms: 300,
            drag_threshold_px: 5,
            prune_after_submit: true,
        }
    }
}

impl ComposerConfig {
    pub fn autosave_debounce(&self) -> Duration {
        Duration::from_millis(self.autosave_debounce_ms)
    }

    pub fn draft_freshness(&self) -> chrono::Duration {
        chrono::Duration::hours(self.draft_freshness_hours)
    }

    pub fn hold_delay(&self) -> Duration {
        Duration::from_millis(self.hold_delay_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub composer: ComposerConfig,
}

impl Config {
    /// Read a TOML config file, substituting `$VAR` with environment values first.
    pub fn load(config_file: impl AsRef<Path>) -> miette::Result<Config> {
        let path = config_file.as_ref();
        let config_string = fs::read_to_string(path)
            .map_err(|e| miette!("error reading config file {}: {}", path.display(), e))?;
        Self::parse(&config_string, env::vars())
    }

    /// Like [`Config::load`], but falls back to defaults when the file is absent.
    pub fn load_or_default(config_file: impl AsRef<Path>) -> miette::Result<Config> {
        let path = config_file.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Ok(Config::default())
        }
    }

    fn parse(
        raw: &str,
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> miette::Result<Config> {
        let mut config_string = raw.to_owned();
        // substitute environment variables in config file
        for (k, v) in vars {
            config_string = config_string.replace(&format!("${}", k), &v);
        }

        let config: Config = toml::from_str(&config_string)
            .map_err(|e| miette!("error parsing config file {}", e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), FieldReportError> {
        let c = &self.composer;
        let invalid = |msg: &str| -> Result<(), FieldReportError> {
            Err(FieldReportError::Config(msg.to_string()))
        };
        if c.jpeg_quality == 0 || c.jpeg_quality > 100 {
            return invalid("composer.jpeg_quality must be in 1..=100");
        }
        if c.stage_batch_size == 0 || c.upload_batch_size == 0 {
            return invalid("composer batch sizes must be at least 1");
        }
        if c.max_image_width == 0 {
            return invalid("composer.max_image_width must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn no_vars() -> Vec<(String, String)> {
        Vec::new()
    }

    #[test]
    fn defaults_fill_missing_sections() {
        let config = Config::parse("[api]\nendpoint = \"https://reports.example\"\n", no_vars()).unwrap();
        assert_eq!(config.api.endpoint, "https://reports.example");
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.composer, ComposerConfig::default());
        assert_eq!(config.composer.autosave_debounce(), Duration::from_secs(1));
    }

    #[test]
    fn env_vars_are_substituted() {
        let raw = "[storage]\ndb_path = \"$DATA_DIR/reports.db\"\n";
        let vars = [("DATA_DIR".to_string(), "/var/lib/fieldreport".to_string())];
        let config = Config::parse(raw, vars).unwrap();
        assert_eq!(config.storage.db_path, "/var/lib/fieldreport/reports.db");
    }

    #[test]
    fn rejects_out_of_range_quality() {
        let err = Config::parse("[composer]\njpeg_quality = 0\n", no_vars()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FieldReportError>(),
            Some(FieldReportError::Config(msg)) if msg.contains("jpeg_quality")
        ));
    }

    #[test]
    fn load_reads_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[composer]\nupload_batch_size = 5").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.composer.upload_batch_size, 5);
        assert_eq!(config.composer.stage_batch_size, 3);
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.storage.db_path, "fieldreport.db");
    }
}
