//! Global configuration: rule locations, caching, machine key settings

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BcResult, BrowserCapsError};
use crate::machine_key::MachineKeyConfig;

/// Files hoisted ahead of the name-sorted order so the major engines are tested first.
pub const DEFAULT_HOISTED_FILES: [&str; 3] = ["ie.browser", "mozilla.browser", "opera.browser"];

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    // Machine-level rule directory
    pub machine_rules_dir: PathBuf,
    // Application-level rule directory, nodes there must resolve their parents
    pub app_rules_dir: Option<PathBuf>,
    // Rule file extension, without the dot
    pub rule_extension: String,
    pub hoisted_files: Vec<String>,
    // Compiled rule cache (MessagePack)
    pub rule_cache_path: PathBuf,
    pub use_cache: bool,
    pub verbose: bool,
    pub machine_key: MachineKeyConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            machine_rules_dir: PathBuf::from("browsers"),
            app_rules_dir: None,
            rule_extension: "browser".to_string(),
            hoisted_files: DEFAULT_HOISTED_FILES.iter().map(|s| s.to_string()).collect(),
            rule_cache_path: PathBuf::from("browsercaps_rules.mp"),
            use_cache: false,
            verbose: false,
            machine_key: MachineKeyConfig::default(),
        }
    }
}

impl GlobalConfig {
    /// Load a configuration from a JSON file; missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> BcResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            BrowserCapsError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }
}

/// Configuration entry points
pub struct ConfigManager;

impl ConfigManager {
    pub fn get_default() -> GlobalConfig {
        GlobalConfig::default()
    }

    pub fn custom() -> CustomConfigBuilder {
        CustomConfigBuilder::new()
    }
}

/// Chained configuration builder
#[derive(Debug, Clone, Default)]
pub struct CustomConfigBuilder {
    config: GlobalConfig,
}

impl CustomConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn machine_rules_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.machine_rules_dir = dir.into();
        self
    }

    pub fn app_rules_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.app_rules_dir = Some(dir.into());
        self
    }

    pub fn rule_extension(mut self, ext: impl Into<String>) -> Self {
        self.config.rule_extension = ext.into();
        self
    }

    pub fn hoisted_files(mut self, files: Vec<String>) -> Self {
        self.config.hoisted_files = files;
        self
    }

    pub fn rule_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.rule_cache_path = path.into();
        self.config.use_cache = true;
        self
    }

    pub fn use_cache(mut self, enabled: bool) -> Self {
        self.config.use_cache = enabled;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    pub fn machine_key(mut self, machine_key: MachineKeyConfig) -> Self {
        self.config.machine_key = machine_key;
        self
    }

    pub fn build(self) -> GlobalConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn builder_overrides_defaults() {
        let config = ConfigManager::custom()
            .machine_rules_dir("/etc/browsers")
            .app_rules_dir("app/browsers")
            .rule_cache_path("/tmp/rules.mp")
            .build();

        assert_eq!(config.machine_rules_dir, PathBuf::from("/etc/browsers"));
        assert_eq!(config.app_rules_dir, Some(PathBuf::from("app/browsers")));
        assert!(config.use_cache);
        assert_eq!(config.rule_extension, "browser");
        assert_eq!(config.hoisted_files.len(), 3);
    }

    #[test]
    fn json_file_keeps_missing_fields_at_default() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "machine_rules_dir": "rules", "verbose": true }}"#).unwrap();

        let config = GlobalConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.machine_rules_dir, PathBuf::from("rules"));
        assert!(config.verbose);
        assert!(!config.use_cache);
        assert_eq!(config.machine_key.validation, "HMACSHA256");
    }

    #[test]
    fn missing_json_file_is_config_error() {
        let err = GlobalConfig::from_json_file("/nonexistent/browsercaps.json").unwrap_err();
        assert!(matches!(err, BrowserCapsError::ConfigError(_)));
    }
}
