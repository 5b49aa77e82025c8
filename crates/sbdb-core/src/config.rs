//! Classifier configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration consumed read-only by the classifier and the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Directory holding one store file per table
    pub db_dir: PathBuf,
    #[serde(default = "default_true")]
    pub malware_check_enabled: bool,
    #[serde(default = "default_true")]
    pub phishing_check_enabled: bool,
    /// Comma-separated malware tables
    #[serde(default = "default_malware_table")]
    pub malware_table: String,
    /// Comma-separated phishing tables
    #[serde(default = "default_phishing_table")]
    pub phishing_table: String,
    /// Tables whose partial matches must be completed remotely
    #[serde(default)]
    pub gethash_tables: Vec<String>,
    /// Noise prefixes mixed into each completion request
    #[serde(default = "default_noise_count")]
    pub gethash_noise_count: usize,
    /// How long after an update a table's complete hashes are trusted
    #[serde(default = "default_confirm_max_age")]
    pub confirm_max_age_secs: u64,
    /// Upper bound of the completion miss cache
    #[serde(default = "default_miss_cache_capacity")]
    pub miss_cache_capacity: usize,
    /// Bound of the worker command channel
    #[serde(default = "default_queue_capacity")]
    pub command_queue_capacity: usize,
}

fn default_true() -> bool {
    true
}

fn default_malware_table() -> String {
    "goog-malware-shavar,test-malware-simple".to_string()
}

fn default_phishing_table() -> String {
    "goog-phish-shavar,test-phish-simple".to_string()
}

fn default_noise_count() -> usize {
    crate::constants::DEFAULT_NOISE_COUNT
}

fn default_confirm_max_age() -> u64 {
    crate::constants::DEFAULT_CONFIRM_MAX_AGE_SECS
}

fn default_miss_cache_capacity() -> usize {
    256
}

fn default_queue_capacity() -> usize {
    1024
}

impl ClassifierConfig {
    pub fn new(db_dir: impl Into<PathBuf>) -> Self {
        Self {
            db_dir: db_dir.into(),
            malware_check_enabled: true,
            phishing_check_enabled: true,
            malware_table: default_malware_table(),
            phishing_table: default_phishing_table(),
            gethash_tables: Vec::new(),
            gethash_noise_count: default_noise_count(),
            confirm_max_age_secs: default_confirm_max_age(),
            miss_cache_capacity: default_miss_cache_capacity(),
            command_queue_capacity: default_queue_capacity(),
        }
    }

    pub fn with_gethash_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.gethash_tables = tables.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_noise_count(mut self, count: usize) -> Self {
        self.gethash_noise_count = count;
        self
    }

    pub fn with_confirm_max_age(mut self, secs: u64) -> Self {
        self.confirm_max_age_secs = secs;
        self
    }

    pub fn with_miss_cache_capacity(mut self, capacity: usize) -> Self {
        self.miss_cache_capacity = capacity;
        self
    }

    pub fn confirm_max_age(&self) -> Duration {
        Duration::from_secs(self.confirm_max_age_secs)
    }

    /// Malware tables, empty when malware checks are disabled
    pub fn malware_tables(&self) -> Vec<String> {
        if !self.malware_check_enabled {
            return Vec::new();
        }
        split_tables(&self.malware_table)
    }

    /// Phishing tables, empty when phishing checks are disabled
    pub fn phishing_tables(&self) -> Vec<String> {
        if !self.phishing_check_enabled {
            return Vec::new();
        }
        split_tables(&self.phishing_table)
    }

    pub fn requires_completion(&self, table: &str) -> bool {
        self.gethash_tables.iter().any(|t| t == table)
    }

    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self::new("./sbdb-data")
    }
}

/// Split a comma-separated table list
pub fn split_tables(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClassifierConfig::default();
        assert_eq!(config.gethash_noise_count, 4);
        assert_eq!(config.confirm_max_age_secs, 2700);
        assert_eq!(
            config.malware_tables(),
            vec!["goog-malware-shavar", "test-malware-simple"]
        );
    }

    #[test]
    fn test_disabled_checks_yield_no_tables() {
        let mut config = ClassifierConfig::default();
        config.phishing_check_enabled = false;
        assert!(config.phishing_tables().is_empty());
        assert!(!config.malware_tables().is_empty());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ClassifierConfig = serde_json::from_str(r#"{"db_dir": "/tmp/sb"}"#).unwrap();
        assert_eq!(config.db_dir, PathBuf::from("/tmp/sb"));
        assert_eq!(config.gethash_noise_count, 4);
        assert!(config.malware_check_enabled);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = ClassifierConfig::new("/data/sb").with_gethash_tables(["goog-malware-shavar"]);
        config.save(&path).unwrap();
        assert_eq!(ClassifierConfig::load(&path).unwrap(), config);
        assert!(config.requires_completion("goog-malware-shavar"));
    }
}
