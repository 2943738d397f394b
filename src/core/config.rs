use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::env;
use std::path::Path;

use super::models::LogLevel;
use crate::errors::TransportError;

pub const DEFAULT_TABLE_NAME: &str = "log";
pub const DEFAULT_PARTITION_KEY: &str = "log";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

static TABLE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9]{2,62}$").expect("valid table name regex"));

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransportConfig {
    pub account: Option<String>,
    pub key: Option<String>,
    pub table_name: String,
    pub partition_key: String,
    pub use_dev_storage: bool,
    pub nested_meta: bool,
    pub level: LogLevel,
    pub silent: bool,
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            account: None,
            key: None,
            table_name: DEFAULT_TABLE_NAME.to_string(),
            partition_key: DEFAULT_PARTITION_KEY.to_string(),
            use_dev_storage: false,
            nested_meta: false,
            level: LogLevel::default(),
            silent: false,
            endpoint: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl TransportConfig {
    /// Config for a named storage account.
    #[must_use]
    pub fn for_account(account: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            account: Some(account.into()),
            key: Some(key.into()),
            ..Self::default()
        }
    }

    /// Config targeting the local storage emulator.
    #[must_use]
    pub fn dev_storage() -> Self {
        Self {
            use_dev_storage: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    #[must_use]
    pub fn with_partition_key(mut self, partition_key: impl Into<String>) -> Self {
        self.partition_key = partition_key.into();
        self
    }

    #[must_use]
    pub fn with_nested_meta(mut self, nested_meta: bool) -> Self {
        self.nested_meta = nested_meta;
        self
    }

    /// Checks the settings that must hold before any request is made.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Config` naming the first invalid setting.
    pub fn validate(&self) -> Result<(), TransportError> {
        if !self.use_dev_storage {
            if self.account.as_deref().is_none_or(|a| a.trim().is_empty()) {
                return Err(TransportError::Config(
                    "azure storage account name required.".to_string(),
                ));
            }
            if self.key.as_deref().is_none_or(|k| k.trim().is_empty()) {
                return Err(TransportError::Config(
                    "azure storage account key required.".to_string(),
                ));
            }
        }

        if !TABLE_NAME_RE.is_match(&self.table_name) {
            return Err(TransportError::Config(format!(
                "invalid table name '{}': must be 3-63 alphanumeric characters starting with a letter",
                self.table_name
            )));
        }

        if self
            .partition_key
            .chars()
            .any(|c| matches!(c, '/' | '\\' | '#' | '?') || c.is_control())
        {
            return Err(TransportError::Config(format!(
                "invalid partition key '{}': '/', '\\', '#', '?' and control characters are not allowed",
                self.partition_key
            )));
        }

        if self.timeout_secs == 0 {
            return Err(TransportError::Config(
                "timeout_secs must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if a boolean or level variable cannot be parsed.
    pub fn from_env() -> Result<Self, TransportError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds a config from a variable lookup, using the same names as [`Self::from_env`].
    ///
    /// # Errors
    ///
    /// Returns an error if a boolean or level variable cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, TransportError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let flag = |name: &str| -> Result<Option<bool>, TransportError> {
            var(name).map(|v| parse_bool(name, &v)).transpose()
        };

        let defaults = Self::default();
        let account = var("AZURE_STORAGE_ACCOUNT");
        let key = var("AZURE_STORAGE_ACCESS_KEY");
        let use_dev_storage = flag("TABLELOG_USE_DEV_STORAGE")?
            .unwrap_or(account.is_none() && key.is_none());

        let level = match var("TABLELOG_LEVEL") {
            Some(v) => v
                .parse::<LogLevel>()
                .map_err(|e| TransportError::Config(format!("TABLELOG_LEVEL: {e}")))?,
            None => defaults.level,
        };

        let timeout_secs = match var("TABLELOG_TIMEOUT_SECS") {
            Some(v) => v
                .trim()
                .parse::<u64>()
                .map_err(|e| TransportError::Config(format!("TABLELOG_TIMEOUT_SECS: {e}")))?,
            None => defaults.timeout_secs,
        };

        Ok(Self {
            account,
            key,
            table_name: var("TABLELOG_TABLE_NAME").unwrap_or(defaults.table_name),
            partition_key: var("TABLELOG_PARTITION_KEY").unwrap_or(defaults.partition_key),
            use_dev_storage,
            nested_meta: flag("TABLELOG_NESTED_META")?.unwrap_or(false),
            level,
            silent: flag("TABLELOG_SILENT")?.unwrap_or(false),
            endpoint: var("TABLELOG_ENDPOINT"),
            timeout_secs,
        })
    }

    /// Loads a JSON config file using the camelCase option names.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TransportError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            TransportError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            TransportError::Config(format!("failed to parse {}: {e}", path.display()))
        })
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, TransportError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(TransportError::Config(format!(
            "{name}: expected a boolean, got '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_missing_account_is_rejected() {
        let err = TransportConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("azure storage account name required."));
    }

    #[test]
    fn test_missing_key_is_rejected() {
        let config = TransportConfig {
            account: Some("some account".to_string()),
            ..TransportConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("azure storage account key required."));
    }

    #[test]
    fn test_dev_storage_needs_no_credentials() {
        assert!(TransportConfig::dev_storage().validate().is_ok());
    }

    #[test]
    fn test_table_name_rules() {
        let base = TransportConfig::for_account("acct", "a2V5");
        assert!(base.clone().with_table_name("winstontest1").validate().is_ok());
        assert!(base.clone().with_table_name("1abc").validate().is_err());
        assert!(base.clone().with_table_name("ab").validate().is_err());
        assert!(base.with_table_name("has-dash").validate().is_err());
    }

    #[test]
    fn test_partition_key_rejects_reserved_characters() {
        let config = TransportConfig::dev_storage().with_partition_key("a/b");
        assert!(matches!(config.validate(), Err(TransportError::Config(_))));
    }

    #[test]
    fn test_from_lookup_defaults_to_dev_storage_without_credentials() {
        let config = TransportConfig::from_lookup(lookup_from(&[])).unwrap();
        assert!(config.use_dev_storage);
        assert_eq!(config.table_name, DEFAULT_TABLE_NAME);
        assert_eq!(config.partition_key, DEFAULT_PARTITION_KEY);
    }

    #[test]
    fn test_from_lookup_reads_all_settings() {
        let config = TransportConfig::from_lookup(lookup_from(&[
            ("AZURE_STORAGE_ACCOUNT", "acct"),
            ("AZURE_STORAGE_ACCESS_KEY", "a2V5"),
            ("TABLELOG_TABLE_NAME", "applogs"),
            ("TABLELOG_PARTITION_KEY", "prod"),
            ("TABLELOG_NESTED_META", "true"),
            ("TABLELOG_LEVEL", "debug"),
            ("TABLELOG_SILENT", "0"),
        ]))
        .unwrap();

        assert!(!config.use_dev_storage);
        assert_eq!(config.account.as_deref(), Some("acct"));
        assert_eq!(config.table_name, "applogs");
        assert_eq!(config.partition_key, "prod");
        assert!(config.nested_meta);
        assert_eq!(config.level, LogLevel::Debug);
        assert!(!config.silent);
    }

    #[test]
    fn test_from_lookup_rejects_bad_boolean() {
        let err = TransportConfig::from_lookup(lookup_from(&[("TABLELOG_NESTED_META", "maybe")]))
            .unwrap_err();
        assert!(err.to_string().contains("TABLELOG_NESTED_META"));
    }

    #[test]
    fn test_from_file_uses_camel_case_names() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"account":"acct","key":"a2V5","tableName":"audit","nestedMeta":true}}"#
        )
        .unwrap();

        let config = TransportConfig::from_file(file.path()).unwrap();
        assert_eq!(config.table_name, "audit");
        assert!(config.nested_meta);
        assert_eq!(config.partition_key, DEFAULT_PARTITION_KEY);
        assert!(config.validate().is_ok());
    }
}
