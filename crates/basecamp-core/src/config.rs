//! Persisted device configuration.
//!
//! The configuration is a flat map of string keys to string values, kept in
//! memory and persisted as a single JSON object on the flash filesystem:
//!
//! ```json
//! {"DeviceName":"Garden sensor","WifiConfigured":"True","WifiEssid":"home"}
//! ```
//!
//! Keys the firmware does not know are preserved verbatim. A missing key
//! reads as the empty string, so callers treat `""` as "unset".
//!
//! Flash has limited write endurance: [`Configuration::save`] only writes
//! when [`Configuration::is_dirty`] says the map changed, and
//! [`Configuration::set`] does not mark the map dirty when the value is
//! unchanged.

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::fs::{FileSystem, FsError};
use crate::keys::ConfigKey;
use crate::settings;

/// Default location of the configuration file.
pub const CONFIG_PATH: &str = "/basecamp.json";

/// Suffix of the copy written before a corrupt file is replaced.
pub const CORRUPT_BACKUP_SUFFIX: &str = ".corrupt";

const MASK: &str = "********";

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The filesystem could not be mounted.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[source] FsError),

    /// No configuration file exists yet.
    #[error("configuration file missing: {0}")]
    FileMissing(String),

    /// The file exists but could not be read.
    #[error("configuration file unreadable: {0}")]
    Unreadable(#[source] FsError),

    /// The file content is not a JSON object.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// The file could not be written.
    #[error("failed to write configuration: {0}")]
    WriteFailure(#[source] FsError),

    /// The map could not be encoded.
    #[error("failed to encode configuration: {0}")]
    Encode(#[source] serde_json::Error),

    /// The store has no backing file.
    #[error("configuration is memory-only")]
    MemoryOnly,
}

/// The operations downstream collaborators (WiFi, MQTT, OTA, web UI) may
/// use on the configuration.
pub trait ConfigAccess {
    /// Value of `key`, or `""` when unset.
    fn get(&self, key: &str) -> &str;

    /// Insert or overwrite `key`.
    fn set(&mut self, key: &str, value: &str);

    /// Persist pending changes.
    fn save(&mut self) -> Result<(), ConfigError>;

    /// `true` when `key` exists and is not empty.
    fn is_key_set(&self, key: &str) -> bool;
}

/// Key/value configuration backed by a JSON file.
///
/// A store created with [`Configuration::memory_only`] never touches
/// storage: `load` and `save` fail with [`ConfigError::MemoryOnly`].
#[derive(Debug)]
pub struct Configuration<F> {
    fs: F,
    path: Option<String>,
    entries: BTreeMap<String, String>,
    dirty: bool,
}

impl<F: FileSystem> Configuration<F> {
    /// Create an empty configuration persisted at `path` on `fs`.
    ///
    /// Nothing is read until [`Configuration::load`] is called.
    pub fn new(fs: F, path: impl Into<String>) -> Self {
        Self {
            fs,
            path: Some(path.into()),
            entries: BTreeMap::new(),
            dirty: false,
        }
    }

    /// Create an empty configuration that is never read from or written to
    /// storage.
    pub fn memory_only(fs: F) -> Self {
        Self {
            fs,
            path: None,
            entries: BTreeMap::new(),
            dirty: false,
        }
    }

    /// Switch to memory-only mode and forget the file name.
    pub fn set_mem_only(&mut self) {
        self.path = None;
    }

    /// Set a new backing file and leave memory-only mode.
    pub fn set_file_name(&mut self, path: impl Into<String>) {
        self.path = Some(path.into());
    }

    pub fn is_mem_only(&self) -> bool {
        self.path.is_none()
    }

    /// The backing file, `None` in memory-only mode.
    pub fn file_name(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Whether the map changed since it was last saved or loaded.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Load entries from the backing file.
    ///
    /// Every top-level key of the file overwrites the in-memory entry of the
    /// same name; entries absent from the file are kept. On any failure the
    /// map is left exactly as it was.
    ///
    /// The store never resets itself when loading fails: a corrupt or
    /// unreadable file may still hold the user's only copy of their
    /// settings, so the caller decides (see [`crate::bringup`]).
    pub fn load(&mut self) -> Result<(), ConfigError> {
        let path = self.path.clone().ok_or(ConfigError::MemoryOnly)?;
        debug!(%path, "loading configuration");

        self.fs.mount().map_err(|e| {
            error!("could not access flash filesystem: {}", e);
            ConfigError::StorageUnavailable(e)
        })?;

        let text = match self.fs.read_to_string(&path) {
            Ok(text) => text,
            Err(FsError::NotFound(_)) => {
                warn!(%path, "configuration file not found");
                return Err(ConfigError::FileMissing(path));
            }
            Err(e) => {
                warn!(%path, "failed to open configuration file: {}", e);
                return Err(ConfigError::Unreadable(e));
            }
        };

        let (parsed, converted) = parse_entries(&text).map_err(|source| {
            warn!(%path, "failed to parse configuration file: {}", source);
            ConfigError::Parse { path, source }
        })?;

        let file_len = parsed.len();
        self.entries.extend(parsed);
        // Dirty if memory holds keys the file does not, or if a non-string
        // value was converted and the file should be rewritten as strings.
        self.dirty = self.entries.len() != file_len || converted;
        debug!(entries = self.entries.len(), "configuration loaded");
        Ok(())
    }

    /// Persist the map if it changed.
    ///
    /// An empty map is written as `{}`. The dirty flag is cleared on success
    /// and left set on failure.
    pub fn save(&mut self) -> Result<(), ConfigError> {
        if self.is_mem_only() {
            return Err(ConfigError::MemoryOnly);
        }
        if !self.is_dirty() {
            debug!("configuration unchanged, skipping write");
            return Ok(());
        }
        self.write_file()
    }

    fn write_file(&mut self) -> Result<(), ConfigError> {
        let path = self.path.clone().ok_or(ConfigError::MemoryOnly)?;
        debug!(%path, "saving configuration");

        if self.entries.is_empty() {
            debug!("configuration empty");
        }
        let json = serde_json::to_string(&self.entries).map_err(ConfigError::Encode)?;

        self.fs.mount().map_err(ConfigError::StorageUnavailable)?;
        self.fs.write(&path, &json).map_err(|e| {
            error!(%path, "failed to open configuration file for writing: {}", e);
            ConfigError::WriteFailure(e)
        })?;
        self.dirty = false;
        Ok(())
    }

    /// Insert or overwrite `key`.
    ///
    /// Writing the value a key already holds is a no-op and does not mark
    /// the map dirty.
    pub fn set<K: AsRef<str>>(&mut self, key: K, value: impl Into<String>) {
        let key = key.as_ref();
        let value = value.into();
        if self.entries.get(key).is_some_and(|current| *current == value) {
            return;
        }
        self.entries.insert(key.to_string(), value);
        self.dirty = true;
    }

    /// Value of `key`, or `""` when it is absent.
    pub fn get<K: AsRef<str>>(&self, key: K) -> &str {
        self.entries
            .get(key.as_ref())
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Whether `key` exists, even with an empty value.
    pub fn key_exists<K: AsRef<str>>(&self, key: K) -> bool {
        self.entries.contains_key(key.as_ref())
    }

    /// Whether `key` exists and is not empty.
    pub fn is_key_set<K: AsRef<str>>(&self, key: K) -> bool {
        !self.get(key).is_empty()
    }

    /// Whether `key` holds `"true"`, ignoring case.
    pub fn is_flag_true<K: AsRef<str>>(&self, key: K) -> bool {
        settings::is_true(self.get(key))
    }

    /// Whether the feature behind `key` is enabled: anything but `"false"`
    /// (ignoring case) counts, including an unset key.
    pub fn is_enabled<K: AsRef<str>>(&self, key: K) -> bool {
        settings::is_enabled(self.get(key))
    }

    /// Iterate over all entries in key order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Erase every entry, persist the empty map and read it back.
    ///
    /// The reload confirms the erase reached flash. In memory-only mode the
    /// map is just cleared.
    pub fn reset(&mut self) -> Result<(), ConfigError> {
        info!("resetting configuration");
        self.entries.clear();
        self.persist_and_verify()
    }

    /// Erase every entry except `keep`, then persist and read back like
    /// [`Configuration::reset`].
    pub fn reset_except<K: AsRef<str>>(&mut self, keep: &[K]) -> Result<(), ConfigError> {
        let preserved: Vec<(String, String)> = keep
            .iter()
            .filter_map(|key| {
                let key = key.as_ref();
                self.entries
                    .get(key)
                    .map(|value| (key.to_string(), value.clone()))
            })
            .collect();
        info!(preserved = preserved.len(), "resetting configuration");

        self.entries.clear();
        self.entries.extend(preserved);
        self.persist_and_verify()
    }

    fn persist_and_verify(&mut self) -> Result<(), ConfigError> {
        if self.is_mem_only() {
            self.dirty = false;
            return Ok(());
        }
        self.write_file()?;
        self.load()
    }

    /// Format the backing filesystem and clear the map.
    ///
    /// Every file on the filesystem is erased, not only the configuration.
    /// Refused in memory-only mode: the flash contents were never read and
    /// may still be valid.
    pub fn format_storage(&mut self) -> Result<(), ConfigError> {
        if self.is_mem_only() {
            return Err(ConfigError::MemoryOnly);
        }
        warn!("formatting flash filesystem");
        self.fs.format().map_err(ConfigError::WriteFailure)?;
        self.entries.clear();
        self.dirty = false;
        Ok(())
    }

    /// Copy the raw backing file next to itself with
    /// [`CORRUPT_BACKUP_SUFFIX`] appended, and return the copy's path.
    ///
    /// Used before a file that fails to parse is replaced.
    pub fn preserve_corrupt_file(&mut self) -> Result<String, ConfigError> {
        let path = self.path.clone().ok_or(ConfigError::MemoryOnly)?;
        self.fs.mount().map_err(ConfigError::StorageUnavailable)?;
        let raw = self.fs.read_to_string(&path).map_err(|e| match e {
            FsError::NotFound(p) => ConfigError::FileMissing(p),
            other => ConfigError::Unreadable(other),
        })?;
        let backup = format!("{}{}", path, CORRUPT_BACKUP_SUFFIX);
        self.fs
            .write(&backup, &raw)
            .map_err(ConfigError::WriteFailure)?;
        warn!(%backup, "kept a copy of the corrupt configuration file");
        Ok(backup)
    }

    /// Log every entry at debug level, masking secrets.
    pub fn dump(&self) {
        for (key, value) in self.entries() {
            let secret = key
                .parse::<ConfigKey>()
                .map(ConfigKey::is_secret)
                .unwrap_or(false);
            let shown = if secret && !value.is_empty() { MASK } else { value };
            debug!("configuration[{}] = {}", key, shown);
        }
    }

    pub fn filesystem(&self) -> &F {
        &self.fs
    }

    pub fn filesystem_mut(&mut self) -> &mut F {
        &mut self.fs
    }
}

impl<F: FileSystem> ConfigAccess for Configuration<F> {
    fn get(&self, key: &str) -> &str {
        Configuration::get(self, key)
    }

    fn set(&mut self, key: &str, value: &str) {
        Configuration::set(self, key, value)
    }

    fn save(&mut self) -> Result<(), ConfigError> {
        Configuration::save(self)
    }

    fn is_key_set(&self, key: &str) -> bool {
        Configuration::is_key_set(self, key)
    }
}

/// Parse a flat JSON object into entries.
///
/// Non-string values are kept as their JSON text (`1883`, `true`), `null`
/// becomes the empty string. The flag is set when any value was converted.
fn parse_entries(text: &str) -> Result<(BTreeMap<String, String>, bool), serde_json::Error> {
    let object: serde_json::Map<String, Value> = serde_json::from_str(text)?;
    let mut converted = false;
    let entries = object
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s,
                Value::Null => {
                    converted = true;
                    String::new()
                }
                other => {
                    converted = true;
                    other.to_string()
                }
            };
            (key, value)
        })
        .collect();
    Ok((entries, converted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFileSystem;
    use pretty_assertions::assert_eq;

    fn store_with(contents: &str) -> Configuration<MemoryFileSystem> {
        Configuration::new(MemoryFileSystem::with_file(CONFIG_PATH, contents), CONFIG_PATH)
    }

    fn empty_store() -> Configuration<MemoryFileSystem> {
        Configuration::new(MemoryFileSystem::new(), CONFIG_PATH)
    }

    #[test]
    fn test_load_populates_entries() {
        let mut config = store_with(r#"{"DeviceName":"Garden","WifiConfigured":"True"}"#);
        config.load().unwrap();

        assert_eq!(config.get(ConfigKey::DeviceName), "Garden");
        assert_eq!(config.get("WifiConfigured"), "True");
        assert!(!config.is_dirty());
    }

    #[test]
    fn test_load_overwrites_but_keeps_other_entries() {
        let mut config = store_with(r#"{"DeviceName":"FromFile"}"#);
        config.set("DeviceName", "InMemory");
        config.set("Extra", "kept");

        config.load().unwrap();

        assert_eq!(config.get("DeviceName"), "FromFile");
        assert_eq!(config.get("Extra"), "kept");
        assert!(config.is_dirty());
    }

    #[test]
    fn test_load_stringifies_non_string_values() {
        let mut config = store_with(r#"{"MQTTPort":1883,"OTAActive":false,"Empty":null}"#);
        config.load().unwrap();

        assert_eq!(config.get(ConfigKey::MqttPort), "1883");
        assert_eq!(config.get(ConfigKey::OtaActive), "false");
        assert!(config.key_exists("Empty"));
        assert!(!config.is_key_set("Empty"));
    }

    #[test]
    fn test_load_with_converted_values_rewrites_file_as_strings() {
        let mut config = store_with(r#"{"MQTTPort":1883}"#);
        config.load().unwrap();
        assert!(config.is_dirty());

        config.save().unwrap();
        assert_eq!(
            config.filesystem().file(CONFIG_PATH),
            Some(r#"{"MQTTPort":"1883"}"#)
        );

        config.load().unwrap();
        assert!(!config.is_dirty());
    }

    #[test]
    fn test_load_missing_file() {
        let mut config = empty_store();
        assert!(matches!(config.load(), Err(ConfigError::FileMissing(p)) if p == CONFIG_PATH));
        assert!(config.is_empty());
        assert!(config.filesystem().is_mounted());
    }

    #[test]
    fn test_load_parse_failure_keeps_last_known_good() {
        let mut config = store_with(r#"{"DeviceName":"Good"}"#);
        config.load().unwrap();

        config.filesystem_mut().put_file(CONFIG_PATH, r#"{"DeviceName":"Bad""#);
        assert!(matches!(config.load(), Err(ConfigError::Parse { .. })));
        assert_eq!(config.get("DeviceName"), "Good");
    }

    #[test]
    fn test_load_rejects_non_object() {
        let mut config = store_with(r#"["DeviceName","x"]"#);
        assert!(matches!(config.load(), Err(ConfigError::Parse { .. })));
        assert!(config.is_empty());
    }

    #[test]
    fn test_load_storage_unavailable() {
        let mut config = store_with("{}");
        config.filesystem_mut().fail_mount = true;
        assert!(matches!(
            config.load(),
            Err(ConfigError::StorageUnavailable(_))
        ));
    }

    #[test]
    fn test_load_unreadable() {
        let mut config = store_with("{}");
        config.filesystem_mut().fail_reads = true;
        assert!(matches!(config.load(), Err(ConfigError::Unreadable(_))));
    }

    #[test]
    fn test_save_writes_flat_object() {
        let mut config = empty_store();
        config.set(ConfigKey::WifiEssid, "home");
        config.set(ConfigKey::MqttPort, "1883");
        config.save().unwrap();

        assert_eq!(
            config.filesystem().file(CONFIG_PATH),
            Some(r#"{"MQTTPort":"1883","WifiEssid":"home"}"#)
        );
        assert!(!config.is_dirty());
    }

    #[test]
    fn test_save_skips_clean_store() {
        let mut config = empty_store();
        config.set("a", "1");
        config.save().unwrap();
        config.save().unwrap();
        config.set("a", "1");
        config.save().unwrap();

        assert_eq!(config.filesystem().write_count(), 1);
    }

    #[test]
    fn test_save_failure_keeps_dirty() {
        let mut config = empty_store();
        config.set("a", "1");
        config.filesystem_mut().fail_writes = true;

        assert!(matches!(config.save(), Err(ConfigError::WriteFailure(_))));
        assert!(config.is_dirty());
        assert_eq!(config.get("a"), "1");
    }

    #[test]
    fn test_set_same_value_is_not_dirty() {
        let mut config = store_with(r#"{"DeviceName":"x"}"#);
        config.load().unwrap();

        config.set(ConfigKey::DeviceName, "x");
        assert!(!config.is_dirty());

        config.set(ConfigKey::DeviceName, "y");
        assert!(config.is_dirty());
        assert_eq!(config.get(ConfigKey::DeviceName), "y");
    }

    #[test]
    fn test_get_absent_is_empty() {
        let config = empty_store();
        assert_eq!(config.get("Nope"), "");
        assert!(!config.key_exists("Nope"));
    }

    #[test]
    fn test_is_key_set() {
        let mut config = empty_store();
        assert!(!config.is_key_set(ConfigKey::OtaPass));

        config.set(ConfigKey::OtaPass, "");
        assert!(config.key_exists(ConfigKey::OtaPass));
        assert!(!config.is_key_set(ConfigKey::OtaPass));

        config.set(ConfigKey::OtaPass, "secret");
        assert!(config.is_key_set(ConfigKey::OtaPass));
    }

    #[test]
    fn test_reset_persists_empty_object() {
        let mut config = store_with(r#"{"DeviceName":"x","WifiEssid":"home"}"#);
        config.load().unwrap();

        config.reset().unwrap();

        assert!(config.is_empty());
        assert_eq!(config.get("DeviceName"), "");
        assert_eq!(config.filesystem().file(CONFIG_PATH), Some("{}"));
        assert!(!config.is_dirty());
    }

    #[test]
    fn test_reset_writes_even_when_already_empty() {
        let mut config = empty_store();
        config.reset().unwrap();
        assert_eq!(config.filesystem().file(CONFIG_PATH), Some("{}"));
    }

    #[test]
    fn test_reset_except_preserves_listed_keys() {
        let mut config = store_with(r#"{"APSecret":"X","WifiEssid":"home","DeviceName":"d"}"#);
        config.load().unwrap();

        config
            .reset_except(&[ConfigKey::AccessPointSecret, ConfigKey::OtaPass])
            .unwrap();

        assert_eq!(config.get(ConfigKey::AccessPointSecret), "X");
        assert_eq!(config.get(ConfigKey::WifiEssid), "");
        assert_eq!(config.get(ConfigKey::DeviceName), "");
        assert!(!config.key_exists(ConfigKey::OtaPass));
        assert_eq!(config.filesystem().file(CONFIG_PATH), Some(r#"{"APSecret":"X"}"#));
    }

    #[test]
    fn test_reset_write_failure_is_reported() {
        let mut config = empty_store();
        config.set("a", "1");
        config.filesystem_mut().fail_writes = true;
        assert!(matches!(config.reset(), Err(ConfigError::WriteFailure(_))));
        assert!(config.is_empty());
    }

    #[test]
    fn test_memory_only() {
        let mut config = Configuration::memory_only(MemoryFileSystem::new());
        assert!(config.is_mem_only());
        config.set("a", "1");

        assert!(matches!(config.save(), Err(ConfigError::MemoryOnly)));
        assert!(matches!(config.load(), Err(ConfigError::MemoryOnly)));
        config.reset().unwrap();
        assert!(config.is_empty());
        assert_eq!(config.filesystem().write_count(), 0);
    }

    #[test]
    fn test_switch_between_memory_only_and_file() {
        let mut config = empty_store();
        config.set_mem_only();
        assert_eq!(config.file_name(), None);

        config.set_file_name("/other.json");
        config.set("a", "1");
        config.save().unwrap();
        assert_eq!(config.filesystem().file("/other.json"), Some(r#"{"a":"1"}"#));
    }

    #[test]
    fn test_flags() {
        let mut config = empty_store();
        config.set(ConfigKey::WifiConfigured, "TRUE");
        config.set(ConfigKey::MqttActive, "False");

        assert!(config.is_flag_true(ConfigKey::WifiConfigured));
        assert!(!config.is_enabled(ConfigKey::MqttActive));
        assert!(config.is_enabled(ConfigKey::OtaActive));
    }

    #[test]
    fn test_format_storage() {
        let mut config = store_with(r#"{"a":"1"}"#);
        config.load().unwrap();
        config.filesystem_mut().put_file("/index.html", "<html>");

        config.format_storage().unwrap();

        assert!(config.is_empty());
        assert_eq!(config.filesystem().file(CONFIG_PATH), None);
        assert_eq!(config.filesystem().file("/index.html"), None);
    }

    #[test]
    fn test_format_storage_refused_in_memory_only_mode() {
        let mut config = store_with(r#"{"WifiConfigured":"True"}"#);
        config.set_mem_only();

        assert!(matches!(config.format_storage(), Err(ConfigError::MemoryOnly)));
        assert_eq!(config.filesystem().format_count(), 0);
        assert_eq!(
            config.filesystem().file(CONFIG_PATH),
            Some(r#"{"WifiConfigured":"True"}"#)
        );
    }

    #[test]
    fn test_preserve_corrupt_file() {
        let mut config = store_with("{not json");
        let backup = config.preserve_corrupt_file().unwrap();

        assert_eq!(backup, "/basecamp.json.corrupt");
        assert_eq!(config.filesystem().file(&backup), Some("{not json"));
    }

    #[test]
    fn test_collaborator_interface() {
        fn configure(access: &mut impl ConfigAccess) -> Result<(), ConfigError> {
            if !access.is_key_set("MQTTHost") {
                access.set("MQTTHost", "broker.local");
            }
            access.save()
        }

        let mut config = empty_store();
        configure(&mut config).unwrap();
        assert_eq!(ConfigAccess::get(&config, "MQTTHost"), "broker.local");
        assert_eq!(
            config.filesystem().file(CONFIG_PATH),
            Some(r#"{"MQTTHost":"broker.local"}"#)
        );
    }
}
