//! Persistent boot counter storage.
//!
//! The boot counter lives outside the JSON configuration file, in a small
//! key-value region that stays readable while the configuration is corrupt
//! or half-written:
//! - ESP32: NVS namespace `basecamp`, key `bootcounter` (in `basecamp-esp32`)
//! - Linux: [`FileCounterStore`], a single decimal number in its own file
//! - Tests: [`MemoryCounterStore`]

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// NVS namespace holding the counter.
pub const COUNTER_NAMESPACE: &str = "basecamp";

/// Key of the counter inside [`COUNTER_NAMESPACE`].
pub const COUNTER_KEY: &str = "bootcounter";

/// Errors reported by a [`CounterStore`].
#[derive(Debug, Error)]
pub enum CounterError {
    /// The persistent region could not be opened.
    #[error("boot counter store unavailable: {0}")]
    Unavailable(String),

    /// The stored value is not a valid counter.
    #[error("boot counter value is corrupt: {0}")]
    Corrupt(String),

    /// The new value could not be persisted.
    #[error("failed to write boot counter: {0}")]
    Write(String),
}

/// Persistent storage for the consecutive failed boot count.
pub trait CounterStore {
    /// Read the stored count. A region that never held a value reads as 0.
    fn read(&mut self) -> Result<u32, CounterError>;

    /// Persist `value`. Returns only once the value is durable.
    fn write(&mut self, value: u32) -> Result<(), CounterError>;
}

impl<T: CounterStore + ?Sized> CounterStore for &mut T {
    fn read(&mut self) -> Result<u32, CounterError> {
        (**self).read()
    }

    fn write(&mut self, value: u32) -> Result<(), CounterError> {
        (**self).write(value)
    }
}

/// In-memory counter for tests and simulation.
#[derive(Debug, Clone, Default)]
pub struct MemoryCounterStore {
    pub(crate) value: Option<u32>,
    /// Make `read` fail as if the region could not be opened.
    pub unavailable: bool,
    /// Make `write` fail.
    pub fail_writes: bool,
    pub(crate) writes: Vec<u32>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store already holding `value`.
    pub fn with_value(value: u32) -> Self {
        Self {
            value: Some(value),
            ..Self::default()
        }
    }

    /// The stored value, `None` if never written.
    pub fn value(&self) -> Option<u32> {
        self.value
    }

    /// Every value written, in order.
    pub fn writes(&self) -> &[u32] {
        &self.writes
    }
}

impl CounterStore for MemoryCounterStore {
    fn read(&mut self) -> Result<u32, CounterError> {
        if self.unavailable {
            return Err(CounterError::Unavailable("injected open failure".to_string()));
        }
        Ok(self.value.unwrap_or(0))
    }

    fn write(&mut self, value: u32) -> Result<(), CounterError> {
        if self.unavailable || self.fail_writes {
            return Err(CounterError::Write("injected write failure".to_string()));
        }
        self.value = Some(value);
        self.writes.push(value);
        Ok(())
    }
}

/// Counter persisted as decimal text in a dedicated host file.
#[derive(Debug, Clone)]
pub struct FileCounterStore {
    path: PathBuf,
}

impl FileCounterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CounterStore for FileCounterStore {
    fn read(&mut self) -> Result<u32, CounterError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(CounterError::Unavailable(format!(
                    "{}: {}",
                    self.path.display(),
                    e
                )))
            }
        };
        text.trim()
            .parse()
            .map_err(|_| CounterError::Corrupt(format!("{:?}", text.trim())))
    }

    fn write(&mut self, value: u32) -> Result<(), CounterError> {
        std::fs::write(&self.path, value.to_string())
            .map_err(|e| CounterError::Write(format!("{}: {}", self.path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_counter_defaults_to_zero() {
        let mut store = MemoryCounterStore::new();
        assert_eq!(store.read().unwrap(), 0);
        assert_eq!(store.value(), None);
    }

    #[test]
    fn test_memory_counter_records_writes() {
        let mut store = MemoryCounterStore::with_value(2);
        store.write(3).unwrap();
        store.write(0).unwrap();
        assert_eq!(store.read().unwrap(), 0);
        assert_eq!(store.writes(), &[3, 0]);
    }

    #[test]
    fn test_memory_counter_unavailable() {
        let mut store = MemoryCounterStore {
            unavailable: true,
            ..Default::default()
        };
        assert!(matches!(store.read(), Err(CounterError::Unavailable(_))));
    }

    #[test]
    fn test_file_counter_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileCounterStore::new(dir.path().join("bootcounter"));
        assert_eq!(store.read().unwrap(), 0);
        store.write(4).unwrap();
        assert_eq!(store.read().unwrap(), 4);
    }

    #[test]
    fn test_file_counter_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bootcounter");
        std::fs::write(&path, "four").unwrap();
        let mut store = FileCounterStore::new(path);
        assert!(matches!(store.read(), Err(CounterError::Corrupt(_))));
    }
}
