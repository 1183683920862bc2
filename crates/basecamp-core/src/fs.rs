//! Flash filesystem abstraction.
//!
//! The configuration file lives on a small flash filesystem (SPIFFS on the
//! ESP32). This module provides the trait the store is written against:
//! - ESP32: SPIFFS mounted through ESP-IDF's VFS (in `basecamp-esp32`)
//! - Linux: [`DirFileSystem`], a directory on the host
//! - Tests: [`MemoryFileSystem`], with fault injection
//!
//! Paths are absolute, `/`-separated and relative to the filesystem root,
//! e.g. `/basecamp.json`.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

/// Errors reported by a [`FileSystem`].
#[derive(Debug, Error)]
pub enum FsError {
    /// The filesystem could not be mounted.
    #[error("filesystem unavailable: {0}")]
    Unavailable(String),

    /// The file does not exist.
    #[error("file not found: {0}")]
    NotFound(String),

    /// The file exists but could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The file could not be opened or written.
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Formatting the filesystem failed.
    #[error("failed to format filesystem: {0}")]
    Format(String),
}

/// Blocking filesystem used by the configuration store.
///
/// All methods are synchronous; bring-up runs before any task is started.
pub trait FileSystem {
    /// Mount the filesystem, formatting it first if the device is blank.
    ///
    /// Must be idempotent and must never destroy a valid filesystem.
    fn mount(&mut self) -> Result<(), FsError>;

    /// Read a whole file as UTF-8 text.
    ///
    /// A missing file is reported as [`FsError::NotFound`], distinct from
    /// other read failures.
    fn read_to_string(&mut self, path: &str) -> Result<String, FsError>;

    /// Create or truncate `path` and write `contents`.
    fn write(&mut self, path: &str, contents: &str) -> Result<(), FsError>;

    /// Erase every file on the filesystem.
    fn format(&mut self) -> Result<(), FsError>;
}

impl<T: FileSystem + ?Sized> FileSystem for &mut T {
    fn mount(&mut self) -> Result<(), FsError> {
        (**self).mount()
    }

    fn read_to_string(&mut self, path: &str) -> Result<String, FsError> {
        (**self).read_to_string(path)
    }

    fn write(&mut self, path: &str, contents: &str) -> Result<(), FsError> {
        (**self).write(path, contents)
    }

    fn format(&mut self) -> Result<(), FsError> {
        (**self).format()
    }
}

/// In-memory filesystem for tests and host simulation.
///
/// Faults can be injected to exercise the store's failure paths.
#[derive(Debug, Clone, Default)]
pub struct MemoryFileSystem {
    files: BTreeMap<String, String>,
    mounted: bool,
    /// Make `mount` fail.
    pub fail_mount: bool,
    /// Make every read of an existing file fail.
    pub fail_reads: bool,
    /// Make every write fail.
    pub fail_writes: bool,
    /// Make `format` fail.
    pub fail_format: bool,
    formats: usize,
    writes: usize,
}

impl MemoryFileSystem {
    /// Create an empty, unmounted filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a filesystem holding one file.
    pub fn with_file(path: &str, contents: &str) -> Self {
        let mut fs = Self::new();
        fs.files.insert(path.to_string(), contents.to_string());
        fs
    }

    /// Raw contents of a file, bypassing mount state and faults.
    pub fn file(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    /// Replace a file's contents directly, e.g. to simulate corruption.
    pub fn put_file(&mut self, path: &str, contents: &str) {
        self.files.insert(path.to_string(), contents.to_string());
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes
    }

    /// Number of times the filesystem was formatted.
    pub fn format_count(&self) -> usize {
        self.formats
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    fn injected(what: &str) -> io::Error {
        io::Error::new(io::ErrorKind::Other, format!("injected {} failure", what))
    }
}

impl FileSystem for MemoryFileSystem {
    fn mount(&mut self) -> Result<(), FsError> {
        if self.fail_mount {
            return Err(FsError::Unavailable("injected mount failure".to_string()));
        }
        self.mounted = true;
        Ok(())
    }

    fn read_to_string(&mut self, path: &str) -> Result<String, FsError> {
        if !self.mounted {
            return Err(FsError::Unavailable("not mounted".to_string()));
        }
        let contents = self
            .files
            .get(path)
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        if self.fail_reads {
            return Err(FsError::Read {
                path: path.to_string(),
                source: Self::injected("read"),
            });
        }
        Ok(contents.clone())
    }

    fn write(&mut self, path: &str, contents: &str) -> Result<(), FsError> {
        if !self.mounted {
            return Err(FsError::Unavailable("not mounted".to_string()));
        }
        if self.fail_writes {
            return Err(FsError::Write {
                path: path.to_string(),
                source: Self::injected("write"),
            });
        }
        self.files.insert(path.to_string(), contents.to_string());
        self.writes += 1;
        Ok(())
    }

    fn format(&mut self) -> Result<(), FsError> {
        if self.fail_format {
            return Err(FsError::Format("injected format failure".to_string()));
        }
        self.files.clear();
        self.formats += 1;
        Ok(())
    }
}

/// Filesystem rooted at a host directory.
///
/// `/basecamp.json` maps to `<root>/basecamp.json`. Mounting creates the
/// root directory if it does not exist yet, the host equivalent of
/// format-on-first-use.
#[derive(Debug, Clone)]
pub struct DirFileSystem {
    root: PathBuf,
}

impl DirFileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

impl FileSystem for DirFileSystem {
    fn mount(&mut self) -> Result<(), FsError> {
        std::fs::create_dir_all(&self.root).map_err(|e| {
            FsError::Unavailable(format!("{}: {}", self.root.display(), e))
        })
    }

    fn read_to_string(&mut self, path: &str) -> Result<String, FsError> {
        match std::fs::read_to_string(self.resolve(path)) {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(FsError::NotFound(path.to_string()))
            }
            Err(source) => Err(FsError::Read {
                path: path.to_string(),
                source,
            }),
        }
    }

    fn write(&mut self, path: &str, contents: &str) -> Result<(), FsError> {
        std::fs::write(self.resolve(path), contents).map_err(|source| FsError::Write {
            path: path.to_string(),
            source,
        })
    }

    fn format(&mut self) -> Result<(), FsError> {
        debug!(root = %self.root.display(), "formatting directory filesystem");
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(FsError::Format(e.to_string())),
        };
        for entry in entries {
            let entry = entry.map_err(|e| FsError::Format(e.to_string()))?;
            let path = entry.path();
            let removed = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            if let Err(e) = removed {
                warn!(path = %path.display(), "failed to remove during format: {}", e);
                return Err(FsError::Format(e.to_string()));
            }
        }
        Ok(())
    }
}
