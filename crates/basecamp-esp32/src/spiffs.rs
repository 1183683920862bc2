//! SPIFFS flash filesystem for the configuration file.

use std::ffi::CStr;
use std::io;
use std::path::PathBuf;

use basecamp_core::fs::{FileSystem, FsError};
use esp_idf_svc::sys::{
    esp, esp_spiffs_format, esp_vfs_spiffs_conf_t, esp_vfs_spiffs_register, EspError,
    ESP_ERR_INVALID_STATE,
};
use log::{info, warn};

const MOUNT_POINT: &CStr = c"/spiffs";

/// The default SPIFFS partition, mounted at `/spiffs` through the VFS.
pub struct SpiffsFileSystem {
    max_files: usize,
    mounted: bool,
}

impl Default for SpiffsFileSystem {
    fn default() -> Self {
        Self {
            max_files: 5,
            mounted: false,
        }
    }
}

impl SpiffsFileSystem {
    fn resolve(path: &str) -> PathBuf {
        let mut full = PathBuf::from(MOUNT_POINT.to_string_lossy().as_ref());
        full.push(path.trim_start_matches('/'));
        full
    }
}

impl FileSystem for SpiffsFileSystem {
    fn mount(&mut self) -> Result<(), FsError> {
        if self.mounted {
            return Ok(());
        }

        let conf = esp_vfs_spiffs_conf_t {
            base_path: MOUNT_POINT.as_ptr(),
            partition_label: std::ptr::null(),
            max_files: self.max_files,
            // A blank partition fails to mount; format it on first use.
            format_if_mount_failed: true,
        };
        match esp!(unsafe { esp_vfs_spiffs_register(&conf) }) {
            Ok(()) => info!("SPIFFS mounted"),
            Err(e) if e.code() == ESP_ERR_INVALID_STATE as i32 => {}
            Err(e) => return Err(FsError::Unavailable(e.to_string())),
        }
        self.mounted = true;
        Ok(())
    }

    fn read_to_string(&mut self, path: &str) -> Result<String, FsError> {
        match std::fs::read_to_string(Self::resolve(path)) {
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
        std::fs::write(Self::resolve(path), contents).map_err(|source| FsError::Write {
            path: path.to_string(),
            source,
        })
    }

    fn format(&mut self) -> Result<(), FsError> {
        warn!("formatting SPIFFS partition");
        esp!(unsafe { esp_spiffs_format(std::ptr::null()) })
            .map_err(|e: EspError| FsError::Format(e.to_string()))
    }
}
