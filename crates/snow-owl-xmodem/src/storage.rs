use glob::Pattern;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use crate::config::StorageConfig;
use crate::error::{ClientError, Result, XmodemError};
use crate::protocol::MAX_FILENAME_LEN;

/// Directory that receives uploaded files.
///
/// NIST 800-53 Controls:
/// - AC-3: Access Enforcement (uploads confined to `root_dir`)
/// - SI-10: Information Input Validation (filename validation)
/// - CM-5: Access Restrictions for Change (overwrite policy)
///
/// STIG V-222603: Applications must protect against directory traversal
#[derive(Debug, Clone)]
pub struct FileStore {
    root_dir: PathBuf,
    allow_overwrite: bool,
    allowed_patterns: Vec<Pattern>,
}

impl FileStore {
    /// Store accepting any valid filename and overwriting existing files.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            allow_overwrite: true,
            allowed_patterns: Vec::new(),
        }
    }

    pub fn from_config(root_dir: impl Into<PathBuf>, config: &StorageConfig) -> Result<Self> {
        let allowed_patterns = config
            .allowed_patterns
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| {
                    XmodemError::Config(format!("Invalid allowed_patterns entry '{}': {}", p, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            root_dir: root_dir.into(),
            allow_overwrite: config.allow_overwrite,
            allowed_patterns,
        })
    }

    /// Open `filename` for writing inside the store, creating it if absent.
    pub fn open(&self, filename: &str) -> std::result::Result<File, ClientError> {
        let path = self.resolve(filename)?;
        self.open_path(filename, &path)
    }

    /// Open an already resolved path. A symlink swapped in after `resolve`
    /// fails with ELOOP instead of being followed.
    fn open_path(&self, filename: &str, path: &Path) -> std::result::Result<File, ClientError> {
        let mut options = OpenOptions::new();
        options.write(true).custom_flags(nix::libc::O_NOFOLLOW);
        if self.allow_overwrite {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }

        options.open(path).map_err(|source| {
            if source.raw_os_error() == Some(nix::libc::ELOOP) {
                ClientError::PathTraversal(format!("{} is a symbolic link", filename))
            } else {
                ClientError::Storage {
                    filename: filename.to_string(),
                    source,
                }
            }
        })
    }

    /// Validate `filename` and map it to a path directly under `root_dir`.
    pub fn resolve(&self, filename: &str) -> std::result::Result<PathBuf, ClientError> {
        if filename.is_empty() {
            return Err(ClientError::InvalidFilename("empty filename".to_string()));
        }
        if filename.len() > MAX_FILENAME_LEN {
            return Err(ClientError::InvalidFilename(format!(
                "filename exceeds {} bytes",
                MAX_FILENAME_LEN
            )));
        }
        if filename.chars().any(char::is_control) {
            return Err(ClientError::InvalidFilename(
                "filename contains control characters".to_string(),
            ));
        }

        // NIST SI-10 / STIG V-222603: only bare names, no directory components
        if filename == "."
            || filename == ".."
            || filename.contains('/')
            || filename.contains('\\')
            || filename.contains("..")
        {
            return Err(ClientError::PathTraversal(filename.to_string()));
        }

        if !self.allowed_patterns.is_empty()
            && !self.allowed_patterns.iter().any(|p| p.matches(filename))
        {
            return Err(ClientError::InvalidFilename(format!(
                "{} does not match any allowed pattern",
                filename
            )));
        }

        let path = self.root_dir.join(filename);

        // STIG V-222604: never follow a symlink planted in the store
        match std::fs::symlink_metadata(&path) {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(ClientError::PathTraversal(format!(
                    "{} is a symbolic link",
                    filename
                )));
            }
            Ok(meta) if meta.is_dir() => {
                return Err(ClientError::InvalidFilename(format!(
                    "{} is a directory",
                    filename
                )));
            }
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(source) => {
                return Err(ClientError::Storage {
                    filename: filename.to_string(),
                    source,
                });
            }
        }

        Ok(path)
    }
}
