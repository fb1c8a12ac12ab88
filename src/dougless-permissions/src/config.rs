//! The on-disk permission config (`.douglessrc`).
//!
//! A JSON document with one top-level `permissions` key mapping each kind to
//! an array of pattern strings. A missing array means the kind was never
//! granted; a present-but-empty array grants everything of that kind. The
//! file is read once at startup and rewritten (two-space indented) when the
//! prompter persists a decision.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::kind::PermissionKind;

/// The config filename, looked up in the script's directory (script mode) or
/// the current directory (REPL mode).
pub const CONFIG_FILE_NAME: &str = ".douglessrc";

/// The whole config document.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionsFile {
    /// The per-kind pattern arrays.
    #[serde(default)]
    pub permissions: PermissionSets,
}

/// The `permissions` mapping: one optional pattern array per kind.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSets {
    /// Patterns for filesystem reads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<Vec<String>>,
    /// Patterns for filesystem writes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write: Option<Vec<String>>,
    /// Patterns for outbound network access.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net: Option<Vec<String>>,
    /// Environment variable names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<String>>,
    /// Program names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<Vec<String>>,
}

impl PermissionSets {
    /// The pattern array for `kind`, if present.
    pub fn kind(&self, kind: PermissionKind) -> Option<&Vec<String>> {
        match kind {
            PermissionKind::Read => self.read.as_ref(),
            PermissionKind::Write => self.write.as_ref(),
            PermissionKind::Net => self.net.as_ref(),
            PermissionKind::Env => self.env.as_ref(),
            PermissionKind::Run => self.run.as_ref(),
        }
    }

    /// The pattern array slot for `kind`.
    pub fn kind_mut(&mut self, kind: PermissionKind) -> &mut Option<Vec<String>> {
        match kind {
            PermissionKind::Read => &mut self.read,
            PermissionKind::Write => &mut self.write,
            PermissionKind::Net => &mut self.net,
            PermissionKind::Env => &mut self.env,
            PermissionKind::Run => &mut self.run,
        }
    }
}

/// Faults reading, parsing, or rewriting the config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read permission config {}: {source}", path.display())]
    Read {
        /// The config file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The file is not the expected JSON shape. serde_json's message carries
    /// the line and column of the fault.
    #[error("malformed permission config {}: {source}", path.display())]
    Parse {
        /// The config file path.
        path: PathBuf,
        /// The parse error, including position.
        #[source]
        source: serde_json::Error,
    },
    /// The rewritten file could not be written back.
    #[error("failed to write permission config {}: {source}", path.display())]
    Write {
        /// The config file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Load the config at `path`. A missing file is `Ok(None)`; a present but
/// malformed file is an error (fatal at startup, per the §7 contract of the
/// runtime).
pub fn load(path: &Path) -> Result<Option<PermissionsFile>, ConfigError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: err,
            });
        }
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

/// Write `file` to `path`, two-space indented, with a trailing newline.
pub fn save(path: &Path, file: &PermissionsFile) -> Result<(), ConfigError> {
    let mut text = serde_json::to_string_pretty(file).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    text.push('\n');
    std::fs::write(path, text).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Add `resource` to the `kind` array at `path`, creating the file or the
/// array as needed. Duplicate entries are left alone (and the file is not
/// rewritten for them).
pub fn append_grant(path: &Path, kind: PermissionKind, resource: &str) -> Result<(), ConfigError> {
    let mut file = load(path)?.unwrap_or_default();
    let entries = file
        .permissions
        .kind_mut(kind)
        .get_or_insert_with(Vec::new);
    if entries.iter().any(|entry| entry == resource) {
        return Ok(());
    }
    entries.push(resource.to_string());
    save(path, &file)
}
