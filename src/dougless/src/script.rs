//! Script sources and their location metadata.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;

/// A JavaScript source with metadata about where it came from.
///
/// The base directory is where the runtime looks for the `.douglessrc`
/// permission config and what the process working directory is set to in
/// script mode, so relative paths inside the script resolve next to it.
#[derive(Debug, Clone)]
pub struct Script {
    /// Display name used in diagnostics.
    name: String,
    /// The script content.
    content: Arc<str>,
    /// Directory the script was loaded from, if any.
    base_dir: Option<PathBuf>,
}

impl Script {
    /// Create a script from a string, with no on-disk location.
    pub fn from_content(content: impl Into<String>) -> Self {
        Self {
            name: "<script>".to_string(),
            content: Arc::from(content.into()),
            base_dir: None,
        }
    }

    /// Create a script by reading from a file.
    ///
    /// The base directory is the directory containing the file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading script from {}", path.display()))?;
        Ok(Self {
            name: path.display().to_string(),
            content: Arc::from(content),
            base_dir: path.parent().map(|dir| dir.to_path_buf()),
        })
    }

    /// The display name used in diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The script content.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// The directory the script was loaded from, if any.
    pub fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }
}

impl From<String> for Script {
    fn from(content: String) -> Self {
        Self::from_content(content)
    }
}

impl From<&str> for Script {
    fn from(content: &str) -> Self {
        Self::from_content(content)
    }
}
