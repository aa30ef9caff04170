//! Interactive editing through an external editor

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, warn};

use crate::error::{ProtopadError, Result};

/// An editor command run on a scratch file
pub struct Editor {
    command: String,
    scratch: PathBuf,
}

impl Editor {
    pub fn new(command: impl Into<String>, scratch: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            scratch: scratch.into(),
        }
    }

    /// Pick the editor command: an explicit one, then the configured one,
    /// then `$EDITOR`
    pub fn resolve(
        explicit: Option<&str>,
        configured: Option<&str>,
        scratch: impl Into<PathBuf>,
    ) -> Result<Self> {
        let command = [
            explicit.map(str::to_string),
            configured.map(str::to_string),
            env::var("EDITOR").ok(),
        ]
        .into_iter()
        .flatten()
        .map(|c| c.trim().to_string())
        .find(|c| !c.is_empty())
        .ok_or(ProtopadError::EditorUnavailable)?;
        Ok(Self::new(command, scratch))
    }

    pub fn scratch(&self) -> &Path {
        &self.scratch
    }

    /// Write `content` to the scratch file, open it, and return what was saved
    pub fn edit(&self, content: &str) -> Result<String> {
        if let Some(parent) = self.scratch.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.scratch, content)?;

        debug!("Running `{} {}`", self.command, self.scratch.display());
        let status = Command::new("sh")
            .arg("-c")
            .arg(format!("{} \"$1\"", self.command))
            .arg("protopad-editor")
            .arg(&self.scratch)
            .status()?;
        if !status.success() {
            warn!("Editor `{}` exited with {}", self.command, status);
        }

        Ok(fs::read_to_string(&self.scratch)?)
    }
}
