// Per-test workspaces holding the fixture copy, secret files and bind-mount dirs
// Removed on drop unless retained

use crate::errors::{HarnessError, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

pub struct Workspace {
    dir: Option<TempDir>,
    path: PathBuf,
    retain: bool,
}

impl Workspace {
    /// Create a workspace in the system temp directory
    pub fn create(label: &str) -> Result<Self> {
        Self::create_in(None, label, false)
    }

    /// Create a workspace under `root` (or the system temp directory).
    /// The directory name is `<label>-<random>` so sibling tests never share one.
    pub fn create_in(root: Option<&Path>, label: &str, retain: bool) -> Result<Self> {
        let prefix = format!("{}-", sanitize_label(label));
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);

        let dir = match root {
            Some(root) => {
                fs::create_dir_all(root)
                    .map_err(|e| HarnessError::fixture(root, format!("cannot create root: {}", e)))?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
        .map_err(|e| {
            HarnessError::fixture(
                root.map(Path::to_path_buf).unwrap_or_else(std::env::temp_dir),
                format!("cannot create workspace: {}", e),
            )
        })?;

        let path = dir.path().to_path_buf();
        debug!(workspace = %path.display(), "created workspace");

        Ok(Self {
            dir: Some(dir),
            path,
            retain,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory name of the workspace, unique per test
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    pub fn join(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.path.join(relative)
    }

    /// Keep the directory on disk after this workspace is dropped
    pub fn retain(&mut self) {
        self.retain = true;
    }

    pub fn is_retained(&self) -> bool {
        self.retain
    }

    /// Copy a fixture into the workspace root, replacing any file with the same name.
    /// The bytes are copied as-is.
    pub fn copy_fixture(&self, source: &Path) -> Result<PathBuf> {
        let file_name = source
            .file_name()
            .ok_or_else(|| HarnessError::fixture(source, "fixture path has no file name"))?;

        if !source.is_file() {
            return Err(HarnessError::fixture(source, "fixture does not exist or is not a file"));
        }

        let target = self.path.join(file_name);
        if target.exists() {
            fs::remove_file(&target)
                .map_err(|e| HarnessError::fixture(&target, format!("cannot replace: {}", e)))?;
        }

        fs::copy(source, &target).map_err(|e| {
            HarnessError::fixture(source, format!("cannot copy to {}: {}", target.display(), e))
        })?;

        debug!(fixture = %source.display(), target = %target.display(), "copied fixture");
        Ok(target)
    }

    /// Write a secret file (relative to the workspace root) with exactly `contents`
    pub fn write_secret(&self, name: &str, contents: &str) -> Result<PathBuf> {
        let target = self.resolve(name)?;
        ensure_parent_dir(&target)?;

        fs::write(&target, contents)
            .map_err(|e| HarnessError::fixture(&target, format!("cannot write secret: {}", e)))?;

        debug!(secret = %target.display(), "wrote secret file");
        Ok(target)
    }

    /// Create a directory (and parents) inside the workspace, e.g. a bind-mount target
    pub fn create_dir_all(&self, relative: &str) -> Result<PathBuf> {
        let target = self.resolve(relative)?;
        fs::create_dir_all(&target)
            .map_err(|e| HarnessError::fixture(&target, format!("cannot create directory: {}", e)))?;
        Ok(target)
    }

    /// Resolve a workspace-relative path, rejecting anything that escapes the workspace
    fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let rel = Path::new(relative);
        if relative.trim().is_empty() {
            return Err(HarnessError::fixture(rel, "path cannot be empty"));
        }

        let escapes = rel.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes {
            return Err(HarnessError::fixture(
                rel,
                "path must stay inside the workspace",
            ));
        }

        Ok(self.path.join(rel))
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };

        if self.retain {
            let path = dir.keep();
            info!(workspace = %path.display(), "retaining workspace for inspection");
        } else if let Err(e) = dir.close() {
            warn!(workspace = %self.path.display(), error = %e, "failed to remove workspace");
        }
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| HarnessError::fixture(parent, format!("cannot create directory: {}", e)))?;
    }
    Ok(())
}

/// Reduce a label to characters that are safe in a directory name
fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '-' })
        .collect();
    let trimmed = cleaned.trim_matches('-');
    if trimmed.is_empty() {
        "workspace".to_string()
    } else {
        trimmed.to_string()
    }
}
