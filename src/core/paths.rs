//! core::paths
//!
//! Centralized path routing for a project's on-disk state.
//!
//! # Storage Layout
//!
//! Everything a project owns lives under its root directory:
//! - `workspace/` - The git working copy (created by the first build, never by polling)
//! - `state/build-state.json` - Persisted build records
//! - `workspace.lock` - Exclusive lock serialising polls and builds
//!
//! The lock and state live beside the workspace, not inside it, so a poll can
//! take the lock and read state without materialising the workspace.
//!
//! # Example
//!
//! ```
//! use gitscm::core::paths::ProjectPaths;
//! use std::path::PathBuf;
//!
//! let paths = ProjectPaths::new("/var/lib/gitscm/app");
//! assert_eq!(
//!     paths.state_file(),
//!     PathBuf::from("/var/lib/gitscm/app/state/build-state.json")
//! );
//! ```

use std::path::{Path, PathBuf};

/// On-disk locations for one project.
///
/// No code outside this module should join paths under the project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPaths {
    root: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The project root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The git working copy.
    pub fn workspace_dir(&self) -> PathBuf {
        self.root.join("workspace")
    }

    /// Directory holding persisted state.
    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }

    /// The build state file.
    pub fn state_file(&self) -> PathBuf {
        self.state_dir().join("build-state.json")
    }

    /// The workspace lock file.
    pub fn lock_file(&self) -> PathBuf {
        self.root.join("workspace.lock")
    }

    /// Ensure the root and state directories exist.
    ///
    /// Does not create the workspace.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.state_dir())?;
        Ok(())
    }
}
