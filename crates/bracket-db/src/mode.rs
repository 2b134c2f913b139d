//! Deployment mode and embedded data location.

use std::path::{Path, PathBuf};

/// Environment variable that switches the process into standalone mode.
pub const STANDALONE_ENV: &str = "BRACKET_STANDALONE";

/// Which storage backend the process runs against.
///
/// Read once at startup; changing it requires a restart. Defaults to
/// [`DeploymentMode::Server`], the value of an unset flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DeploymentMode {
    /// Local SQLite file, no database server required.
    Embedded,
    /// Networked Postgres server reached through a DSN.
    #[default]
    Server,
}

impl DeploymentMode {
    /// Interprets the raw value of the standalone flag.
    ///
    /// Only `"true"` (any case) selects [`DeploymentMode::Embedded`]; every
    /// other value, including an unset variable, selects
    /// [`DeploymentMode::Server`].
    pub fn from_flag(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("true") => Self::Embedded,
            _ => Self::Server,
        }
    }

    /// Short label used in logs and health output.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Embedded => "embedded",
            Self::Server => "server",
        }
    }
}

/// Where the embedded data file lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataLocation {
    /// Directory containing the running executable (release builds).
    NextToExecutable,
    /// Root of the source workspace (debug builds).
    SourceTree,
    /// A directory supplied by configuration.
    Explicit(PathBuf),
}

impl DataLocation {
    /// Picks [`DataLocation::SourceTree`] for debug builds and
    /// [`DataLocation::NextToExecutable`] for release builds.
    ///
    /// Decided at compile time; the launching environment plays no part, so
    /// a packaged binary started from a shell with cargo variables set still
    /// keeps its data beside the executable.
    pub fn detect() -> Self {
        if cfg!(debug_assertions) {
            Self::SourceTree
        } else {
            Self::NextToExecutable
        }
    }

    /// Resolves the base directory for the data file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the executable path cannot be determined.
    pub fn base_dir(&self) -> std::io::Result<PathBuf> {
        match self {
            Self::NextToExecutable => {
                let exe = std::env::current_exe()?;
                Ok(exe
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from(".")))
            }
            Self::SourceTree => Ok(source_root()),
            Self::Explicit(dir) => Ok(dir.clone()),
        }
    }
}

/// Workspace root: two levels above this crate's manifest.
fn source_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("..")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn true_in_any_case_selects_embedded() {
        for value in ["true", "TRUE", "True", "tRuE"] {
            assert_eq!(
                DeploymentMode::from_flag(Some(value)),
                DeploymentMode::Embedded,
                "value {value:?} should select embedded mode"
            );
        }
    }

    #[test]
    fn everything_else_selects_server() {
        for value in ["", "false", "1", "yes", " true", "true ", "truee"] {
            assert_eq!(
                DeploymentMode::from_flag(Some(value)),
                DeploymentMode::Server,
                "value {value:?} should select server mode"
            );
        }
        assert_eq!(DeploymentMode::from_flag(None), DeploymentMode::Server);
    }

    #[test]
    fn default_mode_is_server() {
        assert_eq!(DeploymentMode::default(), DeploymentMode::Server);
    }

    #[test]
    fn detection_follows_build_profile() {
        // cargo exports CARGO_MANIFEST_DIR to test binaries; it must not
        // change the answer.
        let expected = if cfg!(debug_assertions) {
            DataLocation::SourceTree
        } else {
            DataLocation::NextToExecutable
        };
        assert_eq!(DataLocation::detect(), expected);
    }

    #[test]
    fn explicit_location_is_returned_verbatim() {
        let dir = PathBuf::from("/var/lib/bracket");
        let location = DataLocation::Explicit(dir.clone());
        assert_eq!(location.base_dir().unwrap(), dir);
    }

    #[test]
    fn source_tree_is_workspace_root() {
        let base = DataLocation::SourceTree.base_dir().unwrap();
        assert!(
            base.join("crates").join("bracket-db").join("Cargo.toml").exists(),
            "source tree base should contain the workspace crates: {}",
            base.display()
        );
    }
}
