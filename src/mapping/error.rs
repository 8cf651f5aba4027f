//! Error types for the mapping module

use std::path::PathBuf;

use thiserror::Error;

use super::action::ActionKind;

/// Errors around loading, storing and activating profiles
#[derive(Debug, Error)]
pub enum ProfileError {
    /// The profile is structurally invalid; every problem found is listed
    #[error("Profile validation failed: {}", .issues.join("; "))]
    Validation { issues: Vec<String> },

    /// The stored document has no or an unknown `format_version`
    #[error("Unsupported profile format version {found:?}, expected {expected}")]
    UnsupportedVersion { found: Option<u32>, expected: u32 },

    #[error("Failed to parse profile: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize profile: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to access profile file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unknown mode '{0}'")]
    UnknownMode(String),

    #[error("No user config directory available on this system")]
    NoConfigDir,
}

/// Internal evaluation fault. Skips one binding for one tick.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalFault {
    #[error("Slot state does not match action {0:?}")]
    StateMismatch(ActionKind),

    #[error("Evaluation produced a non-finite value")]
    NonFinite,

    #[error("{0}")]
    Internal(String),
}

/// A macro was re-triggered while running under the reject policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Macro is already running")]
pub struct MacroBusyError;
