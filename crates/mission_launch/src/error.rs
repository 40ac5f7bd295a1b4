//! Launch error taxonomy

use crate::config::{LaunchFileError, ParamFileError, SubstitutionError};
use crate::resolve::LocateError;
use std::path::PathBuf;

/// Errors surfaced to the operator while building or running a launch.
///
/// Build-time variants abort before any process is spawned; see
/// [`LaunchError::is_configuration`].
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Invalid value for argument '{name}': {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("Unknown argument '{name}' referenced by {context}")]
    UnknownArgument { name: String, context: String },

    #[error("Package '{package}' not found (searched: {})", display_paths(.searched))]
    PackageNotFound {
        package: String,
        searched: Vec<PathBuf>,
    },

    #[error("Duplicate unit '{name}': declared by '{first}' and '{second}'")]
    DuplicateUnit {
        name: String,
        first: String,
        second: String,
    },

    #[error("Unit id '{id}' is declared twice (units #{first} and #{second})")]
    DuplicateId {
        id: String,
        /// 1-based positions in the launch file
        first: usize,
        second: usize,
    },

    #[error("Invalid unit '{unit}': {reason}")]
    InvalidUnit { unit: String, reason: String },

    #[error("Substitution failed in {context}: {source}")]
    Substitution {
        context: String,
        #[source]
        source: SubstitutionError,
    },

    #[error("Unit '{unit}': {source}")]
    ParamFile {
        unit: String,
        #[source]
        source: ParamFileError,
    },

    #[error(transparent)]
    LaunchFile(#[from] LaunchFileError),

    #[error("Failed to spawn unit '{unit}': {source}")]
    Spawn {
        unit: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Dependency '{dependency}' of unit '{unit}' failed: {reason}")]
    DependencyFailed {
        unit: String,
        dependency: String,
        reason: String,
    },

    #[error("Required unit '{unit}' failed: {cause}")]
    RequiredUnitFailed { unit: String, cause: String },
}

impl LaunchError {
    /// Whether the error was detected while building the plan (before any spawn).
    pub fn is_configuration(&self) -> bool {
        !matches!(
            self,
            LaunchError::Spawn { .. }
                | LaunchError::DependencyFailed { .. }
                | LaunchError::RequiredUnitFailed { .. }
        )
    }

    /// Wrap a substitution failure, promoting undeclared arguments and
    /// missing packages to their own taxonomy entries.
    pub(crate) fn substitution(context: impl Into<String>, source: SubstitutionError) -> Self {
        let context = context.into();
        match source {
            SubstitutionError::UndefinedArg(name) => LaunchError::UnknownArgument { name, context },
            SubstitutionError::Package(e) => e.into(),
            source => LaunchError::Substitution { context, source },
        }
    }
}

impl From<LocateError> for LaunchError {
    fn from(e: LocateError) -> Self {
        match e {
            LocateError::PackageNotFound { package, searched } => {
                LaunchError::PackageNotFound { package, searched }
            }
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "no search roots".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
