//! Launch file YAML schema definitions

use crate::resolve::Condition;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Root launch file configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchFile {
    /// Launch file format version
    #[serde(default = "default_version")]
    pub version: String,

    /// Argument declarations, in declaration order
    #[serde(default)]
    pub args: IndexMap<String, ArgDefinition>,

    /// Environment variables (applied to all processes)
    #[serde(default)]
    pub env: IndexMap<String, String>,

    /// Launch units; declaration order is activation order
    #[serde(default)]
    pub units: Vec<UnitSpec>,
}

fn default_version() -> String {
    "1.0".to_string()
}

/// Argument declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArgDefinition {
    /// Default value; absent means the argument must be provided
    #[serde(default)]
    pub default: Option<ArgValue>,
    /// Allowed values
    #[serde(default)]
    pub choices: Option<Vec<String>>,
    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
}

/// Scalar values: strings, booleans, or numbers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl ArgValue {
    /// Convert to string representation
    pub fn render(&self) -> String {
        match self {
            ArgValue::Bool(b) => b.to_string(),
            ArgValue::Int(i) => i.to_string(),
            ArgValue::Float(f) => f.to_string(),
            ArgValue::String(s) => s.clone(),
        }
    }
}

impl From<&str> for ArgValue {
    fn from(s: &str) -> Self {
        ArgValue::String(s.to_string())
    }
}

/// One declared launch unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitSpec {
    /// Unique identifier within the launch file
    pub id: String,

    /// Spawn an executable. Mutually exclusive with `include`
    #[serde(default)]
    pub process: Option<ProcessSpec>,

    /// Include another launch file. Mutually exclusive with `process`
    #[serde(default)]
    pub include: Option<IncludeSpec>,

    /// Argument overrides handed to an included launch file
    #[serde(default)]
    pub args: IndexMap<String, ArgTemplate>,

    /// Process parameters
    #[serde(default)]
    pub parameters: ParameterSpec,

    /// Environment variables specific to this unit
    #[serde(default)]
    pub env: IndexMap<String, String>,

    /// Activation condition
    #[serde(default)]
    pub condition: Condition,

    /// Earlier units that must be ready before this one starts
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Failure of a required unit aborts the whole launch
    #[serde(default)]
    pub required: bool,

    /// When this unit counts as ready for its dependents
    #[serde(default)]
    pub ready: ReadySignal,

    /// Startup delay in milliseconds after dependencies are ready
    #[serde(default)]
    pub startup_delay_ms: Option<u64>,
}

/// Executable to spawn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Package shipping the executable
    #[serde(default)]
    pub package: Option<String>,

    /// Executable name (resolved inside `package`) or path
    pub executable: String,

    /// Registration name; defaults to the executable file name
    #[serde(default)]
    pub name: Option<String>,

    /// Raw arguments passed directly to the executable
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for the process
    #[serde(default)]
    pub working_dir: Option<String>,
}

/// Sub-launch file to include
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncludeSpec {
    /// Package whose share directory `file` is relative to
    #[serde(default)]
    pub package: Option<String>,

    /// Launch file path; relative to the package share directory, or to the
    /// including file when no package is given
    pub file: String,
}

/// Include argument: a scalar or an ordered list rendered as `[a, b]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgTemplate {
    List(Vec<String>),
    Scalar(ArgValue),
}

/// Parameter sources for a process unit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Parameter files, merged in order
    #[serde(default)]
    pub files: Vec<String>,

    /// Inline values; these win over file contents
    #[serde(default)]
    pub values: IndexMap<String, ArgValue>,
}

impl ParameterSpec {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.values.is_empty()
    }
}

/// Readiness signal a unit exposes to its dependents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReadySignal {
    /// Process spawned, or included launch fully activated
    #[default]
    Started,
    /// Exited successfully
    Exited,
    /// Kept running for the given time
    Delay { ms: u64 },
    /// Printed a line matching the regex
    Pattern { regex: String },
}

impl ReadySignal {
    /// Short description used in plan output
    pub fn describe(&self) -> String {
        match self {
            ReadySignal::Started => "started".to_string(),
            ReadySignal::Exited => "exited successfully".to_string(),
            ReadySignal::Delay { ms } => format!("running for {}ms", ms),
            ReadySignal::Pattern { regex } => format!("output matches /{}/", regex),
        }
    }
}

impl LaunchFile {
    /// Load launch file from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LaunchFileError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| LaunchFileError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse launch file from YAML string
    pub fn from_yaml(content: &str) -> Result<Self, LaunchFileError> {
        let launch_file: LaunchFile =
            serde_yaml::from_str(content).map_err(LaunchFileError::Parse)?;
        launch_file.validate()?;
        Ok(launch_file)
    }

    /// Validate the launch file configuration
    pub fn validate(&self) -> Result<(), LaunchFileError> {
        let ids: HashSet<&str> = self.units.iter().map(|u| u.id.as_str()).collect();

        for unit in &self.units {
            if unit.id.trim().is_empty() {
                return Err(LaunchFileError::Validation(
                    "Unit with empty 'id'".to_string(),
                ));
            }

            match (&unit.process, &unit.include) {
                (Some(_), None) => {
                    if !unit.args.is_empty() {
                        return Err(LaunchFileError::Validation(format!(
                            "Unit '{}': 'args' only applies to 'include' units, use 'process.args'",
                            unit.id
                        )));
                    }
                }
                (None, Some(_)) => {
                    if !unit.parameters.is_empty() {
                        return Err(LaunchFileError::Validation(format!(
                            "Unit '{}': 'parameters' only applies to 'process' units",
                            unit.id
                        )));
                    }
                }
                (Some(_), Some(_)) => {
                    return Err(LaunchFileError::Validation(format!(
                        "Unit '{}': cannot specify both 'process' and 'include'",
                        unit.id
                    )));
                }
                (None, None) => {
                    return Err(LaunchFileError::Validation(format!(
                        "Unit '{}': must specify either 'process' or 'include'",
                        unit.id
                    )));
                }
            }

            // Check that dependencies reference existing units
            for dep in &unit.depends_on {
                if !ids.contains(dep.as_str()) {
                    return Err(LaunchFileError::Validation(format!(
                        "Unit '{}': depends on unknown unit '{}'",
                        unit.id, dep
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Errors that can occur when loading a launch file
#[derive(Debug, thiserror::Error)]
pub enum LaunchFileError {
    #[error("Failed to read launch file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse launch file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}
