//! Substitution engine for $(arg), $(find), $(env), $(timestamp) patterns

use crate::resolve::{LocateError, PackageLocator, ResolvedArgs};
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, LazyLock};

/// Regex for matching substitution patterns: $(type value)
static SUBSTITUTION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\((\w+)\s+([^)]+)\)|\$\((\w+)\)").expect("substitution pattern is valid")
});

/// Substitution context containing all available variables
#[derive(Debug, Clone, Default)]
pub struct SubstitutionContext {
    /// Resolved launch arguments
    pub args: HashMap<String, String>,
    /// Launch file environment (checked before the process environment)
    pub env: HashMap<String, String>,
    /// Package lookup for $(find ...)
    pub locator: Option<Arc<PackageLocator>>,
}

impl SubstitutionContext {
    /// Create a new substitution context
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an argument
    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    /// Add all resolved arguments
    pub fn with_args(mut self, args: &ResolvedArgs) -> Self {
        self.args.extend(args.to_map());
        self
    }

    /// Add an environment variable
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    /// Add multiple environment variables
    pub fn with_envs<'a>(mut self, envs: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        self.env
            .extend(envs.into_iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Use a package locator for $(find ...)
    pub fn with_locator(mut self, locator: Arc<PackageLocator>) -> Self {
        self.locator = Some(locator);
        self
    }

    /// Substitute all patterns in a string.
    ///
    /// Single pass: substituted text is inserted verbatim and never scanned
    /// again, so argument values stay opaque.
    pub fn substitute(&self, input: &str) -> Result<String, SubstitutionError> {
        let mut error: Option<SubstitutionError> = None;

        let result = SUBSTITUTION_PATTERN.replace_all(input, |caps: &Captures| {
            if error.is_some() {
                return String::new();
            }

            match self.resolve_capture(caps) {
                Ok(value) => value,
                Err(e) => {
                    error = Some(e);
                    String::new()
                }
            }
        });

        if let Some(e) = error {
            return Err(e);
        }

        Ok(result.into_owned())
    }

    /// Resolve a single capture group
    fn resolve_capture(&self, caps: &Captures) -> Result<String, SubstitutionError> {
        // Pattern 1: $(type value) - e.g., $(arg mission_type)
        if let (Some(subst_type), Some(value)) = (caps.get(1), caps.get(2)) {
            return self.resolve_typed(subst_type.as_str(), value.as_str().trim());
        }

        // Pattern 2: $(type) - e.g., $(timestamp)
        if let Some(subst_type) = caps.get(3) {
            return self.resolve_typed(subst_type.as_str(), "");
        }

        Err(SubstitutionError::InvalidPattern(
            caps.get(0).map(|m| m.as_str().to_string()).unwrap_or_default(),
        ))
    }

    /// Resolve a typed substitution
    fn resolve_typed(&self, subst_type: &str, value: &str) -> Result<String, SubstitutionError> {
        match subst_type {
            "arg" => self.resolve_arg(value),
            "find" => self.resolve_find(value),
            "env" => self.resolve_env(value),
            "timestamp" => Ok(self.generate_timestamp(value)),
            "date" => Ok(self.generate_date(value)),
            _ => Err(SubstitutionError::UnknownType(subst_type.to_string())),
        }
    }

    /// Resolve an argument reference
    fn resolve_arg(&self, name: &str) -> Result<String, SubstitutionError> {
        self.args
            .get(name)
            .cloned()
            .ok_or_else(|| SubstitutionError::UndefinedArg(name.to_string()))
    }

    /// Resolve `pkg` or `pkg relative/path` to a share-directory path
    fn resolve_find(&self, value: &str) -> Result<String, SubstitutionError> {
        let mut parts = value.split_whitespace();
        let package = parts
            .next()
            .ok_or_else(|| SubstitutionError::InvalidPattern(format!("$(find {})", value)))?;
        let locator = self
            .locator
            .as_ref()
            .ok_or_else(|| SubstitutionError::NoLocator(package.to_string()))?;

        let mut path = locator.locate(package)?;
        for part in parts {
            path.push(Path::new(part));
        }
        Ok(path.to_string_lossy().into_owned())
    }

    /// Resolve an environment variable reference
    fn resolve_env(&self, name: &str) -> Result<String, SubstitutionError> {
        // First check our local env overrides
        if let Some(value) = self.env.get(name) {
            return Ok(value.clone());
        }

        // Then check system environment
        std::env::var(name).map_err(|_| SubstitutionError::UndefinedEnv(name.to_string()))
    }

    /// Generate a timestamp
    fn generate_timestamp(&self, format: &str) -> String {
        let now = chrono::Local::now();
        if format.is_empty() {
            // Default format: YYYYMMDD_HHMMSS
            now.format("%Y%m%d_%H%M%S").to_string()
        } else {
            now.format(format).to_string()
        }
    }

    /// Generate a date
    fn generate_date(&self, format: &str) -> String {
        let now = chrono::Local::now();
        if format.is_empty() {
            now.format("%Y-%m-%d").to_string()
        } else {
            now.format(format).to_string()
        }
    }
}

/// Render an ordered list the way collaborators expect path lists: `[a, b]`
pub fn bracketed_list<S: AsRef<str>>(items: &[S]) -> String {
    let joined = items
        .iter()
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join(", ");
    format!("[{}]", joined)
}

/// Errors that can occur during substitution
#[derive(Debug, thiserror::Error)]
pub enum SubstitutionError {
    #[error("Unknown substitution type: {0}")]
    UnknownType(String),

    #[error("Undefined argument: {0}")]
    UndefinedArg(String),

    #[error("Undefined environment variable: {0}")]
    UndefinedEnv(String),

    #[error(transparent)]
    Package(#[from] LocateError),

    #[error("No package locator available to find '{0}'")]
    NoLocator(String),

    #[error("Invalid substitution pattern: {0}")]
    InvalidPattern(String),
}
