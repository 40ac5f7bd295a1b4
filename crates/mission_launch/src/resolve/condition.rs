//! Activation conditions over resolved arguments

use crate::error::LaunchError;
use crate::resolve::ResolvedArgs;
use serde::{Deserialize, Serialize};

/// Launch-time predicate deciding whether a unit activates.
///
/// In a launch file:
///
/// ```yaml
/// condition: { kind: not_equals, arg: result_filename, value: "" }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    #[default]
    Always,
    Equals { arg: String, value: String },
    NotEquals { arg: String, value: String },
}

impl Condition {
    pub fn equals(arg: impl Into<String>, value: impl Into<String>) -> Self {
        Condition::Equals {
            arg: arg.into(),
            value: value.into(),
        }
    }

    pub fn not_equals(arg: impl Into<String>, value: impl Into<String>) -> Self {
        Condition::NotEquals {
            arg: arg.into(),
            value: value.into(),
        }
    }

    /// The argument this condition reads, if any
    pub fn argument(&self) -> Option<&str> {
        match self {
            Condition::Always => None,
            Condition::Equals { arg, .. } | Condition::NotEquals { arg, .. } => Some(arg),
        }
    }

    /// Reject conditions over undeclared arguments (graph-build time)
    pub fn validate(&self, unit: &str, args: &ResolvedArgs) -> Result<(), LaunchError> {
        match self.argument() {
            Some(name) if !args.contains(name) => Err(LaunchError::UnknownArgument {
                name: name.to_string(),
                context: format!("condition of unit '{}'", unit),
            }),
            _ => Ok(()),
        }
    }
}

/// Evaluate a condition. `NotEquals` is the exact complement of `Equals`.
pub fn evaluate(condition: &Condition, args: &ResolvedArgs) -> bool {
    match condition {
        Condition::Always => true,
        Condition::Equals { arg, value } => args.get(arg) == Some(value.as_str()),
        Condition::NotEquals { arg, value } => args.get(arg) != Some(value.as_str()),
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Condition::Always => write!(f, "always"),
            Condition::Equals { arg, value } => write!(f, "{} == {:?}", arg, value),
            Condition::NotEquals { arg, value } => write!(f, "{} != {:?}", arg, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(value: &str) -> ResolvedArgs {
        [("result_filename", value), ("mission_type", "const_dist_mission")]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_equals_and_not_equals_are_complementary() {
        for resolved in ["", "run1.csv", " ", "RESULT", "\"\""] {
            let args = args(resolved);
            for literal in ["", "run1.csv", "other"] {
                let eq = evaluate(&Condition::equals("result_filename", literal), &args);
                let ne = evaluate(&Condition::not_equals("result_filename", literal), &args);
                assert_eq!(eq, resolved == literal, "{resolved:?} vs {literal:?}");
                assert_ne!(eq, ne, "{resolved:?} vs {literal:?}");
            }
        }
    }

    #[test]
    fn test_always() {
        assert!(evaluate(&Condition::Always, &ResolvedArgs::default()));
    }

    #[test]
    fn test_validate_unknown_argument() {
        let cond = Condition::equals("resutl_filename", "");
        let err = cond.validate("mission_metrics", &args("")).unwrap_err();
        assert!(matches!(err, LaunchError::UnknownArgument { ref name, .. } if name == "resutl_filename"));
        assert!(Condition::Always.validate("x", &ResolvedArgs::default()).is_ok());
    }

    #[test]
    fn test_parse_from_yaml() {
        let cond: Condition =
            serde_yaml::from_str("{ kind: not_equals, arg: result_filename, value: \"\" }").unwrap();
        assert_eq!(cond, Condition::not_equals("result_filename", ""));

        let cond: Condition = serde_yaml::from_str("kind: always").unwrap();
        assert_eq!(cond, Condition::Always);
    }
}
