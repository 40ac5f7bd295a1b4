//! Launch argument declaration and resolution

use crate::config::{ArgValue, LaunchFile, SubstitutionContext};
use crate::error::LaunchError;
use crate::resolve::PackageLocator;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;

/// A declared launch argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchArgument {
    pub name: String,
    /// Default value; `None` makes the argument required
    pub default: Option<String>,
    /// Permitted values, if restricted
    pub allowed_values: Option<Vec<String>>,
    pub description: Option<String>,
}

impl LaunchArgument {
    fn check(&self, value: &str) -> Result<(), LaunchError> {
        match &self.allowed_values {
            Some(allowed) if !allowed.iter().any(|v| v == value) => {
                Err(LaunchError::InvalidArgument {
                    name: self.name.clone(),
                    reason: format!("'{}' is not one of [{}]", value, allowed.join(", ")),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Collects argument declarations and resolves them against overrides
#[derive(Debug, Clone, Default)]
pub struct ArgumentResolver {
    declared: IndexMap<String, LaunchArgument>,
    locator: Option<Arc<PackageLocator>>,
}

impl ArgumentResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare every argument of a launch file, in file order
    pub fn from_launch_file(launch_file: &LaunchFile) -> Self {
        let mut resolver = Self::new();
        for (name, def) in &launch_file.args {
            resolver.declare(
                name,
                def.default.as_ref().map(ArgValue::render),
                def.choices.clone(),
            );
            if let Some(arg) = resolver.declared.get_mut(name) {
                arg.description = def.description.clone();
            }
        }
        resolver
    }

    /// Declare an argument. Re-declaring a name replaces the earlier declaration.
    pub fn declare(
        &mut self,
        name: impl Into<String>,
        default: Option<String>,
        allowed_values: Option<Vec<String>>,
    ) {
        let name = name.into();
        if self.declared.contains_key(&name) {
            log::debug!("Argument '{}' re-declared", name);
        }
        self.declared.insert(
            name.clone(),
            LaunchArgument {
                name,
                default,
                allowed_values,
                description: None,
            },
        );
    }

    /// Locator for `$(find ..)` in argument defaults
    pub fn with_locator(mut self, locator: Arc<PackageLocator>) -> Self {
        self.locator = Some(locator);
        self
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.declared.contains_key(name)
    }

    /// Declared arguments in declaration order
    pub fn arguments(&self) -> impl Iterator<Item = &LaunchArgument> {
        self.declared.values()
    }

    /// Apply overrides on top of declared defaults.
    ///
    /// Defaults may be templates and are substituted here, once, against
    /// the arguments declared before them. Overrides are taken verbatim.
    /// Fails on overrides for undeclared names, on values outside
    /// `allowed_values`, and on required arguments left unset.
    pub fn resolve(&self, overrides: &HashMap<String, String>) -> Result<ResolvedArgs, LaunchError> {
        let mut unknown: Vec<&String> = overrides
            .keys()
            .filter(|name| !self.declared.contains_key(*name))
            .collect();
        unknown.sort();
        if let Some(name) = unknown.first() {
            return Err(LaunchError::UnknownArgument {
                name: name.to_string(),
                context: "launch overrides".to_string(),
            });
        }

        let mut ctx = SubstitutionContext::new();
        if let Some(locator) = &self.locator {
            ctx = ctx.with_locator(locator.clone());
        }

        let mut values = IndexMap::with_capacity(self.declared.len());
        for (name, arg) in &self.declared {
            let value = match (overrides.get(name), &arg.default) {
                (Some(value), _) => value.clone(),
                (None, Some(default)) => ctx.substitute(default).map_err(|e| {
                    LaunchError::substitution(format!("default of argument '{}'", name), e)
                })?,
                (None, None) => {
                    return Err(LaunchError::InvalidArgument {
                        name: name.clone(),
                        reason: "required argument has no default and was not provided".to_string(),
                    });
                }
            };
            arg.check(&value)?;
            ctx.args.insert(name.clone(), value.clone());
            values.insert(name.clone(), value);
        }

        Ok(ResolvedArgs(Arc::new(values)))
    }
}

/// Immutable name -> value mapping produced by [`ArgumentResolver::resolve`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedArgs(Arc<IndexMap<String, String>>);

impl ResolvedArgs {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copy out as a plain map (for substitution contexts)
    pub fn to_map(&self) -> HashMap<String, String> {
        self.0.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ResolvedArgs {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        ResolvedArgs(Arc::new(
            iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mission_resolver() -> ArgumentResolver {
        let mut resolver = ArgumentResolver::new();
        resolver.declare(
            "mission_type",
            Some("time_constrained_mission".to_string()),
            Some(vec![
                "time_constrained_mission".to_string(),
                "const_dist_mission".to_string(),
            ]),
        );
        resolver.declare("result_filename", Some(String::new()), None);
        resolver
    }

    fn overrides(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_apply() {
        let args = mission_resolver().resolve(&HashMap::new()).unwrap();
        assert_eq!(args.get("mission_type"), Some("time_constrained_mission"));
        assert_eq!(args.get("result_filename"), Some(""));
        let names: Vec<_> = args.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["mission_type", "result_filename"]);
    }

    #[test]
    fn test_override_within_choices() {
        let args = mission_resolver()
            .resolve(&overrides(&[("mission_type", "const_dist_mission")]))
            .unwrap();
        assert_eq!(args.get("mission_type"), Some("const_dist_mission"));
    }

    #[test]
    fn test_override_outside_choices() {
        let result = mission_resolver().resolve(&overrides(&[("mission_type", "warp_drive")]));
        assert!(matches!(
            result,
            Err(LaunchError::InvalidArgument { ref name, .. }) if name == "mission_type"
        ));
    }

    #[test]
    fn test_unknown_override() {
        let result = mission_resolver().resolve(&overrides(&[("mision_type", "x")]));
        assert!(matches!(
            result,
            Err(LaunchError::UnknownArgument { ref name, .. }) if name == "mision_type"
        ));
    }

    #[test]
    fn test_required_argument_missing() {
        let mut resolver = ArgumentResolver::new();
        resolver.declare("robot", None, None);

        assert!(matches!(
            resolver.resolve(&HashMap::new()),
            Err(LaunchError::InvalidArgument { .. })
        ));
        let args = resolver.resolve(&overrides(&[("robot", "bluerov")])).unwrap();
        assert_eq!(args.get("robot"), Some("bluerov"));
    }

    #[test]
    fn test_default_outside_choices_is_rejected() {
        let mut resolver = ArgumentResolver::new();
        resolver.declare(
            "mode",
            Some("fast".to_string()),
            Some(vec!["slow".to_string()]),
        );
        assert!(resolver.resolve(&HashMap::new()).is_err());
    }

    #[test]
    fn test_defaults_are_substituted_once() {
        let mut resolver = ArgumentResolver::new();
        resolver.declare("mission_type", Some("const_dist_mission".to_string()), None);
        resolver.declare(
            "result_filename",
            Some("$(arg mission_type).csv".to_string()),
            None,
        );

        let args = resolver.resolve(&HashMap::new()).unwrap();
        assert_eq!(args.get("result_filename"), Some("const_dist_mission.csv"));

        // Overrides are opaque, even when they look like templates
        let args = resolver
            .resolve(&overrides(&[("result_filename", "run$(1).csv")]))
            .unwrap();
        assert_eq!(args.get("result_filename"), Some("run$(1).csv"));
    }

    #[test]
    fn test_default_referencing_later_argument_fails() {
        let mut resolver = ArgumentResolver::new();
        resolver.declare("a", Some("$(arg b)".to_string()), None);
        resolver.declare("b", Some("x".to_string()), None);

        assert!(matches!(
            resolver.resolve(&HashMap::new()),
            Err(LaunchError::UnknownArgument { ref name, .. }) if name == "b"
        ));
    }

    #[test]
    fn test_from_launch_file() {
        let yaml = r#"
args:
  mission_type:
    default: time_constrained_mission
    choices: [time_constrained_mission, const_dist_mission]
    description: Desired mission type
  result_filename:
    default: ""
units: []
"#;
        let launch_file = LaunchFile::from_yaml(yaml).unwrap();
        let resolver = ArgumentResolver::from_launch_file(&launch_file);
        assert!(resolver.is_declared("mission_type"));
        let described: Vec<_> = resolver
            .arguments()
            .filter_map(|a| a.description.as_deref())
            .collect();
        assert_eq!(described, vec!["Desired mission type"]);
    }
}
