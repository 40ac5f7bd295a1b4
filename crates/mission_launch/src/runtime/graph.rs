//! Launch graph construction and plan derivation

use crate::config::{
    bracketed_list, load_param_file, merge_parameters, ArgTemplate, ArgValue, LaunchFile,
    Parameters, ReadySignal, SubstitutionContext, UnitSpec,
};
use crate::error::LaunchError;
use crate::resolve::{evaluate, ArgumentResolver, Condition, PackageLocator, ResolvedArgs};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A fully resolved launch unit. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaunchUnit {
    pub id: String,
    pub kind: UnitKind,
    pub condition: Condition,
    /// Inline parameter values (templates resolved)
    pub parameters: Parameters,
    /// Parameter files, in merge order
    pub parameter_files: Vec<PathBuf>,
    pub env: IndexMap<String, String>,
    pub depends_on: Vec<String>,
    pub required: bool,
    pub ready: ReadySignal,
    pub startup_delay_ms: Option<u64>,
}

/// What a unit starts
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnitKind {
    Process {
        /// Owning package, when the executable was located through one
        package: Option<String>,
        executable: PathBuf,
        name: Option<String>,
        args: Vec<String>,
        working_dir: Option<PathBuf>,
    },
    Include {
        path: PathBuf,
        args: IndexMap<String, String>,
    },
}

impl LaunchUnit {
    /// Name the process runs under: the explicit `name`, else the executable's
    /// file name. Includes have none.
    pub fn node_name(&self) -> Option<String> {
        match &self.kind {
            UnitKind::Process {
                name: Some(name), ..
            } => Some(name.clone()),
            UnitKind::Process { executable, .. } => executable
                .file_name()
                .map(|n| n.to_string_lossy().into_owned()),
            UnitKind::Include { .. } => None,
        }
    }

    /// Identity that must be unique among activated units.
    ///
    /// Only an explicit `name` or a package executable registers; bare
    /// executables such as `/bin/sh` may run any number of times.
    pub fn registration_name(&self) -> Option<String> {
        match &self.kind {
            UnitKind::Process {
                name: Some(name), ..
            } => Some(name.clone()),
            UnitKind::Process {
                package: Some(_), ..
            } => self.node_name(),
            _ => None,
        }
    }

    pub fn is_include(&self) -> bool {
        matches!(self.kind, UnitKind::Include { .. })
    }
}

/// Composes unit specs into a [`LaunchGraph`].
///
/// Packages are looked up through the injected locator; templates are
/// resolved against the final argument values.
pub struct GraphBuilder {
    args: ResolvedArgs,
    locator: Arc<PackageLocator>,
    env: IndexMap<String, String>,
    base_dir: PathBuf,
    allow_reregistration: bool,
}

impl GraphBuilder {
    pub fn new(args: ResolvedArgs, locator: Arc<PackageLocator>) -> Self {
        Self {
            args,
            locator,
            env: IndexMap::new(),
            base_dir: PathBuf::from("."),
            allow_reregistration: false,
        }
    }

    /// Global environment shared by every process
    pub fn env(mut self, env: IndexMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Directory that package-less include paths are relative to
    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    /// Let a later activated unit replace an earlier one with the same name
    pub fn allow_reregistration(mut self, allow: bool) -> Self {
        self.allow_reregistration = allow;
        self
    }

    fn context(&self) -> SubstitutionContext {
        SubstitutionContext::new()
            .with_args(&self.args)
            .with_locator(self.locator.clone())
    }

    /// Build the graph. Declaration order is preserved verbatim.
    pub fn build(&self, specs: &[UnitSpec]) -> Result<LaunchGraph, LaunchError> {
        // Global env first, so $(env ..) in units sees resolved values
        let base = self.context();
        let mut env = IndexMap::new();
        for (key, value) in &self.env {
            env.insert(key.clone(), substitute(&base, value, || format!("global env '{}'", key))?);
        }
        let ctx = base.with_envs(&env);

        let mut seen: HashMap<&str, usize> = HashMap::new();
        let mut units = Vec::with_capacity(specs.len());

        for (position, spec) in specs.iter().enumerate() {
            if let Some(first) = seen.get(spec.id.as_str()) {
                return Err(LaunchError::DuplicateId {
                    id: spec.id.clone(),
                    first: first + 1,
                    second: position + 1,
                });
            }

            spec.condition.validate(&spec.id, &self.args)?;

            for dep in &spec.depends_on {
                if !seen.contains_key(dep.as_str()) {
                    return Err(LaunchError::InvalidUnit {
                        unit: spec.id.clone(),
                        reason: format!(
                            "depends on '{}', which is not declared before it",
                            dep
                        ),
                    });
                }
            }

            units.push(self.build_unit(spec, &ctx)?);
            seen.insert(spec.id.as_str(), position);
        }

        Ok(LaunchGraph {
            units,
            args: self.args.clone(),
            env,
            allow_reregistration: self.allow_reregistration,
        })
    }

    fn build_unit(&self, spec: &UnitSpec, ctx: &SubstitutionContext) -> Result<LaunchUnit, LaunchError> {
        let id = spec.id.as_str();

        let kind = if let Some(process) = &spec.process {
            let executable = substitute(ctx, &process.executable, || format!("unit '{}' executable", id))?;
            let executable = match &process.package {
                Some(package) if !executable.contains(std::path::MAIN_SEPARATOR) => {
                    self.locator.locate_executable(package, &executable)?
                }
                Some(package) => {
                    // Still fail fast on a missing package
                    self.locator.locate(package)?;
                    PathBuf::from(executable)
                }
                None => PathBuf::from(executable),
            };

            let args = process
                .args
                .iter()
                .map(|a| substitute(ctx, a, || format!("unit '{}' args", id)))
                .collect::<Result<Vec<_>, _>>()?;

            let working_dir = process
                .working_dir
                .as_ref()
                .map(|d| substitute(ctx, d, || format!("unit '{}' working_dir", id)).map(PathBuf::from))
                .transpose()?;

            UnitKind::Process {
                package: process.package.clone(),
                executable,
                name: process.name.clone(),
                args,
                working_dir,
            }
        } else if let Some(include) = &spec.include {
            let file = substitute(ctx, &include.file, || format!("unit '{}' include file", id))?;
            let path = match &include.package {
                Some(package) => self.locator.locate(package)?.join(&file),
                None => self.base_dir.join(&file),
            };
            if !path.is_file() {
                return Err(LaunchError::InvalidUnit {
                    unit: id.to_string(),
                    reason: format!("included launch file '{}' does not exist", path.display()),
                });
            }
            if matches!(spec.ready, ReadySignal::Pattern { .. }) {
                return Err(LaunchError::InvalidUnit {
                    unit: id.to_string(),
                    reason: "include units cannot use a pattern ready signal".to_string(),
                });
            }

            let mut args = IndexMap::new();
            for (name, template) in &spec.args {
                let context = || format!("unit '{}' include arg '{}'", id, name);
                let value = match template {
                    ArgTemplate::Scalar(value) => substitute(ctx, &value.render(), context)?,
                    ArgTemplate::List(items) => {
                        let items = items
                            .iter()
                            .map(|item| substitute(ctx, item, context))
                            .collect::<Result<Vec<_>, _>>()?;
                        bracketed_list(&items)
                    }
                };
                args.insert(name.clone(), value);
            }

            UnitKind::Include { path, args }
        } else {
            return Err(LaunchError::InvalidUnit {
                unit: id.to_string(),
                reason: "must specify either 'process' or 'include'".to_string(),
            });
        };

        if let ReadySignal::Pattern { regex } = &spec.ready {
            regex::Regex::new(regex).map_err(|e| LaunchError::InvalidUnit {
                unit: id.to_string(),
                reason: format!("invalid ready pattern: {}", e),
            })?;
        }

        let mut parameters = Parameters::new();
        for (key, value) in &spec.parameters.values {
            let value = match value {
                ArgValue::String(s) => ArgValue::String(substitute(ctx, s, || {
                    format!("unit '{}' parameter '{}'", id, key)
                })?),
                other => other.clone(),
            };
            parameters.insert(key.clone(), value);
        }

        let parameter_files = spec
            .parameters
            .files
            .iter()
            .map(|f| substitute(ctx, f, || format!("unit '{}' parameter file", id)).map(PathBuf::from))
            .collect::<Result<Vec<_>, _>>()?;

        let mut env = IndexMap::new();
        for (key, value) in &spec.env {
            env.insert(
                key.clone(),
                substitute(ctx, value, || format!("unit '{}' env '{}'", id, key))?,
            );
        }

        Ok(LaunchUnit {
            id: id.to_string(),
            kind,
            condition: spec.condition.clone(),
            parameters,
            parameter_files,
            env,
            depends_on: spec.depends_on.clone(),
            required: spec.required,
            ready: spec.ready.clone(),
            startup_delay_ms: spec.startup_delay_ms,
        })
    }
}

fn substitute(
    ctx: &SubstitutionContext,
    template: &str,
    context: impl Fn() -> String,
) -> Result<String, LaunchError> {
    ctx.substitute(template)
        .map_err(|e| LaunchError::substitution(context(), e))
}

/// Ordered sequence of launch units; insertion order is activation order
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchGraph {
    pub units: Vec<LaunchUnit>,
    pub args: ResolvedArgs,
    /// Global environment (resolved)
    pub env: IndexMap<String, String>,
    allow_reregistration: bool,
}

/// Why a unit was left out of the plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    ConditionFalse,
    Superseded { by: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedUnit {
    pub id: String,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// An activated unit with its effective parameters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedUnit {
    pub unit: LaunchUnit,
    /// Parameter files merged with inline values
    pub parameters: Parameters,
}

/// Units whose condition held, in activation order. Computed once per run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedPlan {
    pub units: Vec<PlannedUnit>,
    pub skipped: Vec<SkippedUnit>,
    pub args: IndexMap<String, String>,
    pub env: IndexMap<String, String>,
}

impl LaunchGraph {
    /// Evaluate conditions and derive the plan
    pub fn resolve_plan(&self) -> Result<ResolvedPlan, LaunchError> {
        let mut skipped = Vec::new();
        let mut active: Vec<&LaunchUnit> = Vec::new();

        for unit in &self.units {
            if evaluate(&unit.condition, &self.args) {
                active.push(unit);
            } else {
                log::debug!("[{}] Skipped: condition '{}' is false", unit.id, unit.condition);
                skipped.push(SkippedUnit {
                    id: unit.id.clone(),
                    reason: SkipReason::ConditionFalse,
                });
            }
        }

        // Registration names must be unique among activated processes
        let mut registered: HashMap<String, usize> = HashMap::new();
        let mut superseded: HashSet<usize> = HashSet::new();
        for (index, unit) in active.iter().enumerate() {
            let Some(name) = unit.registration_name() else {
                continue;
            };
            if let Some(previous) = registered.insert(name.clone(), index) {
                let first = &active[previous].id;
                if !self.allow_reregistration {
                    return Err(LaunchError::DuplicateUnit {
                        name,
                        first: first.clone(),
                        second: unit.id.clone(),
                    });
                }
                log::warn!("[{}] Re-registers '{}', replacing unit '{}'", unit.id, name, first);
                superseded.insert(previous);
                skipped.push(SkippedUnit {
                    id: first.clone(),
                    reason: SkipReason::Superseded { by: unit.id.clone() },
                });
            }
        }

        let activated: HashSet<&str> = active
            .iter()
            .enumerate()
            .filter(|(i, _)| !superseded.contains(i))
            .map(|(_, u)| u.id.as_str())
            .collect();

        let mut units = Vec::with_capacity(activated.len());
        for (index, unit) in active.iter().enumerate() {
            if superseded.contains(&index) {
                continue;
            }

            let mut unit = (*unit).clone();
            unit.depends_on.retain(|dep| {
                let keep = activated.contains(dep.as_str());
                if !keep {
                    log::info!("[{}] Dependency '{}' is not activated, ignoring it", unit.id, dep);
                }
                keep
            });

            let node_name = unit.node_name();
            let files = unit
                .parameter_files
                .iter()
                .map(|path| load_param_file(path, node_name.as_deref()))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|source| LaunchError::ParamFile {
                    unit: unit.id.clone(),
                    source,
                })?;
            let parameters = merge_parameters(files, &unit.parameters);

            units.push(PlannedUnit { unit, parameters });
        }

        Ok(ResolvedPlan {
            units,
            skipped,
            args: self
                .args
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            env: self.env.clone(),
        })
    }
}

impl ResolvedPlan {
    pub fn unit(&self, id: &str) -> Option<&PlannedUnit> {
        self.units.iter().find(|p| p.unit.id == id)
    }

    pub fn is_activated(&self, id: &str) -> bool {
        self.unit(id).is_some()
    }
}

/// Load, resolve and plan a launch file in one go.
///
/// Overrides must name declared arguments. Package-less include paths are
/// resolved relative to the file's directory.
pub fn load_plan(
    path: &Path,
    overrides: &HashMap<String, String>,
    locator: Arc<PackageLocator>,
    allow_reregistration: bool,
) -> Result<ResolvedPlan, LaunchError> {
    let launch_file = LaunchFile::from_file(path)?;
    let args = ArgumentResolver::from_launch_file(&launch_file)
        .with_locator(locator.clone())
        .resolve(overrides)?;
    let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

    GraphBuilder::new(args, locator)
        .env(launch_file.env.clone())
        .base_dir(base_dir)
        .allow_reregistration(allow_reregistration)
        .build(&launch_file.units)?
        .resolve_plan()
}

/// Display the launch plan in a human-readable format
impl std::fmt::Display for ResolvedPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Launch Plan")?;
        writeln!(f, "===========")?;
        writeln!(f)?;

        if !self.args.is_empty() {
            writeln!(f, "Arguments:")?;
            for (key, value) in &self.args {
                writeln!(f, "  {}: {:?}", key, value)?;
            }
            writeln!(f)?;
        }

        if !self.env.is_empty() {
            writeln!(f, "Global Environment:")?;
            for (key, value) in &self.env {
                writeln!(f, "  {}={}", key, value)?;
            }
            writeln!(f)?;
        }

        writeln!(f, "Units (in activation order):")?;
        for (i, planned) in self.units.iter().enumerate() {
            let unit = &planned.unit;
            writeln!(f)?;
            writeln!(
                f,
                "  {}. {}{}",
                i + 1,
                unit.id,
                if unit.required { " [required]" } else { "" }
            )?;

            match &unit.kind {
                UnitKind::Process {
                    executable, args, ..
                } => {
                    writeln!(f, "     Command: {} {}", executable.display(), args.join(" "))?;
                }
                UnitKind::Include { path, args } => {
                    writeln!(f, "     Include: {}", path.display())?;
                    for (key, value) in args {
                        writeln!(f, "       {}:={}", key, value)?;
                    }
                }
            }

            if unit.condition != Condition::Always {
                writeln!(f, "     Condition: {}", unit.condition)?;
            }

            if !unit.depends_on.is_empty() {
                writeln!(f, "     Depends on: {}", unit.depends_on.join(", "))?;
            }

            if unit.ready != ReadySignal::Started {
                writeln!(f, "     Ready when: {}", unit.ready.describe())?;
            }

            if let Some(delay) = unit.startup_delay_ms {
                writeln!(f, "     Startup delay: {}ms", delay)?;
            }

            if !planned.parameters.is_empty() {
                writeln!(f, "     Parameters:")?;
                for (key, value) in &planned.parameters {
                    writeln!(f, "       {}: {}", key, value.render())?;
                }
            }

            if !unit.env.is_empty() {
                writeln!(f, "     Environment:")?;
                for (key, value) in &unit.env {
                    writeln!(f, "       {}={}", key, value)?;
                }
            }
        }

        if !self.skipped.is_empty() {
            writeln!(f)?;
            writeln!(f, "Skipped:")?;
            for skipped in &self.skipped {
                match &skipped.reason {
                    SkipReason::ConditionFalse => writeln!(f, "  {} (condition false)", skipped.id)?,
                    SkipReason::Superseded { by } => {
                        writeln!(f, "  {} (superseded by {})", skipped.id, by)?
                    }
                }
            }
        }

        Ok(())
    }
}
