//! Command-line interface for mission_launch

use crate::resolve::PackageLocator;
use crate::runtime::SupervisorConfig;
use argh::FromArgs;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Condition-gated, dependency-ordered launcher for mission process groups
#[derive(FromArgs, Debug)]
pub struct LaunchArgs {
    /// path to the launch file (default: launch/suave_rosa.launch.yaml)
    #[argh(positional, default = "String::from(\"launch/suave_rosa.launch.yaml\")")]
    pub launch_file: String,

    /// override launch arguments (format: key:=value)
    #[argh(option, short = 'a', from_str_fn(parse_arg_override))]
    pub arg: Vec<(String, String)>,

    /// extra install prefix searched for packages (repeatable)
    #[argh(option, short = 'p')]
    pub package_path: Vec<PathBuf>,

    /// register a package directory explicitly (format: name=dir)
    #[argh(option, from_str_fn(parse_package))]
    pub package: Vec<(String, PathBuf)>,

    /// show launch plan without executing
    #[argh(switch)]
    pub dry_run: bool,

    /// print the launch plan as JSON (implies --dry-run)
    #[argh(switch)]
    pub json: bool,

    /// validate launch file and exit
    #[argh(switch)]
    pub validate: bool,

    /// list declared launch arguments and exit
    #[argh(switch)]
    pub show_args: bool,

    /// let a later unit replace an earlier one with the same node name
    #[argh(switch)]
    pub allow_reregistration: bool,

    /// grace period between SIGTERM and SIGKILL in milliseconds (default: 5000)
    #[argh(option, default = "5000")]
    pub shutdown_timeout_ms: u64,

    /// longest wait for a dependency to become ready in milliseconds (default: 30000)
    #[argh(option, default = "30000")]
    pub ready_timeout_ms: u64,

    /// log level (error, warn, info, debug, trace)
    #[argh(option, short = 'l', default = "String::from(\"info\")")]
    pub log_level: String,
}

/// Parse argument override in format "key:=value"
fn parse_arg_override(s: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = s.splitn(2, ":=").collect();
    if parts.len() != 2 || parts[0].is_empty() {
        return Err(format!(
            "Invalid argument format '{}'. Expected 'key:=value'",
            s
        ));
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}

/// Parse package registration in format "name=dir"
fn parse_package(s: &str) -> Result<(String, PathBuf), String> {
    match s.split_once('=') {
        Some((name, dir)) if !name.is_empty() && !dir.is_empty() => {
            Ok((name.to_string(), PathBuf::from(dir)))
        }
        _ => Err(format!(
            "Invalid package format '{}'. Expected 'name=dir'",
            s
        )),
    }
}

impl LaunchArgs {
    /// Convert argument overrides to a HashMap
    pub fn arg_overrides(&self) -> HashMap<String, String> {
        self.arg.iter().cloned().collect()
    }

    /// Package locator from `AMENT_PREFIX_PATH` plus command-line additions
    pub fn locator(&self) -> PackageLocator {
        let locator = self
            .package_path
            .iter()
            .fold(PackageLocator::from_env(), |l, root| l.with_root(root));
        self.package
            .iter()
            .fold(locator, |l, (name, dir)| l.with_package(name, dir))
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            shutdown_timeout: Duration::from_millis(self.shutdown_timeout_ms),
            ready_timeout: Duration::from_millis(self.ready_timeout_ms),
            allow_reregistration: self.allow_reregistration,
            ..Default::default()
        }
    }
}
