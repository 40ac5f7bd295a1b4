//! Mission Launch System
//!
//! A declarative launcher that brings up a group of cooperating processes
//! from a YAML launch description.
//!
//! # Overview
//!
//! A launch run goes through two phases:
//! - **Build**: arguments are resolved against operator overrides, package
//!   paths are located, templates are substituted and every unit's
//!   activation condition is evaluated. Any configuration problem surfaces
//!   here, before a single process is spawned.
//! - **Supervise**: activated units start in declaration order, waiting on
//!   declared readiness edges, and are stopped together on shutdown.
//!
//! # Example Launch File
//!
//! ```yaml
//! version: "1.0"
//!
//! args:
//!   result_filename:
//!     default: ""
//!
//! units:
//!   - id: bringup
//!     include:
//!       package: rosa_bringup
//!       file: launch/rosa_bringup.launch.yaml
//!     required: true
//!
//!   - id: mission_metrics
//!     process:
//!       package: suave_metrics
//!       executable: mission_metrics
//!     condition: { kind: equals, arg: result_filename, value: "" }
//!     depends_on: [bringup]
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod resolve;
pub mod runtime;

pub use cli::LaunchArgs;
pub use config::{LaunchFile, LaunchFileError, ReadySignal, SubstitutionContext, SubstitutionError};
pub use error::LaunchError;
pub use resolve::{evaluate, ArgumentResolver, Condition, PackageLocator, ResolvedArgs};
pub use runtime::{
    load_plan, GraphBuilder, LaunchGraph, LaunchOutcome, LaunchUnit, ManagedProcess,
    ResolvedPlan, Supervisor, SupervisorConfig, UnitEvent, UnitKind, UnitState,
};
