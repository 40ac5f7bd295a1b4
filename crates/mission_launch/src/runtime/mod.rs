//! Runtime components: plan derivation and process supervision

pub mod graph;
mod include;
pub mod process;
pub mod supervisor;

pub use graph::*;
pub use process::*;
pub use supervisor::*;
