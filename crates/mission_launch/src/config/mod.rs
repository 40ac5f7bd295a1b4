//! Launch file configuration parsing, substitution and parameter files

mod launch_file;
mod params;
mod substitution;

pub use launch_file::*;
pub use params::*;
pub use substitution::*;
