//! Launch-time resolution: arguments, packages and activation conditions

mod args;
mod condition;
mod locator;

pub use args::*;
pub use condition::*;
pub use locator::*;
