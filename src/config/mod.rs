//! Configuration read from the environment.

mod harness;
pub(crate) mod helpers;

pub use harness::{HarnessConfig, parse_services};
