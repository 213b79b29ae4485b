//! Process-level scaffolding for Tether services: logging, runtime configuration, and the process boundary.
#![deny(warnings)]
#![deny(missing_docs)]

pub mod config;
pub mod logging;
pub mod process;
