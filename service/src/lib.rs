//! Process-level concerns shared by binaries: command line/environment
//! configuration and logger setup.

pub mod config;
pub mod logging;
