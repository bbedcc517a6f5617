//! Shared utilities for buildfork
//!
//! This crate provides:
//! - Environment variable names shared by the parent and the forked child
//! - Default paths for the configuration file

mod env;
mod paths;

pub use env::*;
pub use paths::*;
