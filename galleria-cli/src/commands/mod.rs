//! CLI command implementations.
//!
//! Each subcommand has its own module with argument definitions and handlers.
//!
//! # Command Modules
//!
//! - [`config`] - Configuration file location and initialization
//! - [`folder`] - Cache folder administration
//! - [`job`] - Job submission, inspection and control
//! - [`sweep`] - One-shot maintenance sweeps and the sweeper daemon

pub mod config;
pub mod folder;
pub mod job;
pub mod sweep;
