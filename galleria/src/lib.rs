//! Galleria - cache folders and resumable cache-generation jobs
//!
//! This library provides the storage engine behind the Galleria image
//! gallery's derivative cache: prioritised, capacity-bounded cache folders
//! with atomic size accounting, and background jobs that generate cached
//! images and thumbnails, survive restarts and resume where they stopped.
//!
//! # High-Level API
//!
//! For most use cases, the [`service`] module provides a simplified facade:
//!
//! ```ignore
//! use galleria::config::ConfigFile;
//! use galleria::jobs::{JobRequest, JobScope, JobType};
//! use galleria::service::GalleriaService;
//!
//! let service = GalleriaService::open(&ConfigFile::load()?)?;
//! let id = service.submit_job(JobRequest::new(JobType::Thumbnail, scope))?;
//!
//! // Run in the background; cancel or pause through the handle
//! let handle = service.start_job(&id)?;
//! let summary = handle.wait().await?;
//! ```

pub mod artifacts;
pub mod config;
pub mod folders;
pub mod ids;
pub mod jobs;
pub mod logging;
pub mod pipeline;
pub mod service;
pub mod store;

/// Version of the Galleria library and CLI.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
