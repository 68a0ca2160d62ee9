//! High-level service facade for Galleria.
//!
//! [`GalleriaService`] wires a store, an image transform and the
//! configuration into the job, pipeline, folder and janitor components, and
//! tracks the job runs active in this process.

mod error;
mod facade;

pub use error::ServiceError;
pub use facade::{DefaultTransform, GalleriaService, JobRunHandle};
