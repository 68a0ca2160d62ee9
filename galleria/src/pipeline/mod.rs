//! Cache generation pipeline.
//!
//! # Key Components
//!
//! - [`CacheGenerationPipeline`] - runs a processing job with a worker pool
//! - [`ImageTransform`] - produces one derivative; opaque to the pipeline
//! - [`ImageCrateTransform`] - default transform backed by the `image` crate
//! - [`ArtifactWriter`] - atomic artifact file writes
//!
//! # Example
//!
//! ```ignore
//! use galleria::pipeline::{CacheGenerationPipeline, DirectoryLocator, ImageCrateTransform};
//!
//! let transform = Arc::new(ImageCrateTransform::new(DirectoryLocator::new("/srv/originals")));
//! let pipeline = CacheGenerationPipeline::new(tracker, folders, artifacts, transform);
//!
//! let summary = pipeline.run(&job_id, RunControl::new()).await?;
//! ```

mod generation;
mod transform;
mod writer;

pub use generation::{
    CacheGenerationPipeline, PipelineConfig, PipelineError, RunSummary, DEFAULT_STORAGE_RETRY_ATTEMPTS,
    DEFAULT_STORAGE_RETRY_DELAY_MS, DEFAULT_WORKERS,
};
pub use transform::{
    render, DirectoryLocator, ImageCrateTransform, ImageTransform, SourceLocator, TransformError,
    TransformOutput,
};
pub use writer::ArtifactWriter;
