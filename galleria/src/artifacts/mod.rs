//! Cache artifacts: generated derivatives of source images.
//!
//! Provides the artifact record, its persistence trait, the deterministic
//! on-disk layout, and the janitor that removes artifacts whose source was
//! deleted or whose lifetime elapsed.

mod janitor;
mod path;
mod store;
mod types;

pub use janitor::{ArtifactJanitor, JanitorReport};
pub use path::{artifact_path, profile_directory};
pub use store::ArtifactStore;
pub use types::CacheArtifact;
