//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use galleria::config::ConfigFile;
use galleria::folders::{CacheFolder, NewCacheFolder};
use galleria::ids::ImageId;
use galleria::jobs::{JobRequest, JobScope, JobType, OutputProfile};
use galleria::pipeline::{ImageTransform, TransformError, TransformOutput};
use galleria::service::GalleriaService;
use galleria::store::{MemoryStore, Store};
use parking_lot::Mutex;

/// Transform producing fixed-size output, failing for chosen ids.
pub struct FixedTransform {
    pub size: usize,
    pub failing: HashSet<ImageId>,
    pub calls: Mutex<Vec<ImageId>>,
}

impl FixedTransform {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            failing: HashSet::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(mut self, id: &str) -> Self {
        self.failing.insert(ImageId::from(id));
        self
    }

    pub fn calls(&self) -> Vec<ImageId> {
        self.calls.lock().clone()
    }
}

impl ImageTransform for FixedTransform {
    async fn transform(
        &self,
        image_id: &ImageId,
        _profile: &OutputProfile,
    ) -> Result<TransformOutput, TransformError> {
        self.calls.lock().push(image_id.clone());
        if self.failing.contains(image_id) {
            return Err(TransformError::Decode("truncated file".into()));
        }
        Ok(TransformOutput {
            bytes: vec![0xAB; self.size],
            width: 16,
            height: 16,
        })
    }
}

/// A service over a fresh in-memory store.
pub fn memory_service(
    transform: &Arc<FixedTransform>,
    workers: usize,
) -> (Arc<MemoryStore>, GalleriaService<FixedTransform>) {
    let store = Arc::new(MemoryStore::new());
    let mut config = ConfigFile::default();
    config.pipeline.workers = workers;
    config.pipeline.storage_retry_attempts = 0;
    let service = GalleriaService::new(
        Arc::clone(&store) as Arc<dyn Store>,
        Arc::clone(transform),
        &config,
    );
    (store, service)
}

pub fn add_folder(
    service: &GalleriaService<FixedTransform>,
    root: &Path,
    name: &str,
    priority: i32,
    max_size: Option<u64>,
) -> CacheFolder {
    let mut request = NewCacheFolder::new(name, root.join(name), priority);
    if let Some(max) = max_size {
        request = request.with_max_size(max);
    }
    service.folders().create(request).unwrap()
}

pub fn cache_request(ids: &[&str]) -> JobRequest {
    JobRequest::new(
        JobType::Cache,
        JobScope::images(ids.iter().map(|s| ImageId::from(*s))),
    )
}
