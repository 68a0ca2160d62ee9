//! Image transforms: source image in, encoded derivative out.
//!
//! The pipeline treats the transform as opaque. [`ImageCrateTransform`] is
//! the default implementation: it decodes the source with the `image` crate,
//! downscales it to fit the profile bounds and re-encodes it. Decoding and
//! resizing are CPU-bound, so the work runs on the blocking thread pool.

use std::future::Future;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use thiserror::Error;

use crate::ids::ImageId;
use crate::jobs::{OutputFormat, OutputProfile};

/// Errors produced while generating one derivative.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("source image not found: {0}")]
    SourceNotFound(ImageId),

    #[error("failed to read source {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("transform task panicked: {0}")]
    TaskPanicked(String),
}

/// An encoded derivative ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOutput {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl TransformOutput {
    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Produces the derivative of one source image for one profile.
pub trait ImageTransform: Send + Sync + 'static {
    fn transform(
        &self,
        image_id: &ImageId,
        profile: &OutputProfile,
    ) -> impl Future<Output = Result<TransformOutput, TransformError>> + Send;
}

/// Resolves an image id to the file holding the source image.
pub trait SourceLocator: Send + Sync + 'static {
    fn locate(&self, image_id: &ImageId) -> Option<PathBuf>;
}

/// Extensions tried when a source file is stored under `<id>.<ext>`.
const SOURCE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif", "bmp", "tif", "tiff"];

/// Looks up sources in one directory by image id.
///
/// A file named exactly like the image id wins; otherwise `<id>.<ext>` is
/// tried for the common image extensions.
#[derive(Debug, Clone)]
pub struct DirectoryLocator {
    root: PathBuf,
}

impl DirectoryLocator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl SourceLocator for DirectoryLocator {
    fn locate(&self, image_id: &ImageId) -> Option<PathBuf> {
        let id = image_id.as_str();
        // Ids are joined onto the root, so refuse anything that could escape it.
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return None;
        }

        let exact = self.root.join(id);
        if exact.is_file() {
            return Some(exact);
        }
        SOURCE_EXTENSIONS
            .iter()
            .map(|ext| self.root.join(format!("{}.{}", id, ext)))
            .find(|path| path.is_file())
    }
}

/// Default transform backed by the `image` crate.
pub struct ImageCrateTransform<L> {
    locator: Arc<L>,
}

impl<L: SourceLocator> ImageCrateTransform<L> {
    pub fn new(locator: L) -> Self {
        Self {
            locator: Arc::new(locator),
        }
    }
}

impl<L: SourceLocator> ImageTransform for ImageCrateTransform<L> {
    async fn transform(
        &self,
        image_id: &ImageId,
        profile: &OutputProfile,
    ) -> Result<TransformOutput, TransformError> {
        let locator = Arc::clone(&self.locator);
        let image_id = image_id.clone();
        let profile = profile.clone();

        tokio::task::spawn_blocking(move || {
            let path = locator
                .locate(&image_id)
                .ok_or_else(|| TransformError::SourceNotFound(image_id.clone()))?;
            let data = std::fs::read(&path).map_err(|source| TransformError::Read {
                path: path.clone(),
                source,
            })?;
            render(&data, &profile)
        })
        .await
        .map_err(|e| TransformError::TaskPanicked(e.to_string()))?
    }
}

/// Decodes, downscales and re-encodes one image (runs in spawn_blocking).
pub fn render(data: &[u8], profile: &OutputProfile) -> Result<TransformOutput, TransformError> {
    let source = image::load_from_memory(data).map_err(|e| TransformError::Decode(e.to_string()))?;

    // Never upscale; only shrink images exceeding the bounds.
    let resized = if source.width() > profile.max_width || source.height() > profile.max_height {
        source.resize(profile.max_width, profile.max_height, FilterType::Lanczos3)
    } else {
        source
    };

    let bytes = encode(&resized, profile)?;
    Ok(TransformOutput {
        bytes,
        width: resized.width(),
        height: resized.height(),
    })
}

fn encode(img: &DynamicImage, profile: &OutputProfile) -> Result<Vec<u8>, TransformError> {
    let mut buffer = Vec::new();
    let result = match profile.format {
        OutputFormat::Jpeg => {
            // JPEG has no alpha channel.
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buffer, profile.quality))
        }
        OutputFormat::Png => img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png),
        OutputFormat::WebP => {
            let rgba = DynamicImage::ImageRgba8(img.to_rgba8());
            rgba.write_to(&mut Cursor::new(&mut buffer), ImageFormat::WebP)
        }
    };
    result.map_err(|e| TransformError::Encode(e.to_string()))?;
    Ok(buffer)
}
