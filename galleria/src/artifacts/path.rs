//! Artifact path construction.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::ids::ImageId;
use crate::jobs::OutputProfile;

/// Construct the full path for a cache artifact.
///
/// Creates a hierarchical path structure:
/// ```text
/// <folder root>/<profile key>/<shard>/<image id>.<ext>
/// ```
///
/// The shard is the first two hex characters of the SHA-256 of the image id,
/// spreading files over 256 directories. The path depends only on the image
/// id and the profile, so regenerating an artifact overwrites it.
///
/// Image ids that are not filename-safe are replaced by their full hex digest.
///
/// # Example
///
/// ```
/// use std::path::PathBuf;
/// use galleria::artifacts::artifact_path;
/// use galleria::ids::ImageId;
/// use galleria::jobs::{OutputFormat, OutputProfile};
///
/// let profile = OutputProfile::new(OutputFormat::Jpeg, 85, 2048, 2048);
/// let path = artifact_path(&PathBuf::from("/cache"), &ImageId::from("img-1"), &profile);
///
/// assert!(path.starts_with("/cache/jpeg_q85_2048x2048"));
/// assert!(path.ends_with("img-1.jpg"));
/// ```
pub fn artifact_path(root: &Path, image_id: &ImageId, profile: &OutputProfile) -> PathBuf {
    let digest = hex::encode(Sha256::digest(image_id.as_str().as_bytes()));
    let stem = if is_filename_safe(image_id.as_str()) {
        image_id.as_str().to_string()
    } else {
        digest.clone()
    };

    root.join(profile.key())
        .join(&digest[..2])
        .join(format!("{}.{}", stem, profile.format.extension()))
}

/// Get the directory holding all artifacts of one profile.
pub fn profile_directory(root: &Path, profile: &OutputProfile) -> PathBuf {
    root.join(profile.key())
}

fn is_filename_safe(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 128
        && !s.starts_with('.')
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::OutputFormat;

    fn profile() -> OutputProfile {
        OutputProfile::new(OutputFormat::WebP, 70, 320, 320)
    }

    #[test]
    fn test_artifact_path_layout() {
        let id = ImageId::from("abc123");
        let path = artifact_path(Path::new("/cache"), &id, &profile());

        let shard = &hex::encode(Sha256::digest(b"abc123"))[..2];
        assert_eq!(
            path,
            PathBuf::from(format!("/cache/webp_q70_320x320/{}/abc123.webp", shard))
        );
    }

    #[test]
    fn test_artifact_path_is_deterministic() {
        let id = ImageId::from("photo_2024.raw");
        let a = artifact_path(Path::new("/c"), &id, &profile());
        let b = artifact_path(Path::new("/c"), &id, &profile());
        assert_eq!(a, b);
    }

    #[test]
    fn test_profiles_do_not_share_paths() {
        let id = ImageId::from("abc");
        let thumb = OutputProfile::new(OutputFormat::Jpeg, 80, 320, 320);
        let full = OutputProfile::new(OutputFormat::Jpeg, 80, 2048, 2048);
        assert_ne!(
            artifact_path(Path::new("/c"), &id, &thumb),
            artifact_path(Path::new("/c"), &id, &full)
        );
    }

    #[test]
    fn test_unsafe_ids_use_digest() {
        let id = ImageId::from("../../etc/passwd");
        let path = artifact_path(Path::new("/cache"), &id, &profile());

        assert!(path.starts_with("/cache/webp_q70_320x320"));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert_eq!(name.len(), 64 + ".webp".len());
        assert!(!name.contains(".."));
    }

    #[test]
    fn test_profile_directory() {
        assert_eq!(
            profile_directory(Path::new("/cache"), &profile()),
            PathBuf::from("/cache/webp_q70_320x320")
        );
    }
}
