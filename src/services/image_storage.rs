use async_trait::async_trait;
use image::ImageFormat;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::models::{ServiceError, ServiceResult};

/// Relative directory under which dish images are stored
pub const DISH_IMAGE_DIR: &str = "uploads/dish";

/// Storage for uploaded dish images
#[async_trait]
pub trait ImageStorage: Send + Sync {
    /// Validate and store an image, returning its relative path
    async fn store(&self, bytes: Vec<u8>) -> ServiceResult<String>;

    /// Remove a previously stored image; missing files are not an error
    async fn remove(&self, path: &str) -> ServiceResult<()>;
}

/// Stores images in a local directory served under the media URL
#[derive(Debug, Clone)]
pub struct LocalImageStorage {
    root: PathBuf,
}

impl LocalImageStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, relative: &str) -> ServiceResult<PathBuf> {
        let path = Path::new(relative);
        let safe = path
            .components()
            .all(|component| matches!(component, Component::Normal(_)));

        if !safe {
            return Err(ServiceError::Storage {
                message: format!("Refusing to access path outside media root: {}", relative),
            });
        }

        Ok(self.root.join(path))
    }
}

/// File extension for the supported image formats
fn extension_for(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Png => Some("png"),
        ImageFormat::Jpeg => Some("jpg"),
        ImageFormat::Gif => Some("gif"),
        ImageFormat::WebP => Some("webp"),
        _ => None,
    }
}

/// Detect the format of `bytes` and make sure the payload actually decodes
pub fn detect_image_format(bytes: &[u8]) -> ServiceResult<(ImageFormat, &'static str)> {
    let format = image::guess_format(bytes).map_err(|e| ServiceError::InvalidImage {
        reason: format!("Upload a valid image: {}", e),
    })?;

    let extension = extension_for(format).ok_or_else(|| ServiceError::InvalidImage {
        reason: format!("Unsupported image format: {:?}", format),
    })?;

    image::load_from_memory_with_format(bytes, format).map_err(|e| {
        ServiceError::InvalidImage {
            reason: format!("The file is not a valid {} image: {}", extension, e),
        }
    })?;

    Ok((format, extension))
}

#[async_trait]
impl ImageStorage for LocalImageStorage {
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    async fn store(&self, bytes: Vec<u8>) -> ServiceResult<String> {
        let (bytes, extension) = tokio::task::spawn_blocking(move || {
            let (_, extension) = detect_image_format(&bytes)?;
            Ok::<_, ServiceError>((bytes, extension))
        })
        .await
        .map_err(|e| ServiceError::Storage {
            message: format!("Image validation task failed: {}", e),
        })??;

        let relative = format!("{}/{}.{}", DISH_IMAGE_DIR, Uuid::new_v4(), extension);
        let target = self.resolve(&relative)?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ServiceError::Storage {
                    message: format!("Failed to create {}: {}", parent.display(), e),
                })?;
        }

        tokio::fs::write(&target, &bytes)
            .await
            .map_err(|e| ServiceError::Storage {
                message: format!("Failed to write {}: {}", target.display(), e),
            })?;

        debug!(path = %relative, "Stored image");
        Ok(relative)
    }

    #[instrument(skip(self))]
    async fn remove(&self, path: &str) -> ServiceResult<()> {
        let target = self.resolve(path)?;

        match tokio::fs::remove_file(&target).await {
            Ok(()) => {
                debug!(path = %path, "Removed image");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path, "Image already missing");
                Ok(())
            }
            Err(e) => Err(ServiceError::Storage {
                message: format!("Failed to remove {}: {}", target.display(), e),
            }),
        }
    }
}
