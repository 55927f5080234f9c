//! Transient preview handles for the source image and the rasterised crop.
//!
//! A [`PreviewHost`] is whatever displays images outside the pipeline (a
//! temp directory for a CLI, an object-URL table for a UI). The controller
//! never tracks "was this released": it holds a [`PreviewHandle`], and
//! dropping the handle releases the preview. Replacing, resetting and tearing
//! down the controller are all just drops.

use crate::pipeline::encode::EncodedImage;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tracing::{debug, warn};

/// Identifier issued by a [`PreviewHost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PreviewId(pub u64);

impl fmt::Display for PreviewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "preview-{}", self.0)
    }
}

/// Allocates and frees externally-visible previews.
pub trait PreviewHost: Send + Sync {
    fn acquire(&self, image: &EncodedImage) -> io::Result<PreviewId>;

    /// Free a preview. Called exactly once per successful `acquire`.
    fn release(&self, id: PreviewId);
}

/// Owned preview. Released when dropped.
pub struct PreviewHandle {
    id: PreviewId,
    host: Arc<dyn PreviewHost>,
}

impl PreviewHandle {
    pub fn acquire(host: &Arc<dyn PreviewHost>, image: &EncodedImage) -> io::Result<Self> {
        let id = host.acquire(image)?;
        debug!("Acquired {}", id);
        Ok(Self {
            id,
            host: Arc::clone(host),
        })
    }

    pub fn id(&self) -> PreviewId {
        self.id
    }
}

impl Drop for PreviewHandle {
    fn drop(&mut self) {
        debug!("Releasing {}", self.id);
        self.host.release(self.id);
    }
}

impl fmt::Debug for PreviewHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreviewHandle").field("id", &self.id).finish()
    }
}

/// Writes each preview to its own file in a private temp directory and
/// deletes the file on release. The directory itself goes when the host is
/// dropped.
pub struct TempDirPreviews {
    dir: TempDir,
    next: AtomicU64,
    files: Mutex<HashMap<PreviewId, PathBuf>>,
}

impl TempDirPreviews {
    pub fn new() -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("charleston-preview-").tempdir()?;
        debug!("Preview directory: {}", dir.path().display());
        Ok(Self {
            dir,
            next: AtomicU64::new(1),
            files: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// File backing a live preview.
    pub fn path(&self, id: PreviewId) -> Option<PathBuf> {
        self.files.lock().ok()?.get(&id).cloned()
    }

    /// Files of every live preview, oldest first.
    pub fn paths(&self) -> Vec<PathBuf> {
        let Ok(files) = self.files.lock() else {
            return Vec::new();
        };
        let mut live: Vec<_> = files.iter().map(|(id, p)| (id.0, p.clone())).collect();
        live.sort_by_key(|(id, _)| *id);
        live.into_iter().map(|(_, p)| p).collect()
    }

    /// Number of previews not yet released.
    pub fn live(&self) -> usize {
        self.files.lock().map(|f| f.len()).unwrap_or(0)
    }
}

impl PreviewHost for TempDirPreviews {
    fn acquire(&self, image: &EncodedImage) -> io::Result<PreviewId> {
        let id = PreviewId(self.next.fetch_add(1, Ordering::SeqCst));
        let path = self.dir.path().join(format!("{}.{}", id, image.extension()));
        std::fs::write(&path, image.bytes())?;
        self.files
            .lock()
            .map_err(|_| io::Error::other("preview table poisoned"))?
            .insert(id, path);
        Ok(id)
    }

    fn release(&self, id: PreviewId) {
        let removed = self.files.lock().ok().and_then(|mut f| f.remove(&id));
        match removed {
            Some(path) => {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!("Failed to delete {}: {}", path.display(), e);
                }
            }
            None => warn!("Release of unknown {}", id),
        }
    }
}

impl fmt::Debug for TempDirPreviews {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TempDirPreviews")
            .field("dir", &self.dir.path())
            .field("live", &self.live())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageFormat;

    fn image() -> EncodedImage {
        EncodedImage::new(vec![0x89, b'P', b'N', b'G'], ImageFormat::Png)
    }

    #[test]
    fn drop_releases_file() {
        let previews = Arc::new(TempDirPreviews::new().unwrap());
        let host: Arc<dyn PreviewHost> = previews.clone();

        let handle = PreviewHandle::acquire(&host, &image()).unwrap();
        let path = previews.path(handle.id()).unwrap();
        assert!(path.exists());
        assert_eq!(std::fs::read(&path).unwrap(), image().bytes());
        assert_eq!(previews.live(), 1);

        drop(handle);
        assert!(!path.exists());
        assert_eq!(previews.live(), 0);
    }

    #[test]
    fn ids_are_unique() {
        let previews = Arc::new(TempDirPreviews::new().unwrap());
        let host: Arc<dyn PreviewHost> = previews.clone();
        let a = PreviewHandle::acquire(&host, &image()).unwrap();
        let b = PreviewHandle::acquire(&host, &image()).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(previews.live(), 2);
    }

    #[test]
    fn file_extension_follows_format() {
        let previews = Arc::new(TempDirPreviews::new().unwrap());
        let host: Arc<dyn PreviewHost> = previews.clone();
        let jpeg = EncodedImage::new(vec![0xFF, 0xD8], ImageFormat::Jpeg);
        let handle = PreviewHandle::acquire(&host, &jpeg).unwrap();
        let path = previews.path(handle.id()).unwrap();
        let ext = path.extension().unwrap().to_str().unwrap();
        assert!(["jpg", "jpeg"].contains(&ext));
        assert!(path.starts_with(previews.dir()));
    }
}
