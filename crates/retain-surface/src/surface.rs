//! # Bound surfaces
//!
//! A `BoundSurface` is a CPU pixel buffer plus the texture it was last
//! uploaded to. Immediate-mode code asks for the texture every frame, so the
//! upload must only happen when the pixels actually changed:
//!
//! ```rust
//! use std::sync::Arc;
//! use retain_surface::*;
//!
//! let backend = Arc::new(MemoryBackend::new());
//! let surface = BoundSurface::new(backend.clone());
//!
//! // No pixels yet: the placeholder is bound.
//! assert!(surface.commit().changed);
//! assert!(!surface.commit().changed);
//! assert_eq!(backend.binds(), 1);
//! ```
//!
//! `commit` hashes the pixel buffer and compares it with the hash of the
//! bound content; on a mismatch it releases the old texture and binds a new
//! one.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use ahash::AHasher;
use image::{Rgba, RgbaImage};
use parking_lot::Mutex;
use retain_core::{Color, Disposable};

use crate::backend::{TextureBackend, TextureId};
use crate::error::LoadError;
use crate::loader::SurfaceLoader;

pub const PLACEHOLDER_WIDTH: u32 = 128;
pub const PLACEHOLDER_HEIGHT: u32 = 128;

/// Image substituted when a surface is committed without pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Placeholder {
    pub width: u32,
    pub height: u32,
    pub color: Color,
}

impl Default for Placeholder {
    fn default() -> Self {
        Self {
            width: PLACEHOLDER_WIDTH,
            height: PLACEHOLDER_HEIGHT,
            color: Color::WHITE,
        }
    }
}

impl Placeholder {
    pub fn image(&self) -> RgbaImage {
        RgbaImage::from_pixel(self.width, self.height, Rgba(self.color.to_rgba8()))
    }
}

/// Outcome of [`BoundSurface::commit`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Commit {
    pub handle: TextureId,
    /// A new texture was bound by this call.
    pub changed: bool,
}

struct SurfaceInner {
    pixels: Option<RgbaImage>,
    handle: Option<TextureId>,
    last_hash: Option<u64>,
    disposed: bool,
}

pub struct BoundSurface {
    backend: Arc<dyn TextureBackend>,
    placeholder: Placeholder,
    inner: Mutex<SurfaceInner>,
}

impl BoundSurface {
    pub fn new(backend: Arc<dyn TextureBackend>) -> Self {
        Self {
            backend,
            placeholder: Placeholder::default(),
            inner: Mutex::new(SurfaceInner {
                pixels: None,
                handle: None,
                last_hash: None,
                disposed: false,
            }),
        }
    }

    pub fn with_placeholder(mut self, placeholder: Placeholder) -> Self {
        self.placeholder = placeholder;
        self
    }

    /// Makes sure the bound texture matches the current pixels.
    ///
    /// A disposed surface binds nothing and reports [`TextureId::NONE`].
    pub fn commit(&self) -> Commit {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if inner.disposed {
            log::debug!("commit on a disposed surface ignored");
            return Commit {
                handle: TextureId::NONE,
                changed: false,
            };
        }
        let pixels = inner
            .pixels
            .get_or_insert_with(|| self.placeholder.image());
        let hash = content_hash(pixels);

        if let Some(handle) = inner.handle
            && inner.last_hash == Some(hash)
        {
            return Commit {
                handle,
                changed: false,
            };
        }

        if let Some(old) = inner.handle.take() {
            self.backend.release(old);
        }
        let handle = self.backend.bind(pixels);
        inner.handle = Some(handle);
        inner.last_hash = Some(hash);
        Commit {
            handle,
            changed: true,
        }
    }

    /// Commits and returns the up-to-date texture.
    pub fn texture(&self) -> TextureId {
        self.commit().handle
    }

    pub fn force_commit(&self) -> Commit {
        self.commit()
    }

    /// Replaces the pixels. The texture is rebound on the next commit, or
    /// right away when `commit` is set.
    pub fn set_pixels(&self, pixels: RgbaImage, commit: bool) -> Result<(), LoadError> {
        let (width, height) = pixels.dimensions();
        if width == 0 || height == 0 {
            return Err(LoadError::EmptyImage { width, height });
        }
        self.inner.lock().pixels = Some(pixels);
        if commit {
            self.commit();
        }
        Ok(())
    }

    /// Runs `loader` on the calling thread and applies the result.
    pub fn load_now(&self, loader: &dyn SurfaceLoader, commit: bool) -> Result<(), LoadError> {
        let pixels = loader.fetch()?;
        self.set_pixels(pixels, commit)
    }

    /// Copy of the current pixels, if any were set.
    pub fn pixels(&self) -> Option<RgbaImage> {
        self.inner.lock().pixels.clone()
    }

    /// Size of the current pixels (the placeholder size when none are set).
    pub fn size(&self) -> (u32, u32) {
        match &self.inner.lock().pixels {
            Some(p) => p.dimensions(),
            None => (self.placeholder.width, self.placeholder.height),
        }
    }

    pub fn bound_handle(&self) -> Option<TextureId> {
        self.inner.lock().handle
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.lock().disposed
    }

    /// Releases the texture and drops the pixels. The surface stays usable;
    /// the next commit binds again.
    pub fn force_release(&self) {
        let mut inner = self.inner.lock();
        if let Some(handle) = inner.handle.take() {
            self.backend.release(handle);
        }
        inner.pixels = None;
        inner.last_hash = None;
    }
}

impl Disposable for BoundSurface {
    fn dispose(&self) {
        self.inner.lock().disposed = true;
        self.force_release();
    }
}

impl std::fmt::Debug for BoundSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("BoundSurface")
            .field("size", &inner.pixels.as_ref().map(|p| p.dimensions()))
            .field("handle", &inner.handle)
            .finish()
    }
}

fn content_hash(pixels: &RgbaImage) -> u64 {
    let mut h = AHasher::default();
    pixels.dimensions().hash(&mut h);
    pixels.as_raw().hash(&mut h);
    h.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    fn surface() -> (Arc<MemoryBackend>, BoundSurface) {
        let backend = Arc::new(MemoryBackend::new());
        (backend.clone(), BoundSurface::new(backend))
    }

    #[test]
    fn test_commit_twice_binds_once() {
        let (backend, surface) = surface();
        surface
            .set_pixels(RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255])), false)
            .unwrap();

        let first = surface.commit();
        let second = surface.commit();
        assert!(first.changed);
        assert!(!second.changed);
        assert_eq!(first.handle, second.handle);
        assert_eq!(backend.binds(), 1);
        assert_eq!(backend.releases(), 0);
    }

    #[test]
    fn test_changed_pixels_rebind() {
        let (backend, surface) = surface();
        surface
            .set_pixels(RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 255])), true)
            .unwrap();
        let old = surface.bound_handle().unwrap();

        surface
            .set_pixels(RgbaImage::from_pixel(2, 2, Rgba([9, 9, 9, 255])), false)
            .unwrap();
        let commit = surface.commit();
        assert!(commit.changed);
        assert_ne!(commit.handle, old);
        assert_eq!(backend.binds(), 2);
        assert_eq!(backend.releases(), 1);
        assert_eq!(backend.live(), 1);
    }

    #[test]
    fn test_identical_content_does_not_rebind() {
        let (backend, surface) = surface();
        let img = RgbaImage::from_pixel(3, 3, Rgba([5, 5, 5, 255]));
        surface.set_pixels(img.clone(), true).unwrap();
        surface.set_pixels(img, false).unwrap();
        assert!(!surface.commit().changed);
        assert_eq!(backend.binds(), 1);
    }

    #[test]
    fn test_placeholder_when_empty() {
        let (backend, surface) = surface();
        let surface = surface.with_placeholder(Placeholder {
            width: 8,
            height: 4,
            color: Color::BLACK,
        });
        let handle = surface.texture();
        assert_eq!(backend.size_of(handle), Some((8, 4)));
        assert_eq!(surface.size(), (8, 4));
        let pixels = surface.pixels().unwrap();
        assert_eq!(pixels.get_pixel(0, 0), &Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn test_empty_image_rejected() {
        let (_, surface) = surface();
        let err = surface.set_pixels(RgbaImage::new(0, 3), false).unwrap_err();
        assert!(matches!(err, LoadError::EmptyImage { width: 0, height: 3 }));
        assert!(surface.pixels().is_none());
    }

    #[test]
    fn test_force_release_then_commit_rebinds() {
        let (backend, surface) = surface();
        surface.texture();
        surface.force_release();
        assert_eq!(backend.live(), 0);
        assert!(surface.bound_handle().is_none());

        assert!(surface.commit().changed);
        assert_eq!(backend.live(), 1);
    }

    #[test]
    fn test_disposed_surface_never_binds_again() {
        let (backend, surface) = surface();
        surface.texture();
        assert_eq!(backend.live(), 1);
        surface.dispose();
        assert_eq!(backend.live(), 0);
        assert!(surface.is_disposed());

        assert_eq!(surface.texture(), TextureId::NONE);
        surface
            .set_pixels(RgbaImage::from_pixel(2, 2, Rgba([1; 4])), true)
            .unwrap();
        assert!(!surface.commit().changed);
        assert_eq!(backend.live(), 0);
        assert_eq!(backend.binds(), 1);
    }
}
