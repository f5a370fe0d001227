use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use image::RgbaImage;
use parking_lot::Mutex;

/// Opaque handle to pixels uploaded to a texture backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureId(pub u64);

impl TextureId {
    /// Never returned by `bind`; handed out by disposed surfaces.
    pub const NONE: TextureId = TextureId(0);
}

/// Where surfaces upload their pixels (a GPU texture cache in a real
/// renderer).
///
/// A handle stays valid until it is passed to `release`. `bind` never
/// returns [`TextureId::NONE`].
pub trait TextureBackend: Send + Sync {
    fn bind(&self, pixels: &RgbaImage) -> TextureId;
    fn release(&self, id: TextureId);
}

/// In-process backend that keeps a record of every live texture.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    next_id: AtomicU64,
    live: Mutex<HashMap<TextureId, (u32, u32)>>,
    binds: AtomicU64,
    releases: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn binds(&self) -> u64 {
        self.binds.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> u64 {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.live.lock().len()
    }

    pub fn size_of(&self, id: TextureId) -> Option<(u32, u32)> {
        self.live.lock().get(&id).copied()
    }
}

impl TextureBackend for MemoryBackend {
    fn bind(&self, pixels: &RgbaImage) -> TextureId {
        let id = TextureId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.live.lock().insert(id, pixels.dimensions());
        self.binds.fetch_add(1, Ordering::SeqCst);
        log::debug!("bound texture {} ({}x{})", id.0, pixels.width(), pixels.height());
        id
    }

    fn release(&self, id: TextureId) {
        if self.live.lock().remove(&id).is_some() {
            self.releases.fetch_add(1, Ordering::SeqCst);
            log::debug!("released texture {}", id.0);
        } else {
            log::warn!("release of unknown texture {}", id.0);
        }
    }
}
