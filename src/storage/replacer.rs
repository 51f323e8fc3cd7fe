use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use tracing::debug;

use super::FrameId;

/// Eviction policy over unpinned frames.
///
/// The replacer only names candidate frames; it holds no ownership over
/// pages. Exactly one implementation exists today (LRU); the trait leaves
/// room for a clock or similar policy later.
pub trait Replacer {
    /// Remove and return the next eviction victim, or `None` when every
    /// frame is pinned.
    fn victim(&self) -> Option<FrameId>;

    /// Mark a frame ineligible for eviction. No-op if absent.
    fn pin(&self, frame_id: FrameId);

    /// Mark a frame eligible for eviction, making it the most recently
    /// used. Idempotent.
    fn unpin(&self, frame_id: FrameId);

    /// Number of evictable frames
    fn size(&self) -> usize;
}

/// LRU replacer: victims are returned in order of least-recent `unpin`.
pub struct LruReplacer {
    lru: Mutex<LruCache<FrameId, ()>>,
}

impl LruReplacer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lru: Mutex::new(LruCache::new(NonZeroUsize::new(capacity).unwrap())),
        }
    }
}

impl Replacer for LruReplacer {
    fn victim(&self) -> Option<FrameId> {
        match self.lru.lock().unwrap().pop_lru() {
            Some((frame_id, ())) => {
                debug!("victim selected: frame {}", frame_id);
                Some(frame_id)
            }
            None => {
                debug!("no victim available (all frames are pinned)");
                None
            }
        }
    }

    fn pin(&self, frame_id: FrameId) {
        self.lru.lock().unwrap().pop(&frame_id);
    }

    fn unpin(&self, frame_id: FrameId) {
        self.lru.lock().unwrap().put(frame_id, ());
    }

    fn size(&self) -> usize {
        self.lru.lock().unwrap().len()
    }
}
