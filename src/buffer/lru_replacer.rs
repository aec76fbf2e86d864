use crate::common::config::FrameId;
use hashlink::LinkedHashMap;
use parking_lot::Mutex;

/// `LruReplacer` tracks the set of frames eligible for eviction in strict
/// least-recently-unpinned order. It does not own frames; the buffer pool
/// tells it when a frame becomes pinned or unpinned and asks it for
/// victims.
///
/// All operations are constant time: the eligible set is a linked hash
/// map whose iteration order is unpin order.
pub struct LruReplacer {
    unpinned_frames: Mutex<LinkedHashMap<FrameId, ()>>,
    num_frames: usize,
}

impl LruReplacer {
    /// Creates a replacer able to track up to `num_frames` frames.
    pub fn new(num_frames: usize) -> Self {
        Self {
            unpinned_frames: Mutex::new(LinkedHashMap::with_capacity(num_frames)),
            num_frames,
        }
    }

    /// Removes and returns the least recently unpinned frame, or `None`
    /// when no frame is eligible.
    pub fn victim(&self) -> Option<FrameId> {
        self.unpinned_frames.lock().pop_front().map(|(fid, _)| fid)
    }

    /// Removes the frame from the eligible set. Called when a frame's pin
    /// count rises from zero. No-op if the frame is absent.
    pub fn pin(&self, frame_id: FrameId) {
        if frame_id >= self.num_frames {
            return;
        }
        self.unpinned_frames.lock().remove(&frame_id);
    }

    /// Inserts the frame as most recently used. Called when a frame's pin
    /// count drops to zero. A frame already present keeps its position:
    /// repeated unpins must not refresh recency.
    pub fn unpin(&self, frame_id: FrameId) {
        if frame_id >= self.num_frames {
            return;
        }
        let mut unpinned = self.unpinned_frames.lock();
        if !unpinned.contains_key(&frame_id) {
            unpinned.insert(frame_id, ());
        }
    }

    /// Number of frames currently eligible for eviction.
    pub fn size(&self) -> usize {
        self.unpinned_frames.lock().len()
    }
}
