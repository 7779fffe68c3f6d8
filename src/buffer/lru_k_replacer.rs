use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::common::{FrameId, Result, StrataError};

#[derive(Debug, Clone, Copy)]
struct FrameAccessInfo {
    /// Number of recorded accesses, saturating at k
    count: usize,
    /// Whether this frame may be chosen by evict()
    is_evictable: bool,
}

#[derive(Debug, Default)]
struct ReplacerState {
    frames: HashMap<FrameId, FrameAccessInfo>,
    /// Frames with fewer than k accesses, newest at the front
    young: VecDeque<FrameId>,
    /// Frames with at least k accesses, most recently accessed at the front
    old: VecDeque<FrameId>,
    num_evictable: usize,
}

impl ReplacerState {
    fn detach(&mut self, frame_id: FrameId, count: usize, k: usize) {
        let list = if count < k {
            &mut self.young
        } else {
            &mut self.old
        };
        if let Some(pos) = list.iter().position(|&f| f == frame_id) {
            list.remove(pos);
        }
    }
}

/// LRU-K replacement policy, collapsed to a two-list approximation.
///
/// Frames accessed fewer than k times live in the young list in insertion
/// order; frames accessed k or more times live in the old list ordered by
/// most recent access. Eviction prefers the oldest evictable young frame,
/// then the least recently accessed evictable old frame. Sequential scans
/// therefore drain out of the young list before they can displace pages
/// that have proven reuse.
pub struct LruKReplacer {
    k: usize,
    /// Frame ids must lie in [0, replacer_size)
    replacer_size: usize,
    state: Mutex<ReplacerState>,
}

impl LruKReplacer {
    /// Creates a new LRU-K replacer tracking up to `replacer_size` frames.
    pub fn new(k: usize, replacer_size: usize) -> Self {
        assert!(k > 0, "LRU-K requires k >= 1");
        Self {
            k,
            replacer_size,
            state: Mutex::new(ReplacerState::default()),
        }
    }

    /// Records an access to the given frame.
    ///
    /// A first access inserts the frame at the front of the young list; the
    /// access that brings the count to k promotes it to the front of the old
    /// list, as does every access after that.
    pub fn record_access(&self, frame_id: FrameId) -> Result<()> {
        if frame_id.as_usize() >= self.replacer_size {
            return Err(StrataError::InvalidFrameId(frame_id));
        }

        let mut state = self.state.lock();
        match state.frames.get(&frame_id).copied() {
            None => {
                state.frames.insert(
                    frame_id,
                    FrameAccessInfo {
                        count: 1,
                        is_evictable: false,
                    },
                );
                if self.k == 1 {
                    state.old.push_front(frame_id);
                } else {
                    state.young.push_front(frame_id);
                }
            }
            Some(info) => {
                let new_count = (info.count + 1).min(self.k);
                state.frames.get_mut(&frame_id).unwrap().count = new_count;
                if new_count >= self.k {
                    state.detach(frame_id, info.count, self.k);
                    state.old.push_front(frame_id);
                }
                // A re-access below k keeps the young-list insertion order.
            }
        }
        Ok(())
    }

    /// Sets whether a frame may be evicted. Silently ignores frames that
    /// have never been accessed.
    pub fn set_evictable(&self, frame_id: FrameId, is_evictable: bool) {
        let mut state = self.state.lock();
        if let Some(info) = state.frames.get_mut(&frame_id) {
            if info.is_evictable != is_evictable {
                info.is_evictable = is_evictable;
                if is_evictable {
                    state.num_evictable += 1;
                } else {
                    state.num_evictable -= 1;
                }
            }
        }
    }

    /// Chooses a frame to evict: the oldest evictable young frame, else the
    /// least recently accessed evictable old frame. Clears the chosen
    /// frame's history.
    pub fn evict(&self) -> Option<FrameId> {
        let mut state = self.state.lock();
        if state.num_evictable == 0 {
            return None;
        }

        let victim = state
            .young
            .iter()
            .rev()
            .chain(state.old.iter().rev())
            .copied()
            .find(|f| state.frames[f].is_evictable)?;

        let info = state.frames.remove(&victim).unwrap();
        state.detach(victim, info.count, self.k);
        state.num_evictable -= 1;
        Some(victim)
    }

    /// Force-removes a tracked frame regardless of its position.
    /// Fails if the frame is tracked but not evictable.
    pub fn remove(&self, frame_id: FrameId) -> Result<()> {
        let mut state = self.state.lock();
        match state.frames.get(&frame_id).copied() {
            None => Ok(()),
            Some(info) if !info.is_evictable => Err(StrataError::FrameNotEvictable(frame_id)),
            Some(info) => {
                state.frames.remove(&frame_id);
                state.detach(frame_id, info.count, self.k);
                state.num_evictable -= 1;
                Ok(())
            }
        }
    }

    /// Returns the number of evictable frames.
    pub fn size(&self) -> usize {
        self.state.lock().num_evictable
    }

    /// Returns the k value of this replacer.
    pub fn k(&self) -> usize {
        self.k
    }
}
