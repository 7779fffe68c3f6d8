use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock};

use crate::common::PageId;

use super::frame::{Frame, PageBuf};
use super::LruKReplacer;

type ReadLatch = ArcRwLockReadGuard<RawRwLock, PageBuf>;
type WriteLatch = ArcRwLockWriteGuard<RawRwLock, PageBuf>;

/// Ownership of one pin on a frame.
///
/// Dropping it performs the release protocol under the pool latch: fold
/// the dirty bit into the frame, drop the pin, and hand the frame to the
/// replacer once the count reaches zero.
pub(crate) struct FramePin {
    frame: Arc<Frame>,
    replacer: Arc<LruKReplacer>,
    pool_latch: Arc<Mutex<()>>,
    dirty: bool,
}

impl FramePin {
    pub(crate) fn new(
        frame: Arc<Frame>,
        replacer: Arc<LruKReplacer>,
        pool_latch: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            frame,
            replacer,
            pool_latch,
            dirty: false,
        }
    }
}

impl Drop for FramePin {
    fn drop(&mut self) {
        let _pool = self.pool_latch.lock();
        if let Some(0) = self.frame.release(self.dirty) {
            self.replacer.set_evictable(self.frame.frame_id(), true);
        }
    }
}

/// Shared access to a pinned page: an owned read half of the frame latch
/// plus the pin keeping the frame resident.
///
/// Field order is the release order: the latch opens before the pin is
/// returned.
pub struct ReadPageGuard {
    page_id: PageId,
    data: ReadLatch,
    _pin: FramePin,
}

impl ReadPageGuard {
    pub(crate) fn acquire(page_id: PageId, pin: FramePin) -> Self {
        let data = pin.frame.data_arc().read_arc();
        Self {
            page_id,
            data,
            _pin: pin,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..]
    }
}

impl Deref for ReadPageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

/// Exclusive access to a pinned page. The frame is marked dirty on
/// release only if the bytes were reached through `data_mut`.
pub struct WritePageGuard {
    page_id: PageId,
    data: WriteLatch,
    pin: FramePin,
}

impl WritePageGuard {
    pub(crate) fn acquire(page_id: PageId, pin: FramePin) -> Self {
        let data = pin.frame.data_arc().write_arc();
        Self {
            page_id,
            data,
            pin,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..]
    }

    /// Mutable view of the page bytes; the pin will carry the dirty bit
    /// back to the frame.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.pin.dirty = true;
        &mut self.data[..]
    }
}

impl Deref for WritePageGuard {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl DerefMut for WritePageGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::FrameId;

    fn pinned_frame(page_id: PageId) -> (Arc<Frame>, Arc<LruKReplacer>, Arc<Mutex<()>>) {
        let frame = Arc::new(Frame::new(FrameId::new(0)));
        let replacer = Arc::new(LruKReplacer::new(2, 4));
        replacer.record_access(frame.frame_id()).unwrap();
        frame.install(page_id);
        (frame, replacer, Arc::new(Mutex::new(())))
    }

    fn pin_of(
        frame: &Arc<Frame>,
        replacer: &Arc<LruKReplacer>,
        latch: &Arc<Mutex<()>>,
    ) -> FramePin {
        FramePin::new(Arc::clone(frame), Arc::clone(replacer), Arc::clone(latch))
    }

    #[test]
    fn test_dropped_pin_reaches_replacer() {
        let (frame, replacer, latch) = pinned_frame(PageId::new(1));

        let guard = ReadPageGuard::acquire(PageId::new(1), pin_of(&frame, &replacer, &latch));
        assert_eq!(guard.page_id(), PageId::new(1));
        assert_eq!(replacer.size(), 0, "pinned frame must not be evictable");

        drop(guard);
        assert_eq!(frame.pin_count(), 0);
        assert_eq!(replacer.size(), 1, "zero pins hands the frame over");
        assert_eq!(replacer.evict(), Some(frame.frame_id()));
    }

    #[test]
    fn test_nested_pins_keep_frame() {
        let (frame, replacer, latch) = pinned_frame(PageId::new(1));
        frame.acquire();

        let outer = ReadPageGuard::acquire(PageId::new(1), pin_of(&frame, &replacer, &latch));
        let inner = ReadPageGuard::acquire(PageId::new(1), pin_of(&frame, &replacer, &latch));
        drop(inner);
        assert_eq!(replacer.size(), 0, "one pin still outstanding");
        drop(outer);
        assert_eq!(replacer.size(), 1);
    }

    #[test]
    fn test_write_guard_excludes_and_dirties() {
        let (frame, replacer, latch) = pinned_frame(PageId::new(3));

        let mut guard = WritePageGuard::acquire(PageId::new(3), pin_of(&frame, &replacer, &latch));
        // The frame latch is held exclusively while the guard lives.
        assert!(frame.data_arc().try_read().is_none());

        guard.data_mut()[0] = 0xAA;
        drop(guard);

        assert!(frame.data_arc().try_read().is_some());
        assert!(frame.is_dirty());
        let mut out = [0u8; crate::common::PAGE_SIZE];
        frame.snapshot(&mut out);
        assert_eq!(out[0], 0xAA);
    }

    #[test]
    fn test_untouched_write_guard_stays_clean() {
        let (frame, replacer, latch) = pinned_frame(PageId::new(3));

        let guard = WritePageGuard::acquire(PageId::new(3), pin_of(&frame, &replacer, &latch));
        assert_eq!(guard.data()[0], 0);
        drop(guard);

        assert!(!frame.is_dirty(), "reading through a write guard is clean");
    }

    #[test]
    fn test_readers_share_the_latch() {
        let (frame, replacer, latch) = pinned_frame(PageId::new(5));
        frame.acquire();

        let a = ReadPageGuard::acquire(PageId::new(5), pin_of(&frame, &replacer, &latch));
        let b = ReadPageGuard::acquire(PageId::new(5), pin_of(&frame, &replacer, &latch));
        assert_eq!(a.data()[0], b.data()[0]);
        assert!(frame.data_arc().try_write().is_none());
        drop(a);
        drop(b);
        assert!(frame.data_arc().try_write().is_some());
    }
}
