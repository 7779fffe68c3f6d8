use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::common::{FrameId, PageId, INVALID_PAGE_ID, PAGE_SIZE};

/// Page image held by a frame.
pub(crate) type PageBuf = Box<[u8; PAGE_SIZE]>;

/// Bookkeeping for one frame: which logical page it holds, how many
/// handles have it pinned, and whether the image diverges from disk.
///
/// One mutex covers all three fields; a release folds its dirty bit and
/// drops its pin as a single step.
#[derive(Debug, Clone, Copy)]
struct FrameMeta {
    page_id: PageId,
    pin_count: u32,
    dirty: bool,
}

impl FrameMeta {
    fn free() -> Self {
        Self {
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            dirty: false,
        }
    }
}

/// One slot of the buffer pool.
///
/// The page bytes sit in an `Arc`'d reader/writer lock (the frame latch)
/// so page guards can carry an owned latch guard; the metadata transitions
/// are the ones the pool performs: `install` a new identity pinned once,
/// `acquire` another pin on a resident page, `release` a pin, `clear`
/// back to the free list.
pub struct Frame {
    frame_id: FrameId,
    meta: Mutex<FrameMeta>,
    data: Arc<RwLock<PageBuf>>,
}

impl Frame {
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            meta: Mutex::new(FrameMeta::free()),
            data: Arc::new(RwLock::new(Box::new([0u8; PAGE_SIZE]))),
        }
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// The page resident in this frame, INVALID_PAGE_ID when free.
    pub fn page_id(&self) -> PageId {
        self.meta.lock().page_id
    }

    pub fn pin_count(&self) -> u32 {
        self.meta.lock().pin_count
    }

    pub fn is_dirty(&self) -> bool {
        self.meta.lock().dirty
    }

    /// Gives the frame a new page identity, pinned once for the caller.
    /// The previous identity must have been cleared.
    pub(crate) fn install(&self, page_id: PageId) {
        let mut meta = self.meta.lock();
        debug_assert_eq!(meta.pin_count, 0, "installing over a pinned frame");
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.dirty = false;
    }

    /// Adds a pin to a resident page, returning the new count.
    pub(crate) fn acquire(&self) -> u32 {
        let mut meta = self.meta.lock();
        meta.pin_count += 1;
        meta.pin_count
    }

    /// Drops one pin, folding `dirty` into the frame. Returns the
    /// remaining count, or None (and changes nothing) when the frame was
    /// not pinned.
    pub(crate) fn release(&self, dirty: bool) -> Option<u32> {
        let mut meta = self.meta.lock();
        if meta.pin_count == 0 {
            return None;
        }
        if dirty {
            meta.dirty = true;
        }
        meta.pin_count -= 1;
        Some(meta.pin_count)
    }

    /// Clears the dirty flag after a successful write-back.
    pub(crate) fn mark_clean(&self) {
        self.meta.lock().dirty = false;
    }

    /// Returns the frame to its free state and zeroes the image.
    pub(crate) fn clear(&self) {
        *self.meta.lock() = FrameMeta::free();
        self.data.write().fill(0);
    }

    /// The frame latch guarding the page bytes.
    pub(crate) fn data_arc(&self) -> &Arc<RwLock<PageBuf>> {
        &self.data
    }

    /// Copies a page image into the frame.
    pub(crate) fn load(&self, src: &[u8]) {
        let mut data = self.data.write();
        let len = src.len().min(PAGE_SIZE);
        data[..len].copy_from_slice(&src[..len]);
    }

    /// Copies the frame's page image out.
    pub(crate) fn snapshot(&self, dst: &mut [u8]) {
        let data = self.data.read();
        let len = dst.len().min(PAGE_SIZE);
        dst[..len].copy_from_slice(&data[..len]);
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let meta = *self.meta.lock();
        f.debug_struct("Frame")
            .field("frame_id", &self.frame_id)
            .field("page_id", &meta.page_id)
            .field("pin_count", &meta.pin_count)
            .field("dirty", &meta.dirty)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_frame_is_free() {
        let frame = Frame::new(FrameId::new(2));
        assert_eq!(frame.frame_id(), FrameId::new(2));
        assert_eq!(frame.page_id(), INVALID_PAGE_ID);
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_install_acquire_release_cycle() {
        let frame = Frame::new(FrameId::new(0));

        frame.install(PageId::new(9));
        assert_eq!(frame.page_id(), PageId::new(9));
        assert_eq!(frame.pin_count(), 1);
        assert!(!frame.is_dirty());

        assert_eq!(frame.acquire(), 2);

        assert_eq!(frame.release(false), Some(1));
        assert!(!frame.is_dirty());

        // The last release folds its dirty bit in.
        assert_eq!(frame.release(true), Some(0));
        assert!(frame.is_dirty());

        // A release without a pin reports failure and folds nothing.
        frame.mark_clean();
        assert_eq!(frame.release(true), None);
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_clear_resets_identity_and_bytes() {
        let frame = Frame::new(FrameId::new(0));
        frame.install(PageId::new(4));
        frame.release(true);

        let image = [0x5Au8; PAGE_SIZE];
        frame.load(&image);

        frame.clear();
        assert_eq!(frame.page_id(), INVALID_PAGE_ID);
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());

        let mut out = [0xFFu8; PAGE_SIZE];
        frame.snapshot(&mut out);
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_load_snapshot_roundtrip() {
        let frame = Frame::new(FrameId::new(0));

        let mut image = [0u8; PAGE_SIZE];
        image[0] = 1;
        image[PAGE_SIZE - 1] = 2;
        frame.load(&image);

        let mut out = [0u8; PAGE_SIZE];
        frame.snapshot(&mut out);
        assert_eq!(out[0], 1);
        assert_eq!(out[PAGE_SIZE - 1], 2);
    }

    #[test]
    fn test_debug_shows_meta() {
        let frame = Frame::new(FrameId::new(7));
        frame.install(PageId::new(3));
        let rendered = format!("{frame:?}");
        assert!(rendered.contains("frame_id"));
        assert!(rendered.contains("pin_count"));
    }
}
