use std::time::Duration;

use super::types::{FrameId, PageId, TxnId};

/// Size of a page in bytes (4 KB)
pub const PAGE_SIZE: usize = 4096;

/// Invalid page ID constant
pub const INVALID_PAGE_ID: PageId = PageId(u32::MAX);

/// Invalid frame ID constant
pub const INVALID_FRAME_ID: FrameId = FrameId(u32::MAX);

/// Invalid transaction ID constant
pub const INVALID_TXN_ID: TxnId = TxnId(u32::MAX);

/// The header page holding index-name to root-page-id records
pub const HEADER_PAGE_ID: PageId = PageId(0);

/// Default K value for LRU-K replacement policy
pub const DEFAULT_LRUK_K: usize = 2;

/// Default buffer pool size (number of frames)
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 64;

/// Default number of key/value pairs per extendible hash bucket
pub const DEFAULT_BUCKET_SIZE: usize = 32;

/// Default interval between deadlock detection passes
pub const DEADLOCK_DETECTION_INTERVAL: Duration = Duration::from_millis(50);
