use std::fmt;

use thiserror::Error;

use super::types::{FrameId, PageId, TxnId};

/// Reasons a transaction can be aborted by the lock manager or the
/// deadlock detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    LockSharedOnReadUncommitted,
    LockOnShrinking,
    UpgradeConflict,
    IncompatibleUpgrade,
    TableLockNotPresent,
    AttemptedIntentionLockOnRow,
    AttemptedUnlockButNoLockHeld,
    TableUnlockedBeforeUnlockingRows,
    Deadlock,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            AbortReason::LockSharedOnReadUncommitted => {
                "shared lock requested under READ_UNCOMMITTED"
            }
            AbortReason::LockOnShrinking => "lock requested in the shrinking phase",
            AbortReason::UpgradeConflict => "another transaction is already upgrading",
            AbortReason::IncompatibleUpgrade => "illegal lock upgrade transition",
            AbortReason::TableLockNotPresent => "row lock without a covering table lock",
            AbortReason::AttemptedIntentionLockOnRow => "intention lock requested on a row",
            AbortReason::AttemptedUnlockButNoLockHeld => "unlock without a held lock",
            AbortReason::TableUnlockedBeforeUnlockingRows => {
                "table unlocked while row locks are still held"
            }
            AbortReason::Deadlock => "aborted by the deadlock detector",
        };
        f.write_str(msg)
    }
}

/// Database error types
#[derive(Error, Debug)]
pub enum StrataError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Page {0} not found")]
    PageNotFound(PageId),

    #[error("Buffer pool is full, no evictable frames available")]
    BufferPoolFull,

    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("Invalid frame ID: {0}")]
    InvalidFrameId(FrameId),

    #[error("Frame {0} is tracked but not evictable")]
    FrameNotEvictable(FrameId),

    #[error("Page {0} is still pinned")]
    PageStillPinned(PageId),

    #[error("Disk scheduler error: {0}")]
    DiskScheduler(String),

    #[error("Tuple of {tuple_size} bytes exceeds available space {available}")]
    TupleTooLarge { tuple_size: usize, available: usize },

    #[error("Invalid slot ID: {0}")]
    InvalidSlotId(u16),

    #[error("Slot {0} is empty")]
    EmptySlot(u16),

    #[error("Header page is full")]
    HeaderPageFull,

    #[error("Index {0:?} not found")]
    IndexNotFound(String),

    #[error("Table {0:?} not found")]
    TableNotFound(String),

    #[error("Index corrupted: {0}")]
    IndexCorrupted(String),

    #[error("Transaction {txn_id} aborted: {reason}")]
    TransactionAbort { txn_id: TxnId, reason: AbortReason },

    #[error("Execution error: {0}")]
    Execution(String),
}

impl StrataError {
    /// The abort reason, if this error is a transaction abort.
    pub fn abort_reason(&self) -> Option<AbortReason> {
        match self {
            StrataError::TransactionAbort { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, StrataError>;
