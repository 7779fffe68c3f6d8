//! Strata - the storage and execution core of a disk-oriented RDBMS
//!
//! The crate provides the substrate a relational engine runs on: pages on
//! disk, a buffer pool caching them in memory, a B+ tree index stored in
//! those pages, hierarchical transaction locks, and a small pull-based
//! executor pipeline on top.
//!
//! # Architecture
//!
//! - **Storage** (`storage`): disk I/O and page formats
//!   - `DiskManager` / `DiskScheduler`: page-granular block device behind
//!     a background I/O worker
//!   - `HeaderPage`: index name to root page id records on page 0
//!   - `TablePage` / `TableHeap`: slotted tuple storage in a page chain
//!   - B+ tree internal and leaf page layouts
//!
//! - **Buffer pool** (`buffer`): `BufferPoolManager` with an LRU-K
//!   replacer (`LruKReplacer`) and RAII `ReadPageGuard`/`WritePageGuard`
//!   handles that release latch and pin on drop
//!
//! - **Container** (`container`): `ExtendibleHashTable`, the directory
//!   behind the buffer pool's page table
//!
//! - **Index** (`index`): `BPlusTree`, a latch-crabbing B+ tree generic
//!   over fixed-width keys and values
//!
//! - **Concurrency** (`concurrency`): `LockManager` (five lock modes,
//!   upgrades, isolation gates, deadlock detection), `Transaction`,
//!   `TransactionManager`
//!
//! - **Execution** (`execution`): sequential and index scans, insert,
//!   delete, nested index join, hash aggregation, and top-N, composed
//!   through the pull-based `Executor` trait
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use strata::buffer::BufferPoolManager;
//! use strata::storage::disk::DiskManager;
//! use strata::common::PageId;
//!
//! let disk_manager = Arc::new(DiskManager::new("strata.db").unwrap());
//! let bpm = BufferPoolManager::new(64, 2, disk_manager);
//!
//! let page_id = bpm.new_page().unwrap();
//! {
//!     let mut guard = bpm.write_page(page_id).unwrap();
//!     guard.data_mut()[0] = 42;
//! }
//! bpm.unpin_page(page_id, true);
//! bpm.flush_page(page_id).unwrap();
//! ```

pub mod buffer;
pub mod catalog;
pub mod common;
pub mod concurrency;
pub mod container;
pub mod execution;
pub mod index;
pub mod storage;
pub mod tuple;

// Re-export commonly used types at the crate root
pub use common::{PageId, RecordId, Result, SlotId, StrataError, TxnId};
