mod btree_internal_page;
mod btree_leaf_page;
mod btree_page;
mod header_page;
mod table_page;

pub use btree_internal_page::{InternalPage, InternalPageRef};
pub use btree_leaf_page::{LeafPage, LeafPageRef};
pub use btree_page::{BTreePageRef, BTreePageType, BTREE_PAGE_HEADER_SIZE};
pub use header_page::{HeaderPage, HeaderPageRef, HEADER_PAGE_CAPACITY};
pub use table_page::{TablePage, TablePageRef};
