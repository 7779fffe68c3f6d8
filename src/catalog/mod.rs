mod catalog;

pub use catalog::{Catalog, IndexInfo, TableIndex, TableInfo};
