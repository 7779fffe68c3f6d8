use std::sync::Arc;

use strata::buffer::BufferPoolManager;
use strata::catalog::Catalog;
use strata::common::{DEADLOCK_DETECTION_INTERVAL, DEFAULT_BUFFER_POOL_SIZE, DEFAULT_LRUK_K};
use strata::concurrency::{IsolationLevel, LockManager, TransactionManager};
use strata::execution::{Executor, ExecutorContext, InsertExecutor, SeqScanExecutor, ValuesExecutor};
use strata::storage::disk::DiskManager;
use strata::tuple::{Column, DataType, Schema, Value};

fn main() -> strata::Result<()> {
    tracing_subscriber::fmt().init();

    let disk_manager = Arc::new(DiskManager::new("strata.db")?);
    let bpm = Arc::new(BufferPoolManager::new(
        DEFAULT_BUFFER_POOL_SIZE,
        DEFAULT_LRUK_K,
        disk_manager,
    ));
    let catalog = Arc::new(Catalog::new(Arc::clone(&bpm)));
    let lock_manager = Arc::new(LockManager::new(DEADLOCK_DETECTION_INTERVAL));
    let txn_manager = Arc::new(TransactionManager::new(Arc::clone(&lock_manager)));

    catalog.create_table(
        "users",
        Schema::new(vec![
            Column::new("id", DataType::Integer),
            Column::new("name", DataType::Varchar(32)),
        ]),
    )?;
    catalog.create_index("users_pk", "users", 0)?;

    let txn = txn_manager.begin(IsolationLevel::RepeatableRead);
    let ctx = Arc::new(ExecutorContext::new(
        Arc::clone(&bpm),
        Arc::clone(&catalog),
        Arc::clone(&lock_manager),
        Arc::clone(&txn_manager),
        Arc::clone(&txn),
    ));

    let values = ValuesExecutor::new(vec![
        vec![Value::Integer(1), Value::Varchar("alice".into())],
        vec![Value::Integer(2), Value::Varchar("bob".into())],
        vec![Value::Integer(3), Value::Varchar("carol".into())],
    ]);
    let mut insert = InsertExecutor::new(Arc::clone(&ctx), "users", Box::new(values));
    insert.init()?;
    if let Some((count, _)) = insert.next()? {
        println!("inserted {} rows", count.value(0));
    }
    txn_manager.commit(&txn);

    let txn = txn_manager.begin(IsolationLevel::ReadCommitted);
    let ctx = Arc::new(ExecutorContext::new(
        Arc::clone(&bpm),
        Arc::clone(&catalog),
        Arc::clone(&lock_manager),
        Arc::clone(&txn_manager),
        Arc::clone(&txn),
    ));
    let mut scan = SeqScanExecutor::new(Arc::clone(&ctx), "users", None);
    scan.init()?;
    while let Some((tuple, rid)) = scan.next()? {
        println!("{rid}: {} {}", tuple.value(0), tuple.value(1));
    }
    txn_manager.commit(&txn);

    bpm.flush_all_pages()?;
    Ok(())
}
