use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::debug;

use crate::common::{PageId, Result, StrataError, PAGE_SIZE};

use super::DiskManager;

type PageBuf = Box<[u8; PAGE_SIZE]>;

/// A disk I/O request owning its buffer; the worker replies on the
/// embedded channel when the operation completes.
enum DiskRequest {
    Read {
        page_id: PageId,
        reply: Sender<Result<PageBuf>>,
    },
    Write {
        page_id: PageId,
        data: PageBuf,
        reply: Sender<Result<()>>,
    },
}

/// Background worker that serializes disk I/O through a bounded queue.
///
/// Callers block on a per-request completion channel; the queue decouples
/// them from the file handle without any shared buffers.
pub struct DiskScheduler {
    disk_manager: Arc<DiskManager>,
    request_tx: Sender<DiskRequest>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        let (tx, rx) = bounded::<DiskRequest>(128);
        let shutdown = Arc::new(AtomicBool::new(false));

        let dm = Arc::clone(&disk_manager);
        let stop = Arc::clone(&shutdown);
        let worker = thread::spawn(move || Self::run_worker(dm, rx, stop));

        Self {
            disk_manager,
            request_tx: tx,
            shutdown,
            worker: Some(worker),
        }
    }

    /// Reads a page, blocking until the worker completes it.
    pub fn schedule_read_sync(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let (reply, done) = bounded(1);
        self.request_tx
            .send(DiskRequest::Read { page_id, reply })
            .map_err(|e| StrataError::DiskScheduler(format!("failed to queue read: {e}")))?;

        let buf = done
            .recv()
            .map_err(|e| StrataError::DiskScheduler(format!("read completion lost: {e}")))??;
        data.copy_from_slice(&buf[..]);
        Ok(())
    }

    /// Writes a page, blocking until the worker completes it.
    pub fn schedule_write_sync(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let mut buf: PageBuf = Box::new([0u8; PAGE_SIZE]);
        buf.copy_from_slice(data);

        let (reply, done) = bounded(1);
        self.request_tx
            .send(DiskRequest::Write {
                page_id,
                data: buf,
                reply,
            })
            .map_err(|e| StrataError::DiskScheduler(format!("failed to queue write: {e}")))?;

        done.recv()
            .map_err(|e| StrataError::DiskScheduler(format!("write completion lost: {e}")))?
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    fn run_worker(dm: Arc<DiskManager>, rx: Receiver<DiskRequest>, shutdown: Arc<AtomicBool>) {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                // Drain whatever is still queued before exiting.
                while let Ok(request) = rx.try_recv() {
                    Self::process(&dm, request);
                }
                debug!("disk scheduler worker stopped");
                break;
            }

            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(request) => Self::process(&dm, request),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn process(dm: &DiskManager, request: DiskRequest) {
        match request {
            DiskRequest::Read { page_id, reply } => {
                let mut buf: PageBuf = Box::new([0u8; PAGE_SIZE]);
                let result = dm.read_page(page_id, &mut buf[..]).map(|()| buf);
                let _ = reply.send(result);
            }
            DiskRequest::Write {
                page_id,
                data,
                reply,
            } => {
                let _ = reply.send(dm.write_page(page_id, &data[..]));
            }
        }
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
