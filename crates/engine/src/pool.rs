//! Optional worker pool for large reconciliation runs.
//!
//! Units are independent by construction, so parallelism is a plain shared
//! queue: each worker opens its own store connection and drains unit ids
//! until the queue is empty or the run is cancelled. Cancellation is
//! cooperative and only observed between units, never mid-transaction.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use dmphub_core::ids::{TemplateId, VersionId};
use dmphub_storage::{SqliteStore, Store};
use tracing::info;

use crate::error::EngineError;
use crate::report::ReconciliationReport;
use crate::Reconciler;

/// Opens a fresh store handle per worker.
pub trait StoreOpener: Sync {
    type Store: Store;

    fn open_store(&self) -> Result<Self::Store, EngineError>;
}

/// Opener over one on-disk sqlite database (WAL mode allows concurrent
/// connections).
pub struct SqlitePathOpener {
    path: PathBuf,
}

impl SqlitePathOpener {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StoreOpener for SqlitePathOpener {
    type Store = SqliteStore;

    fn open_store(&self) -> Result<SqliteStore, EngineError> {
        Ok(SqliteStore::open(&self.path)?)
    }
}

impl Reconciler {
    /// Parallel counterpart of [`Reconciler::reconcile`]. Produces the same
    /// report contents (ordering within the report buckets may differ).
    pub fn reconcile_parallel<O: StoreOpener>(
        &self,
        opener: &O,
        base_template_id: TemplateId,
        new_version_id: VersionId,
        workers: usize,
        cancel: &AtomicBool,
    ) -> Result<ReconciliationReport, EngineError> {
        let ids = opener.open_store()?.list_customizations(base_template_id)?;
        let workers = workers.clamp(1, ids.len().max(1));
        info!(
            template = %base_template_id,
            version = %new_version_id,
            units = ids.len(),
            workers,
            "parallel reconciliation started"
        );

        let queue = Mutex::new(VecDeque::from(ids));
        let mut report = ReconciliationReport::default();

        thread::scope(|scope| -> Result<(), EngineError> {
            let mut handles = Vec::with_capacity(workers);
            for _ in 0..workers {
                handles.push(scope.spawn(|| -> Result<ReconciliationReport, EngineError> {
                    let mut store = opener.open_store()?;
                    let mut partial = ReconciliationReport::default();
                    while !cancel.load(Ordering::Relaxed) {
                        let next = {
                            let mut q = queue.lock().unwrap_or_else(|e| e.into_inner());
                            q.pop_front()
                        };
                        let Some(id) = next else { break };
                        self.process_unit(&mut store, id, new_version_id, &mut partial);
                    }
                    Ok(partial)
                }));
            }
            for handle in handles {
                match handle.join() {
                    Ok(Ok(partial)) => report.merge(partial),
                    Ok(Err(e)) => return Err(e),
                    Err(_) => return Err(EngineError::WorkerPanicked),
                }
            }
            Ok(())
        })?;

        info!(
            processed = report.processed,
            failed = report.failed.len(),
            "parallel reconciliation finished"
        );
        Ok(report)
    }
}
