//! Bounded worker pool for per-unit extraction, plus cooperative
//! cancellation tokens.

use anyhow::{anyhow, Result};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;

use crate::error::{IngestError, IngestResult};

/// Shared flag checked between content units.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn check(&self) -> IngestResult<()> {
        if self.is_cancelled() {
            Err(IngestError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Fixed-size pool shared by every document run. It holds no document
/// state; each call brings its own items and gets its own results back.
pub struct WorkerPool {
    pool: ThreadPool,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("folio-extract-{i}"))
            .build()
            .map_err(|e| anyhow!("Failed to build extraction pool: {}", e))?;
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `task` over `items` and return `(index, result)` pairs in
    /// completion order. Items not yet started when `token` is cancelled
    /// are skipped and the whole call fails with `Cancelled`.
    /// `on_done(completed, total)` fires after each finished item.
    pub fn run_all<T, R, F>(
        &self,
        items: &[T],
        token: &CancellationToken,
        on_done: &(dyn Fn(usize, usize) + Sync),
        task: F,
    ) -> IngestResult<Vec<(usize, R)>>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync,
    {
        let total = items.len();
        let completed = AtomicUsize::new(0);
        let (tx, rx) = mpsc::channel();

        self.pool.scope(|scope| {
            for (idx, item) in items.iter().enumerate() {
                let tx = tx.clone();
                let task = &task;
                let completed = &completed;
                scope.spawn(move |_| {
                    if token.is_cancelled() {
                        return;
                    }
                    let result = task(item);
                    // receiver outlives the scope
                    let _ = tx.send((idx, result));
                    on_done(completed.fetch_add(1, Ordering::Relaxed) + 1, total);
                });
            }
        });
        drop(tx);

        token.check()?;
        Ok(rx.into_iter().collect())
    }
}
