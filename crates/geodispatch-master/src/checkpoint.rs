use crate::{metrics::DispatchMetrics, results::ResultStore};
use geodispatch_core::{ResultRecord, RowIndex};
use geodispatch_persistence::{CheckpointFile, Dataset, PersistenceError, ResultsFile};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info};

type PersistenceResult<T> = std::result::Result<T, PersistenceError>;

/// Durable destination for checkpoints and results.
///
/// Calls are blocking; the manager runs them off the async runtime.
pub trait CheckpointSink: Send + Sync + 'static {
    /// Previously saved checkpoint, if any
    fn load_checkpoint(&self) -> PersistenceResult<Option<RowIndex>>;

    /// Results saved by a previous run, if any
    fn load_results(&self) -> PersistenceResult<Option<Vec<ResultRecord>>>;

    /// Write the full result set, then the checkpoint value
    fn persist(&self, checkpoint: RowIndex, records: &[ResultRecord]) -> PersistenceResult<()>;
}

/// File-backed sink: results CSV plus a checkpoint file
pub struct FileSink {
    dataset: Arc<Dataset>,
    results: ResultsFile,
    checkpoint: CheckpointFile,
}

impl FileSink {
    pub fn new(dataset: Arc<Dataset>, results: ResultsFile, checkpoint: CheckpointFile) -> Self {
        FileSink {
            dataset,
            results,
            checkpoint,
        }
    }
}

impl CheckpointSink for FileSink {
    fn load_checkpoint(&self) -> PersistenceResult<Option<RowIndex>> {
        self.checkpoint.load()
    }

    fn load_results(&self) -> PersistenceResult<Option<Vec<ResultRecord>>> {
        self.results.load()
    }

    fn persist(&self, checkpoint: RowIndex, records: &[ResultRecord]) -> PersistenceResult<()> {
        // Results first: the checkpoint must never point past unsaved rows
        self.results.write(&self.dataset, records)?;
        self.checkpoint.save(checkpoint)?;
        info!(
            "Progress saved to {:?} and row {} to {:?}",
            self.results.path(),
            checkpoint,
            self.checkpoint.path()
        );
        Ok(())
    }
}

/// Completion bookkeeping behind the checkpoint value
struct Progress {
    /// Lowest index at or after the resume point that has not completed
    watermark: RowIndex,
    /// Completed indices above the watermark
    ahead: BTreeSet<RowIndex>,
    /// Completions since the last flush was triggered
    since_flush: usize,
    /// Completions not yet covered by a successful flush
    dirty: bool,
    last_saved: Option<RowIndex>,
}

impl Progress {
    fn settle(&mut self, index: RowIndex) {
        if index < self.watermark {
            return;
        }
        self.ahead.insert(index);
        while self.ahead.remove(&self.watermark) {
            self.watermark += 1;
        }
    }
}

/// Decides when to persist progress and performs the flush.
///
/// The persisted value is the contiguous completion watermark: every row
/// before it has a recorded result. It only moves forward.
pub struct CheckpointManager {
    sink: Arc<dyn CheckpointSink>,
    store: Arc<ResultStore>,
    metrics: Arc<DispatchMetrics>,
    every: usize,
    resume_index: RowIndex,
    progress: Mutex<Progress>,
    /// Held until the sink write returns, even if the flushing task is dropped
    flush_lock: Arc<tokio::sync::Mutex<()>>,
}

impl CheckpointManager {
    /// Read the saved checkpoint and start tracking from it
    pub fn open(
        sink: Arc<dyn CheckpointSink>,
        store: Arc<ResultStore>,
        metrics: Arc<DispatchMetrics>,
        every: usize,
    ) -> PersistenceResult<Self> {
        let saved = sink.load_checkpoint()?;
        let resume_index = saved.unwrap_or(0);

        match saved {
            Some(index) => info!("Resuming from checkpoint at row {}", index),
            None => info!("No checkpoint found, starting from row 0"),
        }

        Ok(CheckpointManager {
            sink,
            store,
            metrics,
            every: every.max(1),
            resume_index,
            progress: Mutex::new(Progress {
                watermark: resume_index,
                ahead: BTreeSet::new(),
                since_flush: 0,
                dirty: false,
                last_saved: saved,
            }),
            flush_lock: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    pub fn sink(&self) -> &Arc<dyn CheckpointSink> {
        &self.sink
    }

    /// First row this run has to process
    pub fn resume_index(&self) -> RowIndex {
        self.resume_index
    }

    /// Current contiguous completion watermark
    pub fn watermark(&self) -> RowIndex {
        self.progress.lock().watermark
    }

    pub fn last_saved(&self) -> Option<RowIndex> {
        self.progress.lock().last_saved
    }

    /// Count a row as done without it going through a session (already
    /// present in the results carried over from a previous run)
    pub fn mark_settled(&self, index: RowIndex) {
        self.progress.lock().settle(index);
    }

    /// Note a completion and flush once enough have accumulated.
    ///
    /// Returns whether a flush succeeded.
    pub async fn maybe_checkpoint(&self, index: RowIndex) -> bool {
        let due = {
            let mut progress = self.progress.lock();
            progress.settle(index);
            progress.dirty = true;
            progress.since_flush += 1;

            if progress.since_flush >= self.every {
                progress.since_flush = 0;
                true
            } else {
                false
            }
        };

        if !due {
            return false;
        }

        match self.flush().await {
            Ok(_) => true,
            Err(e) => {
                error!("Checkpoint failed, will retry on the next trigger: {}", e);
                false
            }
        }
    }

    /// Flush only when there were completions since the last successful flush
    pub async fn flush_if_dirty(&self) -> Option<PersistenceResult<RowIndex>> {
        if !self.progress.lock().dirty {
            return None;
        }
        Some(self.flush().await)
    }

    /// Persist the result snapshot and the current watermark
    pub async fn flush(&self) -> PersistenceResult<RowIndex> {
        // One flush at a time keeps the saved values in watermark order. The
        // guard moves into the blocking task: an aborted caller must not let
        // a later flush overtake a write that is still running.
        let guard = self.flush_lock.clone().lock_owned().await;

        let watermark = {
            let mut progress = self.progress.lock();
            progress.dirty = false;
            progress.watermark
        };
        let records = self.store.snapshot();

        let sink = self.sink.clone();
        let count = records.len();
        let write = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            sink.persist(watermark, &records)
        });
        let result = write
            .await
            .map_err(|e| PersistenceError::Io(std::io::Error::other(e)))
            .and_then(|inner| inner);

        let mut progress = self.progress.lock();
        match result {
            Ok(()) => {
                progress.last_saved = Some(progress.last_saved.map_or(watermark, |s| s.max(watermark)));
                self.metrics.inc_checkpoint("ok");
                self.metrics.checkpoint_index.set(watermark as i64);
                debug!("Checkpoint at row {} with {} records", watermark, count);
                Ok(watermark)
            }
            Err(e) => {
                progress.dirty = true;
                self.metrics.inc_checkpoint("failed");
                Err(e)
            }
        }
    }

    /// Last flush before exit; runs whether or not anything changed
    pub async fn final_checkpoint(&self) -> PersistenceResult<RowIndex> {
        let saved = self.flush().await?;
        info!("Final checkpoint saved at row {}", saved);
        Ok(saved)
    }
}
