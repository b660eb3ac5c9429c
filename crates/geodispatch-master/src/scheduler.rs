use crate::{
    checkpoint::{CheckpointManager, CheckpointSink, FileSink},
    config::MasterConfig,
    listener::ConnectionListener,
    metrics::DispatchMetrics,
    queue::TaskQueue,
    registry::SessionRegistry,
    results::ResultStore,
    session::SessionContext,
};
use chrono::{DateTime, Utc};
use geodispatch_core::RowIndex;
use geodispatch_persistence::{CheckpointFile, Dataset, ResultsFile};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Where the run stood when the scheduler stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub completed: usize,
    pub pending: usize,
    pub in_flight: usize,
    pub checkpoint: RowIndex,
}

/// Point-in-time progress report served by the status API
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub total_rows: usize,
    pub resume_index: RowIndex,
    pub queued: usize,
    pub pending: usize,
    pub in_flight: usize,
    pub completed: usize,
    pub results: usize,
    pub watermark: RowIndex,
    pub last_checkpoint: Option<RowIndex>,
    pub sessions: usize,
    pub started_at: DateTime<Utc>,
    pub shutting_down: bool,
}

/// Owns the shared state of one dispatch run and drives it to completion
pub struct Scheduler {
    config: MasterConfig,
    total_rows: usize,
    queue: Arc<TaskQueue>,
    results: Arc<ResultStore>,
    checkpoint: Arc<CheckpointManager>,
    registry: Arc<SessionRegistry>,
    metrics: Arc<DispatchMetrics>,
    shutdown: CancellationToken,
    started_at: DateTime<Utc>,
}

impl Scheduler {
    /// Load the input dataset and set up file-backed persistence
    pub fn build(config: MasterConfig) -> anyhow::Result<Self> {
        let dataset = Arc::new(Dataset::load(&config.data.input_path)?);
        info!(
            "Loaded {} rows from {:?}",
            dataset.len(),
            config.data.input_path
        );

        let sink = FileSink::new(
            dataset.clone(),
            ResultsFile::new(&config.data.output_path),
            CheckpointFile::new(&config.checkpoint.checkpoint_path),
        );

        Self::from_parts(config, dataset, Arc::new(sink))
    }

    /// Resume from whatever the sink holds and fill the queue with the
    /// remaining rows
    pub fn from_parts(
        config: MasterConfig,
        dataset: Arc<Dataset>,
        sink: Arc<dyn CheckpointSink>,
    ) -> anyhow::Result<Self> {
        let metrics = Arc::new(DispatchMetrics::new()?);
        let results = Arc::new(ResultStore::new());
        let checkpoint = Arc::new(CheckpointManager::open(
            sink.clone(),
            results.clone(),
            metrics.clone(),
            config.checkpoint.every_completions,
        )?);

        let mut resume = checkpoint.resume_index();
        if resume > dataset.len() {
            warn!(
                "Checkpoint {} is past the end of the dataset ({} rows), nothing left to dispatch",
                resume,
                dataset.len()
            );
            resume = dataset.len();
        }

        if config.data.seed_from_output {
            if let Some(records) = sink.load_results()? {
                let in_range = records.into_iter().filter(|r| r.index < dataset.len());
                let seeded = results.seed(in_range);
                info!("Carried over {} results from a previous run", seeded);
            }
        }

        let mut skipped = 0;
        let items: Vec<_> = dataset
            .work_items(resume)?
            .into_iter()
            .filter(|item| {
                if results.has_coordinates(item.index) {
                    checkpoint.mark_settled(item.index);
                    skipped += 1;
                    false
                } else {
                    true
                }
            })
            .collect();

        if skipped > 0 {
            info!("Skipping {} rows that already have coordinates", skipped);
        }
        info!("Queued {} rows starting at row {}", items.len(), resume);

        let queue = Arc::new(TaskQueue::new(items));
        metrics.update_queue(&queue);

        Ok(Scheduler {
            config,
            total_rows: dataset.len(),
            queue,
            results,
            checkpoint,
            registry: Arc::new(SessionRegistry::new()),
            metrics,
            shutdown: CancellationToken::new(),
            started_at: Utc::now(),
        })
    }

    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    pub fn results(&self) -> &Arc<ResultStore> {
        &self.results
    }

    pub fn checkpoint(&self) -> &Arc<CheckpointManager> {
        &self.checkpoint
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<DispatchMetrics> {
        &self.metrics
    }

    /// Token that stops the run when cancelled
    pub fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn session_context(&self) -> SessionContext {
        SessionContext {
            queue: self.queue.clone(),
            results: self.results.clone(),
            checkpoint: self.checkpoint.clone(),
            registry: self.registry.clone(),
            metrics: self.metrics.clone(),
            response_timeout: self.config.session.response_timeout(),
            send_timeout: self.config.session.send_timeout(),
            shutdown: self.shutdown.clone(),
        }
    }

    pub fn status(&self) -> StatusReport {
        let inventory = self.queue.inventory();
        StatusReport {
            total_rows: self.total_rows,
            resume_index: self.checkpoint.resume_index(),
            queued: self.queue.total(),
            pending: inventory.pending.len(),
            in_flight: inventory.checked_out.len(),
            completed: inventory.completed,
            results: self.results.len(),
            watermark: self.checkpoint.watermark(),
            last_checkpoint: self.checkpoint.last_saved(),
            sessions: self.registry.count(),
            started_at: self.started_at,
            shutting_down: self.shutdown.is_cancelled(),
        }
    }

    pub async fn bind(&self) -> anyhow::Result<ConnectionListener> {
        ConnectionListener::bind(
            &self.config.listen_address(),
            self.session_context(),
            self.config.network.max_sessions,
        )
        .await
    }

    /// Bind the configured address and serve until done
    pub async fn run(self: Arc<Self>) -> anyhow::Result<RunSummary> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serve workers on `listener` until every item completes (when
    /// configured to exit) or shutdown is requested, then write the final
    /// checkpoint
    pub async fn serve(&self, listener: ConnectionListener) -> anyhow::Result<RunSummary> {
        let flusher = self.spawn_periodic_flush();
        let accept = tokio::spawn(listener.run(self.shutdown.clone()));

        let exit_when_drained = self.config.shutdown.exit_when_drained;
        tokio::select! {
            _ = self.shutdown.cancelled() => {
                info!("Shutdown requested");
            }
            _ = self.queue.drained(), if exit_when_drained => {
                info!("All {} queued rows completed", self.queue.total());
            }
        }
        self.shutdown.cancel();

        let mut sessions = accept.await?;
        let grace = Duration::from_secs(self.config.shutdown.grace_secs);
        let drain = async { while sessions.join_next().await.is_some() {} };

        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!(
                "{} sessions still running after {:?}, aborting them",
                sessions.len(),
                grace
            );
            sessions.abort_all();
            while sessions.join_next().await.is_some() {}
        }

        if let Some(flusher) = flusher {
            if let Err(e) = flusher.await {
                error!("Periodic checkpoint task failed: {}", e);
            }
        }

        let checkpoint = self.checkpoint.final_checkpoint().await?;
        let inventory = self.queue.inventory();
        let summary = RunSummary {
            completed: inventory.completed,
            pending: inventory.pending.len(),
            in_flight: inventory.checked_out.len(),
            checkpoint,
        };

        info!(
            "Run finished: {} completed, {} pending, checkpoint at row {}",
            summary.completed, summary.pending, summary.checkpoint
        );
        Ok(summary)
    }

    /// Flush dirty progress on a timer so a quiet run still saves its tail
    fn spawn_periodic_flush(&self) -> Option<JoinHandle<()>> {
        let secs = self.config.checkpoint.interval_secs;
        if secs == 0 {
            return None;
        }

        let checkpoint = self.checkpoint.clone();
        let shutdown = self.shutdown.clone();

        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(secs));
            // The first tick fires immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        if let Some(Err(e)) = checkpoint.flush_if_dirty().await {
                            error!("Periodic checkpoint failed: {}", e);
                        }
                    }
                }
            }
        }))
    }
}
