use crate::{
    checkpoint::CheckpointManager,
    metrics::DispatchMetrics,
    queue::TaskQueue,
    registry::{SessionId, SessionRegistry},
    results::ResultStore,
};
use futures::{SinkExt, StreamExt};
use geodispatch_core::{Coordinates, RowIndex, WorkItem};
use geodispatch_protocol::{GeocodeRequest, MasterCodec, ProtocolError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Shared state every session works against
#[derive(Clone)]
pub struct SessionContext {
    pub queue: Arc<TaskQueue>,
    pub results: Arc<ResultStore>,
    pub checkpoint: Arc<CheckpointManager>,
    pub registry: Arc<SessionRegistry>,
    pub metrics: Arc<DispatchMetrics>,
    pub response_timeout: Duration,
    pub send_timeout: Duration,
    pub shutdown: CancellationToken,
}

/// How a session ended
#[derive(Debug)]
pub enum SessionOutcome {
    /// The queue had nothing left to hand out
    Exhausted { completed: usize },
    /// Shutdown was requested between exchanges
    Cancelled { completed: usize },
    /// An exchange failed; its item went back to the queue
    Failed {
        completed: usize,
        index: RowIndex,
        error: ProtocolError,
    },
}

impl SessionOutcome {
    pub fn completed(&self) -> usize {
        match self {
            SessionOutcome::Exhausted { completed }
            | SessionOutcome::Cancelled { completed }
            | SessionOutcome::Failed { completed, .. } => *completed,
        }
    }
}

/// An item checked out to this session.
///
/// Dropping it without completing hands the item back to the queue, so an
/// aborted or panicking session never loses work.
struct Checkout {
    queue: Arc<TaskQueue>,
    item: WorkItem,
    settled: bool,
}

impl Checkout {
    fn pull(queue: &Arc<TaskQueue>) -> Option<Self> {
        let item = queue.pull()?;
        Some(Checkout {
            queue: queue.clone(),
            item,
            settled: false,
        })
    }

    fn item(&self) -> &WorkItem {
        &self.item
    }

    fn complete(mut self, results: &ResultStore, coordinates: Option<Coordinates>) -> bool {
        self.settled = true;
        self.queue
            .complete(self.item.index, |item| results.record(item.index, coordinates))
            .is_some()
    }

    fn requeue(mut self) -> bool {
        self.settled = true;
        self.queue.requeue(self.item.clone())
    }
}

impl Drop for Checkout {
    fn drop(&mut self) {
        if !self.settled {
            warn!("Session ended while holding item {}, requeueing", self.item.index);
            self.queue.requeue(self.item.clone());
        }
    }
}

/// Deregisters the session however it ends
struct Registration {
    id: SessionId,
    registry: Arc<SessionRegistry>,
    metrics: Arc<DispatchMetrics>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.deregister(&self.id);
        self.metrics.sessions_active.dec();
    }
}

/// One connected worker: pulls items, sends requests, records replies.
///
/// The session stops at the first failed exchange; the item goes back to the
/// queue and the connection is dropped rather than retried.
pub struct WorkerSession<S> {
    id: SessionId,
    peer: String,
    framed: Framed<S, MasterCodec>,
    ctx: SessionContext,
}

impl<S> WorkerSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, peer: impl Into<String>, ctx: SessionContext) -> Self {
        WorkerSession {
            id: Uuid::new_v4(),
            peer: peer.into(),
            framed: Framed::new(stream, MasterCodec::new()),
            ctx,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Drive the session until the queue is empty, shutdown is requested, or
    /// an exchange fails
    pub async fn run(mut self) -> SessionOutcome {
        self.ctx.registry.register(self.id, self.peer.clone());
        self.ctx.metrics.sessions_opened.inc();
        self.ctx.metrics.sessions_active.inc();
        let _registration = Registration {
            id: self.id,
            registry: self.ctx.registry.clone(),
            metrics: self.ctx.metrics.clone(),
        };

        info!(session = %self.id, peer = %self.peer, "Worker connected");

        let outcome = self.serve().await;
        self.close().await;

        match &outcome {
            SessionOutcome::Failed { index, error, .. } => warn!(
                session = %self.id,
                peer = %self.peer,
                index,
                kind = error.kind(),
                "Worker error: {}",
                error
            ),
            other => info!(
                session = %self.id,
                peer = %self.peer,
                completed = other.completed(),
                "Worker disconnected"
            ),
        }

        outcome
    }

    async fn serve(&mut self) -> SessionOutcome {
        let queue = self.ctx.queue.clone();
        let mut completed = 0;

        loop {
            if self.ctx.shutdown.is_cancelled() {
                return SessionOutcome::Cancelled { completed };
            }

            let Some(checkout) = Checkout::pull(&queue) else {
                return SessionOutcome::Exhausted { completed };
            };
            let index = checkout.item().index;
            self.ctx.registry.set_current(&self.id, Some(index));
            self.ctx.metrics.update_queue(&queue);

            let started = Instant::now();
            match self.exchange(checkout.item()).await {
                Ok(coordinates) => {
                    self.ctx
                        .metrics
                        .exchange_duration
                        .observe(started.elapsed().as_secs_f64());

                    let address = checkout.item().payload.clone();
                    if !checkout.complete(&self.ctx.results, coordinates) {
                        warn!(session = %self.id, index, "Item was no longer checked out, reply dropped");
                        continue;
                    }

                    completed += 1;
                    self.ctx.registry.record_completion(&self.id);
                    self.ctx.metrics.items_completed.inc();
                    self.ctx.metrics.update_queue(&queue);
                    log_progress(&self.peer, index, &address, coordinates);

                    self.ctx.checkpoint.maybe_checkpoint(index).await;
                }
                Err(error) => {
                    if checkout.requeue() {
                        self.ctx.metrics.items_requeued.inc();
                    }
                    self.ctx.metrics.inc_session_failure(error.kind());
                    self.ctx.metrics.update_queue(&queue);

                    return SessionOutcome::Failed {
                        completed,
                        index,
                        error,
                    };
                }
            }
        }
    }

    /// One request/response cycle, each direction bounded by a timeout
    async fn exchange(&mut self, item: &WorkItem) -> Result<Option<Coordinates>, ProtocolError> {
        let request = GeocodeRequest::from_item(item);
        debug!(session = %self.id, index = item.index, "Sending item");

        timeout(self.ctx.send_timeout, self.framed.send(request))
            .await
            .map_err(|_| ProtocolError::Timeout(self.ctx.send_timeout))??;

        let reply = match timeout(self.ctx.response_timeout, self.framed.next()).await {
            Err(_) => return Err(ProtocolError::Timeout(self.ctx.response_timeout)),
            Ok(None) => return Err(ProtocolError::ConnectionClosed),
            Ok(Some(reply)) => reply?,
        };

        reply.coordinates()
    }

    /// Best-effort orderly shutdown of the write half
    async fn close(&mut self) {
        let send_timeout = self.ctx.send_timeout;
        if let Ok(Err(e)) = timeout(send_timeout, self.framed.get_mut().shutdown()).await {
            debug!(session = %self.id, "Error closing connection: {}", e);
        }
    }
}

fn log_progress(peer: &str, index: RowIndex, address: &str, coordinates: Option<Coordinates>) {
    match coordinates {
        Some(c) => info!(
            index,
            "Worker {}: {} | Latitude: {} | Longitude: {}",
            peer,
            address,
            c.latitude(),
            c.longitude()
        ),
        None => info!(index, "Worker {}: {} | not found", peer, address),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::tests::MemorySink;
    use geodispatch_protocol::{GeocodeReply, WorkerCodec};
    use tokio::io::DuplexStream;

    fn context(items: Vec<WorkItem>) -> (SessionContext, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::default());
        let results = Arc::new(ResultStore::new());
        let metrics = Arc::new(DispatchMetrics::new().unwrap());
        let checkpoint = Arc::new(
            CheckpointManager::open(sink.clone(), results.clone(), metrics.clone(), 1000).unwrap(),
        );

        let ctx = SessionContext {
            queue: Arc::new(TaskQueue::new(items)),
            results,
            checkpoint,
            registry: Arc::new(SessionRegistry::new()),
            metrics,
            response_timeout: Duration::from_millis(200),
            send_timeout: Duration::from_millis(200),
            shutdown: CancellationToken::new(),
        };
        (ctx, sink)
    }

    fn items(n: usize) -> Vec<WorkItem> {
        (0..n)
            .map(|i| WorkItem::new(i, format!("Rua {}, Brasil", i), "São Paulo"))
            .collect()
    }

    fn worker(io: DuplexStream) -> Framed<DuplexStream, WorkerCodec> {
        Framed::new(io, WorkerCodec::new())
    }

    fn found(lat: f64, lon: f64) -> GeocodeReply {
        GeocodeReply::found(Coordinates::new(lat, lon).unwrap())
    }

    #[tokio::test]
    async fn test_completes_all_items() {
        let (ctx, _) = context(items(3));
        let (master_io, worker_io) = tokio::io::duplex(1024);
        let session = tokio::spawn(WorkerSession::new(master_io, "test", ctx.clone()).run());

        let mut worker = worker(worker_io);
        for i in 0..3 {
            let request = worker.next().await.unwrap().unwrap();
            assert_eq!(request.endereco, format!("Rua {}, Brasil", i));
            worker.send(found(i as f64, -(i as f64))).await.unwrap();
        }

        // Queue empty: the master hangs up
        assert!(worker.next().await.is_none());

        let outcome = session.await.unwrap();
        assert!(matches!(outcome, SessionOutcome::Exhausted { completed: 3 }));
        assert_eq!(ctx.results.len(), 3);
        assert_eq!(ctx.results.get(2).unwrap().latitude(), Some(2.0));
        assert!(ctx.queue.is_drained());
        assert_eq!(ctx.registry.count(), 0);
        assert_eq!(ctx.metrics.items_completed.get(), 3);
    }

    #[tokio::test]
    async fn test_not_found_reply_completes_item() {
        let (ctx, _) = context(items(1));
        let (master_io, worker_io) = tokio::io::duplex(1024);
        let session = tokio::spawn(WorkerSession::new(master_io, "test", ctx.clone()).run());

        let mut worker = worker(worker_io);
        worker.next().await.unwrap().unwrap();
        worker.send(GeocodeReply::not_found()).await.unwrap();

        let outcome = session.await.unwrap();
        assert_eq!(outcome.completed(), 1);
        assert_eq!(ctx.results.get(0).unwrap().coordinates, None);
        assert!(ctx.queue.is_drained());
    }

    #[tokio::test]
    async fn test_disconnect_requeues_item() {
        let (ctx, _) = context(items(3));
        let (master_io, worker_io) = tokio::io::duplex(1024);
        let session = tokio::spawn(WorkerSession::new(master_io, "test", ctx.clone()).run());

        let mut worker = worker(worker_io);
        worker.next().await.unwrap().unwrap();
        worker.send(found(12.0, 34.0)).await.unwrap();

        // Receive item 1 and hang up without replying
        let request = worker.next().await.unwrap().unwrap();
        assert_eq!(request.endereco, "Rua 1, Brasil");
        drop(worker);

        let outcome = session.await.unwrap();
        match outcome {
            SessionOutcome::Failed { completed, index, error } => {
                assert_eq!(completed, 1);
                assert_eq!(index, 1);
                assert!(error.is_transport());
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        let inventory = ctx.queue.inventory();
        assert_eq!(inventory.pending, vec![2, 1]);
        assert!(inventory.checked_out.is_empty());
        assert!(ctx.results.get(1).is_none());
        assert_eq!(ctx.metrics.items_requeued.get(), 1);
    }

    #[tokio::test]
    async fn test_silent_worker_times_out() {
        let (ctx, _) = context(items(1));
        let (master_io, worker_io) = tokio::io::duplex(1024);
        let session = tokio::spawn(WorkerSession::new(master_io, "test", ctx.clone()).run());

        let mut worker = worker(worker_io);
        worker.next().await.unwrap().unwrap();

        let outcome = session.await.unwrap();
        assert!(matches!(
            outcome,
            SessionOutcome::Failed { error: ProtocolError::Timeout(_), .. }
        ));
        assert_eq!(ctx.queue.inventory().pending, vec![0]);
        drop(worker);
    }

    #[tokio::test]
    async fn test_invalid_reply_requeues_item() {
        let (ctx, _) = context(items(1));
        let (master_io, worker_io) = tokio::io::duplex(1024);
        let session = tokio::spawn(WorkerSession::new(master_io, "test", ctx.clone()).run());

        let mut worker = worker(worker_io);
        worker.next().await.unwrap().unwrap();
        worker
            .send(GeocodeReply {
                latitude: Some(12.0),
                longitude: None,
            })
            .await
            .unwrap();

        let outcome = session.await.unwrap();
        match outcome {
            SessionOutcome::Failed { error, .. } => assert!(!error.is_transport()),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(ctx.queue.len(), 1);
        assert!(ctx.results.is_empty());
        assert_eq!(
            ctx.metrics.session_failures.with_label_values(&["invalid"]).get(),
            1
        );
    }

    #[tokio::test]
    async fn test_failures_then_success_record_once() {
        let (ctx, _) = context(items(1));

        // Two deliveries fail, the third succeeds
        for attempt in 0..3 {
            let (master_io, worker_io) = tokio::io::duplex(1024);
            let session = tokio::spawn(WorkerSession::new(master_io, "test", ctx.clone()).run());
            let mut worker = worker(worker_io);
            worker.next().await.unwrap().unwrap();

            if attempt < 2 {
                drop(worker);
            } else {
                worker.send(found(12.0, 34.0)).await.unwrap();
            }
            session.await.unwrap();
        }

        assert_eq!(ctx.results.len(), 1);
        let record = ctx.results.get(0).unwrap();
        assert_eq!(record.latitude(), Some(12.0));
        assert_eq!(record.longitude(), Some(34.0));
        assert!(ctx.queue.is_drained());
    }

    #[tokio::test]
    async fn test_cancelled_session_stops_pulling() {
        let (ctx, _) = context(items(2));
        ctx.shutdown.cancel();

        let (master_io, _worker_io) = tokio::io::duplex(1024);
        let outcome = WorkerSession::new(master_io, "test", ctx.clone()).run().await;

        assert!(matches!(outcome, SessionOutcome::Cancelled { completed: 0 }));
        assert_eq!(ctx.queue.len(), 2);
    }

    #[tokio::test]
    async fn test_aborted_session_returns_item() {
        let (ctx, _) = context(items(1));
        let (master_io, worker_io) = tokio::io::duplex(1024);
        let session = tokio::spawn(WorkerSession::new(master_io, "test", ctx.clone()).run());

        let mut worker = worker(worker_io);
        worker.next().await.unwrap().unwrap();
        assert_eq!(ctx.queue.in_flight(), 1);

        session.abort();
        assert!(session.await.unwrap_err().is_cancelled());

        assert_eq!(ctx.queue.inventory().pending, vec![0]);
        assert_eq!(ctx.registry.count(), 0);
    }
}
