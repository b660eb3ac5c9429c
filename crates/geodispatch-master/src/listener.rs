use crate::session::{SessionContext, SessionOutcome, WorkerSession};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Accepts worker connections and starts one session per connection
pub struct ConnectionListener {
    listener: TcpListener,
    ctx: SessionContext,
    /// Admission slots when a session cap is configured
    permits: Option<Arc<Semaphore>>,
}

impl ConnectionListener {
    pub async fn bind(
        addr: &str,
        ctx: SessionContext,
        max_sessions: Option<usize>,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Master listening on {}", listener.local_addr()?);

        Ok(ConnectionListener {
            listener,
            ctx,
            permits: max_sessions.map(|max| Arc::new(Semaphore::new(max.max(1)))),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept until `shutdown` fires, then hand back the sessions still running
    pub async fn run(self, shutdown: CancellationToken) -> JoinSet<SessionOutcome> {
        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Listener stopped accepting connections");
                    break;
                }
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => self.admit(stream, peer, &mut sessions).await,
                        Err(e) => error!("Accept error: {}", e),
                    }
                }
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        error!("Session task failed: {}", e);
                    }
                }
            }
        }

        sessions
    }

    async fn admit(
        &self,
        mut stream: TcpStream,
        peer: SocketAddr,
        sessions: &mut JoinSet<SessionOutcome>,
    ) {
        let permit = match &self.permits {
            Some(permits) => match permits.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    warn!("Session limit reached, rejecting {}", peer);
                    self.ctx.metrics.sessions_rejected.inc();
                    let _ = stream.shutdown().await;
                    return;
                }
            },
            None => None,
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY for {}: {}", peer, e);
        }

        let session = WorkerSession::new(stream, peer.to_string(), self.ctx.clone());
        sessions.spawn(async move {
            let outcome = session.run().await;
            drop(permit);
            outcome
        });
    }
}
