use crate::{config::WorkerConfig, executor::GeocodeExecutor, handler::Geocoder};
use futures::{SinkExt, StreamExt};
use geodispatch_protocol::{GeocodeReply, WorkerCodec};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Reference worker: answers the master's geocoding requests one at a time
pub struct Worker {
    config: WorkerConfig,
    executor: GeocodeExecutor,
    shutdown: CancellationToken,
}

impl Worker {
    pub fn new(config: WorkerConfig, geocoder: Arc<dyn Geocoder>) -> Self {
        let executor = GeocodeExecutor::new(geocoder, config.geocode_timeout());
        Worker {
            config,
            executor,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the worker between requests
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Connect to the master and serve until it hangs up.
    ///
    /// Returns the number of requests answered.
    pub async fn run(&self) -> anyhow::Result<usize> {
        let stream = self.connect().await?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY: {}", e);
        }
        self.serve(stream).await
    }

    async fn connect(&self) -> anyhow::Result<TcpStream> {
        let address = &self.config.master_address;
        let mut attempt = 0;

        loop {
            match TcpStream::connect(address).await {
                Ok(stream) => {
                    info!("Connected to master at {}", address);
                    return Ok(stream);
                }
                Err(e) if attempt < self.config.connect_retries => {
                    attempt += 1;
                    warn!(
                        "Failed to connect to {} ({}), retry {}/{}",
                        address, e, attempt, self.config.connect_retries
                    );
                    tokio::time::sleep(self.config.retry_delay()).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Request/reply loop over an established connection.
    ///
    /// A geocoder failure closes the connection without replying, which makes
    /// the master put the item back for another worker.
    pub async fn serve<S>(&self, stream: S) -> anyhow::Result<usize>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut framed = Framed::new(stream, WorkerCodec::new());
        let mut answered = 0;

        loop {
            let request = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Worker shutting down after {} requests", answered);
                    break;
                }
                next = framed.next() => match next {
                    Some(request) => request?,
                    None => {
                        info!("Master closed the connection after {} requests", answered);
                        break;
                    }
                }
            };

            let reply = match self.executor.execute(&request).await {
                Ok(Some(coordinates)) => GeocodeReply::found(coordinates),
                Ok(None) => GeocodeReply::not_found(),
                Err(e) => {
                    anyhow::bail!("Giving up on {:?}: {}", request.endereco, e);
                }
            };

            framed.send(reply).await?;
            answered += 1;
        }

        Ok(answered)
    }
}
