pub mod api;
pub mod checkpoint;
pub mod config;
pub mod listener;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod results;
pub mod scheduler;
pub mod session;

pub use checkpoint::{CheckpointManager, CheckpointSink, FileSink};
pub use config::MasterConfig;
pub use listener::ConnectionListener;
pub use queue::TaskQueue;
pub use results::ResultStore;
pub use scheduler::{RunSummary, Scheduler};
pub use session::{SessionContext, SessionOutcome, WorkerSession};
