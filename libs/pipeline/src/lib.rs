pub mod config;
pub mod decoder;
pub mod error;
mod enricher;
mod ingest;
mod queue;
mod retry;
mod route;
mod stats;
mod supervisor;
mod writer;

pub use enricher::Enricher;
pub use error::{PipelineError, QueueClosed};
pub use ingest::{IngestOutcome, Ingestor};
pub use queue::{Deferred, DeliveryQueue, Enqueued};
pub use retry::Backoff;
pub use route::{PathTemplate, Router, normalize_path};
pub use stats::{Stats, StatsSnapshot};
pub use supervisor::{ConnectionSupervisor, ReconnectPolicy, SupervisorState};
pub use writer::{PersistenceWriter, RetryPolicy, WriteOutcome, init_store};
