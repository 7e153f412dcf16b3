pub mod config;
pub mod error_handling;
pub mod errors;
pub mod logging;
pub mod models;
pub mod shutdown;
pub mod traits;

pub use config::{ProcessorConfig, StoreConfig, WorkerConfig};
pub use error_handling::{BackoffPolicy, ClassifiedStore, ErrorClassifier};
pub use errors::*;
pub use logging::{init_logging, LogConfig, LogFormat};
pub use models::{Job, JobId, JobStatus};
pub use shutdown::{ShutdownListener, ShutdownManager};
pub use traits::{JobProcessor, JobStore};
