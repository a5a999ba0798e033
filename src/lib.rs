pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod storage;

pub use crate::core::{
    Artifact, ArtifactSource, Backoff, ExecutorConfig, ProgressTracker, RemoteInventory,
    RemoteObject, RunOptions, RunReport, RunStatus, SearchRoot, SyncOrchestrator, SyncProgress,
    TransferExecutor, TransferTask,
};
pub use config::{Settings, StorageConfig, StorageType, TransferSettings};
pub use error::{FailureKind, StorageError, SyncError};
pub use storage::{create_storage, Storage};
