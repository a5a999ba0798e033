pub mod engine;
pub mod executor;
pub mod inventory;
pub mod planner;
pub mod progress;
pub mod source;

pub use engine::{RunOptions, SyncOrchestrator};
pub use executor::{Backoff, ExecutionOutcome, ExecutorConfig, TransferExecutor};
pub use inventory::{RemoteInventory, RemoteObject};
pub use planner::{ReconciliationPlanner, SyncPlan, TaskKind, TaskStatus, TransferTask};
pub use progress::{
    CompletedItem, FailedItem, ProgressTracker, RunPhase, RunReport, RunStatus, SyncProgress,
};
pub use source::{Artifact, ArtifactSource, SearchRoot};
