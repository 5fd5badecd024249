pub mod cluster;
pub mod error;
pub mod gateway;
pub mod kubectl;
pub mod locator;
pub mod orchestrator;
pub mod retry;
pub mod scripts;

#[cfg(test)]
pub(crate) mod testing;

pub use cluster::{ClusterDirectory, ExecOutput, PodPhase, PodTarget, RemoteExec};
pub use error::{exit_code_for, OrchestratorError};
pub use gateway::{ExecGateway, ExecResult};
pub use kubectl::KubectlClient;
pub use locator::PodLocator;
pub use orchestrator::{render_scripts, BackupInventory, BatchKind, BatchReport, LifecycleOrchestrator, PodOutcome, PodStatus};
pub use retry::RetryPolicy;
pub use scripts::BackupVersion;
