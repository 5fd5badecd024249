/// Orchestrator error taxonomy and the CLI exit code of each kind

use thiserror::Error;

use crate::utils::Role;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Cluster directory unreachable or returned something unusable
    #[error("failed to list pods ({selector})")]
    Discovery {
        selector: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to update annotation on pod {pod}")]
    Annotation {
        pod: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to delete pod {pod}")]
    PodDelete {
        pod: String,
        #[source]
        source: anyhow::Error,
    },

    /// Remote exec still failing after every retry
    #[error("exec on pod {pod} (container {container}) failed after {attempts} attempts")]
    ExecFailed {
        pod: String,
        container: String,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("unexpected probe output from pod {pod}: {output:?}")]
    ProbeOutput { pod: String, output: String },

    #[error("{role} is not quiesced: pod {pod} reports {count} tokens")]
    NotQuiesced { role: Role, pod: String, count: i64 },

    #[error("no running {role} pod to work on")]
    NoRunningPods { role: Role },

    #[error("backup version {version} not found on pod {pod}")]
    VersionMissing { pod: String, version: String },

    #[error("invalid backup version {0:?}: use letters, digits, '.', '_' or '-'")]
    InvalidVersion(String),

    #[error("{role} is not running: pod {pod} reports {count} tokens")]
    NotRunning { role: Role, pod: String, count: i64 },

    #[error("cluster not ready after {attempts} checks: {last}")]
    NotReady { attempts: u32, last: Box<OrchestratorError> },

    /// Some pods of a fan-out failed, the rest succeeded
    #[error("{operation} incomplete, failed pods: {}", .failures.join(", "))]
    PartialFailure {
        operation: String,
        failures: Vec<String>,
    },
}

/// Exit code for errors that are not an [`OrchestratorError`]
pub const EXIT_GENERIC: i32 = 1;

impl OrchestratorError {
    /// Process exit code for this error kind
    pub fn exit_code(&self) -> i32 {
        match self {
            OrchestratorError::PartialFailure { .. } => 2,
            OrchestratorError::Discovery { .. } => 3,
            OrchestratorError::NotQuiesced { .. }
            | OrchestratorError::NoRunningPods { .. }
            | OrchestratorError::VersionMissing { .. }
            | OrchestratorError::InvalidVersion(_) => 4,
            OrchestratorError::Annotation { .. } | OrchestratorError::PodDelete { .. } => 5,
            OrchestratorError::ExecFailed { .. } | OrchestratorError::ProbeOutput { .. } => 6,
            OrchestratorError::NotRunning { .. } | OrchestratorError::NotReady { .. } => 7,
        }
    }

    /// True for failures detected before anything destructive ran
    pub fn is_precondition(&self) -> bool {
        self.exit_code() == 4
    }
}

/// Exit code for an application error, looking through the anyhow chain
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<OrchestratorError>())
        .map(OrchestratorError::exit_code)
        .unwrap_or(EXIT_GENERIC)
}
