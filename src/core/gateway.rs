/// Remote exec gateway
///
/// The only component that runs commands on pods. Every call is retried under
/// the configured [`RetryPolicy`]; exhausting it fails that one invocation and
/// nothing else.

use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::core::cluster::RemoteExec;
use crate::core::error::{OrchestratorError, Result};
use crate::core::retry::RetryPolicy;

/// Output of a successful exec and the attempts it took
#[derive(Debug, Clone, PartialEq)]
pub struct ExecResult {
    pub stdout: String,
    pub attempts: u32,
}

#[derive(Clone)]
pub struct ExecGateway {
    channel: Arc<dyn RemoteExec>,
    policy: RetryPolicy,
}

impl ExecGateway {
    pub fn new(channel: Arc<dyn RemoteExec>, policy: RetryPolicy) -> Self {
        Self { channel, policy }
    }

    /// Run `argv` in `container` of `pod`, retrying transport failures
    pub async fn exec(&self, pod: &str, container: &str, argv: &[String]) -> Result<ExecResult> {
        debug!(pod, container, command = ?argv, "exec");

        let outcome = self
            .policy
            .run("exec", |attempt| async move {
                let output = self.channel.exec(pod, container, argv).await;
                if let Err(err) = &output {
                    warn!(pod, container, attempt, error = %format!("{:#}", err), "exec attempt failed");
                }
                output
            })
            .await;

        match outcome.value {
            Ok(output) => {
                if !output.stderr.trim().is_empty() {
                    debug!(pod, container, stderr = %output.stderr.trim(), "exec stderr");
                }
                Ok(ExecResult {
                    stdout: output.stdout,
                    attempts: outcome.attempts,
                })
            }
            Err(source) => {
                error!(pod, container, attempts = outcome.attempts, command = ?argv, "exec failed");
                Err(OrchestratorError::ExecFailed {
                    pod: pod.to_string(),
                    container: container.to_string(),
                    attempts: outcome.attempts,
                    source,
                })
            }
        }
    }
}
