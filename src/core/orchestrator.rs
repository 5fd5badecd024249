/// Lifecycle orchestrator for cold backup and restore
///
/// Fleet states are observed, never stored:
/// running -> quiesced (debug annotation, server killed) -> backed up / restored
/// -> starting (annotation cleared, pods deleted) -> running (verified by check).
///
/// Stop, start, check and list act on one pod at a time. Backup and restore fan
/// out one exec per running pod of a role and wait for all of them before the
/// next role.

use futures::future::join_all;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::core::cluster::PodTarget;
use crate::core::error::{OrchestratorError, Result};
use crate::core::gateway::ExecGateway;
use crate::core::locator::PodLocator;
use crate::core::retry::RetryPolicy;
use crate::core::scripts::{self, BackupVersion};
use crate::utils::{Role, RoleRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    Backup,
    Restore,
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchKind::Backup => f.write_str("backup"),
            BatchKind::Restore => f.write_str("restore"),
        }
    }
}

/// Result of one pod's backup or restore exec
#[derive(Debug, Clone, PartialEq)]
pub struct PodOutcome {
    pub role: Role,
    pub pod: String,
    pub attempts: u32,
    pub error: Option<String>,
}

impl PodOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-pod outcomes of a backup or restore, in role order
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub kind: BatchKind,
    pub version: BackupVersion,
    pub outcomes: Vec<PodOutcome>,
}

impl BatchReport {
    pub fn failures(&self) -> Vec<&PodOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success()).collect()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(PodOutcome::is_success)
    }

    /// Turn a report with failed pods into a [`OrchestratorError::PartialFailure`]
    pub fn into_result(self) -> Result<BatchReport> {
        if self.is_complete() {
            return Ok(self);
        }
        Err(OrchestratorError::PartialFailure {
            operation: format!("{} {}", self.kind, self.version),
            failures: self.failures().iter().map(|o| o.pod.clone()).collect(),
        })
    }
}

/// Probe result of one running pod
#[derive(Debug, Clone, PartialEq)]
pub struct PodStatus {
    pub role: Role,
    pub pod: String,
    pub count: i64,
}

/// Backup sets found on one pod
#[derive(Debug, Clone, PartialEq)]
pub struct PodBackups {
    pub role: Role,
    pub versions: Vec<String>,
}

/// Backup sets per pod, as listed on the pods themselves
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackupInventory {
    pods: BTreeMap<String, PodBackups>,
}

impl BackupInventory {
    pub fn insert(&mut self, pod: &str, role: Role, versions: Vec<String>) {
        self.pods
            .entry(pod.to_string())
            .or_insert_with(|| PodBackups {
                role,
                versions: Vec::new(),
            })
            .versions
            .extend(versions);
    }

    pub fn pods(&self) -> &BTreeMap<String, PodBackups> {
        &self.pods
    }

    pub fn versions(&self, pod: &str) -> Option<&[String]> {
        self.pods.get(pod).map(|b| b.versions.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.pods.is_empty()
    }

    /// Pods that do not hold `version`
    pub fn missing(&self, version: &BackupVersion) -> Vec<&str> {
        self.pods
            .iter()
            .filter(|(_, b)| !b.versions.iter().any(|v| v == version.as_str()))
            .map(|(pod, _)| pod.as_str())
            .collect()
    }
}

fn render_script(registry: &RoleRegistry, kind: BatchKind, role: Role, version: &BackupVersion) -> String {
    let spec = registry.spec(role);
    match kind {
        BatchKind::Backup => scripts::backup_script(spec, version),
        BatchKind::Restore => scripts::restore_script(spec, version),
    }
}

/// Scripts a backup or restore would run, per role, without any cluster access
pub fn render_scripts(registry: &RoleRegistry, kind: BatchKind, version: &BackupVersion) -> Vec<(Role, String)> {
    registry
        .backup_scope()
        .into_iter()
        .map(|role| (role, render_script(registry, kind, role, version)))
        .collect()
}

pub struct LifecycleOrchestrator {
    registry: RoleRegistry,
    locator: PodLocator,
    gateway: ExecGateway,
}

impl LifecycleOrchestrator {
    pub fn new(registry: RoleRegistry, locator: PodLocator, gateway: ExecGateway) -> Self {
        Self {
            registry,
            locator,
            gateway,
        }
    }

    /// Annotate every pod, then kill the server of each role in stop order.
    ///
    /// No kill is sent unless every pod of the namespace carries the debug
    /// annotation.
    pub async fn stop(&self) -> Result<()> {
        let pods = self.locator.all_pods().await?;
        for pod in &pods {
            self.locator.mark_debug(pod).await?;
        }
        info!(pods = pods.len(), "all pods in debug mode");

        let kill = scripts::shell_argv(scripts::kill_command());
        for &role in self.registry.stop_order() {
            let spec = self.registry.spec(role);
            for pod in self.locator.running_role_pods(role).await? {
                self.gateway.exec(&pod.name, &spec.container, &kill).await?;
                info!(%role, pod = %pod.name, "server stopped");
            }
        }
        Ok(())
    }

    /// Clear the debug annotation everywhere, then delete running pods in start order.
    ///
    /// Does not wait for the recreated pods; see [`Self::wait_until_ready`].
    pub async fn start(&self) -> Result<()> {
        let pods = self.locator.all_pods().await?;
        for pod in &pods {
            self.locator.clear_debug(pod).await?;
        }
        info!(pods = pods.len(), "debug mode cleared");

        for &role in self.registry.start_order() {
            for pod in self.locator.running_role_pods(role).await? {
                self.locator.delete_pod(&pod).await?;
            }
            info!(%role, "pods recreated");
        }
        Ok(())
    }

    /// Verify the server of every running pod is up
    pub async fn check(&self) -> Result<Vec<PodStatus>> {
        let mut statuses = Vec::new();
        for &role in self.registry.check_order() {
            let spec = self.registry.spec(role);
            for pod in self.locator.running_role_pods(role).await? {
                let count = self.probe(role, &pod).await?;
                if !spec.is_up(count) {
                    warn!(%role, pod = %pod.name, count, "server not running");
                    return Err(OrchestratorError::NotRunning {
                        role,
                        pod: pod.name,
                        count,
                    });
                }
                statuses.push(PodStatus {
                    role,
                    pod: pod.name,
                    count,
                });
            }
        }
        Ok(statuses)
    }

    /// Settle, then poll [`Self::check`] under `policy`
    pub async fn wait_until_ready(&self, settle: Duration, policy: RetryPolicy) -> Result<Vec<PodStatus>> {
        if !settle.is_zero() {
            info!(settle = %humantime::format_duration(settle), "waiting for pods to settle");
            tokio::time::sleep(settle).await;
        }

        let outcome = policy.run("readiness check", |_| self.check()).await;
        outcome.value.map_err(|last| OrchestratorError::NotReady {
            attempts: outcome.attempts,
            last: Box::new(last),
        })
    }

    /// Snapshot every backup-scope role into `<version>.bat`.
    ///
    /// Aborts before touching data if any role is still running. Failed pods are
    /// reported, not propagated.
    pub async fn back(&self, version: &BackupVersion) -> Result<BatchReport> {
        for role in self.registry.backup_scope() {
            self.ensure_quiesced(role).await?;
        }
        self.fan_out(BatchKind::Backup, version).await
    }

    /// Restore every backup-scope role from `<version>.bat`.
    ///
    /// Aborts before touching data if any role is still running or any pod lacks
    /// the requested backup set.
    pub async fn restore(&self, version: &BackupVersion) -> Result<BatchReport> {
        for role in self.registry.backup_scope() {
            self.ensure_quiesced(role).await?;
        }
        self.ensure_version_present(version).await?;
        self.fan_out(BatchKind::Restore, version).await
    }

    /// Fail with `VersionMissing` unless every running pod of the backup scope
    /// holds `version`. Read-only, safe to call before [`Self::stop`].
    pub async fn ensure_version_present(&self, version: &BackupVersion) -> Result<()> {
        let inventory = self.list().await?;
        if let Some(pod) = inventory.missing(version).first() {
            error!(pod, %version, "backup version not found");
            return Err(OrchestratorError::VersionMissing {
                pod: pod.to_string(),
                version: version.to_string(),
            });
        }
        Ok(())
    }

    /// Backup sets present on every running pod of the backup scope
    pub async fn list(&self) -> Result<BackupInventory> {
        let mut inventory = BackupInventory::default();
        for role in self.registry.backup_scope() {
            let spec = self.registry.spec(role);
            let argv = scripts::shell_argv(scripts::list_probe(spec));
            for pod in self.locator.running_role_pods(role).await? {
                let result = self.gateway.exec(&pod.name, &spec.container, &argv).await?;
                inventory.insert(&pod.name, role, scripts::parse_versions(&result.stdout));
            }
        }
        Ok(inventory)
    }

    fn script_for(&self, kind: BatchKind, role: Role, version: &BackupVersion) -> String {
        render_script(&self.registry, kind, role, version)
    }

    async fn probe(&self, role: Role, pod: &PodTarget) -> Result<i64> {
        let spec = self.registry.spec(role);
        let argv = scripts::shell_argv(scripts::status_probe(spec));
        let result = self.gateway.exec(&pod.name, &spec.container, &argv).await?;
        scripts::parse_token_count(&result.stdout).ok_or_else(|| OrchestratorError::ProbeOutput {
            pod: pod.name.clone(),
            output: result.stdout,
        })
    }

    async fn ensure_quiesced(&self, role: Role) -> Result<()> {
        let spec = self.registry.spec(role);
        let pods = self.locator.running_role_pods(role).await?;
        if pods.is_empty() {
            error!(%role, "no running pods");
            return Err(OrchestratorError::NoRunningPods { role });
        }
        for pod in pods {
            let count = self.probe(role, &pod).await?;
            if spec.is_up(count) {
                error!(%role, pod = %pod.name, count, "server still running");
                return Err(OrchestratorError::NotQuiesced {
                    role,
                    pod: pod.name,
                    count,
                });
            }
        }
        info!(%role, "quiesced");
        Ok(())
    }

    /// One concurrent exec per running pod of a role, joined before the next role
    async fn fan_out(&self, kind: BatchKind, version: &BackupVersion) -> Result<BatchReport> {
        let mut outcomes = Vec::new();

        for role in self.registry.backup_scope() {
            let spec = self.registry.spec(role);
            let pods = self.locator.running_role_pods(role).await?;
            let script = self.script_for(kind, role, version);
            info!(%role, %kind, %version, pods = pods.len(), "dispatching");

            let tasks = pods.into_iter().map(|pod| {
                let argv = scripts::shell_argv(script.clone());
                async move {
                    info!(%role, pod = %pod.name, %kind, "started");
                    match self.gateway.exec(&pod.name, &spec.container, &argv).await {
                        Ok(result) => {
                            info!(%role, pod = %pod.name, %kind, attempts = result.attempts, "finished");
                            PodOutcome {
                                role,
                                pod: pod.name,
                                attempts: result.attempts,
                                error: None,
                            }
                        }
                        Err(err) => {
                            error!(%role, pod = %pod.name, %kind, error = %err, "failed");
                            let attempts = match &err {
                                OrchestratorError::ExecFailed { attempts, .. } => *attempts,
                                _ => 0,
                            };
                            PodOutcome {
                                role,
                                pod: pod.name,
                                attempts,
                                error: Some(format!("{:#}", anyhow::Error::from(err))),
                            }
                        }
                    }
                }
            });

            outcomes.extend(join_all(tasks).await);
        }

        let report = BatchReport {
            kind,
            version: version.clone(),
            outcomes,
        };
        info!(
            %kind,
            %version,
            succeeded = report.succeeded(),
            failed = report.failures().len(),
            "fan-out complete"
        );
        Ok(report)
    }
}
