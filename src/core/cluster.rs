/// Seams to the outside world: the cluster control plane and the exec channel
///
/// The orchestrator only talks to these traits. [`crate::core::KubectlClient`]
/// implements both on top of the `kubectl` binary; tests use in-memory fakes.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::utils::Role;

/// Pod phase as reported by the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl From<&str> for PodPhase {
    fn from(s: &str) -> Self {
        match s {
            "Pending" => PodPhase::Pending,
            "Running" => PodPhase::Running,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

impl PodPhase {
    pub fn is_running(&self) -> bool {
        matches!(self, PodPhase::Running)
    }
}

/// A pod as observed at call time. Never cached across operations.
#[derive(Debug, Clone, PartialEq)]
pub struct PodTarget {
    pub name: String,
    pub role: Option<Role>,
    pub phase: PodPhase,
    pub annotations: BTreeMap<String, String>,
}

impl PodTarget {
    pub fn new(name: impl Into<String>, phase: PodPhase) -> Self {
        Self {
            name: name.into(),
            role: None,
            phase,
            annotations: BTreeMap::new(),
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}

/// Captured output of one exec
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Pod discovery and metadata mutation in one namespace
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterDirectory: Send + Sync {
    /// Pods matching `selector`, or every pod of the namespace when `None`
    async fn list_pods(&self, selector: Option<String>) -> Result<Vec<PodTarget>>;

    /// Sets `key=value`, creating the annotation map if needed
    async fn set_annotation(&self, pod: &str, key: &str, value: &str) -> Result<()>;

    async fn remove_annotation(&self, pod: &str, key: &str) -> Result<()>;

    async fn delete_pod(&self, pod: &str) -> Result<()>;
}

/// Runs an argv inside a container of a pod
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteExec: Send + Sync {
    async fn exec(&self, pod: &str, container: &str, argv: &[String]) -> Result<ExecOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pod_phase() {
        assert_eq!(PodPhase::from("Running"), PodPhase::Running);
        assert_eq!(PodPhase::from("CrashLoopBackOff"), PodPhase::Unknown);
        assert!(PodPhase::Running.is_running());
        assert!(!PodPhase::Pending.is_running());
    }

    #[test]
    fn test_pod_target() {
        let mut pod = PodTarget::new("basic-tikv-0", PodPhase::Running).with_role(Role::TiKV);
        pod.annotations.insert("runmode".to_string(), "debug".to_string());
        assert_eq!(pod.role, Some(Role::TiKV));
        assert_eq!(pod.annotation("runmode"), Some("debug"));
        assert_eq!(pod.annotation("missing"), None);
    }
}
