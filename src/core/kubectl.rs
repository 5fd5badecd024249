/// Kubernetes integration through the `kubectl` binary
///
/// Implements [`ClusterDirectory`] and [`RemoteExec`] for one namespace.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::core::cluster::{ClusterDirectory, ExecOutput, PodTarget, RemoteExec};

/// `kubectl get pods -o json` payload, only the fields we read
#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<PodItem>,
}

#[derive(Debug, Deserialize)]
struct PodItem {
    metadata: PodMetadata,
    #[serde(default)]
    status: Option<PodStatus>,
}

#[derive(Debug, Deserialize)]
struct PodMetadata {
    name: String,
    #[serde(default)]
    annotations: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct PodStatus {
    #[serde(default)]
    phase: Option<String>,
}

#[derive(Debug, Clone)]
pub struct KubectlClient {
    binary: PathBuf,
    kube_config: PathBuf,
    namespace: String,
}

impl KubectlClient {
    /// Create a client for `namespace`, failing early if the kube config is missing
    pub fn new(binary: impl Into<PathBuf>, kube_config: impl Into<PathBuf>, namespace: &str) -> Result<Self> {
        let kube_config = kube_config.into();
        if !kube_config.exists() {
            return Err(anyhow!(
                "kube config not found at {}",
                kube_config.display()
            ));
        }
        if namespace.trim().is_empty() {
            return Err(anyhow!("namespace must not be empty"));
        }

        Ok(Self {
            binary: binary.into(),
            kube_config,
            namespace: namespace.to_string(),
        })
    }

    /// Common arguments selecting the cluster and namespace
    fn base_args(&self) -> Vec<String> {
        vec![
            "--kubeconfig".to_string(),
            self.kube_config.to_string_lossy().to_string(),
            "--namespace".to_string(),
            self.namespace.clone(),
        ]
    }

    /// Execute a kubectl command and return its captured output
    async fn kubectl(&self, args: &[String]) -> Result<ExecOutput> {
        debug!(binary = %self.binary.display(), ?args, "kubectl");

        let output = Command::new(&self.binary)
            .args(self.base_args())
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("Failed to execute {}", self.binary.display()))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            return Err(anyhow!(
                "kubectl {} failed ({}): {}",
                args.first().map(String::as_str).unwrap_or_default(),
                output.status,
                stderr.trim()
            ));
        }

        Ok(ExecOutput { stdout, stderr })
    }
}

fn parse_pod_list(json: &str) -> Result<Vec<PodTarget>> {
    let list: PodList = serde_json::from_str(json).context("Failed to parse kubectl pod list")?;

    Ok(list
        .items
        .into_iter()
        .map(|item| PodTarget {
            name: item.metadata.name,
            role: None,
            phase: item
                .status
                .and_then(|s| s.phase)
                .as_deref()
                .unwrap_or("Unknown")
                .into(),
            annotations: item.metadata.annotations.unwrap_or_default(),
        })
        .collect())
}

#[async_trait]
impl ClusterDirectory for KubectlClient {
    async fn list_pods(&self, selector: Option<String>) -> Result<Vec<PodTarget>> {
        let mut args = vec!["get".to_string(), "pods".to_string(), "--output".to_string(), "json".to_string()];
        if let Some(selector) = selector {
            args.push("--selector".to_string());
            args.push(selector);
        }
        let output = self.kubectl(&args).await?;
        parse_pod_list(&output.stdout)
    }

    async fn set_annotation(&self, pod: &str, key: &str, value: &str) -> Result<()> {
        let args = [
            "annotate".to_string(),
            "pod".to_string(),
            pod.to_string(),
            format!("{}={}", key, value),
            "--overwrite".to_string(),
        ];
        self.kubectl(&args).await?;
        Ok(())
    }

    async fn remove_annotation(&self, pod: &str, key: &str) -> Result<()> {
        let args = [
            "annotate".to_string(),
            "pod".to_string(),
            pod.to_string(),
            format!("{}-", key),
        ];
        self.kubectl(&args).await?;
        Ok(())
    }

    async fn delete_pod(&self, pod: &str) -> Result<()> {
        let args = [
            "delete".to_string(),
            "pod".to_string(),
            pod.to_string(),
            "--wait=false".to_string(),
        ];
        self.kubectl(&args).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteExec for KubectlClient {
    async fn exec(&self, pod: &str, container: &str, argv: &[String]) -> Result<ExecOutput> {
        let mut args = vec![
            "exec".to_string(),
            pod.to_string(),
            "--container".to_string(),
            container.to_string(),
            "--".to_string(),
        ];
        args.extend(argv.iter().cloned());
        self.kubectl(&args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cluster::PodPhase;

    const POD_LIST: &str = r#"{
        "apiVersion": "v1",
        "kind": "List",
        "items": [
            {
                "metadata": {
                    "name": "basic-tikv-0",
                    "labels": {"app.kubernetes.io/component": "tikv"},
                    "annotations": {"runmode": "debug"}
                },
                "status": {"phase": "Running"}
            },
            {
                "metadata": {"name": "basic-tikv-1"},
                "status": {"phase": "Pending"}
            },
            {
                "metadata": {"name": "basic-discovery-5f7d"}
            }
        ]
    }"#;

    #[test]
    fn test_parse_pod_list() {
        let pods = parse_pod_list(POD_LIST).unwrap();
        assert_eq!(pods.len(), 3);

        assert_eq!(pods[0].name, "basic-tikv-0");
        assert_eq!(pods[0].phase, PodPhase::Running);
        assert_eq!(pods[0].annotation("runmode"), Some("debug"));

        assert_eq!(pods[1].phase, PodPhase::Pending);
        assert!(pods[1].annotations.is_empty());

        assert_eq!(pods[2].phase, PodPhase::Unknown);
    }

    #[test]
    fn test_parse_empty_and_invalid() {
        assert!(parse_pod_list(r#"{"items": []}"#).unwrap().is_empty());
        assert!(parse_pod_list("error: You must be logged in").is_err());
    }

    #[test]
    fn test_missing_kube_config() {
        let err = KubectlClient::new("kubectl", "/nonexistent/kube/config", "tidb").unwrap_err();
        assert!(err.to_string().contains("kube config not found"));
    }

    #[test]
    fn test_base_args() {
        let config = tempfile::NamedTempFile::new().unwrap();
        let client = KubectlClient::new("kubectl", config.path(), "tidb-cluster").unwrap();
        let args = client.base_args();
        assert_eq!(args[0], "--kubeconfig");
        assert_eq!(args[2], "--namespace");
        assert_eq!(args[3], "tidb-cluster");

        assert!(KubectlClient::new("kubectl", config.path(), "  ").is_err());
    }

    #[tokio::test]
    async fn test_missing_binary_is_an_error() {
        let config = tempfile::NamedTempFile::new().unwrap();
        let client = KubectlClient::new("/nonexistent/kubectl", config.path(), "tidb").unwrap();
        let err = client.list_pods(None).await.unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to execute"));
    }
}
