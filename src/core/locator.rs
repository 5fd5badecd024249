/// Pod locator: role-scoped discovery and the debug annotation
///
/// Every call goes back to the cluster. Pods are deleted and recreated between
/// phases, so nothing resolved here is kept around.

use std::sync::Arc;
use tracing::{debug, info};

use crate::core::cluster::{ClusterDirectory, PodTarget};
use crate::core::error::{OrchestratorError, Result};
use crate::utils::{Role, DEBUG_ANNOTATION_KEY, DEBUG_ANNOTATION_VALUE};

#[derive(Clone)]
pub struct PodLocator {
    directory: Arc<dyn ClusterDirectory>,
}

impl PodLocator {
    pub fn new(directory: Arc<dyn ClusterDirectory>) -> Self {
        Self { directory }
    }

    /// Every pod of the namespace, whatever its role
    pub async fn all_pods(&self) -> Result<Vec<PodTarget>> {
        self.directory
            .list_pods(None)
            .await
            .map_err(|source| OrchestratorError::Discovery {
                selector: "<all pods>".to_string(),
                source,
            })
    }

    /// Pods labelled with `role`, in any phase
    pub async fn role_pods(&self, role: Role) -> Result<Vec<PodTarget>> {
        let selector = role.selector();
        let pods = self
            .directory
            .list_pods(Some(selector.clone()))
            .await
            .map_err(|source| OrchestratorError::Discovery { selector, source })?;

        Ok(pods.into_iter().map(|pod| pod.with_role(role)).collect())
    }

    /// Pods of `role` currently in the Running phase
    pub async fn running_role_pods(&self, role: Role) -> Result<Vec<PodTarget>> {
        let pods = self.role_pods(role).await?;
        let total = pods.len();
        let running: Vec<PodTarget> = pods.into_iter().filter(|p| p.phase.is_running()).collect();
        debug!(%role, total, running = running.len(), "resolved pods");
        Ok(running)
    }

    /// Put the pod's entrypoint in debug mode so a killed server is not restarted
    pub async fn mark_debug(&self, pod: &PodTarget) -> Result<()> {
        if pod.annotation(DEBUG_ANNOTATION_KEY) == Some(DEBUG_ANNOTATION_VALUE) {
            debug!(pod = %pod.name, "already in debug mode");
            return Ok(());
        }
        self.directory
            .set_annotation(&pod.name, DEBUG_ANNOTATION_KEY, DEBUG_ANNOTATION_VALUE)
            .await
            .map_err(|source| OrchestratorError::Annotation {
                pod: pod.name.clone(),
                source,
            })?;
        info!(pod = %pod.name, "debug annotation set");
        Ok(())
    }

    /// Remove the debug annotation; a pod without it is left alone
    pub async fn clear_debug(&self, pod: &PodTarget) -> Result<()> {
        if pod.annotation(DEBUG_ANNOTATION_KEY).is_none() {
            debug!(pod = %pod.name, "no debug annotation");
            return Ok(());
        }
        self.directory
            .remove_annotation(&pod.name, DEBUG_ANNOTATION_KEY)
            .await
            .map_err(|source| OrchestratorError::Annotation {
                pod: pod.name.clone(),
                source,
            })?;
        info!(pod = %pod.name, "debug annotation cleared");
        Ok(())
    }

    pub async fn delete_pod(&self, pod: &PodTarget) -> Result<()> {
        self.directory
            .delete_pod(&pod.name)
            .await
            .map_err(|source| OrchestratorError::PodDelete {
                pod: pod.name.clone(),
                source,
            })?;
        info!(pod = %pod.name, "pod deleted");
        Ok(())
    }
}
