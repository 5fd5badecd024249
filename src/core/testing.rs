//! In-memory cluster for orchestrator tests
//!
//! Simulates pods with a server process, the debug annotation and backup
//! directories, and answers the same shell programs the real pods receive.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::core::cluster::{ClusterDirectory, ExecOutput, PodPhase, PodTarget, RemoteExec};
use crate::core::gateway::ExecGateway;
use crate::core::locator::PodLocator;
use crate::core::orchestrator::LifecycleOrchestrator;
use crate::core::retry::RetryPolicy;
use crate::utils::{Role, RoleRegistry, COMPONENT_LABEL, DEBUG_ANNOTATION_KEY};

#[derive(Debug, Clone)]
struct FakePod {
    role: Option<Role>,
    phase: PodPhase,
    annotations: BTreeMap<String, String>,
    server_up: bool,
    backups: BTreeSet<String>,
}

#[derive(Default)]
struct State {
    pods: BTreeMap<String, FakePod>,
    events: Vec<String>,
    fail_annotation: HashSet<String>,
    fail_scripts: HashSet<String>,
    blank_probes: HashSet<String>,
    in_flight: HashMap<Role, usize>,
    max_in_flight: HashMap<Role, usize>,
    script_runs: usize,
}

#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    /// tidb x1, tikv x3, pd x2 plus an unlabelled discovery pod, all running
    pub fn standard() -> Arc<Self> {
        let cluster = Self::default();
        cluster.add_pod("basic-discovery-6d9f", None);
        cluster.add_pod("basic-tidb-0", Some(Role::TiDB));
        for i in 0..3 {
            cluster.add_pod(&format!("basic-tikv-{i}"), Some(Role::TiKV));
        }
        for i in 0..2 {
            cluster.add_pod(&format!("basic-pd-{i}"), Some(Role::Pd));
        }
        Arc::new(cluster)
    }

    pub fn orchestrator(self: &Arc<Self>, registry: RoleRegistry) -> LifecycleOrchestrator {
        let locator = PodLocator::new(self.clone());
        let gateway = ExecGateway::new(self.clone(), RetryPolicy::new(2, Duration::ZERO));
        LifecycleOrchestrator::new(registry, locator, gateway)
    }

    pub fn add_pod(&self, name: &str, role: Option<Role>) {
        self.state.lock().unwrap().pods.insert(
            name.to_string(),
            FakePod {
                role,
                phase: PodPhase::Running,
                annotations: BTreeMap::new(),
                server_up: true,
                backups: BTreeSet::new(),
            },
        );
    }

    pub fn set_phase(&self, pod: &str, phase: PodPhase) {
        self.with_pod(pod, |p| p.phase = phase);
    }

    pub fn set_server_up(&self, pod: &str, up: bool) {
        self.with_pod(pod, |p| p.server_up = up);
    }

    pub fn add_backup(&self, pod: &str, version: &str) {
        self.with_pod(pod, |p| {
            p.backups.insert(version.to_string());
        });
    }

    pub fn fail_annotation_on(&self, pod: &str) {
        self.state.lock().unwrap().fail_annotation.insert(pod.to_string());
    }

    pub fn fail_scripts_on(&self, pod: &str) {
        self.state.lock().unwrap().fail_scripts.insert(pod.to_string());
    }

    /// Status probes on `pod` print nothing, as when `ps` is missing from the image
    pub fn blank_probes_on(&self, pod: &str) {
        self.state.lock().unwrap().blank_probes.insert(pod.to_string());
    }

    pub fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.lock().unwrap().events.clear();
    }

    pub fn annotation(&self, pod: &str) -> Option<String> {
        self.state.lock().unwrap().pods[pod]
            .annotations
            .get(DEBUG_ANNOTATION_KEY)
            .cloned()
    }

    pub fn all_annotated(&self) -> bool {
        let state = self.state.lock().unwrap();
        state
            .pods
            .values()
            .all(|p| p.annotations.contains_key(DEBUG_ANNOTATION_KEY))
    }

    pub fn none_annotated(&self) -> bool {
        let state = self.state.lock().unwrap();
        state
            .pods
            .values()
            .all(|p| !p.annotations.contains_key(DEBUG_ANNOTATION_KEY))
    }

    /// No role pod has its server running
    pub fn all_roles_down(&self) -> bool {
        let state = self.state.lock().unwrap();
        state
            .pods
            .values()
            .filter(|p| p.role.is_some() && p.phase.is_running())
            .all(|p| !p.server_up)
    }

    pub fn backups(&self, pod: &str) -> BTreeSet<String> {
        self.state.lock().unwrap().pods[pod].backups.clone()
    }

    /// Backup and restore script executions, failed ones included
    pub fn script_runs(&self) -> usize {
        self.state.lock().unwrap().script_runs
    }

    pub fn max_in_flight(&self, role: Role) -> usize {
        self.state
            .lock()
            .unwrap()
            .max_in_flight
            .get(&role)
            .copied()
            .unwrap_or(0)
    }

    fn with_pod(&self, pod: &str, f: impl FnOnce(&mut FakePod)) {
        let mut state = self.state.lock().unwrap();
        let entry = state.pods.get_mut(pod).expect("unknown pod");
        f(entry);
    }

    /// Version label out of `.../back_<v>.sh` or `.../restore_<v>.sh`
    fn script_version(script: &str, prefix: &str) -> Option<String> {
        let rest = script.split(prefix).nth(1)?;
        rest.split(".sh").next().map(str::to_string)
    }

    async fn run_script(&self, pod: &str, role: Role, script: &str) -> Result<ExecOutput> {
        {
            let mut state = self.state.lock().unwrap();
            state.script_runs += 1;
            state.events.push(format!("begin {pod}"));
            let in_flight = state.in_flight.entry(role).or_default();
            *in_flight += 1;
            let current = *in_flight;
            let max = state.max_in_flight.entry(role).or_default();
            *max = (*max).max(current);
        }

        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut state = self.state.lock().unwrap();
        *state.in_flight.entry(role).or_default() -= 1;
        state.events.push(format!("end {pod}"));

        if state.fail_scripts.contains(pod) {
            return Err(anyhow!("command terminated with exit code 1"));
        }
        if let Some(version) = Self::script_version(script, "/back_") {
            if let Some(p) = state.pods.get_mut(pod) {
                p.backups.insert(version);
            }
        }
        Ok(ExecOutput::default())
    }
}

#[async_trait]
impl ClusterDirectory for FakeCluster {
    async fn list_pods(&self, selector: Option<String>) -> Result<Vec<PodTarget>> {
        let wanted = selector
            .as_deref()
            .and_then(|s| s.strip_prefix(COMPONENT_LABEL))
            .and_then(|s| s.strip_prefix('='))
            .map(str::to_string);

        let state = self.state.lock().unwrap();
        Ok(state
            .pods
            .iter()
            .filter(|(_, p)| match &wanted {
                Some(name) => p.role.map(|r| r.name()) == Some(name.as_str()),
                None => true,
            })
            .map(|(name, p)| PodTarget {
                name: name.clone(),
                role: None,
                phase: p.phase,
                annotations: p.annotations.clone(),
            })
            .collect())
    }

    async fn set_annotation(&self, pod: &str, key: &str, value: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_annotation.contains(pod) {
            return Err(anyhow!("pods \"{pod}\" is forbidden"));
        }
        let entry = state.pods.get_mut(pod).ok_or_else(|| anyhow!("pod {pod} not found"))?;
        entry.annotations.insert(key.to_string(), value.to_string());
        state.events.push(format!("annotate {pod}"));
        Ok(())
    }

    async fn remove_annotation(&self, pod: &str, key: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_annotation.contains(pod) {
            return Err(anyhow!("pods \"{pod}\" is forbidden"));
        }
        let entry = state.pods.get_mut(pod).ok_or_else(|| anyhow!("pod {pod} not found"))?;
        entry.annotations.remove(key);
        state.events.push(format!("unannotate {pod}"));
        Ok(())
    }

    async fn delete_pod(&self, pod: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let entry = state.pods.get_mut(pod).ok_or_else(|| anyhow!("pod {pod} not found"))?;
        // The controller recreates it; the server starts unless held in debug mode
        entry.phase = PodPhase::Running;
        entry.server_up = !entry.annotations.contains_key(DEBUG_ANNOTATION_KEY);
        state.events.push(format!("delete {pod}"));
        Ok(())
    }
}

#[async_trait]
impl RemoteExec for FakeCluster {
    async fn exec(&self, pod: &str, container: &str, argv: &[String]) -> Result<ExecOutput> {
        let script = argv.get(2).ok_or_else(|| anyhow!("expected sh -c <script>"))?;
        let role = {
            let state = self.state.lock().unwrap();
            let p = state.pods.get(pod).ok_or_else(|| anyhow!("pod {pod} not found"))?;
            let role = p.role.ok_or_else(|| anyhow!("pod {pod} has no role"))?;
            if role.name() != container {
                return Err(anyhow!("container {container} not found in pod {pod}"));
            }
            role
        };

        if script == "kill 1" {
            let mut state = self.state.lock().unwrap();
            if let Some(p) = state.pods.get_mut(pod) {
                p.server_up = false;
            }
            state.events.push(format!("kill {pod}"));
            return Ok(ExecOutput::default());
        }

        if script.contains("awk '{print NF}'") {
            let state = self.state.lock().unwrap();
            if state.blank_probes.contains(pod) {
                return Ok(ExecOutput::default());
            }
            let count = if state.pods[pod].server_up { 12 } else { 4 };
            return Ok(ExecOutput {
                stdout: format!("4\n{count}\n4\n"),
                stderr: String::new(),
            });
        }

        if script.starts_with("ls -A") {
            let state = self.state.lock().unwrap();
            let stdout = state.pods[pod]
                .backups
                .iter()
                .map(|v| format!("{v}.bat\n"))
                .collect();
            return Ok(ExecOutput {
                stdout,
                stderr: String::new(),
            });
        }

        if script.contains("/back_") || script.contains("/restore_") {
            return self.run_script(pod, role, script).await;
        }

        Err(anyhow!("unexpected script: {script}"))
    }
}
