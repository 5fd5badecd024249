/// TiDB cluster role definitions and constants
///
/// The registry is plain data: which roles exist, in which order they are
/// stopped, started and checked, and where each one keeps its data on the pod.

use std::fmt;

/// Default parent directory of every role's data directory on the pod
pub const DEFAULT_BASE_DIR: &str = "/var/lib";

/// Label key used by the operator to tag pods with their role
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/component";

/// Annotation that keeps a pod's entrypoint in debug mode instead of restarting the server
pub const DEBUG_ANNOTATION_KEY: &str = "runmode";
pub const DEBUG_ANNOTATION_VALUE: &str = "debug";

/// Suffix of a backup directory (`5.2.bat`)
pub const BACKUP_SUFFIX: &str = ".bat";

/// File the operator drops into data directories to reserve disk space
pub const PLACEHOLDER_FILE: &str = "space_placeholder_file";

/// Token count above which the supervised process is considered up
pub const LIVENESS_THRESHOLD: i64 = 8;

/// Backup label used when none is given
pub const DEFAULT_VERSION: &str = "5.2";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    TiDB,
    Pd,
    TiKV,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::TiDB, Role::Pd, Role::TiKV];

    pub fn name(&self) -> &'static str {
        match self {
            Role::TiDB => "tidb",
            Role::Pd => "pd",
            Role::TiKV => "tikv",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Role::TiDB => "TiDB (SQL layer)",
            Role::Pd => "PD (placement driver)",
            Role::TiKV => "TiKV (storage)",
        }
    }

    /// Label selector matching every pod of this role
    pub fn selector(&self) -> String {
        format!("{}={}", COMPONENT_LABEL, self.name())
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How the status probe finds the supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    /// Whole process table of the container
    ProcessTable,
    /// Only the init process (pid 1)
    InitProcess,
}

/// Static description of one role
#[derive(Debug, Clone, PartialEq)]
pub struct RoleSpec {
    pub role: Role,
    pub data_dir: String,
    pub container: String,
    pub liveness_threshold: i64,
    pub probe: ProbeKind,
    pub durable: bool,
}

impl RoleSpec {
    /// Whether a probe token count means the server process is up
    pub fn is_up(&self, count: i64) -> bool {
        count > self.liveness_threshold
    }
}

/// Immutable role table built once at startup and handed to the orchestrator
#[derive(Debug, Clone)]
pub struct RoleRegistry {
    specs: Vec<RoleSpec>,
    stop_order: Vec<Role>,
    start_order: Vec<Role>,
    check_order: Vec<Role>,
}

impl RoleRegistry {
    /// Registry with data directories under `/var/lib`
    pub fn standard() -> Self {
        Self::with_base_dir(DEFAULT_BASE_DIR)
    }

    pub fn with_base_dir(base_dir: &str) -> Self {
        let base = base_dir.trim_end_matches('/');
        let specs = Role::ALL
            .iter()
            .map(|&role| RoleSpec {
                role,
                data_dir: format!("{}/{}", base, role.name()),
                container: role.name().to_string(),
                liveness_threshold: LIVENESS_THRESHOLD,
                probe: match role {
                    Role::TiKV => ProbeKind::InitProcess,
                    _ => ProbeKind::ProcessTable,
                },
                // TiDB is stateless, nothing worth snapshotting
                durable: role != Role::TiDB,
            })
            .collect();

        Self {
            specs,
            stop_order: vec![Role::TiDB, Role::TiKV, Role::Pd],
            start_order: vec![Role::Pd, Role::TiKV, Role::TiDB],
            check_order: vec![Role::TiKV, Role::Pd, Role::TiDB],
        }
    }

    pub fn spec(&self, role: Role) -> &RoleSpec {
        // specs follows Role::ALL order
        &self.specs[role as usize]
    }

    pub fn stop_order(&self) -> &[Role] {
        &self.stop_order
    }

    pub fn start_order(&self) -> &[Role] {
        &self.start_order
    }

    pub fn check_order(&self) -> &[Role] {
        &self.check_order
    }

    /// Roles whose data is snapshotted, in processing order
    pub fn backup_scope(&self) -> Vec<Role> {
        self.check_order
            .iter()
            .copied()
            .filter(|&role| self.spec(role).durable)
            .collect()
    }
}

impl Default for RoleRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
