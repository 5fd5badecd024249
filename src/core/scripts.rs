/// Shell programs executed inside the role containers
///
/// The only remote primitive available is "run this text in that container",
/// so every command the orchestrator sends is rendered here and nowhere else.
/// Destructive steps always start with a cleanup so a re-run after a partial
/// failure lands in the same state.

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

use crate::core::error::{OrchestratorError, Result};
use crate::utils::{ProbeKind, RoleSpec, BACKUP_SUFFIX, PLACEHOLDER_FILE};

/// Validated backup label, safe to splice into shell text and paths
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackupVersion(String);

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("static regex"))
}

impl BackupVersion {
    pub fn parse(label: &str) -> Result<Self> {
        let label = label.trim();
        if version_pattern().is_match(label) && !label.ends_with(BACKUP_SUFFIX) {
            Ok(Self(label.to_string()))
        } else {
            Err(OrchestratorError::InvalidVersion(label.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Directory name of this backup set (`5.2.bat`)
    pub fn dir_name(&self) -> String {
        format!("{}{}", self.0, BACKUP_SUFFIX)
    }
}

impl fmt::Display for BackupVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Full path of the backup directory of `version` for a role
pub fn backup_dir(spec: &RoleSpec, version: &BackupVersion) -> String {
    format!("{}/{}", spec.data_dir, version.dir_name())
}

/// `grep -E` pattern matching entries that must never be copied or removed:
/// backup directories and the placeholder file
fn exclusion_pattern() -> String {
    format!("[.]{}$|^{}$", BACKUP_SUFFIX.trim_start_matches('.'), PLACEHOLDER_FILE)
}

/// Data directory entries minus the excluded ones, as a backquoted substitution.
/// `$` and backquotes are escaped because the text is echoed through double quotes.
fn live_entries() -> String {
    format!(
        "\\`ls -A | grep -vE '{}'\\`",
        exclusion_pattern().replace('$', "\\$")
    )
}

/// Writes `steps` into `sh_file` and runs it
fn wrap_in_script(steps: &[String], sh_file: &str) -> String {
    format!("echo \"{}\" > {};sh {}", steps.join(";"), sh_file, sh_file)
}

/// Snapshot the role's data directory into `<data_dir>/<version>.bat`
pub fn backup_script(spec: &RoleSpec, version: &BackupVersion) -> String {
    let dir = &spec.data_dir;
    let back_dir = backup_dir(spec, version);
    let sh_file = format!("{}/back_{}.sh", dir, version);

    let steps = [
        format!("rm -rf {}", back_dir),
        format!("mkdir -p {}", back_dir),
        format!("cd {};/bin/cp -rfv {} {}", dir, live_entries(), back_dir),
    ];
    wrap_in_script(&steps, &sh_file)
}

/// Replace the live data directory with the content of `<data_dir>/<version>.bat`
pub fn restore_script(spec: &RoleSpec, version: &BackupVersion) -> String {
    let dir = &spec.data_dir;
    let back_dir = backup_dir(spec, version);
    let sh_file = format!("{}/restore_{}.sh", dir, version);

    // `<back_dir>/.` also picks up hidden entries, which `ls -A` included in the backup
    let steps = [
        format!("cd {};rm -rfv {}", dir, live_entries()),
        format!("/bin/cp -rfv {}/. {}", back_dir, dir),
    ];
    wrap_in_script(&steps, &sh_file)
}

/// Prints the token count of each process table line; see [`parse_token_count`]
pub fn status_probe(spec: &RoleSpec) -> String {
    match spec.probe {
        ProbeKind::ProcessTable => "ps|awk '{print NF}'".to_string(),
        ProbeKind::InitProcess => "ps -Cp 1|awk '{print NF}'".to_string(),
    }
}

/// Lists backup directory names; an empty listing still exits 0
pub fn list_probe(spec: &RoleSpec) -> String {
    format!(
        "ls -A {} | grep -E '[.]{}$' || true",
        spec.data_dir,
        BACKUP_SUFFIX.trim_start_matches('.')
    )
}

pub fn kill_command() -> String {
    "kill 1".to_string()
}

/// argv handed to the exec channel for a script
pub fn shell_argv(script: String) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script]
}

/// Token count of the first process line (second output line, after the `ps` header).
///
/// Header only means an empty process table and counts as 0. No output at all
/// means the probe itself did not run and yields `None`.
pub fn parse_token_count(output: &str) -> Option<i64> {
    let mut lines = output.lines().map(str::trim);
    match lines.next() {
        None | Some("") => None,
        Some(_) => match lines.next() {
            None | Some("") => Some(0),
            Some(line) => line.parse().ok(),
        },
    }
}

/// Version labels from list probe output, suffix stripped
pub fn parse_versions(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter_map(|entry| entry.strip_suffix(BACKUP_SUFFIX))
        // `x.bat.bat` is not a backup set this tool could have written
        .filter(|version| !version.is_empty() && !version.ends_with(BACKUP_SUFFIX))
        .map(str::to_string)
        .collect()
}
