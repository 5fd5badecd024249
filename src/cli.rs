/// CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use tinker_cli::utils::LogFormat;

// Build timestamp injected at compile time
pub const VERSION_WITH_BUILD: &str = concat!(env!("CARGO_PKG_VERSION"), " (built: ", env!("BUILD_TIMESTAMP"), ")");

// `--version` names the backup set, so the binary version lives under `-V`
#[derive(Parser)]
#[command(name = "tinker-cli")]
#[command(author, version = VERSION_WITH_BUILD, about, long_about = None)]
#[command(disable_version_flag = true)]
pub struct Cli {
    /// Backup label the data directories are copied under
    #[arg(short = 'v', long = "version", global = true)]
    pub backup_version: Option<String>,

    /// Path of the kubeconfig file (default: ~/.kube/config)
    #[arg(short = 'c', long, global = true)]
    pub kube_config: Option<PathBuf>,

    /// Namespace the TiDB cluster runs in
    #[arg(short, long, global = true)]
    pub namespace: Option<String>,

    /// Alternative config file (default: ~/.config/tinker-cli/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// kubectl binary to drive
    #[arg(long, global = true)]
    pub kubectl: Option<String>,

    /// Log output format on stderr
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    /// Print the binary version
    #[arg(short = 'V', long = "build-info", action = clap::ArgAction::Version)]
    pub build_info: Option<bool>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Put every pod in debug mode and kill the database servers
    Stop,

    /// Leave debug mode and recreate the pods, then wait for readiness
    Start,

    /// Cold backup of the tikv and pd data directories
    Back {
        /// Print the scripts that would run without touching the cluster
        #[arg(long)]
        dry_run: bool,
    },

    /// Cold restore of a previously taken backup
    Restore {
        /// Print the scripts that would run without touching the cluster
        #[arg(long)]
        dry_run: bool,
    },

    /// List the backups present on every tikv and pd pod
    List,

    /// Verify every database server is running
    Check,
}
