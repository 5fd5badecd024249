mod cli;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use cli::{Cli, Commands};
use tinker_cli::core::{
    exit_code_for, render_scripts, BackupVersion, BatchKind, BatchReport, ExecGateway, KubectlClient,
    LifecycleOrchestrator, PodLocator, PodStatus,
};
use tinker_cli::utils::{self, AppConfig, RoleRegistry, Timings, DEFAULT_VERSION};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = utils::init_tracing(cli.log_format) {
        eprintln!("{:#}", err);
    }

    if let Err(err) = run(cli).await {
        eprintln!("{} {:#}", "✗".red().bold(), err);
        std::process::exit(exit_code_for(&err));
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => AppConfig::load_from(&utils::expand_tilde(path))?,
        None => AppConfig::load()?,
    };
    let settings = Settings::resolve(&cli, config)?;
    debug!(
        namespace = ?settings.namespace,
        kube_config = %settings.kube_config.display(),
        version = %settings.version,
        "settings resolved"
    );

    match cli.command {
        Commands::Stop => handle_stop(&settings).await,
        Commands::Start => handle_start(&settings).await,
        Commands::Back { dry_run } => handle_batch(&settings, BatchKind::Backup, dry_run).await,
        Commands::Restore { dry_run } => handle_batch(&settings, BatchKind::Restore, dry_run).await,
        Commands::List => handle_list(&settings).await,
        Commands::Check => handle_check(&settings).await,
    }
}

/// Effective settings: command line, then config file, then defaults
struct Settings {
    namespace: Option<String>,
    kube_config: PathBuf,
    kubectl: String,
    version: BackupVersion,
    timing: Timings,
}

impl Settings {
    fn resolve(cli: &Cli, config: AppConfig) -> Result<Self> {
        let kube_config = match cli
            .kube_config
            .clone()
            .or_else(|| config.kube_config.map(PathBuf::from))
        {
            Some(path) => utils::expand_tilde(path),
            None => utils::default_kube_config()?,
        };

        let label = cli
            .backup_version
            .clone()
            .or(config.version)
            .unwrap_or_else(|| DEFAULT_VERSION.to_string());

        Ok(Self {
            namespace: cli.namespace.clone().or(config.namespace),
            kube_config,
            kubectl: cli
                .kubectl
                .clone()
                .or(config.kubectl)
                .unwrap_or_else(|| "kubectl".to_string()),
            version: BackupVersion::parse(&label)?,
            timing: config.timing,
        })
    }

    fn orchestrator(&self) -> Result<LifecycleOrchestrator> {
        let namespace = self
            .namespace
            .as_deref()
            .context("No namespace given: pass --namespace or set `namespace` in the config file")?;

        let client = Arc::new(KubectlClient::new(&self.kubectl, &self.kube_config, namespace)?);
        let locator = PodLocator::new(client.clone());
        let gateway = ExecGateway::new(client, self.timing.exec_policy()?);

        Ok(LifecycleOrchestrator::new(RoleRegistry::standard(), locator, gateway))
    }
}

fn spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed}]")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}

/// Run one phase under a spinner and print how long it took
async fn phase<T, E, F>(label: &str, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    E: Into<anyhow::Error>,
{
    let bar = spinner(label);
    let started = Instant::now();
    let result = fut.await;
    bar.finish_and_clear();

    let elapsed = utils::format_elapsed(started.elapsed());
    match &result {
        Ok(_) => println!("{} {} ({})", "✓".green(), label, elapsed),
        Err(_) => println!("{} {} ({})", "✗".red(), label, elapsed),
    }
    result.map_err(Into::into)
}

async fn settle(label: &str, delay: Duration) -> Result<()> {
    if delay.is_zero() {
        return Ok(());
    }
    let label = format!("{} ({})", label, humantime::format_duration(delay));
    phase(&label, async {
        tokio::time::sleep(delay).await;
        Ok::<_, anyhow::Error>(())
    })
    .await
}

fn print_statuses(statuses: &[PodStatus]) {
    println!("\n{:<8} {:<32} {:>6}", "Role", "Pod", "Tokens");
    println!("{}", "-".repeat(48));
    for status in statuses {
        println!(
            "{:<8} {:<32} {:>6}",
            status.role.name(),
            utils::truncate_string(&status.pod, 32),
            status.count
        );
    }
}

/// Clear debug mode, recreate the pods and wait until every server answers
async fn start_and_verify(orchestrator: &LifecycleOrchestrator, timing: &Timings) -> Result<Vec<PodStatus>> {
    phase("Leaving debug mode and recreating pods", orchestrator.start()).await?;
    let policy = timing.readiness_policy()?;
    let settle = timing.start_settle()?;
    phase(
        "Waiting for the cluster to become ready",
        orchestrator.wait_until_ready(settle, policy),
    )
    .await
}

async fn handle_stop(settings: &Settings) -> Result<()> {
    let orchestrator = settings.orchestrator()?;
    phase("Stopping tidb, tikv and pd", orchestrator.stop()).await?;
    println!("All servers stopped; pods are held in debug mode");
    Ok(())
}

async fn handle_start(settings: &Settings) -> Result<()> {
    let orchestrator = settings.orchestrator()?;
    let statuses = start_and_verify(&orchestrator, &settings.timing).await?;
    print_statuses(&statuses);
    println!("\n{}", "Cluster is running".green().bold());
    Ok(())
}

async fn handle_check(settings: &Settings) -> Result<()> {
    let orchestrator = settings.orchestrator()?;
    let statuses = phase("Checking servers", orchestrator.check()).await?;
    print_statuses(&statuses);
    println!("\n{}", "Check succeeded".green().bold());
    Ok(())
}

async fn handle_list(settings: &Settings) -> Result<()> {
    let orchestrator = settings.orchestrator()?;
    let inventory = phase("Listing backups", orchestrator.list()).await?;

    if inventory.is_empty() {
        println!("No running tikv or pd pods found");
        return Ok(());
    }

    println!("\n{:<8} {:<32} {}", "Role", "Pod", "Versions");
    println!("{}", "-".repeat(60));
    for (pod, backups) in inventory.pods() {
        let versions = if backups.versions.is_empty() {
            "-".dimmed().to_string()
        } else {
            backups.versions.join(", ")
        };
        println!(
            "{:<8} {:<32} {}",
            backups.role.name(),
            utils::truncate_string(pod, 32),
            versions
        );
    }
    Ok(())
}

fn print_dry_run(kind: BatchKind, version: &BackupVersion) {
    println!("Dry run: {} {} would execute\n", kind, version);
    for (role, script) in render_scripts(&RoleRegistry::standard(), kind, version) {
        println!("{} {}", "#".dimmed(), role.display_name().bold());
        println!("{}\n", script);
    }
}

fn print_report(report: &BatchReport) {
    for outcome in &report.outcomes {
        match &outcome.error {
            None => println!(
                "  {} {:<6} {} ({} attempt(s))",
                "✓".green(),
                outcome.role.name(),
                outcome.pod,
                outcome.attempts
            ),
            Some(err) => println!(
                "  {} {:<6} {}: {}",
                "✗".red(),
                outcome.role.name(),
                outcome.pod,
                err
            ),
        }
    }
}

/// stop, settle, backup or restore, start, readiness
async fn handle_batch(settings: &Settings, kind: BatchKind, dry_run: bool) -> Result<()> {
    let version = &settings.version;
    if dry_run {
        print_dry_run(kind, version);
        return Ok(());
    }

    let orchestrator = settings.orchestrator()?;
    let timing = &settings.timing;
    let started = Instant::now();
    println!(
        "{} {} {} in namespace {}",
        Local::now().format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
        kind.to_string().bold(),
        version,
        settings.namespace.as_deref().unwrap_or_default()
    );
    info!(%kind, %version, "cold {} started", kind);

    // Read-only, so a missing backup set is reported while the cluster still serves
    if kind == BatchKind::Restore {
        let label = format!("Checking every tikv and pd pod holds {}", version.dir_name());
        phase(&label, orchestrator.ensure_version_present(version)).await?;
    }

    phase("Stopping tidb, tikv and pd", orchestrator.stop()).await?;
    settle("Letting the servers exit", timing.stop_settle()?).await?;

    let label = match kind {
        BatchKind::Backup => format!("Backing up data to {} (do not interrupt)", version.dir_name()),
        BatchKind::Restore => format!("Restoring data from {} (do not interrupt)", version.dir_name()),
    };
    let outcome = match kind {
        BatchKind::Backup => phase(&label, orchestrator.back(version)).await,
        BatchKind::Restore => phase(&label, orchestrator.restore(version)).await,
    };
    let report = match outcome {
        Ok(report) => report,
        Err(err) => {
            eprintln!(
                "{} pods are still in debug mode; run `tinker-cli start` to bring the cluster back",
                "!".yellow().bold()
            );
            return Err(err);
        }
    };
    print_report(&report);

    start_and_verify(&orchestrator, timing).await?;
    if kind == BatchKind::Restore {
        settle("Letting the restored cluster settle", timing.restore_settle()?).await?;
    }

    println!(
        "\nFinished in {}",
        utils::format_elapsed(started.elapsed())
    );
    report.into_result()?;
    println!("{}", format!("{} {} complete", kind, version).green().bold());
    Ok(())
}
