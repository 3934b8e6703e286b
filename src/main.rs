//! NetBox manager CLI entrypoint.
//!
//! This is the main entrypoint for the netbox-manager command-line tool.

use std::io::{BufRead, IsTerminal, Write};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use netbox_manager::cli::{Cli, Commands, OutputFormat, OutputFormatter};
use netbox_manager::compose::{ComposeExecutor, ComposeLayerWriter, ComposeLayout, HttpFetcher};
use netbox_manager::config::{DeploymentMode, RandomSecretGenerator};
use netbox_manager::docker::{CommandRunner, DockerCli, NetworkReconciler, ProcessRunner};
use netbox_manager::error::{ManagerError, Result};
use netbox_manager::provision::{ReachabilityChecker, TokenProvisioner};
use netbox_manager::reconciler::{ModeReconciler, Operation};
use netbox_manager::state::{EnvFileStore, SettingsStore};

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// Logs go to stderr so `--output json` keeps stdout clean.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<ExitCode> {
    let formatter = OutputFormatter::new(cli.output);
    let interactive = cli.output == OutputFormat::Text && std::io::stdin().is_terminal();
    let dir = cli.dir.as_path();

    match cli.command {
        Commands::Enable {
            mode,
            port,
            portal_port,
            yes,
        } => {
            let store = EnvFileStore::with_base_dir(dir);
            let mut mode = mode.map(DeploymentMode::from);
            let mut port = port;
            if !yes && interactive {
                let current = store.load().await?;
                if mode.is_none() {
                    mode = Some(prompt_mode(current.mode)?);
                }
                if port.is_none() {
                    port = Some(prompt_port(current.ui_port)?);
                }
            }
            cmd_operation(
                dir,
                Operation::Enable {
                    mode,
                    ui_port: port,
                    portal_port,
                },
                &formatter,
            )
            .await
        }
        Commands::Disable { yes } => {
            if !yes && interactive && !confirm("Disable Slurp'it and remove its containers?")? {
                emit(&formatter.warning("Aborted"))?;
                return Ok(ExitCode::SUCCESS);
            }
            cmd_operation(dir, Operation::Disable, &formatter).await
        }
        Commands::Reconcile => cmd_operation(dir, Operation::Reconcile, &formatter).await,
        Commands::Status => cmd_operation(dir, Operation::Status, &formatter).await,
        Commands::Ps => cmd_ps(dir, &formatter).await,
        Commands::Logs {
            service,
            follow,
            tail,
        } => cmd_logs(dir, service.as_deref(), follow, tail).await,
        Commands::Exec { service, command } => cmd_exec(dir, &service, &command).await,
        Commands::Unlock { lock_id, force } => cmd_unlock(dir, lock_id.as_deref(), force, &formatter).await,
    }
}

/// Runs one reconciler operation.
async fn cmd_operation(dir: &Path, operation: Operation, formatter: &OutputFormatter) -> Result<ExitCode> {
    info!("Running {} in {}", operation.name(), dir.display());

    let runner = process_runner();
    let layout = ComposeLayout::new(dir);
    let executor = ComposeExecutor::detect(runner.clone(), layout.clone()).await?;
    debug!("Using Compose {:?}", executor.flavor());

    let store = EnvFileStore::with_base_dir(dir);
    let writer = ComposeLayerWriter::new(layout, Arc::new(HttpFetcher::new()?));
    let docker = DockerCli::new(runner);
    let tokens = TokenProvisioner::new(docker.clone());
    let networks = NetworkReconciler::new(docker);
    let checker = ReachabilityChecker::new()?;
    let secrets = RandomSecretGenerator::new();

    let reconciler = ModeReconciler::new(&store, &writer, &executor, &tokens, &networks, &secrets)
        .with_reachability(&checker);

    let outcome = reconciler.run(operation).await;
    emit(&formatter.format_outcome(&outcome))?;

    Ok(if outcome.ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Lists containers.
async fn cmd_ps(dir: &Path, formatter: &OutputFormatter) -> Result<ExitCode> {
    let executor = ComposeExecutor::detect(process_runner(), ComposeLayout::new(dir)).await?;
    let services = executor.ps().await?;
    emit(&formatter.format_services(&services))?;
    Ok(ExitCode::SUCCESS)
}

/// Streams logs.
async fn cmd_logs(dir: &Path, service: Option<&str>, follow: bool, tail: Option<u32>) -> Result<ExitCode> {
    let executor = ComposeExecutor::detect(process_runner(), ComposeLayout::new(dir)).await?;
    executor.logs(service, follow, tail).await?;
    Ok(ExitCode::SUCCESS)
}

/// Runs a command in a service and passes its exit status through.
async fn cmd_exec(dir: &Path, service: &str, command: &[String]) -> Result<ExitCode> {
    let executor = ComposeExecutor::detect(process_runner(), ComposeLayout::new(dir)).await?;
    let output = executor.exec(service, command).await?;

    std::io::stdout().lock().write_all(output.stdout.as_bytes())?;
    std::io::stderr().lock().write_all(output.stderr.as_bytes())?;

    let code = output.status.unwrap_or(1);
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}

/// Removes the advisory lock.
async fn cmd_unlock(
    dir: &Path,
    lock_id: Option<&str>,
    force: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let store = EnvFileStore::with_base_dir(dir);

    let Some(current) = store.get_lock_info().await? else {
        emit(&formatter.success("No lock held"))?;
        return Ok(ExitCode::SUCCESS);
    };

    let target = match lock_id {
        Some(id) if id == current.lock_id => id.to_string(),
        Some(id) => {
            emit(&formatter.error(&format!(
                "Lock {id} is not held; current lock is {} ({})",
                current.lock_id, current.holder
            )))?;
            return Ok(ExitCode::FAILURE);
        }
        None if force || current.is_expired() => current.lock_id.clone(),
        None => {
            emit(&formatter.error(&format!(
                "Lock {} held by {} expires in {}s; pass --lock-id or --force",
                current.lock_id,
                current.holder,
                current.remaining_secs()
            )))?;
            return Ok(ExitCode::FAILURE);
        }
    };

    store.release_lock(&target).await?;
    emit(&formatter.success(&format!("Released lock {target}")))?;
    Ok(ExitCode::SUCCESS)
}

fn process_runner() -> Arc<dyn CommandRunner> {
    Arc::new(ProcessRunner::new())
}

/// Writes command output to stdout.
fn emit(text: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(text.as_bytes())?;
    if !text.ends_with('\n') {
        stdout.write_all(b"\n")?;
    }
    stdout.flush()?;
    Ok(())
}

/// Asks a question on stderr and reads one line from stdin.
fn ask(question: &str) -> Result<String> {
    eprint!("{question} ");
    std::io::stderr().flush()?;

    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(answer.trim().to_string())
}

fn confirm(question: &str) -> Result<bool> {
    let answer = ask(&format!("{question} [y/N]"))?;
    Ok(matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes"))
}

fn prompt_mode(current: DeploymentMode) -> Result<DeploymentMode> {
    eprintln!("Deployment modes:");
    for (i, mode) in DeploymentMode::ALL.iter().enumerate() {
        eprintln!("  {}) {mode}", i + 1);
    }

    let answer = ask(&format!("Mode [{current}]:"))?;
    if answer.is_empty() {
        return Ok(current);
    }

    let chosen = answer
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| DeploymentMode::ALL.get(i).copied())
        .or_else(|| answer.parse().ok());

    chosen.ok_or_else(|| ManagerError::internal(format!("Unknown mode: {answer}")))
}

fn prompt_port(current: u16) -> Result<u16> {
    let answer = ask(&format!("NetBox port [{current}]:"))?;
    if answer.is_empty() {
        return Ok(current);
    }

    answer
        .parse()
        .map_err(|_| ManagerError::internal(format!("Invalid port: {answer}")))
}
