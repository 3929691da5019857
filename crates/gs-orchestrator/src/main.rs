//! Game server manager controller
//!
//! Provisions LXC game servers on the hypervisor and drives them over SSH.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gs_core::config::{self, ControllerConfig};
use gs_core::traits::{ArtifactLookup, RemoteExecutor};
use gs_core::types::{Flavor, Resources, TerminalSize, WorkloadId};
use gs_orchestrator::artifacts::MojangManifest;
use gs_orchestrator::console::ConsoleEvent;
use gs_orchestrator::lifecycle::DEFAULT_FILES_ROOT;
use gs_orchestrator::output::{
    format_entries, format_nodes, format_versions, format_workload, format_workloads,
    print_error, print_success, print_warning,
};
use gs_orchestrator::remote::SshManager;
use gs_orchestrator::{ControllerState, CreateRequest, LifecycleOrchestrator};

#[derive(Parser)]
#[command(name = "gs-orchestrator")]
#[command(author, version, about = "LXC game server manager")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Hypervisor password (overrides config)
    #[arg(long, global = true, env = "PROXMOX_PASSWORD", hide_env_values = true)]
    proxmox_password: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Generate the controller key pair if missing and print the public key
    Keygen,

    /// List hypervisor nodes
    Nodes,

    /// List installable game versions
    Versions {
        /// Include snapshots
        #[arg(long)]
        snapshots: bool,
    },

    /// List workloads
    #[command(alias = "ls")]
    List,

    /// Create and provision a workload
    Create {
        /// Display name
        name: String,
        /// Server type (vanilla, paper, fabric, forge, bedrock)
        #[arg(short = 't', long = "type")]
        flavor: Option<Flavor>,
        /// Game version, `latest` by default
        #[arg(short = 'V', long = "game-version")]
        game_version: Option<String>,
        /// Hypervisor node
        #[arg(long)]
        node: Option<String>,
        /// Primary port
        #[arg(short, long)]
        port: Option<u16>,
        /// Extra routed ports
        #[arg(long = "extra-port")]
        extra_ports: Vec<u16>,
        #[arg(long)]
        cores: Option<u32>,
        /// Memory in MB
        #[arg(long)]
        memory: Option<u32>,
        /// Disk in GB
        #[arg(long)]
        disk: Option<u32>,
        /// Server setting, KEY=VALUE
        #[arg(short = 's', long = "set", value_parser = parse_setting)]
        settings: Vec<(String, String)>,
        /// Return once the container exists instead of waiting for provisioning
        #[arg(long)]
        no_wait: bool,
    },

    /// Resume provisioning of a workload still in `creating`
    Provision { workload: String },

    Start { workload: String },

    Stop { workload: String },

    Restart { workload: String },

    /// Show a workload and its live service state
    Status { workload: String },

    /// Send a console command
    Send {
        workload: String,
        #[arg(required = true, trailing_var_arg = true)]
        text: Vec<String>,
    },

    /// Change server settings
    Settings {
        workload: String,
        #[arg(required = true, value_parser = parse_setting)]
        settings: Vec<(String, String)>,
    },

    /// Delete a workload and its container
    #[command(alias = "rm")]
    Delete { workload: String },

    /// Attach to the live console
    Console { workload: String },

    /// Browse workload files
    #[command(subcommand)]
    Files(FilesCommand),
}

#[derive(Subcommand)]
enum FilesCommand {
    /// List a directory
    Ls {
        workload: String,
        #[arg(default_value = DEFAULT_FILES_ROOT)]
        path: String,
    },
    /// Print or download a file
    Get {
        workload: String,
        path: String,
        /// Write to a local file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Upload a local file
    Put {
        workload: String,
        local: PathBuf,
        path: String,
    },
    /// Remove a file
    Rm { workload: String, path: String },
}

fn parse_setting(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    Ok((key.trim().to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| cli.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Commands::Init { force } = &cli.command {
        return init_config(cli.config.as_ref(), *force);
    }

    let mut config = load_config(cli.config.as_ref())?;
    if let Some(password) = cli.proxmox_password {
        config.hypervisor.password = Some(password);
    }

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl+C, shutting down...");
            cancel_clone.cancel();
        }
    });

    match cli.command {
        Commands::Keygen => {
            let public_key = SshManager::new(config.ssh.clone()).ensure_key_pair().await?;
            println!("{}", public_key.trim());
        }
        Commands::Versions { snapshots } => {
            let manifest = MojangManifest::new(&config.artifacts)?;
            println!("{}", format_versions(&manifest.versions(snapshots).await?));
        }
        command => {
            let state = ControllerState::from_config(config)
                .await
                .context("Failed to initialize controller")?;
            run(&state, command, cancel).await?;
        }
    }

    Ok(())
}

fn init_config(path: Option<&PathBuf>, force: bool) -> Result<()> {
    let path = path.cloned().unwrap_or_else(config::default_config_path);
    if path.exists() && !force {
        print_error(&format!("Config file already exists: {:?}", path));
        print_warning("Use --force to overwrite");
        return Ok(());
    }

    config::save_config(&path, &ControllerConfig::default())
        .with_context(|| format!("Failed to write config to {:?}", path))?;
    print_success(&format!("Created configuration file: {:?}", path));
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<ControllerConfig> {
    if let Some(path) = path {
        return config::load_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path));
    }

    let default_path = config::default_config_path();
    if default_path.exists() {
        config::load_config(&default_path)
            .with_context(|| format!("Failed to load config from {:?}", default_path))
    } else {
        tracing::info!("Using default configuration");
        Ok(ControllerConfig::default())
    }
}

async fn run(state: &ControllerState, command: Commands, cancel: CancellationToken) -> Result<()> {
    let lifecycle = &state.lifecycle;

    match command {
        // Handled in main without the hypervisor connection
        Commands::Init { .. } | Commands::Keygen | Commands::Versions { .. } => {}

        Commands::Nodes => {
            println!("{}", format_nodes(&state.backends.hypervisor.nodes().await?));
        }

        Commands::List => {
            println!("{}", format_workloads(&lifecycle.list().await?));
        }

        Commands::Create {
            name,
            flavor,
            game_version,
            node,
            port,
            extra_ports,
            cores,
            memory,
            disk,
            settings,
            no_wait,
        } => {
            let defaults = &state.config.defaults;
            let resources = (cores.is_some() || memory.is_some() || disk.is_some()).then(|| Resources {
                disk_gb: disk.unwrap_or(defaults.disk_gb),
                cores: cores.unwrap_or(defaults.cores),
                memory_mb: memory.unwrap_or(defaults.memory_mb),
            });

            let workload = lifecycle
                .create(CreateRequest {
                    name,
                    flavor,
                    game_version,
                    node,
                    resources,
                    port,
                    extra_ports,
                    settings: settings.into_iter().collect(),
                })
                .await?;
            print_success(&format!(
                "Created {} ({}) as container {} at {}",
                workload.name, workload.id, workload.container_id, workload.address
            ));

            if no_wait {
                print_warning(&format!(
                    "Provisioning not started; run `provision {}` to finish",
                    workload.id
                ));
            } else {
                provision(lifecycle, workload.id, &cancel).await?;
            }
        }

        Commands::Provision { workload } => {
            let id = resolve(lifecycle, &workload).await?;
            provision(lifecycle, id, &cancel).await?;
        }

        Commands::Start { workload } => {
            let w = lifecycle.start(&resolve(lifecycle, &workload).await?).await?;
            print_success(&format!("{} is {}", w.name, w.status));
        }

        Commands::Stop { workload } => {
            let w = lifecycle.stop(&resolve(lifecycle, &workload).await?).await?;
            print_success(&format!("{} is {}", w.name, w.status));
        }

        Commands::Restart { workload } => {
            let w = lifecycle.restart(&resolve(lifecycle, &workload).await?).await?;
            print_success(&format!("{} is {}", w.name, w.status));
        }

        Commands::Status { workload } => {
            let id = resolve(lifecycle, &workload).await?;
            let w = lifecycle.workload(&id).await?;
            println!("{}", format_workload(&w));
            println!("Live:      {}", lifecycle.live_status(&id).await?);
        }

        Commands::Send { workload, text } => {
            let id = resolve(lifecycle, &workload).await?;
            lifecycle.send_command(&id, &text.join(" ")).await?;
            print_success("Command sent");
        }

        Commands::Settings { workload, settings } => {
            let id = resolve(lifecycle, &workload).await?;
            let changes: BTreeMap<String, String> = settings.into_iter().collect();
            lifecycle.update_settings(&id, changes).await?;
            print_success("Settings updated; restart the server to apply them");
        }

        Commands::Delete { workload } => {
            let w = lifecycle.delete(&resolve(lifecycle, &workload).await?).await?;
            print_success(&format!("Deleted {} (container {})", w.name, w.container_id));
        }

        Commands::Console { workload } => {
            let id = resolve(lifecycle, &workload).await?;
            console(state, id, &cancel).await?;
        }

        Commands::Files(files) => run_files(lifecycle, files).await?,
    }

    Ok(())
}

/// Accept a full id, an id prefix or an exact name
async fn resolve(lifecycle: &LifecycleOrchestrator, reference: &str) -> Result<WorkloadId> {
    if let Ok(id) = reference.parse::<WorkloadId>() {
        return Ok(id);
    }

    let matches: Vec<WorkloadId> = lifecycle
        .list()
        .await?
        .into_iter()
        .filter(|w| w.name == reference || w.id.to_string().starts_with(reference))
        .map(|w| w.id)
        .collect();

    match matches.as_slice() {
        [id] => Ok(*id),
        [] => bail!("No workload matches '{}'", reference),
        many => bail!("'{}' matches {} workloads, use the full id", reference, many.len()),
    }
}

async fn provision(
    lifecycle: &std::sync::Arc<LifecycleOrchestrator>,
    id: WorkloadId,
    cancel: &CancellationToken,
) -> Result<()> {
    let handle = lifecycle.spawn_provision(id);
    tokio::select! {
        result = handle => {
            result.context("Provisioning task panicked")??;
            let w = lifecycle.workload(&id).await?;
            print_success(&format!("{} provisioned, status {}", w.name, w.status));
        }
        _ = cancel.cancelled() => {
            print_warning(&format!(
                "Interrupted; {} is still creating, run `provision {}` to resume",
                id, id
            ));
        }
    }
    Ok(())
}

async fn console(state: &ControllerState, id: WorkloadId, cancel: &CancellationToken) -> Result<()> {
    let size = crossterm::terminal::size()
        .map(|(cols, rows)| TerminalSize::new(cols, rows))
        .ok();
    let mut viewer = state.console.attach(id, size).await?;
    print_success("Attached; type a line to send it, Ctrl+C to detach");

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = viewer.recv() => match event {
                Some(ConsoleEvent::Output(data)) => {
                    stdout.write_all(&data).await?;
                    stdout.flush().await?;
                }
                Some(ConsoleEvent::Notice(message)) => print_warning(&message),
                None => break,
            },
            line = lines.next_line() => match line? {
                Some(line) => {
                    if let Err(e) = state.console.input(&id, &line).await {
                        print_error(&e.to_string());
                    }
                }
                None => break,
            },
        }
    }

    state.console.detach(&id, viewer.id).await;
    Ok(())
}

async fn run_files(lifecycle: &LifecycleOrchestrator, command: FilesCommand) -> Result<()> {
    match command {
        FilesCommand::Ls { workload, path } => {
            let id = resolve(lifecycle, &workload).await?;
            println!("{}", format_entries(&lifecycle.list_files(&id, &path).await?));
        }
        FilesCommand::Get {
            workload,
            path,
            output,
        } => {
            let id = resolve(lifecycle, &workload).await?;
            let content = lifecycle.read_file(&id, &path).await?;
            match output {
                Some(local) => {
                    tokio::fs::write(&local, &content)
                        .await
                        .with_context(|| format!("Failed to write {:?}", local))?;
                    print_success(&format!("Saved {} bytes to {:?}", content.len(), local));
                }
                None => {
                    let mut stdout = tokio::io::stdout();
                    stdout.write_all(&content).await?;
                    stdout.flush().await?;
                }
            }
        }
        FilesCommand::Put {
            workload,
            local,
            path,
        } => {
            let id = resolve(lifecycle, &workload).await?;
            lifecycle.upload_file(&id, &local, &path).await?;
            print_success(&format!("Uploaded {:?} to {}", local, path));
        }
        FilesCommand::Rm { workload, path } => {
            let id = resolve(lifecycle, &workload).await?;
            lifecycle.remove_file(&id, &path).await?;
            print_success(&format!("Removed {}", path));
        }
    }
    Ok(())
}
