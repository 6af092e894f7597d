//! dbaas
//!
//! Command line front end of the provisioner. Every cluster command builds
//! one operation, hands it to the reconciliation driver and renders what the
//! run reports until it reaches a terminal state.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dbaas_provisioner::broker::{BrokerRouter, BrokerServer};
use dbaas_provisioner::reconcile::{
    BackupSpec, CreateSpec, DeleteSpec, EditSpec, RestoreSpec, UpgradeSpec,
};
use dbaas_provisioner::{
    read_options_file, ControlPlaneClient, DiagnosticLevel, EngineRef, EngineRegistry,
    KubeControlPlane, Metrics, Operation, ProvisionerConfig, ReconciliationDriver,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Provision and manage Percona database clusters on Kubernetes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (YAML)
    #[arg(long, env = "DBAAS_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Namespace holding the clusters
    #[arg(long, short = 'n', env = "DBAAS_NAMESPACE", global = true)]
    namespace: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone)]
struct Target {
    /// Database engine (pxc, psmdb)
    engine: String,

    /// Cluster name
    name: String,

    /// Operator version of the engine, newest when omitted
    #[arg(long)]
    engine_version: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
struct Overrides {
    /// Overrides as `key=value,key=value`
    #[arg(long, short = 'o', default_value = "")]
    options: String,

    /// File with one `key=value` override per line
    #[arg(long)]
    options_file: Option<PathBuf>,
}

impl Overrides {
    /// File overrides first, so inline options win
    fn resolve(&self) -> anyhow::Result<String> {
        let mut layers = Vec::new();
        if let Some(path) = &self.options_file {
            layers.push(read_options_file(path)?);
        }
        layers.push(self.options.clone());
        Ok(layers
            .into_iter()
            .filter(|layer| !layer.trim().is_empty())
            .collect::<Vec<_>>()
            .join(","))
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a cluster
    Create {
        #[command(flatten)]
        target: Target,
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Change an existing cluster
    Edit {
        #[command(flatten)]
        target: Target,
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Move a cluster to another database version
    Upgrade {
        #[command(flatten)]
        target: Target,
        /// Database version to run
        #[arg(long)]
        version: String,
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Delete a cluster
    Delete {
        #[command(flatten)]
        target: Target,
    },
    /// Back up a cluster
    Backup {
        #[command(flatten)]
        target: Target,
        /// Name of the backup object
        backup_name: String,
        /// Storage declared in the cluster's backup section
        #[arg(long, default_value = "fs-pvc")]
        storage: String,
    },
    /// Restore a cluster from a backup
    Restore {
        #[command(flatten)]
        target: Target,
        /// Backup to restore from
        backup_name: String,
        /// Name of the restore object, `<backup>-restore` when omitted
        #[arg(long)]
        restore_name: Option<String>,
    },
    /// Show the current state of a cluster
    Describe {
        #[command(flatten)]
        target: Target,
    },
    /// List the option keys an engine accepts
    Options {
        /// Database engine (pxc, psmdb)
        engine: String,
        #[arg(long)]
        engine_version: Option<String>,
    },
    /// Run the HTTP service broker
    Broker {
        /// REST API bind address
        #[arg(long, env = "BROKER_ADDR")]
        addr: Option<String>,
    },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&cli);

    let mut config = ProvisionerConfig::load(cli.config.as_deref())?;
    if let Some(namespace) = &cli.namespace {
        config.control_plane.namespace = namespace.clone();
    }
    debug!("Provisioner {} {}", dbaas_provisioner::NAME, dbaas_provisioner::VERSION);

    let registry = EngineRegistry::with_defaults(
        config.pxc.clone(),
        config.psmdb.clone(),
        &config.control_plane.namespace,
    )?;

    match cli.command {
        Command::Options {
            engine,
            engine_version,
        } => list_options(&registry.get(&engine, engine_version.as_deref())?),
        Command::Broker { addr } => {
            let mut broker = config.broker.clone();
            if let Some(addr) = addr {
                broker.bind_addr = addr
                    .parse()
                    .with_context(|| format!("invalid broker address {}", addr))?;
            }
            let metrics = Arc::new(Metrics::new()?);
            let client = KubeControlPlane::connect(config.control_plane.clone()).await?;
            let driver = ReconciliationDriver::new(Arc::new(client)).with_metrics(metrics.clone());

            info!("Starting DBaaS broker");
            info!("  Version: {}", dbaas_provisioner::VERSION);
            info!("  Namespace: {}", config.control_plane.namespace);
            for (name, version) in registry.list() {
                info!("  Engine: {} {}", name, version);
            }

            let router = BrokerRouter::new(Arc::new(registry), driver, metrics)
                .with_operation_retention(Duration::from_secs(broker.operation_retention_secs));
            BrokerServer::new(broker, router).run().await?;
            Ok(())
        }
        Command::Describe { target } => {
            let engine = registry.get(&target.engine, target.engine_version.as_deref())?;
            let client = KubeControlPlane::connect(config.control_plane.clone()).await?;
            describe(&client, &engine, &target.name).await
        }
        command => {
            let (target, operation) = build_operation(command)?;
            let engine = registry.get(&target.engine, target.engine_version.as_deref())?;
            let client = KubeControlPlane::connect(config.control_plane.clone()).await?;
            let driver = ReconciliationDriver::new(Arc::new(client));
            run_operation(&driver, engine, operation).await
        }
    }
}

fn build_operation(command: Command) -> anyhow::Result<(Target, Operation)> {
    let built = match command {
        Command::Create { target, overrides } => {
            let options = overrides.resolve()?;
            let name = target.name.clone();
            (target, Operation::Create(CreateSpec { name, options }))
        }
        Command::Edit { target, overrides } => {
            let options = overrides.resolve()?;
            let name = target.name.clone();
            (target, Operation::Edit(EditSpec { name, options }))
        }
        Command::Upgrade {
            target,
            version,
            overrides,
        } => {
            let options = overrides.resolve()?;
            let name = target.name.clone();
            (
                target,
                Operation::Upgrade(UpgradeSpec {
                    name,
                    version,
                    options,
                }),
            )
        }
        Command::Delete { target } => {
            let name = target.name.clone();
            (target, Operation::Delete(DeleteSpec { name }))
        }
        Command::Backup {
            target,
            backup_name,
            storage,
        } => {
            let cluster = target.name.clone();
            (
                target,
                Operation::Backup(BackupSpec {
                    cluster,
                    backup_name,
                    storage,
                }),
            )
        }
        Command::Restore {
            target,
            backup_name,
            restore_name,
        } => {
            let cluster = target.name.clone();
            let restore_name = restore_name.unwrap_or_else(|| format!("{}-restore", backup_name));
            (
                target,
                Operation::Restore(RestoreSpec {
                    cluster,
                    restore_name,
                    backup_name,
                }),
            )
        }
        other => anyhow::bail!("{:?} is not a reconciliation command", other),
    };
    Ok(built)
}

// =============================================================================
// Commands
// =============================================================================

/// Follow a run to its end, printing a dot per second while it polls
async fn run_operation(
    driver: &ReconciliationDriver,
    engine: EngineRef,
    operation: Operation,
) -> anyhow::Result<()> {
    let verb = operation.verb();
    let target = operation.target().to_string();
    let engine_name = engine.name().to_string();
    eprint!("{} {} ", verb, target);

    let mut handle = driver.spawn(engine, operation);
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            diagnostic = handle.next_diagnostic() => match diagnostic {
                Some(d) if d.level == DiagnosticLevel::Debug => debug!("{}", d.text),
                Some(d) => eprint!("\n  {} ", d.text),
                None => break,
            },
            _ = ticker.tick() => {
                eprint!(".");
                let _ = std::io::stderr().flush();
            }
        }
    }
    eprintln!();

    match handle.wait(|_| {}).await {
        Ok(report) => {
            println!("{} {} is ready", report.kind, report.name);
            for message in report.messages {
                println!("  {}", message);
            }
            Ok(())
        }
        Err(e) => {
            if let Some(hint) = failure_hint(&e, &engine_name) {
                eprintln!("hint: {}", hint);
            }
            Err(e.into())
        }
    }
}

/// One recovery suggestion for a failed run, naming the engine for option errors
fn failure_hint(e: &dbaas_provisioner::Error, engine: &str) -> Option<String> {
    if e.is_option_error() {
        return Some(format!("run `dbaas options {}` to list the accepted keys", engine));
    }
    e.hint()
}

fn list_options(engine: &EngineRef) -> anyhow::Result<()> {
    println!("Options for {} {}:", engine.name(), engine.version());
    for (key, entry) in engine.options().iter() {
        let marker = if entry.optional { " (optional section)" } else { "" };
        println!("  {:<60} {}{}", key, entry.kind, marker);
    }
    Ok(())
}

async fn describe(client: &KubeControlPlane, engine: &EngineRef, name: &str) -> anyhow::Result<()> {
    let kind = engine.cluster_kind();
    let bytes = client
        .get(kind, name)
        .await?
        .ok_or_else(|| dbaas_provisioner::Error::NotFound {
            kind: kind.kind.clone(),
            name: name.to_string(),
        })?;

    let classification = engine.cluster_classifier().classify(&bytes)?;
    println!("{} {} in namespace {}: {}", kind, name, client.namespace(), classification.state);
    for message in &classification.messages {
        println!("  {}", message);
    }

    let object: serde_json::Value = serde_json::from_slice(&bytes)?;
    if let Some(spec) = object.get("spec") {
        println!("---\n{}", serde_yaml::to_string(spec)?);
    }
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(cli: &Cli) {
    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "kube=info", "tower=warn", "axum=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if cli.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
