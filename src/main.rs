#![allow(clippy::uninlined_format_args)]

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use eureka_rs::registry::{InstanceEnvelope, Port};
use eureka_rs::{init_env, utils::logger, Client, ClientConfig, Instance, Status, EUREKA_ENDPOINTS};
use local_ip_address::local_ip;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

/// Command line client for a Eureka-style service registry
#[derive(Parser, Debug)]
#[command(name = "eureka")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Registry endpoint, e.g. http://127.0.0.1:8761/eureka (repeatable,
    /// defaults to EUREKA_ENDPOINTS)
    #[arg(short, long = "endpoint", global = true)]
    endpoints: Vec<String>,

    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct InstanceRef {
    /// Application name
    #[arg(short, long)]
    app: String,

    /// Instance id
    #[arg(short, long)]
    id: String,
}

impl InstanceRef {
    fn instance(&self) -> Instance {
        Instance::new(&self.app, &self.id)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register an instance
    Register {
        /// JSON file holding the instance definition
        #[arg(short = 'f', long, conflicts_with_all = ["app", "id"])]
        instance: Option<PathBuf>,

        /// Application name
        #[arg(short, long, required_unless_present = "instance")]
        app: Option<String>,

        /// Instance id (defaults to <host>:<uuid>)
        #[arg(short, long)]
        id: Option<String>,

        /// Host name (defaults to the local IP)
        #[arg(long)]
        host: Option<String>,

        /// IP address (defaults to the local IP)
        #[arg(long)]
        ip: Option<String>,

        #[arg(short, long, default_value_t = 8080)]
        port: u16,

        /// VIP address (defaults to the lower-cased application name)
        #[arg(long)]
        vip: Option<String>,
    },

    /// Deregister an instance
    Deregister(InstanceRef),

    /// Send a heartbeat for an instance
    Heartbeat {
        #[command(flatten)]
        target: InstanceRef,

        /// Keep sending heartbeats every N seconds until interrupted
        #[arg(long)]
        every: Option<u64>,
    },

    /// List registered instances
    Instances {
        /// Restrict to one application
        #[arg(short, long)]
        app: Option<String>,

        /// Restrict to one instance id
        #[arg(short, long)]
        id: Option<String>,
    },

    /// Override the status of an instance
    OverrideStatus {
        #[command(flatten)]
        target: InstanceRef,

        /// UP, DOWN, STARTING, OUT_OF_SERVICE or UNKNOWN
        status: Status,
    },

    /// Remove a status override
    RemoveOverride {
        #[command(flatten)]
        target: InstanceRef,

        /// Status to fall back to
        #[arg(default_value = "UNKNOWN")]
        fallback: Status,
    },

    /// Print registry changes as they are observed
    Watch {
        /// Poll interval in seconds
        #[arg(short, long, default_value_t = 30)]
        interval: u64,
    },

    /// Run an in-memory registry for local testing
    #[cfg(feature = "server")]
    Serve {
        #[arg(long, default_value = "127.0.0.1:8761")]
        addr: std::net::SocketAddr,

        #[arg(long, default_value = "./logs")]
        log_dir: String,
    },
}

impl Commands {
    fn is_serve(&self) -> bool {
        #[cfg(feature = "server")]
        if matches!(self, Commands::Serve { .. }) {
            return true;
        }
        false
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_env();
    let cli = Cli::parse();

    // `serve` logs to stdout and files instead
    if !cli.command.is_serve() {
        logger::init_stderr(cli.verbose)?;
    }

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        return Err(e);
    }
    Ok(())
}

fn client(endpoints: Vec<String>) -> Result<Client> {
    let endpoints = if endpoints.is_empty() {
        EUREKA_ENDPOINTS.clone()
    } else {
        endpoints
    };
    if endpoints.is_empty() {
        bail!("--endpoint or EUREKA_ENDPOINTS is required");
    }
    Ok(Client::new(endpoints, ClientConfig::from_env())?)
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Register {
            instance,
            app,
            id,
            host,
            ip,
            port,
            vip,
        } => {
            let instance = match instance {
                Some(path) => read_instance(&path)?,
                None => build_instance(app.unwrap_or_default(), id, host, ip, port, vip)?,
            };
            info!("Registering instance '{}' for application '{}'...", instance.instance_id, instance.app);
            client(cli.endpoints)?.register(&instance).await.context("Error registering instance")?;
            print_json(&InstanceEnvelope { instance })?;
        }
        Commands::Deregister(target) => {
            info!("Deregistering instance '{}' of application '{}'...", target.id, target.app);
            client(cli.endpoints)?
                .deregister(&target.instance())
                .await
                .context("Error deregistering instance")?;
        }
        Commands::Heartbeat { target, every } => {
            let client = client(cli.endpoints)?;
            let instance = target.instance();
            client.heartbeat(&instance).await.context("Error sending heartbeat")?;

            if let Some(secs) = every {
                let heartbeat = client.start_heartbeat(instance, Duration::from_secs(secs));
                tokio::signal::ctrl_c().await?;
                heartbeat.shutdown().await;
            }
        }
        Commands::Instances { app, id } => {
            let client = client(cli.endpoints)?;
            let instances = match (app, id) {
                (Some(app), Some(id)) => vec![client.app_instance(&app, &id).await?],
                (None, Some(id)) => vec![client.instance(&id).await?],
                (Some(app), None) => client.app(&app).await?.instances,
                (None, None) => client
                    .apps()
                    .await?
                    .into_iter()
                    .flat_map(|app| app.instances)
                    .collect(),
            };
            print_json(&instances)?;
        }
        Commands::OverrideStatus { target, status } => {
            info!("Overriding status of '{}' to {}...", target.id, status);
            client(cli.endpoints)?
                .status_override(&target.instance(), status)
                .await
                .context("Error overriding status")?;
        }
        Commands::RemoveOverride { target, fallback } => {
            client(cli.endpoints)?
                .remove_status_override(&target.instance(), fallback)
                .await
                .context("Error removing status override")?;
        }
        Commands::Watch { interval } => {
            let mut watcher = client(cli.endpoints)?.watch(Duration::from_secs(interval));
            info!("Watching registry every {}s, Ctrl-C to stop", interval);

            loop {
                tokio::select! {
                    event = watcher.next_event() => match event {
                        Some(event) => println!(
                            "{:?} {}/{} {}",
                            event.kind, event.instance.app, event.instance.instance_id, event.instance.status
                        ),
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            watcher.shutdown().await;
        }
        #[cfg(feature = "server")]
        Commands::Serve { addr, log_dir } => {
            let _guard = logger::init(log_dir)?;
            info!("Starting fake registry...");
            eureka_rs::web::start_server(eureka_rs::InMemoryRegistry::new(), addr).await?;
        }
    }

    Ok(())
}

fn read_instance(path: &Path) -> Result<Instance> {
    let data = std::fs::read(path)
        .with_context(|| format!("Error reading instance file {}", path.display()))?;

    // accept both the bare instance and the {"instance": ...} envelope
    if let Ok(envelope) = serde_json::from_slice::<InstanceEnvelope>(&data) {
        return Ok(envelope.instance);
    }
    serde_json::from_slice(&data).context("Error parsing instance file")
}

fn build_instance(
    app: String,
    id: Option<String>,
    host: Option<String>,
    ip: Option<String>,
    port: u16,
    vip: Option<String>,
) -> Result<Instance> {
    let local = local_ip()
        .map(|ip| ip.to_string())
        .unwrap_or_else(|_| "127.0.0.1".to_string());
    let host = host.unwrap_or_else(|| local.clone());
    let id = id.unwrap_or_else(|| format!("{}:{}", host, Uuid::new_v4()));

    let mut instance = Instance::new(app.to_uppercase(), id);
    instance.ip_addr = ip.unwrap_or(local);
    instance.vip_address = vip.unwrap_or_else(|| app.to_lowercase());
    instance.host_name = host;
    instance.port = Port(port);
    instance.home_page_url = format!("http://{}:{}/", instance.host_name, port);
    Ok(instance)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
