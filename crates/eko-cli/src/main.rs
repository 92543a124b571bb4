use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use eko_api::ApiContext;
use eko_core::Config;
use eko_docker::DockerSource;
use eko_processor::{Processor, ProcessorConfig};
use eko_storage::{SUPPORTED_STORAGES, StorageBackend, StorageOptions};
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(name = "eko")]
#[command(author, version, about = "Ship container logs into durable storage")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Work with container logs
    #[command(subcommand)]
    Log(LogCommands),
    /// List supported storages
    Storages,
    /// Run the HTTP API
    Serve {
        /// Storage definition, e.g. fs::./logs
        #[arg(short, long)]
        storage: Option<String>,
        /// Address to listen on
        #[arg(short, long)]
        listen: Option<String>,
        /// Bearer token required by the API
        #[arg(short, long)]
        token: Option<String>,
    },
}

#[derive(clap::Subcommand, Debug)]
enum LogCommands {
    /// Save logs of containers matching a filter until interrupted
    Arrange {
        /// Container filter, e.g. label=env=prod
        filter: String,
        /// Storage definition, e.g. fs::./logs
        #[arg(short, long)]
        storage: Option<String>,
        /// Docker connection, e.g. local::/var/run/docker.sock
        #[arg(short, long)]
        docker: Option<String>,
    },
    /// List containers with stored logs
    List {
        /// Storage definition, e.g. fs::./logs
        #[arg(short, long)]
        storage: Option<String>,
    },
    /// Print stored logs of a container
    Show {
        /// Container id
        container_id: String,
        /// Storage definition, e.g. fs::./logs
        #[arg(short, long)]
        storage: Option<String>,
    },
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();
}

/// Connect the storage named by `definition` or the configured default.
async fn open_storage(definition: Option<String>, config: &Config) -> Result<Arc<dyn StorageBackend>> {
    let Some(definition) = definition.or_else(|| config.storage.clone()) else {
        bail!("no storage definition given; pass --storage or set {}", eko_core::STORAGE_ENV);
    };

    let options = StorageOptions {
        tail_poll_interval: config.tail_poll_interval(),
    };
    let storage = eko_storage::connect(&definition, options)
        .await
        .with_context(|| format!("failed to open storage {definition}"))?;

    if !storage.is_healthy().await {
        bail!("The storage {} is unhealthy.", storage.metadata());
    }
    Ok(storage)
}

async fn arrange(
    filter: String,
    storage: Option<String>,
    docker: Option<String>,
    config: &Config,
) -> Result<()> {
    let storage = open_storage(storage, config).await?;
    let Some(docker) = docker.or_else(|| config.docker.clone()) else {
        bail!("no docker connection given; pass --docker or set {}", eko_core::DOCKER_ENV);
    };

    let processor = Processor::start(
        Arc::clone(&storage),
        DockerSource::factory(),
        ProcessorConfig::from(config),
    );
    processor.subscribe(&docker, &filter).await?;
    tracing::info!(filter = %filter, docker = %docker, "arranging container logs");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down, closing log streams");
    processor.destroy().await?;
    storage.destroy().await;
    Ok(())
}

async fn list(storage: Option<String>, config: &Config) -> Result<()> {
    let storage = open_storage(storage, config).await?;
    let containers = storage.logged_containers().await?;

    if containers.is_empty() {
        println!("No containers with stored logs.");
    }
    for id in containers {
        println!("{id}");
    }

    storage.destroy().await;
    Ok(())
}

async fn show(container_id: String, storage: Option<String>, config: &Config) -> Result<()> {
    let storage = open_storage(storage, config).await?;
    let Some(mut logs) = storage.read_logs(&container_id).await? else {
        println!("Found no logs for container {container_id}.");
        storage.destroy().await;
        return Ok(());
    };

    let mut stdout = tokio::io::stdout();
    let copy = async {
        while let Some(chunk) = logs.next().await {
            stdout.write_all(&chunk?).await?;
            stdout.flush().await?;
        }
        Ok::<_, anyhow::Error>(())
    };

    tokio::select! {
        result = copy => result?,
        _ = tokio::signal::ctrl_c() => {}
    }

    storage.destroy().await;
    Ok(())
}

async fn serve(
    storage: Option<String>,
    listen: Option<String>,
    token: Option<String>,
    config: &Config,
) -> Result<()> {
    let storage = open_storage(storage, config).await?;
    let processor = Processor::start(
        Arc::clone(&storage),
        DockerSource::factory(),
        ProcessorConfig::from(config),
    );

    let state = Arc::new(ApiContext {
        processor: processor.clone(),
        token: token.unwrap_or_else(|| config.api_token.clone()),
    });
    let addr = listen.unwrap_or_else(|| config.listen_addr.clone());

    eko_api::serve(&addr, state, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;

    tracing::info!("shutting down, closing log streams");
    processor.destroy().await?;
    storage.destroy().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = Config::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        Config::default().with_env_overrides(|key| std::env::var(key).ok())
    });

    match cli.command {
        Commands::Log(LogCommands::Arrange {
            filter,
            storage,
            docker,
        }) => arrange(filter, storage, docker, &config).await?,
        Commands::Log(LogCommands::List { storage }) => list(storage, &config).await?,
        Commands::Log(LogCommands::Show {
            container_id,
            storage,
        }) => show(container_id, storage, &config).await?,
        Commands::Storages => {
            for storage in SUPPORTED_STORAGES {
                println!(
                    "{:<8} {:<12} {:<45} e.g. {}",
                    storage.name, storage.description, storage.connection_string, storage.example
                );
            }
        }
        Commands::Serve {
            storage,
            listen,
            token,
        } => serve(storage, listen, token, &config).await?,
    }

    Ok(())
}
