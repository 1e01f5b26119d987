//! LWM2M client IPC server CLI
//!
//! Usage:
//!   cargo run --example ipc_server -- [--config client.json] [--address 127.0.0.1:12345]
//!       [--definitions objects.json] [--verbose]
//!

use clap::{Parser, Subcommand};
use rust_lwm2m::loader::load_descriptions;
use rust_lwm2m::{ClientConfig, IpcServer, Result, Store};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use tracing::{Level, info};

#[derive(Parser, Debug)]
#[command(name = "lwm2m-ipc-server")]
#[command(about = "LWM2M client IPC server - Serve the object model to local applications")]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to a JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind, overriding the configuration
    #[arg(short, long)]
    address: Option<SocketAddr>,

    /// JSON file of object definitions, overriding the configuration
    #[arg(short, long, global = true)]
    definitions: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the objects and resources in a definitions file
    List,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    match args.command {
        Some(Commands::List) => match &args.definitions {
            Some(path) => list_definitions(path),
            None => {
                eprintln!("--definitions is required");
                Ok(())
            }
        },
        None => run_server(&args),
    }
}

fn list_definitions(path: &Path) -> Result<()> {
    for object in load_descriptions(path)? {
        println!(
            "{:>6}  {:<32} max {}",
            object.object_id, object.serialisation_name, object.maximum_instances
        );
        for property in &object.properties {
            println!(
                "  {:>6}  {:<30} {:<10} {}",
                property.property_id,
                property.serialisation_name,
                property.data_type,
                property.access
            );
        }
    }
    Ok(())
}

fn run_server(args: &Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => ClientConfig::from_file(path)?,
        None => ClientConfig::default(),
    };
    if let Some(address) = args.address {
        config.ipc_address = address;
    }
    if let Some(definitions) = &args.definitions {
        config.definitions = Some(definitions.clone());
    }

    let mut server = IpcServer::bind(&config)?;

    let running = server.running();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("received Ctrl+C, shutting down");
        running.store(false, Ordering::SeqCst);
    }) {
        eprintln!("Error setting Ctrl+C handler: {}", e);
    }

    server.run()?;

    let handler = server.handler();
    info!(
        objects = handler.store().definitions().len(),
        execute_subscriptions = handler.execute_subscriptions().len(),
        "final state"
    );
    Ok(())
}
