use clap::{Parser, Subcommand};
use leafspy_relay::config::DEFAULT_CONFIG_FILE;
use leafspy_relay::{logging, serve, AppState, Config, Relay, TelemetryStore, TripOrder};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "leafspy-relay")]
#[command(author, version, about = "LeafSpy telemetry server: store updates, relay to leaf-status.com, show trips")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Database file (overrides config)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the ingestion and status web server (default)
    Serve {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind (overrides config)
        #[arg(long)]
        bind: Option<String>,
    },
    /// Print the most recent sample as JSON
    Latest,
    /// Print the trip index as JSON
    Trips {
        /// asc for oldest first; anything else lists newest first
        #[arg(short, long, default_value = "desc")]
        order: String,
    },
    /// Print every sample of one trip as JSON
    Trip {
        /// Trip id as sent by LeafSpy
        id: i32,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let mut config = Config::load(&args.config)?;
    if let Some(db) = args.db {
        config.database.path = db;
    }

    let _log_guard = logging::init(&config.log);
    let store = TelemetryStore::open_with_pool_size(&config.database.path, config.database.pool_size)?;

    match args.command.unwrap_or(Command::Serve { port: None, bind: None }) {
        Command::Serve { port, bind } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(bind) = bind {
                config.server.bind = bind;
            }

            let relay = Relay::from_config(&config.relay)?;
            match &relay {
                Some(relay) => info!(upstream = relay.base_url(), "relay enabled"),
                None => warn!("relay disabled: LEAFSTATUS_USER / LEAFSTATUS_PASS not configured"),
            }

            let state = AppState::new(store, relay, &config);
            serve::start_server(&config, state)?;
        }
        Command::Latest => print_json(&store.latest_sample()?)?,
        Command::Trips { order } => print_json(&store.list_trips(TripOrder::from_param(Some(order.as_str())))?)?,
        Command::Trip { id } => print_json(&store.samples_by_trip(id)?)?,
    }
    Ok(())
}

fn main() {
    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
