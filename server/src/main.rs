use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info};

use realm_server::maps::MapRepository;
use realm_server::network::{Server, ServerConfig};
use realm_shared::{DEFAULT_PORT, MAX_PEERS, TICK_HZ};

/// Authoritative world server for the realm.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// UDP port to listen on
    #[clap(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Tick rate (simulation updates per second)
    #[clap(short, long, default_value_t = TICK_HZ)]
    tick_rate: u32,

    /// Directory holding map_global_data.json and navmaps/
    #[clap(short, long, default_value = "assets")]
    assets: PathBuf,

    /// Maximum number of concurrent peers
    #[clap(long, default_value_t = MAX_PEERS)]
    max_peers: usize,

    /// Number of background pathfinding workers
    #[clap(long, default_value_t = 2)]
    path_workers: usize,

    /// Creatures seeded onto each map at boot
    #[clap(long, default_value_t = 4)]
    creatures_per_map: usize,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Warning: RUST_LOG environment variable not set. Set it to display logs!");
        eprintln!("Recommended: RUST_LOG=info cargo run");
    }

    let args = Args::parse();

    if !args.assets.is_dir() {
        error!(
            "assets directory {} does not exist or is not a directory",
            args.assets.display()
        );
        return ExitCode::FAILURE;
    }

    let maps = match MapRepository::load(&args.assets) {
        Ok(maps) => maps,
        Err(e) => {
            error!("failed to load map assets: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let config = ServerConfig {
        bind_addr: format!("{}:{}", args.host, args.port),
        tick_hz: args.tick_rate,
        max_peers: args.max_peers,
        path_workers: args.path_workers,
        creatures_per_map: args.creatures_per_map,
    };

    info!(
        "starting realm server on {} at {} Hz",
        config.bind_addr, config.tick_hz
    );

    let mut server = match Server::new(config, maps).await {
        Ok(server) => server,
        Err(e) => {
            error!("failed to initialize server: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.run().await {
        error!("server terminated with error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
