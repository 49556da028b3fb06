use clap::Parser;
use log::info;
use server::config::{Rules, ValidatorOptions, WorldSeed};
use server::error::{ConfigError, ServerError};
use server::game::GameState;
use server::network::Server;
use std::path::PathBuf;
use std::time::Duration;

/// Authoritative construction and movement server
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,
    /// Tick rate (updates per second)
    #[clap(short, long, default_value = "30")]
    tick_rate: u32,
    /// Maximum number of connected clients
    #[clap(short, long, default_value = "64")]
    max_clients: usize,
    /// JSON world seed with terrain and static structures
    #[clap(short, long)]
    seed: Option<PathBuf>,
    /// Cost of every placement
    #[clap(long)]
    build_cost: Option<i64>,
    /// Cash each faction starts with
    #[clap(long)]
    starting_cash: Option<i64>,
    /// Research duration in milliseconds
    #[clap(long)]
    research_ms: Option<u64>,
}

impl Args {
    fn rules(&self) -> Result<Rules, ConfigError> {
        let defaults = Rules::default();
        let rules = Rules {
            build_cost: self.build_cost.unwrap_or(defaults.build_cost),
            starting_cash: self.starting_cash.unwrap_or(defaults.starting_cash),
            research_duration_ms: self.research_ms.unwrap_or(defaults.research_duration_ms),
            ..defaults
        };
        rules.validate()?;
        Ok(rules)
    }

    fn tick_duration(&self) -> Result<Duration, ConfigError> {
        if self.tick_rate == 0 {
            return Err(ConfigError::Invalid("tick rate must be positive".into()));
        }
        Ok(Duration::from_secs_f64(1.0 / self.tick_rate as f64))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let rules = args.rules().map_err(ServerError::from)?;
    let tick_duration = args.tick_duration().map_err(ServerError::from)?;

    let seed = match &args.seed {
        Some(path) => WorldSeed::load(path).map_err(ServerError::from)?,
        None => WorldSeed::default(),
    };
    let world = GameState::from_seed(rules, ValidatorOptions::default(), &seed);

    let address = format!("{}:{}", args.host, args.port);
    info!(
        "Starting server on {} at {} Hz for up to {} clients",
        address, args.tick_rate, args.max_clients
    );

    let mut server = Server::new(&address, tick_duration, args.max_clients, world).await?;
    server.run().await?;

    Ok(())
}
