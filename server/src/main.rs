use clap::Parser;
use log::{error, info};
use snake_server::connection::ShardEvent;
use snake_server::network::Server;
use snake_server::observer::LogObserver;
use snake_server::shard::Shard;
use snake_shared::ShardConfig;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,
    /// Grid width in cells, including the walls
    #[arg(long, default_value = "64")]
    width: usize,
    /// Grid height in cells, including the walls
    #[arg(long, default_value = "48")]
    height: usize,
    /// Width of each player's view window
    #[arg(long, default_value = "32")]
    screen_width: usize,
    /// Height of each player's view window
    #[arg(long, default_value = "24")]
    screen_height: usize,
    /// Extra cells around the view window
    #[arg(long, default_value = "2")]
    screen_buffer: usize,
    /// Food kept on the grid
    #[arg(short, long, default_value = "16")]
    food: usize,
    /// Tick rate (updates per second)
    #[arg(short, long, default_value = "8")]
    tick_rate: u32,
    /// Tolerance for client claims, in ticks and cells
    #[arg(short, long, default_value = "2")]
    leniency: u32,
    /// Rejected moves tolerated before a snake dies
    #[arg(short, long, default_value = "1")]
    grace: u32,
    /// Maximum number of concurrent clients
    #[arg(short, long, default_value = "32")]
    max_clients: usize,
    /// Seconds of silence before a client is dropped
    #[arg(long, default_value = "5")]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();

    let config = ShardConfig {
        width: args.width,
        height: args.height,
        screen_width: args.screen_width,
        screen_height: args.screen_height,
        screen_buffer: args.screen_buffer,
        food_limit: args.food,
        tick_rate: args.tick_rate,
        leniency: args.leniency,
        grace: args.grace,
    };
    config.validate()?;

    info!(
        "Starting shard: {}x{} grid, {}Hz tick rate, leniency {}, grace {}",
        config.width, config.height, config.tick_rate, config.leniency, config.grace
    );

    let mut shard = Shard::new(config).with_observer(Box::new(LogObserver::new(60)));
    shard.setup()?;

    let address = format!("{}:{}", args.host, args.port);
    let mut server = Server::new(
        &address,
        shard,
        args.max_clients,
        Duration::from_secs(args.timeout),
    )
    .await?;

    let events = server.events();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
        let _ = events.send(ShardEvent::Shutdown);
    });

    let shard = server.run().await?;
    info!(
        "Shard stopped after {} ticks with {} players",
        shard.tick_count(),
        shard.player_count()
    );

    Ok(())
}
