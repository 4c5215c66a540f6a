use clap::Parser;
use log::info;
use snake_client::network::{Client, ClientSettings};
use snake_client::predictor::PredictorConfig;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Local tick rate; should match the server
    #[arg(short = 't', long, default_value = "8")]
    tick_rate: u32,

    /// Tick gap tolerated before server state overrides prediction
    #[arg(long, default_value = "2")]
    leniency: u32,

    /// Milliseconds between bot decisions
    #[arg(short = 'b', long, default_value = "200")]
    bot_interval: u64,

    /// Chance that the bot turns at each decision
    #[arg(long, default_value = "0.3")]
    turn_chance: f64,

    /// Simulate network latency in milliseconds
    #[arg(short = 'l', long, default_value = "0")]
    fake_ping: u64,

    /// Request a new snake after dying
    #[arg(short = 'r', long)]
    respawn: bool,

    /// Leave after this many seconds
    #[arg(short = 'd', long)]
    duration: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting bot client...");
    info!("Connecting to: {}", args.server);
    if args.fake_ping > 0 {
        info!("Simulating {}ms latency", args.fake_ping);
    }

    let settings = ClientSettings {
        predictor: PredictorConfig {
            leniency: args.leniency,
            ..PredictorConfig::default()
        },
        tick_rate: args.tick_rate,
        bot_interval: Duration::from_millis(args.bot_interval.max(1)),
        turn_chance: args.turn_chance,
        fake_ping_ms: args.fake_ping,
        respawn: args.respawn,
    };

    let mut client = Client::new(&args.server, settings).await?;
    client.run(args.duration.map(Duration::from_secs)).await?;

    if let Some(score) = client.predictor().final_score() {
        info!("Final score: {}", score);
    }

    Ok(())
}
