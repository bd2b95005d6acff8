use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use kinesis_relay::{KinesisSource, ServerConfig, StreamServer};

#[derive(Parser, Debug)]
#[command(author, version, about = "Relay live Kinesis records to WebSocket clients", long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 8000)]
    port: u16,

    /// Region used when a client names none
    #[arg(long, env = "AWS_REGION", default_value = "us-west-2")]
    aws_region: String,

    /// Additional region to serve (repeatable)
    #[arg(long = "extra-region", env = "EXTRA_REGIONS", value_delimiter = ',')]
    extra_regions: Vec<String>,

    /// Maximum concurrent connections (0 = unlimited)
    #[arg(long, env = "MAX_CONNECTIONS", default_value_t = 0)]
    max_connections: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("kinesis_relay=info".parse()?),
        )
        .init();

    let mut config = ServerConfig::default()
        .bind(SocketAddr::from(([0, 0, 0, 0], args.port)))
        .default_region(args.aws_region)
        .max_connections(args.max_connections);
    for region in args.extra_regions {
        config = config.extra_region(region);
    }

    let source = Arc::new(KinesisSource::new(config.regions()).await);
    let server = StreamServer::new(config, source);

    if let Err(e) = server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
    {
        tracing::error!(error = %e, "Server error");
        return Err(e.into());
    }

    tracing::info!("Server stopped");
    Ok(())
}
