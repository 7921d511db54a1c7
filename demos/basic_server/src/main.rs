use clap::Parser;
use srpc::StreamManager;
use srpc_grpc::StreamRpcService;
use tracing::{error, info};

/// Demo server exposing the `Count` endpoint over gRPC.
#[derive(Parser)]
#[command(name = "srpc-demo-server", version, about = "Streaming RPC demo server.")]
struct Config {
    #[arg(long, env = "SRPC_DEMO_HOST", default_value = "127.0.0.1")]
    host: String,

    #[arg(long, env = "SRPC_DEMO_PORT", default_value = "50051")]
    port: u16,

    #[arg(long, env = "SRPC_DEMO_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .init();

    let addr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("invalid listen address: {e}");
            std::process::exit(1);
        }
    };

    let manager = StreamManager::new();
    let service = StreamRpcService::new(manager).into_server();

    info!(%addr, "srpc demo server listening");
    if let Err(e) = tonic::transport::Server::builder().add_service(service).serve(addr).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
