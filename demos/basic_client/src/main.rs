use std::sync::Arc;

use clap::Parser;
use futures_util::StreamExt;
use srpc::StreamHandle;
use srpc_grpc::proto::stream_rpc_client::StreamRpcClient;
use srpc_grpc::proto::CountRequest;
use srpc_grpc::GrpcTransport;
use tracing::{error, info};

/// Demo client invoking the `Count` endpoint.
#[derive(Parser)]
#[command(name = "srpc-demo-client", version, about = "Streaming RPC demo client.")]
struct Config {
    #[arg(long, env = "SRPC_DEMO_ENDPOINT", default_value = "http://127.0.0.1:50051")]
    endpoint: String,

    #[arg(long, env = "SRPC_DEMO_COUNT", default_value = "6")]
    n: u64,
}

#[tokio::main]
async fn main() {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut client = match StreamRpcClient::connect(config.endpoint.clone()).await {
        Ok(client) => client,
        Err(e) => {
            error!("failed to connect to {}: {e}", config.endpoint);
            std::process::exit(1);
        }
    };

    let sid = match client.count(CountRequest { n: config.n }).await {
        Ok(reply) => reply.into_inner().sid,
        Err(status) => {
            error!("count call failed: {status}");
            std::process::exit(1);
        }
    };

    let transport = Arc::new(GrpcTransport::new(client));
    let handle = StreamHandle::new(sid, transport);

    let Some(mut values) = handle.c() else {
        error!("c() unexpectedly returned None on its first call");
        std::process::exit(1);
    };
    while let Some(value) = values.next().await {
        info!(?value, "received value from remote");
    }

    if let Some(err) = handle.get_error().await {
        info!(%err, "remote returned error");
    }
}
