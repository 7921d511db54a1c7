//! gRPC transport binding for `srpc`: generated `srpc.v1` types, proto
//! conversions, the server-side `StreamRpc` impl, and a client-side
//! [`srpc::UnaryTransport`].

pub mod client;
pub mod convert;
pub mod service;

/// Generated protobuf types for the `srpc.v1` package.
pub mod proto {
    tonic::include_proto!("srpc.v1");
}

pub use client::GrpcTransport;
pub use service::StreamRpcService;
