//! [`srpc::UnaryTransport`] backed by a `tonic` channel to a `StreamRpc`
//! server.

use srpc::{Event, TransportError, UnaryTransport};
use tonic::transport::Channel;
use tonic::Status;

use crate::convert::event_from_proto;
use crate::proto;

fn transport_error(status: Status) -> TransportError {
    TransportError(status.to_string())
}

/// Thin wrapper around the generated `StreamRpc` client.
pub struct GrpcTransport {
    client: proto::stream_rpc_client::StreamRpcClient<Channel>,
}

impl GrpcTransport {
    pub async fn connect(endpoint: impl Into<String>) -> Result<Self, tonic::transport::Error> {
        let client = proto::stream_rpc_client::StreamRpcClient::connect(endpoint.into()).await?;
        Ok(Self { client })
    }

    pub fn new(client: proto::stream_rpc_client::StreamRpcClient<Channel>) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl UnaryTransport for GrpcTransport {
    async fn poll(&self, sid: u64) -> Result<Option<Vec<Event>>, TransportError> {
        let mut client = self.client.clone();
        let result = client.poll(proto::PollRequest { sid }).await;
        match result {
            Ok(reply) => {
                let events = reply
                    .into_inner()
                    .events
                    .into_iter()
                    .map(|e| {
                        event_from_proto(e)
                            .ok_or_else(|| TransportError("malformed event".to_owned()))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Some(events))
            }
            Err(status) if status.code() == tonic::Code::NotFound => Ok(None),
            Err(status) => Err(transport_error(status)),
        }
    }

    async fn cancel(&self, sid: u64) -> Result<bool, TransportError> {
        let mut client = self.client.clone();
        let reply = client.cancel(proto::CancelRequest { sid }).await.map_err(transport_error)?;
        Ok(reply.into_inner().found)
    }

    async fn soft_cancel(&self, sid: u64) -> Result<bool, TransportError> {
        let mut client = self.client.clone();
        let reply =
            client.soft_cancel(proto::CancelRequest { sid }).await.map_err(transport_error)?;
        Ok(reply.into_inner().found)
    }
}
