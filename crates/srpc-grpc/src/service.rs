//! `StreamRpc` trait implementation — the gRPC transport binding for
//! [`srpc::StreamManager`].

use std::sync::Arc;

use srpc::{ErrorCode, StreamManager};
use tonic::{Request, Response, Status};

use crate::convert::event_to_proto;
use crate::proto;

/// gRPC implementation of the `srpc.v1.StreamRpc` service.
pub struct StreamRpcService {
    manager: Arc<StreamManager>,
}

impl StreamRpcService {
    pub fn new(manager: Arc<StreamManager>) -> Self {
        Self { manager }
    }

    pub fn into_server(self) -> proto::stream_rpc_server::StreamRpcServer<Self> {
        proto::stream_rpc_server::StreamRpcServer::new(self)
    }
}

#[tonic::async_trait]
impl proto::stream_rpc_server::StreamRpc for StreamRpcService {
    async fn poll(
        &self,
        request: Request<proto::PollRequest>,
    ) -> Result<Response<proto::PollReply>, Status> {
        let sid = request.into_inner().sid;
        let batch = self
            .manager
            .poll(sid)
            .await
            .ok_or_else(|| ErrorCode::NoSuchSession.to_grpc_status(format!("no session {sid}")))?;
        let events = batch.iter().map(event_to_proto).collect();
        Ok(Response::new(proto::PollReply { events }))
    }

    async fn cancel(
        &self,
        request: Request<proto::CancelRequest>,
    ) -> Result<Response<proto::CancelReply>, Status> {
        let sid = request.into_inner().sid;
        let found = self.manager.cancel(sid).await;
        Ok(Response::new(proto::CancelReply { found }))
    }

    async fn soft_cancel(
        &self,
        request: Request<proto::CancelRequest>,
    ) -> Result<Response<proto::CancelReply>, Status> {
        let sid = request.into_inner().sid;
        let found = self.manager.soft_cancel(sid).await;
        Ok(Response::new(proto::CancelReply { found }))
    }

    async fn count(
        &self,
        request: Request<proto::CountRequest>,
    ) -> Result<Response<proto::SessionReply>, Status> {
        let n = request.into_inner().n;
        let sid = self
            .manager
            .invoke(
                Box::new(move |session| {
                    Box::pin(async move {
                        for i in 0..n {
                            session
                                .push_value(bytes::Bytes::from(i.to_string()))
                                .await
                                .map_err(|cause| -> srpc::manager::HandlerError {
                                    Box::new(cause)
                                })?;
                        }
                        Ok(())
                    })
                }),
                None,
            )
            .await;
        Ok(Response::new(proto::SessionReply { sid }))
    }
}
