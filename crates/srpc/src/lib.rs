// SPDX-License-Identifier: BUSL-1.1
// Copyright 2025 Alfred Jean LLC

//! Streaming RPC over a unary transport: a server-side session hands a
//! client a long-lived handle, then the two sides drain it with ordinary
//! request/response calls (`Poll`, `Cancel`, `SoftCancel`) instead of a
//! bidirectional stream.

pub mod config;
pub mod end_cause;
pub mod error;
pub mod event;
pub mod handle;
pub mod idle_detector;
pub mod manager;
pub mod session;
pub mod transport;

pub use config::{
    default_session_config, merge_config, set_default_session_config, PartialSessionConfig,
    SessionConfig,
};
pub use end_cause::EndCause;
pub use error::{ErrorCode, SrpcError};
pub use event::{ErrorEnvelope, Event, PanicInfo};
pub use handle::StreamHandle;
pub use manager::{Handler, HandlerError, HandlerFuture, StreamManager};
pub use session::Session;
pub use transport::{TransportError, UnaryTransport};
