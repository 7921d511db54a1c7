//! The unary RPC transport contract consumed by the client-side stream
//! handle. Async is the default call shape here rather than a distinct
//! opt-in variant.

use std::fmt;

use crate::event::Event;

/// A transport-level failure (e.g. the underlying gRPC call itself failed).
/// Distinct from a well-formed `Poll` reply that happens to carry an
/// `Event::Error` — this is the RPC failing, not the stream ending.
#[derive(Debug, Clone)]
pub struct TransportError(pub String);

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for TransportError {}

/// The three unary operations a stream handle needs from whatever carries
/// bytes between client and server.
#[async_trait::async_trait]
pub trait UnaryTransport: Send + Sync {
    /// `None` means the session is unknown to the server (already
    /// terminated and reaped). `Some(batch)` may be empty when the
    /// server's long-poll window elapsed with nothing to report.
    async fn poll(&self, sid: u64) -> Result<Option<Vec<Event>>, TransportError>;

    /// Hard cancel. Returns whether the server still had the session.
    async fn cancel(&self, sid: u64) -> Result<bool, TransportError>;

    /// Soft cancel. Returns whether the server still had the session.
    async fn soft_cancel(&self, sid: u64) -> Result<bool, TransportError>;
}
