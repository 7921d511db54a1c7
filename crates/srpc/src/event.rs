//! The wire event taxonomy and its compatibility-safe error envelope.

use bytes::Bytes;

use crate::end_cause::EndCause;

/// A captured server-side panic: the formatted panic value plus a stack trace.
#[derive(Debug, Clone)]
pub struct PanicInfo {
    pub data: String,
    pub stack: Bytes,
}

impl std::fmt::Display for PanicInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.data)?;
        writeln!(f, "=====> REMOTE STACK START <=====")?;
        f.write_str(&String::from_utf8_lossy(&self.stack))?;
        writeln!(f, "=====> REMOTE STACK END <=====")
    }
}

/// Portable `{message, type_name}` fallback used whenever a producer-side
/// error cannot be trusted to round-trip through the wire codec as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEnvelope {
    pub message: String,
    pub type_name: String,
}

impl std::fmt::Display for ErrorEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}) {}", self.type_name, self.message)
    }
}

impl std::error::Error for ErrorEnvelope {}

impl ErrorEnvelope {
    /// Wrap an arbitrary producer error into the portable shape. There is no
    /// runtime wire registry to trial-encode against, so this is total
    /// rather than best-effort — every producer error is rewrapped.
    pub fn wrap<E: std::error::Error + ?Sized>(err: &E) -> Self {
        Self { message: err.to_string(), type_name: std::any::type_name::<E>().to_owned() }
    }

    /// Wrap an `EndCause` surfaced as a producer error (e.g. a handler that
    /// propagates the push failure it received from `Session::push_value`).
    pub fn from_end_cause(cause: EndCause) -> Self {
        Self { message: cause.to_string(), type_name: "srpc::EndCause".to_owned() }
    }
}

/// A single event in a session's stream, as pushed by the producer and
/// batched by `Session::flush` for delivery to a poller.
#[derive(Debug, Clone)]
pub enum Event {
    /// An application-level value. Opaque to the session layer: the
    /// producer's endpoint signature determines how it round-trips.
    Value(Bytes),
    /// A formatted log line, interleaved with values in producer order.
    Log(String),
    /// Terminal: the handler returned `Ok(())`.
    Done,
    /// Terminal: the handler returned `Err`, or the client timed out.
    Error(ErrorEnvelope),
    /// Terminal: the handler panicked.
    Panic(PanicInfo),
}

impl Event {
    /// `Done | Error | Panic` are terminal; exactly one terminal event is
    /// ever emitted per session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Done | Event::Error(_) | Event::Panic(_))
    }
}
