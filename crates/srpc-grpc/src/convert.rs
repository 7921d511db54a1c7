//! Domain-to-proto and proto-to-domain conversions for the `srpc.v1` wire
//! types.

use bytes::Bytes;
use srpc::{ErrorEnvelope, Event, PanicInfo};

use crate::proto;

pub fn error_envelope_to_proto(e: &ErrorEnvelope) -> proto::ErrorEnvelope {
    proto::ErrorEnvelope { message: e.message.clone(), type_name: e.type_name.clone() }
}

pub fn error_envelope_from_proto(e: proto::ErrorEnvelope) -> ErrorEnvelope {
    ErrorEnvelope { message: e.message, type_name: e.type_name }
}

pub fn panic_info_to_proto(p: &PanicInfo) -> proto::PanicInfo {
    proto::PanicInfo { data: p.data.clone(), stack: p.stack.to_vec() }
}

pub fn panic_info_from_proto(p: proto::PanicInfo) -> PanicInfo {
    PanicInfo { data: p.data, stack: Bytes::from(p.stack) }
}

pub fn event_to_proto(event: &Event) -> proto::Event {
    use proto::event::Payload;
    let payload = match event {
        Event::Value(bytes) => Payload::Value(bytes.to_vec()),
        Event::Log(line) => Payload::Log(line.clone()),
        Event::Done => Payload::Done(true),
        Event::Error(e) => Payload::Error(error_envelope_to_proto(e)),
        Event::Panic(p) => Payload::Panic(panic_info_to_proto(p)),
    };
    proto::Event { payload: Some(payload) }
}

/// `None` only for a malformed wire message (missing oneof); callers treat
/// that as a transport-level failure, not a valid empty event.
pub fn event_from_proto(event: proto::Event) -> Option<Event> {
    use proto::event::Payload;
    match event.payload? {
        Payload::Value(bytes) => Some(Event::Value(Bytes::from(bytes))),
        Payload::Log(line) => Some(Event::Log(line)),
        Payload::Done(_) => Some(Event::Done),
        Payload::Error(e) => Some(Event::Error(error_envelope_from_proto(e))),
        Payload::Panic(p) => Some(Event::Panic(panic_info_from_proto(p))),
    }
}
