//! Client-side driver: owns a polling task that issues back-to-back `Poll`
//! RPCs, dispatches events to a value channel, and reduces the terminal
//! event into a `Result`/panic/success outcome.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::event::{ErrorEnvelope, Event, PanicInfo};
use crate::transport::UnaryTransport;

const VALUE_CHANNEL_CAPACITY: usize = 16;

#[derive(Clone)]
enum Outcome {
    Success,
    Err(ErrorEnvelope),
    Panic(PanicInfo),
}

/// Client-side handle to one streaming call.
pub struct StreamHandle {
    sid: u64,
    transport: Arc<dyn UnaryTransport>,

    value_tx: StdMutex<Option<mpsc::Sender<Bytes>>>,
    value_rx: StdMutex<Option<mpsc::Receiver<Bytes>>>,

    ended_tx: watch::Sender<bool>,
    ended_rx: watch::Receiver<bool>,
    outcome: StdMutex<Outcome>,

    local_cancel: CancellationToken,
    polling_started: AtomicBool,
    canceled: AtomicBool,

    log_sink: Box<dyn Fn(&str) + Send + Sync>,
}

impl StreamHandle {
    /// Build a handle for a session already allocated by an `Invoke`-shaped
    /// call; `sid` is the id that call returned.
    pub fn new(sid: u64, transport: Arc<dyn UnaryTransport>) -> Arc<Self> {
        Self::with_log_sink(sid, transport, |line| info!(target: "srpc::client", "{line}"))
    }

    pub fn with_log_sink(
        sid: u64,
        transport: Arc<dyn UnaryTransport>,
        log_sink: impl Fn(&str) + Send + Sync + 'static,
    ) -> Arc<Self> {
        let (value_tx, value_rx) = mpsc::channel(VALUE_CHANNEL_CAPACITY);
        let (ended_tx, ended_rx) = watch::channel(false);
        Arc::new(Self {
            sid,
            transport,
            value_tx: StdMutex::new(Some(value_tx)),
            value_rx: StdMutex::new(Some(value_rx)),
            ended_tx,
            ended_rx,
            outcome: StdMutex::new(Outcome::Success),
            local_cancel: CancellationToken::new(),
            polling_started: AtomicBool::new(false),
            canceled: AtomicBool::new(false),
            log_sink: Box::new(log_sink),
        })
    }

    /// The value stream. Triggers the polling task on first call; returns
    /// `None` on any later call, since the channel was already handed out.
    pub fn c(self: &Arc<Self>) -> Option<ReceiverStream<Bytes>> {
        self.ensure_polling();
        self.lock(&self.value_rx).take().map(ReceiverStream::new)
    }

    fn ensure_polling(self: &Arc<Self>) {
        if self.polling_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move { this.poll_loop().await });
    }

    async fn poll_loop(self: Arc<Self>) {
        loop {
            let outcome = tokio::select! {
                _ = self.local_cancel.cancelled() => break,
                result = self.transport.poll(self.sid) => result,
            };

            match outcome {
                Ok(None) => break, // NoSuchSession: already terminated and reaped
                Ok(Some(batch)) => {
                    let mut terminal = false;
                    for event in batch {
                        terminal |= event.is_terminal();
                        if !self.dispatch(event).await {
                            // value receiver gone: stop polling, nothing more to deliver
                            self.mark_ended();
                            return;
                        }
                    }
                    if terminal {
                        break;
                    }
                }
                Err(e) => {
                    self.set_outcome(Outcome::Err(ErrorEnvelope {
                        message: e.to_string(),
                        type_name: "srpc::TransportError".to_owned(),
                    }));
                    break;
                }
            }
        }
        self.mark_ended();
    }

    /// Dispatch one event; returns `false` if the value channel is gone and
    /// the poll loop should stop early.
    async fn dispatch(&self, event: Event) -> bool {
        match event {
            Event::Value(bytes) => {
                let maybe_tx = self.lock(&self.value_tx).clone();
                match maybe_tx {
                    Some(tx) => tx.send(bytes).await.is_ok(),
                    None => false,
                }
            }
            Event::Log(line) => {
                (self.log_sink)(&line);
                true
            }
            Event::Error(envelope) => {
                self.set_outcome(Outcome::Err(envelope));
                true
            }
            Event::Panic(info) => {
                self.set_outcome(Outcome::Panic(info));
                true
            }
            Event::Done => true,
        }
    }

    fn set_outcome(&self, outcome: Outcome) {
        *self.lock(&self.outcome) = outcome;
    }

    fn mark_ended(&self) {
        let _ = self.lock(&self.value_tx).take();
        let _ = self.ended_tx.send_if_modified(|v| {
            let changed = !*v;
            *v = true;
            changed
        });
    }

    fn lock<'a, T>(&self, m: &'a StdMutex<T>) -> std::sync::MutexGuard<'a, T> {
        m.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    async fn wait_ended(&self) {
        if *self.ended_rx.borrow() {
            return;
        }
        let mut rx = self.ended_rx.clone();
        let _ = rx.changed().await;
    }

    /// Block until ended; true iff neither `err` nor `panic` was observed.
    pub async fn success(&self) -> bool {
        self.wait_ended().await;
        matches!(&*self.lock(&self.outcome), Outcome::Success)
    }

    /// Block until ended. Resumes a captured handler panic locally,
    /// otherwise returns the terminal error, if any.
    pub async fn result(&self) -> Result<(), ErrorEnvelope> {
        self.wait_ended().await;
        let outcome = self.lock(&self.outcome).clone();
        match outcome {
            Outcome::Success => Ok(()),
            Outcome::Err(e) => Err(e),
            Outcome::Panic(info) => std::panic::resume_unwind(Box::new(info.data)),
        }
    }

    /// Block until ended; the symmetric accessor to `result()` that never
    /// re-raises — a panic is rendered as an ordinary envelope instead.
    pub async fn get_error(&self) -> Option<ErrorEnvelope> {
        self.wait_ended().await;
        match &*self.lock(&self.outcome) {
            Outcome::Success => None,
            Outcome::Err(e) => Some(e.clone()),
            Outcome::Panic(info) => {
                Some(ErrorEnvelope { message: info.to_string(), type_name: "panic".to_owned() })
            }
        }
    }

    pub fn is_ended(&self) -> bool {
        *self.ended_rx.borrow()
    }

    pub async fn end_c(&self) {
        self.wait_ended().await;
    }

    /// Hard cancel: ends locally at once (closing the value stream
    /// promptly) and issues `Cancel` to the server at-most-once.
    pub async fn cancel(&self) -> bool {
        if self.canceled.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.local_cancel.cancel();
        self.mark_ended();
        self.transport.cancel(self.sid).await.unwrap_or(false)
    }

    /// Fire-and-forget `SoftCancel`; the poll loop keeps running and will
    /// still deliver buffered values plus the terminal event.
    pub async fn soft_cancel(&self) {
        let _ = self.transport.soft_cancel(self.sid).await;
    }

    pub async fn cancel_and_result(&self) -> Result<(), ErrorEnvelope> {
        self.cancel().await;
        self.result().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;
    use futures_util::StreamExt;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Mutex as AsyncMutex;

    struct ScriptedTransport {
        batches: AsyncMutex<Vec<Vec<Event>>>,
        cancel_calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(batches: Vec<Vec<Event>>) -> Arc<Self> {
            Arc::new(Self { batches: AsyncMutex::new(batches), cancel_calls: AtomicUsize::new(0) })
        }
    }

    #[async_trait::async_trait]
    impl UnaryTransport for ScriptedTransport {
        async fn poll(&self, _sid: u64) -> Result<Option<Vec<Event>>, TransportError> {
            let mut batches = self.batches.lock().await;
            if batches.is_empty() {
                return Ok(None);
            }
            Ok(Some(batches.remove(0)))
        }

        async fn cancel(&self, _sid: u64) -> Result<bool, TransportError> {
            self.cancel_calls.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }

        async fn soft_cancel(&self, _sid: u64) -> Result<bool, TransportError> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn basic_stream_yields_values_then_error() {
        let transport = ScriptedTransport::new(vec![
            vec![Event::Value(Bytes::from_static(b"0")), Event::Log("i=0".into())],
            vec![Event::Value(Bytes::from_static(b"1"))],
            vec![Event::Error(ErrorEnvelope { message: "ex".into(), type_name: "T".into() })],
        ]);
        let handle = StreamHandle::new(1, transport);
        let values: Vec<_> = handle.c().expect("first call").collect().await;
        assert_eq!(values, vec![Bytes::from_static(b"0"), Bytes::from_static(b"1")]);

        let err = handle.result().await.unwrap_err();
        assert_eq!(err.message, "ex");
    }

    #[tokio::test]
    #[should_panic(expected = "boom")]
    async fn result_resumes_captured_panic() {
        let transport = ScriptedTransport::new(vec![vec![Event::Panic(PanicInfo {
            data: "boom".into(),
            stack: Bytes::new(),
        })]]);
        let handle = StreamHandle::new(1, transport);
        let _ = handle.c();
        let _ = handle.result().await;
    }

    #[tokio::test]
    async fn get_error_observes_panic_without_reraising() {
        let transport = ScriptedTransport::new(vec![vec![Event::Panic(PanicInfo {
            data: "boom".into(),
            stack: Bytes::new(),
        })]]);
        let handle = StreamHandle::new(1, transport);
        let _ = handle.c();
        let err = handle.get_error().await.expect("panic rendered as error");
        assert!(err.message.contains("boom"));
        assert!(!handle.success().await);
    }

    #[tokio::test]
    async fn second_c_call_returns_none() {
        let transport = ScriptedTransport::new(vec![vec![Event::Done]]);
        let handle = StreamHandle::new(1, transport);
        assert!(handle.c().is_some());
        assert!(handle.c().is_none());
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_at_most_once() {
        let transport = ScriptedTransport::new(vec![]);
        let handle = StreamHandle::new(1, Arc::clone(&transport) as Arc<dyn UnaryTransport>);
        assert!(handle.cancel().await);
        assert!(!handle.cancel().await);
        assert_eq!(transport.cancel_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_such_session_ends_without_error() {
        let transport = ScriptedTransport::new(vec![]);
        let handle = StreamHandle::new(1, transport);
        let _ = handle.c();
        assert!(handle.success().await);
    }
}
