//! Per-call state machine: producer-facing push API, consumer-facing
//! `flush()`, terminal latching, cancellation, end-wait.

use std::sync::OnceLock;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, watch, Mutex};

use crate::config::SessionConfig;
use crate::end_cause::EndCause;
use crate::event::{ErrorEnvelope, Event, PanicInfo};
use crate::idle_detector::{self, IdleDetectorHandle};

/// One logical streaming call.
///
/// Producer (`push_value`/`logf`/`push_done`/`push_error`/`push_panic`/
/// `end_c`) and consumer (`flush`, `wait_flush`, `cancel`) are both inherent
/// methods on this type; callers on either side only ever see the half
/// relevant to them.
pub struct Session {
    pub sid: u64,
    cfg: SessionConfig,

    tx: mpsc::Sender<Event>,
    rx: Mutex<mpsc::Receiver<Event>>,
    final_event: Mutex<Option<Event>>,

    end_tx: watch::Sender<Option<EndCause>>,
    end_rx: watch::Receiver<Option<EndCause>>,
    flushed_tx: watch::Sender<bool>,
    flushed_rx: watch::Receiver<bool>,

    /// Serializes a non-terminal enqueue against a terminal commit so the two
    /// can't interleave: either the enqueue finishes first and its event
    /// lands in `buf`, or the commit wins the lock first and the enqueue
    /// then observes the committed cause and fails. Without this, racing
    /// `push_value` against `cancel()`/`push_done()` via a bare `select!`
    /// over `tx.send()` and `end_rx.changed()` could let a value slip into
    /// the buffer after the end has logically committed, since a bounded
    /// `mpsc::Sender::send` resolves on its first poll whenever capacity is
    /// free regardless of which branch "should" have won.
    commit_lock: Mutex<()>,

    idle: OnceLock<IdleDetectorHandle>,
}

impl Session {
    pub fn new(sid: u64, cfg: SessionConfig) -> Self {
        // tokio's mpsc has no zero-capacity channel; a zero buffer capacity's
        // synchronous-rendezvous intent is approximated with a one-slot
        // buffer.
        let (tx, rx) = mpsc::channel(cfg.buffer_capacity.max(1));
        let (end_tx, end_rx) = watch::channel(None);
        let (flushed_tx, flushed_rx) = watch::channel(false);
        Self {
            sid,
            cfg,
            tx,
            rx: Mutex::new(rx),
            final_event: Mutex::new(None),
            end_tx,
            end_rx,
            flushed_tx,
            flushed_rx,
            commit_lock: Mutex::new(()),
            idle: OnceLock::new(),
        }
    }

    pub fn config(&self) -> SessionConfig {
        self.cfg
    }

    /// Start the idle detector now that the session is behind an `Arc`. Uses
    /// a weak back-reference so the detector task never keeps the session
    /// alive on its own.
    pub fn start_idle_detector(self: &std::sync::Arc<Self>) {
        let weak = std::sync::Arc::downgrade(self);
        let handle = idle_detector::spawn(self.cfg.client_timeout, move || {
            if let Some(session) = weak.upgrade() {
                tokio::spawn(async move {
                    session.commit_timeout().await;
                });
            }
        });
        let _ = self.idle.set(handle);
    }

    pub(crate) fn idle_enter(&self) {
        if let Some(h) = self.idle.get() {
            h.enter();
        }
    }

    pub(crate) fn idle_leave(&self) {
        if let Some(h) = self.idle.get() {
            h.leave();
        }
    }

    // -- Producer API ------------------------------------------------------

    /// Enqueue `{Value, x}`. Blocks until the buffer admits the event or the
    /// session has ended, in which case the already-committed `EndCause` is
    /// returned as an error the handler is expected to propagate with `?`.
    pub async fn push_value(&self, data: Bytes) -> Result<(), EndCause> {
        self.push_nonterminal(Event::Value(data)).await
    }

    pub async fn logf(&self, line: impl Into<String>) -> Result<(), EndCause> {
        self.push_nonterminal(Event::Log(line.into())).await
    }

    async fn push_nonterminal(&self, event: Event) -> Result<(), EndCause> {
        if let Some(cause) = *self.end_rx.borrow() {
            return Err(cause);
        }
        // Held across the send so a concurrent `try_commit` can't observe
        // "not yet ended" and commit while this enqueue is still in flight:
        // the two operations are serialized, not raced.
        let _guard = self.commit_lock.lock().await;
        if let Some(cause) = *self.end_rx.borrow() {
            return Err(cause);
        }
        self.tx.send(event).await.map_err(|_| self.committed_cause())
    }

    fn committed_cause(&self) -> EndCause {
        self.end_rx.borrow().unwrap_or(EndCause::Unknown)
    }

    /// Commit terminal `Normal`.
    pub async fn push_done(&self) {
        self.try_commit(EndCause::Normal, Event::Done).await;
    }

    /// Commit terminal `Error`, rewrapping `err` via the envelope transform.
    pub async fn push_error<E: std::error::Error + ?Sized>(&self, err: &E) {
        self.try_commit(EndCause::Error, Event::Error(ErrorEnvelope::wrap(err))).await;
    }

    /// Commit terminal `Panic` with the captured value and stack.
    pub async fn push_panic(&self, info: PanicInfo) {
        self.try_commit(EndCause::Panic, Event::Panic(info)).await;
    }

    /// Server-side idle-detector path: commit terminal `ClientTimeout`.
    pub(crate) async fn commit_timeout(&self) {
        let envelope = ErrorEnvelope::from_end_cause(EndCause::ClientTimeout);
        self.try_commit(EndCause::ClientTimeout, Event::Error(envelope)).await;
    }

    /// Client-initiated hard/soft cancel: commit terminal `ClientCanceled`.
    pub async fn cancel(&self) {
        let envelope = ErrorEnvelope::from_end_cause(EndCause::ClientCanceled);
        self.try_commit(EndCause::ClientCanceled, Event::Error(envelope)).await;
    }

    /// One-shot: only the first caller commits `cause` and stashes `event`
    /// into the terminal slot; later callers are silently dropped.
    async fn try_commit(&self, cause: EndCause, event: Event) -> bool {
        let _guard = self.commit_lock.lock().await;
        let won = self.end_tx.send_if_modified(|v| {
            if v.is_none() {
                *v = Some(cause);
                true
            } else {
                false
            }
        });
        if won {
            *self.final_event.lock().await = Some(event);
            if let Some(h) = self.idle.get() {
                h.quit();
            }
        }
        won
    }

    /// Observable "the session has ended". Handler code selects on this to
    /// abort slow work on cancel/timeout.
    pub async fn end_c(&self) -> EndCause {
        if let Some(cause) = *self.end_rx.borrow() {
            return cause;
        }
        let mut rx = self.end_rx.clone();
        let _ = rx.changed().await;
        let cause = *rx.borrow();
        cause.unwrap_or(EndCause::Unknown)
    }

    pub fn is_ended(&self) -> bool {
        self.end_rx.borrow().is_some()
    }

    // -- Consumer API --------------------------------------------------

    /// One poll's worth of events. `None` means "nothing to report this
    /// round" (caller should poll again) or "already fully drained"
    /// (caller should stop polling).
    pub async fn flush(&self) -> Option<Vec<Event>> {
        if self.is_ended() {
            return self.flush_after_end().await;
        }

        let mut rx = self.rx.lock().await;
        let mut end_rx = self.end_rx.clone();

        let first = match self.cfg.poll_timeout {
            Some(poll_timeout) => {
                tokio::select! {
                    ev = rx.recv() => ev,
                    _ = end_rx.changed() => None,
                    _ = tokio::time::sleep(poll_timeout) => None,
                }
            }
            None => {
                tokio::select! {
                    ev = rx.recv() => ev,
                    _ = end_rx.changed() => None,
                }
            }
        };

        let first = first?;
        let mut batch = vec![first];
        while let Ok(ev) = rx.try_recv() {
            batch.push(ev);
        }
        Some(batch)
    }

    async fn flush_after_end(&self) -> Option<Vec<Event>> {
        let terminal = self.final_event.lock().await.take();
        match terminal {
            Some(terminal) => {
                let mut rx = self.rx.lock().await;
                let mut batch = Vec::new();
                while let Ok(ev) = rx.try_recv() {
                    batch.push(ev);
                }
                batch.push(terminal);
                let _ = self.flushed_tx.send(true);
                Some(batch)
            }
            None => {
                // Already drained by another poller: block until it hands
                // the terminal off, then report "truly finished".
                let mut rx = self.flushed_rx.clone();
                if !*rx.borrow() {
                    let _ = rx.changed().await;
                }
                None
            }
        }
    }

    /// Block up to `timeout` for the terminal event to have been handed off
    /// to a poller. Used at server shutdown / post-terminal cleanup to let
    /// the last batch leave before the registry entry is dropped.
    pub async fn wait_flush(&self, timeout: Duration) {
        let mut rx = self.flushed_rx.clone();
        if *rx.borrow() {
            return;
        }
        let _ = tokio::time::timeout(timeout, rx.changed()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event as Ev;
    use std::sync::Arc;

    fn cfg(buffer_capacity: usize) -> SessionConfig {
        SessionConfig {
            buffer_capacity,
            client_timeout: Duration::from_secs(10),
            keep_alive: Duration::from_secs(10),
            poll_timeout: None,
        }
    }

    #[tokio::test]
    async fn values_then_done_flush_in_order() {
        let session = Arc::new(Session::new(1, cfg(10)));
        for i in 0..3u8 {
            session.push_value(Bytes::from(vec![i])).await.unwrap();
        }
        session.push_done().await;

        let batch = session.flush().await.expect("batch");
        assert_eq!(batch.len(), 4);
        for (i, ev) in batch.iter().take(3).enumerate() {
            match ev {
                Ev::Value(b) => assert_eq!(b.as_ref(), [i as u8]),
                other => panic!("expected value, got {other:?}"),
            }
        }
        assert!(matches!(batch[3], Ev::Done));

        // fully drained: next flush blocks on flushed_signal and returns None.
        assert!(session.flush().await.is_none());
    }

    #[tokio::test]
    async fn push_after_commit_fails_with_committed_cause() {
        let session = Session::new(1, cfg(10));
        session.cancel().await;
        let err = session.push_value(Bytes::from_static(b"x")).await.unwrap_err();
        assert_eq!(err, EndCause::ClientCanceled);
    }

    #[tokio::test]
    async fn only_first_terminal_commit_wins() {
        let session = Session::new(1, cfg(10));
        session.push_done().await;
        session.push_panic(PanicInfo { data: "late".into(), stack: Bytes::new() }).await;

        let batch = session.flush().await.expect("batch");
        assert_eq!(batch.len(), 1);
        assert!(matches!(batch[0], Ev::Done));
    }

    #[tokio::test]
    async fn flush_blocks_until_first_event_then_drains() {
        let session = Arc::new(Session::new(1, cfg(10)));
        let s2 = Arc::clone(&session);
        let flush_task = tokio::spawn(async move { s2.flush().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        session.push_value(Bytes::from_static(b"a")).await.unwrap();
        session.push_value(Bytes::from_static(b"b")).await.unwrap();

        let batch = flush_task.await.unwrap().expect("batch");
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn poll_timeout_yields_empty_batch() {
        let mut c = cfg(10);
        c.poll_timeout = Some(Duration::from_millis(15));
        let session = Session::new(1, c);
        assert!(session.flush().await.is_none());
    }

    #[tokio::test]
    async fn concurrent_push_and_cancel_never_leaks_past_commit() {
        // Races many push_value calls against a concurrent cancel(). Every
        // push must either land in the flushed batch (it won the race) or
        // fail with the committed cause (it lost) — never both succeed and
        // be dropped, and never silently leak into the batch after a push
        // reported failure.
        for _ in 0..200 {
            let session = Arc::new(Session::new(1, cfg(8)));
            let mut pushers = Vec::new();
            for i in 0..8u8 {
                let s = Arc::clone(&session);
                pushers.push(tokio::spawn(async move {
                    (i, s.push_value(Bytes::from(vec![i])).await)
                }));
            }
            let canceler = {
                let s = Arc::clone(&session);
                tokio::spawn(async move { s.cancel().await })
            };

            let mut won = Vec::new();
            for p in pushers {
                let (i, res) = p.await.unwrap();
                if res.is_ok() {
                    won.push(i);
                }
            }
            canceler.await.unwrap();

            let batch = session.flush().await.expect("batch");
            let values: Vec<u8> = batch
                .iter()
                .filter_map(|ev| match ev {
                    Ev::Value(b) => Some(b[0]),
                    _ => None,
                })
                .collect();
            assert_eq!(values.len(), won.len(), "flushed values must match exactly the pushes that reported success");
            for i in &won {
                assert!(values.contains(i), "push {i} reported success but its value never appeared");
            }
            assert!(matches!(batch.last(), Some(Ev::Error(_))), "terminal event must be last");
        }
    }

    #[tokio::test]
    async fn wait_flush_returns_once_terminal_handed_off() {
        let session = Arc::new(Session::new(1, cfg(10)));
        session.push_done().await;
        let _ = session.flush().await;
        session.wait_flush(Duration::from_millis(50)).await; // should return immediately
    }
}
