//! Process-wide registry keyed by session id; hosts `Invoke`/`Poll`/
//! `Cancel`/`SoftCancel` and the server-side panic recovery + post-terminal
//! keep-alive window.

use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::FutureExt as _;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

thread_local! {
    static LAST_PANIC_BACKTRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

/// Installs a panic hook that stashes a captured backtrace in a thread-local
/// before running whatever hook was previously registered, so a `catch_unwind`
/// guard on the same thread can retrieve it afterwards. Installed once,
/// process-wide; idempotent beyond the first call.
fn install_panic_hook() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            LAST_PANIC_BACKTRACE.with(|cell| {
                *cell.borrow_mut() = Some(Backtrace::force_capture());
            });
            previous(info);
        }));
    });
}

/// Take the backtrace captured by the most recent panic on this thread, if
/// any. Must be called right after a `catch_unwind` boundary returns `Err`,
/// before another panic on the same thread can overwrite it.
fn take_captured_backtrace() -> Bytes {
    LAST_PANIC_BACKTRACE
        .with(|cell| cell.borrow_mut().take())
        .map(|bt| Bytes::from(bt.to_string().into_bytes()))
        .unwrap_or_default()
}

use crate::config::{merge_config, PartialSessionConfig};
use crate::event::{Event, PanicInfo};
use crate::session::Session;

/// Error the handler body returns. Opaque to the manager beyond its
/// `Display`/`Error` impl, which feeds the envelope transform.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A handler body's future: given the session it was invoked with, produce
/// an application result. Runs on its own task; its return value (or panic)
/// determines the terminal event.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>>;

/// A handler body, boxed so the manager can invoke arbitrary user closures.
pub type Handler = Box<dyn FnOnce(Arc<Session>) -> HandlerFuture + Send>;

/// Process-wide (or locally constructed, for tests) registry of live
/// sessions.
#[derive(Default)]
pub struct StreamManager {
    next_id: AtomicU64,
    sessions: RwLock<HashMap<u64, Arc<Session>>>,
}

impl StreamManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { next_id: AtomicU64::new(0), sessions: RwLock::new(HashMap::new()) })
    }

    /// Allocate a session, register it, spawn `handler` with a panic guard,
    /// and return the sid the client should address `Poll`/`Cancel` to.
    pub async fn invoke(
        self: &Arc<Self>,
        handler: Handler,
        cfg: Option<PartialSessionConfig>,
    ) -> u64 {
        install_panic_hook();
        let sid = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(Session::new(sid, merge_config(cfg)));
        session.start_idle_detector();

        self.sessions.write().await.insert(sid, Arc::clone(&session));

        let manager = Arc::clone(self);
        let guard_session = Arc::clone(&session);
        tokio::spawn(async move {
            let result = AssertUnwindSafe(handler(Arc::clone(&guard_session))).catch_unwind().await;

            match result {
                Ok(Ok(())) => guard_session.push_done().await,
                Ok(Err(err)) => guard_session.push_error(err.as_ref()).await,
                Err(panic) => {
                    let data = panic_message(panic.as_ref());
                    let stack = take_captured_backtrace();
                    warn!(sid, data = %data, "handler panicked");
                    guard_session.push_panic(PanicInfo { data, stack }).await;
                }
            }

            let keep_alive = guard_session.config().keep_alive;
            guard_session.wait_flush(keep_alive).await;
            manager.sessions.write().await.remove(&sid);
            debug!(sid, "session reaped");
        });

        info!(sid, "session invoked");
        sid
    }

    /// Look up a session; if missing, the client should interpret it as
    /// "stream already reaped".
    pub async fn poll(&self, sid: u64) -> Option<Vec<Event>> {
        let session = self.sessions.read().await.get(&sid).cloned()?;
        session.idle_enter();
        let batch = session.flush().await;
        session.idle_leave();
        Some(batch.unwrap_or_default())
    }

    /// Hard cancel: remove-and-end in one step.
    pub async fn cancel(&self, sid: u64) -> bool {
        let session = self.sessions.write().await.remove(&sid);
        match session {
            Some(session) => {
                session.cancel().await;
                true
            }
            None => false,
        }
    }

    /// Soft cancel: end the session logically but keep the registry entry,
    /// so a lagging client can still drain buffered + terminal events.
    pub async fn soft_cancel(&self, sid: u64) -> bool {
        let session = self.sessions.read().await.get(&sid).cloned();
        match session {
            Some(session) => {
                session.cancel().await;
                true
            }
            None => false,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
