//! An event-driven timer: fires `notifier()` once a session has had zero
//! outstanding pollers continuously for `duration`. Bursty `Enter`/`Leave`
//! traffic must not restart the clock every time the counter dips to zero
//! and back — only a continuous idle run of `duration` counts.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;

enum DetectorEvent {
    Enter,
    Leave,
    Quit,
    Timer(Instant),
}

/// Handle used by the session to report poller activity. Cloning is cheap;
/// `push` is non-blocking and silently drops once the detector has exited.
#[derive(Clone)]
pub struct IdleDetectorHandle {
    tx: mpsc::UnboundedSender<DetectorEvent>,
}

impl IdleDetectorHandle {
    pub fn enter(&self) {
        let _ = self.tx.send(DetectorEvent::Enter);
    }

    pub fn leave(&self) {
        let _ = self.tx.send(DetectorEvent::Leave);
    }

    pub fn quit(&self) {
        let _ = self.tx.send(DetectorEvent::Quit);
    }
}

/// Spawn the idle detector loop and return a handle to it. `notifier` is
/// called at most once, from the detector's own task.
///
/// If `duration` is zero the loop exits immediately without ever spawning
/// a timer: idle detection is disabled.
pub fn spawn<F>(duration: Duration, notifier: F) -> IdleDetectorHandle
where
    F: FnOnce() + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<DetectorEvent>();
    let handle = IdleDetectorHandle { tx: tx.clone() };

    // A session is born idle: pre-seed a Leave so the timer starts even if
    // nobody ever calls `enter`/`leave` (e.g. a client that never polls).
    let _ = tx.send(DetectorEvent::Leave);

    tokio::spawn(async move {
        if duration == Duration::ZERO {
            return;
        }

        let mut counter: i64 = 1;
        let mut last_idle_time = Instant::now();

        while let Some(event) = rx.recv().await {
            match event {
                DetectorEvent::Enter => counter += 1,
                DetectorEvent::Leave => {
                    counter -= 1;
                    if counter == 0 {
                        last_idle_time = Instant::now();
                        let timer_tx = tx.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(duration).await;
                            let _ = timer_tx.send(DetectorEvent::Timer(Instant::now()));
                        });
                    }
                }
                DetectorEvent::Quit => return,
                DetectorEvent::Timer(fired_at) => {
                    if counter != 0 || fired_at.duration_since(last_idle_time) < duration {
                        continue;
                    }
                    notifier();
                    return;
                }
            }
        }
    });

    handle
}
