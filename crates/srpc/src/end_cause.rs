//! The committed terminal reason a session ended.

use std::fmt;

/// Why a session reached its terminal state.
///
/// Exactly one `EndCause` is committed per session, by whichever of
/// producer-done/producer-error/producer-panic/client-cancel/client-timeout
/// wins the race to close `end_signal` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndCause {
    Unknown,
    Normal,
    Error,
    Panic,
    ClientCanceled,
    ClientTimeout,
}

impl fmt::Display for EndCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "session has ended due to unknown reason",
            Self::Normal => "session has ended normally",
            Self::Error => "session has ended due to server-side error",
            Self::Panic => "session has ended due to server-side panic",
            Self::ClientCanceled => "session has ended due to client-side cancellation",
            Self::ClientTimeout => "session has ended due to client-side timeout",
        };
        f.write_str(s)
    }
}

impl std::error::Error for EndCause {}
