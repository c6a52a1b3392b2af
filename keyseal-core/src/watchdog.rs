//! Deadline enforcement for blocking keystore calls.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Runs `op`, optionally bounded by a deadline.
///
/// With no deadline the call runs inline on the caller's thread. With a
/// deadline it runs on a detached watchdog thread and `None` is returned if
/// the deadline elapses first. The abandoned thread keeps running until the
/// backend call returns (blocking calls cannot be cancelled); its result is
/// discarded.
pub(crate) fn call_with_deadline<T, F>(deadline: Option<Duration>, op: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let Some(deadline) = deadline else {
        return Some(op());
    };

    let (tx, rx) = mpsc::sync_channel(1);
    thread::spawn(move || {
        // The receiver is gone if the deadline already fired.
        let _ = tx.send(op());
    });
    rx.recv_timeout(deadline).ok()
}
