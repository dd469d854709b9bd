use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

/// A one-shot delayed callback on its own thread.
///
/// Dropping the timer disconnects the channel, which cancels the callback if
/// it has not fired yet.
pub(crate) struct RefreshTimer {
    _cancel: Sender<()>,
}

impl RefreshTimer {
    pub(crate) fn spawn<F>(delay: Duration, on_fire: F) -> std::io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<()>();
        thread::Builder::new()
            .name("loandesk-refresh".to_string())
            .spawn(move || match rx.recv_timeout(delay) {
                Err(RecvTimeoutError::Timeout) => on_fire(),
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
            })?;
        Ok(Self { _cancel: tx })
    }
}

/// Time until a proactive refresh is due, or `None` when it should not be armed
pub(crate) fn refresh_delay(exp_secs: i64, now_millis: i64, margin: Duration) -> Option<Duration> {
    let due = exp_secs
        .checked_mul(1000)?
        .checked_sub(margin.as_millis() as i64)?;
    let delay = due.checked_sub(now_millis)?;
    if delay > 0 {
        Some(Duration::from_millis(delay as u64))
    } else {
        None
    }
}
