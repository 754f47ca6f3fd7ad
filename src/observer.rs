use crate::error::PresenceError;

/// Receives the presence signal of one tracking session.
///
/// Calls arrive on the session's worker thread. A session holds exactly one
/// observer; to swap it, stop the session and start a new one.
pub trait PresenceObserver: Send {
    fn on_presence_change(&mut self, present: bool);

    /// A failure that ended the session, e.g. the camera could not be opened.
    fn on_error(&mut self, error: &PresenceError) {
        log::error!("{}", error);
    }
}

impl<F> PresenceObserver for F
where
    F: FnMut(bool) + Send,
{
    fn on_presence_change(&mut self, present: bool) {
        self(present)
    }
}

/// Logs every presence event at `info`.
#[derive(Debug, Default)]
pub struct LogObserver;

impl PresenceObserver for LogObserver {
    fn on_presence_change(&mut self, present: bool) {
        if present {
            log::info!("user present");
        } else {
            log::info!("user not present");
        }
    }
}
