use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Default)]
struct ActiveStream {
    stream_id: u64,
    token: Option<CancellationToken>,
}

fn lock(slot: &Mutex<ActiveStream>) -> MutexGuard<'_, ActiveStream> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Owns the single abort handle for the session that is streaming.
#[derive(Debug, Default)]
pub struct CancellationController {
    active: Arc<Mutex<ActiveStream>>,
}

impl CancellationController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next stream id and a fresh token. Returns `None` while
    /// another stream still holds its token; the live stream is untouched.
    pub fn start_stream(&self) -> Option<(CancellationToken, u64)> {
        let mut active = lock(&self.active);
        if active.token.is_some() {
            debug!(stream_id = active.stream_id, "stream already active; refusing");
            return None;
        }
        active.stream_id += 1;
        let token = CancellationToken::new();
        active.token = Some(token.clone());
        debug!(stream_id = active.stream_id, "stream token issued");
        Some((token, active.stream_id))
    }

    pub fn current_stream_id(&self) -> u64 {
        lock(&self.active).stream_id
    }

    pub fn is_current(&self, stream_id: u64) -> bool {
        self.current_stream_id() == stream_id
    }

    /// Drop the token for `stream_id` without cancelling it.
    pub fn finish(&self, stream_id: u64) {
        let mut active = lock(&self.active);
        if active.stream_id == stream_id {
            active.token = None;
        }
    }

    pub fn interrupt(&self) -> bool {
        interrupt(&self.active)
    }

    pub fn handle(&self) -> InterruptHandle {
        InterruptHandle {
            active: Arc::clone(&self.active),
        }
    }
}

fn interrupt(slot: &Mutex<ActiveStream>) -> bool {
    let mut active = lock(slot);
    match active.token.take() {
        Some(token) => {
            debug!(stream_id = active.stream_id, "interrupting stream");
            token.cancel();
            true
        }
        None => false,
    }
}

/// Cloneable handle for interrupting from another task, e.g. a Ctrl-C
/// listener.
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    active: Arc<Mutex<ActiveStream>>,
}

impl InterruptHandle {
    /// Cancel the streaming session, if any. Returns whether anything was
    /// cancelled.
    pub fn interrupt(&self) -> bool {
        interrupt(&self.active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_without_stream_is_noop() {
        let controller = CancellationController::new();
        assert!(!controller.interrupt());
        assert!(!controller.handle().interrupt());
    }

    #[test]
    fn second_stream_is_refused_while_first_is_live() {
        let controller = CancellationController::new();
        let (first, first_id) = controller.start_stream().expect("first");

        assert!(controller.start_stream().is_none());
        assert!(!first.is_cancelled());
        assert!(controller.is_current(first_id));

        controller.finish(first_id);
        let (second, second_id) = controller.start_stream().expect("second");
        assert!(!second.is_cancelled());
        assert!(second_id > first_id);
        assert!(!controller.is_current(first_id));
    }

    #[test]
    fn handle_cancels_once() {
        let controller = CancellationController::new();
        let handle = controller.handle();
        let (token, _) = controller.start_stream().expect("stream");

        assert!(handle.clone().interrupt());
        assert!(token.is_cancelled());
        assert!(!handle.interrupt());
    }

    #[test]
    fn finish_releases_token_without_cancelling() {
        let controller = CancellationController::new();
        let (token, id) = controller.start_stream().expect("stream");
        controller.finish(id);

        assert!(!controller.interrupt());
        assert!(!token.is_cancelled());
    }
}
