use parking_lot::Mutex;

/// Session lifecycle (§4.6.1): `start()` moves `Initialized -> Executing`
/// and runs the session loop; `stop()` is callable from any thread, at any
/// time, and is idempotent (P8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initialized,
    Executing,
    Stopping,
    Stopped,
}

pub struct SessionStateCell(Mutex<SessionState>);

impl Default for SessionStateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateCell {
    pub fn new() -> Self {
        Self(Mutex::new(SessionState::Initialized))
    }

    /// `true` iff this call performed the `Initialized -> Executing`
    /// transition. A second call (P8: `start()` after `stop()`) fails.
    pub fn try_start(&self) -> bool {
        let mut state = self.0.lock();
        if *state == SessionState::Initialized {
            *state = SessionState::Executing;
            true
        } else {
            false
        }
    }

    pub fn request_stop(&self) {
        let mut state = self.0.lock();
        if *state == SessionState::Executing {
            *state = SessionState::Stopping;
        }
    }

    pub fn is_stopping(&self) -> bool {
        *self.0.lock() == SessionState::Stopping
    }

    pub fn finish(&self) {
        *self.0.lock() = SessionState::Stopped;
    }

    pub fn get(&self) -> SessionState {
        *self.0.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_before_start_is_a_no_op_and_start_then_fails() {
        let cell = SessionStateCell::new();
        cell.request_stop();
        assert_eq!(cell.get(), SessionState::Initialized);
        assert!(cell.try_start());
    }

    #[test]
    fn stop_is_idempotent_and_start_after_stop_is_rejected() {
        let cell = SessionStateCell::new();
        assert!(cell.try_start());
        cell.request_stop();
        cell.request_stop();
        assert_eq!(cell.get(), SessionState::Stopping);
        cell.finish();
        assert!(!cell.try_start());
    }
}
