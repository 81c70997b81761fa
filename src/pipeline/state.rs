use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::Failure;

/// Lifecycle of a pipeline session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineState {
    #[default]
    Stopped,
    Starting,
    Running,
    /// Running on the CPU fallback
    Degraded,
    Stopping,
    Failed,
}

impl PipelineState {
    /// True while a session owns devices
    pub fn is_active(self) -> bool {
        matches!(
            self,
            PipelineState::Starting
                | PipelineState::Running
                | PipelineState::Degraded
                | PipelineState::Stopping
        )
    }

    /// Producing frames
    pub fn is_streaming(self) -> bool {
        matches!(self, PipelineState::Running | PipelineState::Degraded)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Stopped | PipelineState::Failed)
    }

    fn allows(self, to: PipelineState) -> bool {
        use PipelineState::*;
        match (self, to) {
            (_, Failed) => self != Failed,
            (Stopped | Failed, Starting) => true,
            (Starting, Running | Degraded) => true,
            (Running, Degraded) | (Degraded, Running) => true,
            (Starting | Running | Degraded, Stopping) => true,
            (Stopping, Stopped) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Stopped => "stopped",
            PipelineState::Starting => "starting",
            PipelineState::Running => "running",
            PipelineState::Degraded => "degraded",
            PipelineState::Stopping => "stopping",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
struct Inner {
    state: PipelineState,
    failure: Option<Failure>,
}

/// State machine guarded by a mutex, with a condvar for waiters
#[derive(Debug, Default)]
pub(crate) struct StateCell {
    inner: Mutex<Inner>,
    changed: Condvar,
}

impl StateCell {
    pub fn get(&self) -> PipelineState {
        self.inner.lock().state
    }

    pub fn failure(&self) -> Option<Failure> {
        self.inner.lock().failure.clone()
    }

    /// Apply a transition if the table allows it; returns the previous state
    pub fn transition(&self, to: PipelineState) -> Option<PipelineState> {
        let mut inner = self.inner.lock();
        let from = inner.state;
        if !from.allows(to) {
            return None;
        }
        inner.state = to;
        if to == PipelineState::Starting {
            inner.failure = None;
        }
        self.changed.notify_all();
        Some(from)
    }

    /// Enter `Failed`, keeping the first failure of the session
    pub fn fail(&self, failure: Failure) -> Option<PipelineState> {
        let mut inner = self.inner.lock();
        let from = inner.state;
        if !from.allows(PipelineState::Failed) {
            return None;
        }
        inner.state = PipelineState::Failed;
        inner.failure.get_or_insert(failure);
        self.changed.notify_all();
        Some(from)
    }

    /// Block until `predicate` holds or `timeout` passes; returns the predicate's last value
    pub fn wait_for(&self, predicate: impl Fn(PipelineState) -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        while !predicate(inner.state) {
            if self.changed.wait_until(&mut inner, deadline).timed_out() {
                return predicate(inner.state);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Stage};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_lifecycle_transitions() {
        let cell = StateCell::default();
        assert_eq!(cell.get(), PipelineState::Stopped);
        assert!(cell.transition(PipelineState::Running).is_none());
        assert_eq!(cell.transition(PipelineState::Starting), Some(PipelineState::Stopped));
        assert!(cell.transition(PipelineState::Running).is_some());
        assert!(cell.transition(PipelineState::Degraded).is_some());
        assert!(cell.transition(PipelineState::Stopping).is_some());
        assert!(cell.transition(PipelineState::Running).is_none());
        assert!(cell.transition(PipelineState::Stopped).is_some());
    }

    #[test]
    fn test_active_states_are_not_terminal() {
        use PipelineState::*;
        for state in [Stopped, Starting, Running, Degraded, Stopping, Failed] {
            assert_ne!(state.is_active(), state.is_terminal(), "{}", state);
        }
        assert!(Stopping.is_active());
        assert!(!Stopping.is_streaming());
    }

    #[test]
    fn test_failure_kept_until_restart() {
        let cell = StateCell::default();
        cell.transition(PipelineState::Starting);
        cell.fail(Failure::new(Stage::Sink, Error::SinkUnavailable("gone".into())));
        assert!(cell.fail(Failure::new(Stage::Capture, Error::SinkBackpressure)).is_none());
        assert_eq!(cell.failure().unwrap().stage, Stage::Sink);

        cell.transition(PipelineState::Starting);
        assert!(cell.failure().is_none());
    }

    #[test]
    fn test_wait_for_wakes_on_change() {
        let cell = Arc::new(StateCell::default());
        let waiter = {
            let cell = cell.clone();
            thread::spawn(move || cell.wait_for(|s| s == PipelineState::Running, Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        cell.transition(PipelineState::Starting);
        cell.transition(PipelineState::Running);
        assert!(waiter.join().unwrap());
        assert!(!cell.wait_for(|s| s == PipelineState::Failed, Duration::from_millis(10)));
    }
}
