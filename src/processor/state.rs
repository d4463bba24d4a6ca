//! Per-run processor state shared by the dispatch loop, the control loop and
//! every handler.

use std::collections::HashSet;

use parking_lot::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    skipped: HashSet<Uuid>,
    current: Option<Uuid>,
}

/// Skip set plus the message being dispatched right now.
///
/// A skipped id stays skipped for the life of the run.
#[derive(Default)]
pub struct ProcessorState {
    inner: Mutex<Inner>,
}

impl ProcessorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_skipped(&self, msg_id: Uuid) {
        self.inner.lock().skipped.insert(msg_id);
    }

    pub fn is_skipped(&self, msg_id: Uuid) -> bool {
        self.inner.lock().skipped.contains(&msg_id)
    }

    pub fn set_current(&self, msg_id: Uuid) {
        self.inner.lock().current = Some(msg_id);
    }

    pub fn current(&self) -> Option<Uuid> {
        self.inner.lock().current
    }

    pub fn clear_current(&self) {
        self.inner.lock().current = None;
    }
}

/// Clears the current message when dropped, however dispatch ends.
pub struct CurrentGuard<'a> {
    state: &'a ProcessorState,
}

impl<'a> CurrentGuard<'a> {
    pub fn new(state: &'a ProcessorState, msg_id: Uuid) -> Self {
        state.set_current(msg_id);
        Self { state }
    }
}

impl Drop for CurrentGuard<'_> {
    fn drop(&mut self) {
        self.state.clear_current();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn skip_is_idempotent() {
        let state = ProcessorState::new();
        let id = Uuid::new_v4();
        assert!(!state.is_skipped(id));
        state.add_skipped(id);
        state.add_skipped(id);
        assert!(state.is_skipped(id));
        assert!(!state.is_skipped(Uuid::new_v4()));
    }

    #[test]
    fn guard_clears_current() {
        let state = ProcessorState::new();
        let id = Uuid::new_v4();
        {
            let _guard = CurrentGuard::new(&state, id);
            assert_eq!(state.current(), Some(id));
        }
        assert_eq!(state.current(), None);
    }

    #[test]
    fn concurrent_access() {
        let state = Arc::new(ProcessorState::new());
        let ids: Vec<Uuid> = (0..64).map(|_| Uuid::new_v4()).collect();
        let handles: Vec<_> = ids
            .chunks(16)
            .map(|chunk| {
                let state = state.clone();
                let chunk = chunk.to_vec();
                std::thread::spawn(move || {
                    for id in chunk {
                        state.set_current(id);
                        state.add_skipped(id);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(ids.iter().all(|id| state.is_skipped(*id)));
        assert!(state.current().is_some());
    }
}
