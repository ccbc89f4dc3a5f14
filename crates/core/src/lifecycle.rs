use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// The stage a chunk is at.
///
/// ```text
/// Empty -> Populated -> Registered -> PendingUnload -> ResourcesReleased -> Destroyed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChunkState {
    /// The chunk was just created and holds nothing.
    Empty,
    /// The chunk was generated or deserialized, but is not part of a city yet.
    Populated,
    /// The chunk is part of a city and may be drawn.
    Registered,
    /// The chunk was removed from its city. The render thread must release the resources it
    /// created for the chunk before it can be torn down.
    PendingUnload,
    /// The render thread released its resources. The chunk is safe to delete.
    ResourcesReleased,
    /// The graph elements of the chunk were released.
    Destroyed,
}

/// The state machine driving a chunk through its [`ChunkState`]s.
///
/// Every transition wakes up the threads waiting on the chunk, which is how the worker thread
/// learns that the render thread finished releasing its resources.
pub struct Lifecycle {
    state: Mutex<ChunkState>,
    condvar: Condvar,
}

impl Default for Lifecycle {
    #[inline]
    fn default() -> Self {
        Self {
            state: Mutex::new(ChunkState::Empty),
            condvar: Condvar::new(),
        }
    }
}

impl Lifecycle {
    /// Returns the current state.
    #[inline]
    pub fn state(&self) -> ChunkState {
        *self.state.lock()
    }

    /// Moves to `to` if the current state is one of `from`.
    ///
    /// Returns whether the transition happened.
    pub fn transition(&self, from: &[ChunkState], to: ChunkState) -> bool {
        let mut state = self.state.lock();
        if !from.contains(&*state) {
            return false;
        }
        *state = to;
        self.condvar.notify_all();
        true
    }

    /// Blocks until the chunk is safe to delete, or until `timeout` elapses.
    ///
    /// Returns whether the chunk is safe to delete.
    pub fn wait_until_released(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if *state < ChunkState::ResourcesReleased {
            // Spurious wake-ups only shorten the wait, the caller loops anyway.
            let _ = self.condvar.wait_for(&mut state, timeout);
        }
        *state >= ChunkState::ResourcesReleased
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn transitions_are_checked() {
        let lc = Lifecycle::default();
        assert!(!lc.transition(&[ChunkState::Registered], ChunkState::PendingUnload));
        assert!(lc.transition(&[ChunkState::Empty], ChunkState::Populated));
        assert_eq!(lc.state(), ChunkState::Populated);
    }

    #[test]
    fn waiting_times_out_without_a_release() {
        let lc = Lifecycle::default();
        lc.transition(&[ChunkState::Empty], ChunkState::PendingUnload);
        assert!(!lc.wait_until_released(Duration::from_millis(5)));
    }

    #[test]
    fn release_from_another_thread_wakes_the_waiter() {
        let lc = Arc::new(Lifecycle::default());
        lc.transition(&[ChunkState::Empty], ChunkState::PendingUnload);

        let other = Arc::clone(&lc);
        let render = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            other.transition(&[ChunkState::PendingUnload], ChunkState::ResourcesReleased)
        });

        let mut released = false;
        for _ in 0..200 {
            if lc.wait_until_released(Duration::from_millis(50)) {
                released = true;
                break;
            }
        }
        assert!(render.join().unwrap());
        assert!(released);
    }
}
