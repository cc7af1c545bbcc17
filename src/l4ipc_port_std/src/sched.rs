//! The simulated scheduler
//!
//! A single simulated CPU with a FIFO ready queue. The kernel reports every
//! change of a thread's readiness through the `Port*` callbacks; the
//! simulator's driver picks the next thread to run with [`SchedState::choose`].
use l4ipc_kernel::Uid;
use std::collections::VecDeque;

#[derive(Debug, Default)]
pub(crate) struct SchedState {
    /// Threads waiting for the CPU, in dispatch order. Never contains
    /// `running`.
    ready: VecDeque<Uid>,
    running: Option<Uid>,
}

impl SchedState {
    pub(crate) fn running(&self) -> Option<Uid> {
        self.running
    }

    pub(crate) fn ready(&self) -> impl Iterator<Item = Uid> + '_ {
        self.ready.iter().copied()
    }

    fn remove(&mut self, thread: Uid) {
        self.ready.retain(|&t| t != thread);
    }

    pub(crate) fn make_runnable(&mut self, thread: Uid) {
        if self.running == Some(thread) || self.ready.contains(&thread) {
            return;
        }
        self.ready.push_back(thread);
    }

    /// Put `thread` at the front of the ready queue.
    pub(crate) fn hand_off(&mut self, thread: Uid) {
        if self.running == Some(thread) {
            return;
        }
        self.remove(thread);
        self.ready.push_front(thread);
    }

    pub(crate) fn leave_ready_set(&mut self, thread: Uid) {
        self.remove(thread);
        if self.running == Some(thread) {
            self.running = None;
        }
    }

    /// Move `thread` to the back of the ready queue.
    pub(crate) fn preempt(&mut self, thread: Uid) {
        if self.running == Some(thread) {
            self.running = None;
        } else if self.ready.contains(&thread) {
            self.remove(thread);
        } else {
            // Blocked
            return;
        }
        self.ready.push_back(thread);
    }

    /// Get the running thread, choosing one from the ready queue if the CPU
    /// is free.
    pub(crate) fn choose(&mut self) -> Option<Uid> {
        if self.running.is_none() {
            self.running = self.ready.pop_front();
        }
        self.running
    }
}
