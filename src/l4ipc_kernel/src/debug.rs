//! Kernel introspection
use alloc::vec::Vec;
use core::fmt;

use crate::{
    error::BadContextError,
    klock::lock_cpu,
    thread::{present_accessor, reported_flags, ThreadCb, ThreadFlags, ThreadSt},
    timeout::{owner_of, timeout_queue_accessor, TimeoutEntry, TimeoutKind},
    utils::intrusive_list::ListAccessor,
    wait, KernelTraits, KernelState, Priority, Tick, Uid,
};

/// A thread as seen by [`KernelState::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub uid: Uid,
    pub state: ThreadSt,
    pub flags: ThreadFlags,
    pub prio: Priority,
    /// The senders blocked on this thread, in queue order.
    pub senders: Vec<Uid>,
}

/// An armed deadline as seen by [`KernelState::snapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutInfo {
    pub owner: Uid,
    pub kind: TimeoutKind,
    pub at: Tick,
}

/// A copy of the kernel's registries taken at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSnapshot {
    pub now: Tick,
    /// The present registry, in registry order.
    pub threads: Vec<ThreadInfo>,
    /// The deadline queue, in firing order.
    pub timeouts: Vec<TimeoutInfo>,
}

impl KernelSnapshot {
    /// Iterate over the non-empty wait queues.
    pub fn wait_queues(&self) -> impl Iterator<Item = (Uid, &[Uid])> + '_ {
        self.threads
            .iter()
            .filter(|t| !t.senders.is_empty())
            .map(|t| (t.uid, &t.senders[..]))
    }

    pub fn thread(&self, uid: Uid) -> Option<&ThreadInfo> {
        self.threads.iter().find(|t| t.uid == uid)
    }
}

impl fmt::Display for KernelSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "clock: {}", self.now)?;
        writeln!(f, "{:<20} {:<10} {:>4}  flags", "thread", "state", "prio")?;
        for t in self.threads.iter() {
            writeln!(
                f,
                "{:<20} {:<10} {:>4}  {:?}",
                alloc::format!("{:?}", t.uid),
                alloc::format!("{:?}", t.state),
                t.prio,
                t.flags
            )?;
            if !t.senders.is_empty() {
                writeln!(f, "    senders: {:?}", t.senders)?;
            }
        }
        for t in self.timeouts.iter() {
            writeln!(f, "timeout {:?} {:?} at {}", t.owner, t.kind, t.at)?;
        }
        Ok(())
    }
}

impl<Traits: KernelTraits> KernelState<Traits> {
    /// Take a snapshot of the present registry, the wait queues, and the
    /// deadline queue.
    ///
    /// Fails with [`BadContextError::BadContext`] if the kernel lock is
    /// already held.
    pub fn snapshot(&self) -> Result<KernelSnapshot, BadContextError> {
        let mut lock = lock_cpu(self.port())?;

        let present: Vec<_> = present_accessor!(self, lock.borrow_mut())
            .iter()
            .map(|(thread, _)| thread)
            .collect();

        let threads = present
            .into_iter()
            .map(|thread| {
                let senders = wait::senders(self, lock.borrow_mut(), thread)
                    .into_iter()
                    .map(|snd| self.threads[snd].uid.get(&*lock))
                    .collect();
                let flags = reported_flags(self, lock.borrow_mut(), thread);
                let cb = &self.threads[thread];
                ThreadInfo {
                    uid: cb.uid.get(&*lock),
                    state: cb.st.get(&*lock),
                    flags,
                    prio: cb.prio.get(&*lock),
                    senders,
                }
            })
            .collect();

        let timeouts = {
            let accessor = timeout_queue_accessor!(self, lock.borrow_mut());
            let key = &**accessor.cell_key();
            accessor
                .iter()
                .map(|(timeout, entry)| TimeoutInfo {
                    owner: self.threads[owner_of(timeout)].uid.get(key),
                    kind: entry.kind.get(key),
                    at: entry.at.get(key),
                })
                .collect()
        };

        Ok(KernelSnapshot {
            now: self.port().tick_count(),
            threads,
            timeouts,
        })
    }
}
