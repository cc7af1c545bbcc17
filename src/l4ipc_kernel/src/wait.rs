//! Priority wait queues
//!
//! Every thread owns a [`WaitQueue`] of senders blocked on it. A blocked
//! sender links itself into its receiver's queue through its own
//! [`WaitQueueLink`]. Queues are ordered by priority (numerically higher
//! first), and by arrival within a priority band.
use alloc::vec::Vec;

use crate::{
    klock::{CpuLockCell, CpuLockTokenRefMut},
    state::KernelState,
    thread::{ThreadCb, ThreadIdx},
    utils::intrusive_list::{Link, ListAccessor, ListHead},
    KernelTraits, Priority,
};

/// The receiver-role half of a thread: the senders blocked on it.
pub(crate) struct WaitQueue<Traits> {
    pub(crate) head: CpuLockCell<Traits, ListHead<ThreadIdx>>,
}

/// The sender-role half of a thread: its membership in a receiver's
/// [`WaitQueue`].
pub(crate) struct WaitQueueLink<Traits> {
    pub(crate) link: CpuLockCell<Traits, Option<Link<ThreadIdx>>>,
    /// The receiver whose queue `link` belongs to.
    pub(crate) queue: CpuLockCell<Traits, Option<ThreadIdx>>,
}

impl<Traits> WaitQueue<Traits> {
    pub(crate) const fn new() -> Self {
        Self {
            head: CpuLockCell::new(ListHead::new()),
        }
    }
}

impl<Traits> WaitQueueLink<Traits> {
    pub(crate) const fn new() -> Self {
        Self {
            link: CpuLockCell::new(None),
            queue: CpuLockCell::new(None),
        }
    }
}

/// Get a `ListAccessor` used to access the wait queue of `$receiver`.
macro_rules! wait_queue_accessor {
    ($state:expr, $receiver:expr, $key:expr) => {
        ListAccessor::new(
            &$state.threads[$receiver].senders.head,
            &*$state.threads,
            |cb: &ThreadCb<_>| &cb.sender_link.link,
            $key,
        )
    };
}

/// Insert `sender` into the wait queue of `receiver`, after every sender
/// whose priority is higher than or equal to its own.
pub(crate) fn enqueue<Traits: KernelTraits>(
    state: &KernelState<Traits>,
    mut lock: CpuLockTokenRefMut<'_, Traits>,
    receiver: ThreadIdx,
    sender: ThreadIdx,
) {
    debug_assert_ne!(receiver, sender);
    debug_assert!(state.threads[sender]
        .sender_link
        .queue
        .read(&*lock)
        .is_none());

    let prio = state.threads[sender].prio.get(&*lock);
    let mut accessor = wait_queue_accessor!(state, receiver, lock.borrow_mut());

    // Scan from the back for the earliest position all of whose successors
    // have a lower priority
    let mut insert_at = None;
    let mut cursor = accessor.back();
    while let Some(next_cursor) = cursor {
        let next_cursor_prio = *accessor.pool()[next_cursor]
            .prio
            .read(&**accessor.cell_key());
        if next_cursor_prio < prio {
            insert_at = Some(next_cursor);
            cursor = accessor.prev(next_cursor);
        } else {
            break;
        }
    }

    accessor.insert(sender, insert_at);

    state.threads[sender]
        .sender_link
        .queue
        .replace(&mut *lock, Some(receiver));
}

/// Remove `sender` from whichever wait queue it's in. Returns `false` if it
/// wasn't in any.
pub(crate) fn dequeue<Traits: KernelTraits>(
    state: &KernelState<Traits>,
    mut lock: CpuLockTokenRefMut<'_, Traits>,
    sender: ThreadIdx,
) -> bool {
    let receiver = match state.threads[sender]
        .sender_link
        .queue
        .replace(&mut *lock, None)
    {
        Some(receiver) => receiver,
        None => return false,
    };

    wait_queue_accessor!(state, receiver, lock.borrow_mut()).remove(sender);
    true
}

/// Remove `sender` from the wait queue of `receiver` only if it's the head of
/// that queue. Returns `true` on success.
pub(crate) fn dequeue_head<Traits: KernelTraits>(
    state: &KernelState<Traits>,
    mut lock: CpuLockTokenRefMut<'_, Traits>,
    receiver: ThreadIdx,
    sender: ThreadIdx,
) -> bool {
    if front(state, lock.borrow_mut(), receiver) != Some(sender) {
        return false;
    }
    dequeue(state, lock, sender)
}

/// Change the priority of `sender` to `prio`, repositioning it in its wait
/// queue if it's in one.
pub(crate) fn update_priority<Traits: KernelTraits>(
    state: &KernelState<Traits>,
    mut lock: CpuLockTokenRefMut<'_, Traits>,
    sender: ThreadIdx,
    prio: Priority,
) {
    let cb = &state.threads[sender];
    if cb.prio.replace(&mut *lock, prio) == prio {
        return;
    }

    if let Some(receiver) = cb.sender_link.queue.get(&*lock) {
        dequeue(state, lock.borrow_mut(), sender);
        enqueue(state, lock.borrow_mut(), receiver, sender);
    }
}

/// Get the next sender `receiver` will be matched against.
pub(crate) fn front<Traits: KernelTraits>(
    state: &KernelState<Traits>,
    lock: CpuLockTokenRefMut<'_, Traits>,
    receiver: ThreadIdx,
) -> Option<ThreadIdx> {
    wait_queue_accessor!(state, receiver, lock).front()
}

/// List the senders in the wait queue of `receiver`, in queue order.
pub(crate) fn senders<Traits: KernelTraits>(
    state: &KernelState<Traits>,
    lock: CpuLockTokenRefMut<'_, Traits>,
    receiver: ThreadIdx,
) -> Vec<ThreadIdx> {
    let accessor = wait_queue_accessor!(state, receiver, lock);
    accessor.iter().map(|(thread, _)| thread).collect()
}
