//! The deadline queue
//!
//! Every thread slot owns two entries. The first one carries the deadline of
//! the thread's current IPC operation, the second one its preemption deadline.
//! Armed entries are linked into a single list sorted by wakeup time, which
//! [`do_timeouts`] drains from the head on every tick.
//!
//! An entry's [`TimeoutFlags::QUEUED`] flag is set if and only if the entry is
//! linked. [`TimeoutFlags::FIRED`] is set when the entry expires and is cleared
//! only by the next [`set`].
use bitflags::bitflags;

use crate::{
    ipc,
    klock::{CpuLockCell, CpuLockTokenRefMut},
    state::KernelState,
    thread::ThreadIdx,
    utils::intrusive_list::{Link, ListAccessor},
    KernelTraits, ThreadOpError, Tick, TickDelta, Uid,
};


/// Index of an entry in [`KernelState::timeouts`].
pub(crate) type TimeoutIdx = usize;

bitflags! {
    /// The state of a deadline queue entry.
    pub struct TimeoutFlags: u8 {
        /// The entry is linked into the deadline queue.
        const QUEUED = 1 << 0;
        /// The entry's deadline has passed since it was last armed.
        const FIRED = 1 << 1;
    }
}

impl TimeoutFlags {
    #[inline]
    pub fn is_queued(self) -> bool {
        self.contains(Self::QUEUED)
    }

    #[inline]
    pub fn has_fired(self) -> bool {
        self.contains(Self::FIRED)
    }
}

/// The purpose of a deadline queue entry. Determines what happens when the
/// entry expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeoutKind {
    /// Abort a blocked send.
    IpcSend,
    /// Abort a blocked receive.
    IpcReceive,
    /// Tell the scheduler the thread's time is up.
    Preemption,
}

/// A deadline queue entry.
pub(crate) struct TimeoutEntry<Traits> {
    /// The wakeup time.
    pub(crate) at: CpuLockCell<Traits, Tick>,
    pub(crate) flags: CpuLockCell<Traits, TimeoutFlags>,
    pub(crate) kind: CpuLockCell<Traits, TimeoutKind>,
    pub(crate) link: CpuLockCell<Traits, Option<Link<TimeoutIdx>>>,
}

impl<Traits> TimeoutEntry<Traits> {
    pub(crate) const fn new(kind: TimeoutKind) -> Self {
        Self {
            at: CpuLockCell::new(0),
            flags: CpuLockCell::new(TimeoutFlags::empty()),
            kind: CpuLockCell::new(kind),
            link: CpuLockCell::new(None),
        }
    }
}

/// The entry holding the IPC deadline of `thread`.
#[inline]
pub(crate) const fn ipc_timeout_of(thread: ThreadIdx) -> TimeoutIdx {
    thread * 2
}

/// The entry holding the preemption deadline of `thread`.
#[inline]
pub(crate) const fn preemption_timeout_of(thread: ThreadIdx) -> TimeoutIdx {
    thread * 2 + 1
}

/// The thread slot owning `timeout`.
#[inline]
pub(crate) const fn owner_of(timeout: TimeoutIdx) -> ThreadIdx {
    timeout / 2
}

/// Get a `ListAccessor` used to access the deadline queue.
macro_rules! timeout_queue_accessor {
    ($state:expr, $key:expr) => {
        ListAccessor::new(
            &$state.timeout_queue,
            &*$state.timeouts,
            |entry: &TimeoutEntry<_>| &entry.link,
            $key,
        )
    };
}

pub(crate) use timeout_queue_accessor;

/// Arm `timeout` to expire at `at`.
///
/// Panics if the entry is already armed.
pub(crate) fn set<Traits: KernelTraits>(
    state: &KernelState<Traits>,
    mut lock: CpuLockTokenRefMut<'_, Traits>,
    timeout: TimeoutIdx,
    at: Tick,
) {
    let entry = &state.timeouts[timeout];
    assert!(
        !entry.flags.get(&*lock).is_queued(),
        "timeout is already registered"
    );

    entry.at.replace(&mut *lock, at);
    entry.flags.replace(&mut *lock, TimeoutFlags::QUEUED);

    // Insert before the first entry that expires at the same time or later
    let mut accessor = timeout_queue_accessor!(state, lock.borrow_mut());
    let mut insert_at = accessor.front();
    while let Some(cursor) = insert_at {
        if *accessor.pool()[cursor].at.read(&**accessor.cell_key()) >= at {
            break;
        }
        insert_at = accessor.next(cursor);
    }
    accessor.insert(timeout, insert_at);

    log::trace!("timeout {} armed for {}", timeout, at);
}

/// Disarm `timeout`. Does nothing if it isn't armed.
pub(crate) fn reset<Traits: KernelTraits>(
    state: &KernelState<Traits>,
    mut lock: CpuLockTokenRefMut<'_, Traits>,
    timeout: TimeoutIdx,
) {
    let entry = &state.timeouts[timeout];
    if !entry.flags.get(&*lock).is_queued() {
        return;
    }

    timeout_queue_accessor!(state, lock.borrow_mut()).remove(timeout);
    entry.flags.write(&mut *lock).remove(TimeoutFlags::QUEUED);

    log::trace!("timeout {} reset", timeout);
}

/// Re-arm `timeout` with its previous wakeup time unless it has fired since
/// it was last armed. Returns `true` if the entry was armed.
pub(crate) fn set_again<Traits: KernelTraits>(
    state: &KernelState<Traits>,
    mut lock: CpuLockTokenRefMut<'_, Traits>,
    timeout: TimeoutIdx,
) -> bool {
    let entry = &state.timeouts[timeout];
    if entry
        .flags
        .read(&*lock)
        .intersects(TimeoutFlags::QUEUED | TimeoutFlags::FIRED)
    {
        return false;
    }

    let at = entry.at.get(&*lock);
    set(state, lock.borrow_mut(), timeout, at);
    true
}

/// Get the time remaining until `timeout` expires. The result is negative if
/// the wakeup time has already passed.
pub(crate) fn get_timeout<Traits: KernelTraits>(
    state: &KernelState<Traits>,
    lock: CpuLockTokenRefMut<'_, Traits>,
    timeout: TimeoutIdx,
) -> TickDelta {
    let at = state.timeouts[timeout].at.get(&*lock);
    at.wrapping_sub(state.port().tick_count()) as TickDelta
}

/// Expire every entry whose wakeup time is not later than the current clock
/// value, earliest first.
///
/// Returns `true` if any of the expired entries requests a reschedule.
pub(crate) fn do_timeouts<Traits: KernelTraits>(
    state: &KernelState<Traits>,
    mut lock: CpuLockTokenRefMut<'_, Traits>,
) -> bool {
    let now = state.port().tick_count();
    let mut reschedule = false;

    loop {
        let mut accessor = timeout_queue_accessor!(state, lock.borrow_mut());
        let head = match accessor.front() {
            Some(head) => head,
            None => break,
        };
        if *accessor.pool()[head].at.read(&**accessor.cell_key()) > now {
            break;
        }
        accessor.pop_front();

        state.timeouts[head]
            .flags
            .replace(&mut *lock, TimeoutFlags::FIRED);

        reschedule |= expired(state, lock.borrow_mut(), head);
    }

    reschedule
}

fn expired<Traits: KernelTraits>(
    state: &KernelState<Traits>,
    mut lock: CpuLockTokenRefMut<'_, Traits>,
    timeout: TimeoutIdx,
) -> bool {
    let thread = owner_of(timeout);
    let kind = state.timeouts[timeout].kind.get(&*lock);
    log::trace!("timeout {} ({:?}) expired", timeout, kind);

    match kind {
        TimeoutKind::IpcSend | TimeoutKind::IpcReceive => {
            ipc::abort_on_timeout(state, lock.borrow_mut(), thread, kind)
        }
        TimeoutKind::Preemption => {
            let uid = state.threads[thread].uid.get(&*lock);
            state.port().preempt(uid);
            true
        }
    }
}

impl<Traits: KernelTraits> KernelState<Traits> {
    /// Process the deadline queue. Called by the port once per timer tick.
    ///
    /// Returns `true` if the scheduler should reschedule.
    pub fn handle_tick(&self) -> Result<bool, crate::BadContextError> {
        let mut lock = crate::klock::lock_cpu(self.port())?;
        Ok(do_timeouts(self, lock.borrow_mut()))
    }

    /// Arm the preemption deadline of `thread`, replacing the previous one.
    pub fn set_preemption_deadline(&self, thread: Uid, at: Tick) -> Result<(), ThreadOpError> {
        let mut lock = crate::klock::lock_cpu(self.port())?;
        let thread = self.find(lock.borrow_mut(), thread)?;
        let timeout = preemption_timeout_of(thread);
        reset(self, lock.borrow_mut(), timeout);
        set(self, lock.borrow_mut(), timeout, at);
        Ok(())
    }

    /// Disarm the preemption deadline of `thread`.
    pub fn cancel_preemption_deadline(&self, thread: Uid) -> Result<(), ThreadOpError> {
        let mut lock = crate::klock::lock_cpu(self.port())?;
        let thread = self.find(lock.borrow_mut(), thread)?;
        reset(self, lock.borrow_mut(), preemption_timeout_of(thread));
        Ok(())
    }

    /// Re-arm the preemption deadline of `thread` with its previous wakeup
    /// time, unless it has already fired. Returns `true` if it was armed.
    pub fn rearm_preemption_deadline(&self, thread: Uid) -> Result<bool, ThreadOpError> {
        let mut lock = crate::klock::lock_cpu(self.port())?;
        let thread = self.find(lock.borrow_mut(), thread)?;
        Ok(set_again(
            self,
            lock.borrow_mut(),
            preemption_timeout_of(thread),
        ))
    }

    /// Get the state of the deadline queue entry of `thread` for `kind`.
    /// [`TimeoutKind::IpcSend`] and [`TimeoutKind::IpcReceive`] share one
    /// entry.
    pub fn timeout_flags(&self, thread: Uid, kind: TimeoutKind) -> Result<TimeoutFlags, ThreadOpError> {
        let mut lock = crate::klock::lock_cpu(self.port())?;
        let thread = self.find(lock.borrow_mut(), thread)?;
        let timeout = match kind {
            TimeoutKind::IpcSend | TimeoutKind::IpcReceive => ipc_timeout_of(thread),
            TimeoutKind::Preemption => preemption_timeout_of(thread),
        };
        Ok(self.timeouts[timeout].flags.get(&*lock))
    }

    /// Get the time remaining until the deadline of `thread` for `kind`
    /// expires, or `None` if the deadline isn't armed.
    pub fn remaining_time(
        &self,
        thread: Uid,
        kind: TimeoutKind,
    ) -> Result<Option<TickDelta>, ThreadOpError> {
        let mut lock = crate::klock::lock_cpu(self.port())?;
        let thread = self.find(lock.borrow_mut(), thread)?;
        let timeout = match kind {
            TimeoutKind::IpcSend | TimeoutKind::IpcReceive => ipc_timeout_of(thread),
            TimeoutKind::Preemption => preemption_timeout_of(thread),
        };
        let entry = &self.timeouts[timeout];
        if entry.flags.get(&*lock).is_queued() {
            Ok(Some(get_timeout(self, lock.borrow_mut(), timeout)))
        } else {
            Ok(None)
        }
    }
}
