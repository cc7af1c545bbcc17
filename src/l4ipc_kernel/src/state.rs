//! The kernel state
use alloc::boxed::Box;
use core::{fmt, ops::Range};

use crate::{
    cfg::num_thread_slots,
    error::BadIdError,
    klock::{CpuLockCell, CpuLockTokenRefMut},
    thread::{TaskCb, ThreadCb, ThreadIdx, ThreadSt},
    timeout::{TimeoutEntry, TimeoutIdx, TimeoutKind},
    utils::intrusive_list::ListHead,
    KernelTraits, TaskNum, Uid,
};

/// The state of a kernel instance.
///
/// Every control block lives in an arena owned by this value and is addressed
/// by its index. Queues link arena entries by index, so tearing down a thread
/// can't leave a dangling reference in any of them.
pub struct KernelState<Traits: KernelTraits> {
    port: Traits,

    /// One control block per thread slot. The slot of a [`Uid`] is
    /// `task * NUM_LTHREADS + lthread`.
    pub(crate) threads: Box<[ThreadCb<Traits>]>,

    pub(crate) tasks: Box<[TaskCb<Traits>]>,

    /// Two deadline queue entries per thread slot.
    pub(crate) timeouts: Box<[TimeoutEntry<Traits>]>,

    /// The deadline queue, sorted by wakeup time.
    pub(crate) timeout_queue: CpuLockCell<Traits, ListHead<TimeoutIdx>>,

    /// The present registry: every thread that has been created and not
    /// killed, threads of one task kept contiguous.
    pub(crate) present: CpuLockCell<Traits, ListHead<ThreadIdx>>,
}

impl<Traits: KernelTraits> KernelState<Traits> {
    /// Construct a kernel instance with no threads.
    ///
    /// # Safety
    ///
    /// All instances sharing `Traits` share one CPU Lock token type. While an
    /// operation of this instance holds its CPU Lock, no operation of another
    /// instance with the same `Traits` may run on the same thread. In
    /// particular, the hooks of `port` must not call into such an instance.
    pub unsafe fn new(port: Traits) -> Self {
        assert!(
            Traits::NUM_LTHREADS <= Uid::MAX_LTHREADS,
            "`NUM_LTHREADS` exceeds the identifier layout"
        );
        assert!(
            Traits::NUM_TASKS <= Uid::MAX_TASKS,
            "`NUM_TASKS` exceeds the identifier layout"
        );

        let num_slots = num_thread_slots::<Traits>();
        Self {
            port,
            threads: (0..num_slots).map(|_| ThreadCb::new()).collect(),
            tasks: (0..Traits::NUM_TASKS).map(|_| TaskCb::new()).collect(),
            timeouts: (0..num_slots * 2)
                .map(|i| {
                    TimeoutEntry::new(if i % 2 == 0 {
                        TimeoutKind::IpcSend
                    } else {
                        TimeoutKind::Preemption
                    })
                })
                .collect(),
            timeout_queue: CpuLockCell::new(ListHead::new()),
            present: CpuLockCell::new(ListHead::new()),
        }
    }

    /// Get a reference to the port.
    #[inline]
    pub fn port(&self) -> &Traits {
        &self.port
    }

    /// Get the slot addressed by `uid` without checking its contents.
    pub(crate) fn slot_of(&self, uid: Uid) -> Result<ThreadIdx, BadIdError> {
        if uid.is_nil() || uid.is_invalid() {
            return Err(BadIdError::NoAccess);
        }

        let (task, lthread) = (uid.task() as usize, uid.lthread() as usize);
        if task >= Traits::NUM_TASKS || lthread >= Traits::NUM_LTHREADS {
            return Err(BadIdError::NoAccess);
        }

        Ok(task * Traits::NUM_LTHREADS + lthread)
    }

    /// Get the slot of the thread named by `uid`. Fails if the slot is empty
    /// or holds another version of the thread.
    pub(crate) fn find(
        &self,
        lock: CpuLockTokenRefMut<'_, Traits>,
        uid: Uid,
    ) -> Result<ThreadIdx, BadIdError> {
        let thread = self.slot_of(uid)?;
        let cb = &self.threads[thread];
        if cb.st.get(&*lock) == ThreadSt::Invalid || cb.uid.get(&*lock) != uid {
            return Err(BadIdError::NoAccess);
        }
        Ok(thread)
    }

    /// Get the slots belonging to `task`.
    pub(crate) fn task_slots(&self, task: TaskNum) -> Range<ThreadIdx> {
        let start = task as usize * Traits::NUM_LTHREADS;
        start..start + Traits::NUM_LTHREADS
    }
}

impl<Traits: KernelTraits + fmt::Debug> fmt::Debug for KernelState<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("KernelState")
            .field("port", &self.port)
            .field("num_threads", &self.threads.len())
            .finish_non_exhaustive()
    }
}
