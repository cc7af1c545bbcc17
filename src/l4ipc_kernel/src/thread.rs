//! Threads
//!
//! # Thread States
//!
//! A thread slot is **Invalid** until a thread is created in it. A new thread
//! is **Dead**: it's linked into the present registry and counted by its task,
//! but it doesn't take part in scheduling or IPC until it's started. A started
//! thread is **Running** unless it's blocked in an IPC operation (**Sending**
//! or **Receiving**). Killing a thread tears it down and returns its slot to
//! Invalid.
//!
//! The transitions are drawn in the documentation of [`ThreadSt`].
//!
//! # Thread Lock and Kill
//!
//! A thread may only be killed by the owner of its lock. The owner acquires the
//! lock by [`KernelState::try_lock_thread`]; every thread counts the locks it
//! holds. A thread that still holds locks can't be torn down, so killing it
//! only marks it and returns [`KillStatus::Deferred`]. The kill completes when
//! the thread's last [`KernelState::unlock_thread`] drains its count to zero.
use bitflags::bitflags;

use crate::{
    error::{
        BadContextError, CreateThreadError, KillError, LockThreadError, ThreadOpError,
        UnlockThreadError,
    },
    ipc::{self, IpcCb},
    klock::{lock_cpu, CpuLockCell, CpuLockTokenRefMut},
    state::KernelState,
    timeout,
    utils::intrusive_list::{Link, ListAccessor},
    wait::{self, WaitQueue, WaitQueueLink},
    IrqNum, KernelCfg, KernelTraits, Priority, TaskNum, Tick, Uid,
};

#[cfg(test)]
mod tests;

/// Index of a thread slot in [`KernelState::threads`].
pub(crate) type ThreadIdx = usize;

/// The primary state of a thread slot.
///
/// <center>
///
#[doc = svgbobdoc::transform!(
/// ```svgbob
///  .---------.  create   .------.  start   .---------.
///  | Invalid |---------->| Dead |--------->| Running |<-----.
///  '---------'           '------'          '---------'      |
///       ^                   |               |       |       | rendezvous,
///       |                   |          send |       | recv  | timeout,
///       |       kill        |               v       v       | cancel
///       +-------------------'        .---------. .-----------.
///       |                            | Sending | | Receiving |
///       |            kill            '---------' '-----------'
///       '---------------------------------+-------------'
/// ```
)]
///
/// </center>
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadSt {
    /// The slot doesn't hold a thread.
    Invalid,
    /// The thread was created but hasn't been started.
    Dead,
    /// The thread is runnable or running.
    Running,
    /// The thread is blocked in a receiver's wait queue.
    Sending,
    /// The thread is blocked waiting for a sender.
    Receiving,
}

impl ThreadSt {
    /// Return a flag indicating whether the thread has been started and not
    /// killed.
    #[inline]
    pub fn is_alive(self) -> bool {
        matches!(self, Self::Running | Self::Sending | Self::Receiving)
    }
}

bitflags! {
    /// Flags orthogonal to [`ThreadSt`].
    pub struct ThreadFlags: u8 {
        /// The thread is in the scheduler's ready set.
        const READY = 1 << 0;
        /// An exception was raised and awaits delivery to the thread's
        /// exception handler.
        const EXCEPTION_TRIGGERED = 1 << 1;
        /// The exception is being delivered; the thread is calling its
        /// handler.
        const IN_EXCEPTION = 1 << 2;
        /// The thread's IPC deadline is armed. Only reported by
        /// [`KernelState::thread_flags`].
        const TIMEOUT_PENDING = 1 << 3;
    }
}

/// The result of [`KernelState::create_thread`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Created {
    /// The thread was created by this call.
    New,
    /// The slot was already taken.
    AlreadyPresent,
}

/// The result of [`KernelState::kill`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillStatus {
    /// The thread was torn down and its slot is Invalid again.
    Killed,
    /// The thread still holds thread locks. It will be torn down when it
    /// releases the last one.
    Deferred,
    /// The identifier didn't name a thread.
    NotAlive,
}

/// The result of [`KernelState::try_lock_thread`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAcquired {
    Acquired,
    /// The caller already held the lock.
    AlreadyOwned,
}

/// Scheduling attributes of a new thread. `None` fields take the defaults from
/// [`KernelCfg`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadAttr {
    pub prio: Option<Priority>,
    /// The maximum controlled priority.
    pub mcp: Option<Priority>,
    pub time_slice: Option<Tick>,
}

impl ThreadAttr {
    pub const fn with_prio(prio: Priority) -> Self {
        Self {
            prio: Some(prio),
            mcp: None,
            time_slice: None,
        }
    }
}

/// The holder of a thread lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LockOwner {
    /// A kernel-wide sweep ([`KernelState::kill_all`]).
    Kernel,
    Thread(ThreadIdx),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KillSt {
    NotRequested,
    /// Kill requested, waiting for the thread's lock count to drain.
    WaitingForDrain,
}

/// *Thread control block* - the state data of a thread slot.
pub(crate) struct ThreadCb<Traits> {
    pub(crate) uid: CpuLockCell<Traits, Uid>,
    pub(crate) st: CpuLockCell<Traits, ThreadSt>,
    pub(crate) flags: CpuLockCell<Traits, ThreadFlags>,

    pub(crate) prio: CpuLockCell<Traits, Priority>,
    pub(crate) mcp: CpuLockCell<Traits, Priority>,
    pub(crate) time_slice: CpuLockCell<Traits, Tick>,

    /// Links the thread into [`KernelState::present`].
    pub(crate) present_link: CpuLockCell<Traits, Option<Link<ThreadIdx>>>,

    /// Senders blocked on this thread.
    pub(crate) senders: WaitQueue<Traits>,
    /// This thread's membership in a receiver's wait queue.
    pub(crate) sender_link: WaitQueueLink<Traits>,

    pub(crate) lock_owner: CpuLockCell<Traits, Option<LockOwner>>,
    /// The number of thread locks held by this thread.
    pub(crate) lock_cnt: CpuLockCell<Traits, u32>,
    pub(crate) kill_st: CpuLockCell<Traits, KillSt>,

    pub(crate) irq: CpuLockCell<Traits, Option<IrqNum>>,

    pub(crate) ipc: IpcCb<Traits>,
}

impl<Traits> ThreadCb<Traits> {
    pub(crate) fn new() -> Self {
        Self {
            uid: CpuLockCell::new(Uid::NIL),
            st: CpuLockCell::new(ThreadSt::Invalid),
            flags: CpuLockCell::new(ThreadFlags::empty()),
            prio: CpuLockCell::new(0),
            mcp: CpuLockCell::new(0),
            time_slice: CpuLockCell::new(0),
            present_link: CpuLockCell::new(None),
            senders: WaitQueue::new(),
            sender_link: WaitQueueLink::new(),
            lock_owner: CpuLockCell::new(None),
            lock_cnt: CpuLockCell::new(0),
            kill_st: CpuLockCell::new(KillSt::NotRequested),
            irq: CpuLockCell::new(None),
            ipc: IpcCb::new(),
        }
    }
}

/// *Task control block*
pub(crate) struct TaskCb<Traits> {
    /// The number of threads in the task that haven't been killed.
    pub(crate) thread_count: CpuLockCell<Traits, usize>,
}

impl<Traits> TaskCb<Traits> {
    pub(crate) const fn new() -> Self {
        Self {
            thread_count: CpuLockCell::new(0),
        }
    }
}

/// Get a `ListAccessor` used to access the present registry.
macro_rules! present_accessor {
    ($state:expr, $key:expr) => {
        ListAccessor::new(
            &$state.present,
            &*$state.threads,
            |cb: &ThreadCb<_>| &cb.present_link,
            $key,
        )
    };
}

pub(crate) use present_accessor;

fn is_system_task<Traits: KernelCfg>(task: TaskNum) -> bool {
    Traits::SYSTEM_TASKS.contains(&task)
}

/// Link `thread` into the present registry so that the threads of each task
/// stay contiguous.
fn link_present<Traits: KernelTraits>(
    state: &KernelState<Traits>,
    mut lock: CpuLockTokenRefMut<'_, Traits>,
    thread: ThreadIdx,
    creator: Option<ThreadIdx>,
) {
    let task = state.threads[thread].uid.get(&*lock).task();

    let after = if let Some(creator) =
        creator.filter(|&c| state.threads[c].uid.read(&*lock).task() == task)
    {
        // Right after the creator
        Some(creator)
    } else if let Some(sibling) = state
        .task_slots(task)
        .find(|&i| i != thread && state.threads[i].present_link.read(&*lock).is_some())
    {
        // Right after another thread of the same task
        Some(sibling)
    } else if let Some(creator) = creator {
        // After the creator's task
        let accessor = present_accessor!(state, lock.borrow_mut());
        let creator_task = accessor.pool()[creator]
            .uid
            .read(&**accessor.cell_key())
            .task();
        let mut last = creator;
        while let Some(next) = accessor.next(last) {
            if accessor.pool()[next].uid.read(&**accessor.cell_key()).task() != creator_task {
                break;
            }
            last = next;
        }
        Some(last)
    } else {
        None
    };

    let mut accessor = present_accessor!(state, lock.borrow_mut());
    match after {
        Some(after) => accessor.insert_after(thread, after),
        None => accessor.push_back(thread),
    }
}

/// Get the flags of `thread`, including the computed ones.
pub(crate) fn reported_flags<Traits: KernelTraits>(
    state: &KernelState<Traits>,
    lock: CpuLockTokenRefMut<'_, Traits>,
    thread: ThreadIdx,
) -> ThreadFlags {
    let mut flags = state.threads[thread].flags.get(&*lock);
    if state.timeouts[timeout::ipc_timeout_of(thread)]
        .flags
        .get(&*lock)
        .is_queued()
    {
        flags.insert(ThreadFlags::TIMEOUT_PENDING);
    }
    flags
}

/// Start the teardown of `victim`, whose lock is held by the caller. Returns
/// [`KillStatus::Deferred`] if `victim` still holds thread locks.
pub(crate) fn kill_locked<Traits: KernelTraits>(
    state: &KernelState<Traits>,
    mut lock: CpuLockTokenRefMut<'_, Traits>,
    victim: ThreadIdx,
) -> KillStatus {
    let cb = &state.threads[victim];

    let lock_cnt = cb.lock_cnt.get(&*lock);
    if lock_cnt > 0 {
        cb.kill_st.replace(&mut *lock, KillSt::WaitingForDrain);
        log::debug!(
            "kill of {:?} deferred until it releases {} thread lock(s)",
            cb.uid.get(&*lock),
            lock_cnt
        );
        return KillStatus::Deferred;
    }

    let mut next = Some(victim);
    while let Some(thread) = next {
        next = teardown(state, lock.borrow_mut(), thread);
    }

    KillStatus::Killed
}

/// Tear down `victim` and reclaim its slot.
///
/// Releasing `victim`'s lock may drain the lock count of a thread whose kill
/// was deferred. Returns that thread, which the caller must tear down next.
fn teardown<Traits: KernelTraits>(
    state: &KernelState<Traits>,
    mut lock: CpuLockTokenRefMut<'_, Traits>,
    victim: ThreadIdx,
) -> Option<ThreadIdx> {
    let cb = &state.threads[victim];
    let uid = cb.uid.get(&*lock);
    debug_assert_eq!(cb.lock_cnt.get(&*lock), 0);
    log::debug!("killing {:?}", uid);

    // The last thread of a task takes the address space with it
    let task_cb = &state.tasks[uid.task() as usize];
    let remaining = {
        let count = task_cb.thread_count.write(&mut *lock);
        *count -= 1;
        *count
    };
    if remaining == 0 {
        log::debug!("destroying the address space of {:?}", uid.task_id());
        state.port().destroy_address_space(uid.task_id());
    }

    if let Some(irq) = cb.irq.replace(&mut *lock, None) {
        state.port().detach_irq(irq, uid);
    }

    timeout::reset(state, lock.borrow_mut(), timeout::ipc_timeout_of(victim));
    timeout::reset(
        state,
        lock.borrow_mut(),
        timeout::preemption_timeout_of(victim),
    );

    let st = cb.st.replace(&mut *lock, ThreadSt::Dead);
    if st == ThreadSt::Sending {
        wait::dequeue(state, lock.borrow_mut(), victim);
    }
    ipc::cancel_partners_of(state, lock.borrow_mut(), victim);

    present_accessor!(state, lock.borrow_mut()).remove(victim);
    if cb.flags.read(&*lock).contains(ThreadFlags::READY) {
        state.port().leave_ready_set(uid);
    }

    let next = release_lock(state, lock.borrow_mut(), victim);

    // Reclaim the slot
    cb.uid.replace(&mut *lock, Uid::NIL);
    cb.flags.replace(&mut *lock, ThreadFlags::empty());
    cb.kill_st.replace(&mut *lock, KillSt::NotRequested);
    cb.ipc.reset(lock.borrow_mut());
    cb.st.replace(&mut *lock, ThreadSt::Invalid);

    debug_assert!(cb.senders.head.read(&*lock).is_empty());
    debug_assert!(cb.sender_link.queue.read(&*lock).is_none());
    debug_assert!(!state.timeouts[timeout::ipc_timeout_of(victim)]
        .flags
        .get(&*lock)
        .is_queued());

    next
}

/// Release the lock of `target`. Returns the former owner if this drained
/// the owner's lock count and the owner's kill is pending.
fn release_lock<Traits: KernelTraits>(
    state: &KernelState<Traits>,
    mut lock: CpuLockTokenRefMut<'_, Traits>,
    target: ThreadIdx,
) -> Option<ThreadIdx> {
    let owner = match state.threads[target].lock_owner.replace(&mut *lock, None) {
        Some(LockOwner::Thread(owner)) => owner,
        Some(LockOwner::Kernel) | None => return None,
    };

    let owner_cb = &state.threads[owner];
    let lock_cnt = {
        let lock_cnt = owner_cb.lock_cnt.write(&mut *lock);
        *lock_cnt -= 1;
        *lock_cnt
    };

    (lock_cnt == 0 && owner_cb.kill_st.get(&*lock) == KillSt::WaitingForDrain).then(|| owner)
}

/// Kill every thread accepted by `filter` until a round over the present
/// registry makes no progress. Threads whose lock is held elsewhere are
/// skipped. Returns the number of threads killed.
fn sweep<Traits: KernelTraits>(
    state: &KernelState<Traits>,
    mut lock: CpuLockTokenRefMut<'_, Traits>,
    filter: impl Fn(Uid) -> bool,
) -> usize {
    let mut killed = 0;

    loop {
        let mut progress = false;

        let mut cursor = present_accessor!(state, lock.borrow_mut()).front();
        while let Some(thread) = cursor {
            // Find the next thread before we possibly unlink `thread`. Killing
            // a thread locked by the kernel unlinks no other thread.
            cursor = present_accessor!(state, lock.borrow_mut()).next(thread);

            let cb = &state.threads[thread];
            if !filter(cb.uid.get(&*lock)) || cb.lock_owner.read(&*lock).is_some() {
                continue;
            }

            cb.lock_owner.replace(&mut *lock, Some(LockOwner::Kernel));
            if kill_locked(state, lock.borrow_mut(), thread) == KillStatus::Killed {
                killed += 1;
                progress = true;
            }
        }

        if !progress {
            break;
        }
    }

    killed
}

impl<Traits: KernelTraits> KernelState<Traits> {
    /// Create a thread in the slot named by `uid`.
    ///
    /// `creator` is the creating thread, if any. The new thread's priority and
    /// maximum controlled priority are capped by the creator's maximum
    /// controlled priority.
    ///
    /// Exactly one of concurrent attempts to create a thread in the same slot
    /// returns [`Created::New`]; the others get [`Created::AlreadyPresent`].
    pub fn create_thread(
        &self,
        creator: Option<Uid>,
        uid: Uid,
        attr: ThreadAttr,
    ) -> Result<Created, CreateThreadError> {
        let mut lock = lock_cpu(self.port())?;
        let thread = self.slot_of(uid)?;
        let creator = creator
            .map(|creator| self.find(lock.borrow_mut(), creator))
            .transpose()?;

        let cb = &self.threads[thread];
        if cb.st.get(&*lock) != ThreadSt::Invalid {
            log::trace!("{:?} is already present", uid);
            return Ok(Created::AlreadyPresent);
        }

        let mut prio = attr.prio.unwrap_or(Traits::DEFAULT_PRIORITY);
        let mut mcp = attr.mcp.unwrap_or(Traits::DEFAULT_MCP);
        if let Some(creator) = creator {
            let creator_mcp = self.threads[creator].mcp.get(&*lock);
            prio = prio.min(creator_mcp);
            mcp = mcp.min(creator_mcp);
        }

        cb.uid.replace(&mut *lock, uid);
        cb.st.replace(&mut *lock, ThreadSt::Dead);
        cb.flags.replace(&mut *lock, ThreadFlags::empty());
        cb.prio.replace(&mut *lock, prio);
        cb.mcp.replace(&mut *lock, mcp);
        cb.time_slice.replace(
            &mut *lock,
            attr.time_slice.unwrap_or(Traits::DEFAULT_TIME_SLICE),
        );

        link_present(self, lock.borrow_mut(), thread, creator);
        *self.tasks[uid.task() as usize]
            .thread_count
            .write(&mut *lock) += 1;

        log::debug!("created {:?} (prio {}, mcp {})", uid, prio, mcp);

        Ok(Created::New)
    }

    /// Start a thread that was created but not started yet, making it
    /// runnable.
    pub fn start_thread(&self, uid: Uid) -> Result<(), ThreadOpError> {
        let mut lock = lock_cpu(self.port())?;
        let thread = self.find(lock.borrow_mut(), uid)?;
        let cb = &self.threads[thread];

        if cb.st.get(&*lock) != ThreadSt::Dead {
            return Err(ThreadOpError::BadObjectState);
        }

        cb.st.replace(&mut *lock, ThreadSt::Running);
        cb.flags.write(&mut *lock).insert(ThreadFlags::READY);
        self.port().make_runnable(uid);

        log::debug!("started {:?}", uid);

        Ok(())
    }

    /// Set the priority of a thread. A thread blocked in a wait queue moves to
    /// the position matching its new priority.
    pub fn set_thread_priority(&self, uid: Uid, prio: Priority) -> Result<(), ThreadOpError> {
        let mut lock = lock_cpu(self.port())?;
        let thread = self.find(lock.borrow_mut(), uid)?;
        wait::update_priority(self, lock.borrow_mut(), thread, prio);
        Ok(())
    }

    /// Get the priority of a thread.
    pub fn thread_priority(&self, uid: Uid) -> Result<Priority, ThreadOpError> {
        let mut lock = lock_cpu(self.port())?;
        let thread = self.find(lock.borrow_mut(), uid)?;
        Ok(self.threads[thread].prio.get(&*lock))
    }

    /// Get the time slice of a thread, in ticks.
    pub fn time_slice(&self, uid: Uid) -> Result<Tick, ThreadOpError> {
        let mut lock = lock_cpu(self.port())?;
        let thread = self.find(lock.borrow_mut(), uid)?;
        Ok(self.threads[thread].time_slice.get(&*lock))
    }

    /// Get the state of the slot named by `uid`. A slot holding a different
    /// thread (or none) reads as [`ThreadSt::Invalid`].
    pub fn thread_state(&self, uid: Uid) -> Result<ThreadSt, ThreadOpError> {
        let mut lock = lock_cpu(self.port())?;
        let thread = self.slot_of(uid)?;
        Ok(match self.find(lock.borrow_mut(), uid) {
            Ok(_) => self.threads[thread].st.get(&*lock),
            Err(_) => ThreadSt::Invalid,
        })
    }

    /// Get the flags of a thread.
    pub fn thread_flags(&self, uid: Uid) -> Result<ThreadFlags, ThreadOpError> {
        let mut lock = lock_cpu(self.port())?;
        let thread = self.find(lock.borrow_mut(), uid)?;
        Ok(reported_flags(self, lock.borrow_mut(), thread))
    }

    /// Get the number of threads of `task` that haven't been killed.
    pub fn task_thread_count(&self, task: TaskNum) -> Result<usize, ThreadOpError> {
        let lock = lock_cpu(self.port())?;
        let task_cb = self
            .tasks
            .get(task as usize)
            .ok_or(ThreadOpError::NoAccess)?;
        Ok(task_cb.thread_count.get(&*lock))
    }

    /// Route interrupt `irq` to `uid`. The association is dissolved when the
    /// thread is killed.
    pub fn attach_irq(&self, uid: Uid, irq: IrqNum) -> Result<(), ThreadOpError> {
        let mut lock = lock_cpu(self.port())?;
        let thread = self.find(lock.borrow_mut(), uid)?;
        if let Some(old) = self.threads[thread].irq.replace(&mut *lock, Some(irq)) {
            if old != irq {
                self.port().detach_irq(old, uid);
            }
        }
        Ok(())
    }

    /// Acquire the lock of `target` on behalf of `owner`.
    ///
    /// Fails with [`LockThreadError::WouldDeadlock`] if the lock is held by
    /// someone else, in which case the caller should retry later.
    pub fn try_lock_thread(&self, owner: Uid, target: Uid) -> Result<LockAcquired, LockThreadError> {
        let mut lock = lock_cpu(self.port())?;
        let owner = self.find(lock.borrow_mut(), owner)?;
        let target = self.find(lock.borrow_mut(), target)?;

        let target_cb = &self.threads[target];
        match target_cb.lock_owner.get(&*lock) {
            None => {
                target_cb
                    .lock_owner
                    .replace(&mut *lock, Some(LockOwner::Thread(owner)));
                *self.threads[owner].lock_cnt.write(&mut *lock) += 1;
                Ok(LockAcquired::Acquired)
            }
            Some(LockOwner::Thread(x)) if x == owner => Ok(LockAcquired::AlreadyOwned),
            Some(_) => Err(LockThreadError::WouldDeadlock),
        }
    }

    /// Release the lock of `target` held by `owner`.
    ///
    /// If this was the last lock held by `owner` and a kill of `owner` is
    /// pending, `owner` is torn down before this method returns.
    pub fn unlock_thread(&self, owner: Uid, target: Uid) -> Result<(), UnlockThreadError> {
        let mut lock = lock_cpu(self.port())?;
        let owner = self.find(lock.borrow_mut(), owner)?;
        let target = self.find(lock.borrow_mut(), target)?;

        if self.threads[target].lock_owner.get(&*lock) != Some(LockOwner::Thread(owner)) {
            return Err(UnlockThreadError::NotOwner);
        }

        let mut next = release_lock(self, lock.borrow_mut(), target);
        while let Some(thread) = next {
            log::debug!("completing the deferred kill of {:?}", self.threads[thread].uid.get(&*lock));
            next = teardown(self, lock.borrow_mut(), thread);
        }

        Ok(())
    }

    /// Kill `victim`. `killer` must hold the lock of `victim`.
    pub fn kill(&self, killer: Uid, victim: Uid) -> Result<KillStatus, KillError> {
        let mut lock = lock_cpu(self.port())?;
        let killer = self.find(lock.borrow_mut(), killer)?;
        let thread = self.slot_of(victim)?;

        let cb = &self.threads[thread];
        if cb.st.get(&*lock) == ThreadSt::Invalid || cb.uid.get(&*lock) != victim {
            return Ok(KillStatus::NotAlive);
        }
        if cb.lock_owner.get(&*lock) != Some(LockOwner::Thread(killer)) {
            return Err(KillError::NotOwner);
        }

        Ok(kill_locked(self, lock.borrow_mut(), thread))
    }

    /// Kill every thread of every ordinary task, then (if `include_system` is
    /// set) every thread of [`KernelCfg::SYSTEM_TASKS`]. Returns the number of
    /// threads killed.
    pub fn kill_all(&self, include_system: bool) -> Result<usize, BadContextError> {
        let mut lock = lock_cpu(self.port())?;

        let mut killed = sweep(self, lock.borrow_mut(), |uid| {
            !is_system_task::<Traits>(uid.task())
        });
        if include_system {
            killed += sweep(self, lock.borrow_mut(), |uid| {
                is_system_task::<Traits>(uid.task())
            });
        }

        log::debug!("kill_all: {} thread(s) killed", killed);
        Ok(killed)
    }

    /// Kill every thread of `task`. Returns the number of threads killed.
    pub fn kill_all_in_task(&self, task: TaskNum) -> Result<usize, ThreadOpError> {
        let mut lock = lock_cpu(self.port())?;
        if task as usize >= Traits::NUM_TASKS {
            return Err(ThreadOpError::NoAccess);
        }

        let killed = sweep(self, lock.borrow_mut(), |uid| uid.task() == task);

        log::debug!("kill_all_in_task({}): {} thread(s) killed", task, killed);
        Ok(killed)
    }
}
