//! Static kernel configuration
use crate::{Priority, TaskNum, Tick};

/// Compile-time configuration of a kernel instance.
///
/// The thread arena holds `NUM_TASKS * NUM_LTHREADS` control blocks, one per
/// thread slot addressable by a [`Uid`](crate::Uid).
pub trait KernelCfg: Sized + 'static {
    /// The number of address spaces (tasks). Task numbers range over
    /// `0..NUM_TASKS`.
    const NUM_TASKS: usize;

    /// The number of thread slots per task. Must not exceed
    /// [`Uid::MAX_LTHREADS`](crate::Uid::MAX_LTHREADS).
    const NUM_LTHREADS: usize = crate::Uid::MAX_LTHREADS;

    /// The priority assigned to a thread created without an explicit one.
    const DEFAULT_PRIORITY: Priority = 0x10;

    /// The maximum controlled priority assigned by default.
    const DEFAULT_MCP: Priority = 0xff;

    /// The default time slice, in ticks.
    const DEFAULT_TIME_SLICE: Tick = 10_000;

    /// Root and idle tasks. [`KernelState::kill_all`] tears these down only
    /// after every thread of every other task is gone.
    ///
    /// [`KernelState::kill_all`]: crate::KernelState::kill_all
    const SYSTEM_TASKS: &'static [TaskNum] = &[0];
}

pub(crate) const fn num_thread_slots<Traits: KernelCfg>() -> usize {
    Traits::NUM_TASKS * Traits::NUM_LTHREADS
}
