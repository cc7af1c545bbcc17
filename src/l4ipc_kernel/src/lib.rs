#![doc = include_str!("./lib.md")]
#![cfg_attr(not(test), no_std)] // Link `std` only when building a test (`cfg(test)`)
#![deny(unsafe_op_in_unsafe_fn)]
extern crate alloc;

mod cfg;
mod debug;
mod error;
mod ipc;
mod klock;
mod l4_timeout;
mod state;
mod thread;
mod timeout;
mod uid;
mod utcb;
mod utils;
mod wait;

#[cfg(test)]
mod test_port;

pub use self::{
    cfg::KernelCfg,
    debug::{KernelSnapshot, ThreadInfo, TimeoutInfo},
    error::*,
    ipc::{IpcOutcome, IpcResult, IpcTimeouts, Source, EXCEPTION_LABEL},
    l4_timeout::{L4Timeout, Timeout},
    state::KernelState,
    thread::{Created, KillStatus, LockAcquired, ThreadAttr, ThreadFlags, ThreadSt},
    timeout::{TimeoutFlags, TimeoutKind},
    uid::{TaskNum, Uid},
    utcb::{ExceptionFrame, Message, MsgTag, Utcb, SHORT_MSG_WORDS, UTCB_VALUES},
};

/// Monotonic clock value.
pub type Tick = u64;

/// Signed difference between two [`Tick`]s.
pub type TickDelta = i64;

/// Thread priority. Numerically higher values are served first.
pub type Priority = u8;

/// Machine word.
pub type Mword = usize;

/// Interrupt line number.
pub type IrqNum = u32;

/// Implemented by a port. Provides the kernel lock and the scheduler handoff
/// hooks.
///
/// # Safety
///
/// `try_enter_cpu_lock` must return `true` only if the CPU Lock was inactive
/// for this instance and it has now been entered. The kernel relies on this to
/// prevent aliasing access to its state.
pub unsafe trait PortThreading: Sized + 'static {
    /// Enter a CPU Lock state. Return `false` if it's already active.
    fn try_enter_cpu_lock(&self) -> bool;

    /// Leave a CPU Lock state.
    ///
    /// Precondition: CPU Lock active
    fn leave_cpu_lock(&self);

    /// Return a flag indicating whether a CPU Lock state is active.
    fn is_cpu_lock_active(&self) -> bool;

    /// `thread` has become runnable.
    ///
    /// Called with CPU Lock active.
    fn make_runnable(&self, thread: Uid);

    /// `thread` has become runnable and should run next on this core. The
    /// caller is about to block.
    ///
    /// Called with CPU Lock active.
    fn hand_off(&self, thread: Uid);

    /// `thread` has left the ready set.
    ///
    /// Called with CPU Lock active.
    fn leave_ready_set(&self, thread: Uid);

    /// The preemption deadline of `thread` has passed.
    ///
    /// Called with CPU Lock active.
    fn preempt(&self, thread: Uid) {
        let _ = thread;
    }
}

/// Implemented by a port. Provides the monotonic clock.
pub trait PortTimer {
    /// Get the current value of the clock.
    fn tick_count(&self) -> Tick;
}

/// Implemented by a port. Connects the kernel to the interrupt delivery
/// mechanism.
pub trait PortInterrupts {
    /// Stop delivering `irq` to `thread`.
    fn detach_irq(&self, irq: IrqNum, thread: Uid);
}

/// Implemented by a port. Connects the kernel to the memory management
/// subsystem.
pub trait PortAddressSpace {
    /// Tear down the address space of `task` and all of its mappings. Called
    /// once the last thread of the task is killed.
    fn destroy_address_space(&self, task: Uid);
}

/// Represents a particular group of traits that a port should implement.
pub trait Port: PortThreading + PortTimer + PortInterrupts + PortAddressSpace {}

impl<T: PortThreading + PortTimer + PortInterrupts + PortAddressSpace> Port for T {}

/// Combines all the traits a kernel instance is parameterized over.
pub trait KernelTraits: Port + KernelCfg {}

impl<T: Port + KernelCfg> KernelTraits for T {}
