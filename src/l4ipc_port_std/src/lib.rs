//! Simulation environment for running the IPC engine on a hosted environment
//!
//! [`StdPort`] implements the port traits of `l4ipc_kernel` with a simulated
//! clock and a single simulated CPU. Threads aren't backed by anything; a
//! driver (typically a test) plays every thread by calling the kernel's
//! operations on behalf of the thread returned by [`Simulator::dispatch`].
//!
//! ```
//! use l4ipc_kernel::{IpcOutcome, Message, Source, Timeout, Uid};
//! use l4ipc_port_std::Simulator;
//! use std::task::Poll;
//!
//! let sim: Simulator = Simulator::new();
//! let (server, client) = (Uid::new(2, 0, 1), Uid::new(3, 0, 1));
//! sim.spawn(server, Default::default()).unwrap();
//! sim.spawn(client, Default::default()).unwrap();
//!
//! assert_eq!(sim.dispatch(), Some(server));
//! assert!(sim.kernel().receive(server, Source::Any, Timeout::Never).is_pending());
//!
//! assert_eq!(sim.dispatch(), Some(client));
//! assert_eq!(
//!     sim.kernel().send(client, server, Message::EMPTY, Timeout::Never),
//!     Poll::Ready(Ok(IpcOutcome::Sent)),
//! );
//! ```
use l4ipc_kernel::{
    BadContextError, CreateThreadError, IrqNum, KernelCfg, KernelState, PortAddressSpace,
    PortInterrupts, PortThreading, PortTimer, Priority, TaskNum, ThreadAttr, ThreadOpError, Tick,
    Uid,
};
use std::{
    cell::{Cell, RefCell},
    fmt,
    marker::PhantomData,
};

mod sched;

/// Used by tests and drivers
#[doc(hidden)]
pub extern crate env_logger;

/// The configuration used when none is specified.
#[derive(Debug)]
pub struct DefaultCfg;

impl KernelCfg for DefaultCfg {
    const NUM_TASKS: usize = 16;
    const NUM_LTHREADS: usize = 32;
}

/// A call the kernel made into the port, other than the scheduler hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortEvent {
    /// The preemption deadline of a thread expired.
    Preempted(Uid),
    IrqDetached(IrqNum, Uid),
    /// The last thread of a task was killed.
    AddressSpaceDestroyed(Uid),
}

/// The port. Holds the simulated machine state.
pub struct StdPort<Cfg = DefaultCfg> {
    cpu_lock: Cell<bool>,
    now: Cell<Tick>,
    sched: RefCell<sched::SchedState>,
    events: RefCell<Vec<PortEvent>>,
    _cfg: PhantomData<fn() -> Cfg>,
}

impl<Cfg> StdPort<Cfg> {
    pub fn new() -> Self {
        Self {
            cpu_lock: Cell::new(false),
            now: Cell::new(0),
            sched: RefCell::default(),
            events: RefCell::default(),
            _cfg: PhantomData,
        }
    }

    fn push_event(&self, event: PortEvent) {
        log::trace!("{:?}", event);
        self.events.borrow_mut().push(event);
    }
}

impl<Cfg> Default for StdPort<Cfg> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Cfg> fmt::Debug for StdPort<Cfg> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("StdPort")
            .field("cpu_lock", &self.cpu_lock.get())
            .field("now", &self.now.get())
            .field("sched", &self.sched)
            .finish()
    }
}

impl<Cfg: KernelCfg> KernelCfg for StdPort<Cfg> {
    const NUM_TASKS: usize = Cfg::NUM_TASKS;
    const NUM_LTHREADS: usize = Cfg::NUM_LTHREADS;
    const DEFAULT_PRIORITY: Priority = Cfg::DEFAULT_PRIORITY;
    const DEFAULT_MCP: Priority = Cfg::DEFAULT_MCP;
    const DEFAULT_TIME_SLICE: Tick = Cfg::DEFAULT_TIME_SLICE;
    const SYSTEM_TASKS: &'static [TaskNum] = Cfg::SYSTEM_TASKS;
}

// Safety: `try_enter_cpu_lock` succeeds only if the lock was free. `StdPort`
// is `!Sync`, so there's no concurrent access.
unsafe impl<Cfg: 'static> PortThreading for StdPort<Cfg> {
    fn try_enter_cpu_lock(&self) -> bool {
        !self.cpu_lock.replace(true)
    }

    fn leave_cpu_lock(&self) {
        let was_active = self.cpu_lock.replace(false);
        debug_assert!(was_active);
    }

    fn is_cpu_lock_active(&self) -> bool {
        self.cpu_lock.get()
    }

    fn make_runnable(&self, thread: Uid) {
        log::trace!("make_runnable({:?})", thread);
        self.sched.borrow_mut().make_runnable(thread);
    }

    fn hand_off(&self, thread: Uid) {
        log::trace!("hand_off({:?})", thread);
        self.sched.borrow_mut().hand_off(thread);
    }

    fn leave_ready_set(&self, thread: Uid) {
        log::trace!("leave_ready_set({:?})", thread);
        self.sched.borrow_mut().leave_ready_set(thread);
    }

    fn preempt(&self, thread: Uid) {
        self.push_event(PortEvent::Preempted(thread));
        self.sched.borrow_mut().preempt(thread);
    }
}

impl<Cfg> PortTimer for StdPort<Cfg> {
    fn tick_count(&self) -> Tick {
        self.now.get()
    }
}

impl<Cfg> PortInterrupts for StdPort<Cfg> {
    fn detach_irq(&self, irq: IrqNum, thread: Uid) {
        self.push_event(PortEvent::IrqDetached(irq, thread));
    }
}

impl<Cfg> PortAddressSpace for StdPort<Cfg> {
    fn destroy_address_space(&self, task: Uid) {
        self.push_event(PortEvent::AddressSpaceDestroyed(task));
    }
}

/// Error type for [`Simulator::spawn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnError {
    /// The slot is already occupied.
    AlreadyPresent,
    Create(CreateThreadError),
    Start(ThreadOpError),
}

impl From<CreateThreadError> for SpawnError {
    fn from(x: CreateThreadError) -> Self {
        Self::Create(x)
    }
}

impl From<ThreadOpError> for SpawnError {
    fn from(x: ThreadOpError) -> Self {
        Self::Start(x)
    }
}

/// Initialize `env_logger` for a test or a driver. Can be called any number
/// of times.
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A kernel instance running on [`StdPort`], plus the dispatcher state.
pub struct Simulator<Cfg: KernelCfg = DefaultCfg> {
    kernel: KernelState<StdPort<Cfg>>,
    /// The thread whose preemption deadline is armed
    slice_owner: Cell<Option<Uid>>,
}

impl<Cfg: KernelCfg> Default for Simulator<Cfg> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Cfg: KernelCfg> fmt::Debug for Simulator<Cfg> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Simulator")
            .field("port", self.kernel.port())
            .field("slice_owner", &self.slice_owner.get())
            .finish()
    }
}

impl<Cfg: KernelCfg> Simulator<Cfg> {
    pub fn new() -> Self {
        init_logger();
        Self {
            // Safety: The hooks of `StdPort` don't call into any kernel
            //         instance
            kernel: unsafe { KernelState::new(StdPort::new()) },
            slice_owner: Cell::new(None),
        }
    }

    pub fn kernel(&self) -> &KernelState<StdPort<Cfg>> {
        &self.kernel
    }

    pub fn now(&self) -> Tick {
        self.kernel.port().now.get()
    }

    /// Create a thread without a creator and start it.
    pub fn spawn(&self, uid: Uid, attr: ThreadAttr) -> Result<(), SpawnError> {
        self.spawn_by(None, uid, attr)
    }

    /// Create a thread on behalf of `creator` and start it.
    pub fn spawn_by(
        &self,
        creator: Option<Uid>,
        uid: Uid,
        attr: ThreadAttr,
    ) -> Result<(), SpawnError> {
        match self.kernel.create_thread(creator, uid, attr)? {
            l4ipc_kernel::Created::New => {}
            l4ipc_kernel::Created::AlreadyPresent => return Err(SpawnError::AlreadyPresent),
        }
        self.kernel.start_thread(uid)?;
        Ok(())
    }

    /// Get the thread that should run now. A thread that gets the CPU is given
    /// a fresh time slice.
    pub fn dispatch(&self) -> Option<Uid> {
        let next = self.kernel.port().sched.borrow_mut().choose();
        let prev = self.slice_owner.get();
        if next == prev {
            return next;
        }

        if let Some(prev) = prev {
            // Fails if `prev` was killed in the meantime
            let _ = self.kernel.cancel_preemption_deadline(prev);
        }
        if let Some(next) = next {
            let armed = self
                .kernel
                .time_slice(next)
                .and_then(|slice| {
                    self.kernel
                        .set_preemption_deadline(next, self.now().saturating_add(slice))
                });
            if let Err(e) = armed {
                log::warn!("could not arm the time slice of {:?}: {:?}", next, e);
            }
            log::debug!("dispatching {:?}", next);
        }
        self.slice_owner.set(next);
        next
    }

    /// Get the thread currently holding the CPU, without choosing a new one.
    pub fn running(&self) -> Option<Uid> {
        self.kernel.port().sched.borrow().running()
    }

    /// List the threads waiting for the CPU, in dispatch order.
    pub fn ready_queue(&self) -> Vec<Uid> {
        self.kernel.port().sched.borrow().ready().collect()
    }

    /// Advance the clock by `ticks` and process expired deadlines. Returns
    /// `true` if any deadline expired.
    pub fn advance(&self, ticks: Tick) -> Result<bool, BadContextError> {
        let port = self.kernel.port();
        port.now.set(port.now.get().saturating_add(ticks));
        self.kernel.handle_tick()
    }

    /// Take the port events recorded so far.
    pub fn take_events(&self) -> Vec<PortEvent> {
        self.kernel.port().events.take()
    }
}
