//! A port for unit tests. Records every call the kernel makes into it.
use std::cell::{Cell, RefCell};

use crate::{
    Created, IrqNum, KernelCfg, KernelState, PortAddressSpace, PortInterrupts, PortThreading,
    PortTimer, Priority, TaskNum, ThreadAttr, Tick, Uid,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Event {
    Runnable(Uid),
    HandOff(Uid),
    LeftReadySet(Uid),
    Preempt(Uid),
    DetachIrq(IrqNum, Uid),
    DestroyAddressSpace(Uid),
}

#[derive(Debug, Default)]
pub(crate) struct TestPort {
    cpu_lock: Cell<bool>,
    now: Cell<Tick>,
    events: RefCell<Vec<Event>>,
}

impl TestPort {
    fn push(&self, event: Event) {
        assert!(self.cpu_lock.get(), "{:?} reported outside CPU Lock", event);
        self.events.borrow_mut().push(event);
    }
}

unsafe impl PortThreading for TestPort {
    fn try_enter_cpu_lock(&self) -> bool {
        !self.cpu_lock.replace(true)
    }

    fn leave_cpu_lock(&self) {
        assert!(self.cpu_lock.replace(false));
    }

    fn is_cpu_lock_active(&self) -> bool {
        self.cpu_lock.get()
    }

    fn make_runnable(&self, thread: Uid) {
        self.push(Event::Runnable(thread));
    }

    fn hand_off(&self, thread: Uid) {
        self.push(Event::HandOff(thread));
    }

    fn leave_ready_set(&self, thread: Uid) {
        self.push(Event::LeftReadySet(thread));
    }

    fn preempt(&self, thread: Uid) {
        self.push(Event::Preempt(thread));
    }
}

impl PortTimer for TestPort {
    fn tick_count(&self) -> Tick {
        self.now.get()
    }
}

impl PortInterrupts for TestPort {
    fn detach_irq(&self, irq: IrqNum, thread: Uid) {
        self.push(Event::DetachIrq(irq, thread));
    }
}

impl PortAddressSpace for TestPort {
    fn destroy_address_space(&self, task: Uid) {
        self.push(Event::DestroyAddressSpace(task));
    }
}

impl KernelCfg for TestPort {
    const NUM_TASKS: usize = 8;
    const NUM_LTHREADS: usize = 16;
    const SYSTEM_TASKS: &'static [TaskNum] = &[0, 1];
}

pub(crate) type TestKernel = KernelState<TestPort>;

pub(crate) fn kernel() -> TestKernel {
    let _ = env_logger::builder().is_test(true).try_init();
    // Safety: `TestPort`'s hooks only record events
    unsafe { KernelState::new(TestPort::default()) }
}

/// The first version of thread `lthread` of `task`.
pub(crate) const fn uid(task: TaskNum, lthread: u8) -> Uid {
    Uid::new(task, lthread, 1)
}

impl TestKernel {
    /// Create and start a thread.
    pub(crate) fn spawn(&self, uid: Uid, prio: Priority) {
        assert_eq!(
            self.create_thread(None, uid, ThreadAttr::with_prio(prio)),
            Ok(Created::New)
        );
        self.start_thread(uid).unwrap();
    }

    pub(crate) fn now(&self) -> Tick {
        self.port().now.get()
    }

    /// Move the clock to `now` without processing the deadline queue.
    pub(crate) fn set_now(&self, now: Tick) {
        self.port().now.set(now);
    }

    /// Move the clock to `now` and process the deadline queue.
    pub(crate) fn advance_to(&self, now: Tick) -> bool {
        self.port().now.set(now);
        self.handle_tick().unwrap()
    }

    pub(crate) fn take_events(&self) -> Vec<Event> {
        self.port().events.take()
    }

    /// Simulate a nested kernel entry.
    pub(crate) fn with_cpu_lock_held<R>(&self, f: impl FnOnce() -> R) -> R {
        assert!(self.port().try_enter_cpu_lock());
        let r = f();
        self.port().leave_cpu_lock();
        r
    }
}
