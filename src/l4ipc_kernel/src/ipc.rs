//! Synchronous IPC
//!
//! A message moves from a sender to a receiver only when both are ready at the
//! same time. Whichever side arrives first blocks: a sender links itself into
//! the receiver's wait queue (see [`crate::wait`]), a receiver marks itself
//! as receiving and optionally names the one partner it accepts. The side that
//! arrives second performs the transfer and wakes the first one within the
//! same critical section, so a message is either delivered whole or not at
//! all.
//!
//! An operation that blocks returns [`Poll::Pending`]. The kernel stores its
//! final result in the calling thread, and the port retrieves it with
//! [`KernelState::take_ipc_result`] once the thread has been made runnable
//! again.
use alloc::vec::Vec;
use core::task::Poll;

use crate::{
    error::{IpcError, ThreadOpError},
    klock::{lock_cpu, CpuLockCell, CpuLockTokenRefMut},
    l4_timeout::{Deadline, L4Timeout, Timeout},
    state::KernelState,
    thread::{present_accessor, ThreadCb, ThreadFlags, ThreadIdx, ThreadSt},
    timeout::{self, TimeoutKind},
    utcb::{ExceptionFrame, Message, MsgTag, Utcb},
    utils::intrusive_list::ListAccessor,
    wait, KernelTraits, Tick, Uid,
};

#[cfg(test)]
mod tests;

/// The label of the message carrying an exception to the handler.
pub const EXCEPTION_LABEL: u16 = -5i16 as u16;

/// The senders a receive operation accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Open wait. Accept the first sender in the wait queue.
    Any,
    /// Closed wait. Accept only the given thread.
    Thread(Uid),
}

/// The timeouts of the two phases of an IPC operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpcTimeouts {
    pub send: Timeout,
    pub receive: Timeout,
}

impl IpcTimeouts {
    pub const NEVER: Self = Self {
        send: Timeout::Never,
        receive: Timeout::Never,
    };

    /// Decode the relative timeouts of an L4 timeout word.
    pub fn from_l4(word: L4Timeout, now: Tick) -> Self {
        Self {
            send: word.send(now, None),
            receive: word.receive(now, None),
        }
    }
}

/// The successful result of an IPC operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcOutcome {
    /// The message was delivered and no receive phase was requested.
    Sent,
    /// A message was received.
    Received { sender: Uid, msg: Message },
}

pub type IpcResult = Result<IpcOutcome, IpcError>;

/// The receive phase a sender enters once its blocked send completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RcvPhase {
    /// The closed-wait partner, or `None` for an open wait.
    partner: Option<Uid>,
    timeout: Timeout,
}

/// The IPC state of a thread.
pub(crate) struct IpcCb<Traits> {
    /// While receiving: the only sender accepted, or `None` for an open wait.
    pub(crate) partner: CpuLockCell<Traits, Option<ThreadIdx>>,
    /// While sending: the message to deliver.
    pub(crate) msg: CpuLockCell<Traits, Message>,
    /// While sending: the receive phase that follows.
    pub(crate) rcv_phase: CpuLockCell<Traits, Option<RcvPhase>>,
    pub(crate) utcb: CpuLockCell<Traits, Utcb>,
    pub(crate) exc_frame: CpuLockCell<Traits, ExceptionFrame>,
    pub(crate) exc_handler: CpuLockCell<Traits, Option<Uid>>,
    /// The result of the last blocked operation, not retrieved yet.
    pub(crate) result: CpuLockCell<Traits, Option<IpcResult>>,
}

impl<Traits> IpcCb<Traits> {
    pub(crate) const fn new() -> Self {
        Self {
            partner: CpuLockCell::new(None),
            msg: CpuLockCell::new(Message::EMPTY),
            rcv_phase: CpuLockCell::new(None),
            utcb: CpuLockCell::new(Utcb::new()),
            exc_frame: CpuLockCell::new(ExceptionFrame::ZERO),
            exc_handler: CpuLockCell::new(None),
            result: CpuLockCell::new(None),
        }
    }

    pub(crate) fn reset(&self, mut lock: CpuLockTokenRefMut<'_, Traits>) {
        self.partner.replace(&mut *lock, None);
        self.msg.replace(&mut *lock, Message::EMPTY);
        self.rcv_phase.replace(&mut *lock, None);
        self.utcb.replace(&mut *lock, Utcb::new());
        self.exc_frame.replace(&mut *lock, ExceptionFrame::ZERO);
        self.exc_handler.replace(&mut *lock, None);
        self.result.replace(&mut *lock, None);
    }
}

/// How to report a thread that becomes runnable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
    Runnable,
    /// The caller is about to block and the thread should run next.
    HandOff,
}

fn wake<Traits: KernelTraits>(
    state: &KernelState<Traits>,
    mut lock: CpuLockTokenRefMut<'_, Traits>,
    thread: ThreadIdx,
    how: Wake,
) {
    let cb = &state.threads[thread];
    cb.flags.write(&mut *lock).insert(ThreadFlags::READY);
    let uid = cb.uid.get(&*lock);
    match how {
        Wake::Runnable => state.port().make_runnable(uid),
        Wake::HandOff => state.port().hand_off(uid),
    }
}

fn block<Traits: KernelTraits>(
    state: &KernelState<Traits>,
    mut lock: CpuLockTokenRefMut<'_, Traits>,
    thread: ThreadIdx,
) {
    let cb = &state.threads[thread];
    cb.flags.write(&mut *lock).remove(ThreadFlags::READY);
    state.port().leave_ready_set(cb.uid.get(&*lock));
}

/// Arm the IPC deadline of `thread`.
fn arm<Traits: KernelTraits>(
    state: &KernelState<Traits>,
    mut lock: CpuLockTokenRefMut<'_, Traits>,
    thread: ThreadIdx,
    kind: TimeoutKind,
    deadline: Deadline,
) {
    if let Deadline::At(at) = deadline {
        let timeout = timeout::ipc_timeout_of(thread);
        state.timeouts[timeout].kind.replace(&mut *lock, kind);
        timeout::set(state, lock, timeout, at);
    }
}

/// Finish the pending operation of the blocked thread `thread` with `result`
/// and make it runnable.
fn complete<Traits: KernelTraits>(
    state: &KernelState<Traits>,
    mut lock: CpuLockTokenRefMut<'_, Traits>,
    thread: ThreadIdx,
    result: IpcResult,
    how: Wake,
) {
    timeout::reset(state, lock.borrow_mut(), timeout::ipc_timeout_of(thread));

    let cb = &state.threads[thread];
    cb.st.replace(&mut *lock, ThreadSt::Running);
    cb.ipc.partner.replace(&mut *lock, None);
    cb.ipc.rcv_phase.replace(&mut *lock, None);
    if result.is_err() {
        cb.flags.write(&mut *lock).remove(ThreadFlags::IN_EXCEPTION);
    }

    log::trace!("{:?} completes with {:?}", cb.uid.get(&*lock), result);
    cb.ipc.result.replace(&mut *lock, Some(result));

    wake(state, lock, thread, how);
}

/// Move the message of `snd` to `rcv`.
fn transfer<Traits: KernelTraits>(
    state: &KernelState<Traits>,
    mut lock: CpuLockTokenRefMut<'_, Traits>,
    snd: ThreadIdx,
    rcv: ThreadIdx,
    msg: Message,
) -> IpcOutcome {
    let snd_cb = &state.threads[snd];
    let rcv_cb = &state.threads[rcv];
    let sender = snd_cb.uid.get(&*lock);

    if snd_cb.flags.read(&*lock).contains(ThreadFlags::IN_EXCEPTION) {
        // Exception delivery
        let frame = snd_cb.ipc.exc_frame.get(&*lock);
        rcv_cb.ipc.utcb.write(&mut *lock).write_exception(&frame);
    } else if rcv_cb.flags.read(&*lock).contains(ThreadFlags::IN_EXCEPTION)
        && rcv_cb.ipc.exc_handler.get(&*lock) == Some(sender)
    {
        // The handler's reply carries the updated frame
        let frame = snd_cb.ipc.utcb.read(&*lock).read_exception();
        rcv_cb.ipc.exc_frame.replace(&mut *lock, frame);
        rcv_cb
            .flags
            .write(&mut *lock)
            .remove(ThreadFlags::IN_EXCEPTION | ThreadFlags::EXCEPTION_TRIGGERED);
    } else {
        let src = snd_cb.ipc.utcb.get(&*lock);
        src.copy_values_to(msg.tag, rcv_cb.ipc.utcb.write(&mut *lock));
    }

    log::trace!(
        "{:?} -> {:?}: {:?}",
        sender,
        rcv_cb.uid.get(&*lock),
        msg.tag
    );

    IpcOutcome::Received { sender, msg }
}

/// Return a flag indicating whether `dst` is waiting for a message `snd` may
/// deliver.
fn receiver_ready<Traits: KernelTraits>(
    state: &KernelState<Traits>,
    mut lock: CpuLockTokenRefMut<'_, Traits>,
    dst: ThreadIdx,
    snd: ThreadIdx,
) -> bool {
    let cb = &state.threads[dst];
    if cb.st.get(&*lock) != ThreadSt::Receiving {
        return false;
    }
    match cb.ipc.partner.get(&*lock) {
        Some(partner) => partner == snd,
        None => wait::front(state, lock.borrow_mut(), dst).map_or(true, |head| head == snd),
    }
}

/// Return a flag indicating whether `cur` will block in the receive phase
/// `rcv` it enters right after a send that completes immediately.
fn receive_blocks<Traits: KernelTraits>(
    state: &KernelState<Traits>,
    mut lock: CpuLockTokenRefMut<'_, Traits>,
    cur: ThreadIdx,
    rcv: RcvPhase,
) -> bool {
    if rcv.timeout.deadline(state.port().tick_count()) == Deadline::Zero {
        return false;
    }
    match rcv.partner {
        None => wait::front(state, lock.borrow_mut(), cur).is_none(),
        Some(uid) => match state.find(lock.borrow_mut(), uid) {
            Ok(partner) if partner != cur => {
                state.threads[partner].sender_link.queue.get(&*lock) != Some(cur)
            }
            // Fails without blocking
            _ => false,
        },
    }
}

/// The send phase of the running thread `cur`.
///
/// `rcv` is the receive phase requested after the send. It's entered by the
/// caller if the send completes immediately, and by the receiver that picks up
/// the message otherwise.
fn send_phase<Traits: KernelTraits>(
    state: &KernelState<Traits>,
    mut lock: CpuLockTokenRefMut<'_, Traits>,
    cur: ThreadIdx,
    dst: ThreadIdx,
    msg: Message,
    timeout: Timeout,
    rcv: Option<RcvPhase>,
) -> Poll<IpcResult> {
    if receiver_ready(state, lock.borrow_mut(), dst, cur) {
        let how = match rcv {
            Some(rcv) if receive_blocks(state, lock.borrow_mut(), cur, rcv) => Wake::HandOff,
            _ => Wake::Runnable,
        };
        let outcome = transfer(state, lock.borrow_mut(), cur, dst, msg);
        complete(state, lock, dst, Ok(outcome), how);
        return Poll::Ready(Ok(IpcOutcome::Sent));
    }

    let deadline = timeout.deadline(state.port().tick_count());
    if deadline == Deadline::Zero {
        return Poll::Ready(Err(IpcError::WouldBlock));
    }

    let cb = &state.threads[cur];
    cb.st.replace(&mut *lock, ThreadSt::Sending);
    cb.ipc.msg.replace(&mut *lock, msg);
    cb.ipc.rcv_phase.replace(&mut *lock, rcv);

    wait::enqueue(state, lock.borrow_mut(), dst, cur);
    arm(state, lock.borrow_mut(), cur, TimeoutKind::IpcSend, deadline);
    block(state, lock.borrow_mut(), cur);

    log::trace!(
        "{:?} blocks sending to {:?}",
        cb.uid.get(&*lock),
        state.threads[dst].uid.get(&*lock)
    );

    Poll::Pending
}

/// The receive phase of `cur`. `blocked` is set if `cur` has already left the
/// ready set.
fn receive_phase<Traits: KernelTraits>(
    state: &KernelState<Traits>,
    mut lock: CpuLockTokenRefMut<'_, Traits>,
    cur: ThreadIdx,
    partner: Option<ThreadIdx>,
    timeout: Timeout,
    blocked: bool,
) -> Poll<IpcResult> {
    let snd = match partner {
        None => wait::front(state, lock.borrow_mut(), cur),
        Some(partner) => {
            (state.threads[partner].sender_link.queue.get(&*lock) == Some(cur)).then(|| partner)
        }
    };

    if let Some(snd) = snd {
        let dequeued = match partner {
            None => wait::dequeue_head(state, lock.borrow_mut(), cur, snd),
            Some(_) => wait::dequeue(state, lock.borrow_mut(), snd),
        };
        debug_assert!(dequeued);

        let msg = state.threads[snd].ipc.msg.get(&*lock);
        let outcome = transfer(state, lock.borrow_mut(), snd, cur, msg);
        resume_sender(state, lock, snd);
        return Poll::Ready(Ok(outcome));
    }

    let deadline = timeout.deadline(state.port().tick_count());
    if deadline == Deadline::Zero {
        return Poll::Ready(Err(IpcError::WouldBlock));
    }

    let cb = &state.threads[cur];
    cb.st.replace(&mut *lock, ThreadSt::Receiving);
    cb.ipc.partner.replace(&mut *lock, partner);
    arm(state, lock.borrow_mut(), cur, TimeoutKind::IpcReceive, deadline);
    if !blocked {
        block(state, lock.borrow_mut(), cur);
    }

    log::trace!("{:?} blocks receiving", cb.uid.get(&*lock));

    Poll::Pending
}

/// Finish the send of the blocked sender `snd`, whose message was just
/// picked up, and enter its receive phase if it requested one.
fn resume_sender<Traits: KernelTraits>(
    state: &KernelState<Traits>,
    mut lock: CpuLockTokenRefMut<'_, Traits>,
    snd: ThreadIdx,
) {
    timeout::reset(state, lock.borrow_mut(), timeout::ipc_timeout_of(snd));

    let cb = &state.threads[snd];
    let RcvPhase { partner, timeout } = match cb.ipc.rcv_phase.replace(&mut *lock, None) {
        Some(rcv) => rcv,
        None => {
            complete(state, lock, snd, Ok(IpcOutcome::Sent), Wake::Runnable);
            return;
        }
    };

    let partner = match partner {
        None => None,
        Some(uid) => match state.find(lock.borrow_mut(), uid) {
            Ok(partner) if partner != snd => Some(partner),
            _ => {
                complete(
                    state,
                    lock,
                    snd,
                    Err(IpcError::InvalidDestination),
                    Wake::Runnable,
                );
                return;
            }
        },
    };

    // Go straight into the receive phase without becoming runnable
    cb.st.replace(&mut *lock, ThreadSt::Running);
    if let Poll::Ready(result) = receive_phase(state, lock.borrow_mut(), snd, partner, timeout, true)
    {
        complete(state, lock, snd, result, Wake::Runnable);
    }
}

/// Abort the blocked operation of `thread` because its deadline passed.
/// Returns `true` if an operation was aborted.
pub(crate) fn abort_on_timeout<Traits: KernelTraits>(
    state: &KernelState<Traits>,
    mut lock: CpuLockTokenRefMut<'_, Traits>,
    thread: ThreadIdx,
    kind: TimeoutKind,
) -> bool {
    match (kind, state.threads[thread].st.get(&*lock)) {
        (TimeoutKind::IpcSend, ThreadSt::Sending) => {
            wait::dequeue(state, lock.borrow_mut(), thread);
        }
        (TimeoutKind::IpcReceive, ThreadSt::Receiving) => {}
        _ => return false,
    }

    complete(
        state,
        lock,
        thread,
        Err(IpcError::Timeout),
        Wake::Runnable,
    );
    true
}

/// Abort every operation that waits for `victim`, which is being killed:
/// the senders queued on it and the receivers waiting for it in a closed
/// wait.
pub(crate) fn cancel_partners_of<Traits: KernelTraits>(
    state: &KernelState<Traits>,
    mut lock: CpuLockTokenRefMut<'_, Traits>,
    victim: ThreadIdx,
) {
    while let Some(snd) = wait::front(state, lock.borrow_mut(), victim) {
        wait::dequeue(state, lock.borrow_mut(), snd);
        complete(
            state,
            lock.borrow_mut(),
            snd,
            Err(IpcError::Canceled),
            Wake::Runnable,
        );
    }

    let receivers: Vec<ThreadIdx> = {
        let accessor = present_accessor!(state, lock.borrow_mut());
        let key = &**accessor.cell_key();
        accessor
            .iter()
            .filter(|(_, cb)| {
                cb.st.get(key) == ThreadSt::Receiving && cb.ipc.partner.get(key) == Some(victim)
            })
            .map(|(thread, _)| thread)
            .collect()
    };
    for rcv in receivers {
        complete(
            state,
            lock.borrow_mut(),
            rcv,
            Err(IpcError::Canceled),
            Wake::Runnable,
        );
    }
}

impl<Traits: KernelTraits> KernelState<Traits> {
    /// Get the slot of `current`, which must be a running thread.
    fn ipc_caller(
        &self,
        mut lock: CpuLockTokenRefMut<'_, Traits>,
        current: Uid,
    ) -> Result<ThreadIdx, IpcError> {
        let cur = self
            .find(lock.borrow_mut(), current)
            .map_err(|_| IpcError::BadContext)?;
        if self.threads[cur].st.get(&*lock) != ThreadSt::Running {
            return Err(IpcError::BadContext);
        }
        Ok(cur)
    }

    /// Get the slot of `partner`, which must be a live thread other than
    /// `cur`.
    fn ipc_partner(
        &self,
        mut lock: CpuLockTokenRefMut<'_, Traits>,
        cur: ThreadIdx,
        partner: Uid,
    ) -> Result<ThreadIdx, IpcError> {
        let thread = self
            .find(lock.borrow_mut(), partner)
            .map_err(|_| IpcError::InvalidDestination)?;
        if thread == cur || !self.threads[thread].st.get(&*lock).is_alive() {
            return Err(IpcError::InvalidDestination);
        }
        Ok(thread)
    }

    /// Send `msg` from `current` to `dest`.
    pub fn send(
        &self,
        current: Uid,
        dest: Uid,
        msg: Message,
        timeout: Timeout,
    ) -> Poll<IpcResult> {
        let mut lock = lock_cpu(self.port())?;
        let cur = self.ipc_caller(lock.borrow_mut(), current)?;
        let dst = self.ipc_partner(lock.borrow_mut(), cur, dest)?;

        send_phase(self, lock.borrow_mut(), cur, dst, msg, timeout, None)
    }

    /// Receive a message from `src`.
    pub fn receive(&self, current: Uid, src: Source, timeout: Timeout) -> Poll<IpcResult> {
        let mut lock = lock_cpu(self.port())?;
        let cur = self.ipc_caller(lock.borrow_mut(), current)?;
        let partner = match src {
            Source::Any => None,
            Source::Thread(uid) => Some(self.ipc_partner(lock.borrow_mut(), cur, uid)?),
        };

        receive_phase(self, lock.borrow_mut(), cur, partner, timeout, false)
    }

    /// Send `msg` to `dest` and wait for its reply.
    pub fn call(
        &self,
        current: Uid,
        dest: Uid,
        msg: Message,
        timeouts: IpcTimeouts,
    ) -> Poll<IpcResult> {
        let mut lock = lock_cpu(self.port())?;
        let cur = self.ipc_caller(lock.borrow_mut(), current)?;
        let dst = self.ipc_partner(lock.borrow_mut(), cur, dest)?;

        call_phases(self, lock.borrow_mut(), cur, dst, dest, msg, timeouts)
    }

    /// Reply to `reply_to` without blocking and wait for the next message
    /// from any sender.
    ///
    /// If the reply can't be delivered immediately, the error is returned and
    /// no receive takes place.
    pub fn reply_and_wait(
        &self,
        current: Uid,
        reply_to: Uid,
        msg: Message,
        timeout: Timeout,
    ) -> Poll<IpcResult> {
        let mut lock = lock_cpu(self.port())?;
        let cur = self.ipc_caller(lock.borrow_mut(), current)?;
        let dst = self.ipc_partner(lock.borrow_mut(), cur, reply_to)?;

        let rcv = RcvPhase {
            partner: None,
            timeout,
        };
        match send_phase(self, lock.borrow_mut(), cur, dst, msg, Timeout::Zero, Some(rcv)) {
            Poll::Ready(Ok(_)) => receive_phase(self, lock.borrow_mut(), cur, None, timeout, false),
            other => other,
        }
    }

    /// The combined IPC operation: an optional send phase to `dest` followed
    /// by an optional receive phase from `src`. The receive phase is entered
    /// only if the send phase succeeds.
    pub fn ipc(
        &self,
        current: Uid,
        dest: Option<Uid>,
        src: Option<Source>,
        msg: Message,
        timeouts: IpcTimeouts,
    ) -> Poll<IpcResult> {
        let mut lock = lock_cpu(self.port())?;
        let cur = self.ipc_caller(lock.borrow_mut(), current)?;

        // Validate the receive phase first so that a bad source doesn't leave
        // a delivered message behind
        let partner = match src {
            None => None,
            Some(Source::Any) => Some(None),
            Some(Source::Thread(uid)) => Some(Some(self.ipc_partner(lock.borrow_mut(), cur, uid)?)),
        };

        let dest = match dest {
            Some(dest) => dest,
            None => {
                return match partner {
                    Some(partner) => {
                        receive_phase(self, lock.borrow_mut(), cur, partner, timeouts.receive, false)
                    }
                    None => Poll::Ready(Err(IpcError::InvalidDestination)),
                };
            }
        };
        let dst = self.ipc_partner(lock.borrow_mut(), cur, dest)?;

        let rcv = src.map(|src| RcvPhase {
            partner: match src {
                Source::Any => None,
                Source::Thread(uid) => Some(uid),
            },
            timeout: timeouts.receive,
        });
        match send_phase(self, lock.borrow_mut(), cur, dst, msg, timeouts.send, rcv) {
            Poll::Ready(Ok(outcome)) => match partner {
                Some(partner) => {
                    receive_phase(self, lock.borrow_mut(), cur, partner, timeouts.receive, false)
                }
                None => Poll::Ready(Ok(outcome)),
            },
            other => other,
        }
    }

    /// Take the result of the last blocked IPC operation of `uid`. Returns
    /// `None` if the operation is still pending or the result was already
    /// taken.
    pub fn take_ipc_result(&self, uid: Uid) -> Result<Option<IpcResult>, ThreadOpError> {
        let mut lock = lock_cpu(self.port())?;
        let thread = self.find(lock.borrow_mut(), uid)?;
        Ok(self.threads[thread].ipc.result.replace(&mut *lock, None))
    }

    /// Record an exception of `uid` to be delivered to `handler` by
    /// [`Self::deliver_exception`].
    pub fn raise_exception(
        &self,
        uid: Uid,
        handler: Uid,
        frame: ExceptionFrame,
    ) -> Result<(), ThreadOpError> {
        let mut lock = lock_cpu(self.port())?;
        let thread = self.find(lock.borrow_mut(), uid)?;
        let cb = &self.threads[thread];
        if cb.flags.read(&*lock).contains(ThreadFlags::IN_EXCEPTION) {
            return Err(ThreadOpError::BadObjectState);
        }

        cb.ipc.exc_frame.replace(&mut *lock, frame);
        cb.ipc.exc_handler.replace(&mut *lock, Some(handler));
        cb.flags
            .write(&mut *lock)
            .insert(ThreadFlags::EXCEPTION_TRIGGERED);

        log::debug!("{:?} raised exception {:#x}", uid, frame.trapno);

        Ok(())
    }

    /// Deliver the exception raised by `current` to its handler: call the
    /// handler with the exception frame in the handler's UTCB and wait for the
    /// reply, which carries the updated frame.
    pub fn deliver_exception(&self, current: Uid, timeouts: IpcTimeouts) -> Poll<IpcResult> {
        let mut lock = lock_cpu(self.port())?;
        let cur = self.ipc_caller(lock.borrow_mut(), current)?;

        let cb = &self.threads[cur];
        let flags = cb.flags.get(&*lock);
        if !flags.contains(ThreadFlags::EXCEPTION_TRIGGERED)
            || flags.contains(ThreadFlags::IN_EXCEPTION)
        {
            return Poll::Ready(Err(IpcError::BadContext));
        }
        let handler = cb
            .ipc
            .exc_handler
            .get(&*lock)
            .ok_or(IpcError::InvalidDestination)?;
        let dst = self.ipc_partner(lock.borrow_mut(), cur, handler)?;

        cb.flags.write(&mut *lock).insert(ThreadFlags::IN_EXCEPTION);

        let frame = cb.ipc.exc_frame.get(&*lock);
        let msg = Message::new(
            MsgTag::new(EXCEPTION_LABEL, ExceptionFrame::WORDS),
            [frame.trapno, frame.err, frame.ip],
        );

        let result = call_phases(self, lock.borrow_mut(), cur, dst, handler, msg, timeouts);
        if let Poll::Ready(Err(_)) = result {
            cb.flags.write(&mut *lock).remove(ThreadFlags::IN_EXCEPTION);
        }
        result
    }

    /// Get the exception frame of `uid`.
    pub fn exception_frame(&self, uid: Uid) -> Result<ExceptionFrame, ThreadOpError> {
        let mut lock = lock_cpu(self.port())?;
        let thread = self.find(lock.borrow_mut(), uid)?;
        Ok(self.threads[thread].ipc.exc_frame.get(&*lock))
    }

    /// Get a copy of the UTCB of `uid`.
    pub fn utcb(&self, uid: Uid) -> Result<Utcb, ThreadOpError> {
        let mut lock = lock_cpu(self.port())?;
        let thread = self.find(lock.borrow_mut(), uid)?;
        Ok(self.threads[thread].ipc.utcb.get(&*lock))
    }

    /// Modify the UTCB of `uid` in place.
    pub fn modify_utcb<R>(
        &self,
        uid: Uid,
        f: impl FnOnce(&mut Utcb) -> R,
    ) -> Result<R, ThreadOpError> {
        let mut lock = lock_cpu(self.port())?;
        let thread = self.find(lock.borrow_mut(), uid)?;
        Ok(f(self.threads[thread].ipc.utcb.write(&mut *lock)))
    }

    /// List the senders blocked on `uid`, in the order they will be served.
    pub fn senders_of(&self, uid: Uid) -> Result<Vec<Uid>, ThreadOpError> {
        let mut lock = lock_cpu(self.port())?;
        let thread = self.find(lock.borrow_mut(), uid)?;
        let senders = wait::senders(self, lock.borrow_mut(), thread);
        Ok(senders
            .into_iter()
            .map(|snd| self.threads[snd].uid.get(&*lock))
            .collect())
    }
}

/// A send phase to `dst` followed by a closed receive phase from `dst`.
fn call_phases<Traits: KernelTraits>(
    state: &KernelState<Traits>,
    mut lock: CpuLockTokenRefMut<'_, Traits>,
    cur: ThreadIdx,
    dst: ThreadIdx,
    dest: Uid,
    msg: Message,
    timeouts: IpcTimeouts,
) -> Poll<IpcResult> {
    let rcv = RcvPhase {
        partner: Some(dest),
        timeout: timeouts.receive,
    };
    match send_phase(state, lock.borrow_mut(), cur, dst, msg, timeouts.send, Some(rcv)) {
        Poll::Ready(Ok(_)) => receive_phase(state, lock, cur, Some(dst), timeouts.receive, false),
        other => other,
    }
}
