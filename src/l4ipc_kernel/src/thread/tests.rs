use super::*;
use crate::{
    test_port::{kernel, uid, Event, TestKernel, TestPort},
    BadContextError, IpcError, IpcOutcome, Message, Source, Timeout,
};
use core::task::Poll;

fn present(kernel: &TestKernel) -> Vec<Uid> {
    kernel
        .snapshot()
        .unwrap()
        .threads
        .into_iter()
        .map(|t| t.uid)
        .collect()
}

/// Make `owner` hold the lock of `target`.
fn lock(kernel: &TestKernel, owner: Uid, target: Uid) {
    assert_eq!(
        kernel.try_lock_thread(owner, target),
        Ok(LockAcquired::Acquired)
    );
}

#[test]
fn create_and_start() {
    let kernel = kernel();
    let t = uid(3, 1);

    assert_eq!(
        kernel.create_thread(None, t, ThreadAttr::default()),
        Ok(Created::New)
    );
    assert_eq!(
        kernel.create_thread(None, t, ThreadAttr::default()),
        Ok(Created::AlreadyPresent)
    );
    assert_eq!(kernel.thread_state(t), Ok(ThreadSt::Dead));
    assert_eq!(kernel.thread_priority(t), Ok(TestPort::DEFAULT_PRIORITY));
    assert_eq!(kernel.task_thread_count(3), Ok(1));
    assert_eq!(kernel.time_slice(t), Ok(TestPort::DEFAULT_TIME_SLICE));
    assert!(kernel.take_events().is_empty());

    kernel.start_thread(t).unwrap();
    assert_eq!(kernel.thread_state(t), Ok(ThreadSt::Running));
    assert_eq!(kernel.thread_flags(t), Ok(ThreadFlags::READY));
    assert_eq!(kernel.take_events(), [Event::Runnable(t)]);

    assert_eq!(kernel.start_thread(t), Err(ThreadOpError::BadObjectState));
}

#[test]
fn create_rejects_bad_ids() {
    let kernel = kernel();
    let attr = ThreadAttr::default();

    for bad in [
        Uid::NIL,
        Uid::INVALID,
        // Task outside the arena
        uid(8, 0),
        // Thread outside the arena
        uid(2, 16),
    ] {
        assert_eq!(
            kernel.create_thread(None, bad, attr),
            Err(CreateThreadError::NoAccess),
            "{:?}",
            bad
        );
    }

    // The creator must exist
    assert_eq!(
        kernel.create_thread(Some(uid(2, 0)), uid(2, 1), attr),
        Err(CreateThreadError::NoAccess)
    );

    // Another version of an existing thread doesn't name it
    kernel.spawn(uid(2, 2), 0x10);
    assert_eq!(
        kernel.thread_state(Uid::new(2, 2, 7)),
        Ok(ThreadSt::Invalid)
    );
    assert_eq!(
        kernel.start_thread(Uid::new(2, 2, 7)),
        Err(ThreadOpError::NoAccess)
    );
}

#[test]
fn priorities_are_capped_by_creator() {
    let kernel = kernel();
    let creator = uid(2, 0);
    kernel
        .create_thread(
            None,
            creator,
            ThreadAttr {
                prio: Some(0x10),
                mcp: Some(0x20),
                time_slice: None,
            },
        )
        .unwrap();

    let child = uid(2, 1);
    kernel
        .create_thread(Some(creator), child, ThreadAttr::with_prio(0x30))
        .unwrap();
    assert_eq!(kernel.thread_priority(child), Ok(0x20));

    kernel.set_thread_priority(child, 0x05).unwrap();
    assert_eq!(kernel.thread_priority(child), Ok(0x05));
}

#[test]
fn present_registry_keeps_tasks_contiguous() {
    let kernel = kernel();
    let attr = ThreadAttr::default();

    kernel.create_thread(None, uid(3, 0), attr).unwrap();
    kernel.create_thread(None, uid(4, 0), attr).unwrap();
    // After its sibling
    kernel.create_thread(None, uid(3, 1), attr).unwrap();
    assert_eq!(present(&kernel), [uid(3, 0), uid(3, 1), uid(4, 0)]);

    // After the creator's task
    kernel
        .create_thread(Some(uid(4, 0)), uid(5, 0), attr)
        .unwrap();
    // After the creator
    kernel
        .create_thread(Some(uid(3, 0)), uid(3, 2), attr)
        .unwrap();
    kernel
        .create_thread(Some(uid(3, 0)), uid(6, 0), attr)
        .unwrap();
    assert_eq!(
        present(&kernel),
        [uid(3, 0), uid(3, 2), uid(3, 1), uid(6, 0), uid(4, 0), uid(5, 0)]
    );
}

#[test]
fn thread_lock() {
    let kernel = kernel();
    let (a, b, v) = (uid(2, 0), uid(2, 1), uid(3, 0));
    kernel.spawn(a, 0x10);
    kernel.spawn(b, 0x10);
    kernel.spawn(v, 0x10);

    assert_eq!(kernel.unlock_thread(a, v), Err(UnlockThreadError::NotOwner));

    lock(&kernel, a, v);
    assert_eq!(kernel.try_lock_thread(a, v), Ok(LockAcquired::AlreadyOwned));
    assert_eq!(
        kernel.try_lock_thread(b, v),
        Err(LockThreadError::WouldDeadlock)
    );
    assert_eq!(kernel.unlock_thread(b, v), Err(UnlockThreadError::NotOwner));

    kernel.unlock_thread(a, v).unwrap();
    lock(&kernel, b, v);
}

#[test]
fn kill_tears_down() {
    let kernel = kernel();
    let (k, v1, v2) = (uid(2, 0), uid(3, 0), uid(3, 1));
    kernel.spawn(k, 0x10);
    kernel.spawn(v1, 0x10);
    kernel.spawn(v2, 0x10);
    kernel.attach_irq(v1, 5).unwrap();
    kernel.attach_irq(v1, 7).unwrap();
    kernel.set_preemption_deadline(v1, 100).unwrap();
    kernel.take_events();

    assert_eq!(kernel.kill(k, v1), Err(KillError::NotOwner));

    lock(&kernel, k, v1);
    assert_eq!(kernel.kill(k, v1), Ok(KillStatus::Killed));
    assert_eq!(
        kernel.take_events(),
        [Event::DetachIrq(7, v1), Event::LeftReadySet(v1)]
    );
    assert_eq!(kernel.thread_state(v1), Ok(ThreadSt::Invalid));
    assert_eq!(kernel.task_thread_count(3), Ok(1));
    assert_eq!(present(&kernel), [k, v2]);
    assert!(kernel.snapshot().unwrap().timeouts.is_empty());

    // The lock died with the thread
    assert_eq!(kernel.try_lock_thread(k, v2), Ok(LockAcquired::Acquired));
    assert_eq!(kernel.kill(k, v1), Ok(KillStatus::NotAlive));

    // The last thread takes the address space with it
    assert_eq!(kernel.kill(k, v2), Ok(KillStatus::Killed));
    assert_eq!(
        kernel.take_events(),
        [
            Event::DestroyAddressSpace(v2.task_id()),
            Event::LeftReadySet(v2)
        ]
    );
    assert_eq!(kernel.task_thread_count(3), Ok(0));

    // The slot can be reused by a new version
    let v1_new = Uid::new(3, 0, 2);
    assert_eq!(
        kernel.create_thread(None, v1_new, ThreadAttr::default()),
        Ok(Created::New)
    );
    assert_eq!(kernel.thread_state(v1), Ok(ThreadSt::Invalid));
    assert_eq!(kernel.thread_state(v1_new), Ok(ThreadSt::Dead));
}

#[test]
fn kill_of_unstarted_thread() {
    let kernel = kernel();
    let (k, v) = (uid(2, 0), uid(3, 0));
    kernel.spawn(k, 0x10);
    kernel
        .create_thread(None, v, ThreadAttr::default())
        .unwrap();
    kernel.take_events();

    lock(&kernel, k, v);
    assert_eq!(kernel.kill(k, v), Ok(KillStatus::Killed));
    // It was never in the ready set
    assert_eq!(
        kernel.take_events(),
        [Event::DestroyAddressSpace(v.task_id())]
    );
}

#[test]
fn kill_waits_for_lock_drain() {
    let kernel = kernel();
    let (k, v, w) = (uid(2, 0), uid(3, 0), uid(4, 0));
    kernel.spawn(k, 0x10);
    kernel.spawn(v, 0x10);
    kernel.spawn(w, 0x10);

    lock(&kernel, v, w);
    lock(&kernel, k, v);
    assert_eq!(kernel.kill(k, v), Ok(KillStatus::Deferred));
    assert_eq!(kernel.thread_state(v), Ok(ThreadSt::Running));

    kernel.unlock_thread(v, w).unwrap();
    assert_eq!(kernel.thread_state(v), Ok(ThreadSt::Invalid));

    // `k` no longer holds any lock, so it can be killed right away
    lock(&kernel, w, k);
    assert_eq!(kernel.kill(w, k), Ok(KillStatus::Killed));
}

#[test]
fn drained_kill_cascades() {
    let kernel = kernel();
    let (a, k, v) = (uid(2, 0), uid(3, 0), uid(4, 0));
    kernel.spawn(a, 0x10);
    kernel.spawn(k, 0x10);
    kernel.spawn(v, 0x10);

    lock(&kernel, k, v);
    lock(&kernel, a, k);
    assert_eq!(kernel.kill(a, k), Ok(KillStatus::Deferred));

    // Killing `v` releases the last lock held by `k`
    assert_eq!(kernel.kill(k, v), Ok(KillStatus::Killed));
    assert_eq!(kernel.thread_state(v), Ok(ThreadSt::Invalid));
    assert_eq!(kernel.thread_state(k), Ok(ThreadSt::Invalid));
    assert_eq!(present(&kernel), [a]);
}

#[test]
fn kill_cancels_partners() {
    let kernel = kernel();
    let (k, victim, snd, rcv, other) = (uid(2, 0), uid(3, 0), uid(4, 0), uid(4, 1), uid(5, 0));
    for t in [k, victim, snd, rcv, other] {
        kernel.spawn(t, 0x10);
    }

    // `snd` waits to send to `victim`
    assert!(kernel
        .send(snd, victim, Message::EMPTY, Timeout::Never)
        .is_pending());
    // `rcv` waits for `victim` in particular
    assert!(kernel
        .receive(rcv, Source::Thread(victim), Timeout::Relative(10))
        .is_pending());
    // `victim` waits to send to `other`
    assert!(kernel
        .send(victim, other, Message::EMPTY, Timeout::Never)
        .is_pending());
    assert_eq!(kernel.senders_of(other), Ok(vec![victim]));
    kernel.take_events();

    lock(&kernel, k, victim);
    assert_eq!(kernel.kill(k, victim), Ok(KillStatus::Killed));

    assert_eq!(kernel.senders_of(other), Ok(vec![]));
    assert_eq!(kernel.take_ipc_result(snd), Ok(Some(Err(IpcError::Canceled))));
    assert_eq!(kernel.take_ipc_result(rcv), Ok(Some(Err(IpcError::Canceled))));
    assert_eq!(kernel.thread_state(snd), Ok(ThreadSt::Running));
    assert_eq!(kernel.thread_state(rcv), Ok(ThreadSt::Running));
    assert_eq!(
        kernel.take_events(),
        [
            Event::DestroyAddressSpace(victim.task_id()),
            Event::Runnable(snd),
            Event::Runnable(rcv),
        ]
    );

    // The receive deadline went away with the receive
    assert!(!kernel.advance_to(10));
    assert_eq!(kernel.take_ipc_result(rcv), Ok(None));
}

/// Killing a queued sender unlinks only that sender. The others keep their
/// order and are still served.
#[test]
fn kill_queued_sender_keeps_queue_order() {
    let kernel = kernel();
    let (k, r) = (uid(2, 0), uid(3, 0));
    let (a, b, c) = (uid(4, 0), uid(4, 1), uid(4, 2));
    kernel.spawn(k, 0x10);
    kernel.spawn(r, 0x10);
    for (t, prio) in [(a, 30), (b, 20), (c, 10)] {
        kernel.spawn(t, prio);
        assert!(kernel.send(t, r, Message::EMPTY, Timeout::Never).is_pending());
    }
    assert_eq!(kernel.senders_of(r), Ok(vec![a, b, c]));
    kernel.take_events();

    lock(&kernel, k, b);
    assert_eq!(kernel.kill(k, b), Ok(KillStatus::Killed));
    assert_eq!(kernel.senders_of(r), Ok(vec![a, c]));
    assert_eq!(kernel.thread_state(a), Ok(ThreadSt::Sending));
    assert_eq!(kernel.thread_state(c), Ok(ThreadSt::Sending));
    // Neither the receiver nor the other senders were woken
    assert!(kernel.take_events().is_empty());

    for expected in [a, c] {
        match kernel.receive(r, Source::Any, Timeout::Zero) {
            Poll::Ready(Ok(IpcOutcome::Received { sender, .. })) => {
                assert_eq!(sender, expected)
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
    assert_eq!(kernel.senders_of(r), Ok(vec![]));
}

#[test]
fn kill_all_in_phases() {
    let kernel = kernel();
    let sys = [uid(0, 1), uid(1, 0)];
    let user = [uid(3, 0), uid(3, 1), uid(4, 0)];
    for t in sys.iter().chain(user.iter()) {
        kernel.spawn(*t, 0x10);
    }

    assert_eq!(kernel.kill_all(false), Ok(3));
    assert_eq!(present(&kernel), sys);

    assert_eq!(kernel.kill_all(true), Ok(2));
    assert!(present(&kernel).is_empty());
}

#[test]
fn kill_all_skips_locked_threads() {
    let kernel = kernel();
    let (a, b, c) = (uid(3, 0), uid(4, 0), uid(5, 0));
    for t in [a, b, c] {
        kernel.spawn(t, 0x10);
    }
    lock(&kernel, a, b);

    // `a` holds a lock and `b` is locked by `a`
    assert_eq!(kernel.kill_all(false), Ok(1));
    assert_eq!(kernel.thread_state(c), Ok(ThreadSt::Invalid));
    assert_eq!(kernel.thread_state(a), Ok(ThreadSt::Running));

    // The deferred kill of `a` completes once it lets go of `b`
    kernel.unlock_thread(a, b).unwrap();
    assert_eq!(kernel.thread_state(a), Ok(ThreadSt::Invalid));

    assert_eq!(kernel.kill_all_in_task(4), Ok(1));
    assert!(present(&kernel).is_empty());
}

#[test]
fn kill_all_in_task() {
    let kernel = kernel();
    let (a, b, c) = (uid(3, 0), uid(3, 5), uid(4, 0));
    for t in [a, b, c] {
        kernel.spawn(t, 0x10);
    }

    assert_eq!(kernel.kill_all_in_task(8), Err(ThreadOpError::NoAccess));
    assert_eq!(kernel.kill_all_in_task(3), Ok(2));
    assert_eq!(present(&kernel), [c]);
    assert_eq!(kernel.kill_all_in_task(3), Ok(0));
}

#[test]
fn nested_kernel_entry() {
    let kernel = kernel();
    kernel.with_cpu_lock_held(|| {
        assert_eq!(
            kernel.create_thread(None, uid(2, 0), ThreadAttr::default()),
            Err(CreateThreadError::BadContext)
        );
        assert_eq!(kernel.kill_all(true), Err(BadContextError::BadContext));
        assert!(kernel.snapshot().is_err());
    });
}
