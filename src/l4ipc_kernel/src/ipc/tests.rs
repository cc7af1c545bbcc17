use super::*;
use crate::{
    test_port::{kernel, uid, Event, TestKernel},
    Mword, ThreadOpError, TimeoutFlags, UTCB_VALUES,
};

fn msg(label: u16, words: usize, payload: Mword) -> Message {
    Message::new(MsgTag::new(label, words), [payload, 0, 0])
}

/// Take the result of a completed blocked operation.
#[track_caller]
fn result_of(kernel: &TestKernel, thread: Uid) -> IpcResult {
    match kernel.take_ipc_result(thread) {
        Ok(Some(result)) => result,
        other => panic!("no result for {:?}: {:?}", thread, other),
    }
}

#[track_caller]
fn assert_received(result: IpcResult, sender: Uid, payload: Mword) -> Message {
    match result {
        Ok(IpcOutcome::Received { sender: s, msg }) => {
            assert_eq!(s, sender);
            assert_eq!(msg.words[0], payload);
            msg
        }
        other => panic!("expected a message from {:?}: {:?}", sender, other),
    }
}

fn spawn_all(kernel: &TestKernel, threads: &[Uid]) {
    for &t in threads {
        kernel.spawn(t, 0x10);
    }
    kernel.take_events();
}

#[test]
fn send_to_waiting_receiver() {
    let kernel = kernel();
    let (s, r) = (uid(2, 0), uid(3, 0));
    spawn_all(&kernel, &[s, r]);

    assert!(kernel.receive(r, Source::Any, Timeout::Never).is_pending());
    assert_eq!(kernel.thread_state(r), Ok(ThreadSt::Receiving));
    assert_eq!(kernel.take_events(), [Event::LeftReadySet(r)]);

    assert_eq!(
        kernel.send(s, r, msg(7, 0, 42), Timeout::Never),
        Poll::Ready(Ok(IpcOutcome::Sent))
    );
    assert_eq!(kernel.take_events(), [Event::Runnable(r)]);
    assert_eq!(kernel.thread_state(r), Ok(ThreadSt::Running));

    let m = assert_received(result_of(&kernel, r), s, 42);
    assert_eq!(m.tag.label(), 7);
    // Retrieved only once
    assert_eq!(kernel.take_ipc_result(r), Ok(None));
}

#[test]
fn utcb_copy_is_bounded_by_tag() {
    let kernel = kernel();
    let (s, r) = (uid(2, 0), uid(3, 0));
    spawn_all(&kernel, &[s, r]);

    kernel
        .modify_utcb(s, |utcb| {
            for (i, v) in utcb.values.iter_mut().enumerate() {
                *v = i + 1;
            }
        })
        .unwrap();

    assert!(kernel.receive(r, Source::Any, Timeout::Never).is_pending());
    assert!(kernel.send(s, r, msg(0, 2, 0), Timeout::Never).is_ready());
    let values = kernel.utcb(r).unwrap().values;
    assert_eq!(&values[..3], &[1, 2, 0]);

    // More words than the UTCB holds
    assert!(kernel.receive(r, Source::Any, Timeout::Never).is_pending());
    assert!(kernel.send(s, r, msg(0, 60, 0), Timeout::Never).is_ready());
    assert_eq!(kernel.utcb(r).unwrap().values[UTCB_VALUES - 1], UTCB_VALUES);
}

#[test]
fn call_and_reply_and_wait() {
    let kernel = kernel();
    let (client, server) = (uid(2, 0), uid(3, 0));
    spawn_all(&kernel, &[client, server]);

    assert!(kernel
        .receive(server, Source::Any, Timeout::Never)
        .is_pending());
    kernel.take_events();

    // The server was waiting, so the client hands the CPU to it
    assert!(kernel
        .call(client, server, msg(1, 0, 10), IpcTimeouts::NEVER)
        .is_pending());
    assert_eq!(
        kernel.take_events(),
        [Event::HandOff(server), Event::LeftReadySet(client)]
    );
    assert_eq!(kernel.thread_state(client), Ok(ThreadSt::Receiving));
    assert_received(result_of(&kernel, server), client, 10);

    // Reply and wait for the next request
    assert!(kernel
        .reply_and_wait(server, client, msg(2, 0, 11), Timeout::Never)
        .is_pending());
    assert_eq!(
        kernel.take_events(),
        [Event::HandOff(client), Event::LeftReadySet(server)]
    );
    assert_received(result_of(&kernel, client), server, 11);
    assert_eq!(kernel.thread_state(server), Ok(ThreadSt::Receiving));
}

/// The server keeps the CPU if the next request is already queued, so the
/// client it replies to is only made runnable.
#[test]
fn reply_without_blocking_is_no_hand_off() {
    let kernel = kernel();
    let (c1, c2, server) = (uid(2, 0), uid(2, 1), uid(3, 0));
    spawn_all(&kernel, &[c1, c2, server]);

    assert!(kernel
        .receive(server, Source::Any, Timeout::Never)
        .is_pending());
    assert!(kernel
        .call(c1, server, msg(1, 0, 1), IpcTimeouts::NEVER)
        .is_pending());
    assert_received(result_of(&kernel, server), c1, 1);
    assert!(kernel
        .call(c2, server, msg(1, 0, 2), IpcTimeouts::NEVER)
        .is_pending());
    kernel.take_events();

    assert_received(
        match kernel.reply_and_wait(server, c1, msg(2, 0, 10), Timeout::Never) {
            Poll::Ready(r) => r,
            Poll::Pending => panic!("the server blocked"),
        },
        c2,
        2,
    );
    assert_eq!(kernel.take_events(), [Event::Runnable(c1)]);
    assert_received(result_of(&kernel, c1), server, 10);
    assert_eq!(kernel.thread_state(server), Ok(ThreadSt::Running));
    assert_eq!(kernel.thread_state(c2), Ok(ThreadSt::Receiving));
}

#[test]
fn blocked_call_moves_straight_to_receive() {
    let kernel = kernel();
    let (client, server) = (uid(2, 0), uid(3, 0));
    spawn_all(&kernel, &[client, server]);

    assert!(kernel
        .call(client, server, msg(1, 0, 20), IpcTimeouts::NEVER)
        .is_pending());
    assert_eq!(kernel.thread_state(client), Ok(ThreadSt::Sending));
    kernel.take_events();

    assert_received(
        match kernel.receive(server, Source::Any, Timeout::Never) {
            Poll::Ready(r) => r,
            Poll::Pending => panic!("receive blocked"),
        },
        client,
        20,
    );
    // The client never became runnable in between
    assert!(kernel.take_events().is_empty());
    assert_eq!(kernel.thread_state(client), Ok(ThreadSt::Receiving));
    assert_eq!(kernel.take_ipc_result(client), Ok(None));

    assert_eq!(
        kernel.send(server, client, msg(2, 0, 21), Timeout::Zero),
        Poll::Ready(Ok(IpcOutcome::Sent))
    );
    assert_eq!(kernel.take_events(), [Event::Runnable(client)]);
    assert_received(result_of(&kernel, client), server, 21);
}

#[test]
fn zero_timeout_would_block() {
    let kernel = kernel();
    let (a, b) = (uid(2, 0), uid(3, 0));
    spawn_all(&kernel, &[a, b]);

    assert_eq!(
        kernel.send(a, b, Message::EMPTY, Timeout::Zero),
        Poll::Ready(Err(IpcError::WouldBlock))
    );
    assert_eq!(
        kernel.receive(a, Source::Any, Timeout::Zero),
        Poll::Ready(Err(IpcError::WouldBlock))
    );
    // An expired absolute deadline counts as zero
    kernel.set_now(100);
    assert_eq!(
        kernel.receive(a, Source::Any, Timeout::Absolute(100)),
        Poll::Ready(Err(IpcError::WouldBlock))
    );

    // The reply can't be delivered, so no receive takes place
    assert_eq!(
        kernel.reply_and_wait(a, b, Message::EMPTY, Timeout::Never),
        Poll::Ready(Err(IpcError::WouldBlock))
    );
    assert_eq!(kernel.thread_state(a), Ok(ThreadSt::Running));
    assert!(kernel.take_events().is_empty());
    assert_eq!(kernel.senders_of(b), Ok(vec![]));
}

#[test]
fn call_with_zero_receive_timeout() {
    let kernel = kernel();
    let (client, server) = (uid(2, 0), uid(3, 0));
    spawn_all(&kernel, &[client, server]);

    assert!(kernel
        .receive(server, Source::Any, Timeout::Never)
        .is_pending());
    kernel.take_events();

    let timeouts = IpcTimeouts {
        send: Timeout::Never,
        receive: Timeout::Zero,
    };
    assert_eq!(
        kernel.call(client, server, msg(0, 0, 1), timeouts),
        Poll::Ready(Err(IpcError::WouldBlock))
    );
    // The client doesn't block, so it keeps the CPU
    assert_eq!(kernel.take_events(), [Event::Runnable(server)]);
    // The request was still delivered
    assert_received(result_of(&kernel, server), client, 1);
}

#[test]
fn invalid_destination() {
    let kernel = kernel();
    let (a, dead) = (uid(2, 0), uid(2, 1));
    kernel.spawn(a, 0x10);
    kernel
        .create_thread(None, dead, Default::default())
        .unwrap();

    for dest in [a, dead, uid(4, 0), Uid::NIL] {
        assert_eq!(
            kernel.send(a, dest, Message::EMPTY, Timeout::Never),
            Poll::Ready(Err(IpcError::InvalidDestination)),
            "{:?}",
            dest
        );
    }
    assert_eq!(
        kernel.receive(a, Source::Thread(a), Timeout::Never),
        Poll::Ready(Err(IpcError::InvalidDestination))
    );
    assert_eq!(
        kernel.ipc(a, None, None, Message::EMPTY, IpcTimeouts::NEVER),
        Poll::Ready(Err(IpcError::InvalidDestination))
    );
}

#[test]
fn caller_must_be_running() {
    let kernel = kernel();
    let (a, b, c) = (uid(2, 0), uid(3, 0), uid(4, 0));
    spawn_all(&kernel, &[a, b]);
    kernel.create_thread(None, c, Default::default()).unwrap();

    // Not started
    assert_eq!(
        kernel.send(c, a, Message::EMPTY, Timeout::Never),
        Poll::Ready(Err(IpcError::BadContext))
    );

    // Already blocked
    assert!(kernel.receive(a, Source::Any, Timeout::Never).is_pending());
    assert_eq!(
        kernel.send(a, b, Message::EMPTY, Timeout::Never),
        Poll::Ready(Err(IpcError::BadContext))
    );

    // Nested kernel entry
    kernel.with_cpu_lock_held(|| {
        assert_eq!(
            kernel.send(b, a, Message::EMPTY, Timeout::Never),
            Poll::Ready(Err(IpcError::BadContext))
        );
    });
    assert_eq!(kernel.take_ipc_result(a), Ok(None));
}

#[test]
fn closed_receive_ignores_queue() {
    let kernel = kernel();
    let (r, a, b) = (uid(2, 0), uid(3, 0), uid(4, 0));
    spawn_all(&kernel, &[r, a, b]);

    assert!(kernel.send(a, r, msg(0, 0, 1), Timeout::Never).is_pending());
    assert!(kernel.receive(r, Source::Thread(b), Timeout::Never).is_pending());

    // `a` isn't accepted, `b` is
    assert!(kernel.send(b, r, msg(0, 0, 2), Timeout::Never).is_ready());
    assert_received(result_of(&kernel, r), b, 2);
    assert_eq!(kernel.senders_of(r), Ok(vec![a]));

    // A closed receive picks its partner out of the queue
    let c = uid(5, 0);
    spawn_all(&kernel, &[c]);
    assert!(kernel.send(c, r, msg(0, 0, 3), Timeout::Never).is_pending());
    assert_eq!(kernel.senders_of(r), Ok(vec![a, c]));
    assert_received(
        match kernel.receive(r, Source::Thread(c), Timeout::Never) {
            Poll::Ready(r) => r,
            Poll::Pending => panic!("receive blocked"),
        },
        c,
        3,
    );
    assert_eq!(kernel.senders_of(r), Ok(vec![a]));
}

#[test]
fn receive_times_out() {
    let kernel = kernel();
    let r = uid(2, 0);
    spawn_all(&kernel, &[r]);

    kernel.set_now(1000);
    assert!(kernel
        .receive(r, Source::Any, Timeout::Relative(5))
        .is_pending());
    assert!(kernel.thread_flags(r).unwrap().contains(ThreadFlags::TIMEOUT_PENDING));

    assert!(!kernel.advance_to(1004));
    assert!(kernel.advance_to(1005));
    assert_eq!(result_of(&kernel, r), Err(IpcError::Timeout));
    assert_eq!(
        kernel.timeout_flags(r, TimeoutKind::IpcReceive),
        Ok(TimeoutFlags::FIRED)
    );
    assert_eq!(kernel.thread_flags(r), Ok(ThreadFlags::READY));
    assert_eq!(kernel.thread_state(r), Ok(ThreadSt::Running));
}

#[test]
fn call_reply_phase_times_out() {
    let kernel = kernel();
    let (client, server) = (uid(2, 0), uid(3, 0));
    spawn_all(&kernel, &[client, server]);

    assert!(kernel
        .receive(server, Source::Any, Timeout::Never)
        .is_pending());
    let timeouts = IpcTimeouts {
        send: Timeout::Never,
        receive: Timeout::Relative(10),
    };
    assert!(kernel.call(client, server, msg(0, 0, 1), timeouts).is_pending());
    assert_eq!(
        kernel.remaining_time(client, TimeoutKind::IpcReceive),
        Ok(Some(10))
    );

    kernel.advance_to(10);
    assert_eq!(result_of(&kernel, client), Err(IpcError::Timeout));

    // The late reply finds nobody waiting
    assert_eq!(
        kernel.send(server, client, Message::EMPTY, Timeout::Zero),
        Poll::Ready(Err(IpcError::WouldBlock))
    );
}

#[test]
fn combined_ipc_resumes_into_open_receive() {
    let kernel = kernel();
    let (c, s, d) = (uid(2, 0), uid(3, 0), uid(4, 0));
    spawn_all(&kernel, &[c, s, d]);

    // `c` blocks sending to `s`, then wants to receive from anyone
    assert!(kernel
        .ipc(c, Some(s), Some(Source::Any), msg(0, 0, 1), IpcTimeouts::NEVER)
        .is_pending());
    // `d` queues up on `c` meanwhile
    assert!(kernel.send(d, c, msg(0, 0, 2), Timeout::Never).is_pending());
    kernel.take_events();

    assert_received(
        match kernel.receive(s, Source::Any, Timeout::Never) {
            Poll::Ready(r) => r,
            Poll::Pending => panic!("receive blocked"),
        },
        c,
        1,
    );
    // `c` picked up the message of `d` without blocking again
    assert_eq!(
        kernel.take_events(),
        [Event::Runnable(d), Event::Runnable(c)]
    );
    assert_eq!(result_of(&kernel, d), Ok(IpcOutcome::Sent));
    assert_received(result_of(&kernel, c), d, 2);
}

#[test]
fn combined_ipc_receive_only() {
    let kernel = kernel();
    let (a, b) = (uid(2, 0), uid(3, 0));
    spawn_all(&kernel, &[a, b]);

    assert!(kernel.send(b, a, msg(0, 0, 5), Timeout::Never).is_pending());
    assert_received(
        match kernel.ipc(a, None, Some(Source::Thread(b)), Message::EMPTY, IpcTimeouts::NEVER) {
            Poll::Ready(r) => r,
            Poll::Pending => panic!("receive blocked"),
        },
        b,
        5,
    );

    // Send only
    assert!(kernel.receive(b, Source::Any, Timeout::Never).is_pending());
    assert_eq!(
        kernel.ipc(a, Some(b), None, msg(0, 0, 6), IpcTimeouts::NEVER),
        Poll::Ready(Ok(IpcOutcome::Sent))
    );
    assert_received(result_of(&kernel, b), a, 6);
}

#[test]
fn exception_round_trip() {
    let kernel = kernel();
    let (t, handler) = (uid(2, 0), uid(3, 0));
    spawn_all(&kernel, &[t, handler]);

    assert_eq!(
        kernel.deliver_exception(t, IpcTimeouts::NEVER),
        Poll::Ready(Err(IpcError::BadContext))
    );

    let frame = ExceptionFrame {
        rax: 1,
        trapno: 14,
        err: 6,
        ip: 0x1000,
        ..Default::default()
    };
    kernel.raise_exception(t, handler, frame).unwrap();
    assert!(kernel
        .thread_flags(t)
        .unwrap()
        .contains(ThreadFlags::EXCEPTION_TRIGGERED));

    assert!(kernel
        .receive(handler, Source::Any, Timeout::Never)
        .is_pending());
    assert!(kernel.deliver_exception(t, IpcTimeouts::NEVER).is_pending());
    assert!(kernel
        .thread_flags(t)
        .unwrap()
        .contains(ThreadFlags::IN_EXCEPTION));

    let m = assert_received(result_of(&kernel, handler), t, 14);
    assert_eq!(m.tag.label(), EXCEPTION_LABEL);
    assert_eq!(m.tag.words(), ExceptionFrame::WORDS);
    assert_eq!(&m.words[1..], &[6, 0x1000]);
    assert_eq!(kernel.utcb(handler).unwrap().read_exception(), frame);

    // The handler skips the faulting instruction
    kernel
        .modify_utcb(handler, |utcb| {
            let mut frame = utcb.read_exception();
            frame.ip += 2;
            utcb.write_exception(&frame);
        })
        .unwrap();
    assert_eq!(
        kernel.send(
            handler,
            t,
            msg(0, ExceptionFrame::WORDS, 0),
            Timeout::Never
        ),
        Poll::Ready(Ok(IpcOutcome::Sent))
    );

    assert!(result_of(&kernel, t).is_ok());
    assert_eq!(kernel.exception_frame(t).unwrap().ip, 0x1002);
    assert_eq!(kernel.thread_flags(t), Ok(ThreadFlags::READY));
}

#[test]
fn exception_without_handler() {
    let kernel = kernel();
    let t = uid(2, 0);
    spawn_all(&kernel, &[t]);

    kernel
        .raise_exception(t, uid(6, 0), ExceptionFrame::ZERO)
        .unwrap();
    assert_eq!(
        kernel.deliver_exception(t, IpcTimeouts::NEVER),
        Poll::Ready(Err(IpcError::InvalidDestination))
    );
    assert_eq!(
        kernel.thread_flags(t),
        Ok(ThreadFlags::READY | ThreadFlags::EXCEPTION_TRIGGERED)
    );

    assert_eq!(
        kernel.take_ipc_result(uid(6, 0)),
        Err(ThreadOpError::NoAccess)
    );
}

#[test]
fn snapshot_shows_wait_queues() {
    let kernel = kernel();
    let (r, a, b) = (uid(2, 0), uid(3, 0), uid(4, 0));
    spawn_all(&kernel, &[r, a, b]);

    assert!(kernel
        .send(a, r, Message::EMPTY, Timeout::Relative(30))
        .is_pending());
    assert!(kernel.send(b, r, Message::EMPTY, Timeout::Never).is_pending());

    let snapshot = kernel.snapshot().unwrap();
    let queues: Vec<_> = snapshot.wait_queues().collect();
    assert_eq!(queues, [(r, &[a, b][..])]);
    assert_eq!(snapshot.thread(a).unwrap().state, ThreadSt::Sending);
    assert_eq!(snapshot.timeouts.len(), 1);
    assert_eq!(snapshot.timeouts[0].owner, a);
    assert_eq!(snapshot.timeouts[0].kind, TimeoutKind::IpcSend);

    let text = snapshot.to_string();
    log::debug!("{}", text);
    assert!(text.contains("senders"));
}
