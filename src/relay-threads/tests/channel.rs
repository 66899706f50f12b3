mod common;

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use common::{finish, manual_kernel, wait_until, Trace, LIMIT};
use proptest::prelude::*;
use relay_threads::{
    isr::{self, Wake},
    sync::{Channel, Signal},
    time::Timeout,
    Config, Kernel, SendError, ThreadState, TryReceiveError, TrySendError, WaitError,
};

#[test]
fn full_channel_refills_from_blocked_senders_in_order() {
    let kernel = manual_kernel();
    let channel = Arc::new(Channel::<u32, 3>::new());
    let go = Arc::new(Signal::new());
    let received = Trace::<u32>::new();
    let len_after_first = Arc::new(Mutex::new(None));

    let c = channel.clone();
    let first = kernel
        .spawn("producer-1", 2, move || {
            for n in 1..=4 {
                c.send(n, Timeout::Forever).unwrap();
            }
        })
        .unwrap();
    let c = channel.clone();
    let second = kernel
        .spawn("producer-2", 2, move || c.send(10, Timeout::Forever).unwrap())
        .unwrap();
    let (c, g, r, l) = (
        channel.clone(),
        go.clone(),
        received.clone(),
        len_after_first.clone(),
    );
    kernel
        .spawn("consumer", 1, move || {
            g.wait(Timeout::Forever).unwrap();
            for i in 0..5 {
                r.push(c.receive(Timeout::Forever).unwrap());
                if i == 0 {
                    *l.lock().unwrap() = Some(c.len());
                }
            }
        })
        .unwrap();

    kernel.start();
    assert!(kernel.settle(LIMIT));
    assert!(channel.is_full());
    assert_eq!(channel.len(), 3);
    for pid in [first, second] {
        assert!(matches!(
            kernel.get_state(pid),
            Some(ThreadState::ChannelTxBlocked(_))
        ));
    }

    kernel.interrupt(|| isr::yield_from_isr(go.signal()));
    finish(kernel);

    assert_eq!(received.snapshot(), [1, 2, 3, 4, 10]);
    assert_eq!(*len_after_first.lock().unwrap(), Some(3));
    assert!(channel.is_empty());
}

#[test]
fn timed_out_send_returns_message_and_leaves_channel_untouched() {
    let kernel = manual_kernel();
    let channel = Arc::new(Channel::<u8, 1>::new());
    let outcome = Arc::new(Mutex::new(None));

    let (c, o) = (channel.clone(), outcome.clone());
    let pid = kernel
        .spawn("sender", 1, move || {
            c.send(1, Timeout::Immediate).unwrap();
            let immediate = c.send(2, Timeout::Immediate);
            let bounded = c.send(3, Timeout::ticks(3));
            *o.lock().unwrap() = Some((immediate, bounded));
        })
        .unwrap();

    kernel.start();
    assert!(wait_until(|| matches!(
        kernel.get_state(pid),
        Some(ThreadState::ChannelTxBlocked(_))
    )));
    kernel.advance(3);
    assert!(kernel.wait_for_tasks(LIMIT));

    assert_eq!(
        *outcome.lock().unwrap(),
        Some((
            Err(SendError {
                reason: WaitError::Timeout,
                message: 2
            }),
            Err(SendError {
                reason: WaitError::Timeout,
                message: 3
            }),
        ))
    );
    assert_eq!(kernel.interrupt(|| channel.try_receive()), Ok((1, Wake::Posted)));
    assert_eq!(
        kernel.interrupt(|| channel.try_receive()),
        Err(TryReceiveError::Empty)
    );
    kernel.shutdown();
}

#[test]
fn blocked_receiver_gets_message_directly() {
    let kernel = manual_kernel();
    let channel = Arc::new(Channel::<u8, 2>::new());
    let outcome = Arc::new(Mutex::new(None));

    let (c, o) = (channel.clone(), outcome.clone());
    let pid = kernel
        .spawn("receiver", 1, move || {
            *o.lock().unwrap() = Some(c.receive(Timeout::Forever));
        })
        .unwrap();

    kernel.start();
    assert!(wait_until(|| matches!(
        kernel.get_state(pid),
        Some(ThreadState::ChannelRxBlocked(_))
    )));
    let wake = kernel.interrupt(|| {
        let wake = channel.try_send(7).unwrap();
        isr::yield_from_isr(wake);
        wake
    });
    assert_eq!(wake, Wake::Preempt);
    assert!(channel.is_empty());
    finish(kernel);

    assert_eq!(*outcome.lock().unwrap(), Some(Ok(7)));
}

#[test]
fn interrupt_receive_lets_blocked_sender_in() {
    let kernel = manual_kernel();
    let channel = Arc::new(Channel::<u8, 1>::new());

    let c = channel.clone();
    let pid = kernel
        .spawn("sender", 1, move || {
            c.send(1, Timeout::Forever).unwrap();
            c.send(2, Timeout::Forever).unwrap();
        })
        .unwrap();

    kernel.start();
    assert!(wait_until(|| matches!(
        kernel.get_state(pid),
        Some(ThreadState::ChannelTxBlocked(_))
    )));
    let received = kernel.interrupt(|| {
        let received = channel.try_receive();
        if let Ok((_, wake)) = received {
            isr::yield_from_isr(wake);
        }
        received
    });
    assert_eq!(received, Ok((1, Wake::Preempt)));
    assert!(kernel.wait_for_tasks(LIMIT));

    assert_eq!(kernel.interrupt(|| channel.try_receive()), Ok((2, Wake::Posted)));
    kernel.shutdown();
}

#[test]
fn try_send_hands_back_message_when_full() {
    let kernel = manual_kernel();
    let channel = Channel::<&str, 1>::new();

    let results = kernel.interrupt(|| (channel.try_send("kept"), channel.try_send("bounced")));
    assert_eq!(results.0, Ok(Wake::Posted));
    assert_eq!(results.1, Err(TrySendError::Full("bounced")));
    assert_eq!(
        kernel.interrupt(|| channel.receive(Timeout::Forever)),
        Ok("kept")
    );
    assert_eq!(
        kernel.interrupt(|| channel.receive(Timeout::Forever)),
        Err(WaitError::InterruptContext)
    );
    kernel.shutdown();
}

#[derive(Clone, Debug, PartialEq)]
struct Reading {
    channel: u8,
    millivolts: u16,
    label: String,
}

#[test]
fn structured_messages_arrive_intact() {
    let kernel = manual_kernel();
    let channel = Arc::new(Channel::<Reading, 3>::new());
    let outcome = Arc::new(Mutex::new(Vec::new()));

    let sent = vec![
        Reading {
            channel: 0,
            millivolts: 1234,
            label: "adc0".into(),
        },
        Reading {
            channel: 5,
            millivolts: 3300,
            label: "adc5".into(),
        },
    ];
    for reading in sent.clone() {
        kernel.interrupt(|| channel.try_send(reading)).unwrap();
    }

    let (c, o) = (channel.clone(), outcome.clone());
    kernel
        .spawn("reader", 1, move || {
            while let Ok(reading) = c.receive(Timeout::Immediate) {
                o.lock().unwrap().push(reading);
            }
        })
        .unwrap();

    kernel.start();
    finish(kernel);

    assert_eq!(*outcome.lock().unwrap(), sent);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn behaves_like_a_bounded_fifo(ops in prop::collection::vec(prop::option::of(any::<u8>()), 0..64)) {
        const CAPACITY: usize = 4;
        let kernel = Kernel::new(Config::manual());
        let channel = Channel::<u8, CAPACITY>::new();
        let mut model = VecDeque::new();

        for op in ops {
            match op {
                Some(value) => {
                    let sent = kernel.interrupt(|| channel.try_send(value));
                    if model.len() < CAPACITY {
                        model.push_back(value);
                        prop_assert_eq!(sent, Ok(Wake::Posted));
                    } else {
                        prop_assert_eq!(sent, Err(TrySendError::Full(value)));
                    }
                }
                None => {
                    let received = kernel.interrupt(|| channel.try_receive()).map(|(value, _)| value);
                    prop_assert_eq!(received.ok(), model.pop_front());
                }
            }
            prop_assert_eq!(channel.len(), model.len());
        }
        kernel.shutdown();
    }
}
