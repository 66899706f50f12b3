mod common;

use std::sync::{Arc, Mutex};

use common::{finish, manual_kernel, wait_until, Trace};
use relay_threads::{
    isr::{self, Wake},
    sync::Signal,
    time::Timeout,
    ThreadState, WaitError,
};

#[test]
fn repeated_signal_is_delivered_once() {
    let kernel = manual_kernel();
    let signal = Arc::new(Signal::new());

    let wakes = kernel.interrupt(|| [signal.signal(), signal.signal()]);
    assert_eq!(wakes, [Wake::Posted, Wake::Unchanged]);
    assert!(signal.is_available());

    let outcome = Arc::new(Mutex::new(None));
    let (s, o) = (signal.clone(), outcome.clone());
    kernel
        .spawn("taker", 1, move || {
            let first = s.wait(Timeout::Immediate);
            let second = s.wait(Timeout::Immediate);
            *o.lock().unwrap() = Some((first, second));
        })
        .unwrap();

    kernel.start();
    finish(kernel);

    assert_eq!(
        *outcome.lock().unwrap(),
        Some((Ok(()), Err(WaitError::Timeout)))
    );
    assert!(!signal.is_available());
}

#[test]
fn forever_wait_ignores_time() {
    let kernel = manual_kernel();
    let signal = Arc::new(Signal::new());
    let outcome = Arc::new(Mutex::new(None));

    let (s, o) = (signal.clone(), outcome.clone());
    let pid = kernel
        .spawn("waiter", 1, move || {
            *o.lock().unwrap() = Some(s.wait(Timeout::Forever));
        })
        .unwrap();

    kernel.start();
    assert!(wait_until(|| kernel.get_state(pid) == Some(ThreadState::SignalBlocked)));
    kernel.advance(50);
    assert_eq!(kernel.get_state(pid), Some(ThreadState::SignalBlocked));

    // an idle CPU always has room for the woken thread
    let wake = kernel.interrupt(|| {
        let wake = signal.signal();
        isr::yield_from_isr(wake);
        wake
    });
    assert_eq!(wake, Wake::Preempt);
    finish(kernel);

    assert_eq!(*outcome.lock().unwrap(), Some(Ok(())));
    assert!(!signal.is_available());
}

#[test]
fn waiters_are_released_by_priority_then_arrival() {
    let kernel = manual_kernel();
    let signal = Arc::new(Signal::new());
    let trace = Trace::new();

    for (name, prio) in [("a", 1), ("b", 3), ("c", 3)] {
        let (s, t) = (signal.clone(), trace.clone());
        kernel
            .spawn(name, prio, move || {
                s.wait(Timeout::Forever).unwrap();
                t.push(name);
            })
            .unwrap();
    }

    kernel.start();
    assert!(kernel.settle(common::LIMIT));
    for _ in 0..3 {
        kernel.interrupt(|| isr::yield_from_isr(signal.signal()));
        assert!(kernel.settle(common::LIMIT));
    }
    finish(kernel);

    assert_eq!(trace.snapshot(), ["b", "c", "a"]);
}

#[test]
fn try_wait_never_blocks() {
    let kernel = manual_kernel();
    let signal = Signal::new();

    let taken = kernel.interrupt(|| {
        let empty = signal.try_wait();
        signal.signal();
        (empty, signal.try_wait(), signal.try_wait())
    });
    assert_eq!(taken, (false, true, false));
    kernel.shutdown();
}

#[test]
fn interrupt_context_cannot_block() {
    let kernel = manual_kernel();
    let signal = Signal::new();

    let results = kernel.interrupt(|| {
        [
            signal.wait(Timeout::Forever),
            signal.wait(Timeout::ticks(3)),
            signal.wait(Timeout::Immediate),
        ]
    });
    assert_eq!(
        results,
        [
            Err(WaitError::InterruptContext),
            Err(WaitError::InterruptContext),
            Err(WaitError::Timeout),
        ]
    );

    kernel.interrupt(|| signal.signal());
    assert_eq!(kernel.interrupt(|| signal.wait(Timeout::Forever)), Ok(()));
    kernel.shutdown();
}
