mod common;

use std::{
    ops::ControlFlow,
    sync::{Arc, Mutex},
};

use common::{finish, manual_kernel, wait_until, Trace, LIMIT};
use relay_threads::{
    consumer::{self, Consumer, Exit},
    event::Tagged,
    isr,
    sync::{Channel, Counter, Latest, Signal},
    time::{Instant, Timeout},
    ThreadState,
};

#[test]
fn stops_when_consumer_breaks() {
    let kernel = manual_kernel();
    let channel = Arc::new(Channel::<u8, 3>::new());
    let seen = Trace::<u8>::new();
    let exit = Arc::new(Mutex::new(None));

    for n in 1..=3 {
        kernel.interrupt(|| channel.try_send(n)).unwrap();
    }

    let (c, s, e) = (channel.clone(), seen.clone(), exit.clone());
    kernel
        .spawn("consumer", 1, move || {
            let result = consumer::run(&*c, Timeout::Forever, &mut |n: u8| {
                s.push(n);
                if n == 2 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            });
            *e.lock().unwrap() = Some(result);
        })
        .unwrap();

    kernel.start();
    finish(kernel);

    assert_eq!(seen.snapshot(), [1, 2]);
    assert_eq!(*exit.lock().unwrap(), Some(Exit::Stopped));
    assert_eq!(channel.len(), 1);
}

#[derive(Default)]
struct Watchdog {
    events: u32,
    timeouts: Vec<u64>,
}

impl Consumer<()> for Watchdog {
    fn process(&mut self, (): ()) -> ControlFlow<()> {
        self.events += 1;
        ControlFlow::Continue(())
    }

    fn on_timeout(&mut self) -> ControlFlow<()> {
        self.timeouts.push(relay_threads::now().ticks());
        if self.timeouts.len() == 2 {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }
}

#[test]
fn timeout_handler_runs_once_per_quiet_period() {
    let kernel = manual_kernel();
    let signal = Arc::new(Signal::new());
    let outcome = Arc::new(Mutex::new(None));

    let (s, o) = (signal.clone(), outcome.clone());
    kernel
        .spawn("watchdog", 1, move || {
            let mut watchdog = Watchdog::default();
            let exit = consumer::run(&s, Timeout::ticks(5), &mut watchdog);
            *o.lock().unwrap() = Some((exit, watchdog.events, watchdog.timeouts));
        })
        .unwrap();

    kernel.start();
    assert!(kernel.settle(LIMIT));
    kernel.advance(2);
    kernel.interrupt(|| isr::yield_from_isr(signal.signal()));
    assert!(kernel.settle(LIMIT));
    kernel.advance(10);
    finish(kernel);

    assert_eq!(
        *outcome.lock().unwrap(),
        Some((Exit::Stopped, 1, vec![7, 12]))
    );
}

#[test]
fn deleted_consumer_exits_cancelled() {
    let kernel = manual_kernel();
    let counter = Arc::new(Counter::new(10, 0));
    let outcome = Arc::new(Mutex::new(None));

    let (c, o) = (counter.clone(), outcome.clone());
    let pid = kernel
        .spawn("consumer", 1, move || {
            let mut events = 0;
            let exit = consumer::run(&*c, Timeout::ticks(1), &mut |()| {
                events += 1;
                ControlFlow::Continue(())
            });
            *o.lock().unwrap() = Some((exit, events));
        })
        .unwrap();

    kernel.start();
    assert!(wait_until(|| kernel.get_state(pid) == Some(ThreadState::CounterBlocked)));
    // the default timeout handler keeps the loop alive
    kernel.advance(3);
    kernel.interrupt(|| {
        counter.signal();
        isr::yield_from_isr(counter.signal());
    });
    assert!(kernel.settle(LIMIT));
    assert!(kernel.delete(pid));
    finish(kernel);

    assert_eq!(*outcome.lock().unwrap(), Some((Exit::Cancelled, 2)));
}

#[test]
fn interrupt_context_run_fails() {
    let kernel = manual_kernel();
    let latest = Latest::<u8>::new();
    let exit = kernel.interrupt(|| {
        consumer::run(&latest, Timeout::Forever, &mut |_: u8| ControlFlow::Continue(()))
    });
    assert_eq!(
        exit,
        Exit::Failed(relay_threads::WaitError::InterruptContext)
    );
    kernel.shutdown();
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Origin {
    Button,
    Adc,
}

#[test]
fn tagged_events_keep_origin_and_time() {
    let kernel = manual_kernel();
    let events = Arc::new(Channel::<Tagged<Origin, u16>, 4>::new());
    let seen = Trace::<Tagged<Origin, u16>>::new();

    let (e, s) = (events.clone(), seen.clone());
    kernel
        .spawn("dispatcher", 1, move || {
            consumer::run(&e, Timeout::Forever, &mut |event: Tagged<Origin, u16>| {
                s.push(event);
                if s.len() == 2 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            });
        })
        .unwrap();

    kernel.start();
    assert!(kernel.settle(LIMIT));
    kernel.advance(3);
    kernel.interrupt(|| {
        let wake = events.try_send(Tagged::new(Origin::Button, 0)).unwrap();
        isr::yield_from_isr(wake);
    });
    assert!(kernel.settle(LIMIT));
    kernel.advance(4);
    kernel.interrupt(|| {
        let wake = events.try_send(Tagged::new(Origin::Adc, 1234)).unwrap();
        isr::yield_from_isr(wake);
    });
    finish(kernel);

    assert_eq!(
        seen.snapshot(),
        [
            Tagged::at(Origin::Button, Instant::from_ticks(3), 0),
            Tagged::at(Origin::Adc, Instant::from_ticks(7), 1234),
        ]
    );
}
