//! Three interrupt sources (two hardware timers and a button) share one event
//! handler thread. Every interrupt records one event on a [`Counter`] that
//! latches up to ten of them, and queues a [`Tagged`] record so the handler
//! knows which source fired and when.
//!
//! The sources are simulated by OS threads: timer 0 fires every 500 ms,
//! timer 1 every 1000 ms and the button every 1300 ms.

use std::{thread, time::Duration as StdDuration};

use portable_atomic::{AtomicBool, AtomicU32, Ordering};
use relay::{
    debug::{
        log::{info, warn},
        println,
    },
    thread::{
        event::Tagged,
        isr,
        sync::{Channel, Counter},
        time::Timeout,
        Config, Kernel, SpawnError, TryReceiveError,
    },
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Source {
    Timer0,
    Timer1,
    Gpio,
}

const EVENT_CAPACITY: usize = 10;

static EVENTS: Counter = Counter::new(EVENT_CAPACITY as u32, 0);
static ORIGINS: Channel<Tagged<Source, ()>, EVENT_CAPACITY> = Channel::new();
static HANDLED: AtomicU32 = AtomicU32::new(0);
static STOP: AtomicBool = AtomicBool::new(false);

const DEFAULT_SECS: u64 = 5;

fn run_time() -> StdDuration {
    let secs = std::env::var("RELAY_DEMO_SECS")
        .ok()
        .and_then(|secs| secs.parse().ok())
        .unwrap_or(DEFAULT_SECS);
    StdDuration::from_secs(secs)
}

/// Interrupt handler shared by all sources.
fn on_interrupt(source: Source) {
    let origin = match ORIGINS.try_send(Tagged::new(source, ())) {
        Ok(wake) => wake,
        Err(_) => {
            warn!("event queue full, origin of {:?} lost", source);
            return;
        }
    };
    let wake = EVENTS.signal().merge(origin);
    isr::yield_from_isr(wake);
}

fn event_thread() {
    while EVENTS.wait(Timeout::Forever).is_ok() {
        match ORIGINS.try_receive() {
            Ok((event, _)) => {
                let name = match event.source {
                    Source::Timer0 => "TIMER 0",
                    Source::Timer1 => "TIMER 1",
                    Source::Gpio => "GPIO",
                };
                println!(
                    "INTERRUPTION FROM {} at {}ms",
                    name,
                    event.timestamp.duration_since_epoch().to_millis()
                );
                HANDLED.fetch_add(1, Ordering::Relaxed);
            }
            Err(TryReceiveError::Empty) => warn!("event without origin"),
        }
    }
}

fn spawn_source(
    kernel: &Kernel,
    source: Source,
    period: StdDuration,
) -> thread::JoinHandle<()> {
    let kernel = kernel.clone();
    thread::spawn(move || {
        while !STOP.load(Ordering::Acquire) {
            thread::sleep(period);
            kernel.interrupt(|| on_interrupt(source));
        }
    })
}

fn main() -> Result<(), SpawnError> {
    relay::debug::init();

    let kernel = Kernel::new(Config::default());
    kernel.spawn("events", 3, event_thread)?;
    kernel.start();

    let sources = [
        spawn_source(&kernel, Source::Timer0, StdDuration::from_millis(500)),
        spawn_source(&kernel, Source::Timer1, StdDuration::from_millis(1000)),
        spawn_source(&kernel, Source::Gpio, StdDuration::from_millis(1300)),
    ];

    thread::sleep(run_time());
    STOP.store(true, Ordering::Release);
    for source in sources {
        let _ = source.join();
    }
    kernel.shutdown();

    info!(
        "{} events handled, {} pending",
        HANDLED.load(Ordering::Relaxed),
        EVENTS.count()
    );
    Ok(())
}
