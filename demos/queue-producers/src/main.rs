//! Two producers share one bounded [`Channel`] with a single consumer, run
//! twice with the priorities swapped.
//!
//! First the consumer outranks both producers: every number is taken as soon
//! as it is sent, so the queue of five never holds anything and the
//! producers never wait. Then the producers outrank the consumer and send
//! [`Reading`]s tagged with their origin: they fill the queue of three and
//! block, so the consumer only ever runs on a full queue.

use std::time::Duration as StdDuration;

use portable_atomic::{AtomicU32, Ordering};
use relay::{
    debug::{
        log::{info, warn},
        println,
    },
    thread::{sync::Channel, time::Timeout, Config, Kernel, SpawnError, WaitError},
};

/// Messages sent by every producer per run.
const ROUNDS: u32 = 10;
const DEFAULT_SECS: u64 = 5;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Producer {
    One,
    Two,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct Reading {
    value: u8,
    source: Producer,
}

struct Tally {
    received: AtomicU32,
    unexpected: AtomicU32,
}

impl Tally {
    const fn new() -> Self {
        Self {
            received: AtomicU32::new(0),
            unexpected: AtomicU32::new(0),
        }
    }

    fn received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    fn unexpected(&self) {
        self.unexpected.fetch_add(1, Ordering::Relaxed);
    }
}

static NUMBERS: Channel<i32, 5> = Channel::new();
static READINGS: Channel<Reading, 3> = Channel::new();
static CONSUMER_FIRST: Tally = Tally::new();
static PRODUCERS_FIRST: Tally = Tally::new();

fn run_time() -> StdDuration {
    let secs = std::env::var("RELAY_DEMO_SECS")
        .ok()
        .and_then(|secs| secs.parse().ok())
        .unwrap_or(DEFAULT_SECS);
    StdDuration::from_secs(secs)
}

fn number_producer(value: i32) {
    for _ in 0..ROUNDS {
        println!("Sending {} to the queue...", value);
        if NUMBERS.try_send(value).is_err() {
            println!("Could not send to the queue.");
            CONSUMER_FIRST.unexpected();
        }
        relay::thread::yield_same();
    }
}

fn number_consumer() {
    let mut received = 0;
    while received < 2 * ROUNDS {
        if !NUMBERS.is_empty() {
            println!("Queue should have been empty!");
            CONSUMER_FIRST.unexpected();
        }
        match NUMBERS.receive(Timeout::millis(100)) {
            Ok(value) => {
                println!("Received = {}", value);
                received += 1;
                CONSUMER_FIRST.received();
            }
            Err(WaitError::Cancelled) => break,
            Err(_) => {
                println!("Could not receive from the queue.");
                CONSUMER_FIRST.unexpected();
            }
        }
    }
}

fn spawn_consumer_first(kernel: &Kernel) -> Result<(), SpawnError> {
    kernel.spawn("sender-1", 1, || number_producer(100))?;
    kernel.spawn("sender-2", 1, || number_producer(200))?;
    kernel.spawn("receiver", 2, number_consumer)?;
    Ok(())
}

fn reading_producer(reading: Reading) {
    for _ in 0..ROUNDS {
        match READINGS.send(reading, Timeout::millis(100)) {
            Ok(()) => {}
            Err(err) if err.reason == WaitError::Cancelled => return,
            Err(_) => {
                println!("Could not send to the queue.");
                PRODUCERS_FIRST.unexpected();
            }
        }
    }
}

fn reading_consumer() {
    let total = 2 * ROUNDS;
    let mut received = 0;
    while received < total {
        // the producers only block on a full queue; a short queue means they are done
        let left = usize::try_from(total - received).unwrap_or(usize::MAX);
        if READINGS.len() != left.min(READINGS.capacity()) {
            println!("Queue should have been full!");
            PRODUCERS_FIRST.unexpected();
        }
        match READINGS.receive(Timeout::Immediate) {
            Ok(Reading { value, source }) => {
                let sender = match source {
                    Producer::One => 1,
                    Producer::Two => 2,
                };
                println!("From Sender {} = {}", sender, value);
                received += 1;
                PRODUCERS_FIRST.received();
            }
            Err(WaitError::Cancelled) => break,
            Err(_) => {
                println!("Could not receive from the queue.");
                PRODUCERS_FIRST.unexpected();
            }
        }
    }
}

fn spawn_producers_first(kernel: &Kernel) -> Result<(), SpawnError> {
    for (name, reading) in [
        ("sender-1", Reading { value: 100, source: Producer::One }),
        ("sender-2", Reading { value: 200, source: Producer::Two }),
    ] {
        kernel.spawn(name, 2, move || reading_producer(reading))?;
    }
    kernel.spawn("receiver", 1, reading_consumer)?;
    Ok(())
}

fn run(
    label: &str,
    spawn: fn(&Kernel) -> Result<(), SpawnError>,
    tally: &Tally,
    limit: StdDuration,
) -> Result<(), SpawnError> {
    println!("{}", label);
    let kernel = Kernel::new(Config::default());
    spawn(&kernel)?;
    kernel.start();
    if !kernel.wait_for_tasks(limit) {
        warn!("threads still running after {:?}", limit);
    }
    kernel.shutdown();
    info!(
        "{} messages received, {} unexpected outcomes",
        tally.received.load(Ordering::Relaxed),
        tally.unexpected.load(Ordering::Relaxed)
    );
    Ok(())
}

fn main() -> Result<(), SpawnError> {
    relay::debug::init();

    let limit = run_time();
    run("Receiver outranks the senders", spawn_consumer_first, &CONSUMER_FIRST, limit)?;
    run("Senders outrank the receiver", spawn_producers_first, &PRODUCERS_FIRST, limit)?;
    Ok(())
}
