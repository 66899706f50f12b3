//! Two periodic threads print every 1000 ms and every 4500 ms without drift.
//! Two busy threads of the lowest priority fight over the blue LED, yielding
//! to each other after every write.
//!
//! The red LED thread keeps it on for 3000 ms and off for 3000 ms, then
//! deletes itself through the handle it was spawned with.

use std::{sync::OnceLock, thread, time::Duration as StdDuration};

use portable_atomic::{AtomicBool, AtomicU32, Ordering};
use relay::{
    debug::{log::info, println},
    thread::{time::Duration, Config, Kernel, SpawnError, ThreadId},
};

static LED_RED: AtomicBool = AtomicBool::new(false);
static LED_BLUE: AtomicBool = AtomicBool::new(false);
static BLUE_WRITES: AtomicU32 = AtomicU32::new(0);
static RED_HANDLE: OnceLock<ThreadId> = OnceLock::new();

const DEFAULT_SECS: u64 = 8;
const RED_PERIOD: Duration = Duration::millis(3000);

fn run_time() -> StdDuration {
    let secs = std::env::var("RELAY_DEMO_SECS")
        .ok()
        .and_then(|secs| secs.parse().ok())
        .unwrap_or(DEFAULT_SECS);
    StdDuration::from_secs(secs)
}

fn periodic(label: &'static str, period: Duration) -> impl FnOnce() + Send + 'static {
    move || {
        let mut last = relay::thread::now();
        loop {
            println!("{} IS RUNNING", label);
            if relay::thread::sleep_until(&mut last, period).is_err() {
                break;
            }
        }
    }
}

fn blue(level: bool) -> impl FnOnce() + Send + 'static {
    move || {
        while !relay::thread::is_cancelled() {
            LED_BLUE.store(level, Ordering::Relaxed);
            BLUE_WRITES.fetch_add(1, Ordering::Relaxed);
            relay::thread::yield_same();
        }
    }
}

fn red_thread() {
    let mut last = relay::thread::now();
    while !relay::thread::is_cancelled() {
        LED_RED.store(true, Ordering::Relaxed);
        if relay::thread::sleep_until(&mut last, RED_PERIOD).is_err() {
            break;
        }
        LED_RED.store(false, Ordering::Relaxed);
        if relay::thread::sleep_until(&mut last, RED_PERIOD).is_err() {
            break;
        }
        if let Some(&handle) = RED_HANDLE.get() {
            info!("red LED thread {} deletes itself", handle);
            relay::thread::delete(handle);
        }
    }
}

fn spawn_red(kernel: &Kernel) -> Result<ThreadId, SpawnError> {
    let pid = kernel.spawn("led-red", 2, red_thread)?;
    let _ = RED_HANDLE.set(pid);
    Ok(pid)
}

fn main() -> Result<(), SpawnError> {
    relay::debug::init();

    let kernel = Kernel::new(Config::default());
    kernel.spawn("task-1", 1, periodic("TASK 1", Duration::millis(1000)))?;
    kernel.spawn("task-2", 2, periodic("TASK 2", Duration::millis(4500)))?;
    kernel.spawn("led-blue-on", 1, blue(true))?;
    kernel.spawn("led-blue-off", 1, blue(false))?;
    let red = spawn_red(&kernel)?;
    kernel.start();

    thread::sleep(run_time());
    let red_state = kernel.get_state(red);
    kernel.shutdown();

    println!(
        "red LED thread {:?} at the end, {} blue LED writes",
        red_state,
        BLUE_WRITES.load(Ordering::Relaxed)
    );
    Ok(())
}
