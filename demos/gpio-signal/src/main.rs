//! A button interrupt gives a binary [`Signal`]; the button thread takes it
//! and toggles the red LED. A lower priority thread blinks the blue LED every
//! 300 ms meanwhile.
//!
//! The button is simulated by an OS thread that presses it every 700 ms.

use std::{thread, time::Duration as StdDuration};

use portable_atomic::{AtomicBool, AtomicU32, Ordering};
use relay::{
    debug::{log::info, println},
    thread::{
        isr,
        sync::Signal,
        time::{Duration, Timeout},
        Config, Kernel, SpawnError,
    },
};

static BUTTON: Signal = Signal::new();
static LED_RED: AtomicBool = AtomicBool::new(false);
static LED_BLUE: AtomicBool = AtomicBool::new(false);
static PRESSES: AtomicU32 = AtomicU32::new(0);
static STOP: AtomicBool = AtomicBool::new(false);

const DEFAULT_SECS: u64 = 5;

fn run_time() -> StdDuration {
    let secs = std::env::var("RELAY_DEMO_SECS")
        .ok()
        .and_then(|secs| secs.parse().ok())
        .unwrap_or(DEFAULT_SECS);
    StdDuration::from_secs(secs)
}

fn button_isr() {
    isr::yield_from_isr(BUTTON.signal());
}

fn button_thread() {
    while BUTTON.wait(Timeout::Forever).is_ok() {
        println!("BUTTON PRESSED!!");
        PRESSES.fetch_add(1, Ordering::Relaxed);
        let on = !LED_RED.fetch_xor(true, Ordering::Relaxed);
        info!("red LED {}", if on { "on" } else { "off" });
    }
}

fn blink_thread() {
    while relay::thread::sleep(Duration::millis(300)).is_ok() {
        LED_BLUE.fetch_xor(true, Ordering::Relaxed);
    }
}

fn main() -> Result<(), SpawnError> {
    relay::debug::init();

    let kernel = Kernel::new(Config::default());
    kernel.spawn("button", 2, button_thread)?;
    kernel.spawn("blink", 1, blink_thread)?;
    kernel.start();

    let pin = kernel.clone();
    let button = thread::spawn(move || {
        while !STOP.load(Ordering::Acquire) {
            thread::sleep(StdDuration::from_millis(700));
            pin.interrupt(button_isr);
        }
    });

    thread::sleep(run_time());
    STOP.store(true, Ordering::Release);
    let _ = button.join();
    kernel.shutdown();

    println!(
        "{} presses handled, red LED {}",
        PRESSES.load(Ordering::Relaxed),
        if LED_RED.load(Ordering::Relaxed) { "on" } else { "off" }
    );
    Ok(())
}
