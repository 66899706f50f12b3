//! A one-shot timer (3333 ms) and an auto-reload timer (500 ms) run their
//! callbacks on the timer service thread. Each callback keeps its own
//! execution count in its [`Expiry`]; the auto-reload timer stops itself after
//! its fifth expiry.

use std::{
    sync::{Arc, OnceLock},
    thread,
    time::Duration as StdDuration,
};

use portable_atomic::{AtomicU32, Ordering};
use relay::{
    debug::{
        log::{error, info},
        println,
    },
    thread::{
        time::{Duration, Timeout},
        timer::{Expiry, Mode, Timer, TimerService},
        Config, Kernel, SpawnError,
    },
};

/// Callbacks executed so far, by all timers.
static CALLS: AtomicU32 = AtomicU32::new(0);

const DEFAULT_SECS: u64 = 5;
const AUTO_RELOAD_RUNS: u32 = 5;

fn run_time() -> StdDuration {
    let secs = std::env::var("RELAY_DEMO_SECS")
        .ok()
        .and_then(|secs| secs.parse().ok())
        .unwrap_or(DEFAULT_SECS);
    StdDuration::from_secs(secs)
}

fn report(expiry: &Expiry) {
    CALLS.fetch_add(1, Ordering::Relaxed);
    println!(
        "{} timer callback executing {} (run {})",
        expiry.name,
        expiry.at.ticks(),
        expiry.count
    );
}

fn main() -> Result<(), SpawnError> {
    relay::debug::init();

    let kernel = Kernel::new(Config::default());
    let service = TimerService::spawn(&kernel, 3)?;

    let one_shot = service.create("One-shot", Duration::millis(3333), Mode::OneShot, report);

    let handle: Arc<OnceLock<Timer>> = Arc::new(OnceLock::new());
    let own = handle.clone();
    let auto_reload = service.create(
        "Auto-reload",
        Duration::millis(500),
        Mode::AutoReload,
        move |expiry| {
            report(expiry);
            if expiry.count == AUTO_RELOAD_RUNS {
                // callbacks run on the service thread, so never wait here
                if let Some(Err(err)) = own.get().map(|timer| timer.stop(Timeout::Immediate)) {
                    error!("cannot stop {}: {}", expiry.name, err);
                }
            }
        },
    );
    let _ = handle.set(auto_reload.clone());

    println!("Software timers created");
    for timer in [&one_shot, &auto_reload] {
        if let Err(err) = timer.start(Timeout::Immediate) {
            error!("cannot start {:?}: {}", timer.name(), err);
        }
    }
    kernel.start();

    thread::sleep(run_time());
    info!(
        "one-shot active: {}, auto-reload active: {}",
        one_shot.is_active(),
        auto_reload.is_active()
    );
    kernel.shutdown();

    println!("{} callbacks executed", CALLS.load(Ordering::Relaxed));
    Ok(())
}
