//! The sensor thread samples a simulated 12-bit ADC once a second and queues
//! the reading in millivolts on a three slot [`Channel`]. The checker thread
//! classifies every reading into a [`WarningLevel`] and publishes it through
//! [`Latest`]; the blinker thread picks up the newest level on its own period
//! and blinks the blue LED faster the higher it is. Readings above the last
//! threshold also flash the red LED.

use std::{ops::ControlFlow, thread, time::Duration as StdDuration};

use portable_atomic::{AtomicBool, Ordering};
use relay::{
    debug::{
        log::{info, warn},
        println,
    },
    thread::{
        consumer::{self, Consumer},
        sync::{Channel, Latest},
        time::{Duration, Timeout},
        Config, Kernel, SendError, SpawnError, WaitError,
    },
};

static READINGS: Channel<u32, 3> = Channel::new();
static LEVEL: Latest<WarningLevel> = Latest::new();
static LED_RED: AtomicBool = AtomicBool::new(false);
static LED_BLUE: AtomicBool = AtomicBool::new(false);

const DEFAULT_SECS: u64 = 8;

/// Raw ADC values the simulated sensor cycles through.
const SAMPLES: [u32; 8] = [400, 900, 1900, 2700, 3000, 3700, 4050, 1500];

fn run_time() -> StdDuration {
    let secs = std::env::var("RELAY_DEMO_SECS")
        .ok()
        .and_then(|secs| secs.parse().ok())
        .unwrap_or(DEFAULT_SECS);
    StdDuration::from_secs(secs)
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
enum WarningLevel {
    #[default]
    Normal,
    Warning1,
    Warning2,
    Warning3,
    Warning4,
    Warning5,
}

impl WarningLevel {
    /// Lower bounds of the warning levels, in millivolts.
    const THRESHOLDS: [u32; 5] = [500, 1500, 2000, 2500, 3200];

    fn classify(millivolts: u32) -> Self {
        match Self::THRESHOLDS
            .iter()
            .filter(|threshold| millivolts >= **threshold)
            .count()
        {
            0 => Self::Normal,
            1 => Self::Warning1,
            2 => Self::Warning2,
            3 => Self::Warning3,
            4 => Self::Warning4,
            _ => Self::Warning5,
        }
    }

    fn blink_period(self) -> Duration {
        Duration::millis(match self {
            Self::Normal => 600,
            Self::Warning1 => 500,
            Self::Warning2 => 400,
            Self::Warning3 => 300,
            Self::Warning4 => 200,
            Self::Warning5 => 100,
        })
    }
}

fn to_millivolts(raw: u32) -> u32 {
    raw * 3300 / 4096
}

fn sensor_thread() {
    let mut last = relay::thread::now();
    for raw in SAMPLES.iter().copied().cycle() {
        let millivolts = to_millivolts(raw);
        println!("Raw: {}\tVoltage: {}mV", raw, millivolts);

        match READINGS.send(millivolts, Timeout::Immediate) {
            Ok(()) => {}
            Err(SendError {
                reason: WaitError::Cancelled,
                ..
            }) => break,
            Err(err) => warn!("reading of {}mV dropped: {}", err.message, err.reason),
        }
        if relay::thread::sleep_until(&mut last, Duration::millis(1000)).is_err() {
            break;
        }
    }
}

#[derive(Default)]
struct Checker {
    alarms: u32,
}

impl Consumer<u32> for Checker {
    fn process(&mut self, millivolts: u32) -> ControlFlow<()> {
        let level = WarningLevel::classify(millivolts);
        if level == WarningLevel::Warning5 {
            println!("Abnormal Temperature!!");
            self.alarms += 1;
            LED_RED.fetch_xor(true, Ordering::Relaxed);
        } else {
            LED_RED.store(false, Ordering::Relaxed);
        }
        if level != WarningLevel::Normal {
            println!("{:?}", level);
        }
        LEVEL.send(level);
        ControlFlow::Continue(())
    }

    fn on_timeout(&mut self) -> ControlFlow<()> {
        println!("Could not receive from the queue.");
        ControlFlow::Continue(())
    }
}

fn checker_thread() {
    let mut checker = Checker::default();
    let exit = consumer::run(&READINGS, Timeout::millis(3100), &mut checker);
    info!("checker exited ({:?}) after {} alarms", exit, checker.alarms);
}

fn blinker_thread() {
    let mut level = WarningLevel::default();
    let mut last = relay::thread::now();
    loop {
        if let Ok(newest) = LEVEL.try_receive() {
            if newest != level {
                info!("blinking every {}ms", newest.blink_period().to_millis());
            }
            level = newest;
        }
        LED_BLUE.fetch_xor(true, Ordering::Relaxed);
        if relay::thread::sleep_until(&mut last, level.blink_period()).is_err() {
            break;
        }
    }
}

fn main() -> Result<(), SpawnError> {
    relay::debug::init();

    let kernel = Kernel::new(Config::default());
    kernel.spawn("read-sensor", 2, sensor_thread)?;
    kernel.spawn("check-threshold", 3, checker_thread)?;
    kernel.spawn("blink", 1, blinker_thread)?;
    kernel.start();

    thread::sleep(run_time());
    kernel.shutdown();

    println!(
        "last level {:?}, red LED {}",
        LEVEL.peek(),
        if LED_RED.load(Ordering::Relaxed) { "on" } else { "off" }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_are_inclusive_lower_bounds() {
        assert_eq!(WarningLevel::classify(499), WarningLevel::Normal);
        assert_eq!(WarningLevel::classify(500), WarningLevel::Warning1);
        assert_eq!(WarningLevel::classify(1999), WarningLevel::Warning2);
        assert_eq!(WarningLevel::classify(2500), WarningLevel::Warning4);
        assert_eq!(WarningLevel::classify(3300), WarningLevel::Warning5);
    }

    #[test]
    fn simulated_samples_cover_every_level() {
        let levels: Vec<_> = SAMPLES
            .iter()
            .map(|raw| WarningLevel::classify(to_millivolts(*raw)))
            .collect();
        assert_eq!(
            levels,
            [
                WarningLevel::Normal,
                WarningLevel::Warning1,
                WarningLevel::Warning2,
                WarningLevel::Warning3,
                WarningLevel::Warning3,
                WarningLevel::Warning4,
                WarningLevel::Warning5,
                WarningLevel::Warning1,
            ]
        );
    }
}
