//! Kernel time, counted in ticks of [`TICK_HZ`].

use crate::TICK_HZ;

/// A point in kernel time.
pub type Instant = fugit::TimerInstantU64<TICK_HZ>;

/// A span of kernel time.
pub type Duration = fugit::TimerDurationU64<TICK_HZ>;

/// How long a blocking call may wait.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Timeout {
    /// Fail at once instead of blocking.
    Immediate,
    /// Block for at most this long. A zero duration acts like
    /// [`Timeout::Immediate`].
    Within(Duration),
    /// Block until the call can complete.
    Forever,
}

impl Timeout {
    pub const fn millis(millis: u64) -> Self {
        Self::Within(Duration::millis(millis))
    }

    pub const fn ticks(ticks: u64) -> Self {
        Self::Within(Duration::from_ticks(ticks))
    }

    /// Whether a call with this timeout must not block at all.
    pub fn is_immediate(&self) -> bool {
        match self {
            Timeout::Immediate => true,
            Timeout::Within(duration) => duration.ticks() == 0,
            Timeout::Forever => false,
        }
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Self::Within(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_within_is_immediate() {
        assert!(Timeout::Immediate.is_immediate());
        assert!(Timeout::ticks(0).is_immediate());
        assert!(!Timeout::ticks(1).is_immediate());
        assert!(!Timeout::Forever.is_immediate());
    }

    #[test]
    fn millis_convert_to_ticks() {
        let Timeout::Within(duration) = Timeout::millis(1000) else {
            panic!("expected a bounded timeout");
        };
        assert_eq!(duration.ticks(), u64::from(TICK_HZ));
    }
}
