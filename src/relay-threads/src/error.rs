use thiserror::Error;

/// Why a blocking call returned without completing.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WaitError {
    /// The timeout elapsed (or was [`crate::time::Timeout::Immediate`]).
    #[error("timed out")]
    Timeout,
    /// The calling thread was deleted while waiting, or before.
    #[error("thread was cancelled")]
    Cancelled,
    /// A call that would block was made from interrupt context, or from an
    /// OS thread that is not one of the kernel's threads.
    #[error("cannot block in interrupt context")]
    InterruptContext,
}

/// A blocking send failed; the message is handed back untouched.
#[derive(Debug, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[error("send failed: {reason}")]
pub struct SendError<T> {
    pub reason: WaitError,
    pub message: T,
}

impl<T> SendError<T> {
    pub fn into_message(self) -> T {
        self.message
    }
}

/// A non-blocking send found the channel full.
#[derive(Debug, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TrySendError<T> {
    #[error("channel is full")]
    Full(T),
}

impl<T> TrySendError<T> {
    pub fn into_message(self) -> T {
        match self {
            TrySendError::Full(message) => message,
        }
    }
}

/// A non-blocking receive found nothing to take.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TryReceiveError {
    #[error("nothing to receive")]
    Empty,
}

/// A thread could not be created.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum SpawnError {
    #[error("priority {0} is out of range")]
    InvalidPriority(u8),
    #[error("no free thread slot")]
    NoFreeSlot,
    #[error("the OS refused to create the thread: {0:?}")]
    Os(std::io::ErrorKind),
}

#[cfg(feature = "defmt")]
impl defmt::Format for SpawnError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            SpawnError::InvalidPriority(prio) => defmt::write!(f, "InvalidPriority({})", prio),
            SpawnError::NoFreeSlot => defmt::write!(f, "NoFreeSlot"),
            SpawnError::Os(kind) => {
                defmt::write!(f, "Os({})", defmt::Debug2Format(kind))
            }
        }
    }
}

/// A timer command could not be delivered.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerError {
    /// The command queue stayed full for the whole timeout.
    #[error("timer command queue is full")]
    QueueFull,
    /// The calling thread was cancelled while waiting for queue space.
    #[error("thread was cancelled")]
    Cancelled,
    /// The queue was full and the command was issued from interrupt context
    /// or from outside the kernel's threads, where it cannot wait.
    #[error("cannot block in interrupt context")]
    InterruptContext,
    /// The timer was deleted.
    #[error("timer was deleted")]
    Deleted,
}

impl From<WaitError> for TimerError {
    fn from(err: WaitError) -> Self {
        match err {
            WaitError::Timeout => TimerError::QueueFull,
            WaitError::Cancelled => TimerError::Cancelled,
            WaitError::InterruptContext => TimerError::InterruptContext,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_error_returns_message() {
        let err = SendError {
            reason: WaitError::Timeout,
            message: [1u8, 2, 3],
        };
        assert_eq!(err.to_string(), "send failed: timed out");
        assert_eq!(err.into_message(), [1, 2, 3]);
        assert_eq!(TrySendError::Full(5).into_message(), 5);
    }

    #[test]
    fn wait_errors_map_to_timer_errors() {
        assert_eq!(TimerError::from(WaitError::Timeout), TimerError::QueueFull);
        assert_eq!(TimerError::from(WaitError::Cancelled), TimerError::Cancelled);
        assert_eq!(
            TimerError::from(WaitError::InterruptContext),
            TimerError::InterruptContext
        );
    }

    #[test]
    fn errors_are_send_and_sync() {
        fn assert_error<E: std::error::Error + Send + Sync + 'static>() {}
        assert_error::<WaitError>();
        assert_error::<SendError<u32>>();
        assert_error::<TrySendError<u32>>();
        assert_error::<SpawnError>();
        assert_error::<TimerError>();
    }
}
