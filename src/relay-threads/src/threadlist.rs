use crate::{
    isr::Wake, thread::WakeReason, time::Instant, Scheduler, ThreadId, ThreadState, WaitError,
};

/// Manages blocked [`super::Thread`]s for a resource.
///
/// Threads are ordered by priority, FIFO among equal priorities. The links
/// live in the scheduler; only the head is stored here.
///
/// A thread that timed out or was cancelled stays linked until it resumes
/// and calls [`ThreadList::finish`]; [`ThreadList::pop`] skips such entries.
#[derive(Debug, Default)]
pub(crate) struct ThreadList {
    /// Next thread to run once the resource is available.
    head: Option<ThreadId>,
}

impl ThreadList {
    /// Creates a new empty [`ThreadList`]
    pub const fn new() -> Self {
        Self { head: None }
    }

    /// Puts a thread into this [`ThreadList`] and blocks it.
    pub fn put(
        &mut self,
        scheduler: &mut Scheduler,
        pid: ThreadId,
        state: ThreadState,
        deadline: Option<Instant>,
    ) {
        let prio = scheduler.get_unchecked(pid).prio;
        let mut curr = None;
        let mut next = self.head;
        while let Some(n) = next {
            if scheduler.get_unchecked(n).prio < prio {
                break;
            }
            curr = next;
            next = scheduler.thread_blocklist[usize::from(n)];
        }
        scheduler.thread_blocklist[usize::from(pid)] = next;
        match curr {
            Some(curr) => scheduler.thread_blocklist[usize::from(curr)] = Some(pid),
            _ => self.head = Some(pid),
        }
        scheduler.block(pid, state, deadline);
    }

    /// Removes the first thread that is still waiting and makes it runnable.
    ///
    /// Returns the thread's [`ThreadId`] and how its wake-up affects
    /// scheduling.
    pub fn pop(&mut self, scheduler: &mut Scheduler) -> Option<(ThreadId, Wake)> {
        while let Some(head) = self.head {
            self.head = scheduler.thread_blocklist[usize::from(head)].take();
            if scheduler.is_waiting(head) {
                let wake = scheduler.wake(head, WakeReason::Signaled);
                return Some((head, wake));
            }
        }
        None
    }

    /// Unlinks `pid`, wherever it is in the list.
    ///
    /// Returns `false` if it was not linked.
    pub fn remove(&mut self, scheduler: &mut Scheduler, pid: ThreadId) -> bool {
        let mut prev: Option<ThreadId> = None;
        let mut next = self.head;
        while let Some(n) = next {
            let after = scheduler.thread_blocklist[usize::from(n)];
            if n == pid {
                match prev {
                    Some(prev) => scheduler.thread_blocklist[usize::from(prev)] = after,
                    None => self.head = after,
                }
                scheduler.thread_blocklist[usize::from(n)] = None;
                return true;
            }
            prev = Some(n);
            next = after;
        }
        false
    }

    /// Completes a wait after the blocked thread `pid` resumed.
    ///
    /// Returns `Ok` if it was woken through [`ThreadList::pop`], the timeout
    /// or cancellation error otherwise.
    pub fn finish(&mut self, scheduler: &mut Scheduler, pid: ThreadId) -> Result<(), WaitError> {
        match scheduler.take_wake(pid) {
            Some(WakeReason::Signaled) => Ok(()),
            Some(WakeReason::Timeout) => {
                self.remove(scheduler, pid);
                Err(WaitError::Timeout)
            }
            Some(WakeReason::Cancelled) => {
                self.remove(scheduler, pid);
                Err(WaitError::Cancelled)
            }
            None => unreachable!("unexpected thread state: resumed without wake reason"),
        }
    }

    /// Determines if no thread waits in this [`ThreadList`].
    ///
    /// Unlinks entries of threads that stopped waiting.
    pub fn is_empty(&mut self, scheduler: &mut Scheduler) -> bool {
        while let Some(head) = self.head {
            if scheduler.is_waiting(head) {
                return false;
            }
            self.head = scheduler.thread_blocklist[usize::from(head)].take();
        }
        true
    }
}
