// Indices are bounded by the const generics, checked in `RunQueue::VALID`.
#![allow(clippy::indexing_slicing)]

use self::ring::Rings;

const USIZE_BITS: usize = usize::BITS as usize;

/// Runqueue number, i.e. the priority of the threads it holds.
pub type RunqueueId = u8;
/// Index of a thread in the scheduler's thread table.
pub type ThreadId = u8;

/// Runqueue for `N_QUEUES` priorities, supporting `N_THREADS` total.
///
/// Higher runqueue numbers ([`RunqueueId`]) are higher priorities. Every
/// priority has its own circular list of [`ThreadId`]s; a bit per priority
/// in a `usize` tracks which lists are non-empty, so the thread to run next
/// is found without scanning. This limits `N_QUEUES` to the pointer width.
#[derive(Debug)]
pub struct RunQueue<const N_QUEUES: usize, const N_THREADS: usize> {
    /// Bit `rq` is set while runqueue `rq` holds a thread.
    bitcache: usize,
    queues: Rings<N_QUEUES, N_THREADS>,
    /// Cached head of the highest non-empty queue.
    next: Option<ThreadId>,
}

impl<const N_QUEUES: usize, const N_THREADS: usize> RunQueue<N_QUEUES, N_THREADS> {
    const VALID: () = {
        assert!(N_QUEUES <= USIZE_BITS, "too many runqueues for the bitcache");
        assert!(
            N_THREADS <= ThreadId::MAX as usize + 1,
            "thread ids must fit in a ThreadId"
        );
    };

    #[allow(clippy::new_without_default)]
    pub const fn new() -> RunQueue<N_QUEUES, N_THREADS> {
        #[allow(clippy::let_unit_value)]
        let () = Self::VALID;
        RunQueue {
            bitcache: 0,
            queues: Rings::new(),
            next: None,
        }
    }

    /// Adds thread with pid `n` to runqueue number `rq`.
    ///
    /// Adding a thread that is already queued is a no-op.
    ///
    /// Returns `true` if the thread that should run next changed.
    pub fn add(&mut self, n: ThreadId, rq: RunqueueId) -> bool {
        debug_assert!(usize::from(n) < N_THREADS);
        debug_assert!(usize::from(rq) < N_QUEUES);
        self.bitcache |= 1 << rq;
        self.queues.push(n, rq);
        self.refresh()
    }

    /// Removes thread with pid `n` from runqueue number `rq`.
    ///
    /// The thread does not need to be the head of its queue.
    ///
    /// Returns `true` if the thread that should run next changed.
    pub fn del(&mut self, n: ThreadId, rq: RunqueueId) -> bool {
        debug_assert!(usize::from(n) < N_THREADS);
        debug_assert!(usize::from(rq) < N_QUEUES);
        self.queues.remove(n, rq);
        if self.queues.is_empty(rq) {
            self.bitcache &= !(1 << rq);
        }
        self.refresh()
    }

    /// Returns the pid that should run next.
    ///
    /// This is the head of the non-empty runqueue with the highest index.
    pub fn get_next(&self) -> Option<ThreadId> {
        self.next
    }

    /// Returns the highest priority that currently has a runnable thread.
    pub fn highest_prio(&self) -> Option<RunqueueId> {
        highest_set_bit(self.bitcache)
    }

    /// Advances runqueue number `rq`.
    ///
    /// This is used to "yield" to another thread of *the same* priority: the
    /// head moves to the tail.
    ///
    /// Returns `true` if the thread that should run next changed.
    pub fn advance(&mut self, rq: RunqueueId) -> bool {
        debug_assert!(usize::from(rq) < N_QUEUES);
        self.queues.rotate(rq);
        self.refresh()
    }

    /// Returns whether no thread is runnable.
    pub fn is_empty(&self) -> bool {
        self.bitcache == 0
    }

    fn refresh(&mut self) -> bool {
        let next = self.highest_prio().and_then(|rq| self.queues.head(rq));
        let changed = next != self.next;
        self.next = next;
        changed
    }
}

fn highest_set_bit(bitmap: usize) -> Option<RunqueueId> {
    // < USIZE_BITS, always fits
    bitmap.checked_ilog2().map(|bit| bit as RunqueueId)
}

mod ring {
    //! `N_QUEUES` circular singly linked lists sharing one link array of
    //! `N_THREADS` entries. A thread is in at most one list at a time.
    use super::{RunqueueId, ThreadId};

    #[derive(Debug, Copy, Clone)]
    pub struct Rings<const N_QUEUES: usize, const N_THREADS: usize> {
        /// Last element of each list; its link points at the head.
        tails: [Option<ThreadId>; N_QUEUES],
        /// Successor of every queued thread, `None` while not queued.
        links: [Option<ThreadId>; N_THREADS],
    }

    impl<const N_QUEUES: usize, const N_THREADS: usize> Rings<N_QUEUES, N_THREADS> {
        pub const fn new() -> Self {
            Self {
                tails: [None; N_QUEUES],
                links: [None; N_THREADS],
            }
        }

        fn link(&self, n: ThreadId) -> Option<ThreadId> {
            self.links[usize::from(n)]
        }

        fn set_link(&mut self, n: ThreadId, next: Option<ThreadId>) {
            self.links[usize::from(n)] = next;
        }

        pub fn is_empty(&self, rq: RunqueueId) -> bool {
            self.tails[usize::from(rq)].is_none()
        }

        pub fn head(&self, rq: RunqueueId) -> Option<ThreadId> {
            self.link(self.tails[usize::from(rq)]?)
        }

        /// Appends `n` to list `rq` unless it is queued already.
        pub fn push(&mut self, n: ThreadId, rq: RunqueueId) {
            if self.link(n).is_some() {
                return;
            }
            match self.tails[usize::from(rq)].replace(n) {
                None => self.set_link(n, Some(n)),
                Some(old_tail) => {
                    let head = self.link(old_tail);
                    self.set_link(n, head);
                    self.set_link(old_tail, Some(n));
                }
            }
        }

        #[cfg(test)]
        pub fn pop_head(&mut self, rq: RunqueueId) -> Option<ThreadId> {
            let tail = self.tails[usize::from(rq)]?;
            let head = self.link(tail)?;
            if head == tail {
                self.tails[usize::from(rq)] = None;
            } else {
                let second = self.link(head);
                self.set_link(tail, second);
            }
            self.set_link(head, None);
            Some(head)
        }

        /// Unlinks `n` from list `rq`, wherever it is in the list.
        pub fn remove(&mut self, n: ThreadId, rq: RunqueueId) {
            let Some(next) = self.link(n) else {
                return;
            };
            let tail = &mut self.tails[usize::from(rq)];
            if next == n {
                if *tail == Some(n) {
                    *tail = None;
                }
                self.set_link(n, None);
                return;
            }

            // Walk the ring once around to find the predecessor.
            let mut prev = next;
            loop {
                match self.link(prev) {
                    Some(after) if after == n => break,
                    Some(after) => prev = after,
                    None => unreachable!("ring of runqueue {} is broken", rq),
                }
            }
            self.set_link(prev, Some(next));
            if self.tails[usize::from(rq)] == Some(n) {
                self.tails[usize::from(rq)] = Some(prev);
            }
            self.set_link(n, None);
        }

        /// Rotates list `rq` by one: the head becomes the tail.
        pub fn rotate(&mut self, rq: RunqueueId) {
            if let Some(tail) = self.tails[usize::from(rq)] {
                self.tails[usize::from(rq)] = self.link(tail);
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn drain(rings: &mut Rings<8, 32>, rq: RunqueueId) -> Vec<ThreadId> {
            core::iter::from_fn(|| rings.pop_head(rq)).collect()
        }

        #[test]
        fn push_then_pop() {
            let mut rings: Rings<8, 32> = Rings::new();
            assert!(rings.is_empty(0));
            rings.push(0, 0);
            assert_eq!(rings.pop_head(0), Some(0));
            assert_eq!(rings.pop_head(0), None);
        }

        #[test]
        fn pushing_a_queued_thread_is_ignored() {
            let mut rings: Rings<8, 32> = Rings::new();
            rings.push(0, 0);
            rings.push(0, 0);
            assert_eq!(drain(&mut rings, 0), [0]);
            assert!(rings.is_empty(0));
        }

        #[test]
        fn every_thread_id_fits() {
            const N: usize = 256;
            let mut rings: Rings<1, N> = Rings::new();
            for n in 0..=ThreadId::MAX {
                rings.push(n, 0);
            }
            for n in 0..=ThreadId::MAX {
                assert_eq!(rings.pop_head(0), Some(n));
            }
            assert!(rings.is_empty(0));
        }

        #[test]
        fn rotate_moves_head_to_tail() {
            let mut rings: Rings<8, 32> = Rings::new();
            rings.push(0, 0);
            rings.push(1, 0);
            rings.push(2, 0);
            rings.rotate(0);
            assert_eq!(rings.head(0), Some(1));
            assert_eq!(drain(&mut rings, 0), [1, 2, 0]);
        }

        #[test]
        fn remove_from_anywhere() {
            let mut rings: Rings<8, 32> = Rings::new();
            for n in 0..4 {
                rings.push(n, 1);
            }
            rings.remove(1, 1);
            rings.remove(3, 1);
            // not queued
            rings.remove(7, 1);
            assert_eq!(drain(&mut rings, 1), [0, 2]);

            rings.push(4, 2);
            rings.push(5, 2);
            rings.remove(4, 2);
            rings.push(6, 2);
            assert_eq!(drain(&mut rings, 2), [5, 6]);

            rings.push(9, 3);
            rings.remove(9, 3);
            assert!(rings.is_empty(3));
        }

        #[test]
        fn lists_are_independent() {
            let mut rings: Rings<8, 32> = Rings::new();
            rings.push(0, 0);
            rings.push(1, 5);
            rings.push(2, 0);
            assert_eq!(rings.head(5), Some(1));
            assert_eq!(drain(&mut rings, 0), [0, 2]);
            assert_eq!(drain(&mut rings, 5), [1]);
        }
    }
}
