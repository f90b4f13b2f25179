//! Bounded row queue between an injector and its pipeline's worker.
//!
//! Producers wait for space up to a deadline; the consumer waits for rows.
//! `finish` ends production (buffered rows still drain), `close` ends
//! consumption (buffered rows are dropped and further pushes are refused).

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Debug, PartialEq)]
pub enum PushError<T> {
    Full(T),
    Closed(T),
}

#[derive(Debug, PartialEq)]
pub enum Pop<T> {
    Item(T),
    /// Nothing arrived within the wait.
    Empty,
    /// Production finished and every row was taken, or the queue was closed.
    Drained,
}

struct QueueState<T> {
    q: VecDeque<T>,
    finished: bool,
    closed: bool,
}

pub struct BoundedQueue<T> {
    cap: usize,
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> BoundedQueue<T> {
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            state: Mutex::new(QueueState {
                q: VecDeque::new(),
                finished: false,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn try_push(&self, v: T) -> Result<(), PushError<T>> {
        self.push_timeout(v, Duration::ZERO)
    }

    pub fn push_timeout(&self, v: T, timeout: Duration) -> Result<(), PushError<T>> {
        let deadline = Instant::now() + timeout;
        let mut st = self.state.lock();
        loop {
            if st.closed || st.finished {
                return Err(PushError::Closed(v));
            }
            if st.q.len() < self.cap {
                st.q.push_back(v);
                self.not_empty.notify_one();
                return Ok(());
            }
            if self.not_full.wait_until(&mut st, deadline).timed_out() {
                // Re-check once: space may have opened right at the deadline
                if !st.closed && !st.finished && st.q.len() < self.cap {
                    continue;
                }
                return Err(if st.closed || st.finished {
                    PushError::Closed(v)
                } else {
                    PushError::Full(v)
                });
            }
        }
    }

    pub fn pop_timeout(&self, timeout: Duration) -> Pop<T> {
        let deadline = Instant::now() + timeout;
        let mut st = self.state.lock();
        loop {
            if st.closed {
                return Pop::Drained;
            }
            if let Some(v) = st.q.pop_front() {
                self.not_full.notify_one();
                return Pop::Item(v);
            }
            if st.finished {
                return Pop::Drained;
            }
            if self.not_empty.wait_until(&mut st, deadline).timed_out() {
                return match st.q.pop_front() {
                    Some(v) => {
                        self.not_full.notify_one();
                        Pop::Item(v)
                    }
                    None if st.finished || st.closed => Pop::Drained,
                    None => Pop::Empty,
                };
            }
        }
    }

    /// No more pushes; the consumer drains what is buffered.
    pub fn finish(&self) {
        let mut st = self.state.lock();
        st.finished = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// The consumer is gone; buffered rows are dropped.
    pub fn close(&self) {
        let mut st = self.state.lock();
        st.closed = true;
        st.q.clear();
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    pub fn len(&self) -> usize {
        self.state.lock().q.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().q.is_empty()
    }
}
