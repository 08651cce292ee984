//! Usage: Single-flight guard: one leader runs an operation, later callers queue for its outcome.
//!
//! Waiters are released in arrival order when the leader settles. A leader dropped before
//! settling (e.g. its task was cancelled) returns the flight to idle and releases every waiter
//! with no outcome, so one of them can lead the next attempt.

use crate::shared::mutex_ext::MutexExt;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::oneshot;

#[derive(Debug)]
enum FlightState<T> {
    Idle,
    InFlight { waiters: VecDeque<oneshot::Sender<T>> },
}

#[derive(Debug)]
pub struct SingleFlight<T> {
    state: Mutex<FlightState<T>>,
}

/// Role handed out by [`SingleFlight::begin`].
#[derive(Debug)]
pub enum Flight<'a, T: Clone> {
    Leader(FlightLeader<'a, T>),
    Follower(FlightWaiter<T>),
}

#[derive(Debug)]
pub struct FlightLeader<'a, T: Clone> {
    flight: &'a SingleFlight<T>,
    settled: bool,
}

#[derive(Debug)]
pub struct FlightWaiter<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            state: Mutex::new(FlightState::Idle),
        }
    }
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins the current flight, or starts one when idle.
    pub fn begin(&self) -> Flight<'_, T> {
        let mut state = self.state.lock_or_recover();
        if let FlightState::InFlight { waiters } = &mut *state {
            let (tx, rx) = oneshot::channel();
            waiters.push_back(tx);
            return Flight::Follower(FlightWaiter { rx });
        }

        *state = FlightState::InFlight {
            waiters: VecDeque::new(),
        };
        Flight::Leader(FlightLeader {
            flight: self,
            settled: false,
        })
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(*self.state.lock_or_recover(), FlightState::InFlight { .. })
    }

    /// Number of callers currently queued behind the leader.
    pub fn waiting(&self) -> usize {
        match &*self.state.lock_or_recover() {
            FlightState::Idle => 0,
            FlightState::InFlight { waiters } => waiters.len(),
        }
    }

    fn take_waiters(&self) -> VecDeque<oneshot::Sender<T>> {
        let mut state = self.state.lock_or_recover();
        match std::mem::replace(&mut *state, FlightState::Idle) {
            FlightState::Idle => VecDeque::new(),
            FlightState::InFlight { waiters } => waiters,
        }
    }
}

impl<T: Clone> FlightLeader<'_, T> {
    /// Returns the flight to idle and hands `value` to every waiter, oldest first.
    ///
    /// Returns how many waiters were still listening.
    pub fn settle(mut self, value: T) -> usize {
        self.settled = true;
        let waiters = self.flight.take_waiters();
        let mut delivered = 0;
        for tx in waiters {
            if tx.send(value.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

impl<T: Clone> Drop for FlightLeader<'_, T> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let abandoned = self.flight.take_waiters();
        if !abandoned.is_empty() {
            tracing::debug!(
                waiters = abandoned.len(),
                "single-flight leader dropped before settling; releasing waiters"
            );
        }
    }
}

impl<T> FlightWaiter<T> {
    /// `None` when the leader was dropped without settling.
    pub async fn wait(self) -> Option<T> {
        self.rx.await.ok()
    }
}
