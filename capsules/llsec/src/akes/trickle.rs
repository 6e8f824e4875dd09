// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Trickle scheduling of periodic HELLOs.
//!
//! Each node broadcasts HELLOs at a rate governed by the Trickle algorithm
//! of RFC 6206: an interval doubles from `IMIN` up to a cap while the
//! neighborhood is quiet, and resets to the minimum when topology changes
//! (a new neighbor completes the handshake, or the last neighbor is lost).
//! Within an interval a transmission point is drawn uniformly from the
//! second half; the HELLO at that point is suppressed when enough fresh
//! HELLOs from established neighbors were already overheard.
//!
//! This module is passive: it holds deadlines and counters, and the engine
//! drives it from its multiplexed timer, supplying randomness as arguments.

use kernel::hil::time::CLOCK_SECOND;
use kernel::utilities::cells::OptionalCell;

use core::cell::Cell;

/// Minimum Trickle interval.
pub const IMIN: u32 = 60 * CLOCK_SECOND;
/// Cap on interval doubling.
pub const MAX_DOUBLINGS: u32 = 8;
/// A HELLO is suppressed when at least this many fresh authentic HELLOs
/// were overheard in the current interval.
pub const REDUNDANCY_CONSTANT: u32 = 2;

/// What the engine should do when the Trickle deadline fires.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TrickleEvent {
    /// The transmission point was reached and too few HELLOs were heard.
    BroadcastHello,
    /// The transmission point was reached but the neighborhood is chatty
    /// enough already.
    Suppressed,
    /// The interval ended; a new (possibly doubled) interval has begun.
    IntervalEnded,
    /// Spurious call, nothing was due.
    None,
}

pub struct Trickle {
    /// Current interval length in ticks.
    interval: Cell<u32>,
    /// Transmission point within the current interval; cleared once passed.
    point: OptionalCell<u32>,
    interval_end: Cell<u32>,
    /// Fresh authentic HELLOs overheard in the current interval.
    counter: Cell<u32>,
    /// Handshakes completed since the last reset, for the reset heuristic.
    new_nbrs: Cell<u32>,
    running: Cell<bool>,
}

impl Trickle {
    pub fn new() -> Trickle {
        Trickle {
            interval: Cell::new(IMIN),
            point: OptionalCell::empty(),
            interval_end: Cell::new(0),
            counter: Cell::new(0),
            new_nbrs: Cell::new(0),
            running: Cell::new(false),
        }
    }

    pub fn start(&self, now: u32, rand: u16) {
        self.running.set(true);
        self.begin_interval(now, IMIN, rand);
    }

    pub fn stop(&self) {
        self.running.set(false);
        self.point.clear();
    }

    /// The next tick at which `on_timeout` wants to run, if any.
    pub fn next_deadline(&self) -> Option<u32> {
        if !self.running.get() {
            return None;
        }
        match self.point.get() {
            Some(point) => Some(point),
            None => Some(self.interval_end.get()),
        }
    }

    /// Advance past a due deadline. `rand` seeds the next transmission
    /// point if a new interval begins.
    pub fn on_timeout(&self, now: u32, rand: u16) -> TrickleEvent {
        if !self.running.get() {
            return TrickleEvent::None;
        }
        if let Some(point) = self.point.get() {
            if has_expired(point, now) {
                self.point.clear();
                return if self.counter.get() < REDUNDANCY_CONSTANT {
                    TrickleEvent::BroadcastHello
                } else {
                    TrickleEvent::Suppressed
                };
            }
        }
        if has_expired(self.interval_end.get(), now) {
            let doubled = self
                .interval
                .get()
                .saturating_mul(2)
                .min(IMIN << MAX_DOUBLINGS);
            self.begin_interval(now, doubled, rand);
            return TrickleEvent::IntervalEnded;
        }
        TrickleEvent::None
    }

    /// A fresh, authentic HELLO from an established neighbor was overheard.
    pub fn on_fresh_hello_counted(&self) {
        self.counter.set(self.counter.get().saturating_add(1));
    }

    /// A handshake completed. Resets to the minimum interval once the
    /// number of recent arrivals is significant relative to the
    /// neighborhood size, so bursts of joins trigger one reset, not many.
    pub fn on_new_nbr(&self, now: u32, established: usize, rand: u16) {
        if !self.running.get() {
            return;
        }
        self.new_nbrs.set(self.new_nbrs.get() + 1);
        let threshold = ((established / 4) as u32).max(1);
        if self.new_nbrs.get() >= threshold {
            self.reset(now, rand);
        }
    }

    /// A permanent neighbor was deleted. An empty neighborhood resets
    /// aggressively so a rebooted network re-converges quickly.
    pub fn on_nbr_lost(&self, now: u32, remaining: usize, rand: u16) {
        if self.running.get() && remaining == 0 {
            self.reset(now, rand);
        }
    }

    fn reset(&self, now: u32, rand: u16) {
        self.new_nbrs.set(0);
        // Below the minimum, so post-churn convergence outpaces even a
        // freshly started node.
        self.begin_interval(now, IMIN / 2, rand);
    }

    fn begin_interval(&self, now: u32, interval: u32, rand: u16) {
        self.interval.set(interval);
        self.counter.set(0);
        // Transmission point uniform in the second half of the interval.
        let half = interval / 2;
        let offset = half + (rand as u32) % half.max(1);
        self.point.set(now.wrapping_add(offset));
        self.interval_end.set(now.wrapping_add(interval));
    }
}

/// Wrap-safe "deadline has passed" test on tick counters.
pub fn has_expired(deadline: u32, now: u32) -> bool {
    now.wrapping_sub(deadline) < u32::MAX / 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_fires_before_interval_end_and_doubles_after() {
        let trickle = Trickle::new();
        trickle.start(0, 0);
        let point = trickle.next_deadline().unwrap();
        assert!(point >= IMIN / 2 && point < IMIN);

        assert_eq!(trickle.on_timeout(point, 0), TrickleEvent::BroadcastHello);
        assert_eq!(trickle.next_deadline(), Some(IMIN));
        assert_eq!(trickle.on_timeout(IMIN, 0), TrickleEvent::IntervalEnded);

        // The new interval is doubled.
        let next_end = IMIN + 2 * IMIN;
        assert_eq!(trickle.on_timeout(trickle.next_deadline().unwrap(), 0), TrickleEvent::BroadcastHello);
        assert_eq!(trickle.next_deadline(), Some(next_end));
    }

    #[test]
    fn enough_overheard_hellos_suppress_the_broadcast() {
        let trickle = Trickle::new();
        trickle.start(0, 7);
        for _ in 0..REDUNDANCY_CONSTANT {
            trickle.on_fresh_hello_counted();
        }
        let point = trickle.next_deadline().unwrap();
        assert_eq!(trickle.on_timeout(point, 0), TrickleEvent::Suppressed);
    }

    #[test]
    fn doubling_is_capped() {
        let trickle = Trickle::new();
        trickle.start(0, 0);
        for _ in 0..(MAX_DOUBLINGS + 4) {
            let point = trickle.next_deadline().unwrap();
            trickle.on_timeout(point, 0);
            trickle.on_timeout(trickle.interval_end.get(), 0);
        }
        assert_eq!(trickle.interval.get(), IMIN << MAX_DOUBLINGS);
    }

    #[test]
    fn losing_the_last_neighbor_resets_the_interval() {
        let trickle = Trickle::new();
        trickle.start(0, 0);
        trickle.on_timeout(trickle.next_deadline().unwrap(), 0);
        trickle.on_timeout(trickle.interval_end.get(), 0);
        assert_eq!(trickle.interval.get(), 2 * IMIN);

        let now = trickle.interval_end.get();
        trickle.on_nbr_lost(now, 1, 0);
        assert_eq!(trickle.interval.get(), 2 * IMIN);
        trickle.on_nbr_lost(now, 0, 0);
        assert_eq!(trickle.interval.get(), IMIN / 2);
    }

    #[test]
    fn churn_resets_below_the_minimum_interval() {
        let trickle = Trickle::new();
        trickle.start(0, 0);
        assert_eq!(trickle.interval.get(), IMIN);

        // With no established neighbors the threshold is one new arrival.
        trickle.on_new_nbr(1000, 0, 0);
        assert_eq!(trickle.interval.get(), IMIN / 2);
        assert_eq!(trickle.interval_end.get(), 1000 + IMIN / 2);
    }
}
