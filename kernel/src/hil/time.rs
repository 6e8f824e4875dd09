// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Hardware agnostic interfaces for time and timers.

use crate::ErrorCode;

/// Number of clock ticks in one second.
///
/// Every `Time` implementation in this workspace runs its tick clock at this
/// frequency, so intervals can be written as multiples of `CLOCK_SECOND`
/// without consulting the implementation.
pub const CLOCK_SECOND: u32 = 128;

pub trait Time {
    /// Returns the current time in clock ticks.
    ///
    /// The tick clock wraps at `u32::MAX`. Comparisons of nearby times must
    /// use wrapping arithmetic.
    fn now(&self) -> u32;

    /// Returns the time in whole seconds since the clock started.
    fn seconds(&self) -> u32;
}

/// A one-shot timer that can notify when a particular interval has elapsed.
pub trait Timer<'a>: Time {
    /// Set the client for expiration events.
    fn set_client(&self, client: &'a dyn TimerClient);

    /// Sets a one-shot timer to fire in `interval` clock ticks.
    ///
    /// Calling this method overrides any previously armed timer.
    fn oneshot(&self, interval: u32);

    /// Returns whether this timer is currently armed.
    fn is_enabled(&self) -> bool;

    /// Cancels an outstanding timer.
    ///
    /// It may be possible for a timer to have already expired but not been
    /// delivered to the client. In this case the implementation returns
    /// `FAIL`, letting the caller know that an event for the timer will
    /// still be delivered.
    fn cancel(&self) -> Result<(), ErrorCode>;
}

/// A client of an implementer of the [`Timer`] trait.
pub trait TimerClient {
    /// Callback signaled when the timer's interval has elapsed.
    fn fired(&self);
}
