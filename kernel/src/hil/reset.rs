// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Interface for requesting a device restart.

/// Ask the platform to restart the device.
///
/// On hardware this does not return control. Host-side test doubles may
/// record the request and return instead, so callers must fail their current
/// operation after requesting a reset rather than assuming divergence.
pub trait Reset {
    fn reset(&self);
}
