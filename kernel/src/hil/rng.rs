// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Interfaces for accessing entropy sources.

use crate::ErrorCode;

/// A source of seed material for a deterministic random generator.
///
/// A seed source is consulted once, at startup, to initialize the node's
/// CSPRNG. It is expected to block until enough entropy is available, or to
/// fail outright. It is not a streaming generator.
pub trait SeedSource {
    /// Fill `seed` completely with entropy. On error the contents of `seed`
    /// are unspecified and must not be used.
    fn fill_seed(&self, seed: &mut [u8]) -> Result<(), ErrorCode>;
}
