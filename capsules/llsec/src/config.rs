// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Data structure for storing compile-time configuration options in the
//! crate.
//!
//! The rationale for configuration based on a constant struct is twofold.
//!
//! - In Rust, a constant struct hosting several constant fields is simple to
//!   discover and fits programming idioms, notably when we want to use it just
//!   like a field of a struct instantiated at runtime.
//!
//! - Uncompiled code in conditional branches `if CONFIG.x { /* ... */ }` is
//!   still type-checked, which keeps rarely exercised configurations from
//!   bit-rotting.
//!
//! Cargo features could be used instead, but they are error-prone: every
//! occurrence of conditional compilation would need to be updated when a
//! feature is renamed, and a forgotten `#[cfg(...)]` fails silently.

use crate::net::frame::SecurityLevel;

/// Data structure holding compile-time configuration options.
///
/// To change the configuration, modify the relevant values in the `CONFIG`
/// constant object defined at the end of this file, or enable the negative
/// cargo features of this crate (`no_counter_suppression`, `no_group_keys`)
/// from the board crate.
pub(crate) struct Config {
    /// Whether broadcast and command frames omit their 4-byte frame counter
    /// on the wire. Receivers then reconstruct the counter from the
    /// per-session high-water mark, and handshake commands carry both of the
    /// sender's counters in their payload so sessions start synchronized.
    pub(crate) counter_suppression: bool,

    /// Whether nodes maintain a group key of their own and learn their
    /// neighbors' group keys during the handshake. Without group keys,
    /// HELLOACK and ACK commands shrink by the key length and broadcast
    /// frames cannot be encrypted.
    pub(crate) group_keys: bool,

    /// Security level applied to outgoing unicast data frames and to the
    /// unicast handshake commands.
    pub(crate) unicast_sec_lvl: SecurityLevel,

    /// Security level applied to outgoing broadcast data frames and HELLOs.
    pub(crate) broadcast_sec_lvl: SecurityLevel,
}

/// A unique instance of `Config` where compile-time configuration options are
/// defined. These options are available in the crate as `CONFIG.<option>`.
pub(crate) const CONFIG: Config = Config {
    counter_suppression: !cfg!(feature = "no_counter_suppression"),
    group_keys: !cfg!(feature = "no_group_keys"),
    unicast_sec_lvl: SecurityLevel::EncMic64,
    broadcast_sec_lvl: SecurityLevel::Mic64,
};
