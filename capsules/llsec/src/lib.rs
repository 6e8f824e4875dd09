// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Link-layer security for 802.15.4-style radios.
//!
//! This crate implements the Adaptive Key Establishment Scheme (AKES) and the
//! per-frame security that goes with it: CCM* authenticated encryption, a
//! seeded CSPRNG, anti-replay counter tracking, command-frame dispatch, and
//! two interchangeable strategies for protecting data frames (per-neighbor
//! pairwise keys or network-wide group keys).

#![forbid(unsafe_code)]
#![no_std]

#[macro_use]
pub mod net;

pub mod adaptivesec;
pub mod aes128;
pub mod akes;
pub mod anti_replay;
pub mod ccm_star;
pub mod cmd_broker;
pub mod config;
pub mod coresec;
pub mod csprng;
pub mod leaky_bucket;
pub mod noncoresec;

#[cfg(test)]
mod testutil;
