// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Core Tock Kernel
//!
//! The kernel crate implements the core features of Tock as well as shared
//! code that many chips, capsules, and boards use. It also holds the Hardware
//! Interface Layer (HIL) definitions.

#![warn(unreachable_pub)]
#![no_std]

pub mod collections;
#[macro_use]
pub mod debug;
pub mod hil;
pub mod utilities;

mod errorcode;

pub use crate::errorcode::ErrorCode;
