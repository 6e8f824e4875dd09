// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Public traits for interfaces between Tock components.

pub mod mac;
pub mod reset;
pub mod rng;
pub mod symmetric_encryption;
pub mod time;
