// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Frame workspace, addressing, and wire encoding shared by the security
//! layer.

#[macro_use]
pub mod stream;

pub mod frame;
pub mod linkaddr;
pub mod packetbuf;
