// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Extended (64-bit) link-layer addresses.

pub const LINKADDR_SIZE: usize = 8;

/// An extended link-layer address, as carried in frame headers and used to
/// key the neighbor table.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct LinkAddr(pub [u8; LINKADDR_SIZE]);

/// The all-zero address. Used as the receiver address of broadcast frames.
pub const LINKADDR_NULL: LinkAddr = LinkAddr([0; LINKADDR_SIZE]);

impl LinkAddr {
    pub const fn new(bytes: [u8; LINKADDR_SIZE]) -> LinkAddr {
        LinkAddr(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; LINKADDR_SIZE] {
        &self.0
    }

    /// Whether this is the null (broadcast) address.
    pub fn is_null(&self) -> bool {
        self.0 == [0; LINKADDR_SIZE]
    }
}
