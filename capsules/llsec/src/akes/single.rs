// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Shared-secret schemes for the handshake's key derivation.

use crate::net::linkaddr::LinkAddr;
use kernel::hil::symmetric_encryption::AES128_KEY_SIZE;

/// Supplies the predistributed secret shared with a given peer. Session
/// keys are derived from this secret and the exchanged challenges.
///
/// The two lookup directions are separate so schemes with asymmetric key
/// material (e.g. certificate-carrying ones) can treat the initiating and
/// responding side differently. Returning `None` aborts the handshake with
/// that peer.
pub trait Scheme {
    /// Secret shared with the sender of a received HELLO.
    fn secret_with_hello_sender(&self, addr: &LinkAddr) -> Option<[u8; AES128_KEY_SIZE]>;

    /// Secret shared with the sender of a received HELLOACK.
    fn secret_with_helloack_sender(&self, addr: &LinkAddr) -> Option<[u8; AES128_KEY_SIZE]>;
}

/// The simplest scheme: one network-wide predistributed secret, shared
/// with every peer.
pub struct SingleScheme {
    secret: [u8; AES128_KEY_SIZE],
}

impl SingleScheme {
    pub fn new(secret: [u8; AES128_KEY_SIZE]) -> SingleScheme {
        SingleScheme { secret }
    }
}

impl Scheme for SingleScheme {
    fn secret_with_hello_sender(&self, _addr: &LinkAddr) -> Option<[u8; AES128_KEY_SIZE]> {
        Some(self.secret)
    }

    fn secret_with_helloack_sender(&self, _addr: &LinkAddr) -> Option<[u8; AES128_KEY_SIZE]> {
        Some(self.secret)
    }
}
