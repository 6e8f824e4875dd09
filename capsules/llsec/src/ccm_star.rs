// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! CCM* authenticated encryption per IEEE 802.15.4, Annex B.
//!
//! Both confidentiality and integrity come from a single AES-128 unit: the
//! payload is XORed with a counter-mode keystream, and the MIC is a CBC-MAC
//! over the associated data and payload, masked with keystream block zero.
//! Verification has no error return here; callers byte-compare the computed
//! MIC against the received one.

use kernel::hil::symmetric_encryption::{AES128, AES128_BLOCK_SIZE, AES128_KEY_SIZE};

/// Length of the CCM* nonce: extended source address, frame counter, and
/// security level.
pub const CCM_STAR_NONCE_LENGTH: usize = 13;

pub struct CcmStar<'a, A: AES128> {
    aes: &'a A,
}

impl<'a, A: AES128> CcmStar<'a, A> {
    pub fn new(aes: &'a A) -> CcmStar<'a, A> {
        CcmStar { aes }
    }

    /// Install the key for subsequent `aead` calls. The AES unit is shared,
    /// so this must directly precede `aead`.
    pub fn set_key(&self, key: &[u8; AES128_KEY_SIZE]) {
        self.aes.set_key(key);
    }

    /// Authenticated encryption (`forward`) or decryption (`!forward`) in
    /// place. `m` is the confidential payload, `a` the associated data, and
    /// `mic` receives the computed MIC (empty, 4, 8, or 16 bytes). The MIC is
    /// always computed over the plaintext, so decryption runs counter mode
    /// first.
    pub fn aead(
        &self,
        nonce: &[u8; CCM_STAR_NONCE_LENGTH],
        m: &mut [u8],
        a: &[u8],
        mic: &mut [u8],
        forward: bool,
    ) {
        if !forward {
            self.ctr(nonce, m);
        }
        if !mic.is_empty() {
            self.cbc_mac(nonce, m, a, mic);
        }
        if forward {
            self.ctr(nonce, m);
        }
    }

    /// Keystream input block `A_i`: flags, nonce, 2-byte block counter.
    fn ctr_block(nonce: &[u8; CCM_STAR_NONCE_LENGTH], counter: u16) -> [u8; AES128_BLOCK_SIZE] {
        let mut block = [0; AES128_BLOCK_SIZE];
        block[0] = 1; // L - 1, for 2-byte length fields
        block[1..14].copy_from_slice(nonce);
        block[14] = (counter >> 8) as u8;
        block[15] = counter as u8;
        block
    }

    fn ctr(&self, nonce: &[u8; CCM_STAR_NONCE_LENGTH], m: &mut [u8]) {
        for (i, chunk) in m.chunks_mut(AES128_BLOCK_SIZE).enumerate() {
            let mut keystream = Self::ctr_block(nonce, (i + 1) as u16);
            self.aes.encrypt(&mut keystream);
            for (byte, ks) in chunk.iter_mut().zip(keystream.iter()) {
                *byte ^= ks;
            }
        }
    }

    fn cbc_mac(
        &self,
        nonce: &[u8; CCM_STAR_NONCE_LENGTH],
        m: &[u8],
        a: &[u8],
        mic: &mut [u8],
    ) {
        // B_0 carries the flags, the nonce, and the payload length.
        let mut x = [0; AES128_BLOCK_SIZE];
        x[0] = (((!a.is_empty()) as u8) << 6) | ((mic.len().saturating_sub(2) as u8 / 2) << 3) | 1;
        x[1..14].copy_from_slice(nonce);
        x[14] = (m.len() >> 8) as u8;
        x[15] = m.len() as u8;
        self.aes.encrypt(&mut x);

        // The associated data is prefixed with its 2-byte length and padded
        // to a block boundary.
        if !a.is_empty() {
            x[0] ^= (a.len() >> 8) as u8;
            x[1] ^= a.len() as u8;
            let first = a.len().min(AES128_BLOCK_SIZE - 2);
            for (i, byte) in a[..first].iter().enumerate() {
                x[2 + i] ^= byte;
            }
            self.aes.encrypt(&mut x);
            for chunk in a[first..].chunks(AES128_BLOCK_SIZE) {
                for (i, byte) in chunk.iter().enumerate() {
                    x[i] ^= byte;
                }
                self.aes.encrypt(&mut x);
            }
        }

        for chunk in m.chunks(AES128_BLOCK_SIZE) {
            for (i, byte) in chunk.iter().enumerate() {
                x[i] ^= byte;
            }
            self.aes.encrypt(&mut x);
        }

        // The MIC on the wire is the tag masked with keystream block zero.
        let mut a0 = Self::ctr_block(nonce, 0);
        self.aes.encrypt(&mut a0);
        for (i, out) in mic.iter_mut().enumerate() {
            *out = x[i] ^ a0[i];
        }
    }
}
