// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Interface for symmetric-cipher encryption.

/// The number of bytes used for AES block operations. Keys and cipher inputs
/// must have this length.
pub const AES128_BLOCK_SIZE: usize = 16;
pub const AES128_KEY_SIZE: usize = 16;

/// A raw AES-128 block cipher.
///
/// The interface is synchronous: `encrypt` transforms one block in place and
/// returns when the block is done. Cipher modes (CTR, CBC-MAC and friends)
/// are built on top of this by their users, which keeps the key schedule in
/// one place when several modes share a key.
pub trait AES128 {
    /// Install the key used by subsequent `encrypt` calls.
    fn set_key(&self, key: &[u8; AES128_KEY_SIZE]);

    /// Encrypt `block` in place with the key from the last `set_key`.
    ///
    /// Before any key is installed the block is left untouched.
    fn encrypt(&self, block: &mut [u8; AES128_BLOCK_SIZE]);
}
