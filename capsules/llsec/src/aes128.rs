// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Software AES-128 implementing the kernel block-cipher HIL.
//!
//! Platforms with an AES peripheral provide the HIL from their chip crate;
//! this implementation backs it with the RustCrypto `aes` crate for platforms
//! without one and for host-side tests.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;
use kernel::hil::symmetric_encryption::{AES128, AES128_BLOCK_SIZE, AES128_KEY_SIZE};
use kernel::utilities::cells::MapCell;

pub struct Aes128Soft {
    cipher: MapCell<Aes128>,
}

impl Aes128Soft {
    pub fn new() -> Aes128Soft {
        Aes128Soft {
            cipher: MapCell::empty(),
        }
    }
}

impl AES128 for Aes128Soft {
    fn set_key(&self, key: &[u8; AES128_KEY_SIZE]) {
        self.cipher.replace(Aes128::new(GenericArray::from_slice(key)));
    }

    fn encrypt(&self, block: &mut [u8; AES128_BLOCK_SIZE]) {
        self.cipher.map(|cipher| {
            cipher.encrypt_block(GenericArray::from_mut_slice(block));
        });
    }
}
