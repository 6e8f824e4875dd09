// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! AES-OFB cryptographic pseudo-random number generator.
//!
//! Seeded exactly once at start-up from an external entropy capability. The
//! seed splits into a key and an initial state block; each 16-byte chunk of
//! output re-applies the key (the AES unit is shared with other users) and
//! encrypts the evolving state block in place, output feedback style. The
//! state carries across calls, so the output cycle is that of AES-OFB,
//! around 2^127 blocks in expectation.

use core::cell::Cell;
use kernel::hil::rng::SeedSource;
use kernel::hil::symmetric_encryption::{AES128, AES128_BLOCK_SIZE, AES128_KEY_SIZE};
use kernel::ErrorCode;

/// Seeds consist of a key and an initial state block.
pub const CSPRNG_SEED_LEN: usize = AES128_KEY_SIZE + AES128_BLOCK_SIZE;

pub struct Csprng<'a, A: AES128> {
    aes: &'a A,
    key: Cell<[u8; AES128_KEY_SIZE]>,
    state: Cell<[u8; AES128_BLOCK_SIZE]>,
    seeded: Cell<bool>,
}

impl<'a, A: AES128> Csprng<'a, A> {
    pub fn new(aes: &'a A) -> Csprng<'a, A> {
        Csprng {
            aes,
            key: Cell::new([0; AES128_KEY_SIZE]),
            state: Cell::new([0; AES128_BLOCK_SIZE]),
            seeded: Cell::new(false),
        }
    }

    /// Seed the generator. A node that cannot obtain a seed must not start;
    /// the error is propagated for the board to act on.
    pub fn seed(&self, source: &dyn SeedSource) -> Result<(), ErrorCode> {
        let mut seed = [0; CSPRNG_SEED_LEN];
        source.fill_seed(&mut seed)?;
        let mut key = [0; AES128_KEY_SIZE];
        key.copy_from_slice(&seed[..AES128_KEY_SIZE]);
        let mut state = [0; AES128_BLOCK_SIZE];
        state.copy_from_slice(&seed[AES128_KEY_SIZE..]);
        self.key.set(key);
        self.state.set(state);
        self.seeded.set(true);
        Ok(())
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded.get()
    }

    /// Fill `out` with pseudo-random bytes.
    pub fn rand(&self, out: &mut [u8]) {
        let key = self.key.get();
        let mut state = self.state.get();
        for chunk in out.chunks_mut(AES128_BLOCK_SIZE) {
            self.aes.set_key(&key);
            self.aes.encrypt(&mut state);
            chunk.copy_from_slice(&state[..chunk.len()]);
        }
        self.state.set(state);
    }

    /// A pseudo-random value uniform in `[min, max)`.
    pub fn rand_range(&self, min: u32, max: u32) -> u32 {
        if max <= min {
            return min;
        }
        let mut bytes = [0; 4];
        self.rand(&mut bytes);
        min + u32::from_be_bytes(bytes) % (max - min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aes128::Aes128Soft;

    struct FixedSeed;
    impl SeedSource for FixedSeed {
        fn fill_seed(&self, seed: &mut [u8]) -> Result<(), ErrorCode> {
            for (i, byte) in seed.iter_mut().enumerate() {
                *byte = i as u8;
            }
            Ok(())
        }
    }

    struct NoEntropy;
    impl SeedSource for NoEntropy {
        fn fill_seed(&self, _seed: &mut [u8]) -> Result<(), ErrorCode> {
            Err(ErrorCode::NODEVICE)
        }
    }

    #[test]
    fn deterministic_for_a_fixed_seed_and_state_carries_over() {
        let aes = Aes128Soft::new();
        let a = Csprng::new(&aes);
        a.seed(&FixedSeed).unwrap();
        let mut first = [0; 24];
        a.rand(&mut first);
        let mut second = [0; 24];
        a.rand(&mut second);
        assert_ne!(first, second);

        let b = Csprng::new(&aes);
        b.seed(&FixedSeed).unwrap();
        let mut replay = [0; 24];
        b.rand(&mut replay);
        assert_eq!(first, replay);
    }

    #[test]
    fn seed_failure_is_propagated() {
        let aes = Aes128Soft::new();
        let csprng = Csprng::new(&aes);
        assert_eq!(csprng.seed(&NoEntropy), Err(ErrorCode::NODEVICE));
        assert!(!csprng.is_seeded());
    }

    #[test]
    fn rand_range_stays_in_bounds() {
        let aes = Aes128Soft::new();
        let csprng = Csprng::new(&aes);
        csprng.seed(&FixedSeed).unwrap();
        for _ in 0..32 {
            let v = csprng.rand_range(16, 1920);
            assert!((16..1920).contains(&v));
        }
        assert_eq!(csprng.rand_range(5, 5), 5);
    }
}
