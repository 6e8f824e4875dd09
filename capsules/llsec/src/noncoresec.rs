// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! The group-key strategy.
//!
//! Every frame a node sends is protected with the node's own group key,
//! which its neighbors learned during the handshake. Verification therefore
//! looks up the *sender's* group key in the permanent session. The pairwise
//! keys the handshake derives still exist, but only transiently: HELLOACKs
//! and ACKs are keyed to the tentative session so a session hijacker cannot
//! complete a handshake it did not start.

use crate::adaptivesec::{Adaptivesec, SendDoneClient, Strategy, Verify};
use crate::akes;
use crate::akes::nbr::{AkesNbr, SessionStatus};
use crate::anti_replay;
use crate::net::packetbuf::PacketBuf;

use kernel::hil::symmetric_encryption::{AES128, AES128_KEY_SIZE};
use kernel::ErrorCode;

pub struct Noncoresec<'a, A: AES128> {
    adaptivesec: &'a Adaptivesec<'a, A>,
    nbr: &'a AkesNbr,
    pbuf: &'a PacketBuf,
}

impl<'a, A: AES128> Noncoresec<'a, A> {
    pub fn new(
        adaptivesec: &'a Adaptivesec<'a, A>,
        nbr: &'a AkesNbr,
        pbuf: &'a PacketBuf,
    ) -> Noncoresec<'a, A> {
        Noncoresec {
            adaptivesec,
            nbr,
            pbuf,
        }
    }

    /// Key for the staged outgoing frame. Handshake commands addressed to a
    /// tentative session use its pairwise key; everything else uses our own
    /// group key.
    fn tx_key(&self) -> [u8; AES128_KEY_SIZE] {
        let receiver = self.pbuf.receiver();
        if !receiver.is_null() {
            if let Some(entry) = self.nbr.entry_of(&receiver) {
                let status = akes::receiver_status(self.adaptivesec, false);
                if status == SessionStatus::Tentative {
                    if let Some(tentative) = self.nbr.get_tentative(entry) {
                        return tentative.tentative_pairwise_key;
                    }
                }
            }
        }
        self.adaptivesec.group_key()
    }
}

impl<'a, A: AES128> Strategy<'a> for Noncoresec<'a, A> {
    fn with_pairwise_keys(&self) -> bool {
        false
    }

    fn secure(&self) -> Result<(), ErrorCode> {
        self.adaptivesec.secure_frame(&self.tx_key())
    }

    fn send(&self, client: &'a dyn SendDoneClient) -> Result<(), ErrorCode> {
        self.adaptivesec.send_frame(client)
    }

    fn verify(&self, entry: usize) -> Verify {
        let mut permanent = match self.nbr.get_permanent(entry) {
            Some(permanent) => permanent,
            None => return Verify::Inauthentic,
        };
        if !self.adaptivesec.verify_frame(&permanent.group_key) {
            return Verify::Inauthentic;
        }
        if anti_replay::was_replayed(&mut permanent.anti_replay, self.pbuf) {
            return Verify::Replayed;
        }
        self.nbr.set_permanent(entry, permanent);
        Verify::Success
    }
}
