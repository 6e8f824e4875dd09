// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! The pairwise-key strategy.
//!
//! Unicast frames are protected with the pairwise session key shared with
//! the receiver. Broadcast frames cannot be, as there is one frame and many
//! receivers; instead each broadcast is preceded by an ANNOUNCE command that
//! carries one MIC per established neighbor, each computed over the secured
//! broadcast frame under that neighbor's pairwise key. The position of a
//! MIC within the bundle is the receiver's index in the sender's neighbor
//! table, which both sides exchanged during the handshake.
//!
//! A receiver caches the MIC addressed to it and compares it against the
//! next broadcast from that sender. Replayed ANNOUNCEs, which are
//! unauthenticated by nature, are shed with a small dedup ring before they
//! can overwrite a cached MIC.

use crate::adaptivesec::{Adaptivesec, SendDoneClient, Strategy, Verify};
use crate::akes::{self, CMD_ANNOUNCE};
use crate::akes::nbr::{AkesNbr, SessionStatus, MAX_NEIGHBORS};
use crate::anti_replay;
use crate::cmd_broker::{CmdBrokerResult, CmdHandler};
use crate::config::CONFIG;
use crate::net::frame::SecurityLevel;
use crate::net::linkaddr::{LinkAddr, LINKADDR_NULL};
use crate::net::packetbuf::{PacketBuf, PacketBufAttr, PACKETBUF_HDR_SIZE, PACKETBUF_SIZE};

use kernel::debug;
use kernel::hil::mac::TxStatus;
use kernel::hil::symmetric_encryption::{AES128, AES128_KEY_SIZE};
use kernel::utilities::cells::{MapCell, OptionalCell};
use kernel::ErrorCode;

use core::cell::Cell;

const ANNOUNCE_MIC_LEN: usize = 8;
const ANNOUNCE_LEN: usize = 1 + MAX_NEIGHBORS * ANNOUNCE_MIC_LEN;
const _: () = assert!(ANNOUNCE_LEN <= PACKETBUF_SIZE);

/// Recently seen ANNOUNCEs, for shedding replays.
const DEDUP_SLOTS: usize = 4;

/// A secured broadcast frame parked while its ANNOUNCE is in the air.
struct StashedFrame {
    bytes: [u8; PACKETBUF_HDR_SIZE + PACKETBUF_SIZE],
    len: usize,
}

pub struct Coresec<'a, A: AES128> {
    adaptivesec: &'a Adaptivesec<'a, A>,
    nbr: &'a AkesNbr,
    pbuf: &'a PacketBuf,
    stash: MapCell<StashedFrame>,
    pending_client: OptionalCell<&'a dyn SendDoneClient>,
    /// Cached ANNOUNCE MICs, indexed by the sender's entry in our table.
    expected_mics: Cell<[Option<[u8; ANNOUNCE_MIC_LEN]>; MAX_NEIGHBORS]>,
    dedup: Cell<[Option<(LinkAddr, [u8; ANNOUNCE_MIC_LEN])>; DEDUP_SLOTS]>,
    dedup_next: Cell<usize>,
    self_ref: OptionalCell<&'a Coresec<'a, A>>,
}

impl<'a, A: AES128> Coresec<'a, A> {
    pub fn new(
        adaptivesec: &'a Adaptivesec<'a, A>,
        nbr: &'a AkesNbr,
        pbuf: &'a PacketBuf,
    ) -> Coresec<'a, A> {
        Coresec {
            adaptivesec,
            nbr,
            pbuf,
            stash: MapCell::empty(),
            pending_client: OptionalCell::empty(),
            expected_mics: Cell::new([None; MAX_NEIGHBORS]),
            dedup: Cell::new([None; DEDUP_SLOTS]),
            dedup_next: Cell::new(0),
            self_ref: OptionalCell::empty(),
        }
    }

    pub fn start(&'a self) {
        self.self_ref.set(self);
    }

    /// Pairwise key for the staged outgoing unicast frame.
    fn unicast_key(&self) -> Option<[u8; AES128_KEY_SIZE]> {
        let entry = self.nbr.entry_of(&self.pbuf.receiver())?;
        match akes::receiver_status(self.adaptivesec, true) {
            SessionStatus::Tentative => self
                .nbr
                .get_tentative(entry)
                .map(|tentative| tentative.tentative_pairwise_key),
            SessionStatus::Permanent => self
                .nbr
                .get_permanent(entry)
                .map(|permanent| permanent.pairwise_key),
        }
    }

    /// Park the secured broadcast frame and send its ANNOUNCE. The frame
    /// itself goes out once the MAC reports the ANNOUNCE done.
    fn send_broadcast(&'a self, client: &'a dyn SendDoneClient) -> Result<(), ErrorCode> {
        let mut bundle = [0; MAX_NEIGHBORS * ANNOUNCE_MIC_LEN];
        let mut receivers = 0;
        for entry in self.nbr.entry_indices().iter() {
            let permanent = match self.nbr.get_permanent(entry) {
                Some(permanent) => permanent,
                None => continue,
            };
            let index = match self.nbr.index_of(entry, SessionStatus::Permanent) {
                Some(index) => index as usize,
                None => continue,
            };
            let mut mic = [0; ANNOUNCE_MIC_LEN];
            self.adaptivesec.compute_mic(&permanent.pairwise_key, &mut mic);
            bundle[index * ANNOUNCE_MIC_LEN..(index + 1) * ANNOUNCE_MIC_LEN]
                .copy_from_slice(&mic);
            receivers += 1;
        }
        if receivers == 0 {
            // Nobody could verify an ANNOUNCE either; just transmit.
            return self.adaptivesec.transmit(client);
        }

        let mut stash = StashedFrame {
            bytes: [0; PACKETBUF_HDR_SIZE + PACKETBUF_SIZE],
            len: 0,
        };
        self.pbuf
            .with_frame(|frame| {
                stash.bytes[..frame.len()].copy_from_slice(frame);
                stash.len = frame.len();
            })
            .ok_or(ErrorCode::FAIL)?;
        self.stash.put(stash);
        self.pending_client.set(client);

        self.adaptivesec.prepare_command(CMD_ANNOUNCE, LINKADDR_NULL);
        self.pbuf.with_payload_region_mut(|payload| {
            payload[1..ANNOUNCE_LEN].copy_from_slice(&bundle);
        });
        self.pbuf.set_datalen(ANNOUNCE_LEN);
        let result = self.adaptivesec.send_command_frame(self);
        if result.is_err() {
            self.stash.take();
            self.pending_client.clear();
        }
        result
    }

    fn seen_before(&self, sender: LinkAddr, mic: [u8; ANNOUNCE_MIC_LEN]) -> bool {
        let ring = self.dedup.get();
        if ring.contains(&Some((sender, mic))) {
            return true;
        }
        let mut ring = ring;
        ring[self.dedup_next.get()] = Some((sender, mic));
        self.dedup.set(ring);
        self.dedup_next.set((self.dedup_next.get() + 1) % DEDUP_SLOTS);
        false
    }

    fn on_announce(&self) -> CmdBrokerResult {
        let sender = self.pbuf.sender();
        let entry = match self.nbr.entry_of(&sender) {
            Some(entry) => entry,
            None => return CmdBrokerResult::Error,
        };
        let permanent = match self.nbr.get_permanent(entry) {
            Some(permanent) => permanent,
            None => return CmdBrokerResult::Error,
        };
        // Our MIC sits at our index in the sender's neighbor table.
        let index = permanent.foreign_index as usize;
        let mut mic = [0; ANNOUNCE_MIC_LEN];
        let found = self
            .pbuf
            .with_payload(|payload| {
                let off = 1 + index * ANNOUNCE_MIC_LEN;
                if payload.len() < off + ANNOUNCE_MIC_LEN {
                    return false;
                }
                mic.copy_from_slice(&payload[off..off + ANNOUNCE_MIC_LEN]);
                true
            })
            .unwrap_or(false);
        if !found {
            return CmdBrokerResult::Error;
        }
        if self.seen_before(sender, mic) {
            debug!("coresec: replayed ANNOUNCE");
            return CmdBrokerResult::Error;
        }
        let mut expected = self.expected_mics.get();
        if entry >= expected.len() {
            return CmdBrokerResult::Error;
        }
        expected[entry] = Some(mic);
        self.expected_mics.set(expected);
        CmdBrokerResult::Consumed
    }
}

impl<'a, A: AES128> Strategy<'a> for Coresec<'a, A> {
    fn with_pairwise_keys(&self) -> bool {
        true
    }

    fn secure(&self) -> Result<(), ErrorCode> {
        if self.adaptivesec.get_cmd_id() == Some(CMD_ANNOUNCE) {
            // An ANNOUNCE is authentication material; it travels bare.
            return Ok(());
        }
        if self.pbuf.is_broadcast() {
            // Authentication rides in the ANNOUNCE. Encrypt under our
            // group key when the broadcast level asks for confidentiality.
            let sec_lvl =
                SecurityLevel::from_attr(self.pbuf.attr(PacketBufAttr::SecurityLevel));
            if sec_lvl.uses_encryption() && CONFIG.group_keys {
                self.adaptivesec
                    .aead_frame(&self.adaptivesec.group_key(), true, &mut []);
            }
            return Ok(());
        }
        let key = self.unicast_key().ok_or(ErrorCode::NOSUPPORT)?;
        self.adaptivesec.secure_frame(&key)
    }

    fn send(&self, client: &'a dyn SendDoneClient) -> Result<(), ErrorCode> {
        crate::net::frame::create(self.pbuf)?;
        self.secure()?;
        if !self.pbuf.is_broadcast() {
            return self.adaptivesec.transmit(client);
        }
        let coresec = self.self_ref.get().ok_or(ErrorCode::FAIL)?;
        coresec.send_broadcast(client)
    }

    fn verify(&self, entry: usize) -> Verify {
        let mut permanent = match self.nbr.get_permanent(entry) {
            Some(permanent) => permanent,
            None => return Verify::Inauthentic,
        };
        if self.pbuf.is_broadcast() {
            let expected = match self.expected_mics.get().get(entry).copied().flatten() {
                Some(expected) => expected,
                None => return Verify::Inauthentic,
            };
            let mut computed = [0; ANNOUNCE_MIC_LEN];
            self.adaptivesec
                .compute_mic(&permanent.pairwise_key, &mut computed);
            if computed != expected {
                return Verify::Inauthentic;
            }
            if anti_replay::was_replayed(&mut permanent.anti_replay, self.pbuf) {
                return Verify::Replayed;
            }
            let sec_lvl =
                SecurityLevel::from_attr(self.pbuf.attr(PacketBufAttr::SecurityLevel));
            if sec_lvl.uses_encryption() && CONFIG.group_keys {
                // The sender's group key, learned during the handshake.
                self.adaptivesec
                    .aead_frame(&permanent.group_key, false, &mut []);
            }
            self.nbr.set_permanent(entry, permanent);
            return Verify::Success;
        }
        if !self.adaptivesec.verify_frame(&permanent.pairwise_key) {
            return Verify::Inauthentic;
        }
        if anti_replay::was_replayed(&mut permanent.anti_replay, self.pbuf) {
            return Verify::Replayed;
        }
        self.nbr.set_permanent(entry, permanent);
        Verify::Success
    }
}

impl<'a, A: AES128> CmdHandler for Coresec<'a, A> {
    fn on_command(&self, cmd_id: u8) -> CmdBrokerResult {
        if cmd_id != CMD_ANNOUNCE {
            return CmdBrokerResult::Unconsumed;
        }
        self.on_announce()
    }
}

impl<'a, A: AES128> SendDoneClient for Coresec<'a, A> {
    /// The ANNOUNCE finished; release the parked broadcast frame.
    fn send_done(&self, status: TxStatus, transmissions: u8) {
        if status == TxStatus::Deferred {
            return;
        }
        let client = match self.pending_client.take() {
            Some(client) => client,
            None => return,
        };
        let stash = match self.stash.take() {
            Some(stash) => stash,
            None => {
                client.send_done(TxStatus::Err, transmissions);
                return;
            }
        };
        if status != TxStatus::Ok {
            client.send_done(status, transmissions);
            return;
        }
        if !self.pbuf.stage_incoming(&stash.bytes[..stash.len]) {
            client.send_done(TxStatus::Err, transmissions);
            return;
        }
        self.pbuf.set_receiver(LINKADDR_NULL);
        if self.adaptivesec.transmit(client).is_err() {
            client.send_done(TxStatus::Err, transmissions);
        }
    }
}
