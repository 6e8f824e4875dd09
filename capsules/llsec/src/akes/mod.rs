// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! The Adaptive Key Establishment Scheme.
//!
//! A three-way handshake establishes pairwise session keys with every radio
//! neighbor:
//!
//! ```text
//! A --- HELLO (challenge_A) ------------------> B   broadcast
//! A <-- HELLOACK (challenge_A, challenge_B) --- B   after a random delay
//! A --- ACK ----------------------------------> B
//! ```
//!
//! Both sides derive the session key from a predistributed shared secret and
//! the exchanged challenges. HELLOs are scheduled by Trickle so chatter
//! decays in a stable neighborhood; HELLOACK, ACK and HELLO sends are rate
//! limited with leaky buckets so a flood of handshake traffic cannot exhaust
//! the node. Established sessions expire after a quiet period; an expiration
//! sweep probes quiet neighbors with an UPDATE before letting go of them.
//!
//! The engine owns one kernel one-shot timer and multiplexes all of its
//! deadlines over it: the HELLO round end, the per-tentative HELLOACK
//! delays, the expiration sweep, and Trickle's transmission point.

pub mod nbr;
pub mod single;
pub mod trickle;

use crate::adaptivesec::{Adaptivesec, SendDoneClient};
use crate::akes::nbr::{AkesNbr, SessionStatus, WaitState, CHALLENGE_LEN, LIFETIME_S};
use crate::akes::single::Scheme;
use crate::akes::trickle::{Trickle, TrickleEvent};
use crate::anti_replay;
use crate::config::CONFIG;
use crate::leaky_bucket::LeakyBucket;
use crate::cmd_broker::{CmdBrokerResult, CmdHandler};
use crate::net::frame::SecurityLevel;
use crate::net::linkaddr::LINKADDR_NULL;
use crate::net::packetbuf::{PacketBuf, PacketBufAttr};

use kernel::debug;
use kernel::hil::mac::TxStatus;
use kernel::hil::symmetric_encryption::{AES128, AES128_KEY_SIZE};
use kernel::hil::time::{Timer, TimerClient, CLOCK_SECOND};
use kernel::utilities::cells::OptionalCell;
use kernel::ErrorCode;

use core::cell::Cell;

pub const CMD_HELLO: u8 = 0x0A;
pub const CMD_HELLOACK: u8 = 0x0B;
/// HELLOACK from a responder that already has a permanent session with us,
/// so rekey offers are distinguishable from first contact.
pub const CMD_HELLOACK_P: u8 = 0x1B;
pub const CMD_ACK: u8 = 0x0C;
/// Coresec broadcast authentication bundle.
pub const CMD_ANNOUNCE: u8 = 0x0D;
pub const CMD_UPDATE: u8 = 0x0E;
pub const CMD_UPDATEACK: u8 = 0x0F;

/// How long a HELLO round stays open for HELLOACKs.
pub const MAX_WAITING_PERIOD_S: u32 = 15;
/// Extra tentative lifetime beyond the HELLOACK delay, covering the ACK's
/// round trip.
pub const ACK_DELAY_S: u32 = 5;
const MIN_HELLOACK_DELAY: u32 = CLOCK_SECOND / 8;
/// HELLOACK delays spread out to the waiting period minus the MAC's
/// retransmission backoff.
const MAX_HELLOACK_DELAY: u32 = (MAX_WAITING_PERIOD_S - 2) * CLOCK_SECOND;
/// One MAC retry for HELLOACKs and ACKs.
const MAX_HELLOACK_AND_ACK_TRANSMISSIONS: u16 = 2;
/// Period of the session-expiration sweep.
const SWEEP_PERIOD_S: u32 = 60;

const MAX_CONSECUTIVE_HELLOS: u16 = 10;
const HELLO_RATE_S: u32 = 5 * 60;
const MAX_CONSECUTIVE_HELLOACKS: u16 = 20;
const HELLOACK_RATE_S: u32 = 150;

const HELLO_LEN: usize = 1 + CHALLENGE_LEN;

/// Payload offset of the index byte that starts an update command's
/// trailing fields.
fn update_cmd_offset(cmd_id: u8) -> usize {
    match cmd_id {
        CMD_HELLOACK | CMD_HELLOACK_P => 1 + 2 * CHALLENGE_LEN,
        _ => 1,
    }
}

fn carries_group_key(cmd_id: u8) -> bool {
    CONFIG.group_keys && matches!(cmd_id, CMD_HELLOACK | CMD_HELLOACK_P | CMD_ACK)
}

/// Payload length of an update command, MIC excluded.
fn update_cmd_len(cmd_id: u8) -> usize {
    update_cmd_offset(cmd_id)
        + 1
        + if CONFIG.counter_suppression { 8 } else { 0 }
        + if carries_group_key(cmd_id) { AES128_KEY_SIZE } else { 0 }
}

/// Which of the receiver's sessions keys the staged outgoing frame.
/// HELLOACKs are keyed to the tentative session they belong to; so are ACKs
/// when no pairwise keys exist yet to be promoted (group-key-only mode).
pub fn receiver_status<A: AES128>(
    adaptivesec: &Adaptivesec<'_, A>,
    with_pairwise_keys: bool,
) -> SessionStatus {
    match adaptivesec.get_cmd_id() {
        Some(CMD_HELLOACK) | Some(CMD_HELLOACK_P) => SessionStatus::Tentative,
        Some(CMD_ACK) if !with_pairwise_keys => SessionStatus::Tentative,
        _ => SessionStatus::Permanent,
    }
}

/// What the engine is waiting to hear a transmit completion for.
#[derive(Clone, Copy, PartialEq, Eq)]
enum PendingTx {
    None,
    Hello,
    Ack { entry: usize, is_new: bool },
    Update { entry: usize },
}

pub struct Akes<'a, A: AES128> {
    adaptivesec: &'a Adaptivesec<'a, A>,
    nbr: &'a AkesNbr,
    pbuf: &'a PacketBuf,
    aes: &'a A,
    timer: &'a dyn Timer<'a>,
    scheme: &'a dyn Scheme,
    trickle: Trickle,
    hello_challenge: Cell<[u8; CHALLENGE_LEN]>,
    awaiting_helloacks: Cell<bool>,
    hello_round_deadline: OptionalCell<u32>,
    sweep_deadline: Cell<u32>,
    hello_bucket: LeakyBucket,
    helloack_bucket: LeakyBucket,
    ack_bucket: LeakyBucket,
    pending_tx: Cell<PendingTx>,
    /// Reference to self with the capsule lifetime, stored at `start` so
    /// `&self` callbacks can register as transmit-completion clients.
    self_ref: OptionalCell<&'a Akes<'a, A>>,
}

impl<'a, A: AES128> Akes<'a, A> {
    pub fn new(
        adaptivesec: &'a Adaptivesec<'a, A>,
        nbr: &'a AkesNbr,
        pbuf: &'a PacketBuf,
        aes: &'a A,
        timer: &'a dyn Timer<'a>,
        scheme: &'a dyn Scheme,
    ) -> Akes<'a, A> {
        Akes {
            adaptivesec,
            nbr,
            pbuf,
            aes,
            timer,
            scheme,
            trickle: Trickle::new(),
            hello_challenge: Cell::new([0; CHALLENGE_LEN]),
            awaiting_helloacks: Cell::new(false),
            hello_round_deadline: OptionalCell::empty(),
            sweep_deadline: Cell::new(0),
            hello_bucket: LeakyBucket::new(MAX_CONSECUTIVE_HELLOS, HELLO_RATE_S),
            helloack_bucket: LeakyBucket::new(MAX_CONSECUTIVE_HELLOACKS, HELLOACK_RATE_S),
            ack_bucket: LeakyBucket::new(MAX_CONSECUTIVE_HELLOACKS, HELLOACK_RATE_S),
            pending_tx: Cell::new(PendingTx::None),
            self_ref: OptionalCell::empty(),
        }
    }

    /// Bring the handshake up: draw the first HELLO challenge, start
    /// Trickle and the expiration sweep, and broadcast an initial HELLO.
    pub fn start(&'a self) -> Result<(), ErrorCode> {
        self.self_ref.set(self);
        self.timer.set_client(self);
        self.change_hello_challenge();
        let now = self.adaptivesec.now();
        self.sweep_deadline
            .set(now.wrapping_add(SWEEP_PERIOD_S * CLOCK_SECOND));
        self.trickle.start(now, self.rand16());
        let _ = self.broadcast_hello();
        self.rearm_timer();
        Ok(())
    }

    fn rand16(&self) -> u16 {
        let mut bytes = [0; 2];
        self.adaptivesec.fill_random(&mut bytes);
        u16::from_be_bytes(bytes)
    }

    fn change_hello_challenge(&self) {
        let mut challenge = [0; CHALLENGE_LEN];
        self.adaptivesec.fill_random(&mut challenge);
        self.hello_challenge.set(challenge);
    }

    /// AES-128 as the key derivation function: the shared secret keys one
    /// block encryption of the concatenated challenges. The secret is
    /// already uniformly distributed, so plain expansion suffices.
    fn generate_pairwise_key(
        &self,
        challenges: &[u8; 2 * CHALLENGE_LEN],
        secret: &[u8; AES128_KEY_SIZE],
    ) -> [u8; AES128_KEY_SIZE] {
        let mut key = *challenges;
        self.aes.set_key(secret);
        self.aes.encrypt(&mut key);
        key
    }

    /// Broadcast a HELLO carrying the current challenge. Refused while a
    /// round is already open or the HELLO bucket is full.
    pub fn broadcast_hello(&'a self) -> Result<(), ErrorCode> {
        if self.awaiting_helloacks.get() {
            debug!("akes: still waiting for HELLOACKs");
            return Err(ErrorCode::BUSY);
        }
        if self.pending_tx.get() != PendingTx::None {
            // Another command still owns the frame workspace.
            return Err(ErrorCode::BUSY);
        }
        let now_s = self.adaptivesec.seconds();
        if self.hello_bucket.is_full(now_s) {
            debug!("akes: HELLO bucket is full");
            return Err(ErrorCode::BUSY);
        }
        self.hello_bucket.pour(now_s);

        self.adaptivesec.prepare_command(CMD_HELLO, LINKADDR_NULL);
        let challenge = self.hello_challenge.get();
        self.pbuf.with_payload_region_mut(|payload| {
            payload[1..HELLO_LEN].copy_from_slice(&challenge);
        });
        self.pbuf.set_datalen(HELLO_LEN);
        self.adaptivesec.add_security_header()?;

        debug!("akes: broadcasting HELLO");
        self.pending_tx.set(PendingTx::Hello);
        let strategy = self.adaptivesec.strategy().ok_or(ErrorCode::FAIL)?;
        let result = strategy.send(self);
        if result.is_err() {
            self.pending_tx.set(PendingTx::None);
        }
        result
    }

    fn on_hello(&'a self) -> CmdBrokerResult {
        debug!("akes: received HELLO");
        let now_s = self.adaptivesec.seconds();
        self.nbr.delete_expired_tentatives(now_s);
        let sender = self.pbuf.sender();
        let entry = self.nbr.entry_of(&sender);

        if let Some(entry_index) = entry {
            if let Some(permanent) = self.nbr.get_permanent(entry_index) {
                if CONFIG.counter_suppression {
                    anti_replay::restore_counter(&permanent.anti_replay, self.pbuf);
                }
                let strategy = match self.adaptivesec.strategy() {
                    Some(strategy) => strategy,
                    None => return CmdBrokerResult::Error,
                };
                match strategy.verify(entry_index) {
                    crate::adaptivesec::Verify::Success => {
                        self.nbr.prolong_permanent(entry_index, now_s, true);
                        self.count_fresh_hello(entry_index);
                        return CmdBrokerResult::Consumed;
                    }
                    crate::adaptivesec::Verify::Replayed => {
                        debug!("akes: replayed HELLO");
                        return CmdBrokerResult::Error;
                    }
                    crate::adaptivesec::Verify::Inauthentic => {
                        // The peer likely rebooted and lost its session.
                        debug!("akes: starting new session with permanent neighbor");
                    }
                }
            }
        }

        if self.helloack_bucket.is_full(now_s) {
            debug!("akes: HELLOACK bucket is full");
            return CmdBrokerResult::Error;
        }
        if entry.is_some_and(|entry_index| self.nbr.get_tentative(entry_index).is_some()) {
            debug!("akes: received HELLO from tentative neighbor");
            return CmdBrokerResult::Error;
        }

        let mut challenge = [0; CHALLENGE_LEN];
        let long_enough = self
            .pbuf
            .with_payload(|payload| {
                if payload.len() < HELLO_LEN {
                    return false;
                }
                challenge.copy_from_slice(&payload[1..HELLO_LEN]);
                true
            })
            .unwrap_or(false);
        if !long_enough {
            return CmdBrokerResult::Error;
        }

        let entry_index = match self.nbr.create(sender, SessionStatus::Tentative, now_s) {
            Some(entry_index) => entry_index,
            None => {
                debug!("akes: HELLO flood?");
                return CmdBrokerResult::Error;
            }
        };
        self.helloack_bucket.pour(now_s);

        let wait_ticks = self
            .adaptivesec
            .random_clock_time(MIN_HELLOACK_DELAY, MAX_HELLOACK_DELAY);
        if let Some(mut tentative) = self.nbr.get_tentative(entry_index) {
            tentative.challenge = challenge;
            tentative.expiration_s = now_s + wait_ticks / CLOCK_SECOND + ACK_DELAY_S;
            tentative.wait =
                WaitState::Pending(self.adaptivesec.now().wrapping_add(wait_ticks));
            self.nbr.set_tentative(entry_index, tentative);
        }
        debug!("akes: will send HELLOACK in {}s", wait_ticks / CLOCK_SECOND);
        CmdBrokerResult::Consumed
    }

    /// The delayed HELLOACK for `entry_index` is due.
    fn send_helloack(&'a self, entry_index: usize) {
        let mut tentative = match self.nbr.get_tentative(entry_index) {
            Some(tentative) => tentative,
            None => return,
        };
        let addr = match self.nbr.addr_of(entry_index) {
            Some(addr) => addr,
            None => return,
        };
        debug!("akes: sending HELLOACK");

        let mut challenges = [0; 2 * CHALLENGE_LEN];
        challenges[..CHALLENGE_LEN].copy_from_slice(&tentative.challenge);
        let mut fresh = [0; CHALLENGE_LEN];
        self.adaptivesec.fill_random(&mut fresh);
        challenges[CHALLENGE_LEN..].copy_from_slice(&fresh);

        let secret = match self.scheme.secret_with_hello_sender(&addr) {
            Some(secret) => secret,
            None => {
                debug!("akes: no secret with HELLO sender");
                return;
            }
        };
        tentative.challenge = fresh;
        tentative.tentative_pairwise_key = self.generate_pairwise_key(&challenges, &secret);
        tentative.wait = WaitState::HelloackSent;
        self.nbr.set_tentative(entry_index, tentative);

        let cmd_id = if self.nbr.get_permanent(entry_index).is_some() {
            CMD_HELLOACK_P
        } else {
            CMD_HELLOACK
        };
        if self
            .prepare_update_command(cmd_id, entry_index, SessionStatus::Tentative, Some(&challenges))
            .is_err()
        {
            return;
        }
        // No completion handling; a lost HELLOACK ends this handshake and
        // the tentative session simply expires.
        let _ = self.adaptivesec.send_frame(self);
    }

    fn is_acceptable_helloack(&self, now_s: u32) -> bool {
        if !self.awaiting_helloacks.get() || self.ack_bucket.is_full(now_s) {
            debug!("akes: unacceptable HELLOACK");
            return false;
        }
        true
    }

    fn on_helloack(&'a self, p_flag: bool) -> CmdBrokerResult {
        debug!("akes: received HELLOACK");
        let now_s = self.adaptivesec.seconds();
        if !self.is_acceptable_helloack(now_s) {
            return CmdBrokerResult::Error;
        }
        self.nbr.delete_expired_tentatives(now_s);

        let sender = self.pbuf.sender();
        let entry = self.nbr.entry_of(&sender);
        let had_permanent =
            entry.is_some_and(|entry_index| self.nbr.get_permanent(entry_index).is_some());
        if had_permanent && p_flag {
            debug!("akes: no need to start a new session");
            return CmdBrokerResult::Error;
        }

        let secret = match self.scheme.secret_with_helloack_sender(&sender) {
            Some(secret) => secret,
            None => {
                debug!("akes: no secret with HELLOACK sender");
                return CmdBrokerResult::Error;
            }
        };

        let mut echoed = [0; CHALLENGE_LEN];
        let mut fresh = [0; CHALLENGE_LEN];
        let cmd_id = if p_flag { CMD_HELLOACK_P } else { CMD_HELLOACK };
        let mic_len = SecurityLevel::from_attr(self.pbuf.attr(PacketBufAttr::SecurityLevel)).mic_len();
        let long_enough = self
            .pbuf
            .with_payload(|payload| {
                if payload.len() < update_cmd_len(cmd_id) + mic_len {
                    return false;
                }
                echoed.copy_from_slice(&payload[1..1 + CHALLENGE_LEN]);
                fresh.copy_from_slice(&payload[1 + CHALLENGE_LEN..1 + 2 * CHALLENGE_LEN]);
                if CONFIG.counter_suppression {
                    let off = update_cmd_offset(cmd_id) + 1;
                    let _ = anti_replay::parse_counter(&payload[off..off + 4], self.pbuf);
                }
                true
            })
            .unwrap_or(false);
        if !long_enough {
            return CmdBrokerResult::Error;
        }

        // A HELLOACK answering a stale or foreign round proves nothing.
        if echoed != self.hello_challenge.get() {
            debug!("akes: stale HELLOACK");
            return CmdBrokerResult::Error;
        }

        let mut challenges = [0; 2 * CHALLENGE_LEN];
        challenges[..CHALLENGE_LEN].copy_from_slice(&self.hello_challenge.get());
        challenges[CHALLENGE_LEN..].copy_from_slice(&fresh);
        let key = self.generate_pairwise_key(&challenges, &secret);

        if !self.adaptivesec.verify_frame(&key) {
            debug!("akes: invalid HELLOACK");
            return CmdBrokerResult::Error;
        }

        let mut is_new = true;
        if let Some(entry_index) = entry {
            if let Some(permanent) = self.nbr.get_permanent(entry_index) {
                if fresh == permanent.helloack_challenge {
                    debug!("akes: replayed HELLOACK");
                    return CmdBrokerResult::Error;
                }
                self.nbr.delete(entry_index, SessionStatus::Permanent);
                is_new = false;
            }
            if let Some(tentative) = self.nbr.get_tentative(entry_index) {
                match tentative.wait {
                    WaitState::Pending(_) => {
                        // The HELLOACK answers our HELLO; our own delayed
                        // HELLOACK toward this peer is pointless now.
                        debug!("akes: skipping HELLOACK");
                        self.nbr.delete(entry_index, SessionStatus::Tentative);
                    }
                    WaitState::HelloackSent | WaitState::AwaitingAckOfAck => {
                        debug!("akes: awaiting ACK");
                        return CmdBrokerResult::Error;
                    }
                }
            }
        }

        let strategy = match self.adaptivesec.strategy() {
            Some(strategy) => strategy,
            None => return CmdBrokerResult::Error,
        };
        let entry_index = match self.nbr.create(sender, SessionStatus::Permanent, now_s) {
            Some(entry_index) => entry_index,
            None => return CmdBrokerResult::Error,
        };
        let mut permanent = match self.nbr.get_permanent(entry_index) {
            Some(permanent) => permanent,
            None => return CmdBrokerResult::Error,
        };
        permanent.pairwise_key = key;
        permanent.helloack_challenge = fresh;
        self.nbr.set_permanent(entry_index, permanent);

        if !strategy.with_pairwise_keys() {
            // Keep the session key in a twin tentative until the MAC
            // confirms the ACK went out; the ACK itself is keyed to it.
            match self.nbr.create(sender, SessionStatus::Tentative, now_s) {
                Some(_) => {
                    if let Some(mut tentative) = self.nbr.get_tentative(entry_index) {
                        tentative.tentative_pairwise_key = key;
                        tentative.expiration_s = now_s + MAX_WAITING_PERIOD_S + 1;
                        tentative.wait = WaitState::AwaitingAckOfAck;
                        self.nbr.set_tentative(entry_index, tentative);
                    }
                }
                None => {
                    self.nbr.delete(entry_index, SessionStatus::Permanent);
                    return CmdBrokerResult::Error;
                }
            }
        }

        self.process_update_command(entry_index, cmd_id);
        self.send_ack(entry_index, is_new);
        CmdBrokerResult::Consumed
    }

    fn send_ack(&'a self, entry_index: usize, is_new: bool) {
        debug!("akes: sending ACK");
        self.ack_bucket.pour(self.adaptivesec.seconds());
        if self
            .prepare_update_command(CMD_ACK, entry_index, SessionStatus::Permanent, None)
            .is_err()
        {
            return;
        }
        self.pending_tx.set(PendingTx::Ack {
            entry: entry_index,
            is_new,
        });
        if self.adaptivesec.send_frame(self).is_err() {
            self.pending_tx.set(PendingTx::None);
        }
    }

    fn is_acceptable_ack(&self, entry_index: Option<usize>) -> bool {
        entry_index
            .and_then(|entry_index| self.nbr.get_tentative(entry_index))
            .is_some_and(|tentative| !matches!(tentative.wait, WaitState::Pending(_)))
    }

    fn on_ack(&'a self) -> CmdBrokerResult {
        debug!("akes: received ACK");
        let now_s = self.adaptivesec.seconds();
        let sender = self.pbuf.sender();
        let entry = self.nbr.entry_of(&sender);

        let mic_len = SecurityLevel::from_attr(self.pbuf.attr(PacketBufAttr::SecurityLevel)).mic_len();
        let long_enough = self
            .pbuf
            .with_payload(|payload| {
                if payload.len() < update_cmd_len(CMD_ACK) + mic_len {
                    return false;
                }
                if CONFIG.counter_suppression {
                    let _ = anti_replay::parse_counter(&payload[2..6], self.pbuf);
                }
                true
            })
            .unwrap_or(false);
        if !long_enough || !self.is_acceptable_ack(entry) {
            debug!("akes: invalid ACK");
            return CmdBrokerResult::Error;
        }
        let entry_index = match entry {
            Some(entry_index) => entry_index,
            None => return CmdBrokerResult::Error,
        };
        let tentative = match self.nbr.get_tentative(entry_index) {
            Some(tentative) => tentative,
            None => return CmdBrokerResult::Error,
        };
        if !self.adaptivesec.verify_frame(&tentative.tentative_pairwise_key) {
            debug!("akes: inauthentic ACK");
            return CmdBrokerResult::Error;
        }

        let is_new = if self.nbr.get_permanent(entry_index).is_some() {
            self.nbr.delete(entry_index, SessionStatus::Permanent);
            false
        } else {
            true
        };
        if !self.nbr.promote(entry_index, now_s) {
            return CmdBrokerResult::Error;
        }
        self.process_update_command(entry_index, CMD_ACK);
        if is_new {
            self.trickle.on_new_nbr(
                self.adaptivesec.now(),
                self.nbr.count(SessionStatus::Permanent),
                self.rand16(),
            );
        }
        CmdBrokerResult::Consumed
    }

    /// Probe a quiet permanent neighbor. Deletion happens only if neither
    /// the MAC acknowledgement nor an UPDATEACK arrives.
    pub fn send_update(&'a self, entry_index: usize) {
        if self
            .prepare_update_command(CMD_UPDATE, entry_index, SessionStatus::Permanent, None)
            .is_err()
        {
            return;
        }
        self.pending_tx.set(PendingTx::Update { entry: entry_index });
        if self.adaptivesec.send_frame(self).is_err() {
            self.pending_tx.set(PendingTx::None);
        }
    }

    fn send_updateack(&'a self, entry_index: usize) {
        if self
            .prepare_update_command(CMD_UPDATEACK, entry_index, SessionStatus::Permanent, None)
            .is_err()
        {
            return;
        }
        let _ = self.adaptivesec.send_frame(self);
    }

    fn on_update(&'a self, cmd_id: u8) -> CmdBrokerResult {
        debug!("akes: received UPDATE/UPDATEACK");
        let sender = self.pbuf.sender();
        let entry_index = match self.nbr.entry_of(&sender) {
            Some(entry_index) if self.nbr.get_permanent(entry_index).is_some() => entry_index,
            _ => {
                debug!("akes: UPDATE from unknown neighbor");
                return CmdBrokerResult::Error;
            }
        };
        let mic_len = SecurityLevel::from_attr(self.pbuf.attr(PacketBufAttr::SecurityLevel)).mic_len();
        let long_enough = self
            .pbuf
            .with_payload(|payload| {
                if payload.len() < update_cmd_len(cmd_id) + mic_len {
                    return false;
                }
                if CONFIG.counter_suppression {
                    let _ = anti_replay::parse_counter(&payload[2..6], self.pbuf);
                }
                true
            })
            .unwrap_or(false);
        if !long_enough {
            return CmdBrokerResult::Error;
        }
        let strategy = match self.adaptivesec.strategy() {
            Some(strategy) => strategy,
            None => return CmdBrokerResult::Error,
        };
        if strategy.verify(entry_index) != crate::adaptivesec::Verify::Success {
            debug!("akes: invalid UPDATE");
            return CmdBrokerResult::Error;
        }
        self.process_update_command(entry_index, cmd_id);
        if cmd_id == CMD_UPDATE {
            self.send_updateack(entry_index);
        }
        CmdBrokerResult::Consumed
    }

    /// Stage an update command (HELLOACK/ACK/UPDATE/UPDATEACK): the
    /// security header first so the assigned frame counter can be repeated
    /// in the payload, then index, counters, and the group key.
    fn prepare_update_command(
        &self,
        cmd_id: u8,
        entry_index: usize,
        status: SessionStatus,
        challenges: Option<&[u8; 2 * CHALLENGE_LEN]>,
    ) -> Result<(), ErrorCode> {
        let dest = self.nbr.addr_of(entry_index).ok_or(ErrorCode::FAIL)?;
        let index = self.nbr.index_of(entry_index, status).ok_or(ErrorCode::FAIL)?;
        self.adaptivesec.prepare_command(cmd_id, dest);
        self.adaptivesec.add_security_header()?;
        if matches!(cmd_id, CMD_HELLOACK | CMD_HELLOACK_P | CMD_ACK) {
            self.pbuf.set_attr(
                PacketBufAttr::MaxMacTransmissions,
                MAX_HELLOACK_AND_ACK_TRANSMISSIONS,
            );
        }

        let frame_counter = self.pbuf.frame_counter();
        let broadcast_counter = self.adaptivesec.counters().my_broadcast_counter();
        let group_key = self.adaptivesec.group_key();
        let mut len = 0;
        self.pbuf.with_payload_region_mut(|payload| {
            let mut off = 1;
            if let Some(challenges) = challenges {
                payload[off..off + 2 * CHALLENGE_LEN].copy_from_slice(challenges);
                off += 2 * CHALLENGE_LEN;
            }
            payload[off] = index;
            off += 1;
            if CONFIG.counter_suppression {
                // The first counter repeats this frame's own counter, so the
                // receiver can reconstruct the nonce despite suppression.
                anti_replay::write_counter(&mut payload[off..off + 4], frame_counter);
                anti_replay::write_counter(&mut payload[off + 4..off + 8], broadcast_counter);
                off += 8;
            }
            self.pbuf.set_attr(PacketBufAttr::UnencryptedBytes, off as u16);
            if carries_group_key(cmd_id) {
                payload[off..off + AES128_KEY_SIZE].copy_from_slice(&group_key);
                off += AES128_KEY_SIZE;
            }
            len = off;
        });
        self.pbuf.set_datalen(len);
        Ok(())
    }

    /// Absorb an update command's trailing fields into the permanent
    /// session: refresh it, record the peer's index and counters, and learn
    /// its group key.
    fn process_update_command(&self, entry_index: usize, cmd_id: u8) {
        let mut permanent = match self.nbr.get_permanent(entry_index) {
            Some(permanent) => permanent,
            None => return,
        };
        match cmd_id {
            CMD_ACK => permanent.sent_authentic_hello = true,
            CMD_HELLOACK | CMD_HELLOACK_P => {
                permanent.sent_authentic_hello = false;
                if !CONFIG.counter_suppression {
                    // A brand-new session; its high-water marks start at
                    // the counter of the frame that created it.
                    anti_replay::init_info(&mut permanent.anti_replay, self.pbuf);
                }
            }
            _ => {}
        }
        // Absorb this frame's counter as the new high-water mark. For
        // UPDATEs the strategy already did; the repeat is a no-op then.
        let _ = anti_replay::was_replayed(&mut permanent.anti_replay, self.pbuf);
        permanent.expiration_s = self.adaptivesec.seconds() + LIFETIME_S;
        permanent.last_was_broadcast = self.pbuf.is_broadcast();

        let off = update_cmd_offset(cmd_id);
        self.pbuf.with_payload(|payload| {
            permanent.foreign_index = payload[off];
            let mut off = off + 1;
            if CONFIG.counter_suppression {
                // The unicast counter was absorbed from the frame-counter
                // attribute above; only the broadcast one remains.
                permanent.anti_replay.his_broadcast_counter =
                    u32::from_be_bytes([
                        payload[off + 4],
                        payload[off + 5],
                        payload[off + 6],
                        payload[off + 7],
                    ]);
                off += 8;
            }
            if carries_group_key(cmd_id) {
                permanent
                    .group_key
                    .copy_from_slice(&payload[off..off + AES128_KEY_SIZE]);
            }
        });
        self.nbr.set_permanent(entry_index, permanent);
    }

    /// Count an authentic HELLO toward Trickle suppression, once per
    /// neighbor per interval.
    fn count_fresh_hello(&self, entry_index: usize) {
        if let Some(mut permanent) = self.nbr.get_permanent(entry_index) {
            if !permanent.sent_authentic_hello {
                permanent.sent_authentic_hello = true;
                self.nbr.set_permanent(entry_index, permanent);
                self.trickle.on_fresh_hello_counted();
            }
        }
    }

    /// The expiration sweep: drop timed-out tentatives, probe freshly
    /// expired permanents with an UPDATE, and delete the ones whose probe
    /// window has closed unanswered. Returns whether a probe went out.
    fn sweep(&'a self, now_s: u32) -> bool {
        self.nbr.delete_expired_tentatives(now_s);
        for entry_index in self.nbr.entry_indices().iter() {
            let permanent = match self.nbr.get_permanent(entry_index) {
                Some(permanent) => permanent,
                None => continue,
            };
            if permanent.expiration_s >= now_s {
                continue;
            }
            if now_s >= permanent.expiration_s + SWEEP_PERIOD_S {
                debug!("akes: deleting expired neighbor");
                self.nbr.delete(entry_index, SessionStatus::Permanent);
                self.trickle.on_nbr_lost(
                    self.adaptivesec.now(),
                    self.nbr.count(SessionStatus::Permanent),
                    self.rand16(),
                );
            } else if self.pending_tx.get() == PendingTx::None {
                debug!("akes: probing expired neighbor");
                self.send_update(entry_index);
                // One probe per sweep; the frame workspace is shared.
                return true;
            }
        }
        false
    }

    /// One transmission at most per fire: the frame workspace and the
    /// pending-transmission slot are shared, so remaining expired deadlines
    /// wait for the immediate re-arm.
    fn on_timer(&'a self) {
        let now = self.adaptivesec.now();
        let now_s = self.adaptivesec.seconds();
        let mut sent = false;

        if let Some(deadline) = self.hello_round_deadline.get() {
            if trickle::has_expired(deadline, now) {
                self.hello_round_deadline.clear();
                self.awaiting_helloacks.set(false);
                self.change_hello_challenge();
            }
        }

        for entry_index in self.nbr.entry_indices().iter() {
            if let Some(tentative) = self.nbr.get_tentative(entry_index) {
                if let WaitState::Pending(deadline) = tentative.wait {
                    if trickle::has_expired(deadline, now) {
                        self.send_helloack(entry_index);
                        sent = true;
                        break;
                    }
                }
            }
        }

        if !sent && trickle::has_expired(self.sweep_deadline.get(), now) {
            self.sweep_deadline
                .set(now.wrapping_add(SWEEP_PERIOD_S * CLOCK_SECOND));
            sent = self.sweep(now_s);
        }

        if !sent {
            match self.trickle.on_timeout(now, self.rand16()) {
                TrickleEvent::BroadcastHello => {
                    let _ = self.broadcast_hello();
                }
                TrickleEvent::Suppressed => {
                    debug!("akes: suppressed HELLO");
                }
                TrickleEvent::IntervalEnded => {
                    // Every neighbor may be counted again in the new interval.
                    for entry_index in self.nbr.entry_indices().iter() {
                        if let Some(mut permanent) = self.nbr.get_permanent(entry_index) {
                            if permanent.sent_authentic_hello {
                                permanent.sent_authentic_hello = false;
                                self.nbr.set_permanent(entry_index, permanent);
                            }
                        }
                    }
                }
                TrickleEvent::None => {}
            }
        }

        self.rearm_timer();
    }

    /// Arm the single one-shot timer for the earliest pending deadline.
    fn rearm_timer(&self) {
        let now = self.adaptivesec.now();
        let mut best: Option<u32> = None;
        let mut consider = |deadline: u32| {
            let remaining = deadline.wrapping_sub(now);
            let remaining = if remaining > u32::MAX / 2 { 0 } else { remaining };
            if best.map_or(true, |b| remaining < b) {
                best = Some(remaining);
            }
        };
        if let Some(deadline) = self.hello_round_deadline.get() {
            consider(deadline);
        }
        for entry_index in self.nbr.entry_indices().iter() {
            if let Some(tentative) = self.nbr.get_tentative(entry_index) {
                if let WaitState::Pending(deadline) = tentative.wait {
                    consider(deadline);
                }
            }
        }
        consider(self.sweep_deadline.get());
        if let Some(deadline) = self.trickle.next_deadline() {
            consider(deadline);
        }
        if let Some(remaining) = best {
            self.timer.oneshot(remaining.max(1));
        }
    }
}

impl<'a, A: AES128> CmdHandler for Akes<'a, A> {
    fn on_command(&self, cmd_id: u8) -> CmdBrokerResult {
        let akes = match self.self_ref.get() {
            Some(akes) => akes,
            None => return CmdBrokerResult::Error,
        };

        // Locate the encrypted region of incoming update commands before
        // any of the handlers runs CCM* over the frame.
        let mic_len =
            SecurityLevel::from_attr(self.pbuf.attr(PacketBufAttr::SecurityLevel)).mic_len();
        let datalen = self.pbuf.datalen();
        match cmd_id {
            CMD_HELLOACK | CMD_HELLOACK_P | CMD_ACK => {
                let key_len = if CONFIG.group_keys { AES128_KEY_SIZE } else { 0 };
                if datalen >= key_len + mic_len {
                    self.pbuf.set_attr(
                        PacketBufAttr::UnencryptedBytes,
                        (datalen - key_len - mic_len) as u16,
                    );
                }
            }
            CMD_UPDATE | CMD_UPDATEACK => {
                if datalen >= mic_len {
                    self.pbuf
                        .set_attr(PacketBufAttr::UnencryptedBytes, (datalen - mic_len) as u16);
                }
            }
            _ => {}
        }

        let result = match cmd_id {
            CMD_HELLO => akes.on_hello(),
            CMD_HELLOACK => akes.on_helloack(false),
            CMD_HELLOACK_P => akes.on_helloack(true),
            CMD_ACK => akes.on_ack(),
            CMD_UPDATE | CMD_UPDATEACK => akes.on_update(cmd_id),
            _ => return CmdBrokerResult::Unconsumed,
        };
        akes.rearm_timer();
        result
    }
}

impl<'a, A: AES128> TimerClient for Akes<'a, A> {
    fn fired(&self) {
        self.self_ref.map(|akes| akes.on_timer());
    }
}

impl<'a, A: AES128> SendDoneClient for Akes<'a, A> {
    fn send_done(&self, status: TxStatus, _transmissions: u8) {
        if status == TxStatus::Deferred {
            return;
        }
        let pending = self.pending_tx.replace(PendingTx::None);
        match pending {
            PendingTx::None => {}
            PendingTx::Hello => {
                self.awaiting_helloacks.set(true);
                self.hello_round_deadline.set(
                    self.adaptivesec
                        .now()
                        .wrapping_add(MAX_WAITING_PERIOD_S * CLOCK_SECOND),
                );
            }
            PendingTx::Ack { entry, is_new } => {
                let keeps_twin = self
                    .adaptivesec
                    .strategy()
                    .map(|strategy| !strategy.with_pairwise_keys())
                    .unwrap_or(false);
                if keeps_twin {
                    self.nbr.delete(entry, SessionStatus::Tentative);
                }
                if status != TxStatus::Ok {
                    debug!("akes: ACK was not acknowledged");
                    self.nbr.delete(entry, SessionStatus::Permanent);
                } else if is_new {
                    self.trickle.on_new_nbr(
                        self.adaptivesec.now(),
                        self.nbr.count(SessionStatus::Permanent),
                        self.rand16(),
                    );
                }
            }
            PendingTx::Update { entry } => {
                if status != TxStatus::Ok {
                    debug!("akes: UPDATE was not acknowledged");
                    self.nbr.delete(entry, SessionStatus::Permanent);
                    self.trickle.on_nbr_lost(
                        self.adaptivesec.now(),
                        self.nbr.count(SessionStatus::Permanent),
                        self.rand16(),
                    );
                }
            }
        }
        self.rearm_timer();
    }
}
