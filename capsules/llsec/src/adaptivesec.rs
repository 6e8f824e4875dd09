// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! The adaptive link-layer security driver.
//!
//! Sits between the upper layers and the MAC: every outgoing frame gets a
//! security level, a frame counter, a header, and CCM* protection before it
//! reaches the radio; every incoming frame is parsed, routed (command frames
//! to the broker, data frames to verification and delivery), and dropped on
//! the floor when anything is off.
//!
//! How frames are keyed is delegated to a [`Strategy`] chosen at start-up:
//! `noncoresec` protects everything with network-wide group keys, `coresec`
//! with per-neighbor pairwise keys. The driver itself only knows how to run
//! CCM* over the staged frame once a strategy has picked the key.

use crate::akes;
use crate::akes::nbr::AkesNbr;
use crate::anti_replay::{self, NodeCounters};
use crate::ccm_star::{CcmStar, CCM_STAR_NONCE_LENGTH};
use crate::cmd_broker::{CmdBroker, CmdBrokerResult};
use crate::config::CONFIG;
use crate::csprng::Csprng;
use crate::net::frame::{self, FrameType, SecurityLevel};
use crate::net::linkaddr::LinkAddr;
use crate::net::packetbuf::{PacketBuf, PacketBufAttr};

use kernel::debug;
use kernel::hil::mac::{Mac, RxClient, TxClient, TxStatus};
use kernel::hil::reset::Reset;
use kernel::hil::symmetric_encryption::{AES128, AES128_KEY_SIZE};
use kernel::hil::time::Time;
use kernel::utilities::cells::OptionalCell;
use kernel::ErrorCode;

use core::cell::Cell;

/// Outcome of verifying a received frame against a session.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Verify {
    Success,
    /// The MIC did not check out under the expected key.
    Inauthentic,
    /// Authentic, but its frame counter was not strictly greater than the
    /// session's high-water mark.
    Replayed,
}

/// Completion callback for a frame handed to [`Adaptivesec::send`] or one of
/// the command send paths.
pub trait SendDoneClient {
    fn send_done(&self, status: TxStatus, transmissions: u8);
}

/// How outgoing frames are keyed and incoming data frames verified.
pub trait Strategy<'a> {
    /// Whether this strategy establishes pairwise session keys (as opposed
    /// to protecting frames with group keys only). Decides whether the
    /// handshake keeps a twin tentative session alive across the final ACK.
    fn with_pairwise_keys(&self) -> bool;

    /// Protect the staged outgoing frame in place: pick the key and append
    /// the MIC (and encrypt, per the frame's security level).
    fn secure(&self) -> Result<(), ErrorCode>;

    /// Send the staged outgoing data frame. The security header and
    /// attributes are already in place; the strategy frames, secures, and
    /// transmits (possibly preceded by its own traffic, as coresec's
    /// broadcast authentication is).
    fn send(&self, client: &'a dyn SendDoneClient) -> Result<(), ErrorCode>;

    /// Verify the staged incoming data frame against the sender's permanent
    /// session `entry`, absorbing its frame counter on success.
    fn verify(&self, entry: usize) -> Verify;
}

pub struct Adaptivesec<'a, A: AES128> {
    pbuf: &'a PacketBuf,
    ccm: &'a CcmStar<'a, A>,
    csprng: &'a Csprng<'a, A>,
    nbr: &'a AkesNbr,
    broker: &'a CmdBroker<'a>,
    mac: &'a dyn Mac<'a>,
    time: &'a dyn Time,
    reset: &'a dyn Reset,
    own_addr: LinkAddr,
    group_key: Cell<[u8; AES128_KEY_SIZE]>,
    counters: NodeCounters,
    seqno: Cell<u8>,
    strategy: OptionalCell<&'a dyn Strategy<'a>>,
    tx_client: OptionalCell<&'a dyn SendDoneClient>,
    rx_client: OptionalCell<&'a dyn RxClient>,
}

impl<'a, A: AES128> Adaptivesec<'a, A> {
    pub fn new(
        pbuf: &'a PacketBuf,
        ccm: &'a CcmStar<'a, A>,
        csprng: &'a Csprng<'a, A>,
        nbr: &'a AkesNbr,
        broker: &'a CmdBroker<'a>,
        mac: &'a dyn Mac<'a>,
        time: &'a dyn Time,
        reset: &'a dyn Reset,
        own_addr: LinkAddr,
    ) -> Adaptivesec<'a, A> {
        Adaptivesec {
            pbuf,
            ccm,
            csprng,
            nbr,
            broker,
            mac,
            time,
            reset,
            own_addr,
            group_key: Cell::new([0; AES128_KEY_SIZE]),
            counters: NodeCounters::new(),
            seqno: Cell::new(0),
            strategy: OptionalCell::empty(),
            tx_client: OptionalCell::empty(),
            rx_client: OptionalCell::empty(),
        }
    }

    /// Draw the node's group key. The CSPRNG must have been seeded; a node
    /// without entropy must not start.
    pub fn init(&self) -> Result<(), ErrorCode> {
        if !self.csprng.is_seeded() {
            return Err(ErrorCode::OFF);
        }
        if CONFIG.group_keys {
            let mut key = [0; AES128_KEY_SIZE];
            self.csprng.rand(&mut key);
            self.group_key.set(key);
        }
        Ok(())
    }

    pub fn set_strategy(&self, strategy: &'a dyn Strategy<'a>) {
        self.strategy.set(strategy);
    }

    pub fn set_rx_client(&self, client: &'a dyn RxClient) {
        self.rx_client.set(client);
    }

    pub fn strategy(&self) -> Option<&'a dyn Strategy<'a>> {
        self.strategy.get()
    }

    pub fn own_addr(&self) -> LinkAddr {
        self.own_addr
    }

    pub fn group_key(&self) -> [u8; AES128_KEY_SIZE] {
        self.group_key.get()
    }

    pub fn counters(&self) -> &NodeCounters {
        &self.counters
    }

    pub fn now(&self) -> u32 {
        self.time.now()
    }

    pub fn seconds(&self) -> u32 {
        self.time.seconds()
    }

    /// A tick count drawn uniformly from `[min, max)`.
    pub fn random_clock_time(&self, min: u32, max: u32) -> u32 {
        self.csprng.rand_range(min, max)
    }

    pub fn fill_random(&self, out: &mut [u8]) {
        self.csprng.rand(out);
    }

    /// Security level of the staged outgoing frame: HELLOs get the
    /// broadcast level, the remaining handshake commands the unicast level,
    /// ANNOUNCEs none (their payload *is* authentication material), and
    /// data frames the configured level for their direction.
    pub fn get_sec_lvl(&self) -> SecurityLevel {
        match self.get_cmd_id() {
            Some(akes::CMD_HELLO) => CONFIG.broadcast_sec_lvl,
            Some(akes::CMD_ANNOUNCE) => SecurityLevel::None,
            Some(_) => SecurityLevel::EncMic64,
            None => {
                if self.pbuf.is_broadcast() {
                    CONFIG.broadcast_sec_lvl
                } else {
                    CONFIG.unicast_sec_lvl
                }
            }
        }
    }

    /// The command id of the staged frame, when it is a command frame with
    /// a payload.
    pub fn get_cmd_id(&self) -> Option<u8> {
        if self.pbuf.attr(PacketBufAttr::FrameType) != FrameType::Cmd as u16 {
            return None;
        }
        self.pbuf
            .with_payload(|payload| payload.first().copied())
            .flatten()
    }

    /// Reset the workspace and stage a one-byte command frame to `dest`.
    /// The caller appends the command's fields and adjusts the data length.
    pub fn prepare_command(&self, cmd_id: u8, dest: LinkAddr) {
        self.pbuf.clear();
        self.pbuf.set_attr(PacketBufAttr::FrameType, FrameType::Cmd as u16);
        self.seqno.set(self.seqno.get().wrapping_add(1));
        self.pbuf.set_attr(PacketBufAttr::MacSeqno, self.seqno.get() as u16);
        self.pbuf.set_sender(self.own_addr);
        self.pbuf.set_receiver(dest);
        self.pbuf.with_payload_region_mut(|payload| payload[0] = cmd_id);
        self.pbuf.set_datalen(1);
    }

    /// Stamp the staged frame with its security level and the next outgoing
    /// frame counter. Counter overflow is fatal: the node asks the platform
    /// to restart rather than reuse a nonce.
    pub fn add_security_header(&self) -> Result<(), ErrorCode> {
        let sec_lvl = self.get_sec_lvl();
        self.pbuf.set_attr(PacketBufAttr::SecurityLevel, sec_lvl as u16);
        if sec_lvl == SecurityLevel::None {
            return Ok(());
        }
        if self.counters.set_counter(self.pbuf).is_err() {
            debug!("adaptivesec: frame counter overflowed, requesting restart");
            self.reset.reset();
            return Err(ErrorCode::FAIL);
        }
        if CONFIG.counter_suppression {
            anti_replay::suppress_counter(self.pbuf);
        }
        Ok(())
    }

    /// Frame, secure, and transmit the staged frame. Attributes and the
    /// security header must already be in place.
    pub fn send_frame(&self, client: &'a dyn SendDoneClient) -> Result<(), ErrorCode> {
        frame::create(self.pbuf)?;
        let strategy = self.strategy.get().ok_or(ErrorCode::FAIL)?;
        strategy.secure()?;
        self.transmit(client)
    }

    /// Send a command frame staged with `prepare_command`.
    pub fn send_command_frame(&self, client: &'a dyn SendDoneClient) -> Result<(), ErrorCode> {
        self.add_security_header()?;
        self.send_frame(client)
    }

    /// Send the data payload staged in the packet buffer. The caller has
    /// set the receiver address and the data length.
    pub fn send(&self, client: &'a dyn SendDoneClient) -> Result<(), ErrorCode> {
        self.pbuf.set_attr(PacketBufAttr::FrameType, FrameType::Data as u16);
        self.seqno.set(self.seqno.get().wrapping_add(1));
        self.pbuf.set_attr(PacketBufAttr::MacSeqno, self.seqno.get() as u16);
        self.pbuf.set_sender(self.own_addr);
        self.add_security_header()?;
        let strategy = self.strategy.get().ok_or(ErrorCode::FAIL)?;
        strategy.send(client)
    }

    /// Hand the framed, secured frame to the MAC.
    pub fn transmit(&self, client: &'a dyn SendDoneClient) -> Result<(), ErrorCode> {
        self.tx_client.set(client);
        self.mac.transmit()
    }

    fn nonce(&self, addr: &LinkAddr, sec_lvl: SecurityLevel) -> [u8; CCM_STAR_NONCE_LENGTH] {
        let mut nonce = [0; CCM_STAR_NONCE_LENGTH];
        nonce[..8].copy_from_slice(addr.as_bytes());
        nonce[8..12].copy_from_slice(&self.pbuf.frame_counter().to_be_bytes());
        nonce[12] = sec_lvl as u8;
        nonce
    }

    /// Run CCM* over the staged frame. The associated-data region is the
    /// header plus the first `UnencryptedBytes` payload bytes (the whole
    /// frame for unencrypted levels); the rest of the payload is the
    /// confidential region.
    pub fn aead_frame(&self, key: &[u8; AES128_KEY_SIZE], forward: bool, mic: &mut [u8]) {
        let sec_lvl = SecurityLevel::from_attr(self.pbuf.attr(PacketBufAttr::SecurityLevel));
        let nonce = self.nonce(&self.pbuf.sender(), sec_lvl);
        let unenc = self.pbuf.attr(PacketBufAttr::UnencryptedBytes) as usize;
        self.ccm.set_key(key);
        self.pbuf.with_frame_mut(|frame, hdr_len| {
            let split = if sec_lvl.uses_encryption() {
                (hdr_len + unenc).min(frame.len())
            } else {
                frame.len()
            };
            let (a, m) = frame.split_at_mut(split);
            self.ccm.aead(&nonce, m, a, mic, forward);
        });
    }

    /// Secure the staged outgoing frame under `key` per its security-level
    /// attribute, appending the MIC to the payload.
    pub fn secure_frame(&self, key: &[u8; AES128_KEY_SIZE]) -> Result<(), ErrorCode> {
        let sec_lvl = SecurityLevel::from_attr(self.pbuf.attr(PacketBufAttr::SecurityLevel));
        let mic_len = sec_lvl.mic_len();
        let mut mic = [0; 16];
        self.aead_frame(key, true, &mut mic[..mic_len]);
        let datalen = self.pbuf.datalen();
        self.pbuf
            .with_payload_region_mut(|payload| {
                if datalen + mic_len > payload.len() {
                    return Err(ErrorCode::SIZE);
                }
                payload[datalen..datalen + mic_len].copy_from_slice(&mic[..mic_len]);
                Ok(())
            })
            .ok_or(ErrorCode::FAIL)??;
        self.pbuf.set_datalen(datalen + mic_len);
        Ok(())
    }

    /// Verify (and decrypt) the staged incoming frame under `key`. On
    /// success the MIC is stripped off the payload and the payload is
    /// plaintext; on failure the frame contents are unusable.
    pub fn verify_frame(&self, key: &[u8; AES128_KEY_SIZE]) -> bool {
        let sec_lvl = SecurityLevel::from_attr(self.pbuf.attr(PacketBufAttr::SecurityLevel));
        let mic_len = sec_lvl.mic_len();
        let datalen = self.pbuf.datalen();
        if datalen < mic_len {
            return false;
        }
        let mut received = [0; 16];
        self.pbuf.with_payload(|payload| {
            received[..mic_len].copy_from_slice(&payload[datalen - mic_len..datalen]);
        });
        self.pbuf.set_datalen(datalen - mic_len);
        let mut computed = [0; 16];
        self.aead_frame(key, false, &mut computed[..mic_len]);
        computed[..mic_len] == received[..mic_len]
    }

    /// MIC over the entire staged frame as associated data, without
    /// touching the frame. Used by coresec's broadcast authentication.
    pub fn compute_mic(&self, key: &[u8; AES128_KEY_SIZE], mic: &mut [u8]) {
        let sec_lvl = SecurityLevel::from_attr(self.pbuf.attr(PacketBufAttr::SecurityLevel));
        let nonce = self.nonce(&self.pbuf.sender(), sec_lvl);
        self.ccm.set_key(key);
        self.pbuf.with_frame_mut(|frame, _| {
            self.ccm.aead(&nonce, &mut [], frame, mic, true);
        });
    }

    fn input(&self) -> Result<(), ErrorCode> {
        frame::parse(self.pbuf)?;
        let frame_type = self.pbuf.attr(PacketBufAttr::FrameType);
        if frame_type == FrameType::Cmd as u16 {
            return match self.broker.publish(self.pbuf) {
                CmdBrokerResult::Consumed => Ok(()),
                CmdBrokerResult::Unconsumed => Err(ErrorCode::NOSUPPORT),
                CmdBrokerResult::Error => Err(ErrorCode::FAIL),
            };
        }
        if frame_type != FrameType::Data as u16 {
            return Err(ErrorCode::NOSUPPORT);
        }

        // Data frames are accepted from established neighbors only.
        let sender = self.pbuf.sender();
        let entry = self.nbr.entry_of(&sender).ok_or(ErrorCode::NOSUPPORT)?;
        let permanent = self.nbr.get_permanent(entry).ok_or(ErrorCode::NOSUPPORT)?;
        if self.pbuf.attr(PacketBufAttr::CounterSuppression) != 0 {
            anti_replay::restore_counter(&permanent.anti_replay, self.pbuf);
        }
        let strategy = self.strategy.get().ok_or(ErrorCode::FAIL)?;
        match strategy.verify(entry) {
            Verify::Success => {
                self.nbr
                    .prolong_permanent(entry, self.seconds(), self.pbuf.is_broadcast());
                self.rx_client.map(|client| client.receive());
                Ok(())
            }
            Verify::Inauthentic => {
                debug!("adaptivesec: inauthentic data frame");
                Err(ErrorCode::FAIL)
            }
            Verify::Replayed => {
                debug!("adaptivesec: replayed data frame");
                Err(ErrorCode::FAIL)
            }
        }
    }
}

impl<'a, A: AES128> TxClient for Adaptivesec<'a, A> {
    fn send_done(&self, status: TxStatus, transmissions: u8) {
        if status == TxStatus::Deferred {
            // The MAC will call again with a final status; the client keeps
            // its slot so intermediate reports reach it too.
            self.tx_client.map(|client| client.send_done(status, transmissions));
        } else if let Some(client) = self.tx_client.take() {
            client.send_done(status, transmissions);
        }
    }
}

impl<'a, A: AES128> RxClient for Adaptivesec<'a, A> {
    fn receive(&self) {
        // Frames failing anywhere along the input path are dropped quietly.
        let _ = self.input();
    }
}
