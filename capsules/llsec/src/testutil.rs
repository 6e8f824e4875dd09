// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Host-side doubles for the kernel HILs, and multi-node tests that run two
//! complete security stacks against each other, exchanging real frames with
//! real CCM* protection.

use crate::adaptivesec::{Adaptivesec, SendDoneClient};
use crate::aes128::Aes128Soft;
use crate::akes::{self, Akes};
use crate::akes::nbr::SessionStatus;
use crate::akes::single::SingleScheme;
use crate::cmd_broker::Subscription;
use crate::coresec::Coresec;
use crate::net::frame;
use crate::net::linkaddr::{LinkAddr, LINKADDR_NULL};
use crate::net::packetbuf::{PacketBuf, PACKETBUF_HDR_SIZE, PACKETBUF_SIZE};
use crate::noncoresec::Noncoresec;

use kernel::hil::mac::{Mac, RxClient, TxClient, TxStatus};
use kernel::hil::reset::Reset;
use kernel::hil::rng::SeedSource;
use kernel::hil::time::{Time, Timer, TimerClient, CLOCK_SECOND};
use kernel::hil::symmetric_encryption::AES128_KEY_SIZE;
use kernel::utilities::cells::{MapCell, OptionalCell};
use kernel::ErrorCode;

use core::cell::Cell;

const ADDR_A: LinkAddr = LinkAddr::new([0xA1; 8]);
const ADDR_B: LinkAddr = LinkAddr::new([0xB2; 8]);
const SECRET: [u8; AES128_KEY_SIZE] = [0x5E; AES128_KEY_SIZE];

/// Deterministic entropy, distinct per node.
struct FixedSeed(u8);

impl SeedSource for FixedSeed {
    fn fill_seed(&self, seed: &mut [u8]) -> Result<(), ErrorCode> {
        for (i, byte) in seed.iter_mut().enumerate() {
            *byte = (i as u8).wrapping_mul(13).wrapping_add(self.0);
        }
        Ok(())
    }
}

/// A snapshot of a frame handed to the MAC for transmission.
struct SentFrame {
    bytes: [u8; PACKETBUF_HDR_SIZE + PACKETBUF_SIZE],
    len: usize,
}

impl SentFrame {
    fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

/// MAC double: snapshots the latest transmitted frame and lets the test
/// drive completion callbacks and incoming deliveries explicitly.
struct TestMac<'a> {
    pbuf: &'a PacketBuf,
    sent: MapCell<SentFrame>,
    tx_client: OptionalCell<&'a dyn TxClient>,
    rx_client: OptionalCell<&'a dyn RxClient>,
}

impl<'a> TestMac<'a> {
    fn new(pbuf: &'a PacketBuf) -> TestMac<'a> {
        TestMac {
            pbuf,
            sent: MapCell::empty(),
            tx_client: OptionalCell::empty(),
            rx_client: OptionalCell::empty(),
        }
    }

    fn take_sent(&self) -> SentFrame {
        self.sent.take().expect("no frame was transmitted")
    }

    fn complete(&self, status: TxStatus) {
        self.tx_client.map(|client| client.send_done(status, 1));
    }

    fn deliver(&self, bytes: &[u8]) {
        assert!(self.pbuf.stage_incoming(bytes));
        self.rx_client.map(|client| client.receive());
    }
}

impl<'a> Mac<'a> for TestMac<'a> {
    fn set_transmit_client(&self, client: &'a dyn TxClient) {
        self.tx_client.set(client);
    }

    fn set_receive_client(&self, client: &'a dyn RxClient) {
        self.rx_client.set(client);
    }

    fn transmit(&self) -> Result<(), ErrorCode> {
        let mut sent = SentFrame {
            bytes: [0; PACKETBUF_HDR_SIZE + PACKETBUF_SIZE],
            len: 0,
        };
        self.pbuf
            .with_frame(|frame| {
                sent.bytes[..frame.len()].copy_from_slice(frame);
                sent.len = frame.len();
            })
            .ok_or(ErrorCode::FAIL)?;
        self.sent.put(sent);
        Ok(())
    }
}

/// Timer double with a manually advanced clock.
struct TestTimer<'a> {
    now: Cell<u32>,
    armed: Cell<Option<u32>>,
    client: OptionalCell<&'a dyn TimerClient>,
}

impl<'a> TestTimer<'a> {
    fn new() -> TestTimer<'a> {
        TestTimer {
            now: Cell::new(0),
            armed: Cell::new(None),
            client: OptionalCell::empty(),
        }
    }

    fn advance_to(&self, ticks: u32) {
        self.now.set(ticks);
    }

    fn fire(&self) {
        self.armed.set(None);
        self.client.map(|client| client.fired());
    }
}

impl<'a> Time for TestTimer<'a> {
    fn now(&self) -> u32 {
        self.now.get()
    }

    fn seconds(&self) -> u32 {
        self.now.get() / CLOCK_SECOND
    }
}

impl<'a> Timer<'a> for TestTimer<'a> {
    fn set_client(&self, client: &'a dyn TimerClient) {
        self.client.set(client);
    }

    fn oneshot(&self, interval: u32) {
        self.armed.set(Some(self.now.get().wrapping_add(interval)));
    }

    fn is_enabled(&self) -> bool {
        self.armed.get().is_some()
    }

    fn cancel(&self) -> Result<(), ErrorCode> {
        self.armed.set(None);
        Ok(())
    }
}

struct TestReset;

impl Reset for TestReset {
    fn reset(&self) {}
}

/// Upper layer double, counting delivered data frames.
struct TestReceiver {
    received: Cell<usize>,
}

impl TestReceiver {
    fn new() -> TestReceiver {
        TestReceiver {
            received: Cell::new(0),
        }
    }
}

impl RxClient for TestReceiver {
    fn receive(&self) {
        self.received.set(self.received.get() + 1);
    }
}

struct TestSendClient {
    status: Cell<Option<TxStatus>>,
}

impl TestSendClient {
    fn new() -> TestSendClient {
        TestSendClient {
            status: Cell::new(None),
        }
    }
}

impl SendDoneClient for TestSendClient {
    fn send_done(&self, status: TxStatus, _transmissions: u8) {
        self.status.set(Some(status));
    }
}

/// Build one complete node on the stack of the enclosing test. The caller
/// supplies the bindings it wants to poke at; the plumbing-only components
/// stay hygienic to the macro.
macro_rules! node {
    ($pbuf:ident, $mac:ident, $timer:ident, $nbr:ident, $sec:ident, $strategy:ident,
     $akes:ident, $broker:ident, $strat:ident, $addr:expr, $seed:expr) => {
        let $pbuf = PacketBuf::new();
        let aes = Aes128Soft::new();
        let ccm = crate::ccm_star::CcmStar::new(&aes);
        let csprng = crate::csprng::Csprng::new(&aes);
        let $nbr = crate::akes::nbr::AkesNbr::new();
        let $broker = crate::cmd_broker::CmdBroker::new();
        let $mac = TestMac::new(&$pbuf);
        let $timer = TestTimer::new();
        let reset = TestReset;
        let $sec = Adaptivesec::new(
            &$pbuf, &ccm, &csprng, &$nbr, &$broker, &$mac, &$timer, &reset, $addr,
        );
        let scheme = SingleScheme::new(SECRET);
        let $strategy = $strat::new(&$sec, &$nbr, &$pbuf);
        let $akes = Akes::new(&$sec, &$nbr, &$pbuf, &aes, &$timer, &scheme);
        let subscription = Subscription::new(&$akes);
        $broker.subscribe(&subscription);
        $sec.set_strategy(&$strategy);
        $mac.set_transmit_client(&$sec);
        $mac.set_receive_client(&$sec);
        csprng.seed(&FixedSeed($seed)).unwrap();
        $sec.init().unwrap();
    };
}

/// A raw HELLO frame from `sender`, byte for byte as the framer lays it
/// out: fcf (command + security enabled), seqno, broadcast receiver,
/// sender, security control (MIC-64, counter suppressed), then the command
/// id, the challenge, and a MIC. HELLOs from unknown senders are accepted
/// unverified, so the MIC bytes are arbitrary.
fn hello_frame(sender: u8) -> [u8; 36] {
    let mut frame = [0; 36];
    frame[0] = frame::FrameType::Cmd as u8 | 0x08;
    frame[10..18].copy_from_slice(&[sender; 8]);
    frame[18] = frame::SecurityLevel::Mic64 as u8 | 0x20;
    frame[19] = akes::CMD_HELLO;
    frame[20..28].copy_from_slice(&[sender ^ 0x5A; 8]);
    frame
}

/// The command id of a captured frame, read by re-parsing it.
fn cmd_id_of(frame: &SentFrame) -> u8 {
    let scratch = PacketBuf::new();
    assert!(scratch.stage_incoming(frame.as_bytes()));
    frame::parse(&scratch).unwrap();
    scratch.with_payload(|p| p[0]).unwrap()
}

/// Run the three-way handshake between two freshly started nodes, leaving
/// both with an established session. Returns nothing; the nodes' state
/// carries the result.
macro_rules! run_handshake {
    ($a_mac:ident, $b_mac:ident, $b_timer:ident) => {
        let hello = $a_mac.take_sent();
        $a_mac.complete(TxStatus::Ok);
        $b_mac.take_sent(); // the responder's own initial HELLO
        $b_mac.deliver(hello.as_bytes());

        // The responder answers after its randomized delay.
        $b_timer.advance_to(13 * CLOCK_SECOND);
        $b_timer.fire();
        let helloack = $b_mac.take_sent();
        $a_mac.deliver(helloack.as_bytes());

        let ack = $a_mac.take_sent();
        $a_mac.complete(TxStatus::Ok);
        $b_mac.deliver(ack.as_bytes());
    };
}

#[test]
fn handshake_establishes_matching_pairwise_keys() {
    node!(a_pbuf, a_mac, a_timer, a_nbr, a_sec, a_strategy, a_akes, a_broker,
        Noncoresec, ADDR_A, 1);
    node!(b_pbuf, b_mac, b_timer, b_nbr, b_sec, b_strategy, b_akes, b_broker,
        Noncoresec, ADDR_B, 2);
    a_akes.start().unwrap();
    b_akes.start().unwrap();
    run_handshake!(a_mac, b_mac, b_timer);

    assert_eq!(a_nbr.count(SessionStatus::Permanent), 1);
    assert_eq!(b_nbr.count(SessionStatus::Permanent), 1);
    // The ACK's completion dropped the initiator's twin tentative; the
    // responder's was promoted in place.
    assert_eq!(a_nbr.count(SessionStatus::Tentative), 0);
    assert_eq!(b_nbr.count(SessionStatus::Tentative), 0);

    let a_entry = a_nbr.entry_of(&ADDR_B).unwrap();
    let b_entry = b_nbr.entry_of(&ADDR_A).unwrap();
    let a_key = a_nbr.get_permanent(a_entry).unwrap().pairwise_key;
    let b_key = b_nbr.get_permanent(b_entry).unwrap().pairwise_key;
    assert_eq!(a_key, b_key);
    assert_ne!(a_key, [0; AES128_KEY_SIZE]);
}

#[test]
fn replayed_helloack_does_not_tear_down_the_session() {
    node!(a_pbuf, a_mac, a_timer, a_nbr, a_sec, a_strategy, a_akes, a_broker,
        Noncoresec, ADDR_A, 1);
    node!(b_pbuf, b_mac, b_timer, b_nbr, b_sec, b_strategy, b_akes, b_broker,
        Noncoresec, ADDR_B, 2);
    a_akes.start().unwrap();
    b_akes.start().unwrap();

    let hello = a_mac.take_sent();
    a_mac.complete(TxStatus::Ok);
    b_mac.take_sent();
    b_mac.deliver(hello.as_bytes());
    b_timer.advance_to(13 * CLOCK_SECOND);
    b_timer.fire();
    let helloack = b_mac.take_sent();
    a_mac.deliver(helloack.as_bytes());
    let ack = a_mac.take_sent();
    a_mac.complete(TxStatus::Ok);
    b_mac.deliver(ack.as_bytes());

    let a_entry = a_nbr.entry_of(&ADDR_B).unwrap();
    let key_before = a_nbr.get_permanent(a_entry).unwrap().pairwise_key;

    // The round is still open and the HELLOACK is cryptographically valid,
    // but its challenge fingerprint gives the replay away.
    a_mac.deliver(helloack.as_bytes());
    assert_eq!(a_nbr.count(SessionStatus::Permanent), 1);
    let a_entry = a_nbr.entry_of(&ADDR_B).unwrap();
    assert_eq!(a_nbr.get_permanent(a_entry).unwrap().pairwise_key, key_before);
}

#[test]
fn stray_ack_after_promotion_is_refused() {
    node!(a_pbuf, a_mac, a_timer, a_nbr, a_sec, a_strategy, a_akes, a_broker,
        Noncoresec, ADDR_A, 1);
    node!(b_pbuf, b_mac, b_timer, b_nbr, b_sec, b_strategy, b_akes, b_broker,
        Noncoresec, ADDR_B, 2);
    a_akes.start().unwrap();
    b_akes.start().unwrap();

    let hello = a_mac.take_sent();
    a_mac.complete(TxStatus::Ok);
    b_mac.take_sent();
    b_mac.deliver(hello.as_bytes());
    b_timer.advance_to(13 * CLOCK_SECOND);
    b_timer.fire();
    let helloack = b_mac.take_sent();
    a_mac.deliver(helloack.as_bytes());
    let ack = a_mac.take_sent();
    a_mac.complete(TxStatus::Ok);
    b_mac.deliver(ack.as_bytes());

    let b_entry = b_nbr.entry_of(&ADDR_A).unwrap();
    let info_before = b_nbr.get_permanent(b_entry).unwrap().anti_replay;

    // No tentative session remains to accept an ACK against.
    b_mac.deliver(ack.as_bytes());
    assert_eq!(b_nbr.count(SessionStatus::Permanent), 1);
    assert_eq!(b_nbr.count(SessionStatus::Tentative), 0);
    let b_entry = b_nbr.entry_of(&ADDR_A).unwrap();
    assert_eq!(b_nbr.get_permanent(b_entry).unwrap().anti_replay, info_before);
}

#[test]
fn ack_before_the_helloack_goes_out_is_refused() {
    node!(a_pbuf, a_mac, a_timer, a_nbr, a_sec, a_strategy, a_akes, a_broker,
        Noncoresec, ADDR_A, 1);
    node!(b_pbuf, b_mac, b_timer, b_nbr, b_sec, b_strategy, b_akes, b_broker,
        Noncoresec, ADDR_B, 2);
    // A third node on b's address that will hear the exchange out of order.
    node!(c_pbuf, c_mac, c_timer, c_nbr, c_sec, c_strategy, c_akes, c_broker,
        Noncoresec, ADDR_B, 3);
    a_akes.start().unwrap();
    b_akes.start().unwrap();
    c_akes.start().unwrap();

    let hello = a_mac.take_sent();
    a_mac.complete(TxStatus::Ok);
    b_mac.take_sent();
    c_mac.take_sent();
    b_mac.deliver(hello.as_bytes());
    b_timer.advance_to(13 * CLOCK_SECOND);
    b_timer.fire();
    let helloack = b_mac.take_sent();
    a_mac.deliver(helloack.as_bytes());
    let ack = a_mac.take_sent();
    a_mac.complete(TxStatus::Ok);

    // c has the HELLO but is still waiting out its HELLOACK delay when the
    // ACK arrives, so the ACK cannot belong to a HELLOACK of c's.
    c_mac.deliver(hello.as_bytes());
    assert_eq!(c_nbr.count(SessionStatus::Tentative), 1);
    c_mac.deliver(ack.as_bytes());
    assert_eq!(c_nbr.count(SessionStatus::Permanent), 0);
    assert_eq!(c_nbr.count(SessionStatus::Tentative), 1);
}

#[test]
fn hello_flood_is_rate_limited_without_allocating_state() {
    node!(b_pbuf, b_mac, b_timer, b_nbr, b_sec, b_strategy, b_akes, b_broker,
        Noncoresec, ADDR_B, 2);
    b_akes.start().unwrap();
    b_mac.take_sent();

    // Twenty distinct senders fill the HELLOACK bucket. Tentative slots cap
    // at five at a time, so flood in batches and let each batch expire
    // before the next; the bucket itself only drains a drop per 150 s.
    let mut sender = 1u8;
    for batch in 0..4u32 {
        b_timer.advance_to(batch * 25 * CLOCK_SECOND);
        for _ in 0..5 {
            b_mac.deliver(&hello_frame(sender));
            sender += 1;
        }
        assert_eq!(b_nbr.count(SessionStatus::Tentative), 5);
    }

    // The twenty-first sender finds the bucket full and gets no session.
    b_timer.advance_to(76 * CLOCK_SECOND);
    b_mac.deliver(&hello_frame(sender));
    assert!(b_nbr.entry_of(&LinkAddr::new([sender; 8])).is_none());
    assert_eq!(b_nbr.count(SessionStatus::Tentative), 5);
}

#[test]
fn unicast_data_is_delivered_once_and_replays_are_dropped() {
    node!(a_pbuf, a_mac, a_timer, a_nbr, a_sec, a_strategy, a_akes, a_broker,
        Noncoresec, ADDR_A, 1);
    node!(b_pbuf, b_mac, b_timer, b_nbr, b_sec, b_strategy, b_akes, b_broker,
        Noncoresec, ADDR_B, 2);
    a_akes.start().unwrap();
    b_akes.start().unwrap();
    run_handshake!(a_mac, b_mac, b_timer);

    let receiver = TestReceiver::new();
    b_sec.set_rx_client(&receiver);

    a_pbuf.clear();
    a_pbuf.set_receiver(ADDR_B);
    a_pbuf
        .with_payload_region_mut(|p| p[..5].copy_from_slice(b"knock"))
        .unwrap();
    a_pbuf.set_datalen(5);
    let client = TestSendClient::new();
    a_sec.send(&client).unwrap();

    let data = a_mac.take_sent();
    a_mac.complete(TxStatus::Ok);
    assert_eq!(client.status.get(), Some(TxStatus::Ok));

    b_mac.deliver(data.as_bytes());
    assert_eq!(receiver.received.get(), 1);
    // Decrypted in place before delivery.
    b_pbuf.with_payload(|p| assert_eq!(p, b"knock")).unwrap();

    b_mac.deliver(data.as_bytes());
    assert_eq!(receiver.received.get(), 1);
}

#[test]
fn quiet_session_is_probed_and_an_updateack_refreshes_it() {
    node!(a_pbuf, a_mac, a_timer, a_nbr, a_sec, a_strategy, a_akes, a_broker,
        Noncoresec, ADDR_A, 1);
    node!(b_pbuf, b_mac, b_timer, b_nbr, b_sec, b_strategy, b_akes, b_broker,
        Noncoresec, ADDR_B, 2);
    a_akes.start().unwrap();
    b_akes.start().unwrap();
    run_handshake!(a_mac, b_mac, b_timer);

    // Let the session sit past its lifetime; the sweep probes the quiet
    // neighbor instead of deleting it outright.
    a_timer.advance_to(301 * CLOCK_SECOND);
    a_timer.fire();
    let update = a_mac.take_sent();
    assert_eq!(cmd_id_of(&update), akes::CMD_UPDATE);
    a_mac.complete(TxStatus::Ok);

    b_mac.deliver(update.as_bytes());
    let updateack = b_mac.take_sent();
    assert_eq!(cmd_id_of(&updateack), akes::CMD_UPDATEACK);
    a_mac.deliver(updateack.as_bytes());

    let a_entry = a_nbr.entry_of(&ADDR_B).unwrap();
    assert_eq!(a_nbr.get_permanent(a_entry).unwrap().expiration_s, 301 + 300);
}

#[test]
fn unacknowledged_probe_deletes_the_neighbor() {
    node!(a_pbuf, a_mac, a_timer, a_nbr, a_sec, a_strategy, a_akes, a_broker,
        Noncoresec, ADDR_A, 1);
    node!(b_pbuf, b_mac, b_timer, b_nbr, b_sec, b_strategy, b_akes, b_broker,
        Noncoresec, ADDR_B, 2);
    a_akes.start().unwrap();
    b_akes.start().unwrap();
    run_handshake!(a_mac, b_mac, b_timer);

    a_timer.advance_to(301 * CLOCK_SECOND);
    a_timer.fire();
    let update = a_mac.take_sent();
    assert_eq!(cmd_id_of(&update), akes::CMD_UPDATE);
    a_mac.complete(TxStatus::NoAck);

    assert_eq!(a_nbr.count(SessionStatus::Permanent), 0);
    assert_eq!(a_nbr.entry_of(&ADDR_B), None);
}

#[test]
fn trickle_rebroadcasts_hello_after_a_quiet_interval() {
    node!(a_pbuf, a_mac, a_timer, a_nbr, a_sec, a_strategy, a_akes, a_broker,
        Noncoresec, ADDR_A, 1);
    a_akes.start().unwrap();
    let first = a_mac.take_sent();
    assert_eq!(cmd_id_of(&first), akes::CMD_HELLO);
    a_mac.complete(TxStatus::Ok);

    // The HELLO round closes without a single HELLOACK.
    a_timer.advance_to(16 * CLOCK_SECOND);
    a_timer.fire();
    assert!(a_mac.sent.is_none());

    // By the end of the first Trickle interval the transmission point has
    // passed and the neighborhood was silent: another HELLO goes out.
    a_timer.advance_to(60 * CLOCK_SECOND);
    a_timer.fire();
    let second = a_mac.take_sent();
    assert_eq!(cmd_id_of(&second), akes::CMD_HELLO);
}

#[test]
fn coresec_broadcast_needs_a_fresh_announce() {
    node!(a_pbuf, a_mac, a_timer, a_nbr, a_sec, a_strategy, a_akes, a_broker,
        Coresec, ADDR_A, 1);
    node!(b_pbuf, b_mac, b_timer, b_nbr, b_sec, b_strategy, b_akes, b_broker,
        Coresec, ADDR_B, 2);
    a_strategy.start();
    b_strategy.start();
    let a_announce_sub = Subscription::new(&a_strategy);
    a_broker.subscribe(&a_announce_sub);
    let b_announce_sub = Subscription::new(&b_strategy);
    b_broker.subscribe(&b_announce_sub);

    a_akes.start().unwrap();
    b_akes.start().unwrap();
    run_handshake!(a_mac, b_mac, b_timer);
    assert_eq!(a_nbr.count(SessionStatus::Permanent), 1);
    assert_eq!(b_nbr.count(SessionStatus::Permanent), 1);

    let receiver = TestReceiver::new();
    b_sec.set_rx_client(&receiver);

    a_pbuf.clear();
    a_pbuf.set_receiver(LINKADDR_NULL);
    a_pbuf
        .with_payload_region_mut(|p| p[..4].copy_from_slice(b"news"))
        .unwrap();
    a_pbuf.set_datalen(4);
    let client = TestSendClient::new();
    a_sec.send(&client).unwrap();

    // The MAC first sees the ANNOUNCE; the broadcast itself follows once
    // the ANNOUNCE completes.
    let announce = a_mac.take_sent();
    assert_eq!(cmd_id_of(&announce), akes::CMD_ANNOUNCE);
    b_mac.deliver(announce.as_bytes());
    a_mac.complete(TxStatus::Ok);
    let broadcast = a_mac.take_sent();
    b_mac.deliver(broadcast.as_bytes());
    assert_eq!(receiver.received.get(), 1);
    b_pbuf.with_payload(|p| assert_eq!(p, b"news")).unwrap();

    // Replays of either half change nothing: the ANNOUNCE is deduplicated
    // and the broadcast's counter is stale.
    b_mac.deliver(announce.as_bytes());
    b_mac.deliver(broadcast.as_bytes());
    assert_eq!(receiver.received.get(), 1);
}

#[test]
fn coresec_unicast_uses_the_pairwise_key() {
    node!(a_pbuf, a_mac, a_timer, a_nbr, a_sec, a_strategy, a_akes, a_broker,
        Coresec, ADDR_A, 1);
    node!(b_pbuf, b_mac, b_timer, b_nbr, b_sec, b_strategy, b_akes, b_broker,
        Coresec, ADDR_B, 2);
    a_strategy.start();
    b_strategy.start();
    a_akes.start().unwrap();
    b_akes.start().unwrap();
    run_handshake!(a_mac, b_mac, b_timer);

    let receiver = TestReceiver::new();
    b_sec.set_rx_client(&receiver);

    a_pbuf.clear();
    a_pbuf.set_receiver(ADDR_B);
    a_pbuf
        .with_payload_region_mut(|p| p[..3].copy_from_slice(b"hey"))
        .unwrap();
    a_pbuf.set_datalen(3);
    let client = TestSendClient::new();
    a_sec.send(&client).unwrap();

    let data = a_mac.take_sent();
    b_mac.deliver(data.as_bytes());
    assert_eq!(receiver.received.get(), 1);
    b_pbuf.with_payload(|p| assert_eq!(p, b"hey")).unwrap();
}
