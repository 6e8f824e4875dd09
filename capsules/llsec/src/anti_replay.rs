// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Anti-replay frame-counter tracking.
//!
//! The node-wide half assigns monotonically increasing counters to outgoing
//! frames, with separate counters for unicast and broadcast. The per-session
//! half keeps the peer's counter high-water marks: an incoming counter is
//! accepted only if strictly greater than every previously accepted counter
//! for that direction, which rejects replays and duplicates.
//!
//! Counter suppression omits the 4 counter bytes from every frame.
//! Receivers then reconstruct the counter from the high-water mark, and
//! handshake commands carry both of the sender's counters in their payload
//! so new sessions start synchronized. A desynchronization here (a missed
//! broadcast, say) makes subsequent frames verify as inauthentic until the
//! session is refreshed, which is why the handshake's UPDATE path exists.

use crate::net::packetbuf::{PacketBuf, PacketBufAttr};
use core::cell::Cell;
use kernel::ErrorCode;

/// Per-session counter high-water marks for frames from the peer.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct AntiReplayInfo {
    pub his_unicast_counter: u32,
    pub his_broadcast_counter: u32,
}

/// The node's own outgoing frame counters.
pub struct NodeCounters {
    unicast: Cell<u32>,
    broadcast: Cell<u32>,
}

impl NodeCounters {
    pub fn new() -> NodeCounters {
        NodeCounters {
            unicast: Cell::new(0),
            broadcast: Cell::new(0),
        }
    }

    pub fn my_unicast_counter(&self) -> u32 {
        self.unicast.get()
    }

    pub fn my_broadcast_counter(&self) -> u32 {
        self.broadcast.get()
    }

    /// Assign the next outgoing counter to the staged frame, by direction.
    ///
    /// An exhausted counter space is fatal: reusing a counter value would
    /// break the anti-replay guarantee irrecoverably, so the caller must
    /// request a device restart rather than continue.
    pub fn set_counter(&self, pbuf: &PacketBuf) -> Result<(), ErrorCode> {
        let counter = if pbuf.is_broadcast() {
            &self.broadcast
        } else {
            &self.unicast
        };
        let next = counter.get().checked_add(1).ok_or(ErrorCode::FAIL)?;
        counter.set(next);
        pbuf.set_frame_counter(next);
        Ok(())
    }
}

/// Mark the staged outgoing frame so the framer omits its counter field.
pub fn suppress_counter(pbuf: &PacketBuf) {
    pbuf.set_attr(PacketBufAttr::CounterSuppression, 1);
}

/// Reconstruct the suppressed counter of an incoming frame as the stored
/// high-water mark plus one, by direction.
pub fn restore_counter(info: &AntiReplayInfo, pbuf: &PacketBuf) {
    let last = if pbuf.is_broadcast() {
        info.his_broadcast_counter
    } else {
        info.his_unicast_counter
    };
    pbuf.set_frame_counter(last.wrapping_add(1));
}

/// Check the incoming frame's counter against the session's high-water mark
/// and absorb it when fresh. Returns whether the frame is a replay.
pub fn was_replayed(info: &mut AntiReplayInfo, pbuf: &PacketBuf) -> bool {
    let counter = pbuf.frame_counter();
    let last = if pbuf.is_broadcast() {
        &mut info.his_broadcast_counter
    } else {
        &mut info.his_unicast_counter
    };
    if counter <= *last {
        return true;
    }
    *last = counter;
    false
}

/// Initialize a fresh session's high-water marks from the frame that created
/// it. Both directions start at the creating frame's counter; the broadcast
/// mark is overwritten from the command payload when counter suppression is
/// enabled.
pub fn init_info(info: &mut AntiReplayInfo, pbuf: &PacketBuf) {
    info.his_unicast_counter = pbuf.frame_counter();
    info.his_broadcast_counter = 0;
}

/// Read a 4-byte big-endian counter from a command payload into the staged
/// frame's counter attributes.
pub fn parse_counter(bytes: &[u8], pbuf: &PacketBuf) -> Result<(), ErrorCode> {
    let bytes: &[u8; 4] = bytes.get(..4).and_then(|b| b.try_into().ok()).ok_or(ErrorCode::SIZE)?;
    pbuf.set_frame_counter(u32::from_be_bytes(*bytes));
    Ok(())
}

/// Write a 4-byte big-endian counter into a command payload.
pub fn write_counter(bytes: &mut [u8], counter: u32) {
    bytes[..4].copy_from_slice(&counter.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::linkaddr::LinkAddr;

    fn unicast_frame(pbuf: &PacketBuf, counter: u32) {
        pbuf.set_receiver(LinkAddr::new([2; 8]));
        pbuf.set_frame_counter(counter);
    }

    #[test]
    fn strictly_greater_counters_are_accepted_once() {
        let pbuf = PacketBuf::new();
        let mut info = AntiReplayInfo::default();

        for (counter, replayed) in [(1, false), (1, true), (5, false), (4, true), (5, true), (6, false)] {
            unicast_frame(&pbuf, counter);
            assert_eq!(was_replayed(&mut info, &pbuf), replayed, "counter {}", counter);
        }
        assert_eq!(info.his_unicast_counter, 6);
    }

    #[test]
    fn directions_are_tracked_independently() {
        let pbuf = PacketBuf::new();
        let mut info = AntiReplayInfo::default();

        unicast_frame(&pbuf, 9);
        assert!(!was_replayed(&mut info, &pbuf));

        // The same counter value on the broadcast path is not a replay.
        pbuf.set_receiver(crate::net::linkaddr::LINKADDR_NULL);
        pbuf.set_frame_counter(9);
        assert!(!was_replayed(&mut info, &pbuf));
        assert!(was_replayed(&mut info, &pbuf));
    }

    #[test]
    fn node_counters_assign_monotonically_by_direction() {
        let pbuf = PacketBuf::new();
        let counters = NodeCounters::new();

        unicast_frame(&pbuf, 0);
        counters.set_counter(&pbuf).unwrap();
        assert_eq!(pbuf.frame_counter(), 1);
        counters.set_counter(&pbuf).unwrap();
        assert_eq!(pbuf.frame_counter(), 2);

        pbuf.set_receiver(crate::net::linkaddr::LINKADDR_NULL);
        counters.set_counter(&pbuf).unwrap();
        assert_eq!(pbuf.frame_counter(), 1);
        assert_eq!(counters.my_unicast_counter(), 2);
        assert_eq!(counters.my_broadcast_counter(), 1);
    }

    #[test]
    fn counter_overflow_is_fatal() {
        let pbuf = PacketBuf::new();
        let counters = NodeCounters::new();
        counters.unicast.set(u32::MAX);
        unicast_frame(&pbuf, 0);
        assert_eq!(counters.set_counter(&pbuf), Err(ErrorCode::FAIL));
    }

    #[test]
    fn restore_reconstructs_highwater_plus_one() {
        let pbuf = PacketBuf::new();
        let mut info = AntiReplayInfo::default();
        unicast_frame(&pbuf, 41);
        assert!(!was_replayed(&mut info, &pbuf));

        // A suppressed frame arrives with no counter on the wire.
        unicast_frame(&pbuf, 0);
        restore_counter(&info, &pbuf);
        assert_eq!(pbuf.frame_counter(), 42);
        assert!(!was_replayed(&mut info, &pbuf));

        // Each accepted frame advances the mark, so the next suppressed
        // frame reconstructs to 43.
        restore_counter(&info, &pbuf);
        assert_eq!(pbuf.frame_counter(), 43);
        assert!(!was_replayed(&mut info, &pbuf));
    }

    #[test]
    fn payload_counter_wire_format() {
        let pbuf = PacketBuf::new();
        let mut bytes = [0; 4];
        write_counter(&mut bytes, 0x0102_0304);
        assert_eq!(bytes, [1, 2, 3, 4]);
        parse_counter(&bytes, &pbuf).unwrap();
        assert_eq!(pbuf.frame_counter(), 0x0102_0304);
        assert!(parse_counter(&bytes[..3], &pbuf).is_err());
    }
}
