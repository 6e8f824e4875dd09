// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! The node's shared frame workspace.
//!
//! The radio stack owns exactly one outgoing and one incoming frame at a
//! time, so all layers stage their frame in a single buffer instead of
//! passing frames through call signatures. The buffer has a payload region
//! and a header region in front of it; layers allocate header space downward
//! as a frame descends the stack (`hdralloc`) and strip parsed headers as a
//! frame ascends (`hdrreduce`). A set of out-of-band attributes carries
//! per-frame metadata, such as the frame type and the security level, between
//! layers.

use crate::net::linkaddr::{LinkAddr, LINKADDR_NULL};
use core::cell::Cell;
use kernel::utilities::cells::MapCell;

/// Maximum payload length of a staged frame.
pub const PACKETBUF_SIZE: usize = 128;
/// Space reserved in front of the payload for downward header allocation.
pub const PACKETBUF_HDR_SIZE: usize = 32;

const TOTAL_SIZE: usize = PACKETBUF_HDR_SIZE + PACKETBUF_SIZE;

/// Per-frame metadata carried alongside the frame bytes.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PacketBufAttr {
    /// One of the `FrameType` discriminants.
    FrameType = 0,
    /// The MAC sequence number of the frame.
    MacSeqno,
    /// One of the `SecurityLevel` discriminants.
    SecurityLevel,
    /// Low half of the 4-byte frame counter.
    FrameCounterBytes01,
    /// High half of the 4-byte frame counter.
    FrameCounterBytes23,
    /// Nonzero when the frame counter is omitted from the frame on the wire.
    CounterSuppression,
    /// The sender's session-pool index for the receiver, as exchanged in
    /// handshake commands.
    NeighborIndex,
    /// Upper bound on over-the-air transmission attempts the MAC may make.
    MaxMacTransmissions,
    /// Payload offset at which encryption starts. Bytes of the payload below
    /// this offset are authenticated but sent in the clear.
    UnencryptedBytes,
}

const NUM_ATTRS: usize = 9;

pub struct PacketBuf {
    buf: MapCell<[u8; TOTAL_SIZE]>,
    /// Header bytes allocated downward from the payload start (outgoing).
    hdr_len: Cell<usize>,
    /// Parsed header bytes stripped off the front of the payload (incoming).
    data_offset: Cell<usize>,
    data_len: Cell<usize>,
    attrs: [Cell<u16>; NUM_ATTRS],
    sender: Cell<LinkAddr>,
    receiver: Cell<LinkAddr>,
}

impl PacketBuf {
    pub fn new() -> PacketBuf {
        PacketBuf {
            buf: MapCell::new([0; TOTAL_SIZE]),
            hdr_len: Cell::new(0),
            data_offset: Cell::new(0),
            data_len: Cell::new(0),
            attrs: core::array::from_fn(|_| Cell::new(0)),
            sender: Cell::new(LINKADDR_NULL),
            receiver: Cell::new(LINKADDR_NULL),
        }
    }

    /// Reset the workspace for a new frame. Attributes and addresses are
    /// cleared as well.
    pub fn clear(&self) {
        self.hdr_len.set(0);
        self.data_offset.set(0);
        self.data_len.set(0);
        for attr in self.attrs.iter() {
            attr.set(0);
        }
        self.sender.set(LINKADDR_NULL);
        self.receiver.set(LINKADDR_NULL);
    }

    pub fn attr(&self, attr: PacketBufAttr) -> u16 {
        self.attrs[attr as usize].get()
    }

    pub fn set_attr(&self, attr: PacketBufAttr, value: u16) {
        self.attrs[attr as usize].set(value);
    }

    pub fn sender(&self) -> LinkAddr {
        self.sender.get()
    }

    pub fn set_sender(&self, addr: LinkAddr) {
        self.sender.set(addr);
    }

    pub fn receiver(&self) -> LinkAddr {
        self.receiver.get()
    }

    pub fn set_receiver(&self, addr: LinkAddr) {
        self.receiver.set(addr);
    }

    /// Whether the staged frame is addressed to every neighbor.
    pub fn is_broadcast(&self) -> bool {
        self.receiver.get().is_null()
    }

    pub fn datalen(&self) -> usize {
        self.data_len.get()
    }

    pub fn set_datalen(&self, len: usize) {
        self.data_len.set(len.min(PACKETBUF_SIZE - self.data_offset.get()));
    }

    /// Length of the header in front of the payload, allocated or parsed.
    pub fn hdr_len(&self) -> usize {
        self.hdr_len.get() + self.data_offset.get()
    }

    /// Extend the header region downward by `size` bytes. Fails when the
    /// reserved header space is exhausted.
    pub fn hdralloc(&self, size: usize) -> bool {
        if self.hdr_len.get() + size > PACKETBUF_HDR_SIZE {
            return false;
        }
        self.hdr_len.set(self.hdr_len.get() + size);
        true
    }

    /// Strip `size` parsed header bytes off the front of the payload.
    pub fn hdrreduce(&self, size: usize) -> bool {
        if size > self.data_len.get() {
            return false;
        }
        self.data_offset.set(self.data_offset.get() + size);
        self.data_len.set(self.data_len.get() - size);
        true
    }

    /// Run `f` on the payload bytes of the staged frame.
    pub fn with_payload<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let start = PACKETBUF_HDR_SIZE + self.data_offset.get();
        let len = self.data_len.get();
        self.buf.map(|buf| f(&buf[start..start + len]))
    }

    /// Run `f` on the entire writable payload region, from the payload start
    /// to the end of the buffer. Callers account for the resulting length
    /// with `set_datalen`.
    pub fn with_payload_region_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
        let start = PACKETBUF_HDR_SIZE + self.data_offset.get();
        self.buf.map(|buf| f(&mut buf[start..]))
    }

    /// Run `f` on the writable header region allocated so far (outgoing
    /// frames only).
    pub fn with_hdr_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
        let start = PACKETBUF_HDR_SIZE - self.hdr_len.get();
        self.buf.map(|buf| f(&mut buf[start..PACKETBUF_HDR_SIZE]))
    }

    /// Run `f` on the contiguous frame bytes, header first. Works for both
    /// outgoing frames (header region plus payload) and parsed incoming
    /// frames (stripped header plus remaining payload).
    pub fn with_frame<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let start = PACKETBUF_HDR_SIZE - self.hdr_len.get();
        let end = PACKETBUF_HDR_SIZE + self.data_offset.get() + self.data_len.get();
        self.buf.map(|buf| f(&buf[start..end]))
    }

    /// Like `with_frame`, with a mutable borrow. `f` additionally receives
    /// the header length, so it can split the frame into its associated-data
    /// and encrypted regions.
    pub fn with_frame_mut<R>(&self, f: impl FnOnce(&mut [u8], usize) -> R) -> Option<R> {
        let start = PACKETBUF_HDR_SIZE - self.hdr_len.get();
        let end = PACKETBUF_HDR_SIZE + self.data_offset.get() + self.data_len.get();
        let hdr_len = self.hdr_len();
        self.buf.map(|buf| f(&mut buf[start..end], hdr_len))
    }

    /// Stage raw frame bytes received from the radio. The frame starts at
    /// the payload region; parsing then strips the header via `hdrreduce`.
    pub fn stage_incoming(&self, frame: &[u8]) -> bool {
        if frame.len() > PACKETBUF_SIZE {
            return false;
        }
        self.clear();
        self.buf.map(|buf| {
            buf[PACKETBUF_HDR_SIZE..PACKETBUF_HDR_SIZE + frame.len()].copy_from_slice(frame);
        });
        self.data_len.set(frame.len());
        true
    }

    /// The 4-byte frame counter, assembled from its two attribute halves.
    pub fn frame_counter(&self) -> u32 {
        (self.attr(PacketBufAttr::FrameCounterBytes23) as u32) << 16
            | self.attr(PacketBufAttr::FrameCounterBytes01) as u32
    }

    pub fn set_frame_counter(&self, counter: u32) {
        self.set_attr(PacketBufAttr::FrameCounterBytes01, counter as u16);
        self.set_attr(PacketBufAttr::FrameCounterBytes23, (counter >> 16) as u16);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_allocation_and_reduction() {
        let pbuf = PacketBuf::new();
        pbuf.with_payload_region_mut(|payload| payload[..4].copy_from_slice(b"abcd"));
        pbuf.set_datalen(4);
        assert!(pbuf.hdralloc(3));
        pbuf.with_hdr_mut(|hdr| hdr.copy_from_slice(b"xyz"));
        assert_eq!(pbuf.hdr_len(), 3);
        pbuf.with_frame(|frame| assert_eq!(frame, b"xyzabcd"));

        // Round-trip through an incoming staging and strip the header again.
        let mut wire = [0; 7];
        pbuf.with_frame(|frame| wire.copy_from_slice(frame));
        assert!(pbuf.stage_incoming(&wire));
        assert_eq!(pbuf.hdr_len(), 0);
        assert!(pbuf.hdrreduce(3));
        assert_eq!(pbuf.hdr_len(), 3);
        assert_eq!(pbuf.datalen(), 4);
        pbuf.with_payload(|payload| assert_eq!(payload, b"abcd"));
        pbuf.with_frame(|frame| assert_eq!(frame, b"xyzabcd"));
    }

    #[test]
    fn frame_counter_halves() {
        let pbuf = PacketBuf::new();
        pbuf.set_frame_counter(0xAABB_CCDD);
        assert_eq!(pbuf.frame_counter(), 0xAABB_CCDD);
        assert_eq!(pbuf.attr(PacketBufAttr::FrameCounterBytes01), 0xCCDD);
        assert_eq!(pbuf.attr(PacketBufAttr::FrameCounterBytes23), 0xAABB);
    }

    #[test]
    fn hdralloc_respects_reserved_space() {
        let pbuf = PacketBuf::new();
        assert!(pbuf.hdralloc(PACKETBUF_HDR_SIZE));
        assert!(!pbuf.hdralloc(1));
    }
}
