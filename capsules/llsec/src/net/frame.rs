// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! A lite 802.15.4-flavored framer.
//!
//! Only the security-relevant header fields follow the standard closely; the
//! rest of the layout is representative. A frame is:
//!
//! ```text
//! frame control (1) | seqno (1) | receiver (8) | sender (8)
//!   | [security control (1) | [frame counter (4)]] | payload | [MIC]
//! ```
//!
//! The frame control octet carries the frame type in bits 0-2 and the
//! security-enabled flag in bit 3. The security control octet carries the
//! security level in bits 0-2 and the counter-suppression flag in bit 5;
//! the 4-byte frame counter is present only when not suppressed.

use crate::net::packetbuf::{PacketBuf, PacketBufAttr};
use crate::net::stream::{decode_bytes, decode_u32, decode_u8, encode_bytes, encode_u32, encode_u8};
use crate::net::stream::SResult;
use enum_primitive::cast::FromPrimitive;
use enum_primitive::enum_from_primitive;
use kernel::ErrorCode;

enum_from_primitive! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub enum FrameType {
        Beacon = 0,
        Data = 1,
        Ack = 2,
        Cmd = 3,
    }
}

enum_from_primitive! {
    /// 802.15.4 security levels. Bit 2 selects encryption; bits 0-1 select
    /// the MIC length.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub enum SecurityLevel {
        None = 0,
        Mic32 = 1,
        Mic64 = 2,
        Mic128 = 3,
        Enc = 4,
        EncMic32 = 5,
        EncMic64 = 6,
        EncMic128 = 7,
    }
}

impl SecurityLevel {
    pub fn mic_len(self) -> usize {
        match self {
            SecurityLevel::None | SecurityLevel::Enc => 0,
            SecurityLevel::Mic32 | SecurityLevel::EncMic32 => 4,
            SecurityLevel::Mic64 | SecurityLevel::EncMic64 => 8,
            SecurityLevel::Mic128 | SecurityLevel::EncMic128 => 16,
        }
    }

    pub fn uses_encryption(self) -> bool {
        (self as u8) & 0x04 != 0
    }

    /// The level stored in a packet-buffer attribute; out-of-range values
    /// read as `None`.
    pub fn from_attr(value: u16) -> SecurityLevel {
        SecurityLevel::from_u16(value).unwrap_or(SecurityLevel::None)
    }
}

const FCF_TYPE_MASK: u8 = 0x07;
const FCF_SECURITY_ENABLED: u8 = 0x08;
const SEC_CTRL_LEVEL_MASK: u8 = 0x07;
const SEC_CTRL_COUNTER_SUPPRESSED: u8 = 0x20;

fn hdr_len_for(sec_lvl: SecurityLevel, suppressed: bool) -> usize {
    let mut len = 1 + 1 + 8 + 8;
    if sec_lvl != SecurityLevel::None {
        len += 1;
        if !suppressed {
            len += 4;
        }
    }
    len
}

fn encode_hdr(buf: &mut [u8], pbuf: &PacketBuf) -> SResult {
    let frame_type = pbuf.attr(PacketBufAttr::FrameType) as u8 & FCF_TYPE_MASK;
    let sec_lvl = sec_lvl_of(pbuf);
    let suppressed = pbuf.attr(PacketBufAttr::CounterSuppression) != 0;

    let mut fcf = frame_type;
    if sec_lvl != SecurityLevel::None {
        fcf |= FCF_SECURITY_ENABLED;
    }
    let off = enc_consume!(buf; encode_u8, fcf);
    let off = enc_consume!(buf, off; encode_u8, pbuf.attr(PacketBufAttr::MacSeqno) as u8);
    let off = enc_consume!(buf, off; encode_bytes, pbuf.receiver().as_bytes());
    let mut off = enc_consume!(buf, off; encode_bytes, pbuf.sender().as_bytes());
    if sec_lvl != SecurityLevel::None {
        let mut sec_ctrl = sec_lvl as u8;
        if suppressed {
            sec_ctrl |= SEC_CTRL_COUNTER_SUPPRESSED;
        }
        off = enc_consume!(buf, off; encode_u8, sec_ctrl);
        if !suppressed {
            off = enc_consume!(buf, off; encode_u32, pbuf.frame_counter());
        }
    }
    stream_done!(off);
}

/// Security level of the staged outgoing frame, from its attribute.
fn sec_lvl_of(pbuf: &PacketBuf) -> SecurityLevel {
    SecurityLevel::from_attr(pbuf.attr(PacketBufAttr::SecurityLevel))
}

/// Write the header of the staged outgoing frame into the packet buffer's
/// header region.
pub fn create(pbuf: &PacketBuf) -> Result<(), ErrorCode> {
    let sec_lvl = sec_lvl_of(pbuf);
    let suppressed = pbuf.attr(PacketBufAttr::CounterSuppression) != 0;
    if !pbuf.hdralloc(hdr_len_for(sec_lvl, suppressed)) {
        return Err(ErrorCode::SIZE);
    }
    pbuf.with_hdr_mut(|hdr| encode_hdr(hdr, pbuf).is_done())
        .filter(|done| *done)
        .map(|_| ())
        .ok_or(ErrorCode::SIZE)
}

fn decode_hdr(buf: &[u8], pbuf: &PacketBuf) -> SResult<usize> {
    let (off, fcf) = dec_try!(buf; decode_u8);
    let frame_type = match FrameType::from_u8(fcf & FCF_TYPE_MASK) {
        Some(frame_type) => frame_type,
        None => stream_err!(()),
    };
    let (off, seqno) = dec_try!(buf, off; decode_u8);

    let mut receiver = [0; 8];
    let off = dec_consume!(buf, off; decode_bytes, &mut receiver);
    let mut sender = [0; 8];
    let mut off = dec_consume!(buf, off; decode_bytes, &mut sender);

    let mut sec_lvl = SecurityLevel::None;
    let mut suppressed = false;
    let mut counter = 0;
    if fcf & FCF_SECURITY_ENABLED != 0 {
        let (next, sec_ctrl) = dec_try!(buf, off; decode_u8);
        off = next;
        sec_lvl = match SecurityLevel::from_u8(sec_ctrl & SEC_CTRL_LEVEL_MASK) {
            Some(sec_lvl) => sec_lvl,
            None => stream_err!(()),
        };
        suppressed = sec_ctrl & SEC_CTRL_COUNTER_SUPPRESSED != 0;
        if !suppressed {
            let (next, c) = dec_try!(buf, off; decode_u32);
            off = next;
            counter = c;
        }
    }

    pbuf.set_attr(PacketBufAttr::FrameType, frame_type as u16);
    pbuf.set_attr(PacketBufAttr::MacSeqno, seqno as u16);
    pbuf.set_attr(PacketBufAttr::SecurityLevel, sec_lvl as u16);
    pbuf.set_attr(PacketBufAttr::CounterSuppression, suppressed as u16);
    pbuf.set_frame_counter(counter);
    pbuf.set_receiver(crate::net::linkaddr::LinkAddr::new(receiver));
    pbuf.set_sender(crate::net::linkaddr::LinkAddr::new(sender));
    stream_done!(off, off);
}

/// Parse the staged incoming frame: fill in the addresses and security
/// attributes and strip the header off the payload.
pub fn parse(pbuf: &PacketBuf) -> Result<(), ErrorCode> {
    let parsed = pbuf
        .with_payload(|payload| decode_hdr(payload, pbuf).done().map(|(off, _)| off))
        .flatten()
        .ok_or(ErrorCode::INVAL)?;
    if !pbuf.hdrreduce(parsed) {
        return Err(ErrorCode::INVAL);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::linkaddr::LinkAddr;

    fn staged_data_frame(pbuf: &PacketBuf, suppressed: bool) {
        pbuf.clear();
        pbuf.set_attr(PacketBufAttr::FrameType, FrameType::Data as u16);
        pbuf.set_attr(PacketBufAttr::MacSeqno, 7);
        pbuf.set_attr(PacketBufAttr::SecurityLevel, SecurityLevel::EncMic64 as u16);
        pbuf.set_attr(PacketBufAttr::CounterSuppression, suppressed as u16);
        pbuf.set_frame_counter(0x0102_0304);
        pbuf.set_sender(LinkAddr::new([1; 8]));
        pbuf.set_receiver(LinkAddr::new([2; 8]));
        pbuf.with_payload_region_mut(|p| p[..3].copy_from_slice(b"hey"));
        pbuf.set_datalen(3);
    }

    #[test]
    fn create_parse_round_trip() {
        let pbuf = PacketBuf::new();
        staged_data_frame(&pbuf, false);
        create(&pbuf).unwrap();
        assert_eq!(pbuf.hdr_len(), 1 + 1 + 8 + 8 + 1 + 4);

        let mut wire = [0; 64];
        let len = pbuf.with_frame(|f| {
            wire[..f.len()].copy_from_slice(f);
            f.len()
        });
        let len = len.unwrap();

        let rx = PacketBuf::new();
        assert!(rx.stage_incoming(&wire[..len]));
        parse(&rx).unwrap();
        assert_eq!(rx.attr(PacketBufAttr::FrameType), FrameType::Data as u16);
        assert_eq!(rx.attr(PacketBufAttr::SecurityLevel), SecurityLevel::EncMic64 as u16);
        assert_eq!(rx.attr(PacketBufAttr::MacSeqno), 7);
        assert_eq!(rx.frame_counter(), 0x0102_0304);
        assert_eq!(rx.sender(), LinkAddr::new([1; 8]));
        assert_eq!(rx.receiver(), LinkAddr::new([2; 8]));
        rx.with_payload(|p| assert_eq!(p, b"hey"));
    }

    #[test]
    fn suppressed_counter_is_not_on_the_wire() {
        let pbuf = PacketBuf::new();
        staged_data_frame(&pbuf, true);
        create(&pbuf).unwrap();
        assert_eq!(pbuf.hdr_len(), 1 + 1 + 8 + 8 + 1);

        let mut wire = [0; 64];
        let len = pbuf
            .with_frame(|f| {
                wire[..f.len()].copy_from_slice(f);
                f.len()
            })
            .unwrap();

        let rx = PacketBuf::new();
        assert!(rx.stage_incoming(&wire[..len]));
        parse(&rx).unwrap();
        assert_eq!(rx.attr(PacketBufAttr::CounterSuppression), 1);
        // The receiver must reconstruct the counter; the wire carries none.
        assert_eq!(rx.frame_counter(), 0);
    }

    #[test]
    fn truncated_header_is_rejected() {
        let rx = PacketBuf::new();
        assert!(rx.stage_incoming(&[0x09, 1, 2]));
        assert!(parse(&rx).is_err());
    }
}
