// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Interface between the link-layer security sublayer and the MAC/RDC layer
//! below it.
//!
//! Frames are not carried in the call signatures. Both directions operate on
//! the node's shared frame workspace (the packet buffer the MAC
//! implementation was constructed with), as the radio stack owns exactly one
//! outstanding frame at a time in each direction.

use crate::ErrorCode;

/// How a transmission attempt ended, as reported by the MAC layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxStatus {
    /// The frame was sent and, for unicast, acknowledged.
    Ok,
    /// The channel never became clear.
    Collision,
    /// The frame was sent but no acknowledgement arrived.
    NoAck,
    /// The MAC layer took ownership of the frame and will report a final
    /// status later. Intermediate callbacks carry this status.
    Deferred,
    /// Any other transmission error.
    Err,
}

pub trait TxClient {
    /// Called once per transmission attempt outcome. `transmissions` is the
    /// number of over-the-air attempts the MAC made.
    fn send_done(&self, status: TxStatus, transmissions: u8);
}

pub trait RxClient {
    /// Called with the received frame staged in the shared frame workspace.
    fn receive(&self);
}

pub trait Mac<'a> {
    fn set_transmit_client(&self, client: &'a dyn TxClient);
    fn set_receive_client(&self, client: &'a dyn RxClient);

    /// Queue the frame staged in the shared frame workspace for
    /// transmission. The transmit client hears about the outcome.
    fn transmit(&self) -> Result<(), ErrorCode>;
}
