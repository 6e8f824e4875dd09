// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Publish/subscribe dispatch of incoming MAC command frames.
//!
//! Several independent features consume command frames (the key
//! establishment handshake, the pairwise strategy's ANNOUNCE extension)
//! without knowing about each other. Each registers a subscription; an
//! incoming command is offered to every subscriber in turn until one
//! consumes it or reports an error.

use crate::net::packetbuf::PacketBuf;
use kernel::collections::list::{List, ListLink, ListNode};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CmdBrokerResult {
    /// A subscriber recognized and handled the command.
    Consumed,
    /// No subscriber recognized the command identifier.
    Unconsumed,
    /// A subscriber recognized the command but rejected it.
    Error,
}

/// A consumer of command frames. The frame is staged in the shared packet
/// buffer; `cmd_id` is its leading payload byte.
pub trait CmdHandler {
    fn on_command(&self, cmd_id: u8) -> CmdBrokerResult;
}

pub struct Subscription<'a> {
    handler: &'a dyn CmdHandler,
    next: ListLink<'a, Subscription<'a>>,
}

impl<'a> Subscription<'a> {
    pub fn new(handler: &'a dyn CmdHandler) -> Subscription<'a> {
        Subscription {
            handler,
            next: ListLink::empty(),
        }
    }
}

impl<'a> ListNode<'a, Subscription<'a>> for Subscription<'a> {
    fn next(&'a self) -> &'a ListLink<'a, Subscription<'a>> {
        &self.next
    }
}

pub struct CmdBroker<'a> {
    subscriptions: List<'a, Subscription<'a>>,
}

impl<'a> CmdBroker<'a> {
    pub fn new() -> CmdBroker<'a> {
        CmdBroker {
            subscriptions: List::new(),
        }
    }

    pub fn subscribe(&self, subscription: &'a Subscription<'a>) {
        self.subscriptions.push_head(subscription);
    }

    pub fn unsubscribe(&self, subscription: &'a Subscription<'a>) {
        self.subscriptions.remove(subscription);
    }

    /// Offer the command frame staged in `pbuf` to the subscribers.
    pub fn publish(&self, pbuf: &PacketBuf) -> CmdBrokerResult {
        let cmd_id = match pbuf.with_payload(|p| p.first().copied()).flatten() {
            Some(cmd_id) => cmd_id,
            None => return CmdBrokerResult::Error,
        };
        for subscription in self.subscriptions.iter() {
            match subscription.handler.on_command(cmd_id) {
                CmdBrokerResult::Unconsumed => continue,
                result => return result,
            }
        }
        CmdBrokerResult::Unconsumed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    struct Recognizer {
        id: u8,
        offered: Cell<usize>,
    }

    impl Recognizer {
        fn new(id: u8) -> Recognizer {
            Recognizer {
                id,
                offered: Cell::new(0),
            }
        }
    }

    impl CmdHandler for Recognizer {
        fn on_command(&self, cmd_id: u8) -> CmdBrokerResult {
            self.offered.set(self.offered.get() + 1);
            if cmd_id == self.id {
                CmdBrokerResult::Consumed
            } else {
                CmdBrokerResult::Unconsumed
            }
        }
    }

    fn stage_command(pbuf: &PacketBuf, cmd_id: u8) {
        pbuf.clear();
        pbuf.with_payload_region_mut(|p| p[0] = cmd_id);
        pbuf.set_datalen(1);
    }

    #[test]
    fn every_subscriber_is_offered_until_one_consumes() {
        let pbuf = PacketBuf::new();
        let broker = CmdBroker::new();
        let first = Recognizer::new(0x0A);
        let second = Recognizer::new(0x0D);
        let sub_first = Subscription::new(&first);
        let sub_second = Subscription::new(&second);
        broker.subscribe(&sub_first);
        broker.subscribe(&sub_second);

        stage_command(&pbuf, 0x0A);
        assert_eq!(broker.publish(&pbuf), CmdBrokerResult::Consumed);
        stage_command(&pbuf, 0x0D);
        assert_eq!(broker.publish(&pbuf), CmdBrokerResult::Consumed);
        stage_command(&pbuf, 0x42);
        assert_eq!(broker.publish(&pbuf), CmdBrokerResult::Unconsumed);
        // The unknown command was offered to both subscribers; consumed
        // commands stopped at the consumer.
        assert_eq!(first.offered.get(), 2);
        assert_eq!(second.offered.get(), 3);
    }

    #[test]
    fn unsubscribed_handlers_are_skipped() {
        let pbuf = PacketBuf::new();
        let broker = CmdBroker::new();
        let handler = Recognizer::new(0x0A);
        let subscription = Subscription::new(&handler);
        broker.subscribe(&subscription);
        broker.unsubscribe(&subscription);

        stage_command(&pbuf, 0x0A);
        assert_eq!(broker.publish(&pbuf), CmdBrokerResult::Unconsumed);
        assert_eq!(handler.offered.get(), 0);
    }

    #[test]
    fn empty_frame_is_an_error() {
        let pbuf = PacketBuf::new();
        pbuf.clear();
        let broker = CmdBroker::new();
        assert_eq!(broker.publish(&pbuf), CmdBrokerResult::Error);
    }
}
