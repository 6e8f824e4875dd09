// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Fixed-capacity neighbor store.
//!
//! Each neighbor entry is keyed by link-layer address and holds up to two
//! sessions: a permanent (established) one and a tentative (in-progress
//! handshake) one. Sessions live in a pool of stable slots; a slot's index
//! is exchanged on the wire during the handshake, so a session must keep its
//! index for its whole lifetime, including promotion from tentative to
//! permanent. An entry whose last session is deleted is removed immediately.
//!
//! Allocation failure is not an error condition: the peer retries later, so
//! callers simply drop the current frame.

use crate::anti_replay::AntiReplayInfo;
use crate::config::CONFIG;
use crate::net::linkaddr::LinkAddr;
use kernel::hil::symmetric_encryption::AES128_KEY_SIZE;
use kernel::utilities::cells::MapCell;

/// Capacity of the neighbor table and of the session pool.
pub const MAX_NEIGHBORS: usize = 8;
/// Cap on concurrently tentative sessions, bounding the memory a HELLO
/// flood can claim.
pub const MAX_TENTATIVES: usize = 5;
/// Length of handshake challenges.
pub const CHALLENGE_LEN: usize = 8;
/// Session lifetime; an expired permanent session is probed with UPDATE
/// before deletion.
pub const LIFETIME_S: u32 = 60 * 5;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SessionStatus {
    Permanent,
    Tentative,
}

/// Established-session state.
#[derive(Clone, Copy)]
pub struct PermanentData {
    pub pairwise_key: [u8; AES128_KEY_SIZE],
    /// The peer's group key, learned during the handshake.
    pub group_key: [u8; AES128_KEY_SIZE],
    /// Fingerprint of the last accepted HELLOACK challenge, for replay
    /// detection across rekeys.
    pub helloack_challenge: [u8; CHALLENGE_LEN],
    pub anti_replay: AntiReplayInfo,
    pub expiration_s: u32,
    /// Our session's slot index in the peer's pool, as told by the peer.
    pub foreign_index: u8,
    /// Whether this neighbor's authentic HELLO was already counted in the
    /// current Trickle interval.
    pub sent_authentic_hello: bool,
    /// Direction of the last accepted frame, bounding `prolong` churn under
    /// counter suppression.
    pub last_was_broadcast: bool,
}

impl PermanentData {
    fn new(now_s: u32) -> PermanentData {
        PermanentData {
            pairwise_key: [0; AES128_KEY_SIZE],
            group_key: [0; AES128_KEY_SIZE],
            helloack_challenge: [0; CHALLENGE_LEN],
            anti_replay: AntiReplayInfo::default(),
            expiration_s: now_s + LIFETIME_S,
            foreign_index: 0,
            sent_authentic_hello: false,
            last_was_broadcast: false,
        }
    }
}

/// Where an in-progress handshake stands with respect to its timers.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WaitState {
    /// The randomized HELLOACK delay is running; fires at the given tick.
    Pending(u32),
    /// Our HELLOACK went out; an ACK may now arrive.
    HelloackSent,
    /// We sent an ACK under this session's key and are waiting for the MAC
    /// to confirm its delivery (group-key-only builds keep the tentative
    /// alive for exactly this window).
    AwaitingAckOfAck,
}

/// In-progress-handshake state.
#[derive(Clone, Copy)]
pub struct TentativeData {
    /// The challenge received in the HELLO, later overwritten with the
    /// locally drawn one.
    pub challenge: [u8; CHALLENGE_LEN],
    pub tentative_pairwise_key: [u8; AES128_KEY_SIZE],
    pub expiration_s: u32,
    pub wait: WaitState,
}

impl TentativeData {
    fn new(expiration_s: u32) -> TentativeData {
        TentativeData {
            challenge: [0; CHALLENGE_LEN],
            tentative_pairwise_key: [0; AES128_KEY_SIZE],
            expiration_s,
            wait: WaitState::HelloackSent,
        }
    }
}

#[derive(Clone, Copy)]
enum Session {
    Permanent(PermanentData),
    Tentative(TentativeData),
}

#[derive(Clone, Copy)]
struct Entry {
    addr: LinkAddr,
    permanent: Option<u8>,
    tentative: Option<u8>,
}

struct Tables {
    entries: [Option<Entry>; MAX_NEIGHBORS],
    pool: [Option<Session>; MAX_NEIGHBORS],
}

/// A snapshot of the occupied entry indices, so callers can iterate without
/// holding a borrow of the store across their per-entry work.
pub struct EntryIndices {
    indices: [usize; MAX_NEIGHBORS],
    len: usize,
}

impl EntryIndices {
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.indices[..self.len].iter().copied()
    }
}

pub struct AkesNbr {
    tables: MapCell<Tables>,
}

impl AkesNbr {
    pub fn new() -> AkesNbr {
        AkesNbr {
            tables: MapCell::new(Tables {
                entries: [None; MAX_NEIGHBORS],
                pool: [None; MAX_NEIGHBORS],
            }),
        }
    }

    /// Allocate a session of the requested role for `addr`, creating the
    /// entry when needed. Returns the entry index, or `None` when the
    /// table, the pool, or the tentative cap refuses.
    pub fn create(&self, addr: LinkAddr, status: SessionStatus, now_s: u32) -> Option<usize> {
        self.tables
            .map(|t| {
                if status == SessionStatus::Tentative && count_in(t, SessionStatus::Tentative) >= MAX_TENTATIVES {
                    return None;
                }
                let slot = t.pool.iter().position(|s| s.is_none())? as u8;
                let entry_index = match find_entry(t, &addr) {
                    Some(i) => i,
                    None => {
                        let i = t.entries.iter().position(|e| e.is_none())?;
                        t.entries[i] = Some(Entry {
                            addr,
                            permanent: None,
                            tentative: None,
                        });
                        i
                    }
                };
                let entry = t.entries[entry_index].as_mut()?;
                match status {
                    SessionStatus::Permanent => {
                        if entry.permanent.is_some() {
                            return None;
                        }
                        entry.permanent = Some(slot);
                        t.pool[slot as usize] = Some(Session::Permanent(PermanentData::new(now_s)));
                    }
                    SessionStatus::Tentative => {
                        if entry.tentative.is_some() {
                            return None;
                        }
                        entry.tentative = Some(slot);
                        t.pool[slot as usize] = Some(Session::Tentative(TentativeData::new(now_s)));
                    }
                }
                Some(entry_index)
            })
            .flatten()
    }

    /// Free the entry's session of the given role. The entry itself goes
    /// away with its last session.
    pub fn delete(&self, entry_index: usize, status: SessionStatus) {
        self.tables.map(|t| {
            if let Some(entry) = t.entries.get_mut(entry_index).and_then(|e| e.as_mut()) {
                let slot = match status {
                    SessionStatus::Permanent => entry.permanent.take(),
                    SessionStatus::Tentative => entry.tentative.take(),
                };
                if let Some(slot) = slot {
                    t.pool[slot as usize] = None;
                }
                if entry.permanent.is_none() && entry.tentative.is_none() {
                    t.entries[entry_index] = None;
                }
            }
        });
    }

    pub fn entry_of(&self, addr: &LinkAddr) -> Option<usize> {
        self.tables.map(|t| find_entry(t, addr)).flatten()
    }

    pub fn addr_of(&self, entry_index: usize) -> Option<LinkAddr> {
        self.tables
            .map(|t| t.entries.get(entry_index).copied().flatten().map(|e| e.addr))
            .flatten()
    }

    /// The wire index of the entry's session of the given role: its stable
    /// slot in the session pool.
    pub fn index_of(&self, entry_index: usize, status: SessionStatus) -> Option<u8> {
        self.tables
            .map(|t| {
                let entry = t.entries.get(entry_index).copied().flatten()?;
                match status {
                    SessionStatus::Permanent => entry.permanent,
                    SessionStatus::Tentative => entry.tentative,
                }
            })
            .flatten()
    }

    pub fn get_permanent(&self, entry_index: usize) -> Option<PermanentData> {
        self.tables
            .map(|t| match session_of(t, entry_index, SessionStatus::Permanent)? {
                Session::Permanent(data) => Some(*data),
                Session::Tentative(_) => None,
            })
            .flatten()
    }

    pub fn set_permanent(&self, entry_index: usize, data: PermanentData) {
        self.tables.map(|t| {
            if let Some(session) = session_of(t, entry_index, SessionStatus::Permanent) {
                *session = Session::Permanent(data);
            }
        });
    }

    pub fn get_tentative(&self, entry_index: usize) -> Option<TentativeData> {
        self.tables
            .map(|t| match session_of(t, entry_index, SessionStatus::Tentative)? {
                Session::Tentative(data) => Some(*data),
                Session::Permanent(_) => None,
            })
            .flatten()
    }

    pub fn set_tentative(&self, entry_index: usize, data: TentativeData) {
        self.tables.map(|t| {
            if let Some(session) = session_of(t, entry_index, SessionStatus::Tentative) {
                *session = Session::Tentative(data);
            }
        });
    }

    /// Turn the entry's tentative session into its permanent one, in place.
    /// The session keeps its pool slot (and therefore its wire index); the
    /// tentative pairwise key becomes the session key. Any prior permanent
    /// session must already be deleted.
    pub fn promote(&self, entry_index: usize, now_s: u32) -> bool {
        self.tables
            .map(|t| {
                let entry = match t.entries.get_mut(entry_index).and_then(|e| e.as_mut()) {
                    Some(entry) => entry,
                    None => return false,
                };
                if entry.permanent.is_some() {
                    return false;
                }
                let slot = match entry.tentative.take() {
                    Some(slot) => slot,
                    None => return false,
                };
                let tentative = match t.pool[slot as usize] {
                    Some(Session::Tentative(data)) => data,
                    _ => return false,
                };
                let mut permanent = PermanentData::new(now_s);
                permanent.pairwise_key = tentative.tentative_pairwise_key;
                t.pool[slot as usize] = Some(Session::Permanent(permanent));
                entry.permanent = Some(slot);
                true
            })
            .unwrap_or(false)
    }

    pub fn count(&self, status: SessionStatus) -> usize {
        self.tables.map(|t| count_in(t, status)).unwrap_or(0)
    }

    pub fn entry_indices(&self) -> EntryIndices {
        let mut indices = EntryIndices {
            indices: [0; MAX_NEIGHBORS],
            len: 0,
        };
        self.tables.map(|t| {
            for (i, entry) in t.entries.iter().enumerate() {
                if entry.is_some() {
                    indices.indices[indices.len] = i;
                    indices.len += 1;
                }
            }
        });
        indices
    }

    /// Opportunistic sweep of timed-out handshakes; invoked from the
    /// HELLO/HELLOACK receive paths rather than a dedicated timer.
    pub fn delete_expired_tentatives(&self, now_s: u32) {
        for entry_index in self.entry_indices().iter() {
            if let Some(tentative) = self.get_tentative(entry_index) {
                if tentative.expiration_s < now_s {
                    self.delete(entry_index, SessionStatus::Tentative);
                }
            }
        }
    }

    /// Refresh the permanent session's expiration. Under counter
    /// suppression only a change of frame direction refreshes, bounding the
    /// bookkeeping a steady unidirectional stream causes.
    pub fn prolong_permanent(&self, entry_index: usize, now_s: u32, was_broadcast: bool) {
        if let Some(mut data) = self.get_permanent(entry_index) {
            if CONFIG.counter_suppression {
                if data.last_was_broadcast == was_broadcast {
                    return;
                }
                data.last_was_broadcast = was_broadcast;
            }
            data.expiration_s = now_s + LIFETIME_S;
            self.set_permanent(entry_index, data);
        }
    }
}

fn find_entry(t: &Tables, addr: &LinkAddr) -> Option<usize> {
    t.entries
        .iter()
        .position(|e| e.map_or(false, |e| e.addr == *addr))
}

fn count_in(t: &Tables, status: SessionStatus) -> usize {
    t.entries
        .iter()
        .flatten()
        .filter(|e| match status {
            SessionStatus::Permanent => e.permanent.is_some(),
            SessionStatus::Tentative => e.tentative.is_some(),
        })
        .count()
}

fn session_of<'t>(
    t: &'t mut Tables,
    entry_index: usize,
    status: SessionStatus,
) -> Option<&'t mut Session> {
    let entry = t.entries.get(entry_index).copied().flatten()?;
    let slot = match status {
        SessionStatus::Permanent => entry.permanent?,
        SessionStatus::Tentative => entry.tentative?,
    };
    t.pool[slot as usize].as_mut()
}
