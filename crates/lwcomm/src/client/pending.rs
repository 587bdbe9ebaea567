// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pending-RPC table: an 8-slot fast pool backed by heap overflow, with
//! sequence-number allocation and timeout ticking.

use std::collections::HashMap;

use crate::protocol::Status;

const FAST_POOL_SIZE: usize = 8;

/// What to do when a reply (or a timeout) resolves a pending entry.
pub enum Completion {
    /// An RPC callback: fired with the reply status and payload.
    Rpc(Box<dyn FnOnce(Status, Vec<u8>) + Send>),
    /// A subscribe/unsubscribe/ping-echo callback: fired with success.
    Simple(Box<dyn FnOnce(bool) + Send>),
}

struct Pending {
    completion: Option<Completion>,
    /// Ticks remaining before this entry times out (10 ms per tick).
    alive: u32,
}

#[derive(Default)]
pub struct PendingTable {
    fast: [Option<(u16, Pending)>; FAST_POOL_SIZE],
    overflow: HashMap<u16, Pending>,
    /// High-byte counter for non-queued (no-callback) sequence numbers;
    /// these never collide with queued low-byte-only sequence numbers.
    fire_and_forget_counter: u16,
}

const TIMEOUT_TICKS: u32 = 500 / 10; // 500 ms connect/send timeout at a 10 ms tick

impl PendingTable {
    pub fn new() -> Self {
        PendingTable {
            fast: Default::default(),
            overflow: HashMap::new(),
            fire_and_forget_counter: 0,
        }
    }

    fn occupied(&self, seqno: u16) -> bool {
        self.fast.iter().any(|slot| matches!(slot, Some((s, _)) if *s == seqno)) || self.overflow.contains_key(&seqno)
    }

    /// Allocate a sequence number with an associated completion,
    /// walking the low byte 0..256 for a free slot. Returns `None` if
    /// all 256 low-byte values are occupied (~255 in-flight cap).
    pub fn allocate(&mut self, completion: Completion) -> Option<u16> {
        let seqno = (0u16..256).find(|s| !self.occupied(*s))?;
        let entry = Pending {
            completion: Some(completion),
            alive: TIMEOUT_TICKS,
        };
        if let Some(slot) = self.fast.iter_mut().find(|s| s.is_none()) {
            *slot = Some((seqno, entry));
        } else {
            self.overflow.insert(seqno, entry);
        }
        Some(seqno)
    }

    /// Allocate a fire-and-forget sequence number with no stored slot
    /// (no callback was supplied, so nothing needs to be remembered).
    pub fn allocate_fire_and_forget(&mut self) -> u16 {
        self.fire_and_forget_counter = self.fire_and_forget_counter.wrapping_add(1).max(1);
        (self.fire_and_forget_counter) << 8
    }

    /// Remove and return the completion for `seqno`, if any is pending.
    pub fn take(&mut self, seqno: u16) -> Option<Completion> {
        if let Some(slot) = self.fast.iter_mut().find(|s| matches!(s, Some((s2, _)) if *s2 == seqno)) {
            return slot.take().and_then(|(_, mut p)| p.completion.take());
        }
        self.overflow.remove(&seqno).and_then(|mut p| p.completion.take())
    }

    /// Advance every pending entry's timeout counter by one tick;
    /// return the (seqno, completion) pairs that just expired.
    pub fn tick(&mut self) -> Vec<(u16, Completion)> {
        let mut expired = Vec::new();
        for slot in self.fast.iter_mut() {
            let done = if let Some((_seqno, pending)) = slot {
                pending.alive = pending.alive.saturating_sub(1);
                pending.alive == 0
            } else {
                false
            };
            if done {
                if let Some((seqno, mut pending)) = slot.take() {
                    if let Some(c) = pending.completion.take() {
                        expired.push((seqno, c));
                    }
                }
            }
        }
        let expired_keys: Vec<u16> = self
            .overflow
            .iter_mut()
            .filter_map(|(seqno, pending)| {
                pending.alive = pending.alive.saturating_sub(1);
                if pending.alive == 0 {
                    Some(*seqno)
                } else {
                    None
                }
            })
            .collect();
        for seqno in expired_keys {
            if let Some(mut pending) = self.overflow.remove(&seqno) {
                if let Some(c) = pending.completion.take() {
                    expired.push((seqno, c));
                }
            }
        }
        expired
    }

    /// Drain every pending completion (used on disconnect: every
    /// outstanding RPC fires with a connection-lost style failure).
    pub fn drain_all(&mut self) -> Vec<Completion> {
        let mut all = Vec::new();
        for slot in self.fast.iter_mut() {
            if let Some((_, mut pending)) = slot.take() {
                if let Some(c) = pending.completion.take() {
                    all.push(c);
                }
            }
        }
        for (_, mut pending) in self.overflow.drain() {
            if let Some(c) = pending.completion.take() {
                all.push(c);
            }
        }
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn allocates_and_resolves() {
        let mut table = PendingTable::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let seqno = table
            .allocate(Completion::Simple(Box::new(move |ok| {
                flag.store(ok, Ordering::SeqCst);
            })))
            .unwrap();
        match table.take(seqno).unwrap() {
            Completion::Simple(cb) => cb(true),
            _ => unreachable!(),
        }
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn fire_and_forget_does_not_collide_with_queued() {
        let mut table = PendingTable::new();
        let a = table.allocate_fire_and_forget();
        let b = table.allocate(Completion::Simple(Box::new(|_| {}))).unwrap();
        assert_ne!(a, b);
        assert!(a & 0xFF == 0);
    }

    #[test]
    fn exhausting_255_slots_fails() {
        let mut table = PendingTable::new();
        for _ in 0..256 {
            table.allocate(Completion::Simple(Box::new(|_| {}))).unwrap();
        }
        assert!(table.allocate(Completion::Simple(Box::new(|_| {}))).is_none());
    }

    #[test]
    fn tick_expires_after_timeout() {
        let mut table = PendingTable::new();
        table.allocate(Completion::Simple(Box::new(|_| {}))).unwrap();
        let mut expired = Vec::new();
        for _ in 0..TIMEOUT_TICKS {
            expired = table.tick();
        }
        assert_eq!(expired.len(), 1);
    }
}
