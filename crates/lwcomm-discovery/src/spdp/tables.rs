// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovered-participant and discovered-topic tables with
//! lease-duration pruning.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use super::wire::{ParticipantInfo, TopicInfo};

type Identity = (u32, u32, u32, u32);

pub struct DiscoveredParticipant {
    pub participant_id: u32,
    pub info: ParticipantInfo,
    pub address: SocketAddr,
    pub last_seen: Instant,
}

pub struct DiscoveredTopic {
    pub participant_id: u32,
    pub info: TopicInfo,
    pub last_seen: Instant,
}

/// Bounds the discovered-participant and discovered-topic tables so a
/// misbehaving or malicious peer can't grow them without bound.
pub const MAX_TABLE_SIZE: usize = 4096;

#[derive(Default)]
pub struct DiscoveryTables {
    participants: HashMap<Identity, DiscoveredParticipant>,
    topics: HashMap<(String, u32), DiscoveredTopic>,
}

impl DiscoveryTables {
    pub fn new() -> Self {
        DiscoveryTables::default()
    }

    /// Insert or refresh a participant announce. Returns `true` if this
    /// is a newly discovered participant.
    pub fn observe_participant(&mut self, info: ParticipantInfo, address: SocketAddr, now: Instant) -> bool {
        let identity = info.identity();
        if let Some(existing) = self.participants.get_mut(&identity) {
            existing.last_seen = now;
            existing.address = address;
            existing.info = info;
            false
        } else if self.participants.len() < MAX_TABLE_SIZE {
            self.participants.insert(
                identity,
                DiscoveredParticipant {
                    participant_id: 0,
                    info,
                    address,
                    last_seen: now,
                },
            );
            true
        } else {
            false
        }
    }

    pub fn remove_participant(&mut self, info: &ParticipantInfo) {
        self.participants.remove(&info.identity());
    }

    /// Remove one topic entry by its (topic_name, participant_id) key,
    /// used for an explicit `topic-remove` message (spec §4.5's
    /// message kind 3, left unhandled by the source's lease-only path).
    pub fn remove_topic(&mut self, participant_id: u32, topic_name: &str) {
        self.topics.remove(&(topic_name.to_string(), participant_id));
    }

    /// Insert or refresh a topic announce, keyed by (topic_name,
    /// participant_id). Returns `true` if newly discovered.
    pub fn observe_topic(&mut self, participant_id: u32, info: TopicInfo, now: Instant) -> bool {
        if info.topic_name.is_empty() {
            return false;
        }
        let key = (info.topic_name.clone(), participant_id);
        if let Some(existing) = self.topics.get_mut(&key) {
            existing.last_seen = now;
            existing.info = info;
            false
        } else if self.topics.len() < MAX_TABLE_SIZE {
            self.topics.insert(
                key,
                DiscoveredTopic {
                    participant_id,
                    info,
                    last_seen: now,
                },
            );
            true
        } else {
            false
        }
    }

    /// Remove every participant or topic whose `last_seen` predates
    /// `now - lease_duration`.
    pub fn expire_leases(&mut self, now: Instant, lease_duration: std::time::Duration) -> (Vec<ParticipantInfo>, Vec<TopicInfo>) {
        let mut expired_participants = Vec::new();
        self.participants.retain(|_, p| {
            let alive = now.saturating_duration_since(p.last_seen) < lease_duration;
            if !alive {
                expired_participants.push(p.info.clone());
            }
            alive
        });
        let mut expired_topics = Vec::new();
        self.topics.retain(|_, t| {
            let alive = now.saturating_duration_since(t.last_seen) < lease_duration;
            if !alive {
                expired_topics.push(t.info.clone());
            }
            alive
        });
        (expired_participants, expired_topics)
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::time::Duration;

    fn addr() -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 7400))
    }

    fn participant(instance_id: u32) -> ParticipantInfo {
        ParticipantInfo {
            name: "p".to_string(),
            protocol_version: 1,
            vendor_id: 1,
            product_id: 1,
            host_id: 1,
            application_id: 1,
            instance_id,
            lease_sec: 10,
            lease_nsec: 0,
        }
    }

    #[test]
    fn first_observe_is_new_second_is_not() {
        let mut tables = DiscoveryTables::new();
        let now = Instant::now();
        assert!(tables.observe_participant(participant(1), addr(), now));
        assert!(!tables.observe_participant(participant(1), addr(), now));
        assert_eq!(tables.participant_count(), 1);
    }

    #[test]
    fn expiry_prunes_stale_entries() {
        let mut tables = DiscoveryTables::new();
        let t0 = Instant::now();
        tables.observe_participant(participant(1), addr(), t0);
        let (expired, _) = tables.expire_leases(t0 + Duration::from_secs(20), Duration::from_secs(10));
        assert_eq!(expired.len(), 1);
        assert_eq!(tables.participant_count(), 0);
    }
}
