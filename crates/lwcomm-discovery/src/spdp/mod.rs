// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Simple Participant Discovery Protocol (SPDP)-lite: multicast
//! announce/leave, a discovered-participant and discovered-topic
//! table with lease expiry, and endpoint matching by (topic, type).

mod runtime;
mod tables;
mod wire;

pub use runtime::{SpdpCallbacks, SpdpConfig, SpdpParticipant, TopicProvider};
pub use tables::{DiscoveredParticipant, DiscoveredTopic, DiscoveryTables};
pub use wire::{EndpointInfo, MessageKind, ParticipantInfo, SpdpMessage, TopicInfo};

/// Two endpoints are matched when they advertise the same topic and
/// type name and their owning participants have mutually discovered
/// each other (spec §4.5, "Endpoint matching"). Data transport itself
/// stays out of band, carried by the messaging core.
pub fn endpoints_match(a: &TopicInfo, b: &TopicInfo) -> bool {
    a.topic_name == b.topic_name && a.type_name == b.type_name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_match_on_topic_and_type() {
        let a = TopicInfo {
            topic_name: "/drv1/data".to_string(),
            type_name: "json".to_string(),
            topic_id: 1,
        };
        let b = TopicInfo {
            topic_name: "/drv1/data".to_string(),
            type_name: "json".to_string(),
            topic_id: 2,
        };
        let c = TopicInfo {
            topic_name: "/drv1/data".to_string(),
            type_name: "cbor".to_string(),
            topic_id: 3,
        };
        assert!(endpoints_match(&a, &b));
        assert!(!endpoints_match(&a, &c));
    }
}
