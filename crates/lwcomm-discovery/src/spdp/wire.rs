// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SPDP wire format: fixed binary header, participant/topic/endpoint
//! blocks, and a trailing embedded topic list. All multi-byte fields
//! are big-endian.

use std::time::{SystemTime, UNIX_EPOCH};

pub const MAGIC: [u8; 4] = *b"SPDP";
pub const VERSION: u16 = 1;
pub const NAME_LEN: usize = 64;
pub const TRANSPORT_ADDR_LEN: usize = 128;
/// Maximum topics embedded in one participant-announce.
pub const MAX_EMBEDDED_TOPICS: usize = 16;

const HEADER_LEN: usize = 4 + 2 + 2 + 2 + 4 + 4 + 4 + 4;
const PARTICIPANT_LEN: usize = NAME_LEN + 4 * 7;
const TOPIC_LEN: usize = NAME_LEN + NAME_LEN + 4;
const ENDPOINT_LEN: usize = 4 + 1 + TRANSPORT_ADDR_LEN + 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    ParticipantAnnounce,
    ParticipantLeave,
    TopicAnnounce,
    TopicRemove,
}

impl MessageKind {
    fn from_u16(v: u16) -> Option<Self> {
        match v {
            0 => Some(MessageKind::ParticipantAnnounce),
            1 => Some(MessageKind::ParticipantLeave),
            2 => Some(MessageKind::TopicAnnounce),
            3 => Some(MessageKind::TopicRemove),
            _ => None,
        }
    }

    fn to_u16(self) -> u16 {
        match self {
            MessageKind::ParticipantAnnounce => 0,
            MessageKind::ParticipantLeave => 1,
            MessageKind::TopicAnnounce => 2,
            MessageKind::TopicRemove => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParticipantInfo {
    pub name: String,
    pub protocol_version: u32,
    pub vendor_id: u32,
    pub product_id: u32,
    pub host_id: u32,
    pub application_id: u32,
    pub instance_id: u32,
    pub lease_sec: u32,
    pub lease_nsec: u32,
}

impl ParticipantInfo {
    /// The identity tuple used to correlate announces across cycles
    /// (spec: "locate by the identity tuple").
    pub fn identity(&self) -> (u32, u32, u32, u32) {
        (self.protocol_version, self.host_id, self.application_id, self.instance_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicInfo {
    pub topic_name: String,
    pub type_name: String,
    pub topic_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointInfo {
    pub endpoint_id: u32,
    pub is_writer: bool,
    pub transport_address: String,
    pub port: u16,
}

impl Default for EndpointInfo {
    fn default() -> Self {
        EndpointInfo {
            endpoint_id: 0,
            is_writer: false,
            transport_address: String::new(),
            port: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SpdpMessage {
    pub kind: MessageKind,
    pub domain_id: u32,
    pub participant_id: u32,
    pub timestamp_sec: u32,
    pub timestamp_nsec: u32,
    pub participant: ParticipantInfo,
    pub topic: TopicInfo,
    pub endpoint: EndpointInfo,
    pub topics: Vec<TopicInfo>,
}

impl SpdpMessage {
    pub fn participant_announce(domain_id: u32, participant_id: u32, participant: ParticipantInfo, topics: Vec<TopicInfo>) -> Self {
        let (sec, nsec) = now_unix();
        SpdpMessage {
            kind: MessageKind::ParticipantAnnounce,
            domain_id,
            participant_id,
            timestamp_sec: sec,
            timestamp_nsec: nsec,
            participant,
            topic: TopicInfo {
                topic_name: String::new(),
                type_name: String::new(),
                topic_id: 0,
            },
            endpoint: EndpointInfo::default(),
            topics,
        }
    }

    pub fn participant_leave(domain_id: u32, participant_id: u32, participant: ParticipantInfo) -> Self {
        let mut m = SpdpMessage::participant_announce(domain_id, participant_id, participant, Vec::new());
        m.kind = MessageKind::ParticipantLeave;
        m
    }

    pub fn topic_announce(domain_id: u32, participant_id: u32, participant: ParticipantInfo, topic: TopicInfo) -> Self {
        let mut m = SpdpMessage::participant_announce(domain_id, participant_id, participant, Vec::new());
        m.kind = MessageKind::TopicAnnounce;
        m.topic = topic;
        m
    }

    pub fn encode(&self) -> Vec<u8> {
        let topics = &self.topics[..self.topics.len().min(MAX_EMBEDDED_TOPICS)];
        let total = HEADER_LEN + PARTICIPANT_LEN + TOPIC_LEN + ENDPOINT_LEN + 4 + TOPIC_LEN * topics.len();
        let mut buf = vec![0u8; total];

        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..6].copy_from_slice(&VERSION.to_be_bytes());
        buf[6..8].copy_from_slice(&(total as u16).to_be_bytes());
        buf[8..10].copy_from_slice(&self.kind.to_u16().to_be_bytes());
        buf[10..14].copy_from_slice(&self.domain_id.to_be_bytes());
        buf[14..18].copy_from_slice(&self.participant_id.to_be_bytes());
        buf[18..22].copy_from_slice(&self.timestamp_sec.to_be_bytes());
        buf[22..26].copy_from_slice(&self.timestamp_nsec.to_be_bytes());

        let mut off = HEADER_LEN;
        write_fixed_str(&mut buf[off..off + NAME_LEN], &self.participant.name);
        off += NAME_LEN;
        for field in [
            self.participant.protocol_version,
            self.participant.vendor_id,
            self.participant.product_id,
            self.participant.host_id,
            self.participant.application_id,
            self.participant.instance_id,
            self.participant.lease_sec,
            self.participant.lease_nsec,
        ] {
            buf[off..off + 4].copy_from_slice(&field.to_be_bytes());
            off += 4;
        }

        encode_topic(&mut buf[off..off + TOPIC_LEN], &self.topic);
        off += TOPIC_LEN;

        buf[off..off + 4].copy_from_slice(&self.endpoint.endpoint_id.to_be_bytes());
        off += 4;
        buf[off] = self.endpoint.is_writer as u8;
        off += 1;
        write_fixed_str(&mut buf[off..off + TRANSPORT_ADDR_LEN], &self.endpoint.transport_address);
        off += TRANSPORT_ADDR_LEN;
        buf[off..off + 2].copy_from_slice(&self.endpoint.port.to_be_bytes());
        off += 2;

        buf[off..off + 4].copy_from_slice(&(topics.len() as u32).to_be_bytes());
        off += 4;
        for t in topics {
            encode_topic(&mut buf[off..off + TOPIC_LEN], t);
            off += TOPIC_LEN;
        }

        buf
    }

    pub fn decode(buf: &[u8]) -> Option<SpdpMessage> {
        if buf.len() < HEADER_LEN || buf[0..4] != MAGIC {
            return None;
        }
        let version = u16::from_be_bytes([buf[4], buf[5]]);
        if version != VERSION {
            return None;
        }
        let length = u16::from_be_bytes([buf[6], buf[7]]) as usize;
        if length > buf.len() {
            return None;
        }
        let kind = MessageKind::from_u16(u16::from_be_bytes([buf[8], buf[9]]))?;
        let domain_id = u32::from_be_bytes(buf[10..14].try_into().ok()?);
        let participant_id = u32::from_be_bytes(buf[14..18].try_into().ok()?);
        let timestamp_sec = u32::from_be_bytes(buf[18..22].try_into().ok()?);
        let timestamp_nsec = u32::from_be_bytes(buf[22..26].try_into().ok()?);

        let mut off = HEADER_LEN;
        if buf.len() < off + PARTICIPANT_LEN + TOPIC_LEN + ENDPOINT_LEN + 4 {
            return None;
        }
        let name = read_fixed_str(&buf[off..off + NAME_LEN]);
        off += NAME_LEN;
        let mut fields = [0u32; 8];
        for f in fields.iter_mut() {
            *f = u32::from_be_bytes(buf[off..off + 4].try_into().ok()?);
            off += 4;
        }
        let participant = ParticipantInfo {
            name,
            protocol_version: fields[0],
            vendor_id: fields[1],
            product_id: fields[2],
            host_id: fields[3],
            application_id: fields[4],
            instance_id: fields[5],
            lease_sec: fields[6],
            lease_nsec: fields[7],
        };

        let topic = decode_topic(&buf[off..off + TOPIC_LEN])?;
        off += TOPIC_LEN;

        let endpoint_id = u32::from_be_bytes(buf[off..off + 4].try_into().ok()?);
        off += 4;
        let is_writer = buf[off] != 0;
        off += 1;
        let transport_address = read_fixed_str(&buf[off..off + TRANSPORT_ADDR_LEN]);
        off += TRANSPORT_ADDR_LEN;
        let port = u16::from_be_bytes(buf[off..off + 2].try_into().ok()?);
        off += 2;

        let num_topics = u32::from_be_bytes(buf[off..off + 4].try_into().ok()?) as usize;
        off += 4;
        let num_topics = num_topics.min(MAX_EMBEDDED_TOPICS);
        let mut topics = Vec::with_capacity(num_topics);
        for _ in 0..num_topics {
            if buf.len() < off + TOPIC_LEN {
                break;
            }
            topics.push(decode_topic(&buf[off..off + TOPIC_LEN])?);
            off += TOPIC_LEN;
        }

        Some(SpdpMessage {
            kind,
            domain_id,
            participant_id,
            timestamp_sec,
            timestamp_nsec,
            participant,
            topic,
            endpoint: EndpointInfo {
                endpoint_id,
                is_writer,
                transport_address,
                port,
            },
            topics,
        })
    }
}

fn encode_topic(buf: &mut [u8], topic: &TopicInfo) {
    write_fixed_str(&mut buf[0..NAME_LEN], &topic.topic_name);
    write_fixed_str(&mut buf[NAME_LEN..NAME_LEN * 2], &topic.type_name);
    buf[NAME_LEN * 2..NAME_LEN * 2 + 4].copy_from_slice(&topic.topic_id.to_be_bytes());
}

fn decode_topic(buf: &[u8]) -> Option<TopicInfo> {
    if buf.len() < TOPIC_LEN {
        return None;
    }
    Some(TopicInfo {
        topic_name: read_fixed_str(&buf[0..NAME_LEN]),
        type_name: read_fixed_str(&buf[NAME_LEN..NAME_LEN * 2]),
        topic_id: u32::from_be_bytes(buf[NAME_LEN * 2..NAME_LEN * 2 + 4].try_into().ok()?),
    })
}

fn write_fixed_str(dst: &mut [u8], s: &str) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(dst.len());
    dst[..n].copy_from_slice(&bytes[..n]);
    for b in &mut dst[n..] {
        *b = 0;
    }
}

fn read_fixed_str(src: &[u8]) -> String {
    let end = src.iter().position(|&b| b == 0).unwrap_or(src.len());
    String::from_utf8_lossy(&src[..end]).into_owned()
}

fn now_unix() -> (u32, u32) {
    let d = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    (d.as_secs() as u32, d.subsec_nanos())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_participant() -> ParticipantInfo {
        ParticipantInfo {
            name: "edge-node-1".to_string(),
            protocol_version: 1,
            vendor_id: 42,
            product_id: 7,
            host_id: 1001,
            application_id: 9,
            instance_id: 3,
            lease_sec: 10,
            lease_nsec: 0,
        }
    }

    #[test]
    fn round_trips_participant_announce_with_embedded_topics() {
        let topics = vec![
            TopicInfo {
                topic_name: "/drv1/data".to_string(),
                type_name: "json".to_string(),
                topic_id: 1,
            },
            TopicInfo {
                topic_name: "/drv2/data".to_string(),
                type_name: "json".to_string(),
                topic_id: 2,
            },
        ];
        let msg = SpdpMessage::participant_announce(5, 100, sample_participant(), topics.clone());
        let encoded = msg.encode();
        let decoded = SpdpMessage::decode(&encoded).unwrap();
        assert_eq!(decoded.domain_id, 5);
        assert_eq!(decoded.participant_id, 100);
        assert_eq!(decoded.participant.name, "edge-node-1");
        assert_eq!(decoded.participant.identity(), (1, 1001, 9, 3));
        assert_eq!(decoded.topics, topics);
        assert!(matches!(decoded.kind, MessageKind::ParticipantAnnounce));
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = sample_participant_announce_bytes();
        buf[0] = b'X';
        assert!(SpdpMessage::decode(&buf).is_none());
    }

    #[test]
    fn rejects_bad_version() {
        let mut buf = sample_participant_announce_bytes();
        buf[4..6].copy_from_slice(&99u16.to_be_bytes());
        assert!(SpdpMessage::decode(&buf).is_none());
    }

    fn sample_participant_announce_bytes() -> Vec<u8> {
        SpdpMessage::participant_announce(1, 1, sample_participant(), Vec::new()).encode()
    }
}
