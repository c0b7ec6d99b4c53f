//! Wire protocol between client and server.
//!
//! Every datagram carries one bincode-serialized [`Envelope`]: a protocol
//! version, a channel tag, a sequence number and a [`Frame`]. Reliable-channel
//! payloads are sequence-stamped and acknowledged; unreliable payloads are
//! fire-and-forget and carry sequence 0. Envelopes with a foreign version are
//! rejected at decode so the caller can log and drop them without touching
//! the connection.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::object::{AttackKind, ObjectId, ObjectRecord, ProjectileKind};
use crate::PROTOCOL_VERSION;

/// Logical delivery channel of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Channel {
    /// Acked, retransmitted, de-duplicated.
    Reliable,
    /// Best effort, at most once.
    Unreliable,
}

/// Contents of an envelope: either a protocol message or an acknowledgment
/// of a previously received reliable envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Frame {
    Payload(Message),
    Ack { seq: u32 },
}

/// Versioned wrapper around every datagram.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u16,
    pub channel: Channel,
    /// Reliable sequence number; 0 on the unreliable channel.
    pub seq: u32,
    pub frame: Frame,
}

impl Envelope {
    pub fn reliable(seq: u32, message: Message) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            channel: Channel::Reliable,
            seq,
            frame: Frame::Payload(message),
        }
    }

    pub fn unreliable(message: Message) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            channel: Channel::Unreliable,
            seq: 0,
            frame: Frame::Payload(message),
        }
    }

    pub fn ack(seq: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            channel: Channel::Unreliable,
            seq: 0,
            frame: Frame::Ack { seq },
        }
    }
}

/// Protocol message taxonomy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    // === Client → Server ===
    /// Initial handshake.
    Connect { client_version: u16 },
    /// Graceful departure.
    Disconnect,
    /// Client-authored state for the sender's own avatar. The authored id
    /// must match the id bound to the sending peer at connect time.
    ObjectStateUpdate { record: ObjectRecord },
    /// Request to begin an attack on behalf of `attacker_id`.
    BeginAttackRequest {
        attacker_id: ObjectId,
        attack_kind: AttackKind,
        projectile_kind: ProjectileKind,
    },
    /// Cancels every still-charging attack owned by `attacker_id`.
    CancelAttack { attacker_id: ObjectId },
    /// Asks for the debug rectangles of the sender's current map.
    DebugQuadtreeRequest,
    /// Asks for the pending waypoints of one object.
    DebugObjectPathRequest { object_id: ObjectId },

    // === Server → Client ===
    /// Admission reply carrying the avatar id bound to the new peer.
    PlayerConnected { id: ObjectId },
    PlayerDisconnected { id: ObjectId },
    ObjectCreated { record: ObjectRecord },
    ObjectDestroyed { id: ObjectId },
    BeginAttackResponse {
        attacker_id: ObjectId,
        allowed: bool,
        attack_kind: AttackKind,
        projectile_kind: ProjectileKind,
        charge_duration_secs: f32,
    },
    /// `(center, extents)` pairs of the requesting player's map quadtree.
    DebugQuadtreeResponse { rects: Vec<(glam::Vec3, glam::Vec3)> },
    DebugObjectPathResponse {
        object_id: ObjectId,
        waypoints: Vec<glam::Vec3>,
    },
}

/// Decode failures surfaced to the transport layer.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] bincode::Error),
    #[error("protocol version mismatch: got {got}, expected {expected}")]
    VersionMismatch { got: u16, expected: u16 },
}

/// Serializes an envelope for the wire.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, ProtocolError> {
    Ok(bincode::serialize(envelope)?)
}

/// Deserializes and version-checks a datagram.
pub fn decode(bytes: &[u8]) -> Result<Envelope, ProtocolError> {
    let envelope: Envelope = bincode::deserialize(bytes)?;
    if envelope.version != PROTOCOL_VERSION {
        return Err(ProtocolError::VersionMismatch {
            got: envelope.version,
            expected: PROTOCOL_VERSION,
        });
    }
    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_envelope_round_trip() {
        let envelope = Envelope::reliable(7, Message::PlayerConnected { id: 42 });
        let bytes = encode(&envelope).unwrap();
        let decoded = decode(&bytes).unwrap();

        assert_eq!(decoded.version, PROTOCOL_VERSION);
        assert_eq!(decoded.channel, Channel::Reliable);
        assert_eq!(decoded.seq, 7);
        match decoded.frame {
            Frame::Payload(Message::PlayerConnected { id }) => assert_eq!(id, 42),
            other => panic!("unexpected frame after round trip: {:?}", other),
        }
    }

    #[test]
    fn test_state_update_round_trip() {
        let record = ObjectRecord::player(5, Vec3::new(1.0, -2.0, 3.0), "forest_1");
        let envelope = Envelope::unreliable(Message::ObjectStateUpdate {
            record: record.clone(),
        });
        let bytes = encode(&envelope).unwrap();
        match decode(&bytes).unwrap().frame {
            Frame::Payload(Message::ObjectStateUpdate { record: decoded }) => {
                assert_eq!(decoded, record);
            }
            other => panic!("unexpected frame after round trip: {:?}", other),
        }
    }

    #[test]
    fn test_version_mismatch_is_rejected() {
        let mut envelope = Envelope::reliable(1, Message::Disconnect);
        envelope.version = PROTOCOL_VERSION + 1;
        let bytes = bincode::serialize(&envelope).unwrap();

        match decode(&bytes) {
            Err(ProtocolError::VersionMismatch { got, expected }) => {
                assert_eq!(got, PROTOCOL_VERSION + 1);
                assert_eq!(expected, PROTOCOL_VERSION);
            }
            other => panic!("expected version mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_datagram_is_rejected() {
        let envelope = Envelope::reliable(1, Message::Connect { client_version: 1 });
        let bytes = encode(&envelope).unwrap();
        assert!(decode(&bytes[..bytes.len() / 2]).is_err());
        assert!(decode(&[]).is_err());
    }

    #[test]
    fn test_ack_frame_round_trip() {
        let bytes = encode(&Envelope::ack(99)).unwrap();
        match decode(&bytes).unwrap().frame {
            Frame::Ack { seq } => assert_eq!(seq, 99),
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}
