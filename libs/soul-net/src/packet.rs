// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use bitflags::bitflags;

/// Encoded header size on the wire.
pub const PACKET_HEADER_SIZE: usize = 16;

/// Largest datagram the receive path will accept.
pub const MAX_DATAGRAM_SIZE: usize = 1500;

/// Delivery contract requested for an outgoing packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DeliveryGuarantee {
    #[default]
    Unreliable = 0,
    Reliable = 1,
}

bitflags! {
    /// Flags piggybacked with every packet header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PacketFlags: u8 {
        const ACK = 0b0000_0001;
    }
}

/// Fixed-size framing metadata in front of every payload.
///
/// Wire layout, all integers little-endian, no padding:
/// `sequence: u32`, `acknowledgment: u32`, `acknowledgment_mask: u32`,
/// `guarantee: u8`, `flags: u8`, `channel: u16`. Bit `k` of the mask set
/// means packet `acknowledgment - (k + 1)` was received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketHeader {
    pub sequence: u32,
    pub acknowledgment: u32,
    pub acknowledgment_mask: u32,
    pub guarantee: DeliveryGuarantee,
    pub flags: PacketFlags,
    pub channel: u16,
}

impl PacketHeader {
    /// Serializes into the fixed little-endian wire layout.
    #[must_use]
    pub fn encode(&self) -> [u8; PACKET_HEADER_SIZE] {
        let mut buffer = [0_u8; PACKET_HEADER_SIZE];
        buffer[0..4].copy_from_slice(&self.sequence.to_le_bytes());
        buffer[4..8].copy_from_slice(&self.acknowledgment.to_le_bytes());
        buffer[8..12].copy_from_slice(&self.acknowledgment_mask.to_le_bytes());
        buffer[12] = match self.guarantee {
            DeliveryGuarantee::Unreliable => 0,
            DeliveryGuarantee::Reliable => 1,
        };
        buffer[13] = self.flags.bits();
        buffer[14..16].copy_from_slice(&self.channel.to_le_bytes());
        buffer
    }

    /// Deserializes the fixed wire layout.
    ///
    /// Decoding is tolerant: an unknown guarantee byte maps to
    /// [`DeliveryGuarantee::Unreliable`] and unknown flag bits are dropped.
    #[must_use]
    pub fn decode(buffer: &[u8; PACKET_HEADER_SIZE]) -> Self {
        let word =
            |range: core::ops::Range<usize>| u32::from_le_bytes(buffer[range].try_into().expect("4-byte slice"));

        Self {
            sequence: word(0..4),
            acknowledgment: word(4..8),
            acknowledgment_mask: word(8..12),
            guarantee: match buffer[12] {
                1 => DeliveryGuarantee::Reliable,
                _ => DeliveryGuarantee::Unreliable,
            },
            flags: PacketFlags::from_bits_truncate(buffer[13]),
            channel: u16::from_le_bytes([buffer[14], buffer[15]]),
        }
    }
}

/// A framed header plus opaque payload bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Vec<u8>,
}

impl Packet {
    /// An unreliable packet on `channel` carrying `payload`.
    #[must_use]
    pub fn unreliable(channel: u16, payload: Vec<u8>) -> Self {
        Self {
            header: PacketHeader {
                channel,
                ..PacketHeader::default()
            },
            payload,
        }
    }

    /// A reliable packet on `channel` carrying `payload`.
    #[must_use]
    pub fn reliable(channel: u16, payload: Vec<u8>) -> Self {
        Self {
            header: PacketHeader {
                guarantee: DeliveryGuarantee::Reliable,
                channel,
                ..PacketHeader::default()
            },
            payload,
        }
    }

    /// Header followed by payload, ready for a datagram send.
    #[must_use]
    pub fn to_datagram(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(PACKET_HEADER_SIZE + self.payload.len());
        buffer.extend_from_slice(&self.header.encode());
        buffer.extend_from_slice(&self.payload);
        buffer
    }

    /// Splits a received datagram into header and payload. `None` when the
    /// datagram cannot hold a header.
    #[must_use]
    pub fn from_datagram(bytes: &[u8]) -> Option<Self> {
        let header_bytes: &[u8; PACKET_HEADER_SIZE] =
            bytes.get(..PACKET_HEADER_SIZE)?.try_into().ok()?;
        Some(Self {
            header: PacketHeader::decode(header_bytes),
            payload: bytes[PACKET_HEADER_SIZE..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn wire_layout_is_stable() {
        let header = PacketHeader {
            sequence: 0x0403_0201,
            acknowledgment: 0x0807_0605,
            acknowledgment_mask: 0x0C0B_0A09,
            guarantee: DeliveryGuarantee::Reliable,
            flags: PacketFlags::ACK,
            channel: 0x0E0D,
        };
        assert_eq!(
            header.encode(),
            [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 1, 1, 13, 14]
        );
    }

    #[test]
    fn short_datagrams_are_rejected() {
        assert!(Packet::from_datagram(&[0_u8; PACKET_HEADER_SIZE - 1]).is_none());
        let empty = Packet::from_datagram(&[0_u8; PACKET_HEADER_SIZE]).expect("header only");
        assert!(empty.payload.is_empty());
    }

    #[test]
    fn datagram_round_trip() {
        let packet = Packet::reliable(7, b"payload".to_vec());
        let decoded = Packet::from_datagram(&packet.to_datagram()).expect("well-formed");
        assert_eq!(decoded, packet);
    }

    #[test]
    fn unknown_guarantee_decodes_as_unreliable() {
        let mut bytes = PacketHeader::default().encode();
        bytes[12] = 0xFF;
        assert_eq!(
            PacketHeader::decode(&bytes).guarantee,
            DeliveryGuarantee::Unreliable
        );
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(
            sequence in any::<u32>(),
            acknowledgment in any::<u32>(),
            acknowledgment_mask in any::<u32>(),
            reliable in any::<bool>(),
            ack_flag in any::<bool>(),
            channel in any::<u16>(),
        ) {
            let header = PacketHeader {
                sequence,
                acknowledgment,
                acknowledgment_mask,
                guarantee: if reliable {
                    DeliveryGuarantee::Reliable
                } else {
                    DeliveryGuarantee::Unreliable
                },
                flags: if ack_flag { PacketFlags::ACK } else { PacketFlags::empty() },
                channel,
            };
            prop_assert_eq!(PacketHeader::decode(&header.encode()), header);
        }
    }
}
