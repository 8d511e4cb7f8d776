//! GTPv2 Header
//!
//! GTPv2-C header structure as specified in 3GPP TS 29.274 clause 5.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use crate::error::{GtpError, GtpResult};

/// GTPv2-C header length (with TEID)
pub const GTPV2C_HEADER_LEN: usize = 12;

/// GTPv2-C header length (without TEID)
pub const GTPV2C_HEADER_LEN_NO_TEID: usize = 8;

/// Bytes of the header not counted by the length field
const GTPV2C_MANDATORY_LEN: usize = 4;

/// GTPv2 version number carried in the flags octet
pub const GTP2_VERSION: u8 = 2;

/// Largest value a 24-bit sequence number can hold
pub const GTP2_MAX_SEQUENCE: u32 = 0x00FF_FFFF;

/// GTPv2-C message types used on the S11 interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Gtp2MessageType {
    EchoRequest = 1,
    EchoResponse = 2,
    CreateSessionRequest = 32,
    CreateSessionResponse = 33,
    ModifyBearerRequest = 34,
    ModifyBearerResponse = 35,
    DeleteSessionRequest = 36,
    DeleteSessionResponse = 37,
    ModifyBearerCommand = 64,
    ModifyBearerFailureIndication = 65,
    DeleteBearerCommand = 66,
    DeleteBearerFailureIndication = 67,
    BearerResourceCommand = 68,
    BearerResourceFailureIndication = 69,
    DownlinkDataNotificationFailureIndication = 70,
    CreateBearerRequest = 95,
    CreateBearerResponse = 96,
    UpdateBearerRequest = 97,
    UpdateBearerResponse = 98,
    DeleteBearerRequest = 99,
    DeleteBearerResponse = 100,
    CreateIndirectDataForwardingTunnelRequest = 166,
    CreateIndirectDataForwardingTunnelResponse = 167,
    DeleteIndirectDataForwardingTunnelRequest = 168,
    DeleteIndirectDataForwardingTunnelResponse = 169,
    ReleaseAccessBearersRequest = 170,
    ReleaseAccessBearersResponse = 171,
    DownlinkDataNotification = 176,
    DownlinkDataNotificationAcknowledge = 177,
    ModifyAccessBearersRequest = 211,
    ModifyAccessBearersResponse = 212,
}

impl TryFrom<u8> for Gtp2MessageType {
    type Error = GtpError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::EchoRequest),
            2 => Ok(Self::EchoResponse),
            32 => Ok(Self::CreateSessionRequest),
            33 => Ok(Self::CreateSessionResponse),
            34 => Ok(Self::ModifyBearerRequest),
            35 => Ok(Self::ModifyBearerResponse),
            36 => Ok(Self::DeleteSessionRequest),
            37 => Ok(Self::DeleteSessionResponse),
            64 => Ok(Self::ModifyBearerCommand),
            65 => Ok(Self::ModifyBearerFailureIndication),
            66 => Ok(Self::DeleteBearerCommand),
            67 => Ok(Self::DeleteBearerFailureIndication),
            68 => Ok(Self::BearerResourceCommand),
            69 => Ok(Self::BearerResourceFailureIndication),
            70 => Ok(Self::DownlinkDataNotificationFailureIndication),
            95 => Ok(Self::CreateBearerRequest),
            96 => Ok(Self::CreateBearerResponse),
            97 => Ok(Self::UpdateBearerRequest),
            98 => Ok(Self::UpdateBearerResponse),
            99 => Ok(Self::DeleteBearerRequest),
            100 => Ok(Self::DeleteBearerResponse),
            166 => Ok(Self::CreateIndirectDataForwardingTunnelRequest),
            167 => Ok(Self::CreateIndirectDataForwardingTunnelResponse),
            168 => Ok(Self::DeleteIndirectDataForwardingTunnelRequest),
            169 => Ok(Self::DeleteIndirectDataForwardingTunnelResponse),
            170 => Ok(Self::ReleaseAccessBearersRequest),
            171 => Ok(Self::ReleaseAccessBearersResponse),
            176 => Ok(Self::DownlinkDataNotification),
            177 => Ok(Self::DownlinkDataNotificationAcknowledge),
            211 => Ok(Self::ModifyAccessBearersRequest),
            212 => Ok(Self::ModifyAccessBearersResponse),
            _ => Err(GtpError::InvalidMessageType(value)),
        }
    }
}

impl Gtp2MessageType {
    /// Messages that open a new exchange (requests, commands, notifications).
    pub fn is_initial(self) -> bool {
        matches!(
            self,
            Self::EchoRequest
                | Self::CreateSessionRequest
                | Self::ModifyBearerRequest
                | Self::DeleteSessionRequest
                | Self::ModifyBearerCommand
                | Self::DeleteBearerCommand
                | Self::BearerResourceCommand
                | Self::CreateBearerRequest
                | Self::UpdateBearerRequest
                | Self::DeleteBearerRequest
                | Self::CreateIndirectDataForwardingTunnelRequest
                | Self::DeleteIndirectDataForwardingTunnelRequest
                | Self::ReleaseAccessBearersRequest
                | Self::DownlinkDataNotification
                | Self::ModifyAccessBearersRequest
        )
    }

    /// Bearer requests a PGW may send in reply to an MME command.
    pub fn may_be_triggered(self) -> bool {
        matches!(
            self,
            Self::CreateBearerRequest | Self::UpdateBearerRequest | Self::DeleteBearerRequest
        )
    }
}

/// GTPv2-C Header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gtp2Header {
    /// Version (3 bits) - should be 2 for GTPv2
    pub version: u8,
    /// Piggybacked flag (1 bit)
    pub piggybacked: bool,
    /// TEID presence flag (1 bit)
    pub teid_presence: bool,
    /// Message Type
    pub message_type: u8,
    /// Message Length (excluding first 4 bytes of header)
    pub length: u16,
    /// Tunnel Endpoint Identifier (optional, present if teid_presence=1)
    pub teid: Option<u32>,
    /// Sequence Number (24 bits)
    pub sequence_number: u32,
}

impl Gtp2Header {
    /// Create a new GTPv2-C header with TEID
    pub fn new(message_type: u8, teid: u32, sequence_number: u32) -> Self {
        Self {
            version: GTP2_VERSION,
            piggybacked: false,
            teid_presence: true,
            message_type,
            length: 0,
            teid: Some(teid),
            sequence_number: sequence_number & GTP2_MAX_SEQUENCE,
        }
    }

    /// Create a new GTPv2-C header without TEID
    pub fn new_no_teid(message_type: u8, sequence_number: u32) -> Self {
        Self {
            version: GTP2_VERSION,
            piggybacked: false,
            teid_presence: false,
            message_type,
            length: 0,
            teid: None,
            sequence_number: sequence_number & GTP2_MAX_SEQUENCE,
        }
    }

    /// Get the flags byte
    pub fn flags(&self) -> u8 {
        let mut flags = (self.version & 0x07) << 5;
        if self.piggybacked {
            flags |= 0x10;
        }
        if self.teid_presence {
            flags |= 0x08;
        }
        flags
    }

    /// Get header length
    pub fn header_len(&self) -> usize {
        if self.teid_presence {
            GTPV2C_HEADER_LEN
        } else {
            GTPV2C_HEADER_LEN_NO_TEID
        }
    }

    /// Encode header to bytes
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.flags());
        buf.put_u8(self.message_type);
        buf.put_u16(self.length);

        if self.teid_presence {
            buf.put_u32(self.teid.unwrap_or(0));
        }

        // Sequence number (24 bits) + spare (8 bits)
        buf.put_u32((self.sequence_number & GTP2_MAX_SEQUENCE) << 8);
    }

    /// Encode the header followed by `payload`, filling in the length field.
    pub fn encode_message(&self, payload: &[u8]) -> GtpResult<Bytes> {
        let total = self.header_len() - GTPV2C_MANDATORY_LEN + payload.len();
        let length = u16::try_from(total).map_err(|_| {
            GtpError::EncodingError(format!("message length {} exceeds 65535", total))
        })?;

        let mut buf = BytesMut::with_capacity(self.header_len() + payload.len());
        let mut h = self.clone();
        h.length = length;
        h.encode(&mut buf);
        buf.put_slice(payload);
        Ok(buf.freeze())
    }

    /// Decode header from bytes
    pub fn decode(buf: &mut Bytes) -> GtpResult<Self> {
        if buf.remaining() < GTPV2C_MANDATORY_LEN {
            return Err(GtpError::BufferTooShort {
                needed: GTPV2C_MANDATORY_LEN,
                available: buf.remaining(),
            });
        }

        let flags = buf.get_u8();
        let version = (flags >> 5) & 0x07;
        let piggybacked = (flags & 0x10) != 0;
        let teid_presence = (flags & 0x08) != 0;

        let message_type = buf.get_u8();
        let length = buf.get_u16();

        if version != GTP2_VERSION {
            return Err(GtpError::InvalidVersion(version));
        }

        let min_remaining = if teid_presence { 8 } else { 4 };
        if buf.remaining() < min_remaining {
            return Err(GtpError::BufferTooShort {
                needed: min_remaining,
                available: buf.remaining(),
            });
        }
        if (length as usize) < min_remaining {
            return Err(GtpError::InvalidHeader(format!(
                "length {} shorter than header remainder {}",
                length, min_remaining
            )));
        }

        let teid = if teid_presence {
            Some(buf.get_u32())
        } else {
            None
        };

        let sequence_number = buf.get_u32() >> 8;

        Ok(Self {
            version,
            piggybacked,
            teid_presence,
            message_type,
            length,
            teid,
            sequence_number,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode_with_teid() {
        let header = Gtp2Header::new(
            Gtp2MessageType::CreateSessionRequest as u8,
            0x12345678,
            0x123456,
        );

        let mut bytes = header.encode_message(&[0u8; 88]).unwrap();
        assert_eq!(bytes.len(), GTPV2C_HEADER_LEN + 88);
        assert_eq!(bytes[0], 0x48);

        let decoded = Gtp2Header::decode(&mut bytes).unwrap();
        assert_eq!(decoded.version, 2);
        assert!(decoded.teid_presence);
        assert_eq!(decoded.length, 96);
        assert_eq!(decoded.message_type, Gtp2MessageType::CreateSessionRequest as u8);
        assert_eq!(decoded.teid, Some(0x12345678));
        assert_eq!(decoded.sequence_number, 0x123456);
        assert_eq!(bytes.len(), 88);
    }

    #[test]
    fn test_header_encode_decode_without_teid() {
        let header = Gtp2Header::new_no_teid(Gtp2MessageType::EchoRequest as u8, 0x123456);

        let mut bytes = header.encode_message(&[]).unwrap();
        assert_eq!(bytes[0], 0x40);

        let decoded = Gtp2Header::decode(&mut bytes).unwrap();
        assert!(!decoded.teid_presence);
        assert_eq!(decoded.length, 4);
        assert_eq!(decoded.teid, None);
        assert_eq!(decoded.sequence_number, 0x123456);
    }

    #[test]
    fn test_decode_rejects_gtpv1() {
        let mut bytes = Bytes::from_static(&[0x30, 0x01, 0x00, 0x04, 0, 0, 0, 0]);
        assert_eq!(
            Gtp2Header::decode(&mut bytes),
            Err(GtpError::InvalidVersion(1))
        );
    }

    #[test]
    fn test_decode_short_buffer() {
        let mut bytes = Bytes::from_static(&[0x48, 0x20, 0x00]);
        assert!(matches!(
            Gtp2Header::decode(&mut bytes),
            Err(GtpError::BufferTooShort { needed: 4, available: 3 })
        ));

        let mut bytes = Bytes::from_static(&[0x48, 0x20, 0x00, 0x08, 0, 0, 0, 1]);
        assert!(matches!(
            Gtp2Header::decode(&mut bytes),
            Err(GtpError::BufferTooShort { needed: 8, .. })
        ));
    }

    #[test]
    fn test_oversized_payload_is_rejected() {
        let header = Gtp2Header::new(Gtp2MessageType::CreateSessionRequest as u8, 1, 1);
        let payload = vec![0u8; 65536];
        assert!(matches!(
            header.encode_message(&payload),
            Err(GtpError::EncodingError(_))
        ));
    }

    #[test]
    fn test_message_classification() {
        assert!(Gtp2MessageType::DeleteSessionRequest.is_initial());
        assert!(Gtp2MessageType::BearerResourceCommand.is_initial());
        assert!(Gtp2MessageType::DownlinkDataNotification.is_initial());
        assert!(!Gtp2MessageType::DeleteSessionResponse.is_initial());
        assert!(!Gtp2MessageType::BearerResourceFailureIndication.is_initial());
        assert!(Gtp2MessageType::UpdateBearerRequest.may_be_triggered());
        assert!(!Gtp2MessageType::CreateSessionRequest.may_be_triggered());
        assert_eq!(
            Gtp2MessageType::try_from(170),
            Ok(Gtp2MessageType::ReleaseAccessBearersRequest)
        );
        assert_eq!(Gtp2MessageType::try_from(250), Err(GtpError::InvalidMessageType(250)));
    }
}
