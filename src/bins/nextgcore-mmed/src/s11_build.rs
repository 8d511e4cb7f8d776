//! MME S11 GTP-C Message Building
//!
//! Builds the information element part of S11 messages. The GTPv2-C header is
//! owned by the transaction that carries the message.

use bytes::{BufMut, Bytes, BytesMut};
use ogs_gtp::v2::Gtp2MessageType;
use thiserror::Error;

use crate::context::{BearerId, EpsTai, ECgi, MmeContext, MmeUe, MmeUeId, SessId};

// ============================================================================
// GTP-C IE Types
// ============================================================================

/// GTP-C IE types
pub mod ie_type {
    pub const IMSI: u8 = 1;
    pub const CAUSE: u8 = 2;
    pub const APN: u8 = 71;
    pub const EBI: u8 = 73;
    pub const FLOW_QOS: u8 = 81;
    pub const RAT_TYPE: u8 = 82;
    pub const SERVING_NETWORK: u8 = 83;
    pub const TAD: u8 = 85;
    pub const ULI: u8 = 86;
    pub const F_TEID: u8 = 87;
    pub const BEARER_CONTEXT: u8 = 93;
    pub const PDN_TYPE: u8 = 99;
    pub const PTI: u8 = 100;
    pub const SELECTION_MODE: u8 = 128;
}

/// F-TEID interface types (3GPP TS 29.274 table 8.22-1)
pub mod f_teid_interface {
    pub const S1_U_ENODEB_GTP_U: u8 = 0;
    pub const S11_MME_GTP_C: u8 = 10;
}

/// RAT type EUTRAN
pub const RAT_TYPE_EUTRAN: u8 = 6;
/// PDN type IPv4
pub const PDN_TYPE_IPV4: u8 = 1;

const ULI_TAI_PRESENT: u8 = 0x08;
const ULI_ECGI_PRESENT: u8 = 0x10;

// ============================================================================
// GTP Cause Values
// ============================================================================

/// GTP-C Cause values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum GtpCause {
    #[default]
    Reserved = 0,
    RequestAccepted = 16,
    RequestAcceptedPartially = 17,
    ContextNotFound = 64,
    InvalidMessageFormat = 65,
    MandatoryIeMissing = 70,
    SystemFailure = 72,
    NoResourcesAvailable = 73,
    UeNotResponding = 87,
    UnableToPageUe = 90,
    RequestRejected = 94,
    ConditionalIeMissing = 103,
}

impl From<u8> for GtpCause {
    fn from(value: u8) -> Self {
        match value {
            16 => GtpCause::RequestAccepted,
            17 => GtpCause::RequestAcceptedPartially,
            64 => GtpCause::ContextNotFound,
            65 => GtpCause::InvalidMessageFormat,
            70 => GtpCause::MandatoryIeMissing,
            72 => GtpCause::SystemFailure,
            73 => GtpCause::NoResourcesAvailable,
            87 => GtpCause::UeNotResponding,
            90 => GtpCause::UnableToPageUe,
            94 => GtpCause::RequestRejected,
            103 => GtpCause::ConditionalIeMissing,
            _ => GtpCause::Reserved,
        }
    }
}

// ============================================================================
// Build Parameters
// ============================================================================

/// Flow QoS of a bearer resource command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlowQos {
    pub qci: u8,
    /// Bit rates in kbps
    pub ul_mbr: u64,
    pub dl_mbr: u64,
    pub ul_gbr: u64,
    pub dl_gbr: u64,
}

/// Parameters of a UE requested bearer resource modification
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BearerResourceParams {
    pub linked_ebi: u8,
    pub pti: u8,
    /// Traffic Aggregate Description as received from the UE
    pub tad: Bytes,
    pub flow_qos: Option<FlowQos>,
}

/// One S11 message to build
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum S11Message {
    CreateSessionRequest { sess: SessId },
    ModifyBearerRequest { bearer: BearerId, uli_presence: bool },
    DeleteSessionRequest { sess: SessId },
    CreateBearerResponse { bearer: BearerId, cause: GtpCause },
    UpdateBearerResponse { bearer: BearerId, cause: GtpCause },
    DeleteBearerResponse { bearer: BearerId, cause: GtpCause },
    ReleaseAccessBearersRequest { mme_ue: MmeUeId },
    DownlinkDataNotificationAck { bearer: BearerId, cause: GtpCause },
    CreateIndirectDataForwardingTunnelRequest { mme_ue: MmeUeId },
    BearerResourceCommand { bearer: BearerId, params: BearerResourceParams },
}

impl S11Message {
    pub fn message_type(&self) -> Gtp2MessageType {
        match self {
            S11Message::CreateSessionRequest { .. } => Gtp2MessageType::CreateSessionRequest,
            S11Message::ModifyBearerRequest { .. } => Gtp2MessageType::ModifyBearerRequest,
            S11Message::DeleteSessionRequest { .. } => Gtp2MessageType::DeleteSessionRequest,
            S11Message::CreateBearerResponse { .. } => Gtp2MessageType::CreateBearerResponse,
            S11Message::UpdateBearerResponse { .. } => Gtp2MessageType::UpdateBearerResponse,
            S11Message::DeleteBearerResponse { .. } => Gtp2MessageType::DeleteBearerResponse,
            S11Message::ReleaseAccessBearersRequest { .. } => {
                Gtp2MessageType::ReleaseAccessBearersRequest
            }
            S11Message::DownlinkDataNotificationAck { .. } => {
                Gtp2MessageType::DownlinkDataNotificationAcknowledge
            }
            S11Message::CreateIndirectDataForwardingTunnelRequest { .. } => {
                Gtp2MessageType::CreateIndirectDataForwardingTunnelRequest
            }
            S11Message::BearerResourceCommand { .. } => Gtp2MessageType::BearerResourceCommand,
        }
    }
}

// ============================================================================
// Build Error
// ============================================================================

/// S11 build error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum S11BuildError {
    #[error("Invalid session")]
    InvalidSession,
    #[error("Invalid UE")]
    InvalidUe,
    #[error("Invalid bearer")]
    InvalidBearer,
    #[error("IE type {ie_type} too long: {len} bytes")]
    IeTooLong { ie_type: u8, len: usize },
}

pub type S11BuildResult<T> = Result<T, S11BuildError>;

/// Payload builder used by the GTP path
pub trait S11Builder {
    /// Build the IE part of `msg` from the current context.
    fn build(&self, ctx: &MmeContext, msg: &S11Message) -> S11BuildResult<Bytes>;
}

// ============================================================================
// IE Writer
// ============================================================================

/// TLV writer for GTPv2-C information elements
#[derive(Debug, Default)]
pub struct IeWriter {
    buf: BytesMut,
}

impl IeWriter {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }

    /// Write one IE: type, length, instance, value
    pub fn ie(&mut self, ie_type: u8, instance: u8, value: &[u8]) -> S11BuildResult<()> {
        let len = u16::try_from(value.len()).map_err(|_| S11BuildError::IeTooLong {
            ie_type,
            len: value.len(),
        })?;
        self.buf.put_u8(ie_type);
        self.buf.put_u16(len);
        self.buf.put_u8(instance & 0x0f);
        self.buf.put_slice(value);
        Ok(())
    }

    /// Write a grouped IE whose members are produced by `members`
    pub fn grouped<F>(&mut self, ie_type: u8, instance: u8, members: F) -> S11BuildResult<()>
    where
        F: FnOnce(&mut IeWriter) -> S11BuildResult<()>,
    {
        let mut inner = IeWriter::new();
        members(&mut inner)?;
        self.ie(ie_type, instance, &inner.buf)
    }

    pub fn cause(&mut self, cause: GtpCause) -> S11BuildResult<()> {
        self.ie(ie_type::CAUSE, 0, &[cause as u8, 0])
    }

    pub fn ebi(&mut self, ebi: u8, instance: u8) -> S11BuildResult<()> {
        self.ie(ie_type::EBI, instance, &[ebi & 0x0f])
    }

    pub fn imsi(&mut self, imsi_bcd: &str) -> S11BuildResult<()> {
        self.ie(ie_type::IMSI, 0, &encode_tbcd(imsi_bcd))
    }

    pub fn apn(&mut self, apn: &str) -> S11BuildResult<()> {
        let mut value = Vec::with_capacity(apn.len() + 1);
        for label in apn.split('.').filter(|l| !l.is_empty()) {
            let len = u8::try_from(label.len()).map_err(|_| S11BuildError::IeTooLong {
                ie_type: ie_type::APN,
                len: label.len(),
            })?;
            value.push(len);
            value.extend_from_slice(label.as_bytes());
        }
        self.ie(ie_type::APN, 0, &value)
    }

    /// F-TEID without an address
    pub fn f_teid(&mut self, instance: u8, interface: u8, teid: u32) -> S11BuildResult<()> {
        let mut value = [0u8; 5];
        value[0] = interface & 0x3f;
        value[1..].copy_from_slice(&teid.to_be_bytes());
        self.ie(ie_type::F_TEID, instance, &value)
    }

    /// User Location Information with TAI and E-CGI
    pub fn uli(&mut self, tai: &EpsTai, e_cgi: &ECgi) -> S11BuildResult<()> {
        let mut value = Vec::with_capacity(1 + 5 + 7);
        value.push(ULI_TAI_PRESENT | ULI_ECGI_PRESENT);
        value.extend_from_slice(&tai.plmn_id.to_bytes());
        value.extend_from_slice(&tai.tac.to_be_bytes());
        value.extend_from_slice(&e_cgi.plmn_id.to_bytes());
        value.extend_from_slice(&(e_cgi.cell_id & 0x0fff_ffff).to_be_bytes());
        self.ie(ie_type::ULI, 0, &value)
    }

    pub fn flow_qos(&mut self, qos: &FlowQos) -> S11BuildResult<()> {
        let mut value = Vec::with_capacity(21);
        value.push(qos.qci);
        for rate in [qos.ul_mbr, qos.dl_mbr, qos.ul_gbr, qos.dl_gbr] {
            value.extend_from_slice(&rate.to_be_bytes()[3..]);
        }
        self.ie(ie_type::FLOW_QOS, 0, &value)
    }
}

/// TBCD digits, filler 0xf in the last odd nibble
fn encode_tbcd(digits: &str) -> Vec<u8> {
    let digits: Vec<u8> = digits
        .chars()
        .filter_map(|c| c.to_digit(10).map(|d| d as u8))
        .collect();
    digits
        .chunks(2)
        .map(|pair| match pair {
            [lo, hi] => (hi << 4) | lo,
            [lo] => 0xf0 | lo,
            _ => 0xff,
        })
        .collect()
}

// ============================================================================
// Default Builder
// ============================================================================

/// Builds the minimal IE set of every S11 message the MME sends
#[derive(Debug, Clone, Copy, Default)]
pub struct TlvS11Builder;

impl TlvS11Builder {
    fn ue_of<'a>(ctx: &'a MmeContext, mme_ue: MmeUeId) -> S11BuildResult<&'a MmeUe> {
        ctx.mme_ue_find(mme_ue).ok_or(S11BuildError::InvalidUe)
    }

    fn bearer_response(
        ctx: &MmeContext,
        bearer: BearerId,
        cause: GtpCause,
        with_s1u: bool,
    ) -> S11BuildResult<Bytes> {
        let bearer = ctx.bearer_find(bearer).ok_or(S11BuildError::InvalidBearer)?;
        let mut w = IeWriter::new();
        w.cause(cause)?;
        w.grouped(ie_type::BEARER_CONTEXT, 0, |b| {
            b.ebi(bearer.ebi, 0)?;
            b.cause(cause)?;
            if with_s1u {
                b.f_teid(0, f_teid_interface::S1_U_ENODEB_GTP_U, bearer.enb_s1u_teid)?;
            }
            Ok(())
        })?;
        Ok(w.freeze())
    }
}

impl S11Builder for TlvS11Builder {
    fn build(&self, ctx: &MmeContext, msg: &S11Message) -> S11BuildResult<Bytes> {
        log::debug!("Build {:?}", msg.message_type());

        match msg {
            S11Message::CreateSessionRequest { sess } => {
                let sess = ctx.sess_find(*sess).ok_or(S11BuildError::InvalidSession)?;
                let mme_ue = Self::ue_of(ctx, sess.mme_ue)?;
                let bearer = ctx
                    .default_bearer_in_sess(sess.id)
                    .and_then(|b| ctx.bearer_find(b))
                    .ok_or(S11BuildError::InvalidBearer)?;

                let mut w = IeWriter::new();
                w.imsi(&mme_ue.imsi_bcd)?;
                w.uli(&mme_ue.tai, &mme_ue.e_cgi)?;
                w.ie(ie_type::SERVING_NETWORK, 0, &mme_ue.tai.plmn_id.to_bytes())?;
                w.ie(ie_type::RAT_TYPE, 0, &[RAT_TYPE_EUTRAN])?;
                w.f_teid(0, f_teid_interface::S11_MME_GTP_C, mme_ue.mme_s11_teid)?;
                w.apn(&sess.apn)?;
                w.ie(ie_type::SELECTION_MODE, 0, &[0])?;
                w.ie(ie_type::PDN_TYPE, 0, &[PDN_TYPE_IPV4])?;
                w.grouped(ie_type::BEARER_CONTEXT, 0, |b| b.ebi(bearer.ebi, 0))?;
                Ok(w.freeze())
            }
            S11Message::ModifyBearerRequest {
                bearer,
                uli_presence,
            } => {
                let bearer = ctx.bearer_find(*bearer).ok_or(S11BuildError::InvalidBearer)?;
                let mme_ue = Self::ue_of(ctx, bearer.mme_ue)?;

                let mut w = IeWriter::new();
                if *uli_presence {
                    w.uli(&mme_ue.tai, &mme_ue.e_cgi)?;
                }
                w.grouped(ie_type::BEARER_CONTEXT, 0, |b| {
                    b.ebi(bearer.ebi, 0)?;
                    b.f_teid(0, f_teid_interface::S1_U_ENODEB_GTP_U, bearer.enb_s1u_teid)
                })?;
                Ok(w.freeze())
            }
            S11Message::DeleteSessionRequest { sess } => {
                let sess = ctx.sess_find(*sess).ok_or(S11BuildError::InvalidSession)?;
                let mme_ue = Self::ue_of(ctx, sess.mme_ue)?;
                let bearer = ctx
                    .default_bearer_in_sess(sess.id)
                    .and_then(|b| ctx.bearer_find(b))
                    .ok_or(S11BuildError::InvalidBearer)?;

                let mut w = IeWriter::new();
                w.ebi(bearer.ebi, 0)?;
                w.uli(&mme_ue.tai, &mme_ue.e_cgi)?;
                Ok(w.freeze())
            }
            S11Message::CreateBearerResponse { bearer, cause } => {
                Self::bearer_response(ctx, *bearer, *cause, true)
            }
            S11Message::UpdateBearerResponse { bearer, cause }
            | S11Message::DeleteBearerResponse { bearer, cause } => {
                Self::bearer_response(ctx, *bearer, *cause, false)
            }
            S11Message::ReleaseAccessBearersRequest { mme_ue } => {
                Self::ue_of(ctx, *mme_ue)?;
                Ok(Bytes::new())
            }
            S11Message::DownlinkDataNotificationAck { bearer, cause } => {
                ctx.bearer_find(*bearer).ok_or(S11BuildError::InvalidBearer)?;
                let mut w = IeWriter::new();
                w.cause(*cause)?;
                Ok(w.freeze())
            }
            S11Message::CreateIndirectDataForwardingTunnelRequest { mme_ue } => {
                Self::ue_of(ctx, *mme_ue)?;
                let mut w = IeWriter::new();
                for bearer in ctx.bearers_of_mme_ue(*mme_ue) {
                    let bearer = ctx.bearer_find(bearer).ok_or(S11BuildError::InvalidBearer)?;
                    w.grouped(ie_type::BEARER_CONTEXT, 0, |b| b.ebi(bearer.ebi, 0))?;
                }
                Ok(w.freeze())
            }
            S11Message::BearerResourceCommand { bearer, params } => {
                let bearer = ctx.bearer_find(*bearer).ok_or(S11BuildError::InvalidBearer)?;

                let mut w = IeWriter::new();
                w.ebi(params.linked_ebi, 0)?;
                w.ie(ie_type::PTI, 0, &[params.pti])?;
                if let Some(qos) = &params.flow_qos {
                    w.flow_qos(qos)?;
                }
                w.ie(ie_type::TAD, 0, &params.tad)?;
                if bearer.ebi != params.linked_ebi {
                    w.ebi(bearer.ebi, 1)?;
                }
                Ok(w.freeze())
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{PlmnId, SgwRegistry};
    use ogs_gtp::NodeId;
    use std::sync::Arc;

    fn context() -> (MmeContext, MmeUeId, SessId, BearerId) {
        let mut ctx = MmeContext::new(Arc::new(SgwRegistry::new()));
        let ue = ctx.mme_ue_add("001010123456789", NodeId(1));
        let mme_ue = ctx.mme_ue_find_mut(ue).unwrap();
        mme_ue.tai = EpsTai {
            plmn_id: PlmnId::new("001", "01"),
            tac: 1,
        };
        mme_ue.e_cgi = ECgi {
            plmn_id: PlmnId::new("001", "01"),
            cell_id: 0x19b01,
        };
        let sess = ctx.sess_add(ue, 1, "internet").unwrap();
        let bearer = ctx.default_bearer_in_sess(sess).unwrap();
        (ctx, ue, sess, bearer)
    }

    /// (type, instance, value) of every top level IE
    fn ies(buf: &[u8]) -> Vec<(u8, u8, Vec<u8>)> {
        let mut out = Vec::new();
        let mut rest = buf;
        while rest.len() >= 4 {
            let len = u16::from_be_bytes([rest[1], rest[2]]) as usize;
            out.push((rest[0], rest[3] & 0x0f, rest[4..4 + len].to_vec()));
            rest = &rest[4 + len..];
        }
        assert!(rest.is_empty());
        out
    }

    #[test]
    fn test_gtp_cause_from_u8() {
        assert_eq!(GtpCause::from(16), GtpCause::RequestAccepted);
        assert_eq!(GtpCause::from(64), GtpCause::ContextNotFound);
        assert_eq!(GtpCause::from(0), GtpCause::Reserved);
    }

    #[test]
    fn test_encode_tbcd() {
        assert_eq!(
            encode_tbcd("001010123456789"),
            vec![0x00, 0x01, 0x01, 0x21, 0x43, 0x65, 0x87, 0xf9]
        );
        assert_eq!(encode_tbcd("1234"), vec![0x21, 0x43]);
    }

    #[test]
    fn test_ie_too_long() {
        let mut w = IeWriter::new();
        let value = vec![0u8; u16::MAX as usize + 1];
        assert_eq!(
            w.ie(ie_type::TAD, 0, &value),
            Err(S11BuildError::IeTooLong {
                ie_type: ie_type::TAD,
                len: value.len()
            })
        );
        assert!(w.is_empty());
    }

    #[test]
    fn test_build_create_session_request() {
        let (ctx, _, sess, _) = context();
        let buf = TlvS11Builder
            .build(&ctx, &S11Message::CreateSessionRequest { sess })
            .unwrap();
        let ies = ies(&buf);

        let types: Vec<u8> = ies.iter().map(|(t, _, _)| *t).collect();
        assert_eq!(
            types,
            vec![
                ie_type::IMSI,
                ie_type::ULI,
                ie_type::SERVING_NETWORK,
                ie_type::RAT_TYPE,
                ie_type::F_TEID,
                ie_type::APN,
                ie_type::SELECTION_MODE,
                ie_type::PDN_TYPE,
                ie_type::BEARER_CONTEXT
            ]
        );
        assert_eq!(ies[5].2, b"\x08internet".to_vec());
        assert_eq!(ies[8].2, vec![ie_type::EBI, 0, 1, 0, 5]);
    }

    #[test]
    fn test_build_modify_bearer_request_uli() {
        let (ctx, _, _, bearer) = context();
        let with = TlvS11Builder
            .build(
                &ctx,
                &S11Message::ModifyBearerRequest {
                    bearer,
                    uli_presence: true,
                },
            )
            .unwrap();
        let without = TlvS11Builder
            .build(
                &ctx,
                &S11Message::ModifyBearerRequest {
                    bearer,
                    uli_presence: false,
                },
            )
            .unwrap();

        let with = ies(&with);
        assert_eq!(with[0].0, ie_type::ULI);
        assert_eq!(with[0].2[0], ULI_TAI_PRESENT | ULI_ECGI_PRESENT);
        assert_eq!(ies(&without)[0].0, ie_type::BEARER_CONTEXT);
    }

    #[test]
    fn test_build_bearer_responses() {
        let (ctx, _, _, bearer) = context();
        let buf = TlvS11Builder
            .build(
                &ctx,
                &S11Message::DeleteBearerResponse {
                    bearer,
                    cause: GtpCause::RequestAccepted,
                },
            )
            .unwrap();
        let ies = ies(&buf);
        assert_eq!(ies[0], (ie_type::CAUSE, 0, vec![16, 0]));
        assert_eq!(ies[1].0, ie_type::BEARER_CONTEXT);
    }

    #[test]
    fn test_build_bearer_resource_command() {
        let (mut ctx, _, sess, _) = context();
        let dedicated = ctx.bearer_add(sess).unwrap();
        let params = BearerResourceParams {
            linked_ebi: 5,
            pti: 3,
            tad: Bytes::from_static(&[0x21, 0x01]),
            flow_qos: Some(FlowQos {
                qci: 1,
                ul_mbr: 64,
                dl_mbr: 64,
                ul_gbr: 32,
                dl_gbr: 32,
            }),
        };
        let buf = TlvS11Builder
            .build(
                &ctx,
                &S11Message::BearerResourceCommand {
                    bearer: dedicated,
                    params,
                },
            )
            .unwrap();
        let ies = ies(&buf);
        assert_eq!(ies[0], (ie_type::EBI, 0, vec![5]));
        assert_eq!(ies[1], (ie_type::PTI, 0, vec![3]));
        assert_eq!(ies[2].0, ie_type::FLOW_QOS);
        assert_eq!(ies[2].2.len(), 21);
        assert_eq!(ies[3], (ie_type::TAD, 0, vec![0x21, 0x01]));
        assert_eq!(ies[4], (ie_type::EBI, 1, vec![6]));
    }

    #[test]
    fn test_build_missing_objects() {
        let (ctx, _, _, _) = context();
        assert_eq!(
            TlvS11Builder.build(&ctx, &S11Message::DeleteSessionRequest { sess: SessId(999) }),
            Err(S11BuildError::InvalidSession)
        );
        assert_eq!(
            TlvS11Builder.build(
                &ctx,
                &S11Message::ReleaseAccessBearersRequest {
                    mme_ue: MmeUeId(999)
                }
            ),
            Err(S11BuildError::InvalidUe)
        );
    }

    #[test]
    fn test_message_type() {
        let msg = S11Message::DownlinkDataNotificationAck {
            bearer: BearerId(1),
            cause: GtpCause::RequestAccepted,
        };
        assert_eq!(msg.message_type() as u8, 177);
    }
}
