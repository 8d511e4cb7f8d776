//! Test doubles for the S11 path

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use ogs_gtp::v2::{Gtp2Header, Gtp2MessageType};
use ogs_gtp::{NodeId, XactConfig, XactId};

use crate::context::{
    BearerId, EnbId, EnbUeId, MmeContext, MmeUeId, S1apCause, SessId, SgwRegistry,
    UeCtxRelAction,
};
use crate::gtp_path::{GtpPath, S11Receipt};
use crate::mme_path::MmePathHandler;
use crate::s11_build::{S11BuildError, S11BuildResult, S11Builder, S11Message, TlvS11Builder};
use crate::sm::MmeEvent;

pub use ogs_gtp::path::test_util::RecordingTransport;

pub const SGW_ADDR: &str = "127.0.0.3:2123";
pub const SGW_S11_TEID: u32 = 0x5000;
pub const N3: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerCall {
    UeContextRelease {
        enb_ue: EnbUeId,
        cause: S1apCause,
        action: UeCtxRelAction,
        /// Flag of the linked UE when the release was requested
        session_context_will_deleted: bool,
    },
    DeleteOrRelease {
        mme_ue: MmeUeId,
    },
}

#[derive(Clone, Default)]
pub struct RecordingHandler {
    calls: Rc<RefCell<Vec<HandlerCall>>>,
}

impl RecordingHandler {
    pub fn calls(&self) -> Vec<HandlerCall> {
        self.calls.borrow().clone()
    }
}

impl MmePathHandler for RecordingHandler {
    fn send_ue_context_release_command(
        &mut self,
        ctx: &MmeContext,
        enb_ue: EnbUeId,
        cause: S1apCause,
        action: UeCtxRelAction,
    ) {
        let session_context_will_deleted = ctx
            .enb_ue_find(enb_ue)
            .and_then(|e| e.mme_ue)
            .and_then(|m| ctx.mme_ue_find(m))
            .map_or(false, |ue| ue.session_context_will_deleted);
        self.calls.borrow_mut().push(HandlerCall::UeContextRelease {
            enb_ue,
            cause,
            action,
            session_context_will_deleted,
        });
    }

    fn send_delete_session_or_mme_ue_context_release(&mut self, _ctx: &MmeContext, mme_ue: MmeUeId) {
        self.calls
            .borrow_mut()
            .push(HandlerCall::DeleteOrRelease { mme_ue });
    }
}

/// Builder that rejects every message
pub struct FailingBuilder;

impl S11Builder for FailingBuilder {
    fn build(&self, _ctx: &MmeContext, _msg: &S11Message) -> S11BuildResult<Bytes> {
        Err(S11BuildError::IeTooLong {
            ie_type: 0,
            len: usize::MAX,
        })
    }
}

/// One SGW, one eNB and a UE linked to its S1 association, with one session
/// whose default bearer has an SGW data path.
pub struct Fixture {
    pub path: GtpPath,
    pub transport: RecordingTransport,
    pub handler: RecordingHandler,
    pub sgw: NodeId,
    pub enb: EnbId,
    pub enb_ue: EnbUeId,
    pub mme_ue: MmeUeId,
    pub sess: SessId,
    pub bearer: BearerId,
}

impl Fixture {
    pub fn xact_config() -> XactConfig {
        XactConfig {
            t3_response: Duration::from_secs(1),
            n3_response_retry: N3,
            max_xacts: 64,
        }
    }

    pub fn new() -> Self {
        Self::build(Self::xact_config(), Box::new(TlvS11Builder))
    }

    pub fn with_builder(builder: Box<dyn S11Builder>) -> Self {
        Self::build(Self::xact_config(), builder)
    }

    pub fn with_config(config: XactConfig) -> Self {
        Self::build(config, Box::new(TlvS11Builder))
    }

    fn build(config: XactConfig, builder: Box<dyn S11Builder>) -> Self {
        let mut sgws = SgwRegistry::new();
        let sgw = sgws.sgw_add(vec![SGW_ADDR.parse().unwrap()]);
        sgws.connect_all(true, false).unwrap();

        let mut ctx = MmeContext::new(Arc::new(sgws));
        let enb = ctx.enb_add(0x1234, None);
        let enb_ue = ctx.enb_ue_add(enb, 100).unwrap();
        let mme_ue = ctx.mme_ue_add("001010123456789", sgw);
        assert!(ctx.enb_ue_associate_mme_ue(enb_ue, mme_ue));
        ctx.mme_ue_find_mut(mme_ue).unwrap().sgw_s11_teid = SGW_S11_TEID;

        let sess = ctx.sess_add(mme_ue, 1, "internet").unwrap();
        let bearer = ctx.default_bearer_in_sess(sess).unwrap();
        ctx.bearer_find_mut(bearer).unwrap().sgw_s1u_teid = 0x6000;

        let transport = RecordingTransport::default();
        let handler = RecordingHandler::default();
        let path = GtpPath::new(
            ctx,
            config,
            Box::new(transport.clone()),
            builder,
            Box::new(handler.clone()),
        );

        Self {
            path,
            transport,
            handler,
            sgw,
            enb,
            enb_ue,
            mme_ue,
            sess,
            bearer,
        }
    }

    /// Add a session to the fixture UE, with or without an SGW data path.
    pub fn add_sess(&mut self, apn: &str, with_path: bool) -> SessId {
        let ctx = self.path.ctx_mut();
        let sess = ctx.sess_add(self.mme_ue, 2, apn).unwrap();
        if with_path {
            let bearer = ctx.default_bearer_in_sess(sess).unwrap();
            ctx.bearer_find_mut(bearer).unwrap().sgw_s1u_teid = 0x6001;
        }
        sess
    }

    /// Headers of every datagram sent so far
    pub fn sent(&self) -> Vec<Gtp2Header> {
        self.transport
            .datagrams()
            .into_iter()
            .map(|buf| Gtp2Header::decode(&mut Bytes::from(buf)).unwrap())
            .collect()
    }

    /// Run the timers until every local request gave up; returns how many did.
    pub fn expire_all(&mut self) -> usize {
        let t3 = self.path.xacts().config().t3_response;
        let base = Instant::now();
        (1..=N3 + 1)
            .map(|i| self.path.poll_timers(base + t3 * (10 * i)))
            .sum()
    }

    /// Feed a message from the SGW addressed to the fixture UE.
    pub fn receive(&mut self, message_type: Gtp2MessageType, xid: u32) -> S11Receipt {
        let teid = self.path.ctx().mme_ue_find(self.mme_ue).unwrap().mme_s11_teid;
        // Cause IE, Request accepted
        let payload = [2u8, 0, 2, 0, 16, 0];
        let pkbuf = Gtp2Header::new(message_type as u8, teid, xid)
            .encode_message(&payload)
            .unwrap();
        self.path
            .receive_s11(MmeEvent::s11_message(self.sgw, pkbuf))
            .unwrap()
    }

    /// Answer a committed local request.
    pub fn respond(&mut self, xact: XactId, message_type: Gtp2MessageType) -> S11Receipt {
        let xid = self.path.xacts().find(xact).unwrap().xid();
        self.receive(message_type, xid)
    }
}
