//! MME GTP Path Management
//!
//! S11 side of the MME: sends GTPv2-C requests to the SGW-C on local
//! transactions, answers SGW requests on remote ones, recovers when the SGW
//! stops answering, and moves received datagrams from the sockets onto the
//! MME event queue.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use ogs_gtp::v2::{Gtp2Header, Gtp2MessageType};
use ogs_gtp::{
    GtpError, GtpTransport, NodeId, XactConfig, XactId, XactReceipt, XactRegistry, XactState,
    XactTimeout, MAX_SDU_LEN,
};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::MmeConfig;
use crate::context::{
    BearerId, EnbId, EnbUe, EnbUeId, MmeContext, MmeUeId, RemovedObjects, S1apCause, SessId,
    SgwRegistry, UeCtxRelAction,
};
use crate::event::{EventSink, PeerResolver, QueueError};
use crate::mme_path::MmePathHandler;
use crate::s11_build::{BearerResourceParams, GtpCause, S11BuildError, S11Builder, S11Message};
use crate::sm::{EsmState, MmeEvent};

// ============================================================================
// Errors
// ============================================================================

pub type GtpPathResult<T> = Result<T, GtpPathError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GtpPathError {
    #[error("GTP error: {0}")]
    Gtp(#[from] GtpError),
    #[error("Build error: {0}")]
    Build(#[from] S11BuildError),
    #[error("Socket error: {0}")]
    Socket(String),
    #[error("Context not found")]
    ContextNotFound,
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

// ============================================================================
// Actions
// ============================================================================

/// What to do once a Delete Session exchange finishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GtpDeleteAction {
    SendAuthenticationRequest = 1,
    SendDetachAccept = 2,
    SendDeactivateBearerContextRequest = 3,
    SendReleaseWithUeContextRemove = 4,
    SendReleaseWithS1RemoveAndUnlink = 5,
    HandlePdnConnectivityRequest = 6,
    InPathSwitchRequest = 7,
}

/// What to do once a Release Access Bearers exchange finishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GtpReleaseAction {
    SendUeContextReleaseCommand = 1,
    RemoveByLoConnRefused = 2,
    RemoveByResetAll = 3,
    RemoveByResetPartial = 4,
}

/// What to do once a Delete Indirect Data Forwarding Tunnel exchange finishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeleteIndirectAction {
    HandoverComplete = 1,
    HandoverCancel = 2,
}

// ============================================================================
// Transaction data
// ============================================================================

/// Domain object a local transaction belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XactOwner {
    MmeUe(MmeUeId),
    Sess(SessId),
    Bearer(BearerId),
}

impl fmt::Display for XactOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XactOwner::MmeUe(id) => write!(f, "MME_UE[{}]", id),
            XactOwner::Sess(id) => write!(f, "SESS[{}]", id),
            XactOwner::Bearer(id) => write!(f, "BEARER[{}]", id),
        }
    }
}

/// Request carried by a local transaction, with its continuation action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S11Request {
    CreateSession,
    ModifyBearer,
    DeleteSession(GtpDeleteAction),
    ReleaseAccessBearers(GtpReleaseAction),
    CreateIndirectTunnel,
    DeleteIndirectTunnel(DeleteIndirectAction),
    BearerResourceCommand,
}

impl S11Request {
    pub fn message_type(&self) -> Gtp2MessageType {
        match self {
            S11Request::CreateSession => Gtp2MessageType::CreateSessionRequest,
            S11Request::ModifyBearer => Gtp2MessageType::ModifyBearerRequest,
            S11Request::DeleteSession(_) => Gtp2MessageType::DeleteSessionRequest,
            S11Request::ReleaseAccessBearers(_) => Gtp2MessageType::ReleaseAccessBearersRequest,
            S11Request::CreateIndirectTunnel => {
                Gtp2MessageType::CreateIndirectDataForwardingTunnelRequest
            }
            S11Request::DeleteIndirectTunnel(_) => {
                Gtp2MessageType::DeleteIndirectDataForwardingTunnelRequest
            }
            S11Request::BearerResourceCommand => Gtp2MessageType::BearerResourceCommand,
        }
    }
}

/// Owner data of an S11 local transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct S11XactData {
    pub owner: XactOwner,
    pub request: S11Request,
}

/// What `receive_s11` made of a queued datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum S11Receipt {
    /// Reply to one of our requests; the transaction is complete.
    Response {
        xact: XactId,
        header: Gtp2Header,
        data: Option<S11XactData>,
        body: Bytes,
    },
    /// SGW request to be handled and answered on `xact`.
    Request {
        xact: XactId,
        header: Gtp2Header,
        mme_ue: Option<MmeUeId>,
        /// Command transaction the request was triggered by
        triggered_by: Option<S11XactData>,
        body: Bytes,
    },
    /// Retransmission, already handled by the transaction layer
    Duplicate { xact: XactId },
    /// Reply nobody waits for any more
    Discarded,
}

// ============================================================================
// GTP Path
// ============================================================================

/// S11 path of the MME
///
/// Owns the domain context and the transaction registry; both are only ever
/// touched from the MME event loop.
pub struct GtpPath {
    ctx: MmeContext,
    xacts: XactRegistry<GtpPath, S11XactData>,
    transport: Box<dyn GtpTransport>,
    builder: Box<dyn S11Builder>,
    handler: Box<dyn MmePathHandler>,
}

impl GtpPath {
    pub fn new(
        ctx: MmeContext,
        config: XactConfig,
        transport: Box<dyn GtpTransport>,
        builder: Box<dyn S11Builder>,
        handler: Box<dyn MmePathHandler>,
    ) -> Self {
        Self {
            ctx,
            xacts: XactRegistry::new(config),
            transport,
            builder,
            handler,
        }
    }

    pub fn ctx(&self) -> &MmeContext {
        &self.ctx
    }

    pub fn ctx_mut(&mut self) -> &mut MmeContext {
        &mut self.ctx
    }

    pub fn xacts(&self) -> &XactRegistry<GtpPath, S11XactData> {
        &self.xacts
    }

    /// MME UE an owner belongs to, if the whole chain is still alive
    fn owner_mme_ue(&self, owner: XactOwner) -> Option<MmeUeId> {
        let mme_ue = match owner {
            XactOwner::MmeUe(id) => id,
            XactOwner::Sess(id) => self.ctx.sess_find(id)?.mme_ue,
            XactOwner::Bearer(id) => {
                let bearer = self.ctx.bearer_find(id)?;
                self.ctx.sess_find(bearer.sess)?.mme_ue
            }
        };
        self.ctx.mme_ue_find(mme_ue).map(|ue| ue.id)
    }

    fn missing_mme_ue(&self, what: fmt::Arguments<'_>) -> GtpPathError {
        log::error!("No MME UE for {}", what);
        if cfg!(debug_assertions) {
            panic!("No MME UE for {}", what);
        }
        GtpPathError::ContextNotFound
    }

    fn send_request(
        &mut self,
        owner: XactOwner,
        request: S11Request,
        msg: Option<S11Message>,
    ) -> GtpPathResult<XactId> {
        let Some(mme_ue) = self.owner_mme_ue(owner) else {
            return Err(self.missing_mme_ue(format_args!("{:?} {}", request, owner)));
        };
        let ue = self.ctx.mme_ue_find(mme_ue).ok_or(GtpPathError::ContextNotFound)?;
        let (imsi_bcd, sgw, teid) = (ue.imsi_bcd.clone(), ue.sgw, ue.sgw_s11_teid);
        let message_type = request.message_type() as u8;

        let payload = match &msg {
            Some(msg) => self.builder.build(&self.ctx, msg).map_err(|e| {
                log::error!("[{}] Build Message-Type[{}] failed: {}", imsi_bcd, message_type, e);
                e
            })?,
            None => Bytes::new(),
        };

        let sgws = Arc::clone(&self.ctx.sgws);
        let node = sgws.find_by_id(sgw).ok_or_else(|| {
            log::error!("[{}] Unknown SGW node [{}]", imsi_bcd, sgw);
            GtpPathError::InvalidState(format!("unknown SGW node {}", sgw))
        })?;

        let header = Gtp2Header::new(message_type, teid, 0);
        let xact = self
            .xacts
            .local_create(node, &header, payload, gtp_timeout, S11XactData { owner, request })
            .map_err(|e| {
                log::error!("[{}] Message-Type[{}] xact failed: {}", imsi_bcd, message_type, e);
                e
            })?;

        if request == S11Request::BearerResourceCommand {
            if let Err(e) = self.xacts.mark_command(xact) {
                self.xacts.remove(xact);
                return Err(e.into());
            }
        }
        if let Err(e) = self.xacts.commit(xact, &*self.transport) {
            log::error!("[{}] Message-Type[{}] commit failed: {}", imsi_bcd, message_type, e);
            self.xacts.remove(xact);
            return Err(e.into());
        }

        log::debug!("[{}] {:?} sent [xact:{}]", imsi_bcd, request, xact);
        Ok(xact)
    }

    fn send_response(&mut self, bearer: BearerId, msg: S11Message) -> GtpPathResult<()> {
        let message_type = msg.message_type() as u8;
        let b = self.ctx.bearer_find(bearer).ok_or(GtpPathError::ContextNotFound)?;
        let (ebi, mme_ue, bound) = (b.ebi, b.mme_ue, b.xact);

        let Some(xact) = bound.filter(|x| self.awaits_reply(*x)) else {
            log::error!(
                "[EBI:{}] No outstanding request to answer with Message-Type[{}]",
                ebi,
                message_type
            );
            if let Some(b) = self.ctx.bearer_find_mut(bearer) {
                b.xact = None;
            }
            return Err(GtpError::XactNotFound(format!("bearer {} has no outstanding request", bearer))
                .into());
        };

        let Some(teid) = self.ctx.mme_ue_find(mme_ue).map(|ue| ue.sgw_s11_teid) else {
            return Err(self.missing_mme_ue(format_args!("bearer {}", bearer)));
        };

        let payload = self.builder.build(&self.ctx, &msg)?;
        let header = Gtp2Header::new(message_type, teid, 0);
        self.xacts.update_tx(xact, &header, payload)?;
        self.xacts.commit(xact, &*self.transport)?;

        if let Some(b) = self.ctx.bearer_find_mut(bearer) {
            b.xact = None;
        }
        log::debug!("[EBI:{}] Message-Type[{}] sent [xact:{}]", ebi, message_type, xact);
        Ok(())
    }

    /// A peer request still waiting for its reply
    fn awaits_reply(&self, xact: XactId) -> bool {
        self.xacts
            .find(xact)
            .map_or(false, |x| x.state() == XactState::RequestReceived)
    }

    /// Record the SGW request a bearer must answer.
    pub fn bearer_bind_xact(&mut self, bearer: BearerId, xact: XactId) -> GtpPathResult<()> {
        if !self.awaits_reply(xact) {
            return Err(GtpError::XactNotFound(format!("xact {} awaits no reply", xact)).into());
        }
        let b = self.ctx.bearer_find(bearer).ok_or(GtpPathError::ContextNotFound)?;
        if let Some(pending) = b.xact.filter(|x| *x != xact && self.awaits_reply(*x)) {
            return Err(GtpPathError::InvalidState(format!(
                "EBI[{}] already answers xact {}",
                b.ebi, pending
            )));
        }
        if let Some(b) = self.ctx.bearer_find_mut(bearer) {
            b.xact = Some(xact);
        }
        Ok(())
    }
}

// ============================================================================
// Request Senders
// ============================================================================

impl GtpPath {
    pub fn send_create_session_request(&mut self, sess: SessId) -> GtpPathResult<XactId> {
        self.send_request(
            XactOwner::Sess(sess),
            S11Request::CreateSession,
            Some(S11Message::CreateSessionRequest { sess }),
        )
    }

    pub fn send_modify_bearer_request(
        &mut self,
        bearer: BearerId,
        uli_presence: bool,
    ) -> GtpPathResult<XactId> {
        self.send_request(
            XactOwner::Bearer(bearer),
            S11Request::ModifyBearer,
            Some(S11Message::ModifyBearerRequest {
                bearer,
                uli_presence,
            }),
        )
    }

    pub fn send_delete_session_request(
        &mut self,
        sess: SessId,
        action: GtpDeleteAction,
    ) -> GtpPathResult<XactId> {
        self.send_request(
            XactOwner::Sess(sess),
            S11Request::DeleteSession(action),
            Some(S11Message::DeleteSessionRequest { sess }),
        )
    }

    /// Delete every session of a UE.
    ///
    /// Sessions with an SGW data path get a Delete Session Request, the others
    /// are removed at once. Returns the transactions that were started.
    pub fn send_delete_all_sessions(
        &mut self,
        mme_ue: MmeUeId,
        action: GtpDeleteAction,
    ) -> Vec<XactId> {
        let Some(ue) = self.ctx.mme_ue_find_mut(mme_ue) else {
            self.missing_mme_ue(format_args!("delete all sessions [{}]", mme_ue));
            return Vec::new();
        };
        if ue.session_context_will_deleted {
            log::warn!("[{}] Delete-Session-Request has already sent", ue.imsi_bcd);
            return Vec::new();
        }
        ue.session_context_will_deleted = true;
        let sess_list = ue.sess_list.clone();

        let mut sent = Vec::new();
        for sess in sess_list {
            if !self.ctx.sess_have_sgw_s1u_path(sess) {
                self.sess_remove(sess);
                continue;
            }

            let pdn_will_disconnect = self
                .ctx
                .default_bearer_in_sess(sess)
                .and_then(|b| self.ctx.bearer_find(b))
                .filter(|b| b.esm_state == EsmState::PdnWillDisconnect);
            if let Some(bearer) = pdn_will_disconnect {
                log::warn!("PDN will disconnect[EBI:{}]", bearer.ebi);
                continue;
            }

            match self.send_delete_session_request(sess, action) {
                Ok(xact) => sent.push(xact),
                Err(e) => log::error!("Delete-Session-Request for session [{}] failed: {}", sess, e),
            }
        }
        sent
    }

    pub fn send_release_access_bearers_request(
        &mut self,
        mme_ue: MmeUeId,
        action: GtpReleaseAction,
    ) -> GtpPathResult<XactId> {
        self.send_request(
            XactOwner::MmeUe(mme_ue),
            S11Request::ReleaseAccessBearers(action),
            Some(S11Message::ReleaseAccessBearersRequest { mme_ue }),
        )
    }

    /// Release every UE served by an eNB.
    ///
    /// Returns the Release Access Bearers transactions that were started.
    pub fn send_release_all_ue_in_enb(
        &mut self,
        enb: EnbId,
        action: GtpReleaseAction,
    ) -> Vec<XactId> {
        let Some(enb_ue_list) = self.ctx.enb_find(enb).map(|e| e.enb_ue_list.clone()) else {
            log::warn!("eNB [{}] already removed", enb);
            return Vec::new();
        };

        let mut sent = Vec::new();
        for enb_ue in enb_ue_list {
            let Some(e) = self.ctx.enb_ue_find(enb_ue) else {
                continue;
            };

            if let Some(mme_ue) = e.mme_ue {
                match self.send_release_access_bearers_request(mme_ue, action) {
                    Ok(xact) => sent.push(xact),
                    Err(err) => log::error!(
                        "Release-Access-Bearers-Request for MME UE [{}] failed: {}",
                        mme_ue,
                        err
                    ),
                }
                continue;
            }

            log::warn!("send_release_all_ue_in_enb()");
            log::warn!(
                "    ENB_UE_S1AP_ID[{}] MME_UE_S1AP_ID[{}] Action[{}]",
                e.enb_ue_s1ap_id,
                e.mme_ue_s1ap_id,
                action as u8
            );
            match action {
                GtpReleaseAction::RemoveByLoConnRefused | GtpReleaseAction::RemoveByResetAll => {
                    self.enb_ue_remove(enb_ue);
                }
                GtpReleaseAction::SendUeContextReleaseCommand
                | GtpReleaseAction::RemoveByResetPartial => {
                    panic!(
                        "Unsupported action [{:?}] for ENB_UE_S1AP_ID[{}] without MME UE",
                        action, e.enb_ue_s1ap_id
                    );
                }
            }
        }
        sent
    }

    pub fn send_create_indirect_data_forwarding_tunnel_request(
        &mut self,
        mme_ue: MmeUeId,
    ) -> GtpPathResult<XactId> {
        self.send_request(
            XactOwner::MmeUe(mme_ue),
            S11Request::CreateIndirectTunnel,
            Some(S11Message::CreateIndirectDataForwardingTunnelRequest { mme_ue }),
        )
    }

    /// The request carries no IE.
    pub fn send_delete_indirect_data_forwarding_tunnel_request(
        &mut self,
        mme_ue: MmeUeId,
        action: DeleteIndirectAction,
    ) -> GtpPathResult<XactId> {
        self.send_request(
            XactOwner::MmeUe(mme_ue),
            S11Request::DeleteIndirectTunnel(action),
            None,
        )
    }

    pub fn send_bearer_resource_command(
        &mut self,
        bearer: BearerId,
        params: BearerResourceParams,
    ) -> GtpPathResult<XactId> {
        self.send_request(
            XactOwner::Bearer(bearer),
            S11Request::BearerResourceCommand,
            Some(S11Message::BearerResourceCommand { bearer, params }),
        )
    }
}

// ============================================================================
// Response Senders
// ============================================================================

impl GtpPath {
    pub fn send_create_bearer_response(
        &mut self,
        bearer: BearerId,
        cause: GtpCause,
    ) -> GtpPathResult<()> {
        self.send_response(bearer, S11Message::CreateBearerResponse { bearer, cause })
    }

    pub fn send_update_bearer_response(
        &mut self,
        bearer: BearerId,
        cause: GtpCause,
    ) -> GtpPathResult<()> {
        self.send_response(bearer, S11Message::UpdateBearerResponse { bearer, cause })
    }

    pub fn send_delete_bearer_response(
        &mut self,
        bearer: BearerId,
        cause: GtpCause,
    ) -> GtpPathResult<()> {
        self.send_response(bearer, S11Message::DeleteBearerResponse { bearer, cause })
    }

    pub fn send_downlink_data_notification_ack(
        &mut self,
        bearer: BearerId,
        cause: GtpCause,
    ) -> GtpPathResult<()> {
        self.send_response(bearer, S11Message::DownlinkDataNotificationAck { bearer, cause })
    }
}

// ============================================================================
// Removal, receive and timers
// ============================================================================

impl GtpPath {
    fn cancel_owned(&mut self, removed: &RemovedObjects) {
        if removed.is_empty() {
            return;
        }
        let cancelled = self.xacts.cancel_where(|data| match data.owner {
            XactOwner::MmeUe(id) => removed.mme_ues.contains(&id),
            XactOwner::Sess(id) => removed.sesses.contains(&id),
            XactOwner::Bearer(id) => removed.bearers.contains(&id),
        });
        for xact in &removed.bearer_xacts {
            self.xacts.remove(*xact);
        }
        if !cancelled.is_empty() {
            log::debug!("{} transaction(s) cancelled with their owner", cancelled.len());
        }
    }

    /// Remove a session and invalidate every transaction it owns.
    pub fn sess_remove(&mut self, sess: SessId) -> RemovedObjects {
        let removed = self.ctx.sess_remove(sess);
        self.cancel_owned(&removed);
        removed
    }

    /// Remove a UE with its sessions and invalidate their transactions.
    pub fn mme_ue_remove(&mut self, mme_ue: MmeUeId) -> RemovedObjects {
        let removed = self.ctx.mme_ue_remove(mme_ue);
        self.cancel_owned(&removed);
        removed
    }

    /// Remove an S1 association; the linked UE loses its access leg.
    pub fn enb_ue_remove(&mut self, enb_ue: EnbUeId) -> Option<EnbUe> {
        self.ctx.enb_ue_remove(enb_ue)
    }

    /// Correlate a queued S11 datagram with the transaction layer.
    pub fn receive_s11(&mut self, event: MmeEvent) -> GtpPathResult<S11Receipt> {
        let mut body = event.pkbuf;
        let header = Gtp2Header::decode(&mut body)?;

        let sgws = Arc::clone(&self.ctx.sgws);
        let node = sgws
            .find_by_id(event.sgw)
            .ok_or_else(|| GtpPathError::InvalidState(format!("unknown SGW node {}", event.sgw)))?;
        let mme_ue = header
            .teid
            .filter(|teid| *teid != 0)
            .and_then(|teid| self.ctx.mme_ue_find_by_s11_local_teid(teid));

        match self.xacts.receive(node, &header, &*self.transport) {
            Ok(XactReceipt::Response { xact, data, .. }) => Ok(S11Receipt::Response {
                xact,
                header,
                data,
                body,
            }),
            Ok(XactReceipt::Request { xact }) => Ok(S11Receipt::Request {
                xact,
                header,
                mme_ue,
                triggered_by: None,
                body,
            }),
            Ok(XactReceipt::Triggered { xact }) => {
                let triggered_by = self.xacts.find(xact).and_then(|x| x.data().copied());
                Ok(S11Receipt::Request {
                    xact,
                    header,
                    mme_ue,
                    triggered_by,
                    body,
                })
            }
            Ok(XactReceipt::Duplicate { xact }) => Ok(S11Receipt::Duplicate { xact }),
            Err(GtpError::XactNotFound(msg)) => {
                log::warn!("Message-Type[{}] discarded: {}", header.message_type, msg);
                Ok(S11Receipt::Discarded)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Drive retransmissions and run recovery for requests that gave up.
    pub fn poll_timers(&mut self, now: Instant) -> usize {
        let expired = self.xacts.poll_timers(now, &*self.transport);
        let count = expired.len();
        for xact in expired {
            xact.fire(self);
        }
        count
    }
}

// ============================================================================
// Timeout Recovery
// ============================================================================

fn gtp_timeout(path: &mut GtpPath, timeout: XactTimeout<S11XactData>) {
    let S11XactData { owner, request } = timeout.data;
    if timeout.message_type != request.message_type() as u8 {
        panic!("Invalid type [{}] for {:?}", timeout.message_type, request);
    }
    let Some(mme_ue) = path.owner_mme_ue(owner) else {
        panic!(
            "No MME UE for {} Message-Type[{}]",
            owner, timeout.message_type
        );
    };

    match request {
        S11Request::DeleteSession(_) => {
            let enb_ue = match path.ctx.mme_ue_find_mut(mme_ue) {
                Some(ue) => {
                    ue.session_context_will_deleted = false;
                    ue.enb_ue
                }
                None => None,
            };

            match enb_ue.filter(|e| path.ctx.enb_ue_find(*e).is_some()) {
                Some(enb_ue) => path.handler.send_ue_context_release_command(
                    &path.ctx,
                    enb_ue,
                    S1apCause::nas_normal_release(),
                    UeCtxRelAction::UeContextRemove,
                ),
                None => log::warn!("No S1 Context"),
            }
        }
        S11Request::BearerResourceCommand => {}
        S11Request::CreateSession
        | S11Request::ModifyBearer
        | S11Request::ReleaseAccessBearers(_)
        | S11Request::CreateIndirectTunnel
        | S11Request::DeleteIndirectTunnel(_) => {
            path.handler
                .send_delete_session_or_mme_ue_context_release(&path.ctx, mme_ue);
        }
    }

    let imsi_bcd = path
        .ctx
        .mme_ue_find(mme_ue)
        .map(|ue| ue.imsi_bcd.as_str())
        .unwrap_or_default();
    log::error!(
        "GTP Timeout : IMSI[{}] Message-Type[{}]",
        imsi_bcd,
        timeout.message_type
    );
}

// ============================================================================
// Receive Dispatcher
// ============================================================================

/// Result of handling one read on a GTP-C socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvOutcome {
    Queued(NodeId),
    ReadFailed,
    UnknownPeer,
    QueueFailed(QueueError),
}

/// Hand one received datagram to the MME event queue.
pub fn gtp_recv_cb(
    peers: &dyn PeerResolver,
    queue: &dyn EventSink,
    read: io::Result<(usize, SocketAddr)>,
    buf: &[u8],
) -> RecvOutcome {
    let (len, from) = match read {
        Ok((0, from)) => {
            log::error!("Empty datagram from [{}]", from);
            return RecvOutcome::ReadFailed;
        }
        Ok(read) => read,
        Err(e) => {
            log::error!("recv_from() failed: {}", e);
            return RecvOutcome::ReadFailed;
        }
    };
    let Some(data) = buf.get(..len) else {
        log::error!("recv_from() reported {} bytes for a {} byte buffer", len, buf.len());
        return RecvOutcome::ReadFailed;
    };

    let Some(sgw) = peers.resolve_peer(&from) else {
        log::error!("Unknown SGW : {}", from);
        return RecvOutcome::UnknownPeer;
    };

    match queue.push_event(MmeEvent::s11_message(sgw, Bytes::copy_from_slice(data))) {
        Ok(()) => RecvOutcome::Queued(sgw),
        Err(e) => {
            log::error!("Event queue push failed: {}", e);
            RecvOutcome::QueueFailed(e)
        }
    }
}

/// Receive loop of one GTP-C socket
pub async fn gtp_recv_loop(
    socket: Arc<UdpSocket>,
    peers: Arc<SgwRegistry>,
    queue: mpsc::Sender<MmeEvent>,
) {
    let mut buf = vec![0u8; MAX_SDU_LEN];
    loop {
        let read = socket.recv_from(&mut buf).await;
        if gtp_recv_cb(&*peers, &queue, read, &buf) == RecvOutcome::QueueFailed(QueueError::Closed) {
            log::info!("Event queue closed, GTP-C receive stopped");
            break;
        }
    }
}

// ============================================================================
// Sockets
// ============================================================================

/// GTP-C server sockets grouped by address family
#[derive(Debug, Clone, Default)]
pub struct GtpSockets {
    pub v4: Vec<Arc<UdpSocket>>,
    pub v6: Vec<Arc<UdpSocket>>,
}

impl GtpSockets {
    async fn bind_all(addrs: &[SocketAddr]) -> Vec<Arc<UdpSocket>> {
        let mut sockets = Vec::with_capacity(addrs.len());
        for addr in addrs {
            match UdpSocket::bind(*addr).await {
                Ok(socket) => {
                    log::info!(
                        "gtp_server() [{}]",
                        socket.local_addr().unwrap_or(*addr)
                    );
                    sockets.push(Arc::new(socket));
                }
                Err(e) => log::warn!("gtp_server() [{}] failed: {}", addr, e),
            }
        }
        sockets
    }

    /// Bind every configured address; at least one must succeed.
    pub async fn bind(v4: &[SocketAddr], v6: &[SocketAddr]) -> GtpPathResult<Self> {
        let sockets = Self {
            v4: Self::bind_all(v4).await,
            v6: Self::bind_all(v6).await,
        };
        if sockets.v4.is_empty() && sockets.v6.is_empty() {
            return Err(GtpPathError::Socket(
                "no GTP-C server socket could be opened".to_string(),
            ));
        }
        Ok(sockets)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<UdpSocket>> {
        self.v4.iter().chain(self.v6.iter())
    }

    pub fn len(&self) -> usize {
        self.v4.len() + self.v6.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl GtpTransport for GtpSockets {
    /// Sends from the first socket of the target's family.
    fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        let socket = if target.is_ipv4() {
            self.v4.first()
        } else {
            self.v6.first()
        };
        match socket {
            Some(socket) => socket.try_send_to(buf, target),
            None => Err(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no local socket for {}", target),
            )),
        }
    }
}

/// Open GTP-C sockets and receive tasks
pub struct GtpServer {
    pub sgws: Arc<SgwRegistry>,
    pub sockets: GtpSockets,
    tasks: Vec<JoinHandle<()>>,
}

/// Bind the GTP-C server sockets, connect the SGW peers and start receiving.
pub async fn gtp_open(
    config: &MmeConfig,
    queue: mpsc::Sender<MmeEvent>,
) -> GtpPathResult<GtpServer> {
    let (v4, v6) = config.gtpc_server_addrs();
    let sockets = GtpSockets::bind(&v4, &v6).await?;

    let mut sgws = SgwRegistry::new();
    for addr in config.sgw_addrs() {
        sgws.sgw_add(vec![addr]);
    }
    sgws.connect_all(!sockets.v4.is_empty(), !sockets.v6.is_empty())?;
    let sgws = Arc::new(sgws);

    let tasks = sockets
        .iter()
        .map(|socket| {
            tokio::spawn(gtp_recv_loop(
                Arc::clone(socket),
                Arc::clone(&sgws),
                queue.clone(),
            ))
        })
        .collect();

    Ok(GtpServer {
        sgws,
        sockets,
        tasks,
    })
}

/// Stop the receive tasks.
pub fn gtp_close(server: GtpServer) {
    for task in server.tasks {
        task.abort();
    }
    log::info!("GTP-C path closed");
}
