//! GTPv2-C Transactions
//!
//! Every GTP-C request lives in a transaction until it is answered or gives
//! up. Local transactions carry requests this node originates: they are
//! retransmitted every T3 and, once N3 transmissions went unanswered, handed
//! back to the owner through its timeout callback. Remote transactions carry
//! peer requests: they wait for the local reply and then stay around for a
//! holding period so that retransmitted requests are answered from the stored
//! reply instead of being processed twice.
//!
//! Transactions are keyed by peer, origin and the 24-bit transaction id (xid)
//! carried in the header sequence number field. Bearer resource commands put
//! `GTP_CMD_XACT_ID` into their xid so that the bearer requests a PGW sends
//! back for them (3GPP TS 29.274 clause 7.6) find the command transaction.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::error::{GtpError, GtpResult};
use crate::node::{GtpNode, NodeId};
use crate::path::{gtp_sendto, GtpTransport};
use crate::v2::header::{Gtp2Header, Gtp2MessageType};

/// Marker bit for command-triggered transaction ids
pub const GTP_CMD_XACT_ID: u32 = 0x80_0000;

/// Largest ordinary xid; ordinary ids never touch the command bit
const GTP_MAX_XACT_ID: u32 = GTP_CMD_XACT_ID - 1;

/// Default T3-RESPONSE timer
pub const GTP_T3_RESPONSE_DURATION: Duration = Duration::from_secs(3);

/// Default N3-REQUESTS (total transmissions of one request)
pub const GTP_N3_RESPONSE_RETRY_COUNT: u32 = 3;

/// Default transaction pool size
pub const GTP_MAX_NUM_OF_XACT: usize = 4096;

/// Transaction pool identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct XactId(pub u64);

impl fmt::Display for XactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side opened the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum XactOrigin {
    Local,
    Remote,
}

impl fmt::Display for XactOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XactOrigin::Local => write!(f, "LOCAL"),
            XactOrigin::Remote => write!(f, "REMOTE"),
        }
    }
}

/// Transaction state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XactState {
    /// Local request built, not yet committed
    Created,
    /// Local request sent, T3 armed
    WaitingResponse,
    /// Peer request received, no reply attached yet
    RequestReceived,
    /// Reply attached, not yet committed
    ResponseReady,
    /// Reply sent, kept to answer retransmissions
    Holding,
}

/// Timer configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XactConfig {
    pub t3_response: Duration,
    /// Transmissions of one request before it times out
    pub n3_response_retry: u32,
    pub max_xacts: usize,
}

impl Default for XactConfig {
    fn default() -> Self {
        Self {
            t3_response: GTP_T3_RESPONSE_DURATION,
            n3_response_retry: GTP_N3_RESPONSE_RETRY_COUNT,
            max_xacts: GTP_MAX_NUM_OF_XACT,
        }
    }
}

impl XactConfig {
    /// How long an answered peer request is remembered
    pub fn holding_duration(&self) -> Duration {
        self.t3_response * self.n3_response_retry.max(1)
    }
}

/// What a timeout callback receives about the transaction that gave up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XactTimeout<D> {
    pub xact: XactId,
    pub node: NodeId,
    pub message_type: u8,
    pub xid: u32,
    pub data: D,
}

/// Timeout callback, invoked with the owner's context
pub type XactTimeoutFn<C, D> = fn(&mut C, XactTimeout<D>);

/// A local transaction that exhausted its retransmissions.
///
/// The transaction is already gone from the registry; `fire` hands the owner
/// data to the stored callback.
pub struct ExpiredXact<C, D> {
    timeout: XactTimeout<D>,
    cb: XactTimeoutFn<C, D>,
}

impl<C, D> ExpiredXact<C, D> {
    pub fn timeout(&self) -> &XactTimeout<D> {
        &self.timeout
    }

    pub fn fire(self, ctx: &mut C) {
        (self.cb)(ctx, self.timeout)
    }
}

/// Outcome of matching an incoming message against the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XactReceipt<D> {
    /// Reply to a local request; the transaction is complete and removed.
    Response {
        xact: XactId,
        request_type: u8,
        data: Option<D>,
    },
    /// New peer request; answer with `update_tx` then `commit`.
    Request { xact: XactId },
    /// Bearer request triggered by a local command; answer on the command
    /// transaction with `update_tx` then `commit`.
    Triggered { xact: XactId },
    /// Retransmitted request; any stored reply was sent again.
    Duplicate { xact: XactId },
}

/// One GTPv2-C transaction
pub struct Gtp2Xact<C, D> {
    id: XactId,
    origin: XactOrigin,
    node: NodeId,
    remote: SocketAddr,
    xid: u32,
    message_type: u8,
    state: XactState,
    header: Option<Gtp2Header>,
    payload: Bytes,
    tx: Option<Bytes>,
    retry_left: u32,
    deadline: Option<Instant>,
    timeout_cb: Option<XactTimeoutFn<C, D>>,
    data: Option<D>,
}

impl<C, D> Gtp2Xact<C, D> {
    pub fn id(&self) -> XactId {
        self.id
    }

    pub fn origin(&self) -> XactOrigin {
        self.origin
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn xid(&self) -> u32 {
        self.xid
    }

    /// Type of the message that opened the transaction
    pub fn message_type(&self) -> u8 {
        self.message_type
    }

    pub fn state(&self) -> XactState {
        self.state
    }

    pub fn data(&self) -> Option<&D> {
        self.data.as_ref()
    }

    pub fn is_command(&self) -> bool {
        self.xid & GTP_CMD_XACT_ID != 0
    }

    /// Last message put on the wire
    pub fn tx(&self) -> Option<&Bytes> {
        self.tx.as_ref()
    }
}

impl<C, D: fmt::Debug> fmt::Debug for Gtp2Xact<C, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gtp2Xact")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("node", &self.node)
            .field("remote", &self.remote)
            .field("xid", &self.xid)
            .field("message_type", &self.message_type)
            .field("state", &self.state)
            .field("retry_left", &self.retry_left)
            .field("data", &self.data)
            .finish()
    }
}

type XactKey = (NodeId, XactOrigin, u32);

/// Transaction registry
///
/// `C` is the context timeout callbacks run against, `D` the owner data a
/// local transaction carries back to it.
pub struct XactRegistry<C, D> {
    config: XactConfig,
    xacts: HashMap<XactId, Gtp2Xact<C, D>>,
    index: HashMap<XactKey, XactId>,
    next_id: u64,
    next_xid: u32,
}

impl<C, D> XactRegistry<C, D> {
    pub fn new(mut config: XactConfig) -> Self {
        config.max_xacts = config.max_xacts.min(GTP_MAX_XACT_ID as usize);
        Self {
            config,
            xacts: HashMap::new(),
            index: HashMap::new(),
            next_id: 1,
            next_xid: 1,
        }
    }

    pub fn config(&self) -> &XactConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.xacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.xacts.is_empty()
    }

    pub fn find(&self, id: XactId) -> Option<&Gtp2Xact<C, D>> {
        self.xacts.get(&id)
    }

    pub fn contains(&self, id: XactId) -> bool {
        self.xacts.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Gtp2Xact<C, D>> {
        self.xacts.values()
    }

    fn check_capacity(&self) -> GtpResult<()> {
        if self.xacts.len() >= self.config.max_xacts {
            return Err(GtpError::ResourceExhausted(format!(
                "transaction pool full ({})",
                self.config.max_xacts
            )));
        }
        Ok(())
    }

    fn alloc_id(&mut self) -> XactId {
        let id = XactId(self.next_id);
        self.next_id += 1;
        id
    }

    fn alloc_xid(&mut self, node: NodeId) -> u32 {
        loop {
            let xid = self.next_xid;
            self.next_xid = if xid >= GTP_MAX_XACT_ID { 1 } else { xid + 1 };
            if !self.index.contains_key(&(node, XactOrigin::Local, xid)) {
                return xid;
            }
        }
    }

    /// Create a local transaction for a request to `node`.
    ///
    /// Nothing is sent until `commit`. `data` is handed to `timeout_cb` if the
    /// request is never answered.
    pub fn local_create(
        &mut self,
        node: &GtpNode,
        header: &Gtp2Header,
        payload: Bytes,
        timeout_cb: XactTimeoutFn<C, D>,
        data: D,
    ) -> GtpResult<XactId> {
        self.check_capacity()?;
        let remote = node.remote()?;

        let id = self.alloc_id();
        let xid = self.alloc_xid(node.id);
        let xact = Gtp2Xact {
            id,
            origin: XactOrigin::Local,
            node: node.id,
            remote,
            xid,
            message_type: header.message_type,
            state: XactState::Created,
            header: Some(header.clone()),
            payload,
            tx: None,
            retry_left: 0,
            deadline: None,
            timeout_cb: Some(timeout_cb),
            data: Some(data),
        };

        log::debug!(
            "[{}] LOCAL Create  peer [{}] type [{}]",
            xid,
            remote,
            header.message_type
        );

        self.index.insert((node.id, XactOrigin::Local, xid), id);
        self.xacts.insert(id, xact);
        Ok(id)
    }

    /// Move an uncommitted local transaction into the command xid space.
    pub fn mark_command(&mut self, id: XactId) -> GtpResult<()> {
        let xact = self
            .xacts
            .get_mut(&id)
            .ok_or_else(|| GtpError::XactNotFound(format!("xact {}", id)))?;
        if xact.origin != XactOrigin::Local || xact.state != XactState::Created {
            return Err(GtpError::InvalidXactState(format!(
                "xact {} cannot become a command in {:?}",
                id, xact.state
            )));
        }
        if xact.is_command() {
            return Ok(());
        }

        let xid = xact.xid | GTP_CMD_XACT_ID;
        let key = (xact.node, XactOrigin::Local, xid);
        if self.index.contains_key(&key) {
            return Err(GtpError::InvalidXactState(format!(
                "command xid {:#x} already in use",
                xid
            )));
        }

        self.index.remove(&(xact.node, XactOrigin::Local, xact.xid));
        xact.xid = xid;
        self.index.insert(key, id);
        Ok(())
    }

    /// Attach the message to send on the next `commit`.
    pub fn update_tx(&mut self, id: XactId, header: &Gtp2Header, payload: Bytes) -> GtpResult<()> {
        let xact = self
            .xacts
            .get_mut(&id)
            .ok_or_else(|| GtpError::XactNotFound(format!("xact {}", id)))?;

        match xact.state {
            XactState::Created => {}
            XactState::RequestReceived | XactState::ResponseReady => {
                xact.state = XactState::ResponseReady;
            }
            state => {
                return Err(GtpError::InvalidXactState(format!(
                    "xact {} cannot update in {:?}",
                    id, state
                )))
            }
        }

        xact.header = Some(header.clone());
        xact.payload = payload;
        Ok(())
    }

    /// Send the pending message.
    ///
    /// A local request arms T3; a reply starts the holding timer. A transport
    /// failure is logged and left to the retransmission timer.
    pub fn commit(&mut self, id: XactId, transport: &dyn GtpTransport) -> GtpResult<()> {
        let now = Instant::now();
        let config = self.config;
        let xact = self
            .xacts
            .get_mut(&id)
            .ok_or_else(|| GtpError::XactNotFound(format!("xact {}", id)))?;

        let (state, deadline, retry_left) = match xact.state {
            XactState::Created => (
                XactState::WaitingResponse,
                now + config.t3_response,
                config.n3_response_retry.saturating_sub(1),
            ),
            XactState::ResponseReady => (XactState::Holding, now + config.holding_duration(), 0),
            state => {
                return Err(GtpError::InvalidXactState(format!(
                    "xact {} cannot commit in {:?}",
                    id, state
                )))
            }
        };

        let mut header = xact
            .header
            .clone()
            .ok_or_else(|| GtpError::InvalidXactState(format!("xact {} has no message", id)))?;
        header.sequence_number = xact.xid;
        let tx = header.encode_message(&xact.payload)?;

        xact.state = state;
        xact.deadline = Some(deadline);
        xact.retry_left = retry_left;
        xact.tx = Some(tx);

        log::debug!(
            "[{}] {} Commit  peer [{}] type [{}]",
            xact.xid,
            xact.origin,
            xact.remote,
            header.message_type
        );
        retransmit(xact, transport);
        Ok(())
    }

    /// Match an incoming message from `node` against the registry.
    pub fn receive(
        &mut self,
        node: &GtpNode,
        header: &Gtp2Header,
        transport: &dyn GtpTransport,
    ) -> GtpResult<XactReceipt<D>> {
        let message_type = Gtp2MessageType::try_from(header.message_type)?;
        let xid = header.sequence_number;

        if !message_type.is_initial() {
            return self.receive_response(node, header.message_type, xid);
        }
        if message_type.may_be_triggered() && xid & GTP_CMD_XACT_ID != 0 {
            return self.receive_triggered(node, xid, transport);
        }
        self.receive_request(node, header.message_type, xid, transport)
    }

    fn receive_response(
        &mut self,
        node: &GtpNode,
        message_type: u8,
        xid: u32,
    ) -> GtpResult<XactReceipt<D>> {
        let id = *self
            .index
            .get(&(node.id, XactOrigin::Local, xid))
            .ok_or_else(|| {
                GtpError::XactNotFound(format!(
                    "no local xact for xid {:#x} type [{}] from node {}",
                    xid, message_type, node.id
                ))
            })?;

        match self.xacts.get(&id).map(|x| x.state) {
            Some(XactState::WaitingResponse) => {}
            state => {
                return Err(GtpError::InvalidXactState(format!(
                    "xact {} got type [{}] in {:?}",
                    id, message_type, state
                )))
            }
        }

        let xact = self
            .remove(id)
            .ok_or_else(|| GtpError::XactNotFound(format!("xact {}", id)))?;
        log::debug!(
            "[{}] LOCAL Complete peer [{}] type [{}]",
            xact.xid,
            xact.remote,
            message_type
        );
        Ok(XactReceipt::Response {
            xact: id,
            request_type: xact.message_type,
            data: xact.data,
        })
    }

    fn receive_triggered(
        &mut self,
        node: &GtpNode,
        xid: u32,
        transport: &dyn GtpTransport,
    ) -> GtpResult<XactReceipt<D>> {
        let holding = self.config.holding_duration();
        let id = *self
            .index
            .get(&(node.id, XactOrigin::Local, xid))
            .ok_or_else(|| {
                GtpError::XactNotFound(format!("no command xact for xid {:#x}", xid))
            })?;
        let xact = self
            .xacts
            .get_mut(&id)
            .ok_or_else(|| GtpError::XactNotFound(format!("xact {}", id)))?;

        match xact.state {
            XactState::WaitingResponse => {
                xact.state = XactState::RequestReceived;
                xact.retry_left = 0;
                xact.deadline = Some(Instant::now() + holding);
                Ok(XactReceipt::Triggered { xact: id })
            }
            XactState::Holding => {
                retransmit(xact, transport);
                Ok(XactReceipt::Duplicate { xact: id })
            }
            XactState::RequestReceived | XactState::ResponseReady => {
                Ok(XactReceipt::Duplicate { xact: id })
            }
            XactState::Created => Err(GtpError::InvalidXactState(format!(
                "command xact {} not yet sent",
                id
            ))),
        }
    }

    fn receive_request(
        &mut self,
        node: &GtpNode,
        message_type: u8,
        xid: u32,
        transport: &dyn GtpTransport,
    ) -> GtpResult<XactReceipt<D>> {
        let key = (node.id, XactOrigin::Remote, xid);
        if let Some(&id) = self.index.get(&key) {
            if let Some(xact) = self.xacts.get(&id) {
                log::debug!(
                    "[{}] REMOTE Duplicate peer [{}] type [{}] in {:?}",
                    xid,
                    xact.remote,
                    message_type,
                    xact.state
                );
                if xact.state == XactState::Holding {
                    retransmit(xact, transport);
                }
            }
            return Ok(XactReceipt::Duplicate { xact: id });
        }

        self.check_capacity()?;
        let remote = node.remote()?;

        let id = self.alloc_id();
        let xact = Gtp2Xact {
            id,
            origin: XactOrigin::Remote,
            node: node.id,
            remote,
            xid,
            message_type,
            state: XactState::RequestReceived,
            header: None,
            payload: Bytes::new(),
            tx: None,
            retry_left: 0,
            deadline: Some(Instant::now() + self.config.holding_duration()),
            timeout_cb: None,
            data: None,
        };

        log::debug!(
            "[{}] REMOTE Create  peer [{}] type [{}]",
            xid,
            remote,
            message_type
        );

        self.index.insert(key, id);
        self.xacts.insert(id, xact);
        Ok(XactReceipt::Request { xact: id })
    }

    /// Drive T3 retransmission and the holding timer.
    ///
    /// Returns the local transactions that gave up; they are already removed.
    pub fn poll_timers(
        &mut self,
        now: Instant,
        transport: &dyn GtpTransport,
    ) -> Vec<ExpiredXact<C, D>> {
        let mut due: Vec<XactId> = self
            .xacts
            .values()
            .filter(|x| x.deadline.map_or(false, |d| d <= now))
            .map(|x| x.id)
            .collect();
        due.sort();

        let mut expired = Vec::new();
        for id in due {
            let Some(xact) = self.xacts.get_mut(&id) else {
                continue;
            };

            let waiting = xact.state == XactState::WaitingResponse;
            if waiting && xact.retry_left > 0 {
                xact.retry_left -= 1;
                xact.deadline = Some(now + self.config.t3_response);
                log::debug!(
                    "[{}] LOCAL Retransmit peer [{}] type [{}]",
                    xact.xid,
                    xact.remote,
                    xact.message_type
                );
                retransmit(xact, transport);
                continue;
            }

            let Some(xact) = self.remove(id) else {
                continue;
            };
            if !waiting {
                log::debug!("[{}] {} Delete  peer [{}]", xact.xid, xact.origin, xact.remote);
                continue;
            }

            log::warn!(
                "[{}] LOCAL No Reply Give up peer [{}] type [{}]",
                xact.xid,
                xact.remote,
                xact.message_type
            );
            if let (Some(cb), Some(data)) = (xact.timeout_cb, xact.data) {
                expired.push(ExpiredXact {
                    timeout: XactTimeout {
                        xact: id,
                        node: xact.node,
                        message_type: xact.message_type,
                        xid: xact.xid,
                        data,
                    },
                    cb,
                });
            }
        }
        expired
    }

    /// Remove a transaction without running its callback.
    pub fn remove(&mut self, id: XactId) -> Option<Gtp2Xact<C, D>> {
        let xact = self.xacts.remove(&id)?;
        self.index.remove(&(xact.node, xact.origin, xact.xid));
        Some(xact)
    }

    /// Remove every transaction whose owner data matches `pred`.
    pub fn cancel_where<F>(&mut self, pred: F) -> Vec<XactId>
    where
        F: Fn(&D) -> bool,
    {
        let mut ids: Vec<XactId> = self
            .xacts
            .values()
            .filter(|x| x.data.as_ref().map_or(false, |d| pred(d)))
            .map(|x| x.id)
            .collect();
        ids.sort();

        for id in &ids {
            if let Some(xact) = self.remove(*id) {
                log::debug!(
                    "[{}] {} Cancel  peer [{}] type [{}]",
                    xact.xid,
                    xact.origin,
                    xact.remote,
                    xact.message_type
                );
            }
        }
        ids
    }
}

fn retransmit<C, D>(xact: &Gtp2Xact<C, D>, transport: &dyn GtpTransport) {
    let Some(tx) = xact.tx.as_ref() else {
        return;
    };
    if let Err(e) = gtp_sendto(transport, tx, xact.remote) {
        log::error!(
            "[{}] {} send to [{}] failed: {}",
            xact.xid,
            xact.origin,
            xact.remote,
            e
        );
    }
}
