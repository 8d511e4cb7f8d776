//! MME Context Management
//!
//! eNB, UE, session and bearer pools used by the S11 path. Objects refer to
//! each other by pool id, never by ownership: a parent keeps the ids of its
//! children and a child keeps the id of its parent. Removing an object
//! unlinks it from both sides so no stale id stays reachable.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use ogs_gtp::{GtpNode, GtpResult, NodeId, XactId};

use crate::sm::EsmState;

// ============================================================================
// Constants
// ============================================================================

/// Minimum EPS bearer ID
pub const MIN_EPS_BEARER_ID: u8 = 5;
/// Maximum EPS bearer ID
pub const MAX_EPS_BEARER_ID: u8 = 15;

/// Invalid UE S1AP ID
pub const INVALID_UE_S1AP_ID: u32 = 0xffffffff;

// ============================================================================
// Pool IDs
// ============================================================================

macro_rules! pool_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

pool_id!(
    /// eNB pool ID
    EnbId
);
pool_id!(
    /// eNB UE (S1 association) pool ID
    EnbUeId
);
pool_id!(
    /// MME UE pool ID
    MmeUeId
);
pool_id!(
    /// Session pool ID
    SessId
);
pool_id!(
    /// Bearer pool ID
    BearerId
);

// ============================================================================
// Basic Types
// ============================================================================

/// PLMN ID
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PlmnId {
    pub mcc1: u8,
    pub mcc2: u8,
    pub mcc3: u8,
    pub mnc1: u8,
    pub mnc2: u8,
    /// 0xf for a 2-digit MNC
    pub mnc3: u8,
}

impl PlmnId {
    pub fn new(mcc: &str, mnc: &str) -> Self {
        let mcc: Vec<u8> = mcc.chars().filter_map(|c| c.to_digit(10).map(|d| d as u8)).collect();
        let mnc: Vec<u8> = mnc.chars().filter_map(|c| c.to_digit(10).map(|d| d as u8)).collect();

        Self {
            mcc1: mcc.first().copied().unwrap_or(0),
            mcc2: mcc.get(1).copied().unwrap_or(0),
            mcc3: mcc.get(2).copied().unwrap_or(0),
            mnc1: mnc.first().copied().unwrap_or(0),
            mnc2: mnc.get(1).copied().unwrap_or(0),
            mnc3: mnc.get(2).copied().unwrap_or(0xf),
        }
    }

    /// 3GPP TS 24.008 figure 10.5.13 encoding
    pub fn to_bytes(&self) -> [u8; 3] {
        [
            (self.mcc2 << 4) | self.mcc1,
            (self.mnc3 << 4) | self.mcc3,
            (self.mnc2 << 4) | self.mnc1,
        ]
    }
}

/// EPS TAI (Tracking Area Identity)
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct EpsTai {
    pub plmn_id: PlmnId,
    pub tac: u16,
}

/// E-CGI (E-UTRAN Cell Global Identity)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ECgi {
    pub plmn_id: PlmnId,
    /// E-UTRAN Cell ID (28 bits)
    pub cell_id: u32,
}

// ============================================================================
// S1AP Cause
// ============================================================================

/// S1AP Cause group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum S1apCauseGroup {
    #[default]
    Nothing,
    RadioNetwork,
    Transport,
    Nas,
    Protocol,
    Misc,
}

/// S1AP NAS cause: normal-release
pub const S1AP_CAUSE_NAS_NORMAL_RELEASE: i64 = 0;

/// S1AP Cause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct S1apCause {
    pub group: S1apCauseGroup,
    pub cause: i64,
}

impl S1apCause {
    pub fn nas_normal_release() -> Self {
        Self {
            group: S1apCauseGroup::Nas,
            cause: S1AP_CAUSE_NAS_NORMAL_RELEASE,
        }
    }
}

/// UE context release action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UeCtxRelAction {
    #[default]
    Invalid,
    S1ContextRemove,
    S1RemoveAndUnlink,
    UeContextRemove,
    S1HandoverComplete,
    S1HandoverCancel,
    S1HandoverFailure,
    S1Paging,
}

// ============================================================================
// SGW (Peer Registry)
// ============================================================================

/// Configured SGW-C peers.
///
/// Built once at startup and shared read-only with the receive path.
#[derive(Debug, Clone, Default)]
pub struct SgwRegistry {
    nodes: Vec<GtpNode>,
}

impl SgwRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an SGW with its configured addresses
    pub fn sgw_add(&mut self, addrs: Vec<SocketAddr>) -> NodeId {
        let id = NodeId(self.nodes.len() as u64 + 1);
        self.nodes.push(GtpNode::new(id, addrs));
        id
    }

    /// Select a remote address for every SGW.
    pub fn connect_all(&mut self, ipv4_avail: bool, ipv6_avail: bool) -> GtpResult<()> {
        for node in &mut self.nodes {
            let addr = node.connect(ipv4_avail, ipv6_avail)?;
            log::info!("gtp_connect() [{}]:{}", addr.ip(), addr.port());
        }
        Ok(())
    }

    pub fn find_by_addr(&self, addr: &SocketAddr) -> Option<&GtpNode> {
        self.nodes.iter().find(|node| node.matches(addr))
    }

    pub fn find_by_id(&self, id: NodeId) -> Option<&GtpNode> {
        self.nodes.iter().find(|node| node.id == id)
    }

    /// First SGW, used when no selection policy applies
    pub fn first(&self) -> Option<&GtpNode> {
        self.nodes.first()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

// ============================================================================
// Domain objects
// ============================================================================

/// eNB context
#[derive(Debug, Clone)]
pub struct MmeEnb {
    pub id: EnbId,
    /// eNB ID (received from eNB)
    pub enb_id: u32,
    pub addr: Option<SocketAddr>,
    /// eNB UE list
    pub enb_ue_list: Vec<EnbUeId>,
}

/// eNB UE context (one S1 association)
#[derive(Debug, Clone)]
pub struct EnbUe {
    pub id: EnbUeId,
    /// eNB UE S1AP ID (received from eNB)
    pub enb_ue_s1ap_id: u32,
    /// MME UE S1AP ID (assigned by MME)
    pub mme_ue_s1ap_id: u32,
    pub enb: EnbId,
    /// Linked UE, absent until attach reaches the MME UE
    pub mme_ue: Option<MmeUeId>,
}

/// MME UE context
#[derive(Debug, Clone)]
pub struct MmeUe {
    pub id: MmeUeId,
    pub imsi_bcd: String,
    /// SGW serving this UE
    pub sgw: NodeId,
    /// MME S11 TEID (allocated locally)
    pub mme_s11_teid: u32,
    /// SGW S11 TEID (received from SGW)
    pub sgw_s11_teid: u32,
    /// Delete-Session-Requests for every session are in flight
    pub session_context_will_deleted: bool,
    /// S1 association, weak
    pub enb_ue: Option<EnbUeId>,
    pub tai: EpsTai,
    pub e_cgi: ECgi,
    pub sess_list: Vec<SessId>,
}

/// MME session context
#[derive(Debug, Clone)]
pub struct MmeSess {
    pub id: SessId,
    pub mme_ue: MmeUeId,
    /// Procedure Transaction Identity
    pub pti: u8,
    pub apn: String,
    /// Bearer list, the default bearer first
    pub bearer_list: Vec<BearerId>,
}

/// MME bearer context
#[derive(Debug, Clone)]
pub struct MmeBearer {
    pub id: BearerId,
    /// EPS Bearer ID
    pub ebi: u8,
    pub sess: SessId,
    pub mme_ue: MmeUeId,
    pub enb_s1u_teid: u32,
    /// SGW S1-U TEID; zero until the SGW assigned a data path
    pub sgw_s1u_teid: u32,
    pub esm_state: EsmState,
    /// Peer request awaiting our reply, weak
    pub xact: Option<XactId>,
}

/// Everything a removal took out of the pools
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RemovedObjects {
    pub mme_ues: Vec<MmeUeId>,
    pub sesses: Vec<SessId>,
    pub bearers: Vec<BearerId>,
    /// Pending peer requests the removed bearers were bound to
    pub bearer_xacts: Vec<XactId>,
}

impl RemovedObjects {
    pub fn is_empty(&self) -> bool {
        self.mme_ues.is_empty() && self.sesses.is_empty() && self.bearers.is_empty()
    }

    fn merge(&mut self, other: RemovedObjects) {
        self.mme_ues.extend(other.mme_ues);
        self.sesses.extend(other.sesses);
        self.bearers.extend(other.bearers);
        self.bearer_xacts.extend(other.bearer_xacts);
    }
}

// ============================================================================
// MME Context (Main)
// ============================================================================

/// Main MME context
#[derive(Debug)]
pub struct MmeContext {
    /// SGW peers
    pub sgws: Arc<SgwRegistry>,

    enb_pool: HashMap<EnbId, MmeEnb>,
    enb_ue_pool: HashMap<EnbUeId, EnbUe>,
    mme_ue_pool: HashMap<MmeUeId, MmeUe>,
    sess_pool: HashMap<SessId, MmeSess>,
    bearer_pool: HashMap<BearerId, MmeBearer>,

    mme_s11_teid_hash: HashMap<u32, MmeUeId>,

    next_pool_id: u64,
    next_mme_ue_s1ap_id: u32,
    next_mme_s11_teid: u32,
}

impl MmeContext {
    pub fn new(sgws: Arc<SgwRegistry>) -> Self {
        Self {
            sgws,
            enb_pool: HashMap::new(),
            enb_ue_pool: HashMap::new(),
            mme_ue_pool: HashMap::new(),
            sess_pool: HashMap::new(),
            bearer_pool: HashMap::new(),
            mme_s11_teid_hash: HashMap::new(),
            next_pool_id: 1,
            next_mme_ue_s1ap_id: 1,
            next_mme_s11_teid: 1,
        }
    }

    fn alloc_pool_id(&mut self) -> u64 {
        let id = self.next_pool_id;
        self.next_pool_id += 1;
        id
    }

    fn alloc_mme_ue_s1ap_id(&mut self) -> u32 {
        let id = self.next_mme_ue_s1ap_id;
        self.next_mme_ue_s1ap_id = match id.wrapping_add(1) {
            INVALID_UE_S1AP_ID | 0 => 1,
            next => next,
        };
        id
    }

    fn alloc_mme_s11_teid(&mut self) -> u32 {
        loop {
            let teid = self.next_mme_s11_teid;
            self.next_mme_s11_teid = teid.checked_add(1).unwrap_or(1);
            if !self.mme_s11_teid_hash.contains_key(&teid) {
                return teid;
            }
        }
    }
}

// ============================================================================
// eNB Management
// ============================================================================

impl MmeContext {
    pub fn enb_add(&mut self, enb_id: u32, addr: Option<SocketAddr>) -> EnbId {
        let id = EnbId(self.alloc_pool_id());
        self.enb_pool.insert(
            id,
            MmeEnb {
                id,
                enb_id,
                addr,
                enb_ue_list: Vec::new(),
            },
        );
        id
    }

    pub fn enb_find(&self, id: EnbId) -> Option<&MmeEnb> {
        self.enb_pool.get(&id)
    }
}

// ============================================================================
// eNB UE Management
// ============================================================================

impl MmeContext {
    /// Add an S1 association under `enb`; None if the eNB is unknown.
    pub fn enb_ue_add(&mut self, enb: EnbId, enb_ue_s1ap_id: u32) -> Option<EnbUeId> {
        if !self.enb_pool.contains_key(&enb) {
            return None;
        }
        let id = EnbUeId(self.alloc_pool_id());
        let mme_ue_s1ap_id = self.alloc_mme_ue_s1ap_id();
        self.enb_ue_pool.insert(
            id,
            EnbUe {
                id,
                enb_ue_s1ap_id,
                mme_ue_s1ap_id,
                enb,
                mme_ue: None,
            },
        );
        if let Some(enb) = self.enb_pool.get_mut(&enb) {
            enb.enb_ue_list.push(id);
        }
        Some(id)
    }

    pub fn enb_ue_find(&self, id: EnbUeId) -> Option<&EnbUe> {
        self.enb_ue_pool.get(&id)
    }

    /// Remove an S1 association, unlinking it from its eNB and UE.
    /// Removes the S1 association; the returned record keeps its former UE link.
    pub(crate) fn enb_ue_remove(&mut self, id: EnbUeId) -> Option<EnbUe> {
        let mme_ue = self.enb_ue_pool.get(&id)?.mme_ue;
        self.enb_ue_deassociate(id);
        let mut enb_ue = self.enb_ue_pool.remove(&id)?;
        enb_ue.mme_ue = mme_ue;
        if let Some(enb) = self.enb_pool.get_mut(&enb_ue.enb) {
            enb.enb_ue_list.retain(|e| *e != id);
        }
        Some(enb_ue)
    }

    /// Link an S1 association and a UE in both directions.
    pub fn enb_ue_associate_mme_ue(&mut self, enb_ue: EnbUeId, mme_ue: MmeUeId) -> bool {
        if !self.enb_ue_pool.contains_key(&enb_ue) || !self.mme_ue_pool.contains_key(&mme_ue) {
            return false;
        }
        if let Some(e) = self.enb_ue_pool.get_mut(&enb_ue) {
            e.mme_ue = Some(mme_ue);
        }
        if let Some(m) = self.mme_ue_pool.get_mut(&mme_ue) {
            m.enb_ue = Some(enb_ue);
        }
        true
    }

    fn enb_ue_deassociate(&mut self, enb_ue: EnbUeId) {
        let Some(e) = self.enb_ue_pool.get_mut(&enb_ue) else {
            return;
        };
        if let Some(m) = e.mme_ue.take().and_then(|m| self.mme_ue_pool.get_mut(&m)) {
            if m.enb_ue == Some(enb_ue) {
                m.enb_ue = None;
            }
        }
    }
}

// ============================================================================
// MME UE Management
// ============================================================================

impl MmeContext {
    pub fn mme_ue_add(&mut self, imsi_bcd: &str, sgw: NodeId) -> MmeUeId {
        let id = MmeUeId(self.alloc_pool_id());
        let mme_s11_teid = self.alloc_mme_s11_teid();
        self.mme_s11_teid_hash.insert(mme_s11_teid, id);
        self.mme_ue_pool.insert(
            id,
            MmeUe {
                id,
                imsi_bcd: imsi_bcd.to_string(),
                sgw,
                mme_s11_teid,
                sgw_s11_teid: 0,
                session_context_will_deleted: false,
                enb_ue: None,
                tai: EpsTai::default(),
                e_cgi: ECgi::default(),
                sess_list: Vec::new(),
            },
        );
        id
    }

    pub fn mme_ue_find(&self, id: MmeUeId) -> Option<&MmeUe> {
        self.mme_ue_pool.get(&id)
    }

    pub fn mme_ue_find_mut(&mut self, id: MmeUeId) -> Option<&mut MmeUe> {
        self.mme_ue_pool.get_mut(&id)
    }

    /// Find MME UE by the S11 TEID the SGW addresses us with
    pub fn mme_ue_find_by_s11_local_teid(&self, teid: u32) -> Option<MmeUeId> {
        self.mme_s11_teid_hash.get(&teid).copied()
    }

    /// Remove a UE with all of its sessions and bearers.
    pub(crate) fn mme_ue_remove(&mut self, id: MmeUeId) -> RemovedObjects {
        let mut removed = RemovedObjects::default();
        let sess_list = match self.mme_ue_pool.get(&id) {
            Some(mme_ue) => mme_ue.sess_list.clone(),
            None => return removed,
        };
        for sess in sess_list {
            removed.merge(self.sess_remove(sess));
        }

        if let Some(mme_ue) = self.mme_ue_pool.remove(&id) {
            self.mme_s11_teid_hash.remove(&mme_ue.mme_s11_teid);
            if let Some(enb_ue) = mme_ue.enb_ue.and_then(|e| self.enb_ue_pool.get_mut(&e)) {
                if enb_ue.mme_ue == Some(id) {
                    enb_ue.mme_ue = None;
                }
            }
            removed.mme_ues.push(id);
        }
        removed
    }
}

// ============================================================================
// Session Management
// ============================================================================

impl MmeContext {
    /// Add a session with its default bearer; None if the UE is unknown or
    /// has no EPS bearer ID left.
    pub fn sess_add(&mut self, mme_ue: MmeUeId, pti: u8, apn: &str) -> Option<SessId> {
        if !self.mme_ue_pool.contains_key(&mme_ue) {
            return None;
        }
        let id = SessId(self.alloc_pool_id());
        self.sess_pool.insert(
            id,
            MmeSess {
                id,
                mme_ue,
                pti,
                apn: apn.to_string(),
                bearer_list: Vec::new(),
            },
        );
        if let Some(ue) = self.mme_ue_pool.get_mut(&mme_ue) {
            ue.sess_list.push(id);
        }

        if self.bearer_add(id).is_none() {
            self.sess_remove(id);
            return None;
        }
        Some(id)
    }

    pub fn sess_find(&self, id: SessId) -> Option<&MmeSess> {
        self.sess_pool.get(&id)
    }

    /// Remove a session with its bearers, unlinking it from its UE.
    pub(crate) fn sess_remove(&mut self, id: SessId) -> RemovedObjects {
        let mut removed = RemovedObjects::default();
        let Some(sess) = self.sess_pool.remove(&id) else {
            return removed;
        };
        if let Some(ue) = self.mme_ue_pool.get_mut(&sess.mme_ue) {
            ue.sess_list.retain(|s| *s != id);
        }
        for bearer in sess.bearer_list {
            if let Some(bearer) = self.bearer_pool.remove(&bearer) {
                removed.bearers.push(bearer.id);
                removed.bearer_xacts.extend(bearer.xact);
            }
        }
        removed.sesses.push(id);
        removed
    }

    /// Default bearer of a session
    pub fn default_bearer_in_sess(&self, sess: SessId) -> Option<BearerId> {
        self.sess_pool.get(&sess)?.bearer_list.first().copied()
    }

    /// True once the SGW assigned an S1-U data path to the default bearer
    pub fn sess_have_sgw_s1u_path(&self, sess: SessId) -> bool {
        self.default_bearer_in_sess(sess)
            .and_then(|b| self.bearer_pool.get(&b))
            .map_or(false, |b| b.sgw_s1u_teid != 0)
    }
}

// ============================================================================
// Bearer Management
// ============================================================================

impl MmeContext {
    /// Add a bearer with the lowest free EPS bearer ID of the UE.
    pub fn bearer_add(&mut self, sess: SessId) -> Option<BearerId> {
        let mme_ue = self.sess_pool.get(&sess)?.mme_ue;
        let ebi = (MIN_EPS_BEARER_ID..=MAX_EPS_BEARER_ID).find(|ebi| {
            !self
                .bearer_pool
                .values()
                .any(|b| b.mme_ue == mme_ue && b.ebi == *ebi)
        })?;

        let id = BearerId(self.alloc_pool_id());
        self.bearer_pool.insert(
            id,
            MmeBearer {
                id,
                ebi,
                sess,
                mme_ue,
                enb_s1u_teid: 0,
                sgw_s1u_teid: 0,
                esm_state: EsmState::Inactive,
                xact: None,
            },
        );
        if let Some(s) = self.sess_pool.get_mut(&sess) {
            s.bearer_list.push(id);
        }
        Some(id)
    }

    pub fn bearer_find(&self, id: BearerId) -> Option<&MmeBearer> {
        self.bearer_pool.get(&id)
    }

    pub fn bearer_find_mut(&mut self, id: BearerId) -> Option<&mut MmeBearer> {
        self.bearer_pool.get_mut(&id)
    }

    pub fn bearer_find_by_ebi(&self, mme_ue: MmeUeId, ebi: u8) -> Option<BearerId> {
        self.bearer_pool
            .values()
            .find(|b| b.mme_ue == mme_ue && b.ebi == ebi)
            .map(|b| b.id)
    }

    /// Bearers of a UE across all of its sessions, in session order
    pub fn bearers_of_mme_ue(&self, mme_ue: MmeUeId) -> Vec<BearerId> {
        let Some(ue) = self.mme_ue_pool.get(&mme_ue) else {
            return Vec::new();
        };
        ue.sess_list
            .iter()
            .filter_map(|s| self.sess_pool.get(s))
            .flat_map(|s| s.bearer_list.iter().copied())
            .collect()
    }
}
