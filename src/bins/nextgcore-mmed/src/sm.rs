//! MME events and bearer states
//!
//! Events carry work from the receive tasks to the MME loop. The ESM state is
//! the per-bearer session management state the S11 path consults.

use std::fmt;

use bytes::Bytes;
use ogs_gtp::NodeId;

// ============================================================================
// Event Types
// ============================================================================

/// Base event offset for MME events
pub const MME_EVENT_BASE: u32 = 100;

/// MME Event types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MmeEventId {
    /// S11 message received
    S11Message = MME_EVENT_BASE + 10,
}

impl fmt::Display for MmeEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MmeEventId::S11Message => write!(f, "S11_MESSAGE"),
        }
    }
}

/// MME event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MmeEvent {
    pub id: MmeEventId,
    /// SGW the datagram came from
    pub sgw: NodeId,
    /// Raw GTPv2-C message
    pub pkbuf: Bytes,
}

impl MmeEvent {
    pub fn s11_message(sgw: NodeId, pkbuf: Bytes) -> Self {
        Self {
            id: MmeEventId::S11Message,
            sgw,
            pkbuf,
        }
    }

    pub fn name(&self) -> String {
        self.id.to_string()
    }
}

// ============================================================================
// ESM State
// ============================================================================

/// ESM State
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EsmState {
    /// Initial state
    #[default]
    Initial,
    /// Final state
    Final,
    /// Inactive state
    Inactive,
    /// Active state
    Active,
    /// PDN will disconnect state
    PdnWillDisconnect,
    /// PDN did disconnect state
    PdnDidDisconnect,
    /// Bearer deactivated state
    BearerDeactivated,
    /// Exception state
    Exception,
}

impl fmt::Display for EsmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EsmState::Initial => write!(f, "INITIAL"),
            EsmState::Final => write!(f, "FINAL"),
            EsmState::Inactive => write!(f, "INACTIVE"),
            EsmState::Active => write!(f, "ACTIVE"),
            EsmState::PdnWillDisconnect => write!(f, "PDN_WILL_DISCONNECT"),
            EsmState::PdnDidDisconnect => write!(f, "PDN_DID_DISCONNECT"),
            EsmState::BearerDeactivated => write!(f, "BEARER_DEACTIVATED"),
            EsmState::Exception => write!(f, "EXCEPTION"),
        }
    }
}
