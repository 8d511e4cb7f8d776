//! NextGCore GTP Protocol Library
//!
//! This crate provides the GTPv2-C control plane pieces shared by the EPC
//! network functions: header encoding and decoding (3GPP TS 29.274), peer
//! nodes, the datagram transport seam and the transaction layer that
//! correlates requests with responses and drives T3/N3 retransmission.

pub mod error;
pub mod node;
pub mod path;
pub mod v2;
pub mod xact;


pub use error::{GtpError, GtpResult};
pub use node::{GtpNode, NodeId};
pub use path::GtpTransport;
pub use xact::{
    ExpiredXact, Gtp2Xact, XactConfig, XactId, XactOrigin, XactReceipt, XactRegistry,
    XactState, XactTimeout, XactTimeoutFn, GTP_CMD_XACT_ID,
};

/// GTPv2-C UDP port (2123)
pub const GTPV2_C_UDP_PORT: u16 = 2123;

/// Largest datagram read from a GTP-C socket
pub const MAX_SDU_LEN: usize = 8192;
