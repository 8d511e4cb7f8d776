//! GTPv2 Protocol Implementation
//!
//! This module implements the GTPv2-C (Control Plane) header as specified in
//! 3GPP TS 29.274. Information elements are built by the interface owners.

pub mod header;

pub use header::{
    Gtp2Header, Gtp2MessageType, GTP2_MAX_SEQUENCE, GTP2_VERSION, GTPV2C_HEADER_LEN,
    GTPV2C_HEADER_LEN_NO_TEID,
};
