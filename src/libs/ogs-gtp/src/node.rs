//! GTP peer nodes
//!
//! A node is one configured GTP-C peer (an SGW on S11). It carries every
//! address the peer was configured with and, once connected, the address
//! outbound messages are sent to.

use std::fmt;
use std::net::SocketAddr;

use crate::error::{GtpError, GtpResult};

/// Identifier of a peer node, stable for the process lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// GTP peer node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GtpNode {
    pub id: NodeId,
    /// Configured addresses, in preference order
    pub addrs: Vec<SocketAddr>,
    /// Address selected by `connect`
    pub remote: Option<SocketAddr>,
}

impl GtpNode {
    pub fn new(id: NodeId, addrs: Vec<SocketAddr>) -> Self {
        Self {
            id,
            addrs,
            remote: None,
        }
    }

    /// Select the first address whose family has a local socket.
    pub fn connect(&mut self, ipv4_avail: bool, ipv6_avail: bool) -> GtpResult<SocketAddr> {
        let selected = self
            .addrs
            .iter()
            .find(|addr| (addr.is_ipv4() && ipv4_avail) || (addr.is_ipv6() && ipv6_avail))
            .copied()
            .ok_or(GtpError::NodeNotConnected(self.id.0))?;

        self.remote = Some(selected);
        Ok(selected)
    }

    /// Address outbound messages go to
    pub fn remote(&self) -> GtpResult<SocketAddr> {
        self.remote.ok_or(GtpError::NodeNotConnected(self.id.0))
    }

    /// True if `addr` is one of the node's configured addresses
    pub fn matches(&self, addr: &SocketAddr) -> bool {
        self.addrs.iter().any(|a| a == addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> GtpNode {
        GtpNode::new(
            NodeId(1),
            vec![
                "[2001:db8::3]:2123".parse().unwrap(),
                "127.0.0.3:2123".parse().unwrap(),
            ],
        )
    }

    #[test]
    fn test_connect_prefers_available_family() {
        let mut n = node();
        assert_eq!(n.connect(true, false).unwrap(), "127.0.0.3:2123".parse().unwrap());

        let mut n = node();
        assert_eq!(n.connect(true, true).unwrap(), "[2001:db8::3]:2123".parse().unwrap());
        assert_eq!(n.remote().unwrap(), "[2001:db8::3]:2123".parse().unwrap());
    }

    #[test]
    fn test_connect_without_matching_family() {
        let mut n = GtpNode::new(NodeId(7), vec!["127.0.0.3:2123".parse().unwrap()]);
        assert_eq!(n.connect(false, true), Err(GtpError::NodeNotConnected(7)));
        assert_eq!(n.remote(), Err(GtpError::NodeNotConnected(7)));
    }

    #[test]
    fn test_matches_compares_port() {
        let n = node();
        assert!(n.matches(&"127.0.0.3:2123".parse().unwrap()));
        assert!(!n.matches(&"127.0.0.3:2124".parse().unwrap()));
        assert!(!n.matches(&"127.0.0.4:2123".parse().unwrap()));
    }
}
