//! Seams between the receive tasks and the MME loop

use std::net::SocketAddr;

use ogs_gtp::NodeId;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::context::SgwRegistry;
use crate::sm::MmeEvent;

/// Event queue errors
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("event queue full")]
    Full,
    #[error("event queue closed")]
    Closed,
}

/// Where received messages are handed off
pub trait EventSink {
    fn push_event(&self, event: MmeEvent) -> Result<(), QueueError>;
}

impl EventSink for mpsc::Sender<MmeEvent> {
    fn push_event(&self, event: MmeEvent) -> Result<(), QueueError> {
        self.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }
}

/// Maps a datagram source to a configured peer
pub trait PeerResolver {
    fn resolve_peer(&self, addr: &SocketAddr) -> Option<NodeId>;
}

impl PeerResolver for SgwRegistry {
    fn resolve_peer(&self, addr: &SocketAddr) -> Option<NodeId> {
        self.find_by_addr(addr).map(|node| node.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_sender_reports_full_and_closed() {
        let (tx, mut rx) = mpsc::channel(1);
        let event = MmeEvent::s11_message(NodeId(1), Bytes::new());

        assert_eq!(tx.push_event(event.clone()), Ok(()));
        assert_eq!(tx.push_event(event.clone()), Err(QueueError::Full));
        assert_eq!(rx.try_recv().unwrap(), event);

        drop(rx);
        assert_eq!(tx.push_event(event), Err(QueueError::Closed));
    }

    #[test]
    fn test_sgw_registry_resolves_peer() {
        let mut sgws = SgwRegistry::new();
        let id = sgws.sgw_add(vec!["127.0.0.3:2123".parse().unwrap()]);
        assert_eq!(sgws.resolve_peer(&"127.0.0.3:2123".parse().unwrap()), Some(id));
        assert_eq!(sgws.resolve_peer(&"127.0.0.9:2123".parse().unwrap()), None);
    }
}
