//! GTP path transport
//!
//! The transaction layer never owns sockets. It hands encoded messages to a
//! `GtpTransport`, which the network function backs with its UDP sockets.

use std::io;
use std::net::SocketAddr;

use crate::error::{GtpError, GtpResult};

/// Datagram sink used by the transaction layer
pub trait GtpTransport {
    /// Send one datagram to `target`, returning the number of bytes written.
    fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;
}

/// Send `buf` to `target` as a single datagram.
pub fn gtp_sendto(transport: &dyn GtpTransport, buf: &[u8], target: SocketAddr) -> GtpResult<()> {
    let sent = transport.send_to(buf, target)?;
    if sent != buf.len() {
        return Err(GtpError::Io(format!(
            "short write to {}: {} of {} bytes",
            target,
            sent,
            buf.len()
        )));
    }
    Ok(())
}

/// Recording transport shared by the transaction tests of this crate and of
/// the network functions built on it
#[cfg(any(test, feature = "test-utils"))]
pub mod test_util {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    /// Transport that records every datagram instead of sending it; clones
    /// share the record
    #[derive(Clone, Default)]
    pub struct RecordingTransport {
        sent: Rc<RefCell<Vec<(SocketAddr, Vec<u8>)>>>,
        fail: Rc<Cell<bool>>,
    }

    impl RecordingTransport {
        /// Make every following send fail with `ConnectionRefused`.
        pub fn set_fail(&self, fail: bool) {
            self.fail.set(fail);
        }

        pub fn count(&self) -> usize {
            self.sent.borrow().len()
        }

        pub fn last(&self) -> Option<Vec<u8>> {
            self.sent.borrow().last().map(|(_, buf)| buf.clone())
        }

        pub fn datagrams(&self) -> Vec<Vec<u8>> {
            self.sent.borrow().iter().map(|(_, buf)| buf.clone()).collect()
        }

        pub fn targets(&self) -> Vec<SocketAddr> {
            self.sent.borrow().iter().map(|(addr, _)| *addr).collect()
        }
    }

    impl GtpTransport for RecordingTransport {
        fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
            if self.fail.get() {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
            }
            self.sent.borrow_mut().push((target, buf.to_vec()));
            Ok(buf.len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::RecordingTransport;
    use super::*;

    struct ShortTransport;

    impl GtpTransport for ShortTransport {
        fn send_to(&self, buf: &[u8], _target: SocketAddr) -> io::Result<usize> {
            Ok(buf.len() / 2)
        }
    }

    #[test]
    fn test_sendto_records_datagram() {
        let t = RecordingTransport::default();
        let target: SocketAddr = "127.0.0.3:2123".parse().unwrap();
        gtp_sendto(&t, &[1, 2, 3], target).unwrap();
        assert_eq!(t.targets(), vec![target]);
        assert_eq!(t.datagrams(), vec![vec![1, 2, 3]]);
    }

    #[test]
    fn test_sendto_errors() {
        let target: SocketAddr = "127.0.0.3:2123".parse().unwrap();
        assert!(matches!(
            gtp_sendto(&ShortTransport, &[1, 2, 3, 4], target),
            Err(GtpError::Io(_))
        ));

        let t = RecordingTransport::default();
        t.set_fail(true);
        assert!(matches!(gtp_sendto(&t, &[1], target), Err(GtpError::Io(_))));
        assert_eq!(t.count(), 0);
    }
}
