//! Boot handshake: wait for a freshly installed guest to phone home.
//!
//! The guest's first boot runs a one-shot job that opens a TCP connection to
//! the host's bridge address. Accepting that connection both proves the guest
//! is up and tells us its address. No data is exchanged.

pub mod firewall;

use std::io::ErrorKind;
use std::net::{IpAddr, Shutdown, SocketAddr, TcpListener};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use firewall::{Firewall, FirewallRule, RuleGuard};

pub use firewall::Iptables;

/// Default time to wait for the guest to connect.
pub const DEFAULT_BOOT_TIMEOUT: Duration = Duration::from_secs(300);

const ACCEPT_POLL: Duration = Duration::from_millis(100);

pub struct GuestNetworkWaiter<'a> {
    firewall: &'a dyn Firewall,
    cancel: CancelToken,
}

impl<'a> GuestNetworkWaiter<'a> {
    pub fn new(firewall: &'a dyn Firewall) -> Self {
        Self {
            firewall,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Bind the handshake listener. Port 0 picks a free port.
    pub fn listen(&self, host_ip: IpAddr, port: u16) -> Result<BootListener<'a>> {
        let listener = TcpListener::bind(SocketAddr::new(host_ip, port))?;
        listener.set_nonblocking(true)?;
        let local = listener.local_addr()?;
        info!(address = %local, "listening for guest boot");

        Ok(BootListener {
            listener,
            local,
            firewall: self.firewall,
            cancel: self.cancel.clone(),
        })
    }

    /// Listen on `(host_ip, port)` and wait up to `timeout` for the guest.
    /// Returns the guest's address.
    pub fn wait_for_boot(&self, host_ip: IpAddr, port: u16, timeout: Duration) -> Result<IpAddr> {
        self.listen(host_ip, port)?.wait(timeout)
    }
}

/// A bound listener that has not accepted its one connection yet.
pub struct BootListener<'a> {
    listener: TcpListener,
    local: SocketAddr,
    firewall: &'a dyn Firewall,
    cancel: CancelToken,
}

impl BootListener<'_> {
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Open the port in the firewall, accept one connection, close it.
    ///
    /// The firewall rule is removed before this returns, whatever the outcome.
    pub fn wait(self, timeout: Duration) -> Result<IpAddr> {
        let port = self.local.port();
        let _rule = RuleGuard::insert(self.firewall, FirewallRule::accept_tcp(port))?;
        let deadline = Instant::now() + timeout;

        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.shutdown(Shutdown::Both) {
                        debug!(error = %e, "handshake socket already closed");
                    }
                    drop(stream);
                    info!(guest_ip = %peer.ip(), "guest booted");
                    return Ok(peer.ip());
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::BootTimeout { port, timeout });
                    }
                    thread::sleep(ACCEPT_POLL.min(deadline - now));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingFirewall;
    use std::io::Read;
    use std::net::{Ipv4Addr, TcpStream};

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[test]
    fn test_returns_peer_address_and_closes() {
        let firewall = RecordingFirewall::default();
        let listener = GuestNetworkWaiter::new(&firewall).listen(LOCALHOST, 0).unwrap();
        let addr = listener.local_addr();

        let guest = thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            let mut received = Vec::new();
            stream.read_to_end(&mut received).unwrap();
            received
        });

        let peer = listener.wait(Duration::from_secs(10)).unwrap();
        assert_eq!(peer, LOCALHOST);
        assert!(guest.join().unwrap().is_empty());

        let rule = FirewallRule::accept_tcp(addr.port());
        assert_eq!(firewall.inserted(), vec![rule.clone()]);
        assert_eq!(firewall.deleted(), vec![rule]);
    }

    #[test]
    fn test_timeout_removes_rule() {
        let firewall = RecordingFirewall::default();
        let listener = GuestNetworkWaiter::new(&firewall).listen(LOCALHOST, 0).unwrap();
        let port = listener.local_addr().port();

        let err = listener.wait(Duration::from_millis(250)).unwrap_err();
        match err {
            Error::BootTimeout { port: p, .. } => assert_eq!(p, port),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(firewall.deleted(), vec![FirewallRule::accept_tcp(port)]);
    }

    #[test]
    fn test_cancel_removes_rule() {
        let firewall = RecordingFirewall::default();
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = GuestNetworkWaiter::new(&firewall)
            .with_cancel(cancel)
            .wait_for_boot(LOCALHOST, 0, Duration::from_secs(10));

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(firewall.inserted().len(), 1);
        assert_eq!(firewall.deleted().len(), 1);
    }

    #[test]
    fn test_insert_failure_skips_wait() {
        let firewall = RecordingFirewall {
            fail_insert: true,
            ..Default::default()
        };
        let started = Instant::now();
        let result = GuestNetworkWaiter::new(&firewall).wait_for_boot(
            LOCALHOST,
            0,
            Duration::from_secs(30),
        );

        assert!(matches!(result, Err(Error::ExternalTool { .. })));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(firewall.deleted().is_empty());
    }

    #[test]
    fn test_delete_failure_keeps_result() {
        let firewall = RecordingFirewall {
            fail_delete: true,
            ..Default::default()
        };
        let listener = GuestNetworkWaiter::new(&firewall).listen(LOCALHOST, 0).unwrap();
        let addr = listener.local_addr();
        let guest = thread::spawn(move || TcpStream::connect(addr).map(|_| ()));

        assert_eq!(listener.wait(Duration::from_secs(10)).unwrap(), LOCALHOST);
        guest.join().unwrap().unwrap();
        assert_eq!(firewall.deleted().len(), 1);
    }
}
