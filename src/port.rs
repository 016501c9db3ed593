//! Free-port discovery by connect probing.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

use crate::errors::PortError;

/// Both loopback families `localhost` may resolve to.
pub const PROBE_HOSTS: [IpAddr; 2] = [
    IpAddr::V4(Ipv4Addr::LOCALHOST),
    IpAddr::V6(Ipv6Addr::LOCALHOST),
];

/// Something that can hand out a TCP port for a dev server.
#[async_trait]
pub trait PortSource: Send + Sync {
    /// Return a port believed to be free, never one listed in `exclude`.
    async fn allocate(&self, exclude: &[u16]) -> Result<u16, PortError>;
}

/// True if something accepts a TCP connection on `localhost:port`, over
/// either IPv4 or IPv6, within `timeout`.
pub async fn is_accepting(port: u16, timeout: Duration) -> bool {
    let [v4, v6] = PROBE_HOSTS.map(|ip| SocketAddr::new(ip, port));
    let (v4, v6) = tokio::join!(connects(v4, timeout), connects(v6, timeout));
    v4 || v6
}

async fn connects(addr: SocketAddr, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

/// Scans an inclusive port range in ascending order.
///
/// A port counts as free when a connect attempt fails. Nothing is reserved,
/// so another process may still bind the port before the dev server does;
/// the supervisor deals with that race.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    start: u16,
    end: u16,
    probe_timeout: Duration,
}

impl PortAllocator {
    pub fn new(start: u16, end: u16, probe_timeout: Duration) -> Self {
        Self {
            start,
            end,
            probe_timeout,
        }
    }

    pub fn range(&self) -> (u16, u16) {
        (self.start, self.end)
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(3000, 3100, Duration::from_secs(1))
    }
}

#[async_trait]
impl PortSource for PortAllocator {
    async fn allocate(&self, exclude: &[u16]) -> Result<u16, PortError> {
        for port in self.start..=self.end {
            if exclude.contains(&port) {
                continue;
            }
            if is_accepting(port, self.probe_timeout).await {
                debug!(port, "port in use");
                continue;
            }
            debug!(port, "allocated port");
            return Ok(port);
        }
        Err(PortError::NoPortAvailable {
            start: self.start,
            end: self.end,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn bind_ephemeral() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[tokio::test]
    async fn test_allocate_skips_port_in_use() {
        let (_listener, taken) = bind_ephemeral().await;
        let allocator = PortAllocator::new(taken, taken.saturating_add(20), Duration::from_millis(500));
        let port = allocator.allocate(&[]).await.unwrap();
        assert_ne!(port, taken);
        assert!(port > taken);
    }

    #[tokio::test]
    async fn test_allocate_all_taken() {
        let (_listener, taken) = bind_ephemeral().await;
        let allocator = PortAllocator::new(taken, taken, Duration::from_millis(500));
        let err = allocator.allocate(&[]).await.unwrap_err();
        assert!(matches!(err, PortError::NoPortAvailable { .. }));
    }

    #[tokio::test]
    async fn test_allocate_honours_exclude() {
        let (listener, port) = bind_ephemeral().await;
        drop(listener);
        let allocator = PortAllocator::new(port, port, Duration::from_millis(500));
        assert_eq!(allocator.allocate(&[]).await.unwrap(), port);
        assert!(allocator.allocate(&[port]).await.is_err());
    }

    #[tokio::test]
    async fn test_is_accepting() {
        let (listener, port) = bind_ephemeral().await;
        assert!(is_accepting(port, Duration::from_millis(500)).await);
        drop(listener);
        assert!(!is_accepting(port, Duration::from_millis(500)).await);
    }

    #[tokio::test]
    async fn test_ipv6_only_listener_counts_as_taken() {
        // Hosts without IPv6 loopback have nothing to check.
        let Ok(listener) = TcpListener::bind("[::1]:0").await else {
            return;
        };
        let port = listener.local_addr().unwrap().port();
        assert!(is_accepting(port, Duration::from_millis(500)).await);

        let allocator = PortAllocator::new(port, port, Duration::from_millis(500));
        assert!(allocator.allocate(&[]).await.is_err());
    }
}
