//! Cross-platform socket configuration for the client carriers.
//!
//! [`SocketConfig`] holds the TCP options applied to every outgoing stream
//! (TCP_NODELAY, keepalive). [`connected_udp_socket`] builds the single
//! connected, non-blocking UDP socket a datagram client owns.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use tokio::net::TcpStream;

/// Platform-specific TCP socket configuration applied to every connection.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Disable Nagle's algorithm for lower latency. Default: true.
    pub tcp_nodelay: bool,
    /// Enable TCP keepalive. Default: true.
    pub keepalive_enabled: bool,
    /// Keepalive idle time before the first probe. Default: 60s.
    pub keepalive_idle: Duration,
    /// Keepalive probe interval. Default: 10s.
    pub keepalive_interval: Duration,
    /// Number of keepalive probes before declaring connection dead. Default: 3.
    pub keepalive_retries: u32,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            tcp_nodelay: true,
            keepalive_enabled: true,
            keepalive_idle: Duration::from_secs(60),
            keepalive_interval: Duration::from_secs(10),
            keepalive_retries: 3,
        }
    }
}

/// Apply socket configuration to a connected [`TcpStream`].
pub fn configure_stream(stream: &TcpStream, config: &SocketConfig) -> std::io::Result<()> {
    stream.set_nodelay(config.tcp_nodelay)?;

    if config.keepalive_enabled {
        let sock_ref = SockRef::from(stream);
        let keepalive = TcpKeepalive::new()
            .with_time(config.keepalive_idle)
            .with_interval(config.keepalive_interval);

        // Retries are supported on Linux and Windows but not macOS.
        #[cfg(any(target_os = "linux", target_os = "windows"))]
        let keepalive = keepalive.with_retries(config.keepalive_retries);

        sock_ref.set_tcp_keepalive(&keepalive)?;
    }

    Ok(())
}

/// Bind an ephemeral local UDP port of the same family as `remote` and
/// connect it, so only datagrams from `remote` are received.
///
/// The socket is non-blocking and ready for `tokio::net::UdpSocket::from_std`.
pub fn connected_udp_socket(remote: SocketAddr) -> std::io::Result<std::net::UdpSocket> {
    let (domain, local) = if remote.is_ipv6() {
        (
            Domain::IPV6,
            SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), 0),
        )
    } else {
        (
            Domain::IPV4,
            SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0),
        )
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(true)?;
    socket.bind(&local.into())?;
    socket.connect(&remote.into())?;
    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_nodelay_is_set() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = TcpStream::connect(addr).await.unwrap();
        configure_stream(&client, &SocketConfig::default()).unwrap();

        assert!(client.nodelay().unwrap(), "TCP_NODELAY should be enabled");
    }

    #[tokio::test]
    async fn test_nodelay_disabled_when_configured() {
        let config = SocketConfig {
            tcp_nodelay: false,
            ..Default::default()
        };
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = TcpStream::connect(addr).await.unwrap();
        configure_stream(&client, &config).unwrap();

        assert!(
            !client.nodelay().unwrap(),
            "TCP_NODELAY should be disabled when configured off"
        );
    }

    #[tokio::test]
    async fn test_keepalive_is_configured() {
        let config = SocketConfig {
            keepalive_idle: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(5),
            ..Default::default()
        };
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = TcpStream::connect(addr).await.unwrap();
        configure_stream(&client, &config).unwrap();

        let sock_ref = SockRef::from(&client);
        assert!(sock_ref.keepalive().unwrap(), "Keepalive should be enabled");
    }

    #[test]
    fn test_udp_socket_is_connected_to_remote() {
        let peer = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let remote = peer.local_addr().unwrap();

        let socket = connected_udp_socket(remote).unwrap();
        assert_eq!(socket.peer_addr().unwrap(), remote);
        assert_ne!(socket.local_addr().unwrap().port(), 0);
    }

    #[test]
    fn test_udp_socket_on_ipv6() {
        let Ok(peer) = std::net::UdpSocket::bind("[::1]:0") else {
            eprintln!("IPv6 not available, skipping test");
            return;
        };
        let remote = peer.local_addr().unwrap();
        let socket = connected_udp_socket(remote).unwrap();
        assert!(socket.local_addr().unwrap().is_ipv6());
    }
}
