use once_cell::sync::Lazy;
use socket2::{Domain, Protocol, Type};
use std::net::{AddrParseError, IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Instant;
use std::{io, net};
use tokio::net::UdpSocket;

use oscsync_core::io::{DatagramSink, IoError, MonotonicClock};

/// Largest payload a single UDP datagram can carry.
pub const MAX_DATAGRAM_SIZE: usize = 65_536;

// this will be common for all our sockets
pub fn new_socket() -> io::Result<socket2::Socket> {
    let socket = socket2::Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

    // the capture task awaits readiness, replay must never block the tick loop
    socket.set_nonblocking(true)?;

    Ok(socket)
}

/// Bind a receive socket on all interfaces.
///
/// No address reuse: a port that is already taken must fail here.
pub fn create_udp_listen(port: u16) -> io::Result<UdpSocket> {
    let socket = new_socket()?;

    let socketaddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    socket.bind(&socket2::SockAddr::from(socketaddr))?;
    log::trace!("Binding socket to {}", socketaddr);

    let socket = UdpSocket::from_std(socket.into())?;
    Ok(socket)
}

/// Unconnected send socket on an ephemeral port.
pub fn create_udp_send() -> io::Result<net::UdpSocket> {
    let socket = new_socket()?;

    let socketaddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
    socket.bind(&socket2::SockAddr::from(socketaddr))?;
    let _ = socket.set_broadcast(true);

    Ok(socket.into())
}

pub fn parse_target(ip: &str, port: u16) -> Result<SocketAddrV4, AddrParseError> {
    Ok(SocketAddrV4::new(ip.trim().parse()?, port))
}

// =============================================================================
// UdpSender
// =============================================================================

/// Replay transport over a non-blocking std socket.
pub struct UdpSender {
    socket: net::UdpSocket,
}

impl UdpSender {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            socket: create_udp_send()?,
        })
    }
}

impl DatagramSink for UdpSender {
    fn send_to(&mut self, data: &[u8], target: SocketAddrV4) -> Result<usize, IoError> {
        self.socket.send_to(data, target).map_err(IoError::from)
    }
}

// =============================================================================
// SystemClock
// =============================================================================

static ORIGIN: Lazy<Instant> = Lazy::new(Instant::now);

/// Monotonic seconds since the first use in this process.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl MonotonicClock for SystemClock {
    fn now(&self) -> f64 {
        ORIGIN.elapsed().as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_target() {
        assert_eq!(
            parse_target("192.168.1.20", 8000).unwrap(),
            SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 20), 8000)
        );
        assert!(parse_target("not-an-ip", 8000).is_err());
        assert!(parse_target("::1", 8000).is_err());
    }

    #[test]
    fn test_udp_sender_loopback() {
        let receiver = net::UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let target = match receiver.local_addr().unwrap() {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(_) => unreachable!(),
        };

        let mut sender = UdpSender::new().unwrap();
        assert_eq!(sender.send_to(b"/ping\0\0\0", target).unwrap(), 8);

        let mut buf = [0u8; 64];
        let (len, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"/ping\0\0\0");
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock;
        let a = clock.now();
        std::thread::sleep(Duration::from_millis(5));
        let b = clock.now();
        assert!(b > a);
    }

    #[tokio::test]
    async fn test_listen_port_in_use() {
        let first = create_udp_listen(0).unwrap();
        let port = first.local_addr().unwrap().port();

        assert!(create_udp_listen(port).is_err());
    }
}
