use std::{
    fmt,
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket},
    time::Duration,
};

/// A best-effort datagram transport.
///
/// Each call to [`send`][Transport::send] transmits one payload as an independent datagram. There is no
/// acknowledgement and no retry: callers treat errors as a lost payload and move on.
///
/// Only the sender thread calls into the transport, but it is shared with the client that owns it so that a stopped
/// client can be restarted without reopening its socket.
pub trait Transport: Send + Sync {
    /// Sends a single payload.
    ///
    /// # Errors
    ///
    /// If the payload could not be handed to the network, an error is returned.
    fn send(&self, payload: &[u8]) -> io::Result<usize>;

    /// Returns the transport ID, a short acronym used when logging.
    fn transport_id(&self) -> &'static str {
        "custom"
    }
}

/// A UDP transport sending to a fixed, pre-resolved address.
pub struct UdpTransport {
    socket: UdpSocket,
    remote_addr: SocketAddr,
}

impl UdpTransport {
    /// Opens an ephemeral local socket and connects it to `remote_addr`.
    ///
    /// Sends that take longer than `write_timeout` fail, and the payload is dropped.
    ///
    /// # Errors
    ///
    /// If the socket cannot be bound, connected, or configured, an error is returned.
    pub fn connect(remote_addr: SocketAddr, write_timeout: Duration) -> io::Result<Self> {
        let local_addr = if remote_addr.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };

        let socket = UdpSocket::bind(local_addr)?;
        socket.connect(remote_addr)?;
        socket.set_write_timeout(Some(write_timeout))?;

        Ok(UdpTransport { socket, remote_addr })
    }

    /// Returns the address payloads are sent to.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }
}

impl Transport for UdpTransport {
    fn send(&self, payload: &[u8]) -> io::Result<usize> {
        self.socket.send(payload)
    }

    fn transport_id(&self) -> &'static str {
        "udp"
    }
}

impl fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdpTransport").field("remote_addr", &self.remote_addr).finish_non_exhaustive()
    }
}
