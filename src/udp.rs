//! Shared UDP endpoint used for both RTP receive and send. A single socket
//! is bound once and handed to both the receiver and sender tasks; bind and
//! close are both idempotent so either task (or the call teardown path) can
//! drive the lifecycle without racing the other.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct SharedUdpEndpoint {
    inner: Arc<Mutex<Option<Arc<UdpSocket>>>>,
}

impl SharedUdpEndpoint {
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(None)) }
    }

    /// Bind the endpoint if not already bound; otherwise return the
    /// existing socket. Safe to call from both the receiver and sender
    /// setup paths.
    pub async fn bind(&self, addr: &str, recv_buf_size: usize) -> anyhow::Result<Arc<UdpSocket>> {
        let mut guard = self.inner.lock().await;
        if let Some(sock) = guard.as_ref() {
            return Ok(sock.clone());
        }
        let sock = Arc::new(bind_reuseport(addr, recv_buf_size).await?);
        *guard = Some(sock.clone());
        Ok(sock)
    }

    /// Drop the held socket reference. Safe to call more than once or
    /// concurrently with `bind` — a second close is a no-op.
    pub async fn close(&self) {
        let mut guard = self.inner.lock().await;
        *guard = None;
    }
}

impl Default for SharedUdpEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

async fn bind_reuseport(addr: &str, recv_buf_size: usize) -> anyhow::Result<UdpSocket> {
    let parsed: SocketAddr = addr.parse()?;

    let socket = socket2::Socket::new(
        match parsed {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::DGRAM,
        Some(socket2::Protocol::UDP),
    )?;

    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.set_recv_buffer_size(recv_buf_size)?;
    socket.bind(&parsed.into())?;

    let std_socket: std::net::UdpSocket = socket.into();
    Ok(UdpSocket::from_std(std_socket)?)
}
