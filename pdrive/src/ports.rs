//! Ephemeral port allocation.
//!
//! A port is obtained by binding a listener to port 0, reading back the
//! number the OS picked, and closing the listener straight away so the child
//! process can bind it. Nothing stops another process from grabbing the
//! number in between; the child reports that race with exit code 10 and the
//! supervisor retries with fresh ports.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};
use thiserror::Error;
use tracing::trace;

/// Errors from port allocation.
#[derive(Debug, Error)]
pub enum PortError {
    /// The OS refused to hand out a socket. Fatal for the whole run.
    #[error("Port allocation resource exhausted: {0}")]
    ResourceExhausted(#[source] io::Error),

    #[error("Invalid bind address '{0}'")]
    InvalidBindAddr(String),
}

/// Source of free local ports.
///
/// Implementations must be stateless across calls: every call is an
/// independent allocation.
pub trait PortAllocator: Send + Sync {
    fn allocate(&self) -> Result<u16, PortError>;

    /// Two independent allocations: `(port.number, port.number1)`.
    fn allocate_pair(&self) -> Result<(u16, u16), PortError> {
        Ok((self.allocate()?, self.allocate()?))
    }
}

/// Allocates OS-assigned ephemeral TCP ports.
#[derive(Debug, Clone, Copy)]
pub struct EphemeralPortAllocator {
    bind_ip: IpAddr,
}

impl EphemeralPortAllocator {
    pub fn new(bind_ip: IpAddr) -> Self {
        Self { bind_ip }
    }

    /// Parse a textual bind address such as `127.0.0.1` or `::1`.
    pub fn from_bind_addr(raw: &str) -> Result<Self, PortError> {
        raw.trim()
            .parse::<IpAddr>()
            .map(Self::new)
            .map_err(|_| PortError::InvalidBindAddr(raw.to_string()))
    }
}

impl Default for EphemeralPortAllocator {
    fn default() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }
}

impl PortAllocator for EphemeralPortAllocator {
    fn allocate(&self) -> Result<u16, PortError> {
        let listener = TcpListener::bind(SocketAddr::new(self.bind_ip, 0))
            .map_err(PortError::ResourceExhausted)?;
        let port = listener
            .local_addr()
            .map_err(PortError::ResourceExhausted)?
            .port();
        drop(listener);
        trace!(port, "Allocated ephemeral port");
        Ok(port)
    }
}
