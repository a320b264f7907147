//! Plain TCP transport.
//!
//! NETCONF over bare TCP is only seen in labs and simulators; production
//! devices use SSH or TLS, which are established outside this crate and
//! handed in through [`StreamTransport::new`].

use std::net::SocketAddr;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use super::StreamTransport;
use crate::config::TransportConfig;
use crate::error::Result;

/// Stream transport over a TCP connection.
pub type TcpTransport = StreamTransport<OwnedReadHalf, OwnedWriteHalf>;

impl StreamTransport<OwnedReadHalf, OwnedWriteHalf> {
    /// Connect to `addr` with default limits.
    pub async fn connect_tcp(addr: SocketAddr) -> Result<Self> {
        Self::connect_tcp_with_config(addr, &TransportConfig::default()).await
    }

    /// Connect to `addr` with the given limits.
    pub async fn connect_tcp_with_config(addr: SocketAddr, config: &TransportConfig) -> Result<Self> {
        tracing::debug!("Connecting to {}", addr);
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Self::with_config(reader, writer, config))
    }
}
