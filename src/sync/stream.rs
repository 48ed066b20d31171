use std::io::{Read, Write};
use std::net::TcpStream;

#[cfg(feature = "tls")]
use native_tls::TlsStream;

/// The underlying transport for a [`super::Session`].
///
/// Buffering is owned by [`crate::buffer::RecvBuffer`]/[`crate::buffer::SendBuffer`]
/// one layer up, so `Stream` only exposes raw chunked reads and vectored
/// writes, matching the socket-level operations the Python client's
/// `SocketWrapper` performs directly on its `socket.socket`.
pub enum Stream {
    Tcp(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<TlsStream<TcpStream>>),
}

impl Stream {
    pub fn tcp(stream: TcpStream) -> Self {
        Self::Tcp(stream)
    }

    #[cfg(feature = "tls")]
    pub fn upgrade_to_tls(self, host: &str) -> crate::error::Result<Self> {
        let tcp = match self {
            Self::Tcp(stream) => stream,
            Self::Tls(_) => {
                return Err(crate::error::Error::BadConfig(
                    "connection is already using TLS".to_string(),
                ));
            }
        };

        let connector = native_tls::TlsConnector::new()?;
        let tls_stream = connector.connect(host, tcp).map_err(|e| {
            crate::error::Error::BadConfig(format!("TLS handshake failed: {e}"))
        })?;
        Ok(Self::Tls(Box::new(tls_stream)))
    }

    /// Read up to `buf.len()` bytes (at most 4096 per the wire contract,
    /// spec §4.1), blocking until at least one byte arrives.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Tcp(s) => s.read(buf),
            #[cfg(feature = "tls")]
            Self::Tls(s) => s.read(buf),
        }
    }

    pub fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Self::Tcp(s) => s.write_all(buf),
            #[cfg(feature = "tls")]
            Self::Tls(s) => s.write_all(buf),
        }
    }

    pub fn set_nodelay(&self, nodelay: bool) -> std::io::Result<()> {
        match self {
            Self::Tcp(s) => s.set_nodelay(nodelay),
            #[cfg(feature = "tls")]
            Self::Tls(s) => s.get_ref().set_nodelay(nodelay),
        }
    }
}
