//! `WireCodec`: primitive send/receive of bytes, zero-terminated strings,
//! and buffer management over a socket (spec §4.1).

use crate::buffer::{RecvBuffer, SendBuffer};
use crate::error::{Error, Result};
use crate::sync::stream::Stream;

const RECV_CHUNK: usize = 4096;
const TERMINATOR: u8 = 0x00;

/// Translates between a byte-oriented TCP/TLS stream and the protocol's
/// primitive frames: single bytes, zero-terminated UTF-8 strings, and raw
/// byte runs.
pub struct WireCodec {
    stream: Stream,
    in_buffer: RecvBuffer,
    out_buffer: SendBuffer,
}

impl WireCodec {
    pub fn new(stream: Stream) -> Self {
        Self {
            stream,
            in_buffer: RecvBuffer::new(),
            out_buffer: SendBuffer::new(),
        }
    }

    #[allow(dead_code)]
    pub fn into_stream(self) -> Stream {
        self.stream
    }

    #[allow(dead_code)]
    pub fn stream_mut(&mut self) -> &mut Stream {
        &mut self.stream
    }

    /// Enqueue a single octet for sending.
    pub fn send_byte(&mut self, b: u8) {
        self.out_buffer.push_byte(b);
    }

    /// Enqueue `s` as UTF-8 followed by a single zero terminator.
    pub fn send_string(&mut self, s: &str) {
        self.out_buffer.push_bytes(s.as_bytes());
        self.out_buffer.push_byte(TERMINATOR);
    }

    /// Enqueue raw bytes without a terminator (binary content; zero-byte
    /// escaping is a known limitation, spec §1/§9).
    pub fn send_bytes(&mut self, bytes: &[u8]) {
        self.out_buffer.push_bytes(bytes);
    }

    /// Drain the outbound buffer to the socket as one write.
    pub fn flush(&mut self) -> Result<()> {
        let pending = self.out_buffer.take();
        if !pending.is_empty() {
            self.stream.write_all(&pending)?;
        }
        Ok(())
    }

    fn fill_until(&mut self, predicate: impl Fn(&RecvBuffer) -> bool) -> Result<()> {
        let mut chunk = [0u8; RECV_CHUNK];
        while !predicate(&self.in_buffer) {
            let n = self.stream.read_chunk(&mut chunk)?;
            if n == 0 {
                return Err(Error::Protocol(
                    "connection closed while waiting for data".to_string(),
                ));
            }
            self.in_buffer.put(chunk[..n].to_vec());
        }
        Ok(())
    }

    /// Return the next octet, blocking-refilling from the socket in chunks
    /// of at most 4096 bytes.
    pub fn recv_byte(&mut self) -> Result<u8> {
        self.fill_until(|buf| !buf.is_empty())?;
        let bytes = self
            .in_buffer
            .get(1)
            .ok_or_else(|| Error::Protocol("buffer underrun reading byte".to_string()))?;
        Ok(bytes[0])
    }

    /// Return the UTF-8 bytes up to (not including) the next zero byte,
    /// consuming the terminator.
    pub fn recv_string(&mut self) -> Result<String> {
        self.fill_until(|buf| buf.contains(TERMINATOR))?;
        let index = self
            .in_buffer
            .index_of(TERMINATOR)
            .ok_or_else(|| Error::Protocol("terminator vanished after fill".to_string()))?;
        let body = self
            .in_buffer
            .get(index)
            .ok_or_else(|| Error::Protocol("buffer underrun reading string".to_string()))?;
        let terminator = self.in_buffer.get(1).ok_or_else(|| {
            Error::Protocol("buffer underrun reading string terminator".to_string())
        })?;
        debug_assert_eq!(terminator[0], TERMINATOR);
        simdutf8::basic::from_utf8(&body)
            .map(ToString::to_string)
            .map_err(|e| Error::Protocol(format!("invalid UTF-8 in server string: {e}")))
    }

    /// Invariant check between request/response pairs (spec §3, §4.2).
    pub fn are_buffers_empty(&self) -> bool {
        let ok = self.in_buffer.is_empty() && self.out_buffer.is_empty();
        if !ok {
            tracing::error!(
                in_len = self.in_buffer.len(),
                "protocol buffers not empty after a complete operation"
            );
        }
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = thread::spawn(move || TcpStream::connect(addr).unwrap());
        let (server, _) = listener.accept().unwrap();
        (server, client.join().unwrap())
    }

    #[test]
    fn round_trips_string_and_byte() {
        let (mut server, client) = loopback_pair();
        let mut codec = WireCodec::new(Stream::tcp(client));

        let writer = thread::spawn(move || {
            use std::io::Write;
            server.write_all(b"hello\0").unwrap();
            server.write_all(&[0x42]).unwrap();
        });

        assert_eq!(codec.recv_string().unwrap(), "hello");
        assert_eq!(codec.recv_byte().unwrap(), 0x42);
        assert!(codec.are_buffers_empty());
        writer.join().unwrap();
    }

    #[test]
    fn send_then_flush_writes_everything() {
        let (mut server, client) = loopback_pair();
        let mut codec = WireCodec::new(Stream::tcp(client));
        codec.send_string("abc");
        codec.send_byte(7);
        codec.flush().unwrap();

        use std::io::Read;
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, &[b'a', b'b', b'c', 0x00, 7]);
        assert!(codec.are_buffers_empty());
    }
}
