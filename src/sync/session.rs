//! The protocol state machine: login, commands, and the query lifecycle
//! (spec §4.2), grounded in `examples/original_source/basex.py`'s `Session`.

use md5::{Digest, Md5};
use std::net::TcpStream;

use crate::constant::{xdm_type_name, Opcode, Status, FULL_STREAM_METADATA_TYPEIDS};
use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::sync::stream::Stream;
use crate::wire::WireCodec;

fn md5_hex(s: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(s.as_bytes());
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        // infallible: writing to a String never fails.
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// A single authenticated connection to a BaseX-compatible server.
///
/// All operations take `&mut self`: the wire protocol is request/response
/// over one socket, so a session is inherently single-threaded. Callers
/// that need to share a session across threads wrap it in a `Mutex`
/// (spec §5, "session-level" concurrency).
pub struct Session {
    wire: WireCodec,
    user: String,
    /// Set once a fatal protocol error is observed; every further call is
    /// rejected immediately instead of desynchronizing the wire further.
    poisoned: bool,
}

impl Session {
    /// Open a TCP (optionally TLS) connection and log in.
    pub fn connect(opts: &Opts) -> Result<Self> {
        let tcp = TcpStream::connect((opts.host.as_str(), opts.port))?;
        tcp.set_nodelay(opts.tcp_nodelay)?;
        #[allow(unused_mut)]
        let mut stream = Stream::tcp(tcp);

        #[cfg(feature = "tls")]
        if opts.tls {
            stream = stream.upgrade_to_tls(&opts.host)?;
        }
        #[cfg(not(feature = "tls"))]
        if opts.tls {
            return Err(Error::BadConfig(
                "TLS was requested but the `tls` feature is not enabled".to_string(),
            ));
        }

        let mut session = Self {
            wire: WireCodec::new(stream),
            user: opts.user.clone(),
            poisoned: false,
        };
        session.login(&opts.password)?;
        Ok(session)
    }

    /// Build a session around an already-open stream, skipping the login
    /// handshake. Used by compile-only tests that never touch the wire.
    #[cfg(test)]
    pub(crate) fn offline_for_tests(stream: Stream) -> Self {
        Self {
            wire: WireCodec::new(stream),
            user: String::new(),
            poisoned: false,
        }
    }

    fn check_alive(&self) -> Result<()> {
        if self.poisoned {
            return Err(Error::Protocol(
                "session is poisoned by a previous protocol error".to_string(),
            ));
        }
        Ok(())
    }

    fn poison(&mut self, err: Error) -> Error {
        self.poisoned = true;
        err
    }

    fn check_buffers_empty(&mut self, op: &str) -> Result<()> {
        if self.wire.are_buffers_empty() {
            Ok(())
        } else {
            Err(self.poison(Error::Protocol(format!(
                "garbage left in protocol buffers ({op})"
            ))))
        }
    }

    fn recv_status(&mut self, op: &str) -> Result<Status> {
        let b = self.wire.recv_byte().map_err(|e| self.poison(e))?;
        Status::from_byte(b)
            .ok_or_else(|| self.poison(Error::Protocol(format!(
                "expected status byte 0 or 1 for {op}, got {b:#x}"
            ))))
    }

    fn login(&mut self, password: &str) -> Result<()> {
        let challenge = self.wire.recv_string().map_err(|e| self.poison(e))?;
        let (realm, nonce) = challenge
            .split_once(':')
            .ok_or_else(|| self.poison(Error::Protocol("malformed login challenge".to_string())))?;

        let inner = md5_hex(&format!("{}:{}:{}", self.user, realm, password));
        let response = md5_hex(&format!("{inner}{nonce}"));

        self.wire.send_string(&self.user.clone());
        self.wire.send_string(&response);
        self.wire.flush()?;

        let status = self.recv_status("login")?;
        self.check_buffers_empty("login")?;
        match status {
            Status::Ok => Ok(()),
            Status::Error => Err(Error::Auth {
                user: self.user.clone(),
            }),
        }
    }

    /// Execute a database command (spec: "Command"; no opcode).
    pub fn command(&mut self, command: &str) -> Result<String> {
        self.check_alive()?;
        self.wire.send_string(command);
        self.wire.flush()?;

        let result = self.wire.recv_string().map_err(|e| self.poison(e))?;
        let info = self.wire.recv_string().map_err(|e| self.poison(e))?;
        let status = self.recv_status("COMMAND")?;
        self.check_buffers_empty("COMMAND")?;

        match status {
            Status::Ok => Ok(result),
            Status::Error => Err(Error::Command {
                command: command.to_string(),
                info,
            }),
        }
    }

    /// Inform the server the session is ending (spec: logout is `EXIT`).
    pub fn logout(mut self) -> Result<()> {
        self.command("EXIT")?;
        Ok(())
    }

    pub fn create_database(&mut self, name: &str, input: &str) -> Result<()> {
        self.check_alive()?;
        self.wire.send_byte(Opcode::CreateDatabase as u8);
        self.wire.send_string(name);
        self.wire.send_string(input);
        self.wire.flush()?;

        let info = self.wire.recv_string().map_err(|e| self.poison(e))?;
        let status = self.recv_status("CREATE")?;
        self.check_buffers_empty("CREATE")?;
        match status {
            Status::Ok => Ok(()),
            Status::Error => Err(Error::Command {
                command: format!("CREATE {name}"),
                info,
            }),
        }
    }

    pub fn add(&mut self, name: &str, path: &str, input: &str) -> Result<()> {
        self.check_alive()?;
        self.wire.send_byte(Opcode::Add as u8);
        self.wire.send_string(name);
        self.wire.send_string(path);
        self.wire.send_string(input);
        self.wire.flush()?;

        let info = self.wire.recv_string().map_err(|e| self.poison(e))?;
        let status = self.recv_status("ADD")?;
        self.check_buffers_empty("ADD")?;
        match status {
            Status::Ok => Ok(()),
            Status::Error => Err(Error::Command {
                command: format!("ADD {name} {path}"),
                info,
            }),
        }
    }

    pub fn put(&mut self, path: &str, input: &str) -> Result<()> {
        self.check_alive()?;
        self.wire.send_byte(Opcode::Put as u8);
        self.wire.send_string(path);
        self.wire.send_string(input);
        self.wire.flush()?;

        let info = self.wire.recv_string().map_err(|e| self.poison(e))?;
        let status = self.recv_status("PUT")?;
        self.check_buffers_empty("PUT")?;
        match status {
            Status::Ok => Ok(()),
            Status::Error => Err(Error::Command {
                command: format!("PUT {path}"),
                info,
            }),
        }
    }

    pub fn put_binary(&mut self, path: &str, input: &[u8]) -> Result<()> {
        self.check_alive()?;
        self.wire.send_byte(Opcode::PutBinary as u8);
        self.wire.send_string(path);
        self.wire.send_bytes(input);
        self.wire.send_byte(0x00);
        self.wire.flush()?;

        let info = self.wire.recv_string().map_err(|e| self.poison(e))?;
        let status = self.recv_status("PUTBINARY")?;
        self.check_buffers_empty("PUTBINARY")?;
        match status {
            Status::Ok => Ok(()),
            Status::Error => Err(Error::Command {
                command: format!("PUTBINARY {path}"),
                info,
            }),
        }
    }

    /// Create a new query instance on the server and return its id.
    pub fn query_create(&mut self, text: &str) -> Result<u32> {
        self.check_alive()?;
        self.wire.send_byte(Opcode::QueryCreate as u8);
        self.wire.send_string(text);
        self.wire.flush()?;

        let id_str = self.wire.recv_string().map_err(|e| self.poison(e))?;
        let status = self.recv_status("QUERY")?;
        self.check_buffers_empty("QUERY")?;
        match status {
            Status::Ok => id_str.parse().map_err(|_| {
                Error::Protocol(format!("server returned a non-numeric query id: {id_str}"))
            }),
            Status::Error => Err(Error::Query {
                context: "QUERY".to_string(),
                info: format!("error creating XQuery: {text}"),
            }),
        }
    }

    pub fn query_close(&mut self, id: u32) -> Result<()> {
        self.check_alive()?;
        self.wire.send_byte(Opcode::Close as u8);
        self.wire.send_string(&id.to_string());
        self.wire.flush()?;

        let info = self.wire.recv_string().map_err(|e| self.poison(e))?;
        let status = self.recv_status("CLOSE")?;
        self.check_buffers_empty("CLOSE")?;
        match status {
            Status::Ok => Ok(()),
            Status::Error => Err(Error::Command {
                command: format!("CLOSE {id}"),
                info,
            }),
        }
    }

    /// Shared tail for Bind/Context: a leading zero byte, then the usual
    /// status (with error info only on failure).
    fn finish_zero_prefixed_query_op(&mut self, op: &str, id: u32) -> Result<()> {
        let zero = self.wire.recv_byte().map_err(|e| self.poison(e))?;
        if zero != 0x00 {
            return Err(self.poison(Error::Protocol(format!(
                "expected leading zero byte for {op}, got {zero:#x}"
            ))));
        }
        let status = self.recv_status(op)?;
        match status {
            Status::Ok => {
                self.check_buffers_empty(op)?;
                Ok(())
            }
            Status::Error => {
                let info = self.wire.recv_string().map_err(|e| self.poison(e))?;
                self.check_buffers_empty(op)?;
                Err(Error::Query {
                    context: format!("{op} {id}"),
                    info,
                })
            }
        }
    }

    pub fn query_bind(&mut self, id: u32, name: &str, value: &str, xquery_type: &str) -> Result<()> {
        self.check_alive()?;
        self.wire.send_byte(Opcode::Bind as u8);
        self.wire.send_string(&id.to_string());
        self.wire.send_string(name);
        self.wire.send_string(value);
        self.wire.send_string(xquery_type);
        self.wire.flush()?;
        self.finish_zero_prefixed_query_op("BIND", id)
    }

    pub fn query_context(&mut self, id: u32, value: &str, xquery_type: &str) -> Result<()> {
        self.check_alive()?;
        self.wire.send_byte(Opcode::Context as u8);
        self.wire.send_string(&id.to_string());
        self.wire.send_string(value);
        self.wire.send_string(xquery_type);
        self.wire.flush()?;
        self.finish_zero_prefixed_query_op("CONTEXT", id)
    }

    /// Shared tail for Execute/Info/Options/Updating: a result string then
    /// the usual status (with error info only on failure).
    fn query_string_op(&mut self, op: &str, opcode: Opcode, id: u32) -> Result<String> {
        self.check_alive()?;
        self.wire.send_byte(opcode as u8);
        self.wire.send_string(&id.to_string());
        self.wire.flush()?;

        let result = self.wire.recv_string().map_err(|e| self.poison(e))?;
        let status = self.recv_status(op)?;
        match status {
            Status::Ok => {
                self.check_buffers_empty(op)?;
                Ok(result)
            }
            Status::Error => {
                let info = self.wire.recv_string().map_err(|e| self.poison(e))?;
                self.check_buffers_empty(op)?;
                Err(Error::Query {
                    context: format!("{op} {id}"),
                    info,
                })
            }
        }
    }

    pub fn query_execute(&mut self, id: u32) -> Result<String> {
        self.query_string_op("EXECUTE", Opcode::Execute, id)
    }

    pub fn query_info(&mut self, id: u32) -> Result<String> {
        self.query_string_op("INFO", Opcode::Info, id)
    }

    pub fn query_options(&mut self, id: u32) -> Result<String> {
        self.query_string_op("OPTIONS", Opcode::Options, id)
    }

    pub fn query_updating(&mut self, id: u32) -> Result<bool> {
        Ok(self.query_string_op("UPDATING", Opcode::Updating, id)? == "true")
    }

    /// Finish a streamed operation once its `0x00` terminator typeid has
    /// been read: read the status and, on error, the error-info string.
    fn finish_stream(&mut self, op: &str, id: u32) -> Result<()> {
        let status = self.recv_status(op)?;
        match status {
            Status::Ok => self.check_buffers_empty(op),
            Status::Error => {
                let info = self.wire.recv_string().map_err(|e| self.poison(e))?;
                self.check_buffers_empty(op)?;
                Err(Error::Query {
                    context: format!("{op} {id}"),
                    info,
                })
            }
        }
    }

    /// Stream all result items as `(typeid, value)` pairs, holding the
    /// session for the lifetime of the returned iterator (spec §4.2, §5).
    pub fn query_results(&mut self, id: u32) -> Result<ResultsStream<'_>> {
        self.check_alive()?;
        self.wire.send_byte(Opcode::Results as u8);
        self.wire.send_string(&id.to_string());
        self.wire.flush()?;
        Ok(ResultsStream {
            session: self,
            id,
            done: false,
        })
    }

    /// Like [`Session::query_results`] but each item also carries XDM
    /// metadata for typeids in `{12, 14, 82}` (spec §4.2).
    pub fn query_full(&mut self, id: u32) -> Result<FullStream<'_>> {
        self.check_alive()?;
        self.wire.send_byte(Opcode::Full as u8);
        self.wire.send_string(&id.to_string());
        self.wire.flush()?;
        Ok(FullStream {
            session: self,
            id,
            done: false,
        })
    }
}

/// One item from a [`Session::query_results`] stream: the raw typeid byte,
/// its XDM type name (if the id is recognized), and the serialized value.
pub type ResultItem = (u8, Option<&'static str>, String);

/// Lazy iterator over a `Results` stream. Holds `&mut Session` so the wire
/// cannot be used for anything else until the stream is exhausted or
/// dropped mid-iteration (in which case the session is poisoned, since the
/// server still expects to finish writing the stream).
pub struct ResultsStream<'a> {
    session: &'a mut Session,
    id: u32,
    done: bool,
}

impl Iterator for ResultsStream<'_> {
    type Item = Result<ResultItem>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let typeid = match self.session.wire.recv_byte() {
            Ok(b) => b,
            Err(e) => {
                self.done = true;
                return Some(Err(self.session.poison(e)));
            }
        };
        if typeid == 0x00 {
            self.done = true;
            return self.session.finish_stream("RESULTS", self.id).err().map(Err);
        }
        match self.session.wire.recv_string() {
            Ok(item) => Some(Ok((typeid, xdm_type_name(typeid), item))),
            Err(e) => {
                self.done = true;
                Some(Err(self.session.poison(e)))
            }
        }
    }
}

impl Drop for ResultsStream<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.session.poisoned = true;
        }
    }
}

/// One item from a [`Session::query_full`] stream.
pub type FullItem = (u8, Option<&'static str>, Option<String>, String);

/// Lazy iterator over a `Full` stream; see [`ResultsStream`].
pub struct FullStream<'a> {
    session: &'a mut Session,
    id: u32,
    done: bool,
}

impl Iterator for FullStream<'_> {
    type Item = Result<FullItem>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let typeid = match self.session.wire.recv_byte() {
            Ok(b) => b,
            Err(e) => {
                self.done = true;
                return Some(Err(self.session.poison(e)));
            }
        };
        if typeid == 0x00 {
            self.done = true;
            return self.session.finish_stream("FULL", self.id).err().map(Err);
        }
        let xdm = if FULL_STREAM_METADATA_TYPEIDS.contains(&typeid) {
            match self.session.wire.recv_string() {
                Ok(s) => Some(s),
                Err(e) => {
                    self.done = true;
                    return Some(Err(self.session.poison(e)));
                }
            }
        } else {
            None
        };
        match self.session.wire.recv_string() {
            Ok(item) => Some(Ok((typeid, xdm_type_name(typeid), xdm, item))),
            Err(e) => {
                self.done = true;
                Some(Err(self.session.poison(e)))
            }
        }
    }
}

impl Drop for FullStream<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.session.poisoned = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_hex_matches_known_vector() {
        assert_eq!(md5_hex(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex("abc"), "900150983cd24fb0d6963f7d28e17f72");
    }
}
