//! `QueryHandle` and `QueryCache` (spec §4.3), grounded in
//! `examples/original_source/basex.py`'s `Query` class.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::sync::session::{FullStream, ResultsStream, Session};

/// A single query instance tracked by its server-assigned id.
///
/// Mirrors the Python `Query` helper's `open`/`close` lifecycle, but carries
/// no reference to a `Session`: every operation takes the session it should
/// run against, so a handle can be moved between cache entries freely.
#[derive(Debug, Clone)]
pub struct QueryHandle {
    source: String,
    id: Option<u32>,
}

impl QueryHandle {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            id: None,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_open(&self) -> bool {
        self.id.is_some()
    }

    fn id(&self) -> Result<u32> {
        self.id.ok_or_else(|| Error::Query {
            context: self.source.clone(),
            info: "query handle is not open".to_string(),
        })
    }

    /// Send the query text to the server and record the id it allocates.
    pub fn open(&mut self, session: &mut Session) -> Result<u32> {
        if self.id.is_some() {
            return Err(Error::Query {
                context: self.source.clone(),
                info: "query handle is already open".to_string(),
            });
        }
        let id = session.query_create(&self.source)?;
        tracing::debug!(query_id = id, "opened xquery");
        self.id = Some(id);
        Ok(id)
    }

    /// Free the query's resources on the server. The handle may be
    /// [`open`](Self::open)ed again afterwards.
    pub fn close(&mut self, session: &mut Session) -> Result<()> {
        let id = self.id.take().ok_or_else(|| Error::Query {
            context: self.source.clone(),
            info: "query handle is not open".to_string(),
        })?;
        session.query_close(id)
    }

    pub fn execute(&self, session: &mut Session) -> Result<String> {
        session.query_execute(self.id()?)
    }

    pub fn results<'s>(&self, session: &'s mut Session) -> Result<ResultsStream<'s>> {
        session.query_results(self.id()?)
    }

    pub fn full<'s>(&self, session: &'s mut Session) -> Result<FullStream<'s>> {
        session.query_full(self.id()?)
    }

    pub fn info(&self, session: &mut Session) -> Result<String> {
        session.query_info(self.id()?)
    }

    pub fn options(&self, session: &mut Session) -> Result<String> {
        session.query_options(self.id()?)
    }

    pub fn updating(&self, session: &mut Session) -> Result<bool> {
        session.query_updating(self.id()?)
    }

    pub fn bind(&self, session: &mut Session, name: &str, value: &str, xquery_type: &str) -> Result<()> {
        session.query_bind(self.id()?, name, value, xquery_type)
    }

    pub fn context(&self, session: &mut Session, value: &str, xquery_type: &str) -> Result<()> {
        session.query_context(self.id()?, value, xquery_type)
    }
}

/// Re-exported so downstream code can iterate results without reaching
/// into [`crate::sync::session`] directly.
pub type Results<'s> = ResultsStream<'s>;
pub type Full<'s> = FullStream<'s>;
pub type ResultItem = crate::sync::session::ResultItem;
pub type QueryFullItem = crate::sync::session::FullItem;

/// Per-session cache from query source text to an open [`QueryHandle`]
/// (spec §4.3). Opens on first access; closing removes and frees it.
#[derive(Debug, Default)]
pub struct QueryCache {
    entries: HashMap<String, QueryHandle>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the open handle for `source`, opening (and caching) one if
    /// this is the first access.
    pub fn get_or_open(&mut self, source: &str, session: &mut Session) -> Result<&QueryHandle> {
        if !self.entries.contains_key(source) {
            let mut handle = QueryHandle::new(source);
            handle.open(session)?;
            self.entries.insert(source.to_string(), handle);
        }
        Ok(self.entries.get(source).expect("just inserted above"))
    }

    /// Close and evict the cached handle for `source`, if any.
    pub fn remove(&mut self, source: &str, session: &mut Session) -> Result<()> {
        if let Some(mut handle) = self.entries.remove(source) {
            handle.close(session)?;
        }
        Ok(())
    }

    /// Close every cached handle. Best-effort: keeps going after an error
    /// so one broken entry doesn't leak the rest, and returns the last
    /// error seen.
    pub fn close_all(&mut self, session: &mut Session) -> Result<()> {
        let mut last_err = None;
        for (_, mut handle) in self.entries.drain() {
            if let Err(e) = handle.close(session) {
                tracing::warn!(error = %e, "failed to close cached query handle");
                last_err = Some(e);
            }
        }
        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
