//! A client for BaseX-compatible XML database servers.
//!
//! Open a [`sync::Session`] directly for raw command/query access, or use
//! [`Database`] for a typed, path-addressed view of one database plus the
//! [`Table`] expression builder for composing XQuery selections.

mod buffer;
pub mod constant;
pub mod database;
pub mod dom;
pub mod error;
pub mod locking;
mod opts;
pub mod query;
pub mod sync;
pub mod table;
mod value;
mod wire;

pub use database::Database;
pub use dom::DomValue;
pub use opts::Opts;
pub use query::{QueryCache, QueryHandle};
pub use sync::Session;
pub use table::{Selector, Table};
pub use value::Value;
