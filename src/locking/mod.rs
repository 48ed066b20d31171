//! Reader/writer coordination for documents accessed through one or more
//! [`crate::Table`]s (spec §4.6).

mod composite;
mod registry;
mod rw;

pub use composite::{composite_read, composite_write, CompositeCounter, CompositeReadGuard, CompositeWriteGuard};
pub use registry::LockCoordinator;
pub use rw::{ReadGuard, RwKey, WriteGuard};
