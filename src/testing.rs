//! In-memory stand-ins for MySQL servers and webhooks.
//!
//! These let the reconciler, the sync engine and the orchestrator run
//! end to end without a database server:
//!
//! - `MemoryEndpoint` - one database whose tables are defined by
//!   `CREATE TABLE` statements and hold rows as field maps
//! - `MemoryConnector` - a set of `MemoryEndpoint`s keyed by server and
//!   database name, creating databases on request
//! - `RecordingNotifier` - remembers every webhook URL it was asked to call
//!

pub mod memory;
pub mod notifier;

pub use memory::{MemoryConnector, MemoryEndpoint};
pub use notifier::RecordingNotifier;
