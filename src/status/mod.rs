//! Status publication and observation through a shared directory.
//!
//! Agents publish with [`writer::AgentOutputWriter`]; observers anywhere read
//! those documents back with [`sync::StatusSynchronizer`]. Both sides agree on
//! the markdown layout in [`document`].

pub mod document;
pub mod sync;
pub mod types;
pub mod writer;

pub use document::{parse_status_document, render_status_document};
pub use sync::{StatusEvent, StatusSynchronizer};
pub use types::{AgentMetrics, AgentState, AgentStatusRecord, CurrentActivity, RecentAction};
pub use writer::AgentOutputWriter;
