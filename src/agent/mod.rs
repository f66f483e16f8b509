//! Agent process composition.

pub mod runtime;

pub use runtime::AgentRuntime;
