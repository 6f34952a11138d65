//! Embedded JavaScript execution contexts for content frames and windows.

mod context;
mod globals;
mod timers;
pub mod processor;
pub mod runtime;
pub mod script;

pub use context::{ClickListener, ContextError, ExecutionContext, ListenerId, MAX_FRAME_DEPTH};
pub use processor::ScriptExecutionSummary;
pub use timers::{HostTask, TimerId};
