//! Script execution engine for robot-control programs.
//!
//! A [`ScriptEngine`] owns one worker thread that compiles and drives a Lua
//! program. Scripts call host functions exported by [`Capability`] objects;
//! yielding host functions park the script until the controller calls
//! [`ScriptEngine::resume`] with a value.

mod bridge;
pub mod builtins;
mod context;
mod continuation;
mod engine;
mod listener;
mod options;
mod registry;

pub use context::{AbortHandle, CompiledProgram, Continuation, ExecutionContext, Outcome};
pub use continuation::{ContinuationStore, StoreError};
pub use engine::{EngineHandle, ScriptEngine};
pub use listener::ScriptListener;
pub use options::{
    EngineOptions, DEFAULT_ABORT_CHECK_INTERVAL, DEFAULT_CHUNK_NAME, DEFAULT_IDLE_POLL_MS,
    DEFAULT_THREAD_NAME,
};
pub use registry::{CallMode, Capability, FnCapability, HostExport, HostFunction, HostFunctionTable};
