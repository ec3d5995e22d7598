use bs_core::{ScriptError, ScriptValue};

use crate::engine::EngineHandle;

/// Observer of engine transitions.
///
/// Every callback runs on the engine's worker thread. A started engine fires
/// exactly one of `on_finish`, `on_abort` or `on_exception`.
pub trait ScriptListener: Send + Sync {
    fn on_start(&self, _engine: &EngineHandle) {}

    /// The script parked; `request` is what it yielded.
    fn on_suspend(&self, _engine: &EngineHandle, _request: &ScriptValue) {}

    fn on_exception(&self, _engine: &EngineHandle, _error: &ScriptError) {}

    fn on_abort(&self, _engine: &EngineHandle) {}

    fn on_finish(&self, _engine: &EngineHandle) {}
}
