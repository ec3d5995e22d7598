use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bs_core::{ScriptError, ScriptValue};
use mlua::{
    Error as LuaError, Function, HookTriggers, IntoLuaMulti, Lua, LuaOptions, MultiValue, StdLib,
    Table, Thread, ThreadStatus, Value, VmState,
};
use thiserror::Error;
use tracing::{debug, trace};

use crate::bridge;
use crate::builtins::{self, HOST_NAMESPACE};
use crate::options::EngineOptions;
use crate::registry::{CallMode, HostFunctionTable};

/// Shared flag polled by the evaluator; raising it is idempotent.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Raised inside the evaluator to unwind a run after `abort`.
#[derive(Debug, Error)]
#[error("script aborted")]
struct AbortSignal;

pub struct CompiledProgram {
    chunk_name: String,
    function: Function,
}

impl CompiledProgram {
    pub fn chunk_name(&self) -> &str {
        &self.chunk_name
    }
}

impl fmt::Debug for CompiledProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledProgram")
            .field("chunk_name", &self.chunk_name)
            .finish_non_exhaustive()
    }
}

/// A script parked inside a yielding call, resumable exactly once.
pub struct Continuation {
    thread: Thread,
    request: ScriptValue,
}

impl Continuation {
    /// What the script yielded while parking, e.g. `["move", 10]`.
    pub fn request(&self) -> &ScriptValue {
        &self.request
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum Outcome {
    Completed(ScriptValue),
    Suspended(Continuation),
    Aborted,
    Failed(ScriptError),
}

/// Globals removed before any script runs. `coroutine` stays reachable only
/// through the yield captured by the built-in fragments.
const STRIPPED_GLOBALS: &[&str] = &["coroutine", "dofile", "loadfile", "require"];

/// One Lua state with the host table and built-in helpers installed.
pub struct ExecutionContext {
    lua: Lua,
    abort: AbortHandle,
    abort_check_interval: u32,
}

impl ExecutionContext {
    pub fn new(
        table: &HostFunctionTable,
        abort: AbortHandle,
        options: &EngineOptions,
    ) -> Result<Self, ScriptError> {
        let libs = StdLib::COROUTINE | StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8;
        let lua = Lua::new_with(libs, LuaOptions::default()).map_err(context_error)?;

        let yield_fn = capture_yield(&lua).map_err(context_error)?;
        install_host_functions(&lua, table, &yield_fn).map_err(context_error)?;
        load_builtins(&lua, &abort, &yield_fn).map_err(context_error)?;
        strip_globals(&lua).map_err(context_error)?;

        debug!(functions = table.len(), "execution context ready");
        Ok(Self {
            lua,
            abort,
            abort_check_interval: options.abort_check_interval.max(1),
        })
    }

    pub fn compile(&self, chunk_name: &str, source: &str) -> Result<CompiledProgram, ScriptError> {
        let function = self
            .lua
            .load(source)
            .set_name(chunk_name)
            .into_function()
            .map_err(|error| match error {
                LuaError::SyntaxError { message, .. } => ScriptError::compile(message),
                other => ScriptError::compile(other.to_string()),
            })?;

        Ok(CompiledProgram {
            chunk_name: chunk_name.to_string(),
            function,
        })
    }

    pub fn abort(&self) {
        self.abort.abort();
    }

    pub fn abort_handle(&self) -> &AbortHandle {
        &self.abort
    }

    /// Runs `program` from the top, or continues `resume` with its value, until
    /// the script finishes, parks, fails or is aborted.
    pub fn run_to_suspension_or_completion(
        &self,
        program: &CompiledProgram,
        resume: Option<(Continuation, ScriptValue)>,
    ) -> Outcome {
        if self.abort.is_aborted() {
            return Outcome::Aborted;
        }

        match resume {
            Some((continuation, value)) => match bridge::to_lua(&self.lua, &value) {
                Ok(value) => self.drive(continuation.thread, value),
                Err(error) => Outcome::Failed(ScriptError::runtime(error.to_string())),
            },
            None => match self.lua.create_thread(program.function.clone()) {
                Ok(thread) => self.drive(thread, ()),
                Err(error) => Outcome::Failed(context_error(error)),
            },
        }
    }

    fn drive(&self, thread: Thread, args: impl IntoLuaMulti) -> Outcome {
        // mlua keeps a single hooked thread, so the hook follows the coroutine being driven.
        install_abort_hook(&thread, &self.abort, self.abort_check_interval);
        match thread.resume::<MultiValue>(args) {
            Ok(values) => {
                let value = bridge::from_multi(values);
                if matches!(thread.status(), ThreadStatus::Resumable) {
                    return match value {
                        Ok(request) => Outcome::Suspended(Continuation { thread, request }),
                        Err(error) => Outcome::Failed(ScriptError::runtime(error.to_string())),
                    };
                }
                Outcome::Completed(value.unwrap_or_else(|error| {
                    trace!(error = %error, "completion value dropped");
                    ScriptValue::Nil
                }))
            }
            Err(error) if self.abort.is_aborted() || is_abort_signal(&error) => Outcome::Aborted,
            Err(error) => Outcome::Failed(ScriptError::runtime(error.to_string())),
        }
    }
}

fn context_error(error: LuaError) -> ScriptError {
    ScriptError::context(error.to_string())
}

fn is_abort_signal(error: &LuaError) -> bool {
    match error {
        LuaError::ExternalError(inner) => inner.downcast_ref::<AbortSignal>().is_some(),
        LuaError::CallbackError { cause, .. } => is_abort_signal(cause),
        LuaError::WithContext { cause, .. } => is_abort_signal(cause),
        _ => false,
    }
}

fn capture_yield(lua: &Lua) -> mlua::Result<Function> {
    let coroutine: Table = lua.globals().get("coroutine")?;
    coroutine.get("yield")
}

fn strip_globals(lua: &Lua) -> mlua::Result<()> {
    let globals = lua.globals();
    for name in STRIPPED_GLOBALS {
        globals.raw_set(*name, Value::Nil)?;
    }
    Ok(())
}

fn install_host_functions(
    lua: &Lua,
    table: &HostFunctionTable,
    yield_fn: &Function,
) -> mlua::Result<()> {
    let globals = lua.globals();
    let host = lua.create_table()?;
    let suspend = lua
        .load(builtins::SUSPEND.source)
        .set_name(builtins::SUSPEND.name)
        .into_function()?;

    for function in table.iter() {
        let bound = function.clone();
        let callable = lua.create_function(move |lua, args: MultiValue| {
            let args = bridge::args_from_multi(args)?;
            let result = bound.invoke(&args).map_err(LuaError::external)?;
            bridge::to_lua(lua, &result)
        })?;
        host.set(function.name(), callable.clone())?;

        let exposed = match function.mode() {
            CallMode::Immediate => callable,
            CallMode::Yielding => suspend.call::<Function>((yield_fn.clone(), callable))?,
        };
        globals.set(function.name(), exposed)?;
    }

    globals.set(HOST_NAMESPACE, host)?;
    Ok(())
}

fn load_builtins(lua: &Lua, abort: &AbortHandle, yield_fn: &Function) -> mlua::Result<()> {
    let probe = abort.clone();
    let aborted = lua.create_function(move |_, ()| Ok(probe.is_aborted()))?;
    lua.load(builtins::GUARD.source)
        .set_name(builtins::GUARD.name)
        .call::<()>(aborted)?;

    for builtin in builtins::MANIFEST {
        lua.load(builtin.source)
            .set_name(builtin.name)
            .call::<()>(yield_fn.clone())?;
    }
    Ok(())
}

fn install_abort_hook(thread: &Thread, abort: &AbortHandle, interval: u32) {
    let probe = abort.clone();
    let triggers = HookTriggers::new().every_nth_instruction(interval);
    thread.set_hook(triggers, move |_lua, _debug| {
        if probe.is_aborted() {
            Err(LuaError::external(AbortSignal))
        } else {
            Ok(VmState::Continue)
        }
    });
}
