use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use bs_core::ScriptError;
use bs_runtime::{
    AbortHandle, Capability, EngineOptions, ExecutionContext, HostFunctionTable, ScriptEngine,
    ScriptListener, DEFAULT_CHUNK_NAME,
};
use tracing::debug;

pub use bs_core::{ExecutionState, HostCallError, ScriptValue, SourceLocation};
pub use bs_runtime::{CallMode, EngineHandle, FnCapability, HostExport};

pub const SCRIPT_EXTENSION: &str = "lua";

/// Supplies script sources by name.
pub trait TextResourceLoader: Send + Sync {
    fn load(&self, name: &str) -> Result<String, ScriptError>;
}

/// Reads `<root>/<name>.lua`.
#[derive(Debug, Clone)]
pub struct DirLoader {
    root: PathBuf,
}

impl DirLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, name: &str) -> Result<PathBuf, ScriptError> {
        let relative = Path::new(name);
        let is_plain = !name.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !is_plain {
            return Err(ScriptError::resource(
                name,
                "resource names must be relative and stay under the loader root",
            ));
        }
        Ok(self
            .root
            .join(format!("{}.{}", name, SCRIPT_EXTENSION)))
    }
}

impl TextResourceLoader for DirLoader {
    fn load(&self, name: &str) -> Result<String, ScriptError> {
        let path = self.path_for(name)?;
        debug!(path = %path.display(), "loading script source");
        fs::read_to_string(&path).map_err(|error| ScriptError::resource(name, error.to_string()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    sources: BTreeMap<String, String>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.insert(name, source);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.sources.insert(name.into(), source.into());
    }
}

impl TextResourceLoader for MemoryLoader {
    fn load(&self, name: &str) -> Result<String, ScriptError> {
        self.sources
            .get(name)
            .cloned()
            .ok_or_else(|| ScriptError::resource(name, "no such script"))
    }
}

#[derive(Clone, Default)]
pub struct CreateEngineOptions {
    pub source: String,
    pub capabilities: Vec<Arc<dyn Capability>>,
    pub listeners: Vec<Arc<dyn ScriptListener>>,
    pub engine: EngineOptions,
}

#[derive(Clone)]
pub struct CreateEngineFromLoaderOptions {
    pub loader: Arc<dyn TextResourceLoader>,
    pub script: String,
    pub capabilities: Vec<Arc<dyn Capability>>,
    pub listeners: Vec<Arc<dyn ScriptListener>>,
    pub engine: EngineOptions,
}

/// Builds an engine, attaches the listeners and starts it.
pub fn create_engine(options: CreateEngineOptions) -> Result<ScriptEngine, ScriptError> {
    let engine = ScriptEngine::with_options(options.source, &options.capabilities, options.engine)?;
    for listener in options.listeners {
        engine.add_listener(listener);
    }
    engine.start()?;
    Ok(engine)
}

/// Loads `script` through the loader and starts it. The script name becomes
/// the chunk name unless one was configured.
pub fn create_engine_from_loader(
    options: CreateEngineFromLoaderOptions,
) -> Result<ScriptEngine, ScriptError> {
    let source = options.loader.load(&options.script)?;
    let mut engine = options.engine;
    if engine.chunk_name == DEFAULT_CHUNK_NAME {
        engine.chunk_name = options.script;
    }

    create_engine(CreateEngineOptions {
        source,
        capabilities: options.capabilities,
        listeners: options.listeners,
        engine,
    })
}

/// Compiles `source` without running it. Host functions are not needed to compile.
pub fn check_source(source: &str, chunk_name: &str) -> Result<(), ScriptError> {
    let options = EngineOptions {
        chunk_name: chunk_name.to_string(),
        ..EngineOptions::default()
    };
    let context = ExecutionContext::new(&HostFunctionTable::default(), AbortHandle::new(), &options)?;
    context.compile(chunk_name, source)?;
    Ok(())
}
