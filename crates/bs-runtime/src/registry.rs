use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bs_core::{HostCallError, ScriptError, ScriptValue};
use tracing::debug;

use crate::builtins::is_reserved_name;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    /// Returns to the script within the same turn.
    Immediate,
    /// Parks the script after the call; the resume value is the call's result in script.
    Yielding,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostExport {
    pub name: String,
    pub mode: CallMode,
}

impl HostExport {
    pub fn immediate(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: CallMode::Immediate,
        }
    }

    pub fn yielding(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: CallMode::Yielding,
        }
    }
}

/// An object whose methods become callable from inside the script.
///
/// Calls arrive on the engine's worker thread, so implementations guard their
/// own state.
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;
    fn exports(&self) -> Vec<HostExport>;
    fn call(&self, export: &str, args: &[ScriptValue]) -> Result<ScriptValue, HostCallError>;
}

/// One export bound to the capability that provides it.
#[derive(Clone)]
pub struct HostFunction {
    capability: Arc<dyn Capability>,
    export: HostExport,
}

impl HostFunction {
    pub fn name(&self) -> &str {
        &self.export.name
    }

    pub fn mode(&self) -> CallMode {
        self.export.mode
    }

    pub fn capability_name(&self) -> &str {
        self.capability.name()
    }

    pub fn invoke(&self, args: &[ScriptValue]) -> Result<ScriptValue, HostCallError> {
        self.capability.call(&self.export.name, args)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction")
            .field("capability", &self.capability.name())
            .field("export", &self.export)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct HostFunctionTable {
    functions: BTreeMap<String, HostFunction>,
}

impl HostFunctionTable {
    pub fn build(capabilities: &[Arc<dyn Capability>]) -> Result<Self, ScriptError> {
        let mut functions: BTreeMap<String, HostFunction> = BTreeMap::new();

        for capability in capabilities {
            for export in capability.exports() {
                if is_reserved_name(&export.name) {
                    return Err(ScriptError::ReservedExport {
                        name: export.name,
                        capability: capability.name().to_string(),
                    });
                }
                if let Some(existing) = functions.get(&export.name) {
                    return Err(ScriptError::DuplicateExport {
                        name: export.name,
                        first: existing.capability_name().to_string(),
                        second: capability.name().to_string(),
                    });
                }
                functions.insert(
                    export.name.clone(),
                    HostFunction {
                        capability: Arc::clone(capability),
                        export,
                    },
                );
            }
        }

        debug!(
            capabilities = capabilities.len(),
            functions = functions.len(),
            "host function table built"
        );
        Ok(Self { functions })
    }

    pub fn get(&self, name: &str) -> Option<&HostFunction> {
        self.functions.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &HostFunction> {
        self.functions.values()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

type HostFn = Arc<dyn Fn(&[ScriptValue]) -> Result<ScriptValue, HostCallError> + Send + Sync>;

/// A capability assembled from closures.
#[derive(Clone)]
pub struct FnCapability {
    name: String,
    functions: Vec<(HostExport, HostFn)>,
}

impl FnCapability {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
        }
    }

    pub fn immediate<F>(self, name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&[ScriptValue]) -> Result<ScriptValue, HostCallError> + Send + Sync + 'static,
    {
        self.with(HostExport::immediate(name), function)
    }

    pub fn yielding<F>(self, name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&[ScriptValue]) -> Result<ScriptValue, HostCallError> + Send + Sync + 'static,
    {
        self.with(HostExport::yielding(name), function)
    }

    fn with<F>(mut self, export: HostExport, function: F) -> Self
    where
        F: Fn(&[ScriptValue]) -> Result<ScriptValue, HostCallError> + Send + Sync + 'static,
    {
        self.functions.push((export, Arc::new(function)));
        self
    }
}

impl Capability for FnCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn exports(&self) -> Vec<HostExport> {
        self.functions
            .iter()
            .map(|(export, _)| export.clone())
            .collect()
    }

    fn call(&self, export: &str, args: &[ScriptValue]) -> Result<ScriptValue, HostCallError> {
        let Some((_, function)) = self
            .functions
            .iter()
            .find(|(candidate, _)| candidate.name == export)
        else {
            return Err(HostCallError::new(format!(
                "capability \"{}\" has no export \"{}\"",
                self.name, export
            )));
        };
        function(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capability(name: &str, exports: &[&str]) -> Arc<dyn Capability> {
        let mut built = FnCapability::new(name);
        for export in exports {
            built = built.immediate(*export, |_| Ok(ScriptValue::Bool(true)));
        }
        Arc::new(built)
    }

    #[test]
    fn build_registers_exports_across_capabilities_in_order() {
        let table = HostFunctionTable::build(&[
            capability("radar", &["scan", "range"]),
            capability("arm", &["grab"]),
        ])
        .expect("table should build");

        assert_eq!(table.len(), 3);
        assert_eq!(table.names().collect::<Vec<_>>(), vec!["grab", "range", "scan"]);
        let scan = table.get("scan").expect("scan is registered");
        assert_eq!(scan.capability_name(), "radar");
        assert_eq!(scan.mode(), CallMode::Immediate);
        assert_eq!(scan.invoke(&[]), Ok(ScriptValue::Bool(true)));
    }

    #[test]
    fn build_rejects_duplicate_export_across_capabilities() {
        let error = HostFunctionTable::build(&[
            capability("radar", &["scan"]),
            capability("sonar", &["scan"]),
        ])
        .expect_err("duplicate export should fail");

        assert_eq!(error.code(), "ENGINE_HOST_FUNCTION_DUPLICATE");
        assert_eq!(
            error,
            ScriptError::DuplicateExport {
                name: "scan".to_string(),
                first: "radar".to_string(),
                second: "sonar".to_string(),
            }
        );
    }

    #[test]
    fn build_rejects_duplicate_export_within_one_capability() {
        let error = HostFunctionTable::build(&[capability("radar", &["scan", "scan"])])
            .expect_err("duplicate export should fail");
        assert_eq!(error.code(), "ENGINE_HOST_FUNCTION_DUPLICATE");
    }

    #[test]
    fn build_rejects_reserved_builtin_names() {
        let error = HostFunctionTable::build(&[capability("clock", &["waitFor"])])
            .expect_err("reserved name should fail");
        assert_eq!(
            error,
            ScriptError::ReservedExport {
                name: "waitFor".to_string(),
                capability: "clock".to_string(),
            }
        );
    }

    #[test]
    fn empty_input_builds_empty_table() {
        let table = HostFunctionTable::build(&[]).expect("empty table should build");
        assert!(table.is_empty());
        assert!(table.get("scan").is_none());
    }

    #[test]
    fn fn_capability_reports_unknown_export() {
        let radar = FnCapability::new("radar").yielding("sweep", |args| {
            Ok(ScriptValue::Number(args.len() as f64))
        });
        assert_eq!(radar.exports(), vec![HostExport::yielding("sweep")]);
        assert_eq!(
            radar.call("sweep", &[ScriptValue::Nil, ScriptValue::Nil]),
            Ok(ScriptValue::Number(2.0))
        );
        let error = radar.call("scan", &[]).expect_err("unknown export");
        assert_eq!(error.message, "capability \"radar\" has no export \"scan\"");
    }
}
