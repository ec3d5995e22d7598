use std::path::PathBuf;
use std::sync::Arc;

use bs_api::{DirLoader, TextResourceLoader, SCRIPT_EXTENSION};

use crate::{map_cli_source_path, CliError};

/// A script file split into the directory it is loaded from and its name.
#[derive(Debug, Clone)]
pub(crate) struct ScriptRef {
    pub(crate) loader: Arc<DirLoader>,
    pub(crate) name: String,
}

impl ScriptRef {
    pub(crate) fn load(&self) -> Result<String, CliError> {
        Ok(self.loader.load(&self.name)?)
    }
}

pub(crate) fn resolve_script(script: &str) -> Result<ScriptRef, CliError> {
    let path = PathBuf::from(script);
    let absolute = if path.is_absolute() {
        path
    } else {
        std::env::current_dir()
            .map_err(map_cli_source_path)?
            .join(path)
    };

    if !absolute.is_file() {
        return Err(CliError::new(
            "CLI_SOURCE_NOT_FOUND",
            format!("script does not exist: {}", absolute.display()),
        ));
    }

    if absolute.extension().and_then(|extension| extension.to_str()) != Some(SCRIPT_EXTENSION) {
        return Err(CliError::new(
            "CLI_SOURCE_EXTENSION",
            format!(
                "script must have a .{} extension: {}",
                SCRIPT_EXTENSION,
                absolute.display()
            ),
        ));
    }

    let name = absolute
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            CliError::new(
                "CLI_SOURCE_PATH",
                format!("script name is not valid UTF-8: {}", absolute.display()),
            )
        })?;
    let root = absolute
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    Ok(ScriptRef {
        loader: Arc::new(DirLoader::new(root)),
        name,
    })
}
