pub mod error;
pub mod types;
pub mod value;

pub use error::{HostCallError, ScriptError};
pub use types::*;
pub use value::*;
