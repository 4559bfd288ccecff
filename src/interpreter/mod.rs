//! Scriptable execution contexts and the pool that leases them.
//!
//! The gateway only sees the [`Interpreter`] capability: initialise once from
//! a script root, bind named values, execute a named script, tear down.

pub mod lua;
pub mod pool;

use std::fmt;
use std::path::Path;

use serde_json::Value;

use crate::auth::QueryParams;

pub use lua::LuaInterpreter;
pub use pool::{InterpreterFactory, InterpreterPool, Lease, PoolConfig, PoolError, TeardownErrors};

/// Identity assigned by the pool to every interpreter it creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InterpreterId(pub u64);

impl fmt::Display for InterpreterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "interpreter-{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InterpreterError {
    #[error("Init from '{root}' failed: {message}")]
    Init { root: String, message: String },

    #[error("Binding '{name}' failed: {message}")]
    Bind { name: String, message: String },

    #[error("Script '{script}' failed: {message}")]
    Exec { script: String, message: String },

    #[error("Teardown failed: {0}")]
    Teardown(String),
}

/// A stateful script execution context.
///
/// Implementations are driven from blocking threads, one lease at a time, so
/// methods take `&mut self` and may block for as long as the script runs.
pub trait Interpreter: Send {
    /// Runs once per interpreter, right after creation.
    fn init(&mut self, script_root: &Path) -> Result<(), InterpreterError>;

    /// Makes `value` visible to scripts under `name`.
    fn bind(&mut self, name: &str, value: &Value) -> Result<(), InterpreterError>;

    /// Executes the script called `script`, passing `params` as its arguments.
    fn exec(&mut self, script: &str, params: &QueryParams) -> Result<(), InterpreterError>;

    /// Releases whatever the interpreter holds. Called at most once.
    fn close(&mut self) -> Result<(), InterpreterError>;
}
