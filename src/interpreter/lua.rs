//! Lua-backed interpreter.
//!
//! Scripts live directly under the script root as `<name>.lua`. An optional
//! `init.lua` runs once when the interpreter is created, and an optional
//! global `shutdown` function runs on teardown.

use std::path::{Path, PathBuf};

use mlua::{Function, Lua, LuaSerdeExt, Value as LuaValue};
use serde_json::Value;

use super::{Interpreter, InterpreterError};
use crate::auth::QueryParams;

const INIT_SCRIPT: &str = "init.lua";
const SHUTDOWN_FN: &str = "shutdown";

pub struct LuaInterpreter {
    lua: Lua,
    script_root: Option<PathBuf>,
}

impl LuaInterpreter {
    pub fn new() -> Self {
        Self {
            lua: Lua::new(),
            script_root: None,
        }
    }

    /// Exposes `log.debug/info/warn/error(msg)` to scripts.
    fn register_log(&self) -> mlua::Result<()> {
        let log = self.lua.create_table()?;
        log.set(
            "debug",
            self.lua.create_function(|_, msg: String| {
                tracing::debug!(target: "user_script", "{}", msg);
                Ok(())
            })?,
        )?;
        log.set(
            "info",
            self.lua.create_function(|_, msg: String| {
                tracing::info!(target: "user_script", "{}", msg);
                Ok(())
            })?,
        )?;
        log.set(
            "warn",
            self.lua.create_function(|_, msg: String| {
                tracing::warn!(target: "user_script", "{}", msg);
                Ok(())
            })?,
        )?;
        log.set(
            "error",
            self.lua.create_function(|_, msg: String| {
                tracing::error!(target: "user_script", "{}", msg);
                Ok(())
            })?,
        )?;
        self.lua.globals().set("log", log)
    }

    fn extend_package_path(&self, root: &Path) -> mlua::Result<()> {
        let package: mlua::Table = self.lua.globals().get("package")?;
        let current: String = package.get("path")?;
        package.set("path", format!("{}/?.lua;{}", root.display(), current))
    }

    fn run_file(&self, path: &Path, params: Option<&QueryParams>) -> mlua::Result<()> {
        let source = std::fs::read_to_string(path).map_err(mlua::Error::external)?;
        let chunk = self
            .lua
            .load(source)
            .set_name(format!("@{}", path.display()));
        match params {
            Some(params) => chunk.call::<()>(self.lua.to_value(params)?),
            None => chunk.exec(),
        }
    }
}

impl Default for LuaInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter for LuaInterpreter {
    fn init(&mut self, script_root: &Path) -> Result<(), InterpreterError> {
        let init_err = |e: mlua::Error| InterpreterError::Init {
            root: script_root.display().to_string(),
            message: e.to_string(),
        };

        self.register_log().map_err(init_err)?;
        self.extend_package_path(script_root).map_err(init_err)?;

        let init_script = script_root.join(INIT_SCRIPT);
        if init_script.is_file() {
            self.run_file(&init_script, None).map_err(init_err)?;
        }

        self.script_root = Some(script_root.to_path_buf());
        Ok(())
    }

    fn bind(&mut self, name: &str, value: &Value) -> Result<(), InterpreterError> {
        let bind_err = |e: mlua::Error| InterpreterError::Bind {
            name: name.to_string(),
            message: e.to_string(),
        };

        let value = self.lua.to_value(value).map_err(bind_err)?;
        self.lua.globals().set(name, value).map_err(bind_err)
    }

    fn exec(&mut self, script: &str, params: &QueryParams) -> Result<(), InterpreterError> {
        let exec_err = |message: String| InterpreterError::Exec {
            script: script.to_string(),
            message,
        };

        let root = self
            .script_root
            .as_ref()
            .ok_or_else(|| exec_err("interpreter was not initialised".to_string()))?;
        let path = root.join(format!("{}.lua", script));
        if !path.is_file() {
            return Err(exec_err(format!("no script at {}", path.display())));
        }

        self.run_file(&path, Some(params))
            .map_err(|e| exec_err(e.to_string()))
    }

    fn close(&mut self) -> Result<(), InterpreterError> {
        let shutdown: LuaValue = self
            .lua
            .globals()
            .get(SHUTDOWN_FN)
            .map_err(|e| InterpreterError::Teardown(e.to_string()))?;

        match shutdown {
            LuaValue::Function(f) => call_shutdown(f),
            _ => Ok(()),
        }
    }
}

fn call_shutdown(f: Function) -> Result<(), InterpreterError> {
    f.call::<()>(())
        .map_err(|e| InterpreterError::Teardown(e.to_string()))
}
