//! Scripting runtimes behind one contract
//!
//! A [`ScriptEngine`] evaluates one script file, holds its globals and calls
//! back into it. Engines are picked from [`ENGINES`] by declared type or by
//! file extension.

pub mod lua;
pub mod modules;
pub mod sandboxed;

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use crate::api::{BotApi, CommandApi};
use crate::binding::{Callable, ScriptRef};
use crate::error::{InvokeError, ScriptError};
use crate::logger::ScriptLogger;
use crate::sandbox::SandboxPolicy;
use crate::value::Value;

/// Something that can be bound to a script global
#[derive(Clone)]
pub enum Global {
    Bot(BotApi),
    Commands(CommandApi),
    Value(Value),
    /// Removes the global
    Null,
}

/// Uniform contract over a scripting runtime
pub trait ScriptEngine: Send + Sync {
    /// Name of the runtime, e.g. `lua`
    fn language(&self) -> &'static str;

    /// Compile and run top-level code. `source_name` is used in error
    /// locations.
    fn evaluate(&self, source: &mut dyn Read, source_name: &str) -> Result<(), ScriptError>;

    fn set_global(&self, name: &str, value: Global) -> Result<(), ScriptError>;

    /// Call `handler`, looked up on `receiver` when one is given and among
    /// the script's functions otherwise.
    fn invoke(
        &self,
        receiver: Option<&ScriptRef>,
        handler: &Callable,
        args: &[Value],
    ) -> Result<Value, InvokeError>;

    fn invoke_function(&self, name: &str, args: &[Value]) -> Result<Value, InvokeError> {
        self.invoke(None, &Callable::named(name), args)
    }

    fn invoke_method(
        &self,
        receiver: &ScriptRef,
        name: &str,
        args: &[Value],
    ) -> Result<Value, InvokeError> {
        self.invoke(Some(receiver), &Callable::named(name), args)
    }
}

/// What an engine needs to know about the script it will run
#[derive(Clone)]
pub struct EngineOptions {
    /// File name used in error locations
    pub source_name: String,
    pub policy: Arc<SandboxPolicy>,
    pub max_operations: Option<u64>,
    pub logger: ScriptLogger,
    /// Bot identity published to scripts as `scriptbot::version`
    pub bot_name: String,
    pub version: String,
}

type EngineConstructor = fn(&EngineOptions) -> Result<Box<dyn ScriptEngine>, ScriptError>;

pub struct EngineDescriptor {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub extensions: &'static [&'static str],
    /// Whether scripts run under the sandbox policy
    pub sandboxed: bool,
    construct: EngineConstructor,
}

impl EngineDescriptor {
    pub fn create(&self, options: &EngineOptions) -> Result<Box<dyn ScriptEngine>, ScriptError> {
        (self.construct)(options)
    }

    fn answers_to(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
            || self.aliases.iter().any(|alias| alias.eq_ignore_ascii_case(name))
    }
}

fn create_lua(options: &EngineOptions) -> Result<Box<dyn ScriptEngine>, ScriptError> {
    Ok(Box::new(lua::LuaEngine::new(options)?))
}

fn create_rhai(options: &EngineOptions) -> Result<Box<dyn ScriptEngine>, ScriptError> {
    Ok(Box::new(sandboxed::RhaiEngine::new(options)))
}

/// Known engines
pub static ENGINES: &[EngineDescriptor] = &[
    EngineDescriptor {
        name: "lua",
        aliases: &["lua5.4"],
        extensions: &["lua"],
        sandboxed: false,
        construct: create_lua,
    },
    EngineDescriptor {
        name: "rhai",
        aliases: &["sandboxed"],
        extensions: &["rhai"],
        sandboxed: true,
        construct: create_rhai,
    },
];

pub fn engine_by_type(name: &str) -> Option<&'static EngineDescriptor> {
    ENGINES.iter().find(|engine| engine.answers_to(name))
}

pub fn engine_by_extension(extension: &str) -> Option<&'static EngineDescriptor> {
    ENGINES.iter().find(|engine| {
        engine
            .extensions
            .iter()
            .any(|ext| ext.eq_ignore_ascii_case(extension))
    })
}

/// Pick the engine for a script: the declared type when given, otherwise
/// the file extension.
pub fn resolve_engine(
    path: &Path,
    declared_type: Option<&str>,
) -> Result<&'static EngineDescriptor, ScriptError> {
    let resolution_error = |reason: String| ScriptError::Resolution {
        path: path.to_path_buf(),
        reason,
    };

    match declared_type.filter(|t| !t.is_empty()) {
        Some(kind) => {
            engine_by_type(kind).ok_or_else(|| resolution_error(format!("unknown type '{}'", kind)))
        }
        None => {
            let extension = path
                .extension()
                .and_then(|ext| ext.to_str())
                .ok_or_else(|| resolution_error("no file extension found".to_string()))?;
            engine_by_extension(extension)
                .ok_or_else(|| resolution_error(format!("unknown extension '.{}'", extension)))
        }
    }
}

/// Split an engine error message of the form `name:LINE: message` into its
/// line number and message.
pub(crate) fn split_location<'a>(message: &'a str, source_name: &str) -> (Option<u32>, &'a str) {
    let Some(start) = message.find(source_name) else {
        return (None, message);
    };
    let rest = &message[start + source_name.len()..];
    let Some(rest) = rest.strip_prefix(':') else {
        return (None, message);
    };
    let Some((line, tail)) = rest.split_once(':') else {
        return (None, message);
    };
    match line.parse::<u32>() {
        Ok(line) => (Some(line), tail.trim_start()),
        Err(_) => (None, message),
    }
}
