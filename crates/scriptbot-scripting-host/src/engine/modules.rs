//! Host modules sandboxed scripts can import by qualified name

use std::collections::HashMap;
use std::sync::Arc;

use rhai::{Array, Dynamic, Engine, EvalAltResult, Module, ModuleResolver, Position, Shared};
use tracing::debug;

use super::EngineOptions;
use crate::command::split_command_line;
use crate::sandbox::SandboxPolicy;

const BOLD: char = '\x02';
const COLOUR: char = '\x03';
const RESET: char = '\x0F';
const REVERSE: char = '\x16';
const ITALIC: char = '\x1D';
const STRIKE: char = '\x1E';
const UNDERLINE: char = '\x1F';

/// Remove IRC formatting codes, including colour numbers
pub fn strip_formatting(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            BOLD | RESET | REVERSE | ITALIC | STRIKE | UNDERLINE => {}
            COLOUR => {
                // up to two digits of foreground, then optionally ",bg"
                for _ in 0..2 {
                    if chars.next_if(char::is_ascii_digit).is_none() {
                        break;
                    }
                }
                let mut lookahead = chars.clone();
                if lookahead.next() == Some(',') && lookahead.peek().is_some_and(char::is_ascii_digit) {
                    chars.next();
                    for _ in 0..2 {
                        if chars.next_if(char::is_ascii_digit).is_none() {
                            break;
                        }
                    }
                }
            }
            other => out.push(other),
        }
    }
    out
}

fn format_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("bold", |text: &str| Ok(format!("{BOLD}{text}{BOLD}")));
    module.set_native_fn("italic", |text: &str| Ok(format!("{ITALIC}{text}{ITALIC}")));
    module.set_native_fn("underline", |text: &str| {
        Ok(format!("{UNDERLINE}{text}{UNDERLINE}"))
    });
    module.set_native_fn("colour", |text: &str, fg: i64| {
        Ok(format!("{COLOUR}{:02}{text}{COLOUR}", fg.clamp(0, 99)))
    });
    module.set_native_fn("strip", |text: &str| Ok(strip_formatting(text)));
    module
}

fn time_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("now_millis", || Ok(chrono::Utc::now().timestamp_millis()));
    module
}

fn version_module(bot_name: &str, version: &str) -> Module {
    let mut module = Module::new();
    module.set_var("NAME", bot_name.to_string());
    module.set_var("VERSION", version.to_string());
    module
}

fn api_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("split_command", |line: &str| {
        let (name, rest) = split_command_line(line);
        let parts: Array = vec![Dynamic::from(name.to_string()), Dynamic::from(rest.to_string())];
        Ok(parts)
    });
    module
}

fn limits_module(max_operations: Option<u64>) -> Module {
    let mut module = Module::new();
    let limit = max_operations
        .and_then(|limit| i64::try_from(limit).ok())
        .unwrap_or(0);
    module.set_native_fn("max_operations", move || Ok(limit));
    module
}

/// Every host module, by qualified name
pub fn host_modules(options: &EngineOptions) -> HashMap<String, Shared<Module>> {
    let modules = [
        ("irc::format", format_module()),
        ("std::time", time_module()),
        ("scriptbot::version", version_module(&options.bot_name, &options.version)),
        ("scriptbot::scripts::api", api_module()),
        ("scriptbot::scripts::limits", limits_module(options.max_operations)),
    ];

    modules
        .into_iter()
        .map(|(name, mut module)| {
            module.build_index();
            (name.to_string(), Shared::new(module))
        })
        .collect()
}

/// Module resolver that only hands out host modules the policy allows.
///
/// A denied name fails the same way as a name that does not exist.
pub struct SandboxedResolver {
    policy: Arc<SandboxPolicy>,
    modules: HashMap<String, Shared<Module>>,
}

impl SandboxedResolver {
    pub fn new(policy: Arc<SandboxPolicy>, modules: HashMap<String, Shared<Module>>) -> Self {
        Self { policy, modules }
    }
}

impl ModuleResolver for SandboxedResolver {
    fn resolve(
        &self,
        _engine: &Engine,
        _source: Option<&str>,
        path: &str,
        pos: Position,
    ) -> Result<Shared<Module>, Box<EvalAltResult>> {
        let not_found = || Box::new(EvalAltResult::ErrorModuleNotFound(path.to_string(), pos));

        if !self.policy.is_visible(path) {
            debug!(target: "scripting", "Sandbox refused host module '{}'", path);
            return Err(not_found());
        }

        self.modules.get(path).cloned().ok_or_else(not_found)
    }
}
