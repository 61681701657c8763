//! One script file and its loaded versions
//!
//! A [`Script`] never changes identity; what it runs is the current
//! [`LoadedScript`], which is replaced wholesale by a successful reload.
//! Callers that captured the previous version keep a working `Arc` to it
//! until they drop it.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Instant;

use tracing::debug;

use crate::api::{BotApi, CommandApi, BOT_GLOBAL, IRC_GLOBAL};
use crate::binding::{BindingRegistry, BoundHandler};
use crate::command::CommandRegistry;
use crate::context::BotContext;
use crate::engine::{resolve_engine, EngineOptions, Global, ScriptEngine};
use crate::error::{InvokeError, ScriptError};
use crate::host::ScriptHost;
use crate::logger::ScriptLogger;
use crate::value::Value;

/// Identity of a script file: its canonical path, else its absolute path,
/// else the path as given
pub fn script_key(path: &Path) -> PathBuf {
    path.canonicalize()
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// One evaluated version of a script
pub struct LoadedScript {
    engine: Box<dyn ScriptEngine>,
    bindings: Arc<BindingRegistry>,
    commands: CommandApi,
}

impl LoadedScript {
    pub fn engine(&self) -> &dyn ScriptEngine {
        self.engine.as_ref()
    }

    pub fn bindings(&self) -> &BindingRegistry {
        &self.bindings
    }

    pub fn commands(&self) -> &CommandApi {
        &self.commands
    }

    /// Detach this version from the connection: its commands are revoked,
    /// its bindings cleared and its globals removed.
    pub(crate) fn teardown(&self) {
        let revoked = self.commands.revoke();
        self.bindings.unbind_all();
        for name in [BOT_GLOBAL, IRC_GLOBAL] {
            let _ = self.engine.set_global(name, Global::Null);
        }
        if revoked > 0 {
            debug!(target: "scripting", "Revoked {} command(s)", revoked);
        }
    }
}

pub struct Script {
    path: PathBuf,
    file_name: String,
    declared_type: Option<String>,
    logger: ScriptLogger,
    ctx: Arc<BotContext>,
    commands: Arc<CommandRegistry>,
    host: Weak<ScriptHost>,
    state: RwLock<Option<Arc<LoadedScript>>>,
}

impl Script {
    pub(crate) fn new(
        path: PathBuf,
        declared_type: Option<&str>,
        ctx: Arc<BotContext>,
        commands: Arc<CommandRegistry>,
        host: Weak<ScriptHost>,
    ) -> Self {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let logger = ScriptLogger::new(&ctx.server_name, &file_name);

        Self {
            path,
            file_name,
            declared_type: declared_type.filter(|t| !t.is_empty()).map(str::to_string),
            logger,
            ctx,
            commands,
            host,
            state: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn declared_type(&self) -> Option<&str> {
        self.declared_type.as_deref()
    }

    pub fn logger(&self) -> &ScriptLogger {
        &self.logger
    }

    /// The running version, if the script is loaded
    pub fn current(&self) -> Option<Arc<LoadedScript>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.current().is_some()
    }

    /// Build and evaluate a fresh version from the file on disk. Nothing is
    /// published; on failure everything the new version staged is dropped.
    pub(crate) fn build(&self) -> Result<Arc<LoadedScript>, ScriptError> {
        let descriptor = resolve_engine(&self.path, self.declared_type())?;
        let engine = descriptor.create(&EngineOptions {
            source_name: self.file_name.clone(),
            policy: self.ctx.sandbox.clone(),
            max_operations: self.ctx.scripting.max_operations,
            logger: self.logger.clone(),
            bot_name: self.ctx.bot_name.clone(),
            version: self.ctx.version.clone(),
        })?;

        let bindings = Arc::new(BindingRegistry::new());
        let commands = CommandApi::new(self.commands.clone(), self.logger.clone());
        let bot = BotApi::new(bindings.clone(), self.logger.clone(), self.host.clone());

        let loaded = LoadedScript {
            engine,
            bindings,
            commands,
        };

        let evaluated = loaded
            .engine
            .set_global(BOT_GLOBAL, Global::Bot(bot))
            .and_then(|_| {
                loaded
                    .engine
                    .set_global(IRC_GLOBAL, Global::Commands(loaded.commands.clone()))
            })
            .and_then(|_| {
                let mut file = File::open(&self.path).map_err(|e| ScriptError::Io {
                    path: self.path.clone(),
                    source: e,
                })?;
                debug!(
                    target: "scripting",
                    "Evaluating {} with the {} engine",
                    self.path.display(),
                    descriptor.name
                );
                loaded.engine.evaluate(&mut file, &self.file_name)
            });

        match evaluated {
            Ok(()) => Ok(Arc::new(loaded)),
            Err(e) => {
                loaded.teardown();
                Err(e)
            }
        }
    }

    /// Make `loaded` the running version and return the one it replaced.
    /// The caller holds the host's script-set lock.
    pub(crate) fn install(&self, loaded: Arc<LoadedScript>) -> Option<Arc<LoadedScript>> {
        loaded.commands.commit();
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(loaded)
    }

    /// Reload from disk. A failed reload leaves the running version alone.
    pub fn reload(&self) -> Result<(), ScriptError> {
        if !self.is_loaded() {
            return Err(ScriptError::Unloaded(self.path.clone()));
        }

        let loaded = self.build()?;
        let replaced = match self.host.upgrade() {
            Some(host) => {
                let _scripts = host.lock_scripts();
                self.install(loaded)
            }
            None => self.install(loaded),
        };

        if let Some(old) = replaced {
            old.teardown();
        }
        self.logger.info("Reloaded");
        Ok(())
    }

    /// Tear down the running version. The script does nothing afterwards.
    pub fn unload(&self) {
        let old = self
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(old) = old {
            old.teardown();
            self.logger.debug("Unloaded");
        }
    }

    /// Call a handler on the running version
    pub fn call(&self, handler: &BoundHandler, args: &[Value]) -> Option<Value> {
        let loaded = self.current()?;
        self.call_on(&loaded, handler, args)
    }

    /// Call a handler on a specific version. Failures are logged here and
    /// never reach the caller.
    pub(crate) fn call_on(
        &self,
        loaded: &LoadedScript,
        handler: &BoundHandler,
        args: &[Value],
    ) -> Option<Value> {
        let started = Instant::now();
        let result = loaded
            .engine
            .invoke(handler.receiver.as_ref(), &handler.handler, args);

        let elapsed = started.elapsed();
        if elapsed > self.ctx.scripting.slow_handler_threshold() {
            self.logger
                .warn(format_args!("Handler {} took {:?}", handler, elapsed));
        }

        match result {
            Ok(value) => Some(value),
            Err(InvokeError::NoSuchCallable(name)) => {
                self.logger
                    .debug(format_args!("No such handler: {}", name));
                None
            }
            Err(InvokeError::Script(failure)) => {
                self.logger.error(format_args!("Error in script: {}", failure));
                None
            }
            Err(InvokeError::Busy) => {
                self.logger.warn(format_args!(
                    "Handler {} skipped: script is already running",
                    handler
                ));
                None
            }
        }
    }
}

impl std::fmt::Debug for Script {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Script")
            .field("path", &self.path)
            .field("declared_type", &self.declared_type)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}
