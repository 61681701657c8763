//! Per-connection script host
//!
//! The host owns the connection's scripts (in load order) and the command
//! table they share. Dispatch captures every script's running version under
//! the script-set lock and calls into them after releasing it; reloads
//! publish under the same lock, so one dispatch round sees each script
//! either entirely before or entirely after a reload.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, error, info, warn};

use crate::binding::BoundHandler;
use crate::command::{split_command_line, CommandRegistry};
use crate::context::BotContext;
use crate::error::ScriptError;
use crate::script::{script_key, LoadedScript, Script};
use crate::script_scanner::{ScanResult, ScriptScanner};
use crate::value::{HostHandle, Value};

pub struct ScriptHost {
    ctx: Arc<BotContext>,
    commands: Arc<CommandRegistry>,
    scripts: Mutex<Vec<Arc<Script>>>,
    scanner: Option<Mutex<ScriptScanner>>,
    this: Weak<ScriptHost>,
}

impl ScriptHost {
    pub fn new(ctx: BotContext) -> Arc<Self> {
        let scanner = ctx
            .scripting
            .hot_reload
            .then(|| Mutex::new(ScriptScanner::with_interval(ctx.scripting.hot_reload_interval())));

        Arc::new_cyclic(|this| Self {
            ctx: Arc::new(ctx),
            commands: Arc::new(CommandRegistry::new()),
            scripts: Mutex::new(Vec::new()),
            scanner,
            this: this.clone(),
        })
    }

    pub fn context(&self) -> &BotContext {
        &self.ctx
    }

    /// The command table shared by every script of this connection
    pub fn commands(&self) -> &CommandRegistry {
        &self.commands
    }

    pub(crate) fn lock_scripts(&self) -> MutexGuard<'_, Vec<Arc<Script>>> {
        self.scripts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load a script file. Without a declared type the engine is picked
    /// from the file extension.
    pub fn load_script(
        &self,
        path: impl AsRef<Path>,
        declared_type: Option<&str>,
    ) -> Result<Arc<Script>, ScriptError> {
        let path = path.as_ref();
        if !path.is_file() {
            let e = ScriptError::NotFound(path.to_path_buf());
            error!(target: "scripting", "Failed to load script: {}", e);
            return Err(e);
        }

        let key = script_key(path);
        if self.script(&key).is_some() {
            return Err(ScriptError::AlreadyLoaded(key));
        }

        let script = Arc::new(Script::new(
            key,
            declared_type,
            self.ctx.clone(),
            self.commands.clone(),
            self.this.clone(),
        ));

        let loaded = script.build().map_err(|e| {
            error!(target: "scripting", "Failed to load script {}: {}", path.display(), e);
            e
        })?;

        {
            let mut scripts = self.lock_scripts();
            if scripts.iter().any(|s| s.path() == script.path()) {
                drop(scripts);
                loaded.teardown();
                return Err(ScriptError::AlreadyLoaded(script.path().to_path_buf()));
            }
            script.install(loaded);
            scripts.push(script.clone());
        }

        if let Some(scanner) = &self.scanner {
            scanner
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .track(script.path());
        }

        info!(
            target: "scripting",
            "[{}] Loaded script {}",
            self.ctx.server_name,
            script.path().display()
        );
        Ok(script)
    }

    /// Load every configured script name, resolved against the script
    /// directory. Returns how many loaded.
    pub fn load_scripts<S: AsRef<str>>(&self, names: &[S]) -> usize {
        names
            .iter()
            .filter(|name| {
                let path = self.ctx.scripting.resolve_script(name.as_ref());
                self.load_script(path, None).is_ok()
            })
            .count()
    }

    pub fn script(&self, path: impl AsRef<Path>) -> Option<Arc<Script>> {
        let key = script_key(path.as_ref());
        self.lock_scripts()
            .iter()
            .find(|script| script.path() == key)
            .cloned()
    }

    /// Loaded scripts in load order
    pub fn scripts(&self) -> Vec<Arc<Script>> {
        self.lock_scripts().clone()
    }

    pub fn script_count(&self) -> usize {
        self.lock_scripts().len()
    }

    fn running(&self) -> Vec<(Arc<Script>, Arc<LoadedScript>)> {
        self.lock_scripts()
            .iter()
            .filter_map(|script| script.current().map(|loaded| (script.clone(), loaded)))
            .collect()
    }

    /// Call every handler bound to `event`, script by script in load order
    /// and in binding order within a script. Binding changes made by the
    /// handlers take effect from the next call. Returns how many handlers
    /// were called.
    pub fn call_bound(&self, event: &str, args: &[Value]) -> usize {
        let targets: Vec<(Arc<Script>, Arc<LoadedScript>, Vec<BoundHandler>)> = self
            .running()
            .into_iter()
            .map(|(script, loaded)| {
                let handlers = loaded.bindings().snapshot(event);
                (script, loaded, handlers)
            })
            .filter(|(_, _, handlers)| !handlers.is_empty())
            .collect();

        let mut called = 0;
        for (script, loaded, handlers) in targets {
            for handler in &handlers {
                script.call_on(&loaded, handler, args);
                called += 1;
            }
        }
        called
    }

    /// Run a channel line as a command. Returns true if a bound command was
    /// called.
    pub fn dispatch_command(
        &self,
        connection: HostHandle,
        timestamp: i64,
        channel: HostHandle,
        sender: HostHandle,
        line: &str,
    ) -> bool {
        let (name, rest) = split_command_line(line);
        if name.is_empty() {
            return false;
        }
        let Some(binding) = self.commands.resolve(name) else {
            return false;
        };

        let owner = self
            .running()
            .into_iter()
            .find(|(_, loaded)| loaded.commands().owner() == binding.owner);
        let Some((script, loaded)) = owner else {
            debug!(
                target: "scripting",
                "Command '{}' is bound by a script that is no longer running",
                name
            );
            return false;
        };

        let args = [
            Value::Handle(connection),
            Value::Int(timestamp),
            Value::Handle(channel),
            Value::Handle(sender),
            Value::from(name),
            Value::from(rest),
        ];
        script.call_on(&loaded, &binding.handler, &args);
        true
    }

    /// Reload every script. Failures are logged and leave that script's
    /// running version in place.
    pub fn reload_all(&self) {
        let scripts = self.scripts();
        let mut failed = 0;
        for script in &scripts {
            if let Err(e) = script.reload() {
                error!(target: "scripting", "Failed to reload {}: {}", script.path().display(), e);
                failed += 1;
            }
        }

        if failed > 0 {
            warn!(
                target: "scripting",
                "[{}] Rehash finished with {} of {} script(s) failing",
                self.ctx.server_name,
                failed,
                scripts.len()
            );
        } else {
            info!(
                target: "scripting",
                "[{}] Reloaded {} script(s)",
                self.ctx.server_name,
                scripts.len()
            );
        }
    }

    pub fn reload_script(&self, path: impl AsRef<Path>) -> Result<(), ScriptError> {
        let path = path.as_ref();
        let script = self
            .script(path)
            .ok_or_else(|| ScriptError::NotFound(path.to_path_buf()))?;
        script.reload()
    }

    /// Unload one script. Returns false if it was not loaded.
    pub fn unload_script(&self, path: impl AsRef<Path>) -> bool {
        let key = script_key(path.as_ref());
        let removed = {
            let mut scripts = self.lock_scripts();
            scripts
                .iter()
                .position(|script| script.path() == key)
                .map(|index| scripts.remove(index))
        };

        let Some(script) = removed else {
            return false;
        };
        script.unload();
        if let Some(scanner) = &self.scanner {
            scanner
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .untrack(script.path());
        }
        info!(target: "scripting", "Unloaded script {}", script.path().display());
        true
    }

    /// Unload every script
    pub fn unload(&self) {
        let scripts: Vec<Arc<Script>> = std::mem::take(&mut *self.lock_scripts());
        if scripts.is_empty() {
            return;
        }

        debug!(target: "scripting", "Unloading {} script(s)", scripts.len());
        for script in &scripts {
            script.unload();
        }
        if let Some(scanner) = &self.scanner {
            let mut scanner = scanner.lock().unwrap_or_else(PoisonError::into_inner);
            for script in &scripts {
                scanner.untrack(script.path());
            }
        }
    }

    /// Reload scripts whose files changed and unload those whose files are
    /// gone. Does nothing unless hot reload is enabled and the scan
    /// interval has elapsed.
    pub fn poll_changes(&self) -> ScanResult {
        let Some(scanner) = &self.scanner else {
            return ScanResult::default();
        };

        let result = {
            let mut scanner = scanner.lock().unwrap_or_else(PoisonError::into_inner);
            if !scanner.should_scan() {
                return ScanResult::default();
            }
            scanner.scan_changes()
        };

        for path in &result.changed {
            info!(target: "scripting", "Script changed on disk, reloading: {}", path.display());
            if let Err(e) = self.reload_script(path) {
                error!(target: "scripting", "Failed to reload {}: {}", path.display(), e);
            }
        }
        for path in &result.removed {
            info!(target: "scripting", "Script removed from disk, unloading: {}", path.display());
            self.unload_script(path);
        }
        result
    }
}

impl Drop for ScriptHost {
    fn drop(&mut self) {
        let scripts = std::mem::take(
            self.scripts
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for script in scripts {
            script.unload();
        }
    }
}
