//! Objects injected into every script: `bot` and `irc`

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::binding::{BindingRegistry, BindingToken, BoundHandler, Callable, ScriptRef};
use crate::command::{CommandRegistry, OwnerId};
use crate::host::ScriptHost;
use crate::logger::ScriptLogger;
use crate::value::Value;

/// Global name of the [`BotApi`]
pub const BOT_GLOBAL: &str = "bot";
/// Global name of the [`CommandApi`]
pub const IRC_GLOBAL: &str = "irc";

/// The `bot` object: logging, event bindings and rehash
#[derive(Clone)]
pub struct BotApi {
    bindings: Arc<BindingRegistry>,
    logger: ScriptLogger,
    host: Weak<ScriptHost>,
}

impl BotApi {
    pub fn new(bindings: Arc<BindingRegistry>, logger: ScriptLogger, host: Weak<ScriptHost>) -> Self {
        Self {
            bindings,
            logger,
            host,
        }
    }

    pub fn log(&self, line: &str) {
        self.logger.info(line);
    }

    pub fn logger(&self) -> &ScriptLogger {
        &self.logger
    }

    pub fn bind_event(
        &self,
        event: &str,
        receiver: Option<ScriptRef>,
        handler: Callable,
    ) -> BindingToken {
        let bound = BoundHandler::new(receiver, handler);
        self.logger.debug(format_args!("bindEvent {} -> {}", event, bound));
        self.bindings.bind(event, bound)
    }

    /// Unbind a pair. An empty receiver and an empty handler together
    /// remove every handler of the event.
    pub fn unbind_event(
        &self,
        event: &str,
        receiver: Option<ScriptRef>,
        handler: Option<Callable>,
    ) -> usize {
        let receiver = receiver.filter(|r| !matches!(r, ScriptRef::Global(name) if name.is_empty()));
        let handler = handler.filter(|h| !matches!(h, Callable::Named(name) if name.is_empty()));
        self.bindings
            .unbind(event, receiver.as_ref(), handler.as_ref())
    }

    pub fn unbind_token(&self, event: &str, token: BindingToken) -> bool {
        self.bindings.unbind_token(event, token)
    }

    /// Reload every script of this connection
    pub fn rehash(&self) {
        match self.host.upgrade() {
            Some(host) => host.reload_all(),
            None => self.logger.warn("rehash requested but the script host is gone"),
        }
    }

    /// Host-internal view of an event's bindings
    pub fn bindings(&self, event: &str) -> Vec<BoundHandler> {
        self.bindings.snapshot(event)
    }
}

#[derive(Debug)]
enum StagedOp {
    Bind {
        name: String,
        flags: String,
        handler: BoundHandler,
    },
    Unbind(String),
}

#[derive(Debug)]
enum Mode {
    /// Script is still being evaluated; changes are held back
    Staged(Vec<StagedOp>),
    Live,
    /// Script version has been replaced or unloaded; changes are dropped
    Revoked,
}

struct CommandApiInner {
    registry: Arc<CommandRegistry>,
    owner: OwnerId,
    logger: ScriptLogger,
    mode: Mutex<Mode>,
}

/// The `irc` object: one script version's handle on the shared command
/// table.
///
/// Changes made while the script is being evaluated are staged and only
/// reach the table once the version is published, so a script that fails
/// to load or reload never disturbs commands bound by the running version.
#[derive(Clone)]
pub struct CommandApi {
    inner: Arc<CommandApiInner>,
}

impl CommandApi {
    pub fn new(registry: Arc<CommandRegistry>, logger: ScriptLogger) -> Self {
        Self {
            inner: Arc::new(CommandApiInner {
                registry,
                owner: OwnerId::next(),
                logger,
                mode: Mutex::new(Mode::Staged(Vec::new())),
            }),
        }
    }

    pub fn owner(&self) -> OwnerId {
        self.inner.owner
    }

    pub fn bind_command(
        &self,
        name: &str,
        flags: &str,
        receiver: Option<ScriptRef>,
        handler: Callable,
    ) {
        let handler = BoundHandler::new(receiver, handler);
        self.inner
            .logger
            .debug(format_args!("bindCommand {} -> {}", name, handler));

        let mut mode = self.mode();
        match &mut *mode {
            Mode::Staged(ops) => ops.push(StagedOp::Bind {
                name: name.to_string(),
                flags: flags.to_string(),
                handler,
            }),
            Mode::Live => {
                self.inner
                    .registry
                    .bind_command(self.inner.owner, name, flags, handler);
            }
            Mode::Revoked => {}
        }
    }

    pub fn unbind_command(&self, name: &str) {
        let mut mode = self.mode();
        match &mut *mode {
            Mode::Staged(ops) => ops.push(StagedOp::Unbind(name.to_string())),
            Mode::Live => {
                self.inner.registry.unbind_command(name);
            }
            Mode::Revoked => {}
        }
    }

    /// Permission hook for command handlers. Always grants.
    pub fn has_bot_flag(&self, _client: &Value, _flag: &str) -> bool {
        true
    }

    /// Apply staged changes and start writing through to the table
    pub(crate) fn commit(&self) {
        let mut mode = self.mode();
        if let Mode::Staged(ops) = std::mem::replace(&mut *mode, Mode::Live) {
            for op in ops {
                match op {
                    StagedOp::Bind {
                        name,
                        flags,
                        handler,
                    } => {
                        self.inner
                            .registry
                            .bind_command(self.inner.owner, &name, &flags, handler);
                    }
                    StagedOp::Unbind(name) => {
                        self.inner.registry.unbind_command(&name);
                    }
                }
            }
        }
    }

    /// Drop staged changes and every command this version bound
    pub(crate) fn revoke(&self) -> usize {
        *self.mode() = Mode::Revoked;
        self.inner.registry.unbind_owner(self.inner.owner)
    }

    fn mode(&self) -> MutexGuard<'_, Mode> {
        self.inner.mode.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(registry: &Arc<CommandRegistry>) -> CommandApi {
        CommandApi::new(registry.clone(), ScriptLogger::new("test", "api.lua"))
    }

    #[test]
    fn test_staged_commands_apply_on_commit() {
        let registry = Arc::new(CommandRegistry::new());
        let commands = api(&registry);

        commands.bind_command("hello", "", None, Callable::named("hello"));
        commands.bind_command("bye", "", None, Callable::named("bye"));
        commands.unbind_command("bye");
        assert!(registry.is_empty());

        commands.commit();
        assert_eq!(registry.names(), vec!["hello"]);
        assert_eq!(registry.resolve("hello").unwrap().owner, commands.owner());

        commands.bind_command("late", "", None, Callable::named("late"));
        assert!(registry.resolve("late").is_some());
    }

    #[test]
    fn test_revoke_drops_staged_and_live() {
        let registry = Arc::new(CommandRegistry::new());
        let live = api(&registry);
        live.bind_command("hello", "", None, Callable::named("hello"));
        live.commit();

        let staged = api(&registry);
        staged.bind_command("other", "", None, Callable::named("other"));

        assert_eq!(staged.revoke(), 0);
        assert_eq!(live.revoke(), 1);
        assert!(registry.is_empty());

        live.bind_command("again", "", None, Callable::named("again"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unbind_event_empty_strings_are_wildcard() {
        let bindings = Arc::new(BindingRegistry::new());
        let bot = BotApi::new(bindings.clone(), ScriptLogger::new("test", "api.lua"), Weak::new());
        bot.bind_event("onServerReady", None, Callable::named("a"));
        bot.bind_event(
            "onServerReady",
            Some(ScriptRef::Global("obj".into())),
            Callable::named("b"),
        );

        let removed = bot.unbind_event(
            "onServerReady",
            Some(ScriptRef::Global(String::new())),
            Some(Callable::named("")),
        );
        assert_eq!(removed, 2);
        assert!(bot.bindings("onServerReady").is_empty());
    }
}
