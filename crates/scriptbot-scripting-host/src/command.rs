use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::binding::BoundHandler;

/// Identifies which loaded script version bound a command. Every load and
/// every reload gets a fresh owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId(u64);

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

impl OwnerId {
    pub fn next() -> Self {
        Self(NEXT_OWNER.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBinding {
    pub owner: OwnerId,
    /// Stored for the permission hook, not interpreted yet
    pub flags: String,
    pub handler: BoundHandler,
}

/// Split a line into the command name and the rest of the line.
///
/// `"HELP me please"` gives `("HELP", "me please")`, `"help"` gives
/// `("help", "")`.
pub fn split_command_line(line: &str) -> (&str, &str) {
    line.split_once(char::is_whitespace).unwrap_or((line, ""))
}

/// Command table shared by all scripts of one connection.
///
/// Names are case-insensitive and each name maps to at most one handler;
/// binding an existing name replaces its handler, whoever owned it.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    commands: Mutex<HashMap<String, CommandBinding>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a command, returning the binding it replaced
    pub fn bind_command(
        &self,
        owner: OwnerId,
        name: &str,
        flags: &str,
        handler: BoundHandler,
    ) -> Option<CommandBinding> {
        let key = name.to_lowercase();
        let previous = self.lock().insert(
            key.clone(),
            CommandBinding {
                owner,
                flags: flags.to_string(),
                handler,
            },
        );

        if let Some(previous) = &previous {
            debug!(
                target: "scripting",
                "Command '{}' rebound: {:?} replaces {:?}",
                key,
                owner,
                previous.owner
            );
        }
        previous
    }

    /// Remove a command regardless of who bound it
    pub fn unbind_command(&self, name: &str) -> bool {
        self.lock().remove(&name.to_lowercase()).is_some()
    }

    pub fn resolve(&self, name: &str) -> Option<CommandBinding> {
        self.lock().get(&name.to_lowercase()).cloned()
    }

    /// Remove every command bound by `owner`
    pub fn unbind_owner(&self, owner: OwnerId) -> usize {
        let mut commands = self.lock();
        let before = commands.len();
        commands.retain(|_, binding| binding.owner != owner);
        before - commands.len()
    }

    /// Bound command names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CommandBinding>> {
        self.commands.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
