use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Identifier of an object or function stored inside one engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(pub u64);

/// The object a handler is looked up on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScriptRef {
    /// A global variable of the script, by name
    Global(String),
    /// An object the engine keeps alive on the script's behalf
    Ref(ObjectId),
}

/// The function to call
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Callable {
    /// Looked up by name on the receiver, or among the globals
    Named(String),
    /// A function value the engine keeps alive on the script's behalf
    Ref(ObjectId),
}

impl Callable {
    pub fn named(name: impl Into<String>) -> Self {
        Callable::Named(name.into())
    }
}

impl fmt::Display for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callable::Named(name) => f.write_str(name),
            Callable::Ref(id) => write!(f, "<function #{}>", id.0),
        }
    }
}

/// A handler bound to an event or command. Without a receiver the handler
/// is a free function.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BoundHandler {
    pub receiver: Option<ScriptRef>,
    pub handler: Callable,
}

impl BoundHandler {
    pub fn new(receiver: Option<ScriptRef>, handler: Callable) -> Self {
        Self { receiver, handler }
    }

    pub fn function(name: impl Into<String>) -> Self {
        Self::new(None, Callable::named(name))
    }
}

impl fmt::Display for BoundHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.receiver {
            None => write!(f, "{}", self.handler),
            Some(ScriptRef::Global(name)) => write!(f, "{}.{}", name, self.handler),
            Some(ScriptRef::Ref(id)) => write!(f, "<object #{}>.{}", id.0, self.handler),
        }
    }
}

/// Opaque handle returned by a bind, usable to unbind later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingToken(u64);

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

impl BindingToken {
    fn next() -> Self {
        Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for BindingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "binding#{}", self.0)
    }
}

type Bindings = HashMap<String, Vec<(BindingToken, BoundHandler)>>;

/// Per-script map from event name to the handlers bound to it.
///
/// Handlers keep their insertion order and each (receiver, handler) pair is
/// bound at most once per event. Event names are case-sensitive.
#[derive(Debug, Default)]
pub struct BindingRegistry {
    bindings: Mutex<Bindings>,
}

impl BindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a handler. Binding an already bound pair returns its token.
    pub fn bind(&self, event: &str, handler: BoundHandler) -> BindingToken {
        let mut bindings = self.lock();
        let entries = bindings.entry(event.to_string()).or_default();
        if let Some((token, _)) = entries.iter().find(|(_, existing)| *existing == handler) {
            return *token;
        }

        let token = BindingToken::next();
        entries.push((token, handler));
        token
    }

    /// Remove the exact (receiver, handler) pair, or every handler of the
    /// event when both are absent. Returns how many were removed.
    pub fn unbind(
        &self,
        event: &str,
        receiver: Option<&ScriptRef>,
        handler: Option<&Callable>,
    ) -> usize {
        let mut bindings = self.lock();
        let removed = match (receiver, handler) {
            (None, None) => bindings.remove(event).map_or(0, |entries| entries.len()),
            (_, Some(handler)) => match bindings.get_mut(event) {
                Some(entries) => {
                    let before = entries.len();
                    entries.retain(|(_, bound)| {
                        !(bound.receiver.as_ref() == receiver && bound.handler == *handler)
                    });
                    before - entries.len()
                }
                None => 0,
            },
            (Some(_), None) => 0,
        };

        if bindings.get(event).is_some_and(Vec::is_empty) {
            bindings.remove(event);
        }
        removed
    }

    pub fn unbind_token(&self, event: &str, token: BindingToken) -> bool {
        let mut bindings = self.lock();
        let Some(entries) = bindings.get_mut(event) else {
            return false;
        };

        let before = entries.len();
        entries.retain(|(existing, _)| *existing != token);
        let removed = entries.len() != before;
        if entries.is_empty() {
            bindings.remove(event);
        }
        removed
    }

    /// Copy of the handlers bound to an event, in insertion order
    pub fn snapshot(&self, event: &str) -> Vec<BoundHandler> {
        self.lock()
            .get(event)
            .map(|entries| entries.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default()
    }

    pub fn unbind_all(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Bindings> {
        self.bindings.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_is_idempotent() {
        let registry = BindingRegistry::new();
        let first = registry.bind("onServerReady", BoundHandler::function("ready"));
        let second = registry.bind("onServerReady", BoundHandler::function("ready"));

        assert_eq!(first, second);
        assert_eq!(registry.snapshot("onServerReady").len(), 1);
    }

    #[test]
    fn test_insertion_order_and_case_sensitivity() {
        let registry = BindingRegistry::new();
        registry.bind("onDataIn", BoundHandler::function("b"));
        registry.bind("onDataIn", BoundHandler::function("a"));
        registry.bind(
            "onDataIn",
            BoundHandler::new(Some(ScriptRef::Global("obj".into())), Callable::named("a")),
        );

        let names: Vec<String> = registry
            .snapshot("onDataIn")
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(names, vec!["b", "a", "obj.a"]);
        assert!(registry.snapshot("ondatain").is_empty());
    }

    #[test]
    fn test_unbind_exact_pair() {
        let registry = BindingRegistry::new();
        let obj = ScriptRef::Global("obj".into());
        registry.bind("e", BoundHandler::function("f"));
        registry.bind("e", BoundHandler::new(Some(obj.clone()), Callable::named("f")));

        assert_eq!(registry.unbind("e", Some(&obj), Some(&Callable::named("f"))), 1);
        assert_eq!(registry.snapshot("e"), vec![BoundHandler::function("f")]);
        assert_eq!(registry.unbind("e", Some(&obj), None), 0);
    }

    #[test]
    fn test_unbind_wildcard_removes_everything_for_event() {
        let registry = BindingRegistry::new();
        registry.bind("e", BoundHandler::function("f"));
        registry.bind("e", BoundHandler::function("g"));
        registry.bind("other", BoundHandler::function("f"));

        assert_eq!(registry.unbind("e", None, None), 2);
        assert!(registry.snapshot("e").is_empty());
        assert_eq!(registry.snapshot("other").len(), 1);
    }

    #[test]
    fn test_unbind_token() {
        let registry = BindingRegistry::new();
        let token = registry.bind("e", BoundHandler::function("f"));
        registry.bind("e", BoundHandler::function("g"));

        assert!(registry.unbind_token("e", token));
        assert!(!registry.unbind_token("e", token));
        assert_eq!(registry.snapshot("e"), vec![BoundHandler::function("g")]);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let registry = BindingRegistry::new();
        registry.bind("e", BoundHandler::function("f"));
        let snapshot = registry.snapshot("e");

        registry.bind("e", BoundHandler::function("g"));
        registry.unbind_all();

        assert_eq!(snapshot.len(), 1);
        assert!(registry.is_empty());
    }
}
