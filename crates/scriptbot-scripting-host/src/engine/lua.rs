//! Lua runtime (mlua, Lua 5.4)
//!
//! Lua scripts are trusted: host objects expose every method they have,
//! including host-internal ones. Functions and tables a script passes to
//! `bindEvent`/`bindCommand` are kept in the Lua registry and referred to by
//! [`ObjectId`].

use std::collections::HashMap;
use std::io::Read;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use mlua::prelude::*;
use mlua::{HookTriggers, MetaMethod, Variadic, VmState};

use super::{split_location, EngineOptions, Global, ScriptEngine};
use crate::api::{BotApi, CommandApi};
use crate::binding::{BindingToken, Callable, ObjectId, ScriptRef};
use crate::error::{EvalFailure, InvokeError, ScriptError};
use crate::value::{HostHandle, Value};

/// Instructions between two budget checks
const HOOK_GRANULARITY: u32 = 1000;

#[derive(Default)]
struct StoredRefs {
    next_id: u64,
    entries: HashMap<u64, LuaRegistryKey>,
    by_pointer: HashMap<usize, u64>,
}

impl StoredRefs {
    /// Keep a value alive and return its id. Storing the same table or
    /// function twice returns the same id.
    fn store(&mut self, lua: &Lua, value: LuaValue) -> LuaResult<ObjectId> {
        let pointer = value.to_pointer() as usize;
        if let Some(id) = self.by_pointer.get(&pointer) {
            return Ok(ObjectId(*id));
        }

        self.next_id += 1;
        let id = self.next_id;
        self.entries.insert(id, lua.create_registry_value(value)?);
        self.by_pointer.insert(pointer, id);
        Ok(ObjectId(id))
    }

    fn find(&self, value: &LuaValue) -> Option<ObjectId> {
        self.by_pointer
            .get(&(value.to_pointer() as usize))
            .map(|id| ObjectId(*id))
    }

    fn get(&self, lua: &Lua, id: ObjectId) -> Option<LuaValue> {
        self.entries
            .get(&id.0)
            .and_then(|key| lua.registry_value(key).ok())
    }
}

type Refs = Arc<Mutex<StoredRefs>>;

fn lock(refs: &Refs) -> MutexGuard<'_, StoredRefs> {
    refs.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct LuaEngine {
    lua: Lua,
    refs: Refs,
    source_name: String,
    operations: Option<Arc<AtomicU64>>,
    /// Evaluations and invocations currently on the stack
    depth: AtomicUsize,
}

/// Leaves the budget scope when dropped, error paths included
struct BudgetScope<'a> {
    depth: &'a AtomicUsize,
}

impl Drop for BudgetScope<'_> {
    fn drop(&mut self) {
        self.depth.fetch_sub(1, Ordering::Relaxed);
    }
}

impl LuaEngine {
    pub fn new(options: &EngineOptions) -> Result<Self, ScriptError> {
        let lua = Lua::new();
        let engine_error = |e: LuaError| ScriptError::Engine(e.to_string());

        let logger = options.logger.clone();
        let print = lua
            .create_function(move |_, args: Variadic<LuaValue>| {
                let line: Vec<String> = args.iter().map(display).collect();
                logger.info(line.join("\t"));
                Ok(())
            })
            .map_err(engine_error)?;
        lua.globals().set("print", print).map_err(engine_error)?;

        let operations = options.max_operations.map(|limit| {
            let used = Arc::new(AtomicU64::new(0));
            let counter = used.clone();
            lua.set_hook(
                HookTriggers::new().every_nth_instruction(HOOK_GRANULARITY),
                move |_lua, _debug| {
                    let step = u64::from(HOOK_GRANULARITY);
                    if counter.fetch_add(step, Ordering::Relaxed) + step > limit {
                        Err(LuaError::RuntimeError(format!(
                            "operation budget of {} exceeded",
                            limit
                        )))
                    } else {
                        Ok(VmState::Continue)
                    }
                },
            );
            used
        });

        Ok(Self {
            lua,
            refs: Arc::new(Mutex::new(StoredRefs::default())),
            source_name: options.source_name.clone(),
            operations,
            depth: AtomicUsize::new(0),
        })
    }

    /// The budget covers one outermost call. Nested calls made by host
    /// functions keep spending it.
    fn enter_budget(&self) -> BudgetScope<'_> {
        if self.depth.fetch_add(1, Ordering::Relaxed) == 0 {
            if let Some(used) = &self.operations {
                used.store(0, Ordering::Relaxed);
            }
        }
        BudgetScope { depth: &self.depth }
    }

    fn failure(&self, error: &LuaError, source_name: &str) -> EvalFailure {
        let text = match error {
            LuaError::CallbackError { cause, .. } => cause.to_string(),
            other => other.to_string(),
        };
        let first_line = text.lines().next().unwrap_or_default();
        let (line, message) = split_location(first_line, source_name);
        EvalFailure::new(source_name, message).at(line, None)
    }

    fn receiver_value(&self, receiver: &ScriptRef) -> Option<LuaTable> {
        let value = match receiver {
            ScriptRef::Global(name) => self.lua.globals().get::<LuaValue>(name.as_str()).ok()?,
            ScriptRef::Ref(id) => lock(&self.refs).get(&self.lua, *id)?,
        };
        match value {
            LuaValue::Table(table) => Some(table),
            _ => None,
        }
    }
}

impl ScriptEngine for LuaEngine {
    fn language(&self) -> &'static str {
        "lua"
    }

    fn evaluate(&self, source: &mut dyn Read, source_name: &str) -> Result<(), ScriptError> {
        let mut code = String::new();
        source
            .read_to_string(&mut code)
            .map_err(|e| ScriptError::Io {
                path: source_name.into(),
                source: e,
            })?;

        let _budget = self.enter_budget();
        self.lua
            .load(code.as_str())
            .set_name(format!("@{}", source_name))
            .exec()
            .map_err(|e| ScriptError::Evaluation(self.failure(&e, source_name)))
    }

    fn set_global(&self, name: &str, value: Global) -> Result<(), ScriptError> {
        let globals = self.lua.globals();
        let result = match value {
            Global::Bot(api) => globals.set(
                name,
                LuaBotApi {
                    api,
                    refs: self.refs.clone(),
                },
            ),
            Global::Commands(api) => globals.set(
                name,
                LuaCommandApi {
                    api,
                    refs: self.refs.clone(),
                },
            ),
            Global::Value(value) => {
                to_lua(&self.lua, &value).and_then(|value| globals.set(name, value))
            }
            Global::Null => globals.set(name, LuaValue::Nil),
        };
        result.map_err(|e| ScriptError::Engine(e.to_string()))
    }

    fn invoke(
        &self,
        receiver: Option<&ScriptRef>,
        handler: &Callable,
        args: &[Value],
    ) -> Result<Value, InvokeError> {
        let missing = || InvokeError::NoSuchCallable(handler.to_string());

        let this = match receiver {
            Some(receiver) => Some(self.receiver_value(receiver).ok_or_else(missing)?),
            None => None,
        };

        let function = match handler {
            Callable::Named(name) => {
                let found = match &this {
                    Some(table) => table.get::<LuaValue>(name.as_str()),
                    None => self.lua.globals().get::<LuaValue>(name.as_str()),
                };
                match found {
                    Ok(LuaValue::Function(function)) => function,
                    _ => return Err(missing()),
                }
            }
            Callable::Ref(id) => match lock(&self.refs).get(&self.lua, *id) {
                Some(LuaValue::Function(function)) => function,
                _ => return Err(missing()),
            },
        };

        let mut lua_args = Vec::with_capacity(args.len() + 1);
        if let Some(this) = this {
            lua_args.push(LuaValue::Table(this));
        }
        for arg in args {
            let value = to_lua(&self.lua, arg)
                .map_err(|e| InvokeError::Script(self.failure(&e, &self.source_name)))?;
            lua_args.push(value);
        }

        let _budget = self.enter_budget();
        let result: LuaValue = function
            .call(Variadic::from_iter(lua_args))
            .map_err(|e| InvokeError::Script(self.failure(&e, &self.source_name)))?;
        Ok(from_lua(result))
    }
}

// ============================================================================
// Value conversion
// ============================================================================

fn to_lua(lua: &Lua, value: &Value) -> LuaResult<LuaValue> {
    Ok(match value {
        Value::Null => LuaValue::Nil,
        Value::Bool(b) => LuaValue::Boolean(*b),
        Value::Int(i) => LuaValue::Integer(*i),
        Value::Float(x) => LuaValue::Number(*x),
        Value::Str(s) => LuaValue::String(lua.create_string(s)?),
        Value::List(items) => {
            let table = lua.create_table()?;
            for (i, item) in items.iter().enumerate() {
                table.raw_set(i + 1, to_lua(lua, item)?)?;
            }
            LuaValue::Table(table)
        }
        Value::Handle(handle) => LuaValue::UserData(lua.create_userdata(LuaHandle(handle.clone()))?),
    })
}

fn from_lua(value: LuaValue) -> Value {
    match value {
        LuaValue::Boolean(b) => Value::Bool(b),
        LuaValue::Integer(i) => Value::Int(i),
        LuaValue::Number(x) => Value::Float(x),
        LuaValue::String(s) => Value::Str(s.to_string_lossy().to_string()),
        LuaValue::Table(table) => Value::List(
            table
                .sequence_values::<LuaValue>()
                .filter_map(Result::ok)
                .map(from_lua)
                .collect(),
        ),
        LuaValue::UserData(ud) => match ud.borrow::<LuaHandle>() {
            Ok(handle) => Value::Handle(handle.0.clone()),
            Err(_) => Value::Null,
        },
        _ => Value::Null,
    }
}

fn display(value: &LuaValue) -> String {
    match value {
        LuaValue::Nil => "nil".to_string(),
        LuaValue::Boolean(b) => b.to_string(),
        LuaValue::Integer(i) => i.to_string(),
        LuaValue::Number(x) => x.to_string(),
        LuaValue::String(s) => s.to_string_lossy().to_string(),
        LuaValue::UserData(ud) => match ud.borrow::<LuaHandle>() {
            Ok(handle) => handle.0.describe(),
            Err(_) => value.type_name().to_string(),
        },
        other => other.type_name().to_string(),
    }
}

fn to_callable(lua: &Lua, refs: &Refs, value: LuaValue) -> LuaResult<Callable> {
    match value {
        LuaValue::String(name) => Ok(Callable::Named(name.to_string_lossy().to_string())),
        LuaValue::Function(_) => Ok(Callable::Ref(lock(refs).store(lua, value)?)),
        other => Err(LuaError::RuntimeError(format!(
            "handler must be a function or a function name, got {}",
            other.type_name()
        ))),
    }
}

fn to_receiver(lua: &Lua, refs: &Refs, value: LuaValue) -> LuaResult<ScriptRef> {
    match value {
        LuaValue::String(name) => Ok(ScriptRef::Global(name.to_string_lossy().to_string())),
        LuaValue::Table(_) => Ok(ScriptRef::Ref(lock(refs).store(lua, value)?)),
        other => Err(LuaError::RuntimeError(format!(
            "receiver must be a table or a global name, got {}",
            other.type_name()
        ))),
    }
}

/// Outcome of looking up an unbind argument without storing anything new
enum Lookup<T> {
    Empty,
    Found(T),
    /// A function or table the host never saw, so nothing can match it
    Unknown,
}

fn find_callable(refs: &Refs, value: Option<LuaValue>) -> Lookup<Callable> {
    match value {
        None | Some(LuaValue::Nil) => Lookup::Empty,
        Some(LuaValue::String(name)) => Lookup::Found(Callable::Named(name.to_string_lossy().to_string())),
        Some(other) => match lock(refs).find(&other) {
            Some(id) => Lookup::Found(Callable::Ref(id)),
            None => Lookup::Unknown,
        },
    }
}

fn find_receiver(refs: &Refs, value: Option<LuaValue>) -> Lookup<ScriptRef> {
    match value {
        None | Some(LuaValue::Nil) => Lookup::Empty,
        Some(LuaValue::String(name)) => Lookup::Found(ScriptRef::Global(name.to_string_lossy().to_string())),
        Some(other) => match lock(refs).find(&other) {
            Some(id) => Lookup::Found(ScriptRef::Ref(id)),
            None => Lookup::Unknown,
        },
    }
}

// ============================================================================
// Userdata
// ============================================================================

struct LuaHandle(HostHandle);

impl LuaUserData for LuaHandle {
    fn add_methods<M: LuaUserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::Index, |lua, this, key: String| {
            if !this.0.has_method(&key) {
                return Ok(LuaValue::Nil);
            }

            let handle = this.0.clone();
            let function = lua.create_function(move |lua, args: LuaMultiValue| {
                let mut values: Vec<LuaValue> = args.into_iter().collect();
                let called_as_method = matches!(
                    values.first(),
                    Some(LuaValue::UserData(ud)) if ud.borrow::<LuaHandle>().is_ok_and(|h| h.0 == handle)
                );
                if called_as_method {
                    values.remove(0);
                }

                let args: Vec<Value> = values.into_iter().map(from_lua).collect();
                let result = handle.call(&key, &args).map_err(LuaError::external)?;
                to_lua(lua, &result)
            })?;
            Ok(LuaValue::Function(function))
        });

        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| Ok(this.0.describe()));

        methods.add_meta_method(MetaMethod::Eq, |_, this, other: LuaAnyUserData| {
            Ok(other.borrow::<LuaHandle>().is_ok_and(|o| o.0 == this.0))
        });
    }
}

struct LuaBindingToken(BindingToken);

impl LuaUserData for LuaBindingToken {
    fn add_methods<M: LuaUserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| Ok(this.0.to_string()));
    }
}

struct LuaBotApi {
    api: BotApi,
    refs: Refs,
}

impl LuaUserData for LuaBotApi {
    fn add_methods<M: LuaUserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("log", |_, this, line: LuaValue| {
            this.api.log(&display(&line));
            Ok(())
        });

        // bindEvent(event, handler) or bindEvent(event, receiver, handler)
        methods.add_method(
            "bindEvent",
            |lua, this, (event, first, second): (String, LuaValue, Option<LuaValue>)| {
                let (receiver, handler) = match second {
                    Some(handler) => (Some(to_receiver(lua, &this.refs, first)?), handler),
                    None => (None, first),
                };
                let handler = to_callable(lua, &this.refs, handler)?;
                Ok(LuaBindingToken(this.api.bind_event(&event, receiver, handler)))
            },
        );

        // unbindEvent(event, token), unbindEvent(event, handler) or
        // unbindEvent(event, receiver, handler)
        methods.add_method(
            "unbindEvent",
            |_, this, (event, first, second): (String, Option<LuaValue>, Option<LuaValue>)| {
                if let Some(LuaValue::UserData(ud)) = &first {
                    if let Ok(token) = ud.borrow::<LuaBindingToken>() {
                        return Ok(usize::from(this.api.unbind_token(&event, token.0)));
                    }
                }

                let (receiver, handler) = match second {
                    Some(handler) => (find_receiver(&this.refs, first), find_callable(&this.refs, Some(handler))),
                    None => (Lookup::Empty, find_callable(&this.refs, first)),
                };
                let receiver = match receiver {
                    Lookup::Empty => None,
                    Lookup::Found(receiver) => Some(receiver),
                    Lookup::Unknown => return Ok(0),
                };
                let handler = match handler {
                    Lookup::Empty => None,
                    Lookup::Found(handler) => Some(handler),
                    Lookup::Unknown => return Ok(0),
                };
                Ok(this.api.unbind_event(&event, receiver, handler))
            },
        );

        methods.add_method("rehash", |_, this, ()| {
            this.api.rehash();
            Ok(())
        });

        methods.add_method("__bindings", |_, this, event: String| {
            Ok(this
                .api
                .bindings(&event)
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>())
        });
    }
}

struct LuaCommandApi {
    api: CommandApi,
    refs: Refs,
}

impl LuaUserData for LuaCommandApi {
    fn add_methods<M: LuaUserDataMethods<Self>>(methods: &mut M) {
        // bindCommand(name, flags, handler) or bindCommand(name, flags, receiver, handler)
        methods.add_method(
            "bindCommand",
            |lua, this, (name, flags, first, second): (String, Option<String>, LuaValue, Option<LuaValue>)| {
                let (receiver, handler) = match second {
                    Some(handler) => (Some(to_receiver(lua, &this.refs, first)?), handler),
                    None => (None, first),
                };
                let handler = to_callable(lua, &this.refs, handler)?;
                this.api
                    .bind_command(&name, flags.as_deref().unwrap_or_default(), receiver, handler);
                Ok(())
            },
        );

        methods.add_method("unbindCommand", |_, this, name: String| {
            this.api.unbind_command(&name);
            Ok(())
        });

        methods.add_method("hasBotFlag", |_, this, (client, flag): (LuaValue, String)| {
            Ok(this.api.has_bot_flag(&from_lua(client), &flag))
        });
    }
}
