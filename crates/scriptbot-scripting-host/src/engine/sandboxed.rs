//! Sandboxed runtime (Rhai)
//!
//! Scripts in this runtime are untrusted. They reach host modules only
//! through [`SandboxedResolver`], host objects only through the methods
//! registered here (never `__`-prefixed ones), and the reflection and `eval`
//! entry points are disabled.
//!
//! The engine is not re-entrant: a call that arrives while the same engine
//! is already running further up the stack fails with [`InvokeError::Busy`].

use std::collections::HashMap;
use std::io::Read;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, TryLockError};

use rhai::{CallFnOptions, Dynamic, Engine, EvalAltResult, FnPtr, ParseError, Position, Scope, AST};

use super::modules::{host_modules, SandboxedResolver};
use super::{EngineOptions, Global, ScriptEngine};
use crate::api::{BotApi, CommandApi};
use crate::binding::{BindingToken, Callable, ObjectId, ScriptRef};
use crate::error::{EvalFailure, InvokeError, ScriptError};
use crate::handles::ALL_METHODS;
use crate::sandbox::{member_visible, REFLECTION_MEMBERS};
use crate::value::{HostHandle, Value};

type RhaiResult<T> = Result<T, Box<EvalAltResult>>;

/// Identity of a function pointer. Closures built from the same source
/// share one anonymous name and differ only in their captured (curried)
/// values, so both parts take part. `Dynamic` has no `Eq`, so curried
/// values are compared by their debug form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FnKey {
    name: String,
    curry: Vec<String>,
}

impl From<&FnPtr> for FnKey {
    fn from(function: &FnPtr) -> Self {
        Self {
            name: function.fn_name().to_string(),
            curry: function.curry().iter().map(|v| format!("{:?}", v)).collect(),
        }
    }
}

#[derive(Default)]
struct StoredFns {
    next_id: u64,
    entries: HashMap<u64, FnPtr>,
    by_key: HashMap<FnKey, u64>,
}

impl StoredFns {
    fn store(&mut self, function: FnPtr) -> ObjectId {
        let key = FnKey::from(&function);
        if let Some(id) = self.by_key.get(&key) {
            return ObjectId(*id);
        }

        self.next_id += 1;
        let id = self.next_id;
        self.by_key.insert(key, id);
        self.entries.insert(id, function);
        ObjectId(id)
    }

    fn find(&self, function: &FnPtr) -> Option<ObjectId> {
        self.by_key.get(&FnKey::from(function)).map(|id| ObjectId(*id))
    }

    fn get(&self, id: ObjectId) -> Option<FnPtr> {
        self.entries.get(&id.0).cloned()
    }
}

type Fns = Arc<Mutex<StoredFns>>;

fn lock(fns: &Fns) -> MutexGuard<'_, StoredFns> {
    fns.lock().unwrap_or_else(PoisonError::into_inner)
}

struct RhaiState {
    scope: Scope<'static>,
    ast: AST,
}

pub struct RhaiEngine {
    engine: Engine,
    state: Mutex<RhaiState>,
    globals: Arc<RwLock<HashMap<String, Dynamic>>>,
    fns: Fns,
    source_name: String,
}

impl RhaiEngine {
    pub fn new(options: &EngineOptions) -> Self {
        let mut engine = Engine::new();

        engine.set_module_resolver(SandboxedResolver::new(
            options.policy.clone(),
            host_modules(options),
        ));
        engine.disable_symbol("eval");
        for symbol in REFLECTION_MEMBERS {
            engine.disable_symbol(*symbol);
        }
        if let Some(limit) = options.max_operations {
            engine.set_max_operations(limit);
        }

        let logger = options.logger.clone();
        engine.on_print(move |text| logger.info(text));
        let logger = options.logger.clone();
        engine.on_debug(move |text, _source, pos| match pos.line() {
            Some(line) => logger.debug(format_args!("line {}: {}", line, text)),
            None => logger.debug(text),
        });

        // Injected globals are resolved here rather than kept in the scope so
        // that script functions can see them too.
        let globals: Arc<RwLock<HashMap<String, Dynamic>>> = Arc::default();
        let lookup = globals.clone();
        // marked volatile upstream, not scheduled for removal
        #[allow(deprecated)]
        engine.on_var(move |name, _index, _context| {
            Ok(lookup
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(name)
                .cloned())
        });

        register_handle_type(&mut engine);
        register_bot_api(&mut engine);
        register_command_api(&mut engine);

        Self {
            engine,
            state: Mutex::new(RhaiState {
                scope: Scope::new(),
                ast: AST::empty(),
            }),
            globals,
            fns: Arc::default(),
            source_name: options.source_name.clone(),
        }
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, RhaiState>, InvokeError> {
        match self.state.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => Err(InvokeError::Busy),
        }
    }
}

impl ScriptEngine for RhaiEngine {
    fn language(&self) -> &'static str {
        "rhai"
    }

    fn evaluate(&self, source: &mut dyn Read, source_name: &str) -> Result<(), ScriptError> {
        let mut code = String::new();
        source
            .read_to_string(&mut code)
            .map_err(|e| ScriptError::Io {
                path: source_name.into(),
                source: e,
            })?;

        let mut state = self
            .lock_state()
            .map_err(|e| ScriptError::Engine(e.to_string()))?;

        let mut ast = self
            .engine
            .compile(&code)
            .map_err(|e| ScriptError::Evaluation(parse_failure(&e, source_name)))?;
        ast.set_source(source_name);

        let RhaiState { scope, ast: current } = &mut *state;
        *current = ast;
        self.engine
            .run_ast_with_scope(scope, current)
            .map_err(|e| ScriptError::Evaluation(eval_failure(&e, source_name)))
    }

    fn set_global(&self, name: &str, value: Global) -> Result<(), ScriptError> {
        let mut globals = self.globals.write().unwrap_or_else(PoisonError::into_inner);
        match value {
            Global::Bot(api) => {
                globals.insert(
                    name.to_string(),
                    Dynamic::from(RhaiBotApi {
                        api,
                        fns: self.fns.clone(),
                    }),
                );
            }
            Global::Commands(api) => {
                globals.insert(
                    name.to_string(),
                    Dynamic::from(RhaiCommandApi {
                        api,
                        fns: self.fns.clone(),
                    }),
                );
            }
            Global::Value(value) => {
                globals.insert(name.to_string(), to_dynamic(&value));
            }
            Global::Null => {
                globals.remove(name);
            }
        }
        Ok(())
    }

    fn invoke(
        &self,
        receiver: Option<&ScriptRef>,
        handler: &Callable,
        args: &[Value],
    ) -> Result<Value, InvokeError> {
        let missing = || InvokeError::NoSuchCallable(handler.to_string());

        let mut guard = self.lock_state()?;
        let RhaiState { scope, ast } = &mut *guard;
        let args: Vec<Dynamic> = args.iter().map(to_dynamic).collect();

        let result = match handler {
            Callable::Named(name) => {
                let arity = named_arity(ast, name, args.len()).ok_or_else(missing)?;
                let args: Vec<Dynamic> = args.into_iter().take(arity).collect();
                let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);

                match receiver {
                    None => self
                        .engine
                        .call_fn_with_options::<Dynamic>(options, scope, ast, name, args),
                    Some(ScriptRef::Global(variable)) => {
                        let mut this = scope
                            .get_value::<Dynamic>(variable)
                            .ok_or_else(missing)?;
                        let result = self.engine.call_fn_with_options::<Dynamic>(
                            options.bind_this_ptr(&mut this),
                            scope,
                            ast,
                            name,
                            args,
                        );
                        if scope.is_constant(variable) == Some(false) {
                            scope.set_value(variable.as_str(), this);
                        }
                        result
                    }
                    Some(ScriptRef::Ref(_)) => return Err(missing()),
                }
            }
            Callable::Ref(id) => {
                let function = lock(&self.fns).get(*id).ok_or_else(missing)?;
                let arity = pointer_arity(ast, &function).unwrap_or(args.len());
                let args: Vec<Dynamic> = args.into_iter().take(arity).collect();
                function.call::<Dynamic>(&self.engine, ast, args)
            }
        };

        result
            .map(from_dynamic)
            .map_err(|e| InvokeError::Script(eval_failure(&e, &self.source_name)))
    }
}

/// Parameter count of the script function `name` that takes the most of
/// the available arguments. Handlers may declare fewer parameters than the
/// event delivers.
fn named_arity(ast: &AST, name: &str, available: usize) -> Option<usize> {
    ast.iter_functions()
        .filter(|f| f.name == name)
        .map(|f| f.params.len())
        .filter(|count| *count <= available)
        .max()
}

fn pointer_arity(ast: &AST, function: &FnPtr) -> Option<usize> {
    ast.iter_functions()
        .find(|f| f.name == function.fn_name())
        .map(|f| f.params.len().saturating_sub(function.curry().len()))
}

// ============================================================================
// Errors
// ============================================================================

fn location(pos: Position) -> (Option<u32>, Option<u32>) {
    (
        pos.line().and_then(|l| u32::try_from(l).ok()),
        pos.position().and_then(|c| u32::try_from(c).ok()),
    )
}

fn parse_failure(error: &ParseError, source_name: &str) -> EvalFailure {
    let (line, column) = location(error.position());
    EvalFailure::new(source_name, error.err_type().to_string()).at(line, column)
}

fn eval_failure(error: &EvalAltResult, source_name: &str) -> EvalFailure {
    let (line, column) = location(error.position());
    let mut message = error.to_string();
    if let Some(index) = message.rfind(" (line ") {
        message.truncate(index);
    }
    EvalFailure::new(source_name, message).at(line, column)
}

fn runtime_error(message: impl Into<String>) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorRuntime(
        Dynamic::from(message.into()),
        Position::NONE,
    ))
}

// ============================================================================
// Value conversion
// ============================================================================

#[derive(Clone)]
struct RhaiHandle(HostHandle);

fn to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(*b),
        Value::Int(i) => Dynamic::from(*i),
        Value::Float(x) => Dynamic::from(*x),
        Value::Str(s) => Dynamic::from(s.clone()),
        Value::List(items) => Dynamic::from_array(items.iter().map(to_dynamic).collect()),
        Value::Handle(handle) => Dynamic::from(RhaiHandle(handle.clone())),
    }
}

fn from_dynamic(value: Dynamic) -> Value {
    if value.is_unit() {
        return Value::Null;
    }
    if let Ok(b) = value.as_bool() {
        return Value::Bool(b);
    }
    if let Ok(i) = value.as_int() {
        return Value::Int(i);
    }
    if let Ok(x) = value.as_float() {
        return Value::Float(x);
    }
    if value.is_string() {
        return Value::Str(value.into_string().unwrap_or_default());
    }
    if value.is_array() {
        return Value::List(
            value
                .into_array()
                .unwrap_or_default()
                .into_iter()
                .map(from_dynamic)
                .collect(),
        );
    }
    if value.is::<RhaiHandle>() {
        return value
            .try_cast::<RhaiHandle>()
            .map_or(Value::Null, |handle| Value::Handle(handle.0));
    }
    Value::Str(value.to_string())
}

fn to_callable(fns: &Fns, value: Dynamic) -> RhaiResult<Callable> {
    if value.is::<FnPtr>() {
        if let Some(function) = value.try_cast::<FnPtr>() {
            return Ok(Callable::Ref(lock(fns).store(function)));
        }
    } else if value.is_string() {
        return Ok(Callable::Named(value.into_string().unwrap_or_default()));
    }
    Err(runtime_error("handler must be a function pointer or a function name"))
}

fn to_receiver(value: Dynamic) -> RhaiResult<ScriptRef> {
    if value.is_string() {
        return Ok(ScriptRef::Global(value.into_string().unwrap_or_default()));
    }
    Err(runtime_error("receiver must be the name of a global variable"))
}

enum Lookup<T> {
    Empty,
    Found(T),
    Unknown,
}

fn find_callable(fns: &Fns, value: Dynamic) -> Lookup<Callable> {
    if value.is_unit() {
        return Lookup::Empty;
    }
    if value.is_string() {
        return Lookup::Found(Callable::Named(value.into_string().unwrap_or_default()));
    }
    match value.try_cast::<FnPtr>() {
        Some(function) => lock(fns)
            .find(&function)
            .map_or(Lookup::Unknown, |id| Lookup::Found(Callable::Ref(id))),
        None => Lookup::Unknown,
    }
}

fn find_receiver(value: Dynamic) -> Lookup<ScriptRef> {
    if value.is_unit() {
        return Lookup::Empty;
    }
    if value.is_string() {
        return Lookup::Found(ScriptRef::Global(value.into_string().unwrap_or_default()));
    }
    Lookup::Unknown
}

// ============================================================================
// Registered types
// ============================================================================

fn call_handle(handle: &RhaiHandle, method: &str, args: Vec<Dynamic>) -> RhaiResult<Dynamic> {
    let args: Vec<Value> = args.into_iter().map(from_dynamic).collect();
    let result = handle
        .0
        .call(method, &args)
        .map_err(|e| runtime_error(e.to_string()))?;
    Ok(to_dynamic(&result))
}

fn register_handle_type(engine: &mut Engine) {
    engine
        .register_type_with_name::<RhaiHandle>("Handle")
        .register_fn("to_string", |h: RhaiHandle| h.0.describe())
        .register_fn("to_debug", |h: RhaiHandle| format!("{:?}", h.0))
        .register_fn("==", |a: RhaiHandle, b: RhaiHandle| a.0 == b.0);

    for &method in ALL_METHODS.iter().filter(|m| member_visible(m)) {
        engine.register_fn(method, move |h: RhaiHandle| call_handle(&h, method, vec![]));
        engine.register_fn(method, move |h: RhaiHandle, a: Dynamic| {
            call_handle(&h, method, vec![a])
        });
        engine.register_fn(method, move |h: RhaiHandle, a: Dynamic, b: Dynamic| {
            call_handle(&h, method, vec![a, b])
        });
    }
}

#[derive(Clone)]
struct RhaiBotApi {
    api: BotApi,
    fns: Fns,
}

fn unbind(bot: &RhaiBotApi, event: &str, receiver: Lookup<ScriptRef>, handler: Lookup<Callable>) -> i64 {
    let receiver = match receiver {
        Lookup::Empty => None,
        Lookup::Found(receiver) => Some(receiver),
        Lookup::Unknown => return 0,
    };
    let handler = match handler {
        Lookup::Empty => None,
        Lookup::Found(handler) => Some(handler),
        Lookup::Unknown => return 0,
    };
    let removed = bot.api.unbind_event(event, receiver, handler);
    i64::try_from(removed).unwrap_or(i64::MAX)
}

fn register_bot_api(engine: &mut Engine) {
    engine
        .register_type_with_name::<RhaiBotApi>("Bot")
        .register_type_with_name::<BindingToken>("BindingToken")
        .register_fn("to_string", |token: BindingToken| token.to_string())
        .register_fn("log", |bot: RhaiBotApi, line: Dynamic| {
            bot.api.log(&line.to_string())
        })
        .register_fn(
            "bindEvent",
            |bot: RhaiBotApi, event: &str, handler: Dynamic| -> RhaiResult<BindingToken> {
                let handler = to_callable(&bot.fns, handler)?;
                Ok(bot.api.bind_event(event, None, handler))
            },
        )
        .register_fn(
            "bindEvent",
            |bot: RhaiBotApi,
             event: &str,
             receiver: Dynamic,
             handler: Dynamic|
             -> RhaiResult<BindingToken> {
                let receiver = to_receiver(receiver)?;
                let handler = to_callable(&bot.fns, handler)?;
                Ok(bot.api.bind_event(event, Some(receiver), handler))
            },
        )
        .register_fn("unbindEvent", |bot: RhaiBotApi, event: &str, handler: Dynamic| {
            if handler.is::<BindingToken>() {
                return handler
                    .try_cast::<BindingToken>()
                    .map_or(0, |token| i64::from(bot.api.unbind_token(event, token)));
            }
            let handler = find_callable(&bot.fns, handler);
            unbind(&bot, event, Lookup::Empty, handler)
        })
        .register_fn(
            "unbindEvent",
            |bot: RhaiBotApi, event: &str, receiver: Dynamic, handler: Dynamic| {
                let handler = find_callable(&bot.fns, handler);
                unbind(&bot, event, find_receiver(receiver), handler)
            },
        )
        .register_fn("rehash", |bot: RhaiBotApi| bot.api.rehash());
}

#[derive(Clone)]
struct RhaiCommandApi {
    api: CommandApi,
    fns: Fns,
}

fn register_command_api(engine: &mut Engine) {
    engine
        .register_type_with_name::<RhaiCommandApi>("Commands")
        .register_fn(
            "bindCommand",
            |irc: RhaiCommandApi, name: &str, flags: &str, handler: Dynamic| -> RhaiResult<()> {
                let handler = to_callable(&irc.fns, handler)?;
                irc.api.bind_command(name, flags, None, handler);
                Ok(())
            },
        )
        .register_fn(
            "bindCommand",
            |irc: RhaiCommandApi,
             name: &str,
             flags: &str,
             receiver: Dynamic,
             handler: Dynamic|
             -> RhaiResult<()> {
                let receiver = to_receiver(receiver)?;
                let handler = to_callable(&irc.fns, handler)?;
                irc.api.bind_command(name, flags, Some(receiver), handler);
                Ok(())
            },
        )
        .register_fn("unbindCommand", |irc: RhaiCommandApi, name: &str| {
            irc.api.unbind_command(name)
        })
        .register_fn("hasBotFlag", |irc: RhaiCommandApi, client: Dynamic, flag: &str| {
            irc.api.has_bot_flag(&from_dynamic(client), flag)
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxConfig;
    use crate::logger::ScriptLogger;
    use crate::sandbox::SandboxPolicy;

    fn engine_with(policy: SandboxPolicy, max_operations: Option<u64>) -> RhaiEngine {
        RhaiEngine::new(&EngineOptions {
            source_name: "test.rhai".to_string(),
            policy: Arc::new(policy),
            max_operations,
            logger: ScriptLogger::new("test", "test.rhai"),
            bot_name: "scriptbot".to_string(),
            version: "0.0.0".to_string(),
        })
    }

    fn engine() -> RhaiEngine {
        engine_with(SandboxPolicy::default(), None)
    }

    fn eval(engine: &RhaiEngine, code: &str) -> Result<(), ScriptError> {
        engine.evaluate(&mut code.as_bytes(), "test.rhai")
    }

    #[test]
    fn test_invoke_function_truncates_extra_arguments() {
        let engine = engine();
        eval(&engine, "fn double(x) { x * 2 }").unwrap();

        let result = engine
            .invoke_function("double", &[Value::Int(21), Value::from("ignored")])
            .unwrap();
        assert_eq!(result, Value::Int(42));
    }

    #[test]
    fn test_invoke_method_binds_this() {
        let engine = engine();
        eval(
            &engine,
            r##"
            let counter = #{ hits: 0 };
            fn hit(n) { this.hits += n; this.hits }
            "##,
        )
        .unwrap();

        let receiver = ScriptRef::Global("counter".into());
        engine.invoke_method(&receiver, "hit", &[Value::Int(2)]).unwrap();
        let result = engine.invoke_method(&receiver, "hit", &[Value::Int(3)]).unwrap();
        assert_eq!(result, Value::Int(5));
    }

    #[test]
    fn test_missing_callable() {
        let engine = engine();
        eval(&engine, "fn two(a, b) { a + b }").unwrap();

        assert!(matches!(
            engine.invoke_function("nope", &[]),
            Err(InvokeError::NoSuchCallable(_))
        ));
        // not enough arguments for the only overload
        assert!(matches!(
            engine.invoke_function("two", &[Value::Int(1)]),
            Err(InvokeError::NoSuchCallable(_))
        ));
    }

    #[test]
    fn test_parse_error_has_line_and_column() {
        let engine = engine();
        match eval(&engine, "let x = 1;\nlet y = ;") {
            Err(ScriptError::Evaluation(failure)) => {
                assert_eq!(failure.file, "test.rhai");
                assert_eq!(failure.line, Some(2));
                assert!(failure.column.is_some());
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_runtime_error_in_handler() {
        let engine = engine();
        eval(&engine, "fn boom() {\n  throw \"kaboom\";\n}").unwrap();

        match engine.invoke_function("boom", &[]) {
            Err(InvokeError::Script(failure)) => assert!(failure.message.contains("kaboom")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_globals_visible_inside_functions() {
        let engine = engine();
        engine
            .set_global("answer", Global::Value(Value::Int(42)))
            .unwrap();
        eval(&engine, "fn get() { answer }").unwrap();
        assert_eq!(engine.invoke_function("get", &[]).unwrap(), Value::Int(42));

        engine.set_global("answer", Global::Null).unwrap();
        assert!(matches!(
            engine.invoke_function("get", &[]),
            Err(InvokeError::Script(_))
        ));
    }

    #[test]
    fn test_reflection_and_eval_disabled() {
        let engine = engine();
        assert!(eval(&engine, "let t = type_of(42);").is_err());
        assert!(eval(&engine, "let v = eval(\"40 + 2\");").is_err());
    }

    #[test]
    fn test_host_module_import() {
        let engine = engine();
        eval(
            &engine,
            r##"
            fn shout(text) {
                import "irc::format" as fmt;
                fmt::bold(text)
            }
            "##,
        )
        .unwrap();

        let result = engine.invoke_function("shout", &["hey".into()]).unwrap();
        assert_eq!(result, Value::from("\x02hey\x02"));
    }

    #[test]
    fn test_denied_module_looks_missing() {
        let denied = engine();
        match eval(&denied, r#"import "scriptbot::scripts::limits" as limits;"#) {
            Err(ScriptError::Evaluation(failure)) => {
                assert!(failure.message.to_lowercase().contains("not found"));
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let missing = engine();
        match eval(&missing, r#"import "irc::nope" as nope;"#) {
            Err(ScriptError::Evaluation(failure)) => {
                assert!(failure.message.to_lowercase().contains("not found"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_allow_list_opens_internal_module() {
        let config = SandboxConfig {
            allow: vec!["scriptbot::scripts::limits".to_string()],
            deny: vec![],
        };
        let engine = engine_with(SandboxPolicy::from(&config), Some(5000));
        eval(
            &engine,
            r##"
            fn limit() {
                import "scriptbot::scripts::limits" as limits;
                limits::max_operations()
            }
            "##,
        )
        .unwrap();
        assert_eq!(engine.invoke_function("limit", &[]).unwrap(), Value::Int(5000));
    }

    #[test]
    fn test_deny_list_hides_builtin_module() {
        let config = SandboxConfig {
            allow: vec!["irc::format".to_string()],
            deny: vec!["irc::format".to_string()],
        };
        let engine = engine_with(SandboxPolicy::from(&config), None);
        assert!(eval(&engine, r#"import "irc::format" as fmt;"#).is_err());
    }

    #[test]
    fn test_operation_budget() {
        let engine = engine_with(SandboxPolicy::default(), Some(1000));
        eval(&engine, "fn spin() { loop { } }").unwrap();
        assert!(matches!(
            engine.invoke_function("spin", &[]),
            Err(InvokeError::Script(_))
        ));
    }
}
