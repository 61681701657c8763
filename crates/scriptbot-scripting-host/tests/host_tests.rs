use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use scriptbot_protocol::testing::{RecordingSession, SessionOp};
use scriptbot_protocol::{ChannelInfo, ClientInfo, ProtocolSession};
use scriptbot_scripting_host::handles::{ChannelHandle, ClientHandle, ConnectionHandle};
use scriptbot_scripting_host::{
    BotContext, ScriptError, ScriptHost, ScriptingConfig, Value,
};
use tempfile::TempDir;

struct Fixture {
    dir: TempDir,
    session: Arc<RecordingSession>,
    host: Arc<ScriptHost>,
}

impl Fixture {
    fn new() -> Self {
        Self::with_config(ScriptingConfig::default())
    }

    fn with_config(config: ScriptingConfig) -> Self {
        Self::with_context(BotContext::new("testnet", config))
    }

    fn with_context(ctx: BotContext) -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            session: Arc::new(RecordingSession::new("testnet", "scriptbot")),
            host: ScriptHost::new(ctx),
        }
    }

    fn write(&self, name: &str, code: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, code).unwrap();
        path
    }

    fn connection(&self) -> Value {
        Value::Handle(ConnectionHandle::handle(self.session.clone()))
    }

    fn fire(&self, event: &str) -> usize {
        self.host.call_bound(event, &[self.connection(), Value::Int(0)])
    }

    fn command(&self, line: &str) -> bool {
        let session: Arc<dyn ProtocolSession> = self.session.clone();
        self.host.dispatch_command(
            ConnectionHandle::handle(session.clone()),
            1_700_000_000_000,
            ChannelHandle::handle(session.clone(), ChannelInfo::new("#test")),
            ClientHandle::handle(session, ClientInfo::parse("dave!d@example.org")),
            line,
        )
    }

    /// Texts of the messages sent so far, then forget them
    fn sent(&self) -> Vec<String> {
        let texts = self
            .session
            .ops()
            .into_iter()
            .filter_map(|op| match op {
                SessionOp::Message(_, text) => Some(text),
                _ => None,
            })
            .collect();
        self.session.clear_ops();
        texts
    }
}

fn rewrite(path: &Path, code: &str) {
    fs::write(path, code).unwrap();
}

const ORDERED: &str = r##"
function a(conn)
  conn:sendMessage("#test", "a")
  bot:unbindEvent("onTest", "c")
  bot:bindEvent("onTest", "d")
end
function b(conn) conn:sendMessage("#test", "b") end
function c(conn) conn:sendMessage("#test", "c") end
function d(conn) conn:sendMessage("#test", "d") end

bot:bindEvent("onTest", "a")
bot:bindEvent("onTest", "b")
bot:bindEvent("onTest", "c")
"##;

#[test]
fn test_call_bound_uses_snapshot_in_insertion_order() {
    let fx = Fixture::new();
    fx.host.load_script(fx.write("ordered.lua", ORDERED), None).unwrap();

    assert_eq!(fx.fire("onTest"), 3);
    assert_eq!(fx.sent(), vec!["a", "b", "c"]);

    assert_eq!(fx.fire("onTest"), 3);
    assert_eq!(fx.sent(), vec!["a", "b", "d"]);

    assert_eq!(fx.fire("onSomethingElse"), 0);
}

const COMMANDS: &str = r##"
function first(conn, ts, chan, sender, name, rest)
  conn:sendMessage("#test", "first")
end
function second(conn, ts, chan, sender, name, rest)
  conn:sendMessage(chan:getName(), "second:" .. name .. ":" .. rest .. ":" .. sender:getNickname())
end

irc:bindCommand("hello", "", "first")
irc:bindCommand("hello", "", "second")
irc:bindCommand("Help", "", second)
"##;

#[test]
fn test_commands_last_bind_wins_and_split_remainder() {
    let fx = Fixture::new();
    fx.host.load_script(fx.write("commands.lua", COMMANDS), None).unwrap();

    assert_eq!(fx.host.commands().names(), vec!["hello", "help"]);

    assert!(fx.command("hello there"));
    assert_eq!(fx.sent(), vec!["second:hello:there:dave"]);

    assert!(fx.command("HELP me"));
    assert_eq!(fx.sent(), vec!["second:HELP:me:dave"]);

    assert!(fx.command("help"));
    assert_eq!(fx.sent(), vec!["second:help::dave"]);

    assert!(!fx.command("nope"));
    assert!(!fx.command(""));
    assert!(fx.sent().is_empty());
}

#[test]
fn test_failed_reload_keeps_previous_version() {
    let fx = Fixture::new();
    let path = fx.write(
        "greeter.lua",
        r##"
        function greet(conn) conn:sendMessage("#test", "v1") end
        bot:bindEvent("onTest", "greet")
        irc:bindCommand("greet", "", "greet")
        "##,
    );
    fx.host.load_script(&path, None).unwrap();

    rewrite(
        &path,
        r##"
        irc:bindCommand("broken", "", "greet")
        function greet(conn
        "##,
    );
    assert!(matches!(
        fx.host.reload_script(&path),
        Err(ScriptError::Evaluation(_))
    ));

    assert_eq!(fx.fire("onTest"), 1);
    assert!(fx.command("greet"));
    assert_eq!(fx.sent(), vec!["v1", "v1"]);
    assert_eq!(fx.host.commands().names(), vec!["greet"]);

    rewrite(
        &path,
        r##"
        function greet(conn) conn:sendMessage("#test", "v2") end
        bot:bindEvent("onTest", "greet")
        "##,
    );
    fx.host.reload_script(&path).unwrap();

    assert_eq!(fx.fire("onTest"), 1);
    assert!(!fx.command("greet"));
    assert_eq!(fx.sent(), vec!["v2"]);
    assert!(fx.host.commands().is_empty());
}

#[test]
fn test_runtime_error_during_reload_keeps_previous_version() {
    let fx = Fixture::new();
    let path = fx.write(
        "boom.lua",
        r##"
        function ping(conn) conn:sendMessage("#test", "pong") end
        bot:bindEvent("onTest", "ping")
        "##,
    );
    fx.host.load_script(&path, None).unwrap();

    rewrite(
        &path,
        r##"
        bot:bindEvent("onTest", "ping")
        error("refusing to load")
        "##,
    );
    match fx.host.reload_script(&path) {
        Err(ScriptError::Evaluation(failure)) => {
            assert_eq!(failure.file, "boom.lua");
            assert_eq!(failure.line, Some(3));
            assert!(failure.message.contains("refusing to load"));
        }
        other => panic!("unexpected result: {other:?}"),
    }

    assert_eq!(fx.fire("onTest"), 1);
    assert_eq!(fx.sent(), vec!["pong"]);
}

#[test]
fn test_unload_removes_everything() {
    let fx = Fixture::new();
    let path = fx.write("commands.lua", COMMANDS);
    let script = fx.host.load_script(&path, None).unwrap();
    fx.host
        .load_script(fx.write("ordered.lua", ORDERED), None)
        .unwrap();

    assert!(fx.host.unload_script(&path));
    assert!(!script.is_loaded());
    assert!(fx.host.commands().is_empty());
    assert!(!fx.command("hello"));
    assert!(fx.host.script(&path).is_none());
    assert!(!fx.host.unload_script(&path));

    // the other script is untouched
    assert_eq!(fx.fire("onTest"), 3);

    fx.host.unload();
    assert_eq!(fx.host.script_count(), 0);
    assert_eq!(fx.fire("onTest"), 0);
}

#[test]
fn test_unbind_event_wildcard() {
    let fx = Fixture::new();
    fx.host
        .load_script(
            fx.write(
                "wildcard.lua",
                r##"
                function a(conn) conn:sendMessage("#test", "a") end
                function b(conn) conn:sendMessage("#test", "b") end
                local handlers = {}
                function handlers.onTest(self, conn) conn:sendMessage("#test", "table") end

                bot:bindEvent("onTest", "a")
                bot:bindEvent("onTest", b)
                bot:bindEvent("onTest", handlers, "onTest")
                bot:bindEvent("onClear", function() bot:unbindEvent("onTest", nil, nil) end)
                "##,
            ),
            None,
        )
        .unwrap();

    assert_eq!(fx.fire("onTest"), 3);
    assert_eq!(fx.sent(), vec!["a", "b", "table"]);

    fx.fire("onClear");
    assert_eq!(fx.fire("onTest"), 0);
}

#[test]
fn test_load_errors() {
    let fx = Fixture::new();
    let path = fx.write("twice.lua", "x = 1");
    fx.host.load_script(&path, None).unwrap();

    assert!(matches!(
        fx.host.load_script(&path, None),
        Err(ScriptError::AlreadyLoaded(_))
    ));
    assert!(matches!(
        fx.host.load_script(fx.dir.path().join("missing.lua"), None),
        Err(ScriptError::NotFound(_))
    ));
    assert!(matches!(
        fx.host.load_script(fx.write("notes.txt", "hello"), None),
        Err(ScriptError::Resolution { .. })
    ));
    assert!(matches!(
        fx.host.load_script(fx.write("broken.lua", "function ("), None),
        Err(ScriptError::Evaluation(_))
    ));
    assert_eq!(fx.host.script_count(), 1);

    // a declared type overrides the extension
    fx.host
        .load_script(fx.write("typed.txt", "x = 2"), Some("lua"))
        .unwrap();
    assert_eq!(fx.host.script_count(), 2);
}

#[test]
fn test_failed_load_leaves_no_commands() {
    let fx = Fixture::new();
    let result = fx.host.load_script(
        fx.write(
            "half.lua",
            r##"
            irc:bindCommand("half", "", "nothing")
            error("stop")
            "##,
        ),
        None,
    );
    assert!(result.is_err());
    assert!(fx.host.commands().is_empty());
}

#[test]
fn test_rehash_from_script_reloads_all() {
    let fx = Fixture::new();
    let counter = fx.write(
        "counter.lua",
        r##"
        loads = (loads or 0) + 1
        function report(conn) conn:sendMessage("#test", "loaded") end
        bot:bindEvent("onTest", "report")
        "##,
    );
    let rehasher = fx.write(
        "rehasher.lua",
        r##"
        irc:bindCommand("rehash", "", function() bot:rehash() end)
        "##,
    );
    fx.host.load_script(&counter, None).unwrap();
    fx.host.load_script(&rehasher, None).unwrap();

    assert!(fx.command("rehash"));
    assert_eq!(fx.host.script_count(), 2);
    assert!(fx.host.commands().resolve("rehash").is_some());

    assert_eq!(fx.fire("onTest"), 1);
    assert_eq!(fx.sent(), vec!["loaded"]);
}

const SANDBOXED: &str = r##"
fn greet(conn, ts, chan, sender, name, rest) {
    conn.sendMessage(chan.getName(), `hi ${sender.getNickname()}: ${rest}`);
}

fn on_test(conn) {
    conn.sendMessage("#test", "rhai");
}

irc.bindCommand("greet", "", "greet");
bot.bindEvent("onTest", Fn("on_test"));
"##;

#[test]
fn test_sandboxed_script_events_and_commands() {
    let fx = Fixture::new();
    fx.host
        .load_script(fx.write("hello.rhai", SANDBOXED), None)
        .unwrap();

    assert_eq!(fx.fire("onTest"), 1);
    assert_eq!(fx.sent(), vec!["rhai"]);

    assert!(fx.command("GREET everyone"));
    assert_eq!(
        fx.session.ops(),
        vec![SessionOp::Message("#test".into(), "hi dave: everyone".into())]
    );
}

#[test]
fn test_sandboxed_closures_bind_separately() {
    let fx = Fixture::new();
    fx.host
        .load_script(
            fx.write(
                "closures.rhai",
                r##"
                for n in [1, 2] {
                    bot.bindEvent("onTest", |conn| conn.sendMessage("#test", `closure ${n}`));
                }

                let once = |conn| conn.sendMessage("#test", "once");
                bot.bindEvent("onOnce", once);
                bot.bindEvent("onOnce", once);
                "##,
            ),
            None,
        )
        .unwrap();

    assert_eq!(fx.fire("onTest"), 2);
    assert_eq!(fx.sent(), vec!["closure 1", "closure 2"]);

    // the same closure value is still one binding
    assert_eq!(fx.fire("onOnce"), 1);
    assert_eq!(fx.sent(), vec!["once"]);
}

#[test]
fn test_version_module_reports_context_identity() {
    let mut ctx = BotContext::new("testnet", ScriptingConfig::default());
    ctx.bot_name = "helper".to_string();
    ctx.version = "9.9.9".to_string();
    let fx = Fixture::with_context(ctx);

    fx.host
        .load_script(
            fx.write(
                "version.rhai",
                r##"
                fn who(conn) {
                    import "scriptbot::version" as version;
                    conn.sendMessage("#test", `${version::NAME} ${version::VERSION}`);
                }

                bot.bindEvent("onTest", Fn("who"));
                "##,
            ),
            None,
        )
        .unwrap();

    assert_eq!(fx.fire("onTest"), 1);
    assert_eq!(fx.sent(), vec!["helper 9.9.9"]);
}

#[test]
fn test_sandbox_denied_module_fails_load() {
    let fx = Fixture::new();
    let result = fx.host.load_script(
        fx.write(
            "sneaky.rhai",
            r##"
            import "scriptbot::scripts::limits" as limits;
            "##,
        ),
        None,
    );

    match result {
        Err(ScriptError::Evaluation(failure)) => {
            assert!(failure.message.to_lowercase().contains("not found"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn test_hot_reload_poll() {
    let config = ScriptingConfig {
        hot_reload: true,
        hot_reload_interval_ms: 0,
        ..ScriptingConfig::default()
    };
    let fx = Fixture::with_config(config);
    let path = fx.write(
        "hot.lua",
        r##"
        function f(conn) conn:sendMessage("#test", "old") end
        bot:bindEvent("onTest", "f")
        "##,
    );
    fx.host.load_script(&path, None).unwrap();
    assert!(!fx.host.poll_changes().has_changes());

    rewrite(
        &path,
        r##"
        function f(conn) conn:sendMessage("#test", "new") end
        bot:bindEvent("onTest", "f")
        "##,
    );
    let later = std::time::SystemTime::now() + std::time::Duration::from_secs(5);
    fs::File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(later)
        .unwrap();

    let result = fx.host.poll_changes();
    assert_eq!(result.changed.len(), 1);
    fx.fire("onTest");
    assert_eq!(fx.sent(), vec!["new"]);

    fs::remove_file(&path).unwrap();
    let result = fx.host.poll_changes();
    assert_eq!(result.removed.len(), 1);
    assert_eq!(fx.host.script_count(), 0);
}
