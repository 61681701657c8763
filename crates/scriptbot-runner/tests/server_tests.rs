use std::fs;
use std::sync::{Arc, Mutex};

use scriptbot_protocol::testing::{RecordingSession, SessionOp};
use scriptbot_protocol::{EventData, ProtocolSession};
use scriptbot_runner::{BotConfig, Server, ServerConfig, ServerError, ServerManager, SessionFactory};
use scriptbot_scripting_host::ScriptingConfig;
use tempfile::TempDir;

const SCRIPT: &str = r##"
function ready(conn, ts)
  conn:sendMessage("#ops", "ready on " .. conn:getNickname())
end

bot:bindEvent("onServerReady", "ready")
"##;

type Sessions = Arc<Mutex<Vec<Arc<RecordingSession>>>>;

fn recording_factory() -> (Arc<dyn SessionFactory>, Sessions) {
    let sessions: Sessions = Arc::new(Mutex::new(Vec::new()));
    let created = sessions.clone();
    let factory = move |name: &str, config: &ServerConfig| -> anyhow::Result<Arc<dyn ProtocolSession>> {
        let session = Arc::new(RecordingSession::new(name, config.nickname.clone()));
        created.lock().unwrap().push(session.clone());
        Ok(session)
    };
    let factory: Arc<dyn SessionFactory> = Arc::new(factory);
    (factory, sessions)
}

fn enabled_config(scripts: &[&str]) -> ServerConfig {
    ServerConfig {
        enabled: true,
        nickname: "bot".to_string(),
        alt_nickname: Some("bot`".to_string()),
        autojoin: vec!["#help".to_string(), "#ops".to_string()],
        scripts: scripts.iter().map(|s| s.to_string()).collect(),
        ..ServerConfig::default()
    }
}

fn scripting(dir: &TempDir) -> ScriptingConfig {
    ScriptingConfig {
        script_dir: Some(dir.path().to_path_buf()),
        ..ScriptingConfig::default()
    }
}

fn last_session(sessions: &Sessions) -> Arc<RecordingSession> {
    sessions.lock().unwrap().last().cloned().unwrap()
}

#[test]
fn test_begin_connects_and_autojoins() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("ready.lua"), SCRIPT).unwrap();
    let (factory, sessions) = recording_factory();

    let server = Server::new("testnet", enabled_config(&["ready.lua"]), scripting(&dir), factory);
    assert!(server.begin());
    assert!(server.is_running());
    assert_eq!(server.host().unwrap().script_count(), 1);

    let session = last_session(&sessions);
    assert_eq!(session.ops(), vec![SessionOp::Connect]);
    session.clear_ops();

    session.emit(EventData::ServerReady);
    assert_eq!(
        session.ops(),
        vec![
            SessionOp::Join("#help".into()),
            SessionOp::Join("#ops".into()),
            SessionOp::Message("#ops".into(), "ready on bot".into()),
        ]
    );
}

#[test]
fn test_missing_configured_script_is_skipped() {
    let dir = TempDir::new().unwrap();
    let (factory, _sessions) = recording_factory();

    let server = Server::new("testnet", enabled_config(&["gone.lua"]), scripting(&dir), factory);
    assert!(server.begin());
    assert_eq!(server.host().unwrap().script_count(), 0);
}

#[test]
fn test_nick_collisions() {
    let dir = TempDir::new().unwrap();
    let (factory, sessions) = recording_factory();
    let server = Server::new("testnet", enabled_config(&[]), scripting(&dir), factory);
    assert!(server.begin());

    let session = last_session(&sessions);
    session.clear_ops();

    session.emit(EventData::NickInUse { nickname: "bot".into() });
    session.emit(EventData::NickInUse { nickname: "bot`".into() });
    session.emit(EventData::Numeric {
        numeric: 1,
        tokens: vec!["Welcome".into()],
    });
    session.emit(EventData::NickInUse { nickname: "helper".into() });

    assert_eq!(
        session.ops(),
        vec![
            SessionOp::Nick("bot`".into()),
            SessionOp::Nick("_bot`".into()),
            SessionOp::Nick("_helper".into()),
        ]
    );
    assert_eq!(session.nickname(), "_helper");
}

#[test]
fn test_disabled_server_refuses_to_start() {
    let dir = TempDir::new().unwrap();
    let (factory, sessions) = recording_factory();
    let config = ServerConfig {
        enabled: false,
        ..enabled_config(&[])
    };

    let server = Server::new("testnet", config, scripting(&dir), factory);
    assert!(!server.begin());
    assert!(matches!(server.try_begin(), Err(ServerError::Disabled)));
    assert!(sessions.lock().unwrap().is_empty());
}

#[test]
fn test_lifecycle_transitions() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("ready.lua"), SCRIPT).unwrap();
    let (factory, sessions) = recording_factory();
    let server = Server::new("testnet", enabled_config(&["ready.lua"]), scripting(&dir), factory);

    assert!(!server.stop("not yet"));
    assert!(server.begin());
    assert!(!server.begin());
    assert!(matches!(server.try_begin(), Err(ServerError::AlreadyStarted)));

    let session = last_session(&sessions);
    let host = server.host().unwrap();
    assert!(server.stop("bye"));
    assert!(server.is_stopped());
    assert!(server.host().is_none());
    assert_eq!(host.script_count(), 0);
    assert_eq!(session.callbacks().total(), 0);
    assert!(session.ops().contains(&SessionOp::Quit("bye".into())));

    // stopped is terminal
    assert!(!server.stop("again"));
    assert!(matches!(server.try_begin(), Err(ServerError::Stopped)));
    assert_eq!(sessions.lock().unwrap().len(), 1);
}

#[test]
fn test_session_creation_failure() {
    let dir = TempDir::new().unwrap();
    let factory = |_: &str, _: &ServerConfig| -> anyhow::Result<Arc<dyn ProtocolSession>> {
        anyhow::bail!("no route to host")
    };

    let server = Server::new("testnet", enabled_config(&[]), scripting(&dir), Arc::new(factory));
    match server.try_begin() {
        Err(ServerError::Session(e)) => assert!(e.to_string().contains("no route")),
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
    assert!(!server.is_running());
}

#[test]
fn test_manager_refuses_duplicates() {
    let dir = TempDir::new().unwrap();
    let (factory, _sessions) = recording_factory();
    let mut manager = ServerManager::new("scriptbot", scripting(&dir), factory);

    assert!(manager.load_server("one", enabled_config(&[])).is_some());
    assert!(manager.load_server("one", ServerConfig::default()).is_none());
    assert!(manager.server("one").unwrap().config().enabled);
    assert_eq!(manager.servers().len(), 1);
}

#[test]
fn test_manager_from_config() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("ready.lua"), SCRIPT).unwrap();
    let (factory, sessions) = recording_factory();

    let mut config = BotConfig::default();
    config.scripting = scripting(&dir);
    config
        .servers
        .insert("alpha".into(), enabled_config(&["ready.lua"]));
    config.servers.insert("beta".into(), ServerConfig::default());

    let manager = ServerManager::from_config(&config, factory);
    assert_eq!(manager.begin_all(), 1);
    assert_eq!(sessions.lock().unwrap().len(), 1);
    assert!(manager.server("alpha").unwrap().is_running());
    assert!(!manager.server("beta").unwrap().is_running());

    assert_eq!(manager.rehash_all(), 1);
    assert_eq!(
        manager.server("alpha").unwrap().host().unwrap().script_count(),
        1
    );

    assert_eq!(manager.stop_all("done"), 1);
    assert_eq!(manager.stop_all("done"), 0);
}

#[test]
fn test_bot_name_reaches_scripts() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("name.rhai"),
        r##"
        fn ready(conn, ts) {
            import "scriptbot::version" as version;
            conn.sendMessage("#ops", version::NAME);
        }

        bot.bindEvent("onServerReady", Fn("ready"));
        "##,
    )
    .unwrap();
    let (factory, sessions) = recording_factory();

    let mut config = BotConfig::default();
    config.name = "helper".to_string();
    config.scripting = scripting(&dir);
    config
        .servers
        .insert("alpha".into(), enabled_config(&["name.rhai"]));

    let manager = ServerManager::from_config(&config, factory);
    assert_eq!(manager.begin_all(), 1);

    let session = last_session(&sessions);
    session.clear_ops();
    session.emit(EventData::ServerReady);
    assert!(session
        .ops()
        .contains(&SessionOp::Message("#ops".into(), "helper".into())));
}

#[test]
fn test_manager_keeps_configured_script_dir() {
    let dir = TempDir::new().unwrap();
    let (factory, _sessions) = recording_factory();
    let manager = ServerManager::new("scriptbot", scripting(&dir), factory);
    assert_eq!(manager.scripting().script_dir.as_deref(), Some(dir.path()));
}

#[tokio::test]
async fn test_run_rehashes_on_signal_and_stops_on_shutdown() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ready.lua");
    fs::write(&path, SCRIPT).unwrap();
    let (factory, sessions) = recording_factory();

    let mut manager = ServerManager::new("scriptbot", scripting(&dir), factory);
    manager.load_server("alpha", enabled_config(&["ready.lua"]));
    let manager = Arc::new(manager);

    let (reload_tx, reload_rx) = tokio::sync::watch::channel(None);
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let runner = manager.clone();
    let task = tokio::spawn(async move {
        runner
            .run(reload_rx, async move {
                let _ = shutdown_rx.await;
            })
            .await;
    });

    // wait for the server to come up
    while !manager.server("alpha").unwrap().is_running() {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    fs::write(&path, SCRIPT.replace("ready on", "rehashed on")).unwrap();
    reload_tx
        .send(Some(scriptbot_scripting_host::ReloadSignal::now()))
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let session = last_session(&sessions);
    session.clear_ops();
    session.emit(EventData::ServerReady);
    assert!(session
        .ops()
        .contains(&SessionOp::Message("#ops".into(), "rehashed on bot".into())));

    shutdown_tx.send(()).unwrap();
    task.await.unwrap();
    assert!(manager.server("alpha").unwrap().is_stopped());
}
