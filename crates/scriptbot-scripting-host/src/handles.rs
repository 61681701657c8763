//! Host objects handed to script handlers: the connection, channels and
//! clients

use std::sync::Arc;

use scriptbot_protocol::{ChannelClientInfo, ChannelInfo, ClientInfo, ProtocolSession};

use crate::error::HostCallError;
use crate::value::{opt_str_arg, str_arg, HostHandle, HostObject, Value};

/// Every method name a handle may answer to. Engines that register methods
/// up front use this list.
pub const ALL_METHODS: &[&str] = &[
    "joinChannel",
    "partChannel",
    "sendMessage",
    "sendAction",
    "sendNotice",
    "sendRawMessage",
    "getNickname",
    "setNickname",
    "getServerName",
    "getName",
    "getTopic",
    "part",
    "getUsername",
    "getHostname",
    "getHostmask",
    "getModes",
];

fn no_such_method(type_name: &'static str, method: &str) -> HostCallError {
    HostCallError::NoSuchMethod {
        type_name,
        method: method.to_string(),
    }
}

pub struct ConnectionHandle {
    session: Arc<dyn ProtocolSession>,
}

impl ConnectionHandle {
    pub fn handle(session: Arc<dyn ProtocolSession>) -> HostHandle {
        HostHandle::new(Self { session })
    }
}

impl HostObject for ConnectionHandle {
    fn type_name(&self) -> &'static str {
        "irc::Connection"
    }

    fn methods(&self) -> &'static [&'static str] {
        &[
            "joinChannel",
            "partChannel",
            "sendMessage",
            "sendAction",
            "sendNotice",
            "sendRawMessage",
            "getNickname",
            "setNickname",
            "getServerName",
        ]
    }

    fn call(&self, method: &str, args: &[Value]) -> Result<Value, HostCallError> {
        match method {
            "joinChannel" => self.session.join_channel(str_arg(args, 0, method)?),
            "partChannel" => self
                .session
                .part_channel(str_arg(args, 0, method)?, &opt_str_arg(args, 1)),
            "sendMessage" => self
                .session
                .send_message(str_arg(args, 0, method)?, &opt_str_arg(args, 1)),
            "sendAction" => self
                .session
                .send_action(str_arg(args, 0, method)?, &opt_str_arg(args, 1)),
            "sendNotice" => self
                .session
                .send_notice(str_arg(args, 0, method)?, &opt_str_arg(args, 1)),
            "sendRawMessage" => self.session.send_raw(str_arg(args, 0, method)?),
            "getNickname" => return Ok(self.session.nickname().into()),
            "setNickname" => self.session.set_nickname(str_arg(args, 0, method)?),
            "getServerName" => return Ok(self.session.server_name().into()),
            other => return Err(no_such_method(self.type_name(), other)),
        }
        Ok(Value::Null)
    }

    fn describe(&self) -> String {
        self.session.server_name().to_string()
    }
}

pub struct ChannelHandle {
    session: Arc<dyn ProtocolSession>,
    channel: ChannelInfo,
}

impl ChannelHandle {
    pub fn handle(session: Arc<dyn ProtocolSession>, channel: ChannelInfo) -> HostHandle {
        HostHandle::new(Self { session, channel })
    }
}

impl HostObject for ChannelHandle {
    fn type_name(&self) -> &'static str {
        "irc::Channel"
    }

    fn methods(&self) -> &'static [&'static str] {
        &[
            "getName",
            "getTopic",
            "sendMessage",
            "sendAction",
            "sendNotice",
            "part",
        ]
    }

    fn call(&self, method: &str, args: &[Value]) -> Result<Value, HostCallError> {
        let name = &self.channel.name;
        match method {
            "getName" => return Ok(name.as_str().into()),
            "getTopic" => return Ok(self.channel.topic.clone().into()),
            "sendMessage" => self.session.send_message(name, str_arg(args, 0, method)?),
            "sendAction" => self.session.send_action(name, str_arg(args, 0, method)?),
            "sendNotice" => self.session.send_notice(name, str_arg(args, 0, method)?),
            "part" => self.session.part_channel(name, &opt_str_arg(args, 0)),
            other => return Err(no_such_method(self.type_name(), other)),
        }
        Ok(Value::Null)
    }

    fn describe(&self) -> String {
        self.channel.to_string()
    }
}

pub struct ClientHandle {
    session: Arc<dyn ProtocolSession>,
    client: ClientInfo,
    modes: String,
}

impl ClientHandle {
    pub fn handle(session: Arc<dyn ProtocolSession>, client: ClientInfo) -> HostHandle {
        HostHandle::new(Self {
            session,
            client,
            modes: String::new(),
        })
    }

    pub fn in_channel(session: Arc<dyn ProtocolSession>, client: ChannelClientInfo) -> HostHandle {
        HostHandle::new(Self {
            session,
            client: client.client,
            modes: client.modes,
        })
    }
}

impl HostObject for ClientHandle {
    fn type_name(&self) -> &'static str {
        "irc::Client"
    }

    fn methods(&self) -> &'static [&'static str] {
        &[
            "getNickname",
            "getUsername",
            "getHostname",
            "getHostmask",
            "getModes",
            "sendMessage",
            "sendNotice",
        ]
    }

    fn call(&self, method: &str, args: &[Value]) -> Result<Value, HostCallError> {
        let nickname = &self.client.nickname;
        match method {
            "getNickname" => return Ok(nickname.as_str().into()),
            "getUsername" => return Ok(self.client.username.as_str().into()),
            "getHostname" => return Ok(self.client.hostname.as_str().into()),
            "getHostmask" => return Ok(self.client.hostmask().into()),
            "getModes" => return Ok(self.modes.as_str().into()),
            "sendMessage" => self.session.send_message(nickname, str_arg(args, 0, method)?),
            "sendNotice" => self.session.send_notice(nickname, str_arg(args, 0, method)?),
            other => return Err(no_such_method(self.type_name(), other)),
        }
        Ok(Value::Null)
    }

    fn describe(&self) -> String {
        self.client.to_string()
    }
}
