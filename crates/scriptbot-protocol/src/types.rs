use std::fmt;

// ============================================================================
// Case mapping
// ============================================================================

/// Lowercase a nickname or channel name using RFC 1459 case mapping,
/// where `[]\~` are the uppercase forms of `{}|^`.
pub fn irc_to_lower(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            '[' => '{',
            ']' => '}',
            '\\' => '|',
            '~' => '^',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}

/// Compare two names under RFC 1459 case mapping.
pub fn irc_eq_ignore_case(a: &str, b: &str) -> bool {
    a.len() == b.len() && irc_to_lower(a) == irc_to_lower(b)
}

// ============================================================================
// Info types
// ============================================================================

/// A channel the session knows about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub name: String,
    pub topic: Option<String>,
}

impl ChannelInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            topic: None,
        }
    }
}

impl fmt::Display for ChannelInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A user on the network, identified by `nick!ident@host`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub nickname: String,
    pub username: String,
    pub hostname: String,
}

impl ClientInfo {
    /// Parse a hostmask. Missing parts are left empty, so a bare nickname
    /// or a server name is accepted too.
    pub fn parse(hostmask: &str) -> Self {
        let hostmask = hostmask.strip_prefix(':').unwrap_or(hostmask);
        let (nick_ident, hostname) = match hostmask.split_once('@') {
            Some((left, host)) => (left, host),
            None => (hostmask, ""),
        };
        let (nickname, username) = match nick_ident.split_once('!') {
            Some((nick, ident)) => (nick, ident),
            None => (nick_ident, ""),
        };

        Self {
            nickname: nickname.to_string(),
            username: username.to_string(),
            hostname: hostname.to_string(),
        }
    }

    pub fn hostmask(&self) -> String {
        match (self.username.is_empty(), self.hostname.is_empty()) {
            (true, true) => self.nickname.clone(),
            (true, false) => format!("{}@{}", self.nickname, self.hostname),
            (false, true) => format!("{}!{}", self.nickname, self.username),
            (false, false) => format!("{}!{}@{}", self.nickname, self.username, self.hostname),
        }
    }
}

impl fmt::Display for ClientInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.nickname)
    }
}

/// A client as seen from inside one channel, with its channel modes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelClientInfo {
    pub client: ClientInfo,
    /// Channel mode prefixes such as `@` or `+`
    pub modes: String,
}

impl ChannelClientInfo {
    pub fn new(client: ClientInfo) -> Self {
        Self {
            client,
            modes: String::new(),
        }
    }

    pub fn with_modes(mut self, modes: impl Into<String>) -> Self {
        self.modes = modes.into();
        self
    }
}
