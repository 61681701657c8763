/// Prefix used when neither the nickname nor the alternate is free
pub const NICK_PREFIX: char = '_';

/// Picks the next nickname to try when the server reports a collision.
///
/// Before the welcome numeric the first collision moves to the alternate
/// nickname and every later one prefixes the last attempt, so each retry
/// asks for something new. After the welcome the rejected nickname is
/// prefixed.
#[derive(Debug, Clone)]
pub struct NickTracker {
    nickname: String,
    alt_nickname: String,
    think: String,
    got_welcome: bool,
    tried_alt: bool,
}

impl NickTracker {
    pub fn new(nickname: impl Into<String>, alt_nickname: impl Into<String>) -> Self {
        let nickname = nickname.into();
        Self {
            think: nickname.clone(),
            alt_nickname: alt_nickname.into(),
            nickname,
            got_welcome: false,
            tried_alt: false,
        }
    }

    /// Forget everything learned on a previous connection
    pub fn reset(&mut self) {
        self.think = self.nickname.clone();
        self.got_welcome = false;
        self.tried_alt = false;
    }

    pub fn got_welcome(&mut self) {
        self.got_welcome = true;
    }

    pub fn has_welcome(&self) -> bool {
        self.got_welcome
    }

    /// The nickname last asked for
    pub fn current(&self) -> &str {
        &self.think
    }

    /// Next nickname to request after `rejected` was refused
    pub fn on_nick_in_use(&mut self, rejected: &str) -> String {
        if self.got_welcome {
            return format!("{}{}", NICK_PREFIX, rejected);
        }

        if !self.tried_alt {
            self.tried_alt = true;
            if self.alt_nickname != self.think {
                self.think = self.alt_nickname.clone();
                return self.think.clone();
            }
        }

        self.think = format!("{}{}", NICK_PREFIX, self.think);
        self.think.clone()
    }
}
