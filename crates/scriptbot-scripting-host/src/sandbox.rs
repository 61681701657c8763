//! Visibility rules for the sandboxed runtime
//!
//! Sandboxed scripts reach host types only by importing them by qualified
//! name (`import "irc::format" as fmt;`). Every such request goes through
//! [`SandboxPolicy::is_visible`]. Members of host objects go through
//! [`member_visible`].

use crate::config::SandboxConfig;

/// Prefixes sandboxed scripts may always resolve
pub const ALWAYS_ALLOWED: &[&str] = &[
    "irc::",
    "std::",
    "scriptbot::scripts::api",
    "scriptbot::scripts::binding",
];

/// The host's own namespace
pub const HOST_NAMESPACE: &str = "scriptbot::";

/// Internal part of the host namespace, hidden unless allow-listed
pub const INTERNAL_NAMESPACE: &str = "scriptbot::scripts::";

/// Reflection entry points that are never exposed
pub const REFLECTION_MEMBERS: &[&str] = &["type_of", "getClass"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SandboxPolicy {
    allow: Vec<String>,
    deny: Vec<String>,
}

impl SandboxPolicy {
    pub fn new(allow: Vec<String>, deny: Vec<String>) -> Self {
        Self { allow, deny }
    }

    /// Decide whether a qualified host type name may be resolved.
    ///
    /// A deny-list hit always wins, then the built-in prefixes, then the
    /// public host namespace, then the allow-list.
    pub fn is_visible(&self, name: &str) -> bool {
        if self.deny.iter().any(|prefix| name.starts_with(prefix.as_str())) {
            return false;
        }

        if ALWAYS_ALLOWED.iter().any(|prefix| name.starts_with(prefix)) {
            return true;
        }

        if name.starts_with(HOST_NAMESPACE) && !name.starts_with(INTERNAL_NAMESPACE) {
            return true;
        }

        self.allow.iter().any(|prefix| name.starts_with(prefix.as_str()))
    }

    pub fn allow_list(&self) -> &[String] {
        &self.allow
    }

    pub fn deny_list(&self) -> &[String] {
        &self.deny
    }
}

impl From<&SandboxConfig> for SandboxPolicy {
    fn from(config: &SandboxConfig) -> Self {
        Self::new(config.allow.clone(), config.deny.clone())
    }
}

/// Whether a member of a wrapped host object may be seen by sandboxed code
pub fn member_visible(name: &str) -> bool {
    !name.starts_with("__") && !REFLECTION_MEMBERS.contains(&name)
}
