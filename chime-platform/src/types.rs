use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl Deref for $name {
            type Target = str;

            fn deref(&self) -> &Self::Target {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

id_newtype!(GroupId);
id_newtype!(UserId);
id_newtype!(MessageId);

/// Opaque outbound-addressing handle captured from inbound traffic. The
/// engine never inspects it; it only hands it back to the adapter that
/// produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OriginToken(String);

impl OriginToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OriginToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inbound group message as the engine sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupEvent {
    pub group_id: GroupId,
    pub sender_id: UserId,
    pub message_id: MessageId,
    pub content: String,
    /// Sender directly addressed the agent (platform mention or name match).
    #[serde(default)]
    pub mentions_agent: bool,
    /// Sender is another automated account, as flagged by the platform.
    #[serde(default)]
    pub sender_is_bot: bool,
    pub origin: OriginToken,
    pub received_at: DateTime<Utc>,
}

/// The agent's name and accepted aliases, used for mention detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl AgentIdentity {
    pub fn new(name: impl Into<String>, aliases: Vec<String>) -> Self {
        Self {
            name: name.into(),
            aliases,
        }
    }

    /// Case-insensitive scan for `@name` or any alias appearing in the text.
    pub fn mentioned_in(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        let at_name = format!("@{}", self.name.to_lowercase());
        if lowered.contains(&at_name) {
            return true;
        }
        self.aliases.iter().any(|alias| {
            let alias = alias.trim().to_lowercase();
            !alias.is_empty() && lowered.contains(&alias)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mention_matches_at_name_case_insensitive() {
        let identity = AgentIdentity::new("Chime", vec![]);
        assert!(identity.mentioned_in("hey @chime what do you think"));
        assert!(identity.mentioned_in("@CHIME?"));
        assert!(!identity.mentioned_in("talking about wind chimes"));
    }

    #[test]
    fn mention_matches_aliases() {
        let identity = AgentIdentity::new("Chime", vec!["小铃".to_string()]);
        assert!(identity.mentioned_in("小铃在吗"));
        assert!(!identity.mentioned_in("nobody here"));
    }

    #[test]
    fn blank_alias_never_matches() {
        let identity = AgentIdentity::new("Chime", vec!["  ".to_string()]);
        assert!(!identity.mentioned_in("anything at all"));
    }
}
