//! # Lifecycle messages exchanged over a [`Channel`](super::Channel).
//!
//! The vocabulary is closed: `start`, `stop`, `started`, `stopped`, `crashed`. Anything
//! else that arrives on a queue decodes to [`Content::Unrecognized`]; readers log it and
//! keep going.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Body of a [`Message`].
///
/// Serialized as a bare string so that the cross-process wire format stays readable.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Content {
    /// Supervisor → service: (re)start the service body.
    Start,
    /// Host → supervisor, supervisor → service: stop cooperatively.
    Stop,
    /// Service → supervisor: the body is running.
    Started,
    /// Service → supervisor, supervisor → host: exited gracefully.
    Stopped,
    /// Service → supervisor, supervisor → host: failed.
    Crashed,
    /// Anything outside the vocabulary.
    Unrecognized(String),
}

impl Content {
    /// Wire form of the content.
    pub fn as_str(&self) -> &str {
        match self {
            Content::Start => "start",
            Content::Stop => "stop",
            Content::Started => "started",
            Content::Stopped => "stopped",
            Content::Crashed => "crashed",
            Content::Unrecognized(s) => s,
        }
    }

    /// False only for [`Content::Unrecognized`].
    pub fn is_recognized(&self) -> bool {
        !matches!(self, Content::Unrecognized(_))
    }
}

impl From<&str> for Content {
    fn from(s: &str) -> Self {
        match s {
            "start" => Content::Start,
            "stop" => Content::Stop,
            "started" => Content::Started,
            "stopped" => Content::Stopped,
            "crashed" => Content::Crashed,
            other => Content::Unrecognized(other.to_string()),
        }
    }
}

impl From<String> for Content {
    fn from(s: String) -> Self {
        match Content::from(s.as_str()) {
            Content::Unrecognized(_) => Content::Unrecognized(s),
            known => known,
        }
    }
}

impl From<Content> for String {
    fn from(c: Content) -> Self {
        match c {
            Content::Unrecognized(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One lifecycle message: who sent it and what it says.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Id of the sender (service id, or `"host"`).
    pub sender: String,
    /// What the message says.
    pub content: Content,
}

impl Message {
    /// Creates a message.
    pub fn new(sender: impl Into<String>, content: impl Into<Content>) -> Self {
        Self {
            sender: sender.into(),
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vocabulary_parses() {
        for word in ["start", "stop", "started", "stopped", "crashed"] {
            let c = Content::from(word);
            assert!(c.is_recognized());
            assert_eq!(c.as_str(), word);
        }
    }

    #[test]
    fn test_unknown_content_is_preserved() {
        let c = Content::from("reload");
        assert_eq!(c, Content::Unrecognized("reload".into()));
        assert!(!c.is_recognized());
        assert_eq!(String::from(c), "reload");
    }

    #[test]
    fn test_wire_form_is_plain_string() {
        let msg = Message::new("svc-1", Content::Crashed);
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"sender":"svc-1","content":"crashed"}"#);

        let odd: Message = serde_json::from_str(r#"{"sender":"x","content":"dance"}"#).unwrap();
        assert_eq!(odd.content, Content::Unrecognized("dance".into()));
    }
}
