//! Channel identities and transport URLs.

use crate::error::Result;
use std::fmt;
use url::Url;

/// Kind of logical channel a transport connects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// One conversation thread.
    Chat,
    /// The user-wide notification stream.
    Notifications,
}

impl ChannelKind {
    /// Path segment used in the transport URL.
    pub fn path_segment(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Notifications => "notifications",
        }
    }
}

/// Identifies one logical persistent-connection target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelIdentity {
    kind: ChannelKind,
    id: Option<String>,
}

impl ChannelIdentity {
    /// A conversation channel.
    pub fn conversation(id: impl Into<String>) -> Self {
        Self {
            kind: ChannelKind::Chat,
            id: Some(id.into()),
        }
    }

    /// The user-wide notification channel.
    pub fn notifications() -> Self {
        Self {
            kind: ChannelKind::Notifications,
            id: None,
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Conversation id, if this is a chat channel.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Build the transport URL for this channel.
    ///
    /// Produces `ws[s]://<host>/ws/<kind>/[<id>/]?token=<token>`. The token
    /// travels as a query parameter because the handshake cannot carry
    /// custom headers.
    pub fn url(&self, host: &str, use_tls: bool, token: &str) -> Result<Url> {
        let scheme = if use_tls { "wss" } else { "ws" };
        let mut url = Url::parse(&format!("{}://{}/", scheme, host))?;

        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?;
            segments.clear();
            segments.push("ws").push(self.kind.path_segment());
            if let Some(id) = &self.id {
                segments.push(id);
            }
            // trailing slash
            segments.push("");
        }

        url.query_pairs_mut().append_pair("token", token);
        Ok(url)
    }
}

impl fmt::Display for ChannelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}:{}", self.kind.path_segment(), id),
            None => f.write_str(self.kind.path_segment()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_url() {
        let channel = ChannelIdentity::conversation("abc-123");
        let url = channel.url("api.example.com", true, "tok").unwrap();
        assert_eq!(url.as_str(), "wss://api.example.com/ws/chat/abc-123/?token=tok");
    }

    #[test]
    fn test_notifications_url_plain() {
        let channel = ChannelIdentity::notifications();
        let url = channel.url("localhost:8000", false, "t").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8000/ws/notifications/?token=t");
    }

    #[test]
    fn test_token_is_escaped() {
        let channel = ChannelIdentity::conversation("c1");
        let url = channel.url("h", true, "a b&c").unwrap();
        assert_eq!(url.query(), Some("token=a+b%26c"));
    }

    #[test]
    fn test_bad_host_is_error() {
        let channel = ChannelIdentity::notifications();
        assert!(channel.url("", true, "t").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(ChannelIdentity::conversation("x").to_string(), "chat:x");
        assert_eq!(ChannelIdentity::notifications().to_string(), "notifications");
    }
}
