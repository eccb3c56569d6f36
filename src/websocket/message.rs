use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes};

/// An opaque client payload, relayed with the same frame kind it arrived in.
///
/// Both variants are reference counted, so cloning a frame for every
/// recipient of a broadcast never copies the payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayFrame {
    Text(Utf8Bytes),
    Binary(Bytes),
}

impl RelayFrame {
    pub fn text(text: impl Into<Utf8Bytes>) -> Self {
        Self::Text(text.into())
    }

    pub fn binary(bytes: impl Into<Bytes>) -> Self {
        Self::Binary(bytes.into())
    }

    /// Label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Text(t) => t.as_str().len(),
            Self::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Extract the payload of a data frame; control frames yield `None`.
    pub fn from_message(message: Message) -> Option<Self> {
        match message {
            Message::Text(text) => Some(Self::Text(text)),
            Message::Binary(bytes) => Some(Self::Binary(bytes)),
            Message::Ping(_) | Message::Pong(_) | Message::Close(_) => None,
        }
    }
}

impl From<RelayFrame> for Message {
    fn from(frame: RelayFrame) -> Self {
        match frame {
            RelayFrame::Text(text) => Message::Text(text),
            RelayFrame::Binary(bytes) => Message::Binary(bytes),
        }
    }
}

/// Items queued on a connection's outbound channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A frame relayed from another participant
    Frame(RelayFrame),
    /// Liveness probe sent by the heartbeat task
    Ping,
}

impl From<Outbound> for Message {
    fn from(outbound: Outbound) -> Self {
        match outbound {
            Outbound::Frame(frame) => frame.into(),
            Outbound::Ping => Message::Ping(Bytes::new()),
        }
    }
}

/// Close codes the relay sends (RFC 6455 section 7.4.1)
pub mod close_code {
    /// Server is going away (shutdown)
    pub const AWAY: u16 = 1001;
    /// Peer stopped accepting frames fast enough and was evicted
    pub const POLICY: u16 = 1008;
    /// Server is at capacity, retry later
    pub const AGAIN: u16 = 1013;
}

pub fn close_message(code: u16, reason: impl Into<Utf8Bytes>) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_kind_preserved() {
        let text: Message = RelayFrame::text("{\"cmd\":\"drag\"}").into();
        assert!(matches!(text, Message::Text(ref t) if t.as_str() == "{\"cmd\":\"drag\"}"));

        let binary: Message = RelayFrame::binary(vec![1u8, 2, 3]).into();
        assert!(matches!(binary, Message::Binary(ref b) if b.as_ref() == [1, 2, 3]));
    }

    #[test]
    fn test_control_frames_are_not_payloads() {
        assert!(RelayFrame::from_message(Message::Ping(Bytes::new())).is_none());
        assert!(RelayFrame::from_message(Message::Pong(Bytes::new())).is_none());
        assert!(RelayFrame::from_message(Message::Close(None)).is_none());
        assert_eq!(
            RelayFrame::from_message(Message::Text("hi".into())),
            Some(RelayFrame::text("hi"))
        );
    }

    #[test]
    fn test_frame_len() {
        assert_eq!(RelayFrame::text("abc").len(), 3);
        assert!(RelayFrame::binary(Vec::<u8>::new()).is_empty());
        assert_eq!(RelayFrame::binary(vec![0u8; 4]).kind(), "binary");
    }

    #[test]
    fn test_ping_outbound() {
        assert!(matches!(Message::from(Outbound::Ping), Message::Ping(_)));
    }
}
