//! Outbound side of a client connection.

use std::sync::Arc;

use fxstream_common::SessionId;
use thiserror::Error;
use tokio::sync::mpsc;

/// Why a frame could not be handed to a session.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    #[error("Session closed")]
    Closed,
    #[error("Session buffer full")]
    Full,
}

/// Where frames for one client go. Sends never block.
pub trait SessionSink: Send + Sync {
    fn session_id(&self) -> &SessionId;

    /// Whether the underlying connection is still open.
    fn is_open(&self) -> bool;

    /// Queue a text frame.
    fn try_send(&self, frame: Arc<str>) -> Result<(), SendError>;
}

/// A session backed by a bounded channel. The transport task owns the receiver.
pub struct ChannelSession {
    id: SessionId,
    tx: mpsc::Sender<Arc<str>>,
}

impl ChannelSession {
    /// Create a session and the receiver its transport drains.
    pub fn new(id: SessionId, buffer: usize) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { id, tx }, rx)
    }
}

impl SessionSink for ChannelSession {
    fn session_id(&self) -> &SessionId {
        &self.id
    }

    fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    fn try_send(&self, frame: Arc<str>) -> Result<(), SendError> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_and_closed() {
        let (session, mut rx) = ChannelSession::new(SessionId::new("s-1"), 1);

        assert!(session.try_send(Arc::from("a")).is_ok());
        assert_eq!(session.try_send(Arc::from("b")), Err(SendError::Full));
        assert_eq!(rx.try_recv().unwrap().as_ref(), "a");

        drop(rx);
        assert!(!session.is_open());
        assert_eq!(session.try_send(Arc::from("c")), Err(SendError::Closed));
    }
}
