//! Connection protocol handling.
//!
//! The transport (WebSocket server, test harness, simulator) drives a
//! [`ConnectionHandler`] with connect, message, error and close callbacks.
//! Replies go back through the session's own sink.

use std::sync::Arc;

use fxstream_common::{now_millis, FxStreamError, Result, SessionId};
use fxstream_protocol::{ClientMessage, ServerMessage};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::BroadcastConfig;
use crate::registry::SubscriptionRegistry;
use crate::session::{ChannelSession, SessionSink};

/// Applies client frames to the subscription registry.
pub struct ConnectionHandler {
    registry: Arc<SubscriptionRegistry>,
    config: BroadcastConfig,
}

impl ConnectionHandler {
    pub fn new(registry: Arc<SubscriptionRegistry>, config: BroadcastConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Open a channel-backed session with a generated ID.
    pub fn open_session(&self) -> (SessionId, mpsc::Receiver<Arc<str>>) {
        let (session, rx) = ChannelSession::new(SessionId::generate(), self.config.session_buffer);
        let session_id = session.session_id().clone();
        self.on_connect(Arc::new(session));
        (session_id, rx)
    }

    /// Register a new connection and greet it.
    pub fn on_connect(&self, sink: Arc<dyn SessionSink>) {
        self.registry.register(sink.clone());
        reply(sink.as_ref(), ServerMessage::connected(sink.session_id().clone()));
    }

    /// Handle one text frame from a client.
    ///
    /// Malformed frames are answered with an `error` frame and leave the
    /// connection open. Fails only for an unknown session.
    pub fn on_message(&self, session_id: &SessionId, text: &str) -> Result<()> {
        let sink = self
            .registry
            .session(session_id)
            .ok_or_else(|| FxStreamError::SessionNotFound(session_id.to_string()))?;

        let response = match ClientMessage::parse(text) {
            Ok(ClientMessage::Subscribe { pairs }) => {
                self.registry.subscribe(session_id, &pairs)?;
                info!(session_id = %session_id, pairs = ?pairs, "Client subscribed");
                ServerMessage::subscribed(pairs)
            }
            Ok(ClientMessage::Unsubscribe { pairs }) => {
                self.registry.unsubscribe(session_id, &pairs)?;
                info!(session_id = %session_id, pairs = ?pairs, "Client unsubscribed");
                ServerMessage::unsubscribed(pairs)
            }
            Ok(ClientMessage::Ping) => ServerMessage::pong(now_millis()),
            Err(e) => {
                debug!(session_id = %session_id, error = %e, "Malformed client message");
                ServerMessage::error(e.to_string())
            }
        };

        reply(sink.as_ref(), response);
        Ok(())
    }

    /// Connection closed by either side.
    pub fn on_disconnect(&self, session_id: &SessionId) {
        if self.registry.unregister(session_id) {
            info!(session_id = %session_id, "Client disconnected");
        }
    }

    /// Transport failure. The session is dropped like a close.
    pub fn on_transport_error(&self, session_id: &SessionId, error: &str) {
        warn!(session_id = %session_id, error = %error, "Transport error");
        self.registry.unregister(session_id);
    }
}

fn reply(sink: &dyn SessionSink, message: ServerMessage) {
    let frame = match message.to_json() {
        Ok(frame) => frame,
        Err(e) => {
            warn!(session_id = %sink.session_id(), error = %e, "Failed to encode reply");
            return;
        }
    };
    if let Err(e) = sink.try_send(Arc::from(frame)) {
        warn!(session_id = %sink.session_id(), error = %e, "Failed to send reply");
    }
}
