use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ChatMessage;

/// Events sent FROM server TO client over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// Server confirms the connection is registered for this user.
    Ready { user_id: Uuid, socket_id: Uuid },

    /// A private message addressed to this connection's user.
    PrivateMessageReceived { message: ChatMessage },
}

/// Commands sent FROM client TO server over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GatewayCommand {
    /// Relay a private message to the receiver's current connection.
    /// Dropped silently when the receiver is not connected.
    SendPrivateMessage {
        sender: Uuid,
        receiver: Uuid,
        text: String,
    },
}
