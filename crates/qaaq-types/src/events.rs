use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ChatConnection, ChatMessage, UserProfile};

/// Events sent over the chat gateway WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, full_name: String },

    /// A direct message was posted in one of the user's connections
    MessageCreate { message: ChatMessage },

    /// The peer read every message up to now
    MessagesRead { connection_id: Uuid, reader_id: Uuid },

    /// Someone asked to chat with this user
    ConnectionRequest {
        connection: ChatConnection,
        from: UserProfile,
    },

    /// A connection was accepted or rejected
    ConnectionUpdate { connection: ChatConnection },

    /// The peer started typing
    TypingStart {
        connection_id: Uuid,
        user_id: Uuid,
        full_name: String,
    },

    /// A user came online or went offline
    PresenceUpdate {
        user_id: Uuid,
        full_name: String,
        online: bool,
    },
}

/// Commands sent FROM client TO server over the chat gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Indicate typing in a direct chat
    StartTyping { connection_id: Uuid, recipient_id: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_uses_type_and_data_envelope() {
        let id = Uuid::new_v4();
        let raw = format!(
            r#"{{"type":"StartTyping","data":{{"connection_id":"{id}","recipient_id":"{id}"}}}}"#
        );
        match serde_json::from_str::<GatewayCommand>(&raw).unwrap() {
            GatewayCommand::StartTyping { connection_id, .. } => assert_eq!(connection_id, id),
            other => panic!("unexpected {other:?}"),
        }
    }
}
