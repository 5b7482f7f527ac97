//! Frames exchanged between the primary app and the backbone bridge process.

use serde::{Deserialize, Serialize};

use crate::models::BackboneIdentity;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "pattern", content = "data", rename_all = "snake_case")]
pub enum BridgeRequest {
    CreateUser,
    CreateRoom(CreateRoomPayload),
}

impl BridgeRequest {
    pub fn pattern(&self) -> &'static str {
        match self {
            Self::CreateUser => "create_user",
            Self::CreateRoom(_) => "create_room",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomPayload {
    pub name: String,
    pub seller_name: String,
    pub buyer_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "pattern", content = "data", rename_all = "snake_case")]
pub enum BridgeReply {
    /// `None` when the backbone could not register the account
    CreateUser(Option<BackboneIdentity>),
    /// Empty when the room could not be created
    CreateRoom(String),
    Error(String),
}
