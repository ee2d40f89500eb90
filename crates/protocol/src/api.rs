//! HTTP request and response bodies

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::AvatarState;

/// `POST /api/state` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetStateRequest {
    pub state: String,
}

/// `POST /api/state` success body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetStateResponse {
    pub ok: bool,
    pub state: AvatarState,
    pub previous: AvatarState,
}

/// `POST /api/state` rejection body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetStateRejection {
    pub ok: bool,
    pub error: String,
    pub message: String,
    pub valid_states: Vec<String>,
}

/// Display assets declared for one state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateAssets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frames: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition_to: Option<AvatarState>,
}

/// `GET /api/avatar` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvatarDescriptor {
    pub name: String,
    pub states: BTreeMap<String, StateAssets>,
}
