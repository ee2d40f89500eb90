//! Application state

use std::sync::Arc;

use crate::gateway::Gateway;
use crate::ingress::{LegalStates, UpdateIngress};
use crate::manifest::ResolvedAvatar;
use crate::store::StateStore;

/// Process-lifetime context shared by the HTTP and WebSocket layers.
pub struct AvatarServer {
    store: Arc<StateStore>,
    gateway: Gateway,
    ingress: UpdateIngress,
    avatar: ResolvedAvatar,
}

impl AvatarServer {
    pub fn new(avatar: ResolvedAvatar) -> Self {
        let store = Arc::new(StateStore::new());
        let gateway = Gateway::attach(store.clone());
        let legal = LegalStates::with_declared(avatar.manifest.declared_states());
        let ingress = UpdateIngress::new(store.clone(), legal);

        Self {
            store,
            gateway,
            ingress,
            avatar,
        }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn ingress(&self) -> &UpdateIngress {
        &self.ingress
    }

    pub fn avatar(&self) -> &ResolvedAvatar {
        &self.avatar
    }
}
