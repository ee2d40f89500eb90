//! Update ingress, the only path that writes the authoritative state.

use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use agent_avatar_protocol::{AvatarState, SetStateResponse};

use crate::store::StateStore;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngressError {
    #[error("invalid state '{state}'; valid states: {}", valid_states.join(", "))]
    InvalidState {
        state: String,
        valid_states: Vec<String>,
    },
}

/// Labels the ingress accepts: the canonical seven plus any the loaded
/// avatar declares.
#[derive(Debug, Clone, Default)]
pub struct LegalStates {
    custom: BTreeSet<String>,
}

impl LegalStates {
    pub fn with_declared<I>(declared: I) -> Self
    where
        I: IntoIterator<Item = AvatarState>,
    {
        let custom = declared
            .into_iter()
            .filter(|state| !state.is_canonical())
            .map(String::from)
            .collect();
        Self { custom }
    }

    pub fn resolve(&self, label: &str) -> Option<AvatarState> {
        if let Some(state) = AvatarState::canonical(label) {
            return Some(state);
        }
        self.custom
            .contains(label)
            .then(|| AvatarState::Custom(label.to_string()))
    }

    /// Canonical states in display order, then custom states sorted.
    pub fn names(&self) -> Vec<String> {
        AvatarState::CANONICAL
            .iter()
            .map(|s| s.as_str().to_string())
            .chain(self.custom.iter().cloned())
            .collect()
    }
}

pub struct UpdateIngress {
    store: Arc<StateStore>,
    legal: LegalStates,
}

impl UpdateIngress {
    pub fn new(store: Arc<StateStore>, legal: LegalStates) -> Self {
        Self { store, legal }
    }

    /// Validate `label` and write it.
    ///
    /// Rejections leave the store untouched and carry the full legal list.
    pub fn propose(&self, label: &str) -> Result<SetStateResponse, IngressError> {
        let trimmed = label.trim();
        let Some(state) = self.legal.resolve(trimmed) else {
            warn!(
                component = "ingress",
                event = "ingress.state.rejected",
                state = %trimmed,
                "Rejected unknown state"
            );
            return Err(IngressError::InvalidState {
                state: trimmed.to_string(),
                valid_states: self.legal.names(),
            });
        };

        let previous = self.store.set_state(state.clone());
        info!(
            component = "ingress",
            event = "ingress.state.accepted",
            state = %state,
            previous = %previous,
            "State accepted"
        );

        Ok(SetStateResponse {
            ok: true,
            state,
            previous,
        })
    }
}

#[cfg(test)]
impl LegalStates {
    pub fn canonical() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CANONICAL_NAMES: [&str; 7] = [
        "idle", "thinking", "writing", "bash", "error", "success", "waiting",
    ];

    fn ingress() -> (Arc<StateStore>, UpdateIngress) {
        let store = Arc::new(StateStore::new());
        let ingress = UpdateIngress::new(store.clone(), LegalStates::canonical());
        (store, ingress)
    }

    #[test]
    fn accepts_canonical_state_and_reports_previous() {
        let (store, ingress) = ingress();
        let response = ingress.propose("thinking").unwrap();
        assert_eq!(
            response,
            SetStateResponse {
                ok: true,
                state: AvatarState::Thinking,
                previous: AvatarState::Idle,
            }
        );
        assert_eq!(store.get_state().state, AvatarState::Thinking);
    }

    #[test]
    fn rejects_bogus_state_without_touching_store() {
        let (store, ingress) = ingress();
        let before = store.get_state();

        let err = ingress.propose("bogus").unwrap_err();
        let IngressError::InvalidState {
            state,
            valid_states,
        } = err;
        assert_eq!(state, "bogus");
        assert_eq!(valid_states, CANONICAL_NAMES.to_vec());
        assert_eq!(store.get_state(), before);
    }

    #[test]
    fn sleeping_is_not_a_state() {
        let (store, ingress) = ingress();
        assert!(ingress.propose("sleeping").is_err());
        assert_eq!(store.get_state().state, AvatarState::Idle);
    }

    #[test]
    fn matching_trims_whitespace_but_keeps_case() {
        let (_store, ingress) = ingress();
        assert!(ingress.propose("  bash\n").is_ok());
        assert!(ingress.propose("Bash").is_err());
    }

    #[test]
    fn declared_custom_states_are_accepted_and_listed() {
        let store = Arc::new(StateStore::new());
        let legal = LegalStates::with_declared([
            AvatarState::Idle,
            AvatarState::Custom("dancing".into()),
            AvatarState::Custom("celebrating".into()),
        ]);
        let ingress = UpdateIngress::new(store.clone(), legal);

        let response = ingress.propose("dancing").unwrap();
        assert_eq!(response.state, AvatarState::Custom("dancing".into()));

        let IngressError::InvalidState { valid_states, .. } =
            ingress.propose("napping").unwrap_err();
        assert_eq!(&valid_states[..7], &CANONICAL_NAMES);
        assert_eq!(&valid_states[7..], &["celebrating", "dancing"]);
    }
}
