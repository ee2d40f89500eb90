//! Avatar manifests: `avatar.json` parsing, validation and discovery.
//!
//! An avatar is a directory holding an `avatar.json` plus the assets it
//! names. Without one, the built-in text avatar is used.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use agent_avatar_cli::animation::{AnimationScript, AutoTransition};
use agent_avatar_cli::frames::{builtin_frames, FrameSource};
use agent_avatar_protocol::{AvatarDescriptor, AvatarState, StateAssets};

pub const MANIFEST_FILE: &str = "avatar.json";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("avatar name must not be empty")]
    EmptyName,

    #[error("avatar does not declare the required 'idle' state")]
    MissingIdle,

    #[error("state '{state}' must declare both 'duration' and 'transition_to'")]
    IncompleteTransition { state: String },

    #[error("state '{state}' declares a zero duration")]
    ZeroDuration { state: String },

    #[error("state '{state}' transitions to undeclared state '{target}'")]
    UnknownTransition { state: String, target: String },

    #[error("avatar '{0}' not found")]
    NotFound(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvatarManifest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub states: BTreeMap<String, StateAssets>,
}

impl AvatarManifest {
    /// The built-in avatar: every canonical state, text frames only.
    pub fn builtin() -> Self {
        let states = AvatarState::CANONICAL
            .iter()
            .map(|state| {
                let assets = match state {
                    AvatarState::Error => StateAssets {
                        duration: Some(3000),
                        transition_to: Some(AvatarState::Idle),
                        ..Default::default()
                    },
                    AvatarState::Success => StateAssets {
                        duration: Some(2000),
                        transition_to: Some(AvatarState::Idle),
                        ..Default::default()
                    },
                    _ => StateAssets::default(),
                };
                (state.as_str().to_string(), assets)
            })
            .collect();

        Self {
            name: "builtin".to_string(),
            description: Some("Built-in text avatar".to_string()),
            states,
        }
    }

    /// Read and validate a manifest file.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let manifest: AvatarManifest =
            serde_json::from_str(&content).map_err(|source| ManifestError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.name.trim().is_empty() {
            return Err(ManifestError::EmptyName);
        }
        if !self.states.contains_key(AvatarState::Idle.as_str()) {
            return Err(ManifestError::MissingIdle);
        }

        for (name, assets) in &self.states {
            match (assets.duration, &assets.transition_to) {
                (None, None) => {}
                (Some(0), Some(_)) => {
                    return Err(ManifestError::ZeroDuration {
                        state: name.clone(),
                    })
                }
                (Some(_), Some(target)) => {
                    if !self.states.contains_key(target.as_str()) {
                        return Err(ManifestError::UnknownTransition {
                            state: name.clone(),
                            target: target.to_string(),
                        });
                    }
                }
                _ => {
                    return Err(ManifestError::IncompleteTransition {
                        state: name.clone(),
                    })
                }
            }
        }
        Ok(())
    }

    pub fn declared_states(&self) -> Vec<AvatarState> {
        self.states.keys().map(|k| AvatarState::from(k.as_str())).collect()
    }

    pub fn transitions(&self) -> HashMap<AvatarState, AutoTransition> {
        self.states
            .iter()
            .filter_map(|(name, assets)| {
                let after = Duration::from_millis(assets.duration?);
                let to = assets.transition_to.clone()?;
                Some((AvatarState::from(name.as_str()), AutoTransition { after, to }))
            })
            .collect()
    }

    /// Frame sources for the terminal viewer, resolved against `dir`.
    ///
    /// States with neither `frames` nor `image` fall back to built-in text
    /// frames when one exists for that label.
    pub fn frame_sources(&self, dir: Option<&Path>) -> HashMap<AvatarState, FrameSource> {
        self.states
            .iter()
            .filter_map(|(name, assets)| {
                let state = AvatarState::from(name.as_str());
                let declared = assets.frames.as_deref().or(assets.image.as_deref());
                let source = match (declared, dir) {
                    (Some(rel), Some(dir)) => FrameSource::from_path(dir.join(rel)),
                    _ => FrameSource::Inline(builtin_frames(&state)?),
                };
                Some((state, source))
            })
            .collect()
    }

    pub fn descriptor(&self) -> AvatarDescriptor {
        AvatarDescriptor {
            name: self.name.clone(),
            states: self.states.clone(),
        }
    }
}

/// A manifest plus the directory its asset paths are relative to.
#[derive(Debug, Clone)]
pub struct ResolvedAvatar {
    pub manifest: AvatarManifest,
    pub dir: Option<PathBuf>,
}

impl ResolvedAvatar {
    pub fn builtin() -> Self {
        Self {
            manifest: AvatarManifest::builtin(),
            dir: None,
        }
    }

    pub fn load_dir(dir: &Path) -> Result<Self, ManifestError> {
        let manifest = AvatarManifest::load(&dir.join(MANIFEST_FILE))?;
        Ok(Self {
            manifest,
            dir: Some(dir.to_path_buf()),
        })
    }

    pub fn script(&self) -> AnimationScript {
        AnimationScript {
            sources: self.manifest.frame_sources(self.dir.as_deref()),
            transitions: self.manifest.transitions(),
        }
    }
}

/// Resolve `--avatar`: a directory, a path to `avatar.json`, or the name of
/// a directory under `avatars_dir`. `None` selects the built-in avatar.
pub fn resolve_avatar(
    avatar: Option<&str>,
    avatars_dir: &Path,
) -> Result<ResolvedAvatar, ManifestError> {
    let Some(avatar) = avatar.map(str::trim).filter(|a| !a.is_empty()) else {
        return Ok(ResolvedAvatar::builtin());
    };
    if avatar == "builtin" {
        return Ok(ResolvedAvatar::builtin());
    }

    let as_path = PathBuf::from(avatar);
    if as_path.is_dir() {
        return ResolvedAvatar::load_dir(&as_path);
    }
    if as_path.is_file() {
        let dir = as_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let manifest = AvatarManifest::load(&as_path)?;
        return Ok(ResolvedAvatar {
            manifest,
            dir: Some(dir),
        });
    }

    let named = avatars_dir.join(avatar);
    if named.join(MANIFEST_FILE).is_file() {
        return ResolvedAvatar::load_dir(&named);
    }

    Err(ManifestError::NotFound(avatar.to_string()))
}

/// Every avatar directory under `avatars_dir`, sorted by directory name.
pub fn discover_avatars(avatars_dir: &Path) -> Vec<(String, Result<AvatarManifest, ManifestError>)> {
    let Ok(entries) = std::fs::read_dir(avatars_dir) else {
        return Vec::new();
    };

    let mut found: Vec<_> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.join(MANIFEST_FILE).is_file())
        .filter_map(|path| {
            let name = path.file_name()?.to_string_lossy().to_string();
            Some((name, AvatarManifest::load(&path.join(MANIFEST_FILE))))
        })
        .collect();
    found.sort_by(|a, b| a.0.cmp(&b.0));
    found
}
