//! Frame loading and the per-viewer frame cache.
//!
//! Everything is read up front so the render loop never touches the disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;
use tracing::{debug, warn};

use agent_avatar_protocol::AvatarState;

/// Line that separates frames inside a single text file.
pub const FRAME_SEPARATOR: &str = "---";

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("no frames found in {0}")]
    Empty(PathBuf),
}

/// Where a state's frames come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameSource {
    /// A `.txt` file split on `---`, or a directory of `.txt` files.
    Text(PathBuf),
    Image(PathBuf),
    Inline(Vec<String>),
}

impl FrameSource {
    pub fn from_path(path: PathBuf) -> Self {
        if is_image(&path) {
            FrameSource::Image(path)
        } else {
            FrameSource::Text(path)
        }
    }

    fn path(&self) -> Option<&Path> {
        match self {
            FrameSource::Text(path) | FrameSource::Image(path) => Some(path),
            FrameSource::Inline(_) => None,
        }
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Loaded animation payload for one state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateFrames {
    Text(Vec<String>),
    /// A still image, pre-encoded for terminal graphics protocols.
    Image { path: PathBuf, encoded: String },
}

impl StateFrames {
    pub fn len(&self) -> usize {
        match self {
            StateFrames::Text(frames) => frames.len(),
            StateFrames::Image { .. } => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_image(&self) -> bool {
        matches!(self, StateFrames::Image { .. })
    }
}

fn read_error(path: &Path) -> impl FnOnce(std::io::Error) -> FrameError + '_ {
    move |source| FrameError::Read {
        path: path.to_path_buf(),
        source,
    }
}

/// Read text frames from a file or a directory of `.txt` files.
pub fn load_text_frames(path: &Path) -> Result<Vec<String>, FrameError> {
    let frames: Vec<String> = if path.is_dir() {
        let mut files: Vec<PathBuf> = std::fs::read_dir(path)
            .map_err(read_error(path))?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("txt"))
            .collect();
        files.sort();

        files
            .iter()
            .map(|file| {
                std::fs::read_to_string(file)
                    .map(|s| s.trim_end_matches(['\n', '\r']).to_string())
                    .map_err(read_error(file))
            })
            .collect::<Result<_, _>>()?
    } else {
        let content = std::fs::read_to_string(path).map_err(read_error(path))?;
        split_frames(&content)
    };

    if frames.is_empty() {
        return Err(FrameError::Empty(path.to_path_buf()));
    }
    Ok(frames)
}

fn split_frames(content: &str) -> Vec<String> {
    let mut frames = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in content.lines() {
        if line.trim_end() == FRAME_SEPARATOR {
            frames.push(current.join("\n"));
            current.clear();
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        frames.push(current.join("\n"));
    }
    frames.retain(|f| !f.trim().is_empty());
    frames
}

pub fn load_image(path: &Path) -> Result<StateFrames, FrameError> {
    let bytes = std::fs::read(path).map_err(read_error(path))?;
    if bytes.is_empty() {
        return Err(FrameError::Empty(path.to_path_buf()));
    }
    Ok(StateFrames::Image {
        path: path.to_path_buf(),
        encoded: STANDARD.encode(bytes),
    })
}

fn load_source(source: &FrameSource) -> Result<StateFrames, FrameError> {
    match source {
        FrameSource::Text(path) => load_text_frames(path).map(StateFrames::Text),
        FrameSource::Image(path) => load_image(path),
        FrameSource::Inline(frames) if frames.is_empty() => {
            Err(FrameError::Empty(PathBuf::from("<inline>")))
        }
        FrameSource::Inline(frames) => Ok(StateFrames::Text(frames.clone())),
    }
}

/// Frames for every state, deduplicated by resolved file path.
#[derive(Debug, Default)]
pub struct FrameCache {
    by_path: HashMap<PathBuf, Arc<StateFrames>>,
    by_state: HashMap<AvatarState, Arc<StateFrames>>,
}

impl FrameCache {
    /// Load every source. Failures are logged and leave that state to the
    /// `idle` fallback.
    pub fn load(sources: &HashMap<AvatarState, FrameSource>) -> Self {
        let mut cache = Self::default();
        for (state, source) in sources {
            if let Err(e) = cache.insert(state.clone(), source) {
                warn!(
                    component = "frames",
                    event = "frames.load_failed",
                    state = %state,
                    error = %e,
                    "Failed to load frames"
                );
            }
        }
        cache
    }

    pub fn insert(&mut self, state: AvatarState, source: &FrameSource) -> Result<(), FrameError> {
        let frames = match source.path() {
            Some(path) => {
                let key = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
                match self.by_path.get(&key) {
                    Some(cached) => cached.clone(),
                    None => {
                        let loaded = Arc::new(load_source(source)?);
                        debug!(
                            component = "frames",
                            event = "frames.loaded",
                            path = %key.display(),
                            frames = loaded.len(),
                            "Loaded frames"
                        );
                        self.by_path.insert(key, loaded.clone());
                        loaded
                    }
                }
            }
            None => Arc::new(load_source(source)?),
        };
        self.by_state.insert(state, frames);
        Ok(())
    }

    /// Frames for `state`, falling back to `idle`.
    pub fn frames_for(&self, state: &AvatarState) -> Option<&Arc<StateFrames>> {
        self.by_state
            .get(state)
            .or_else(|| self.by_state.get(&AvatarState::Idle))
    }

    /// Number of distinct files read from disk.
    pub fn files_loaded(&self) -> usize {
        self.by_path.len()
    }
}

/// Text frames for the built-in avatar.
pub fn builtin_frames(state: &AvatarState) -> Option<Vec<String>> {
    let (eyes, mouths): (&[&str], &[&str]) = match state {
        AvatarState::Idle => (&["o   o", "o   o", "o   o", "-   -"], &["  -  "]),
        AvatarState::Thinking => (&["o   o", "O   o", "o   O"], &["  ~  ", "  ?  "]),
        AvatarState::Writing => (&["v   v"], &[" ___ ", " _._ "]),
        AvatarState::Bash => (&[">   <"], &[" $_  ", " $   "]),
        AvatarState::Error => (&["x   x"], &["  o  ", "  O  "]),
        AvatarState::Success => (&["^   ^"], &[" \\_/ ", " \\_/ "]),
        AvatarState::Waiting => (&["o   o", ".   .", "o   o"], &["  .  ", " ... "]),
        AvatarState::Custom(_) => return None,
    };

    let count = eyes.len().max(mouths.len());
    let frames = (0..count)
        .map(|i| {
            let eye = eyes[i % eyes.len()];
            let mouth = mouths[i % mouths.len()];
            format!(
                "  .-------.\n  | {eye} |\n  |  {mouth}|\n  '-------'\n   {label}",
                label = state.as_str()
            )
        })
        .collect();
    Some(frames)
}
